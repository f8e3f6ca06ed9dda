use clap::Parser;
use console::style;
use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use tracing::{debug, info, warn};

use tcp_ping::config::{AppConfig, Overrides};
use tcp_ping::metrics::{serve_metrics, ProbeMetrics};
use tcp_ping::report::Reporter;
use tcp_ping::util::{parse_target, resolve_host_to_ip, ResolveError};
use tcp_ping::Prober;

#[derive(Parser, Debug)]
#[command(name = "tcp-ping", version)]
#[command(about = "Ping a host with TCP handshakes", long_about = None)]
#[command(after_help = "Examples:\n  tcp-ping google.com\n  tcp-ping -i .1 8.8.8.8:53\n  tcp-ping -c5 -t.05 aspmx.l.google.com 25\n  tcp-ping -i.2 https://google.com")]
struct Args {
    /// host, host:port or scheme://host[:port]
    target: String,

    /// Port to connect to (default: 80, or the scheme's port)
    port: Option<u16>,

    /// Number of connects (default: infinite)
    #[arg(short, long)]
    count: Option<u64>,

    /// Wait n seconds between connect starts (default: 1)
    #[arg(short, long)]
    interval: Option<f64>,

    /// Connection timeout in seconds (default: 3)
    #[arg(short, long)]
    timeout: Option<f64>,

    /// Flood mode, connect as fast as possible
    #[arg(short, long)]
    flood: bool,

    /// Prefix lines with a timestamp
    #[arg(short = 'T', long)]
    timestamp: bool,

    /// Disable color output
    #[arg(short = 'C', long)]
    no_color: bool,

    /// Print one JSON object per event
    #[arg(short, long)]
    json: bool,

    /// Serve Prometheus metrics on this address
    #[arg(long)]
    metrics_addr: Option<SocketAddr>,

    /// trace, debug, info, warn or error
    #[arg(long)]
    log_level: Option<String>,

    /// JSON config file (default: $TCP_PING_CONFIG)
    #[arg(long)]
    config: Option<String>,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            count: self.count,
            interval_secs: self.interval,
            timeout_secs: self.timeout,
            flood: self.flood,
            timestamps: self.timestamp,
            no_color: self.no_color,
            json: self.json,
            metrics_addr: self.metrics_addr,
            log_level: self.log_level.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load config first to get log level
    let mut config = AppConfig::load(args.config.as_deref()).await?;
    config.apply(args.overrides())?;
    let log_level = config.get_tracing_level()?;

    // Init tracing with configured log level
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env()
                         .add_directive(format!("tcp_ping={}", log_level.as_str().to_lowercase()).parse()?))
        .init();

    if !config.color {
        console::set_colors_enabled(false);
    }

    let (host, port) = match parse_target(&args.target, args.port) {
        Ok(target) => target,
        Err(e) => fail(&e.to_string()),
    };

    let address = match resolve_host_to_ip(&host).await {
        Ok(address) => address,
        Err(e @ ResolveError::NotFound(_)) => fail(&e.to_string()),
        Err(ResolveError::Other(e)) => fail(&e),
    };
    info!(host = %host, address = %address, port, "target resolved");

    let mut out = io::stdout().lock();
    let mut reporter = Reporter::new(&host, config.color, config.timestamps, config.json);
    match reporter.write_banner(&mut out, address, port) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::BrokenPipe => std::process::exit(reporter.exit_code()),
        Err(e) => return Err(e.into()),
    }

    let prober = Prober::new(address.to_string(), port, config.probe.clone())?;

    if let Some(addr) = config.metrics_addr {
        let metrics = ProbeMetrics::new()?;
        metrics.attach(&prober);
        info!("serving metrics on {}", addr);
        tokio::spawn(serve_metrics(metrics, addr));
    }

    {
        let prober = prober.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            prober.stop();
        });
    }

    let mut events = prober.events();
    prober.start();

    while let Some(event) = events.recv().await {
        match reporter.write_event(&mut out, &event) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                // reader went away, e.g. piped into `head`
                debug!("stdout closed, stopping");
                prober.stop();
                break;
            }
            Err(e) => return Err(e.into()),
        }
        if event.is_end() {
            break;
        }
    }

    std::process::exit(reporter.exit_code());
}

fn fail(message: &str) -> ! {
    eprintln!("{} {}", style("ERROR:").red(), message);
    std::process::exit(1);
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received terminate signal");
        }
    }
}
