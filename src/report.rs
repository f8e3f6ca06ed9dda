use console::Style;
use serde::Serialize;
use std::io::{self, Write};
use std::net::IpAddr;

use crate::prober::{ProbeEvent, ProbeStats};

const DIGITS_LINE: usize = 1;
const DIGITS_STATS: usize = 3;

/// Aggregate over the RTTs of successful attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RttSummary {
    pub min: f64,
    pub avg: f64,
    pub max: f64,
    pub stdev: f64,
}

impl RttSummary {
    pub fn from_samples(rtts: &[f64]) -> Self {
        if rtts.is_empty() {
            return Self::default();
        }
        let n = rtts.len() as f64;
        let min = rtts.iter().copied().fold(f64::INFINITY, f64::min);
        let max = rtts.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let avg = rtts.iter().sum::<f64>() / n;
        Self { min, avg, max, stdev: stdev(rtts, avg) }
    }
}

/// Sample standard deviation, 0 below two samples.
fn stdev(rtts: &[f64], mean: f64) -> f64 {
    if rtts.len() < 2 {
        return 0.0;
    }
    let var = rtts.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (rtts.len() - 1) as f64;
    var.sqrt()
}

/// Console side of a run: one line per event and the closing statistics.
pub struct Reporter {
    host: String,
    color: bool,
    timestamps: bool,
    json: bool,
    rtts: Vec<f64>,
    last: Option<ProbeStats>,
}

impl Reporter {
    pub fn new(host: impl Into<String>, color: bool, timestamps: bool, json: bool) -> Self {
        Self {
            host: host.into(),
            color,
            timestamps,
            json,
            rtts: Vec::new(),
            last: None,
        }
    }

    pub fn banner(&self, address: IpAddr, port: u16) -> Option<String> {
        if self.json {
            return None;
        }
        Some(self.line(format!("TCP-PING {} ({}) port {}", self.host, address, port)))
    }

    /// Record the event and render what should be printed for it.
    pub fn handle(&mut self, event: &ProbeEvent) -> Option<String> {
        self.last = Some(event.stats());
        if let ProbeEvent::Connect(result) = event {
            if let Some(rtt) = result.rtt_ms {
                self.rtts.push(rtt);
            }
        }

        if self.json {
            return self.json_line(event);
        }

        let text = match event {
            ProbeEvent::Connect(result) => {
                let rtt = result.rtt_ms.unwrap_or_default();
                let mut parts = vec![
                    self.paint(Style::new().green(), &format!("connected to {}:{}", self.host, result.target.port)),
                    format!("seq={}", result.seq),
                ];
                if let Some(port) = result.socket.local_port() {
                    parts.push(format!("srcport={}", port));
                }
                parts.push(format!("time={} ms", self.paint(rtt_style(rtt), &format!("{:.*}", DIGITS_LINE, rtt))));
                parts.join(" ")
            }
            ProbeEvent::Timeout(result) => {
                let mut parts = vec![
                    self.paint(Style::new().red(), &format!("timeout connecting to {}:{}", self.host, result.target.port)),
                    format!("seq={}", result.seq),
                ];
                if let Some(port) = result.socket.local_port() {
                    parts.push(format!("srcport={}", port));
                }
                parts.join(" ")
            }
            ProbeEvent::Error { result, error } => [
                self.paint(Style::new().red(), &format!("error connecting to {}:{}", self.host, result.target.port)),
                format!("seq={}", result.seq),
                format!("error={}", self.paint(Style::new().red(), &error.code)),
            ]
            .join(" "),
            ProbeEvent::End(summary) => return self.summary(&summary.stats),
        };
        Some(self.line(text))
    }

    /// Record `event` and write its line, if any, to `out`.
    pub fn write_event<W: Write>(&mut self, out: &mut W, event: &ProbeEvent) -> io::Result<()> {
        match self.handle(event) {
            Some(line) => writeln!(out, "{}", line),
            None => Ok(()),
        }
    }

    pub fn write_banner<W: Write>(&self, out: &mut W, address: IpAddr, port: u16) -> io::Result<()> {
        match self.banner(address, port) {
            Some(line) => writeln!(out, "{}", line),
            None => Ok(()),
        }
    }

    /// Closing block; nothing when no attempt was made.
    pub fn summary(&self, stats: &ProbeStats) -> Option<String> {
        if stats.sent == 0 {
            return None;
        }
        let rtt = RttSummary::from_samples(&self.rtts);
        let failed_pct = stats.failed as f64 / stats.sent as f64 * 100.0;
        Some(format!(
            "\n--- {} tcp-ping statistics ---\n{} handshakes attempted, {} succeeded, {:.0}% failed\nrtt min/avg/max/stdev = {:.p$}/{:.p$}/{:.p$}/{:.p$} ms",
            self.host,
            stats.sent,
            stats.success,
            failed_pct,
            rtt.min,
            rtt.avg,
            rtt.max,
            rtt.stdev,
            p = DIGITS_STATS,
        ))
    }

    pub fn rtt_summary(&self) -> RttSummary {
        RttSummary::from_samples(&self.rtts)
    }

    /// 0 when at least one handshake succeeded.
    pub fn exit_code(&self) -> i32 {
        match self.last {
            Some(stats) if stats.success > 0 => 0,
            _ => 1,
        }
    }

    fn json_line(&self, event: &ProbeEvent) -> Option<String> {
        let mut value = serde_json::to_value(event).ok()?;
        if event.is_end() {
            if let (Some(obj), Ok(rtt)) = (value.as_object_mut(), serde_json::to_value(self.rtt_summary())) {
                obj.insert("rtt".to_string(), rtt);
            }
        }
        Some(value.to_string())
    }

    fn line(&self, text: String) -> String {
        if self.timestamps {
            format!("{} {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"), text)
        } else {
            text
        }
    }

    fn paint(&self, style: Style, text: &str) -> String {
        let style = if self.color { style } else { style.force_styling(false) };
        style.apply_to(text).to_string()
    }
}

fn rtt_style(rtt: f64) -> Style {
    if rtt >= 150.0 {
        Style::new().red()
    } else if rtt >= 75.0 {
        Style::new().yellow()
    } else {
        Style::new().green()
    }
}
