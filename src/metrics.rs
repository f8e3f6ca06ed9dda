use prometheus::{Encoder, Gauge, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder};
use warp::Filter;
use std::net::SocketAddr;

use crate::prober::{ProbeEvent, Prober};

/// Prometheus view of one prober, fed through its event surface.
#[derive(Clone)]
pub struct ProbeMetrics {
    registry: Registry,
    attempts: IntCounterVec,
    latency_hist: Histogram,
    latency_gauge: Gauge,
}

impl ProbeMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let attempts = IntCounterVec::new(
            Opts::new("tcp_ping_attempts_total", "Settled handshake attempts by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(attempts.clone()))?;

        let latency_hist = Histogram::with_opts(
            HistogramOpts::new("tcp_ping_rtt_milliseconds", "Handshake round-trip time in milliseconds")
                .buckets(vec![
                    0.05, 0.1, 0.2, 0.5, 1.0,
                    2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 250.0, 500.0, 1000.0
                ]),
        )?;
        registry.register(Box::new(latency_hist.clone()))?;

        let latency_gauge = Gauge::new("tcp_ping_rtt_milliseconds_current", "Most recent handshake round-trip time in milliseconds")?;
        registry.register(Box::new(latency_gauge.clone()))?;

        Ok(Self {
            registry,
            attempts,
            latency_hist,
            latency_gauge,
        })
    }

    pub fn observe(&self, event: &ProbeEvent) {
        match event {
            ProbeEvent::End(_) => return,
            ProbeEvent::Connect(result) => {
                if let Some(rtt) = result.rtt_ms {
                    self.latency_hist.observe(rtt);
                    self.latency_gauge.set(rtt);
                }
            }
            ProbeEvent::Timeout(_) | ProbeEvent::Error { .. } => {}
        }
        self.attempts.with_label_values(&[event.name()]).inc();
    }

    /// Feed this collector from every event of `prober`.
    pub fn attach(&self, prober: &Prober) {
        let metrics = self.clone();
        prober.subscribe(move |_, event| metrics.observe(event));
    }

    pub fn render(&self) -> Vec<u8> {
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        let mut buf = Vec::new();
        if let Err(e) = encoder.encode(&mf, &mut buf) {
            tracing::error!("failed to encode metrics: {:?}", e);
        }
        buf
    }
}

pub async fn serve_metrics(metrics: ProbeMetrics, addr: SocketAddr) {
    let metrics_route = warp::path!("metrics").map(move || {
        let encoder = TextEncoder::new();
        warp::reply::with_header(metrics.render(), "Content-Type", encoder.format_type().to_string())
    });

    warp::serve(metrics_route).run(addr).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AttemptError;
    use crate::prober::{ProbeResult, ProbeStats, ProbeSummary, SocketDetail, Target};

    fn result(rtt_ms: Option<f64>) -> ProbeResult {
        ProbeResult {
            seq: 1,
            stats: ProbeStats::default(),
            target: Target { host: "127.0.0.1".into(), port: 80 },
            socket: SocketDetail::default(),
            rtt_ms,
        }
    }

    #[test]
    fn test_outcomes_are_counted() {
        let metrics = ProbeMetrics::new().unwrap();
        metrics.observe(&ProbeEvent::Connect(result(Some(4.5))));
        metrics.observe(&ProbeEvent::Timeout(result(None)));
        metrics.observe(&ProbeEvent::Error { result: result(None), error: AttemptError::aborted() });
        metrics.observe(&ProbeEvent::End(ProbeSummary {
            stats: ProbeStats::default(),
            target: Target { host: "127.0.0.1".into(), port: 80 },
        }));

        let text = String::from_utf8(metrics.render()).unwrap();
        assert!(text.contains(r#"tcp_ping_attempts_total{outcome="connect"} 1"#));
        assert!(text.contains(r#"tcp_ping_attempts_total{outcome="timeout"} 1"#));
        assert!(text.contains(r#"tcp_ping_attempts_total{outcome="error"} 1"#));
        assert!(!text.contains(r#"outcome="end""#));
        assert!(text.contains("tcp_ping_rtt_milliseconds_current 4.5"));
        assert!(text.contains("tcp_ping_rtt_milliseconds_count 1"));
    }

    #[test]
    fn test_registries_are_independent() {
        let a = ProbeMetrics::new().unwrap();
        let b = ProbeMetrics::new().unwrap();
        a.observe(&ProbeEvent::Timeout(result(None)));
        let text = String::from_utf8(b.render()).unwrap();
        assert!(!text.contains(r#"outcome="timeout""#));
    }
}
