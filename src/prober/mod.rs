use serde::Serialize;
use std::net::SocketAddr;

use crate::error::AttemptError;

pub mod engine;
pub mod tcp_connect;

pub use engine::Prober;

/// Running counters of one prober. `sent` moves at attempt start, the
/// others at settlement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProbeStats {
    pub sent: u64,
    pub success: u64,
    pub failed: u64,
}

impl ProbeStats {
    pub fn settled(&self) -> u64 {
        self.success + self.failed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Target {
    pub host: String,
    pub port: u16,
}

/// Socket endpoints of one attempt, when the OS assigned them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SocketDetail {
    pub local: Option<SocketAddr>,
    pub remote: Option<SocketAddr>,
}

impl SocketDetail {
    pub fn local_port(&self) -> Option<u16> {
        self.local.map(|addr| addr.port())
    }
}

/// Outcome of one settled attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeResult {
    pub seq: u64,
    pub stats: ProbeStats,
    pub target: Target,
    pub socket: SocketDetail,
    /// Handshake time in milliseconds, only for `connect`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rtt_ms: Option<f64>,
}

/// Final statistics of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeSummary {
    pub stats: ProbeStats,
    pub target: Target,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ProbeEvent {
    Connect(ProbeResult),
    Timeout(ProbeResult),
    Error {
        #[serde(flatten)]
        result: ProbeResult,
        error: AttemptError,
    },
    End(ProbeSummary),
}

impl ProbeEvent {
    /// Name listeners and tooling know the event by.
    pub fn name(&self) -> &'static str {
        match self {
            ProbeEvent::Connect(_) => "connect",
            ProbeEvent::Timeout(_) => "timeout",
            ProbeEvent::Error { .. } => "error",
            ProbeEvent::End(_) => "end",
        }
    }

    pub fn result(&self) -> Option<&ProbeResult> {
        match self {
            ProbeEvent::Connect(result) | ProbeEvent::Timeout(result) => Some(result),
            ProbeEvent::Error { result, .. } => Some(result),
            ProbeEvent::End(_) => None,
        }
    }

    /// Counters carried by the event.
    pub fn stats(&self) -> ProbeStats {
        match self {
            ProbeEvent::End(summary) => summary.stats,
            other => other.result().map(|r| r.stats).unwrap_or_default(),
        }
    }

    pub fn is_end(&self) -> bool {
        matches!(self, ProbeEvent::End(_))
    }
}
