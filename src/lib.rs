pub mod config;
pub mod error;
pub mod metrics;
pub mod prober;
pub mod report;
pub mod scheduler;
pub mod timestamp;
pub mod util;

pub use config::{AppConfig, ProbeConfig};
pub use error::{AttemptError, ProbeError};
pub use prober::{ProbeEvent, ProbeResult, ProbeStats, ProbeSummary, Prober, SocketDetail, Target};
