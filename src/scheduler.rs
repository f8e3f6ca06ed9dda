use std::ops::ControlFlow;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};

/// Floor for a zero interval so flood mode stays bounded.
pub const FLOOD_TICK: Duration = Duration::from_millis(1);

pub struct Scheduler {
    interval: Duration,
}

impl Scheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(FLOOD_TICK),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Calls `tick` now and then once per interval, measured start to start,
    /// until it breaks. A late tick resets the cadence instead of bursting.
    pub async fn run<J>(&self, mut tick: J)
    where
        J: FnMut() -> ControlFlow<()>,
    {
        let mut next = Instant::now();
        loop {
            if tick().is_break() {
                return;
            }
            next += self.interval;
            let now = Instant::now();
            if next < now {
                next = now;
            }
            sleep_until(next).await;
        }
    }
}
