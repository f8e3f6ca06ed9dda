use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use super::tcp_connect::{self, Handshake};
use super::{ProbeEvent, ProbeResult, ProbeStats, ProbeSummary, SocketDetail, Target};
use crate::config::ProbeConfig;
use crate::error::{AttemptError, ProbeError};
use crate::scheduler::Scheduler;
use crate::timestamp::{monotonic_ns, rtt_ms};

type Listener = Arc<dyn Fn(&Prober, &ProbeEvent) + Send + Sync>;

/// Repeating TCP handshake probe against one target.
///
/// Cloning is cheap and every clone drives the same run. Separate
/// `Prober::new` calls never share counters.
///
/// ```no_run
/// # async fn demo() -> Result<(), tcp_ping::ProbeError> {
/// use tcp_ping::{ProbeConfig, ProbeEvent, Prober};
///
/// let prober = Prober::new("127.0.0.1", 80, ProbeConfig::default().with_count(3))?;
/// let mut events = prober.events();
/// prober.start();
/// while let Some(event) = events.recv().await {
///     if let ProbeEvent::End(summary) = event {
///         println!("{:?}", summary.stats);
///         break;
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Prober {
    inner: Arc<Inner>,
}

struct Inner {
    target: Target,
    config: ProbeConfig,
    state: Mutex<RunState>,
    listeners: RwLock<Vec<Listener>>,
    /// Senders handed out by `events`; dropped once their receiver is gone.
    channels: Mutex<Vec<mpsc::UnboundedSender<ProbeEvent>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Ended,
}

struct RunState {
    phase: Phase,
    /// Generation of the current run; stale tickers and attempts compare against it.
    run: u64,
    aborted: bool,
    stats: ProbeStats,
    ticker: Option<JoinHandle<()>>,
    /// Unsettled attempts by sequence number. Removal is settlement.
    in_flight: BTreeMap<u64, AbortHandle>,
    pending: VecDeque<ProbeEvent>,
    dispatching: bool,
}

enum Outcome {
    Connect(f64),
    Timeout,
    Error(AttemptError),
}

impl Prober {
    pub fn new(host: impl Into<String>, port: u16, config: ProbeConfig) -> Result<Self, ProbeError> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(ProbeError::InvalidArgument("host is required".into()));
        }
        if port == 0 {
            return Err(ProbeError::InvalidArgument("port must be between 1 and 65535".into()));
        }
        config.validate()?;

        Ok(Self {
            inner: Arc::new(Inner {
                target: Target { host, port },
                config,
                state: Mutex::new(RunState {
                    phase: Phase::Idle,
                    run: 0,
                    aborted: false,
                    stats: ProbeStats::default(),
                    ticker: None,
                    in_flight: BTreeMap::new(),
                    pending: VecDeque::new(),
                    dispatching: false,
                }),
                listeners: RwLock::new(Vec::new()),
                channels: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn target(&self) -> &Target {
        &self.inner.target
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.inner.config
    }

    /// Current counters. `sent` may run ahead of the settled ones.
    pub fn stats(&self) -> ProbeStats {
        self.lock().stats
    }

    pub fn is_running(&self) -> bool {
        self.lock().phase == Phase::Running
    }

    /// Register an observer. Listeners run synchronously in settlement order
    /// and may call `stop` or `start` on the handle they are given.
    pub fn subscribe<F>(&self, listener: F) -> &Self
    where
        F: Fn(&Prober, &ProbeEvent) + Send + Sync + 'static,
    {
        self.inner
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
        self
    }

    /// Channel fed with every event from now on. Dropping the receiver
    /// unregisters it at the next delivery.
    pub fn events(&self) -> mpsc::UnboundedReceiver<ProbeEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels().push(tx);
        rx
    }

    /// Begin a fresh run with counters reset. Must be called within a tokio runtime.
    pub fn start(&self) -> &Self {
        self.launch(true)
    }

    /// Begin a run that keeps counting from the previous one.
    pub fn resume(&self) -> &Self {
        self.launch(false)
    }

    /// End the run early. In-flight attempts are torn down and reported as
    /// aborted errors, then `end` fires. Safe to call any number of times.
    pub fn stop(&self) {
        let run = {
            let mut st = self.lock();
            if st.phase != Phase::Running || st.aborted {
                return;
            }
            st.aborted = true;
            if let Some(ticker) = st.ticker.take() {
                ticker.abort();
            }

            let in_flight = std::mem::take(&mut st.in_flight);
            for (seq, task) in in_flight {
                task.abort();
                let event = self.record(&mut st, seq, Outcome::Error(AttemptError::aborted()), SocketDetail::default());
                st.pending.push_back(event);
            }
            st.run
        };

        debug!(host = %self.inner.target.host, port = self.inner.target.port, "stop requested");
        self.check_end(run);
        self.flush();
    }

    fn launch(&self, first_run: bool) -> &Self {
        let run = {
            let mut st = self.lock();
            if st.phase == Phase::Running {
                warn!(host = %self.inner.target.host, port = self.inner.target.port, "probe already running, start ignored");
                return self;
            }
            if first_run {
                st.stats = ProbeStats::default();
            }
            st.run += 1;
            st.phase = Phase::Running;
            st.aborted = false;
            st.run
        };

        info!(
            host = %self.inner.target.host,
            port = self.inner.target.port,
            interval_ms = self.inner.config.interval_ms,
            timeout_ms = self.inner.config.timeout_ms,
            count = ?self.inner.config.count,
            "probe run started"
        );

        let scheduler = Scheduler::new(self.inner.config.interval());
        let prober = self.clone();
        let ticker = tokio::spawn(async move {
            scheduler.run(|| prober.tick(run)).await;
        });

        let mut st = self.lock();
        if st.run == run && st.phase == Phase::Running {
            st.ticker = Some(ticker);
        } else {
            ticker.abort();
        }
        self
    }

    /// Create the next attempt unless the run is over or the count is spent.
    fn tick(&self, run: u64) -> ControlFlow<()> {
        let count = self.inner.config.count;
        let mut st = self.lock();
        if st.run != run || st.phase != Phase::Running || st.aborted {
            return ControlFlow::Break(());
        }
        if count.is_some_and(|n| st.stats.sent >= n) {
            drop(st);
            // resuming an exhausted prober ends right away
            self.check_end(run);
            self.flush();
            return ControlFlow::Break(());
        }

        st.stats.sent += 1;
        let seq = st.stats.sent;
        let started_ns = monotonic_ns();
        let prober = self.clone();
        let task = tokio::spawn(async move {
            prober.attempt(run, seq, started_ns).await;
        });
        st.in_flight.insert(seq, task.abort_handle());
        debug!(host = %self.inner.target.host, seq, "attempt started");

        if count.is_some_and(|n| st.stats.sent >= n) {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }

    async fn attempt(self, run: u64, seq: u64, started_ns: u64) {
        let Target { host, port } = &self.inner.target;
        let handshake = tcp_connect::probe_tcp(host, *port, self.inner.config.timeout()).await;

        match handshake {
            Handshake::Connected { stream, completed_ns, socket } => {
                let rtt = rtt_ms(started_ns, completed_ns);
                self.settle(run, seq, Outcome::Connect(rtt), socket);
                tcp_connect::close(stream).await;
            }
            Handshake::TimedOut { socket } => {
                self.settle(run, seq, Outcome::Timeout, socket);
            }
            Handshake::Failed { error, socket } => {
                self.settle(run, seq, Outcome::Error(error), socket);
            }
        }
    }

    fn settle(&self, run: u64, seq: u64, outcome: Outcome, socket: SocketDetail) {
        {
            let mut st = self.lock();
            if st.run != run || st.in_flight.remove(&seq).is_none() {
                debug!(seq, "attempt already settled, late outcome ignored");
                return;
            }
            let event = self.record(&mut st, seq, outcome, socket);
            debug!(
                host = %self.inner.target.host,
                seq,
                outcome = event.name(),
                rtt_ms = ?event.result().and_then(|r| r.rtt_ms),
                "attempt settled"
            );
            st.pending.push_back(event);
        }
        self.check_end(run);
        self.flush();
    }

    /// Count one settlement and build its event from the post-increment stats.
    fn record(&self, st: &mut RunState, seq: u64, outcome: Outcome, socket: SocketDetail) -> ProbeEvent {
        match outcome {
            Outcome::Connect(_) => st.stats.success += 1,
            Outcome::Timeout | Outcome::Error(_) => st.stats.failed += 1,
        }

        let mut result = ProbeResult {
            seq,
            stats: st.stats,
            target: self.inner.target.clone(),
            socket,
            rtt_ms: None,
        };

        match outcome {
            Outcome::Connect(rtt) => {
                result.rtt_ms = Some(rtt);
                ProbeEvent::Connect(result)
            }
            Outcome::Timeout => ProbeEvent::Timeout(result),
            Outcome::Error(error) => ProbeEvent::Error { result, error },
        }
    }

    fn check_end(&self, run: u64) {
        let mut st = self.lock();
        if st.run != run || st.phase != Phase::Running {
            return;
        }
        let exhausted = self
            .inner
            .config
            .count
            .is_some_and(|n| st.stats.settled() >= n);
        if !exhausted && !st.aborted {
            return;
        }

        st.phase = Phase::Ended;
        if let Some(ticker) = st.ticker.take() {
            ticker.abort();
        }
        let summary = ProbeSummary {
            stats: st.stats,
            target: self.inner.target.clone(),
        };
        info!(
            host = %summary.target.host,
            port = summary.target.port,
            sent = summary.stats.sent,
            success = summary.stats.success,
            failed = summary.stats.failed,
            "probe run ended"
        );
        st.pending.push_back(ProbeEvent::End(summary));
    }

    /// Deliver queued events in order. Whoever finds the queue idle drains it;
    /// events raised meanwhile, including from listeners, join the same queue.
    fn flush(&self) {
        {
            let mut st = self.lock();
            if st.dispatching {
                return;
            }
            st.dispatching = true;
        }
        let _guard = Dispatching(self);

        loop {
            let next = {
                let mut st = self.lock();
                let next = st.pending.pop_front();
                if next.is_none() {
                    st.dispatching = false;
                }
                next
            };
            let Some(event) = next else {
                return;
            };
            let listeners = self
                .inner
                .listeners
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            for listener in listeners {
                listener(self, &event);
            }
            self.channels().retain(|tx| {
                let open = tx.send(event.clone()).is_ok();
                if !open {
                    debug!("event receiver dropped, unregistering");
                }
                open
            });
        }
    }

    fn channels(&self) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<ProbeEvent>>> {
        self.inner.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases the dispatch role if a listener panics mid-delivery.
struct Dispatching<'a>(&'a Prober);

impl Drop for Dispatching<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.lock().dispatching = false;
        }
    }
}

impl fmt::Debug for Prober {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prober")
            .field("target", &self.inner.target)
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
