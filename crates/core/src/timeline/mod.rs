use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use tracing::{error, info, trace, warn};

use crate::{
    analysis::AnalysisSummary, mapping::ParameterSnapshot, Connector, Result, SpectrumSource,
};

/// Monotonic clock measuring time since the driver was created.
#[derive(Debug, Clone, Copy)]
pub struct PlaybackClock {
    started: Instant,
}

impl PlaybackClock {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::start()
    }
}

/// What happened to one tick request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Completed,
    /// Another tick was still running, so this one was dropped.
    Skipped,
    /// The tick failed and the connector was reset to its defaults.
    Recovered,
}

/// Tick counters since the driver was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverStats {
    pub completed: u64,
    pub skipped: u64,
    pub recovered: u64,
}

struct Shared {
    connector: Mutex<Connector>,
    busy: AtomicBool,
    running: AtomicBool,
    completed: AtomicU64,
    skipped: AtomicU64,
    recovered: AtomicU64,
    clock: PlaybackClock,
}

/// Clears the busy flag when the tick ends, however it ends.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Shared {
    /// Locks the connector, reclaiming it if an earlier holder panicked.
    ///
    /// A reclaimed connector is reset to its defaults before use, and the
    /// second value reports whether that happened.
    fn lock(&self) -> (MutexGuard<'_, Connector>, bool) {
        match self.connector.lock() {
            Ok(connector) => (connector, false),
            Err(poisoned) => {
                self.connector.clear_poison();
                let mut connector = poisoned.into_inner();
                warn!("connector lock poisoned, resetting connector state");
                connector.reset();
                self.recovered.fetch_add(1, Ordering::Relaxed);
                (connector, true)
            }
        }
    }

    fn connector(&self) -> MutexGuard<'_, Connector> {
        self.lock().0
    }

    fn trigger_at(&self, now: Duration) -> TickOutcome {
        let Some(_busy) = BusyGuard::acquire(&self.busy) else {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            trace!("tick still in flight, trigger dropped");
            return TickOutcome::Skipped;
        };

        let (mut connector, reclaimed) = self.lock();
        if reclaimed {
            return TickOutcome::Recovered;
        }

        let result = panic::catch_unwind(AssertUnwindSafe(|| connector.tick(now).map(|_| ())));
        let failure = match result {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err.to_string()),
            Err(payload) => Some(panic_message(payload.as_ref())),
        };

        match failure {
            None => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                TickOutcome::Completed
            }
            Some(reason) => {
                warn!(%reason, "tick failed, resetting connector state");
                connector.reset();
                self.recovered.fetch_add(1, Ordering::Relaxed);
                TickOutcome::Recovered
            }
        }
    }

    fn stats(&self) -> DriverStats {
        DriverStats {
            completed: self.completed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            recovered: self.recovered.load(Ordering::Relaxed),
        }
    }
}

/// Cloneable access to a driven connector from other threads.
///
/// A caller that panics while holding the connector does not wedge the
/// driver: the next access resets the connector and carries on.
#[derive(Clone)]
pub struct DriverHandle {
    shared: Arc<Shared>,
}

impl DriverHandle {
    /// Latest published snapshot.
    pub fn parameters(&self) -> ParameterSnapshot {
        self.shared.connector().parameters()
    }

    pub fn summary(&self) -> AnalysisSummary {
        self.shared.connector().summary()
    }

    pub fn stats(&self) -> DriverStats {
        self.shared.stats()
    }

    /// Requests a tick stamped with the driver clock.
    pub fn trigger(&self) -> TickOutcome {
        self.shared.trigger_at(self.shared.clock.elapsed())
    }

    /// Requests a tick with an explicit timestamp.
    pub fn trigger_at(&self, now: Duration) -> TickOutcome {
        self.shared.trigger_at(now)
    }

    pub fn set_mood(&self, key: &str) -> bool {
        self.shared.connector().set_mood(key)
    }

    pub fn set_spectrum_source<S>(&self, source: S) -> Result<()>
    where
        S: SpectrumSource + 'static,
    {
        self.shared.connector().set_spectrum_source(source)
    }

    /// Runs `f` with exclusive access to the connector, between ticks.
    pub fn with_connector<R>(&self, f: impl FnOnce(&mut Connector) -> R) -> R {
        f(&mut self.shared.connector())
    }
}

impl fmt::Debug for DriverHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverHandle")
            .field("stats", &self.shared.stats())
            .finish()
    }
}

/// Runs a [`Connector`] at a fixed cadence on a background thread.
///
/// At most one tick is in flight at a time: triggers arriving while a tick
/// runs are dropped, not queued, and a runner that falls behind skips the
/// deadlines it missed. A failing or panicking tick resets the connector and
/// the loop carries on.
pub struct TickDriver {
    shared: Arc<Shared>,
    interval: Duration,
    worker: Option<JoinHandle<()>>,
}

impl TickDriver {
    /// Wraps `connector`, ticking at its configured rate once started.
    pub fn new(connector: Connector) -> Self {
        let interval = connector.config().tick_interval();
        Self::with_interval(connector, interval)
    }

    pub fn with_interval(connector: Connector, interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                connector: Mutex::new(connector),
                busy: AtomicBool::new(false),
                running: AtomicBool::new(false),
                completed: AtomicU64::new(0),
                skipped: AtomicU64::new(0),
                recovered: AtomicU64::new(0),
                clock: PlaybackClock::start(),
            }),
            interval: interval.max(Duration::from_millis(1)),
            worker: None,
        }
    }

    pub fn handle(&self) -> DriverHandle {
        DriverHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Spawns the fixed-rate tick thread. Calling it twice is a no-op.
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }

        self.shared.running.store(true, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let interval = self.interval;
        let worker = thread::Builder::new()
            .name("av-connector-tick".into())
            .spawn(move || run_fixed_rate(&shared, interval));

        match worker {
            Ok(worker) => {
                info!(interval_ms = interval.as_secs_f64() * 1000.0, "tick driver started");
                self.worker = Some(worker);
                Ok(())
            }
            Err(err) => {
                self.shared.running.store(false, Ordering::Release);
                Err(err.into())
            }
        }
    }

    /// Stops the tick thread and waits for it to exit.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("tick thread panicked");
            }
            info!(stats = ?self.shared.stats(), "tick driver stopped");
        }
    }

    /// Stops ticking and releases the connector's source and state.
    pub fn dispose(mut self) {
        self.stop();
        self.shared.connector().dispose();
    }
}

impl Drop for TickDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for TickDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TickDriver")
            .field("interval", &self.interval)
            .field("running", &self.worker.is_some())
            .field("stats", &self.shared.stats())
            .finish()
    }
}

fn run_fixed_rate(shared: &Shared, interval: Duration) {
    let mut deadline = Instant::now() + interval;

    while shared.running.load(Ordering::Acquire) {
        let now = Instant::now();
        if now < deadline {
            thread::sleep(deadline - now);
            continue;
        }

        shared.trigger_at(shared.clock.elapsed());

        deadline += interval;
        let now = Instant::now();
        if deadline <= now {
            let behind = now - deadline;
            let missed = (behind.as_nanos() / interval.as_nanos()) as u64 + 1;
            shared.skipped.fetch_add(missed, Ordering::Relaxed);
            trace!(missed, "tick overran, skipping missed deadlines");
            deadline += interval * missed as u32;
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "tick panicked".to_string()
    }
}
