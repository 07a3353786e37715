//! Clock Abstraction for Deterministic Simulation Testing
//!
//! Backoff sleeps, retry deadlines and the pre-finalize quiescence wait all
//! go through [`WriteClock`]. In simulation, `sleep` advances virtual time
//! instantly, so retry schedules are tested without real delays.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Timestamp in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ClockTimestamp(pub u64);

impl ClockTimestamp {
    pub const ZERO: ClockTimestamp = ClockTimestamp(0);

    pub fn from_millis(ms: u64) -> Self {
        ClockTimestamp(ms)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

impl std::ops::Add<Duration> for ClockTimestamp {
    type Output = ClockTimestamp;

    fn add(self, rhs: Duration) -> Self::Output {
        ClockTimestamp(self.0.saturating_add(rhs.as_millis() as u64))
    }
}

/// Clock trait for time operations
///
/// Implementations:
/// - `ProductionClock`: real time, tokio timers
/// - `SimulatedClock`: virtual time for DST
pub trait WriteClock: Send + Sync + Clone + 'static {
    fn now(&self) -> ClockTimestamp;

    /// Wait for `duration`. The returned future owns everything it needs.
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;

    fn elapsed(&self, since: ClockTimestamp) -> Duration {
        Duration::from_millis(self.now().0.saturating_sub(since.0))
    }
}

/// Production clock using real system time
#[derive(Clone)]
pub struct ProductionClock {
    start: Instant,
    start_millis: u64,
}

impl Default for ProductionClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ProductionClock {
    pub fn new() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let start_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        ProductionClock {
            start: Instant::now(),
            start_millis,
        }
    }
}

impl WriteClock for ProductionClock {
    fn now(&self) -> ClockTimestamp {
        let elapsed = self.start.elapsed().as_millis() as u64;
        ClockTimestamp(self.start_millis + elapsed)
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Simulated clock for deterministic testing
///
/// Time only advances through `advance()`, `set()` or `sleep()`. Every
/// requested sleep is recorded so tests can assert on backoff schedules.
#[derive(Clone)]
pub struct SimulatedClock {
    time_ms: Arc<AtomicU64>,
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl Default for SimulatedClock {
    fn default() -> Self {
        Self::new(0)
    }
}

impl SimulatedClock {
    pub fn new(start_ms: u64) -> Self {
        SimulatedClock {
            time_ms: Arc::new(AtomicU64::new(start_ms)),
            sleeps: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn advance(&self, duration: Duration) {
        self.time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set(&self, time_ms: u64) {
        self.time_ms.store(time_ms, Ordering::SeqCst);
    }

    pub fn current_ms(&self) -> u64 {
        self.time_ms.load(Ordering::SeqCst)
    }

    /// Sleeps requested so far, in order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

impl WriteClock for SimulatedClock {
    fn now(&self) -> ClockTimestamp {
        ClockTimestamp(self.time_ms.load(Ordering::SeqCst))
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        self.sleeps.lock().push(duration);
        self.advance(duration);
        Box::pin(futures::future::ready(()))
    }
}
