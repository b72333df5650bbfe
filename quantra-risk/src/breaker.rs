//! Failure gating: circuit breaker, emergency kill switch, error-rate tracker.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use quantra_core::SharedClock;
use tracing::{error, info, warn};

/// Circuit breaker state machine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum CircuitState {
    /// Normal operation.
    Closed = 0,
    /// Tripped; traffic is rejected until the timeout elapses.
    Open = 1,
    /// Probing; a limited number of requests pass through.
    HalfOpen = 2,
}

impl CircuitState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Closed,
            1 => Self::Open,
            _ => Self::HalfOpen,
        }
    }
}

/// Thresholds and windows governing breaker transitions.
#[derive(Clone, Debug)]
pub struct BreakerConfig {
    /// Consecutive failures that trip CLOSED -> OPEN.
    pub failure_threshold: u32,
    /// Successes required to recover HALF_OPEN -> CLOSED.
    pub success_threshold: u32,
    /// Time in OPEN before a probe request is allowed.
    pub timeout: Duration,
    /// How long HALF_OPEN may last before re-opening without recovery.
    pub test_period: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            timeout: Duration::from_secs(30),
            test_period: Duration::from_secs(10),
        }
    }
}

/// Prevents cascading failures by rejecting traffic after repeated errors.
///
/// Readers load state with acquire ordering; transitions publish with
/// acquire-release, so a rejected caller always observes the failure that
/// tripped the breaker.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    state: AtomicU8,
    failures: AtomicU32,
    successes: AtomicU32,
    anchor: Instant,
    last_failure_ns: AtomicU64,
    half_open_start_ns: AtomicU64,
    clock: SharedClock,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig, clock: SharedClock) -> Self {
        let anchor = clock.now();
        Self {
            name: name.into(),
            config,
            state: AtomicU8::new(CircuitState::Closed as u8),
            failures: AtomicU32::new(0),
            successes: AtomicU32::new(0),
            anchor,
            last_failure_ns: AtomicU64::new(0),
            half_open_start_ns: AtomicU64::new(0),
            clock,
        }
    }

    /// Whether a request may proceed right now.
    ///
    /// In OPEN this also performs the OPEN -> HALF_OPEN transition once the
    /// timeout has elapsed, letting the caller's request through as the probe.
    pub fn allow_request(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let now = self.offset_ns();
                let last_failure = self.last_failure_ns.load(Ordering::Acquire);
                if now.saturating_sub(last_failure) < duration_ns(self.config.timeout) {
                    return false;
                }
                if self
                    .state
                    .compare_exchange(
                        CircuitState::Open as u8,
                        CircuitState::HalfOpen as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    self.half_open_start_ns.store(now, Ordering::Release);
                    self.successes.store(0, Ordering::Relaxed);
                    warn!(breaker = %self.name, "circuit breaker entering HALF_OPEN");
                }
                true
            }
            CircuitState::HalfOpen => {
                let now = self.offset_ns();
                let started = self.half_open_start_ns.load(Ordering::Acquire);
                let expired = now.saturating_sub(started) >= duration_ns(self.config.test_period);
                if expired
                    && self.successes.load(Ordering::Acquire) < self.config.success_threshold
                {
                    self.open("test period expired without recovery");
                    return false;
                }
                true
            }
        }
    }

    /// Record a successful request.
    pub fn record_success(&self) {
        match self.state() {
            CircuitState::HalfOpen => {
                let successes = self.successes.fetch_add(1, Ordering::Relaxed) + 1;
                if successes >= self.config.success_threshold
                    && self
                        .state
                        .compare_exchange(
                            CircuitState::HalfOpen as u8,
                            CircuitState::Closed as u8,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                {
                    self.failures.store(0, Ordering::Relaxed);
                    self.successes.store(0, Ordering::Relaxed);
                    info!(breaker = %self.name, "circuit breaker CLOSED (recovered)");
                }
            }
            CircuitState::Closed => {
                // Failure count decays by one per success, floored at zero.
                let _ = self
                    .failures
                    .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |count| {
                        count.checked_sub(1)
                    });
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed request; may trip the breaker.
    pub fn record_failure(&self, reason: &str) {
        match self.state() {
            CircuitState::HalfOpen => self.open(reason),
            CircuitState::Closed => {
                let failures = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
                if failures >= self.config.failure_threshold {
                    self.open(reason);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Force the breaker OPEN and stamp the failure time.
    pub fn open(&self, reason: &str) {
        let previous = self.state.swap(CircuitState::Open as u8, Ordering::AcqRel);
        self.last_failure_ns
            .store(self.offset_ns(), Ordering::Release);
        if previous != CircuitState::Open as u8 {
            error!(breaker = %self.name, reason, "circuit breaker OPENED");
        }
    }

    /// Manual override back to CLOSED.
    pub fn close(&self) {
        self.state
            .store(CircuitState::Closed as u8, Ordering::Release);
        self.failures.store(0, Ordering::Relaxed);
        self.successes.store(0, Ordering::Relaxed);
        info!(breaker = %self.name, "circuit breaker manually CLOSED");
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn offset_ns(&self) -> u64 {
        self.clock.now().duration_since(self.anchor).as_nanos() as u64
    }
}

fn duration_ns(duration: Duration) -> u64 {
    duration.as_nanos() as u64
}

type ShutdownHandler = Box<dyn Fn() + Send + Sync>;

/// Single-shot latch that stops all trading.
///
/// The first activation runs every registered shutdown handler in
/// registration order; a panicking handler does not prevent the rest from
/// running. Later activations are no-ops until a manual [`KillSwitch::reset`].
pub struct KillSwitch {
    activated: AtomicBool,
    reason: Mutex<Option<String>>,
    activated_at: Mutex<Option<Instant>>,
    handlers: Mutex<Vec<ShutdownHandler>>,
    clock: SharedClock,
}

impl KillSwitch {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            activated: AtomicBool::new(false),
            reason: Mutex::new(None),
            activated_at: Mutex::new(None),
            handlers: Mutex::new(Vec::new()),
            clock,
        }
    }

    /// Latch the switch and fire shutdown handlers exactly once.
    pub fn activate(&self, reason: &str) {
        if self
            .activated
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        *self.reason.lock() = Some(reason.to_string());
        *self.activated_at.lock() = Some(self.clock.now());
        error!(reason, "KILL SWITCH ACTIVATED");

        let handlers = self.handlers.lock();
        for (index, handler) in handlers.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| handler())).is_err() {
                error!(index, "shutdown handler panicked");
            }
        }
        error!("all shutdown handlers executed");
    }

    /// Register a handler to run on first activation.
    pub fn register_shutdown_handler(&self, handler: impl Fn() + Send + Sync + 'static) {
        self.handlers.lock().push(Box::new(handler));
    }

    #[must_use]
    pub fn is_activated(&self) -> bool {
        self.activated.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }

    #[must_use]
    pub fn activated_at(&self) -> Option<Instant> {
        *self.activated_at.lock()
    }

    /// Manual override; clears the latch so trading can resume.
    pub fn reset(&self) {
        self.activated.store(false, Ordering::Release);
        *self.reason.lock() = None;
        *self.activated_at.lock() = None;
        warn!("kill switch manually reset");
    }
}

/// Sliding-window error counter feeding circuit-breaker decisions.
pub struct ErrorRateTracker {
    window: Duration,
    threshold: usize,
    events: Mutex<VecDeque<Instant>>,
    clock: SharedClock,
}

impl ErrorRateTracker {
    pub fn new(window: Duration, threshold: usize, clock: SharedClock) -> Self {
        Self {
            window,
            threshold,
            events: Mutex::new(VecDeque::new()),
            clock,
        }
    }

    /// Record an error now, evicting events that fell out of the window.
    pub fn record_error(&self) {
        let now = self.clock.now();
        let mut events = self.events.lock();
        while let Some(oldest) = events.front() {
            if now.duration_since(*oldest) > self.window {
                events.pop_front();
            } else {
                break;
            }
        }
        events.push_back(now);
    }

    #[must_use]
    pub fn threshold_exceeded(&self) -> bool {
        self.events.lock().len() >= self.threshold
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.events.lock().len()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quantra_core::ManualClock;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn breaker_with_clock(config: BreakerConfig) -> (CircuitBreaker, ManualClock) {
        let clock = ManualClock::new();
        let breaker = CircuitBreaker::new("gateway", config, Arc::new(clock.clone()));
        (breaker, clock)
    }

    #[test]
    fn breaker_full_recovery_cycle() {
        let config = BreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            timeout: Duration::from_secs(30),
            test_period: Duration::from_secs(10),
        };
        let (breaker, clock) = breaker_with_clock(config);

        breaker.record_failure("timeout");
        breaker.record_failure("timeout");
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure("timeout");
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_request());

        clock.advance(Duration::from_secs(30));
        assert!(breaker.allow_request(), "probe allowed after timeout");
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.allow_request());
    }

    #[test]
    fn failure_during_half_open_reopens() {
        let config = BreakerConfig {
            failure_threshold: 1,
            success_threshold: 2,
            timeout: Duration::from_secs(5),
            test_period: Duration::from_secs(10),
        };
        let (breaker, clock) = breaker_with_clock(config);
        breaker.record_failure("boom");
        clock.advance(Duration::from_secs(5));
        assert!(breaker.allow_request());
        breaker.record_failure("still broken");
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn half_open_expires_without_recovery() {
        let config = BreakerConfig {
            failure_threshold: 1,
            success_threshold: 2,
            timeout: Duration::from_secs(5),
            test_period: Duration::from_secs(10),
        };
        let (breaker, clock) = breaker_with_clock(config);
        breaker.record_failure("boom");
        clock.advance(Duration::from_secs(5));
        assert!(breaker.allow_request());
        breaker.record_success();
        clock.advance(Duration::from_secs(10));
        assert!(!breaker.allow_request());
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn success_decays_failure_count_in_closed() {
        let config = BreakerConfig {
            failure_threshold: 2,
            ..BreakerConfig::default()
        };
        let (breaker, _clock) = breaker_with_clock(config);
        breaker.record_failure("one");
        breaker.record_success();
        breaker.record_failure("two");
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure("three");
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn kill_switch_fires_handlers_once_in_order() {
        let clock: SharedClock = Arc::new(ManualClock::new());
        let switch = KillSwitch::new(clock);
        let calls = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&calls);
        switch.register_shutdown_handler(move || first.lock().push("cancel-orders"));
        switch.register_shutdown_handler(|| panic!("flaky handler"));
        let last = Arc::clone(&calls);
        switch.register_shutdown_handler(move || last.lock().push("flatten"));

        switch.activate("daily loss cap gap");
        switch.activate("second call is a no-op");

        assert!(switch.is_activated());
        assert_eq!(switch.reason().as_deref(), Some("daily loss cap gap"));
        assert_eq!(*calls.lock(), vec!["cancel-orders", "flatten"]);

        switch.reset();
        assert!(!switch.is_activated());
        assert!(switch.reason().is_none());
    }

    #[test]
    fn error_rate_tracker_evicts_outside_window() {
        let clock = ManualClock::new();
        let tracker =
            ErrorRateTracker::new(Duration::from_secs(60), 3, Arc::new(clock.clone()));
        tracker.record_error();
        tracker.record_error();
        assert!(!tracker.threshold_exceeded());

        clock.advance(Duration::from_secs(61));
        tracker.record_error();
        assert_eq!(tracker.error_count(), 1, "stale errors were evicted");

        tracker.record_error();
        tracker.record_error();
        assert!(tracker.threshold_exceeded());
        tracker.clear();
        assert_eq!(tracker.error_count(), 0);
    }

    #[test]
    fn concurrent_failures_trip_once() {
        let config = BreakerConfig {
            failure_threshold: 4,
            ..BreakerConfig::default()
        };
        let clock: SharedClock = Arc::new(ManualClock::new());
        let breaker = Arc::new(CircuitBreaker::new("shared", config, clock));
        let opened = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let breaker = Arc::clone(&breaker);
                let opened = Arc::clone(&opened);
                std::thread::spawn(move || {
                    breaker.record_failure("venue error");
                    if breaker.is_open() {
                        opened.fetch_add(1, Ordering::Relaxed);
                    }
                })
            })
            .collect();
        for handle in threads {
            handle.join().unwrap();
        }
        assert_eq!(breaker.state(), CircuitState::Open);
    }
}
