use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Circuit breaker state for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    /// Consecutive failure timestamps inside the rolling window.
    failures: Vec<Instant>,
    opened_at: Option<Instant>,
    /// Whether the half-open probe slot is taken.
    probe_inflight: bool,
}

/// 5 consecutive failures within 60 s open the breaker for 30 s; a
/// half-open probe admits one request; success closes, failure reopens.
pub struct CircuitBreaker {
    threshold: u32,
    window: Duration,
    open_for: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, window: Duration, open_for: Duration) -> Self {
        Self {
            threshold,
            window,
            open_for,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failures: Vec::new(),
                opened_at: None,
                probe_inflight: false,
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        inner.state
    }

    /// Whether a request may be sent through this breaker right now. In
    /// half-open state exactly one probe is admitted.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => false,
            BreakerState::HalfOpen => {
                if inner.probe_inflight {
                    false
                } else {
                    inner.probe_inflight = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.state = BreakerState::Closed;
        inner.failures.clear();
        inner.opened_at = None;
        inner.probe_inflight = false;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        match inner.state {
            BreakerState::HalfOpen => {
                // Failed probe reopens for a fresh interval.
                inner.state = BreakerState::Open;
                inner.opened_at = Some(now);
                inner.probe_inflight = false;
            }
            BreakerState::Open => {}
            BreakerState::Closed => {
                let window = self.window;
                inner.failures.retain(|t| now.duration_since(*t) <= window);
                inner.failures.push(now);
                if inner.failures.len() as u32 >= self.threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(now);
                    inner.failures.clear();
                }
            }
        }
    }

    fn refresh(&self, inner: &mut BreakerInner) {
        if inner.state == BreakerState::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= self.open_for {
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_inflight = false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(5, Duration::from_secs(60), Duration::from_millis(50))
    }

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let breaker = breaker();
        for _ in 0..4 {
            breaker.record_failure();
            assert_eq!(breaker.state(), BreakerState::Closed);
        }
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.try_acquire());
    }

    #[test]
    fn success_resets_the_failure_run() {
        let breaker = breaker();
        for _ in 0..4 {
            breaker.record_failure();
        }
        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_admits_exactly_one_probe() {
        let breaker = breaker();
        for _ in 0..5 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        assert!(breaker.try_acquire());
        assert!(!breaker.try_acquire());
    }

    #[test]
    fn probe_success_closes_and_failure_reopens() {
        let breaker = breaker();
        for _ in 0..5 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(60));
        assert!(breaker.try_acquire());
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);

        std::thread::sleep(Duration::from_millis(60));
        assert!(breaker.try_acquire());
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.try_acquire());
    }
}
