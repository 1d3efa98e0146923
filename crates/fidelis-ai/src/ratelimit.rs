use governor::clock::{Clock, DefaultClock};
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::time::{Duration, Instant};

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Per-provider admission buckets: one for requests per minute, an
/// optional second for tokens per minute.
pub struct ProviderLimiter {
    requests: Limiter,
    tokens: Option<Limiter>,
}

/// Outcome of a bounded wait against the buckets.
#[derive(Debug, PartialEq, Eq)]
pub enum LimitWait {
    Admitted,
    /// The deadline would expire before a permit became available.
    DeadlineFirst,
}

impl ProviderLimiter {
    pub fn new(rpm: u32, tpm: u32) -> Self {
        let rpm = NonZeroU32::new(rpm.max(1)).expect("max(1) is non-zero");
        let requests = RateLimiter::direct(Quota::per_minute(rpm));
        let tokens = NonZeroU32::new(tpm)
            .map(|tpm| RateLimiter::direct(Quota::per_minute(tpm).allow_burst(tpm)));
        Self { requests, tokens }
    }

    /// Wait for one request permit plus `token_estimate` token permits,
    /// but never past `deadline`.
    pub async fn acquire(&self, token_estimate: u32, deadline: Instant) -> LimitWait {
        if Self::wait_bounded(&self.requests, 1, deadline).await == LimitWait::DeadlineFirst {
            return LimitWait::DeadlineFirst;
        }
        if let Some(tokens) = &self.tokens {
            if token_estimate > 0
                && Self::wait_bounded(tokens, token_estimate, deadline).await
                    == LimitWait::DeadlineFirst
            {
                return LimitWait::DeadlineFirst;
            }
        }
        LimitWait::Admitted
    }

    async fn wait_bounded(limiter: &Limiter, n: u32, deadline: Instant) -> LimitWait {
        let n = match NonZeroU32::new(n) {
            Some(n) => n,
            None => return LimitWait::Admitted,
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return LimitWait::DeadlineFirst;
        }
        match limiter.check_n(n) {
            Ok(Ok(())) => LimitWait::Admitted,
            Ok(Err(not_until)) => {
                let wait = not_until.wait_time_from(DefaultClock::default().now());
                if wait > remaining {
                    return LimitWait::DeadlineFirst;
                }
                match tokio::time::timeout(remaining, limiter.until_n_ready(n)).await {
                    Ok(Ok(())) => LimitWait::Admitted,
                    _ => LimitWait::DeadlineFirst,
                }
            }
            // Requested burst exceeds the bucket capacity outright; admit
            // and let the provider's own limiter be the judge.
            Err(_) => LimitWait::Admitted,
        }
    }
}

/// Estimate of tokens a prompt will consume, for the tpm bucket. Rough
/// four-bytes-per-token heuristic plus the completion ceiling.
pub fn estimate_tokens(prompt_bytes: usize, max_tokens: u32) -> u32 {
    (prompt_bytes / 4) as u32 + max_tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_bucket_admits_immediately() {
        let limiter = ProviderLimiter::new(60, 0);
        let deadline = Instant::now() + Duration::from_secs(1);
        assert_eq!(limiter.acquire(0, deadline).await, LimitWait::Admitted);
    }

    #[tokio::test]
    async fn exhausted_bucket_fails_before_deadline() {
        let limiter = ProviderLimiter::new(1, 0);
        let deadline = Instant::now() + Duration::from_millis(50);
        assert_eq!(limiter.acquire(0, deadline).await, LimitWait::Admitted);
        // Second permit would take ~1 s to refill, far past the deadline.
        assert_eq!(limiter.acquire(0, deadline).await, LimitWait::DeadlineFirst);
    }

    #[tokio::test]
    async fn token_bucket_participates() {
        let limiter = ProviderLimiter::new(60, 100);
        let deadline = Instant::now() + Duration::from_millis(50);
        assert_eq!(limiter.acquire(100, deadline).await, LimitWait::Admitted);
        assert_eq!(
            limiter.acquire(100, deadline).await,
            LimitWait::DeadlineFirst
        );
    }

    #[test]
    fn token_estimate_scales_with_prompt() {
        assert_eq!(estimate_tokens(4000, 1024), 2024);
    }
}
