use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use tokio::sync::watch;

use fidelis_core::{FidelisError, Result};

type FlightOutcome<V> = std::result::Result<V, String>;

/// At most one in-flight computation per key. The first caller becomes the
/// leader and runs the computation; concurrent callers with the same key
/// wait for the leader and share its outcome. Leader errors are shared with
/// followers by message (the leader keeps the original error).
pub struct SingleFlight<V: Clone + Send + Sync + 'static> {
    inflight: DashMap<String, watch::Receiver<Option<FlightOutcome<V>>>>,
}

impl<V: Clone + Send + Sync + 'static> Default for SingleFlight<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + Send + Sync + 'static> SingleFlight<V> {
    pub fn new() -> Self {
        Self {
            inflight: DashMap::new(),
        }
    }

    pub fn inflight_count(&self) -> usize {
        self.inflight.len()
    }

    pub async fn run<F, Fut>(&self, key: &str, compute: F) -> Result<V>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<V>> + Send,
    {
        let mut compute = Some(compute);
        loop {
            let follower_rx = match self.inflight.entry(key.to_string()) {
                Entry::Occupied(entry) => entry.get().clone(),
                Entry::Vacant(entry) => {
                    let (tx, rx) = watch::channel(None);
                    entry.insert(rx);
                    let compute = compute
                        .take()
                        .ok_or_else(|| FidelisError::Internal("single-flight retried leader".into()))?;
                    let result = compute().await;
                    let outcome: FlightOutcome<V> = match &result {
                        Ok(value) => Ok(value.clone()),
                        Err(err) => Err(err.to_string()),
                    };
                    // Publish before deregistering so no follower observes
                    // a gap between the two.
                    let _ = tx.send(Some(outcome));
                    self.inflight.remove(key);
                    return result;
                }
            };

            match Self::wait(follower_rx).await {
                Some(Ok(value)) => return Ok(value),
                Some(Err(message)) => return Err(FidelisError::Internal(message)),
                // Leader dropped without publishing (cancelled); contend
                // for leadership again.
                None => {
                    if compute.is_none() {
                        return Err(FidelisError::Internal(
                            "single-flight leader vanished".into(),
                        ));
                    }
                    continue;
                }
            }
        }
    }

    async fn wait(mut rx: watch::Receiver<Option<FlightOutcome<V>>>) -> Option<FlightOutcome<V>> {
        loop {
            if let Some(outcome) = rx.borrow().clone() {
                return Some(outcome);
            }
            if rx.changed().await.is_err() {
                return rx.borrow().clone();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn sequential_calls_each_run() {
        let flight: SingleFlight<u32> = SingleFlight::new();
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let got = flight
                .run("k", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                })
                .await
                .unwrap();
            assert_eq!(got, 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(flight.inflight_count(), 0);
    }

    #[tokio::test]
    async fn concurrent_calls_share_one_computation() {
        let flight: Arc<SingleFlight<String>> = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let flight = Arc::clone(&flight);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                flight
                    .run("shared", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(25)).await;
                        Ok("value".to_string())
                    })
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), "value");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_keys_do_not_serialize() {
        let flight: Arc<SingleFlight<u32>> = Arc::new(SingleFlight::new());
        let a = {
            let flight = Arc::clone(&flight);
            tokio::spawn(async move { flight.run("a", || async { Ok(1) }).await.unwrap() })
        };
        let b = {
            let flight = Arc::clone(&flight);
            tokio::spawn(async move { flight.run("b", || async { Ok(2) }).await.unwrap() })
        };
        assert_eq!(a.await.unwrap() + b.await.unwrap(), 3);
    }

    #[tokio::test]
    async fn leader_error_reaches_followers() {
        let flight: Arc<SingleFlight<u32>> = Arc::new(SingleFlight::new());
        let leader = {
            let flight = Arc::clone(&flight);
            tokio::spawn(async move {
                flight
                    .run("err", || async {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Err(FidelisError::Internal("boom".into()))
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        let follower = flight.run("err", || async { Ok(9) }).await;
        assert!(leader.await.unwrap().is_err());
        assert!(follower.is_err());
    }
}
