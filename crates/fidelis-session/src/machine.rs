use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use fidelis_core::{
    FidelisError, LogLevel, ProgressEvent, Result, Session, SessionLogEntry, SessionStatus,
    UnifiedResult,
};

use crate::broker::ProgressBroker;
use crate::store::SessionStore;

const CAS_RETRIES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    /// The session was already in (or past) the requested state; applying
    /// the same transition twice is a no-op.
    NoOp,
}

/// Coordinates the session state machine: per-session serialization,
/// optimistic (version-counter) updates, write-through persistence, and
/// atomic log + progress emission on every status change.
pub struct SessionManager {
    store: Arc<SessionStore>,
    broker: Arc<ProgressBroker>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SessionManager {
    pub fn new(store: Arc<SessionStore>, broker: Arc<ProgressBroker>) -> Self {
        Self {
            store,
            broker,
            locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> Arc<SessionStore> {
        Arc::clone(&self.store)
    }

    pub fn broker(&self) -> Arc<ProgressBroker> {
        Arc::clone(&self.broker)
    }

    fn lock_for(&self, request_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(request_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn create(&self, session: &Session) -> Result<()> {
        self.store.insert_session(session).await?;
        self.log(
            &session.request_id,
            SessionLogEntry::new(LogLevel::Info, "validation session created"),
        )
        .await?;
        Ok(())
    }

    /// Apply a status transition. Updates are serialized per session; the
    /// store-side version counter resolves racing writers, losers re-read
    /// and retry.
    pub async fn transition(
        &self,
        request_id: &str,
        to: SessionStatus,
    ) -> Result<TransitionOutcome> {
        let lock = self.lock_for(request_id);
        let _guard = lock.lock().await;

        for _ in 0..CAS_RETRIES {
            let session = self
                .store
                .load(request_id)
                .await?
                .ok_or_else(|| FidelisError::NotFound(format!("session {}", request_id)))?;

            if session.status == to {
                return Ok(TransitionOutcome::NoOp);
            }
            if session.status.is_terminal() {
                // Terminal statuses are monotonic; a late transition
                // attempt is ignored rather than reverted.
                return Ok(TransitionOutcome::NoOp);
            }
            if !session.status.can_transition_to(to) {
                return Err(FidelisError::Conflict(format!(
                    "illegal transition {} -> {} for {}",
                    session.status, to, request_id
                )));
            }

            if self
                .store
                .try_transition(request_id, session.version, to)
                .await?
            {
                let from = session.status;
                info!(request_id, %from, %to, "session transition");
                // Log entry and progress event are emitted together with
                // the persisted write, in sequence order.
                let seq = self.broker.next_seq(request_id);
                let entry = SessionLogEntry::new(
                    LogLevel::Info,
                    format!("status changed: {} -> {}", from, to),
                );
                self.store.append_log(request_id, &entry).await?;
                self.broker.publish(
                    request_id,
                    ProgressEvent::StatusChanged {
                        seq,
                        request_id: request_id.to_string(),
                        from,
                        to,
                        ts: Utc::now(),
                    },
                );
                if to.is_terminal() {
                    self.broker.mark_terminal(request_id);
                }
                return Ok(TransitionOutcome::Applied);
            }
            warn!(request_id, "version conflict on transition, retrying");
        }
        Err(FidelisError::Conflict(format!(
            "could not apply transition for {} after {} retries",
            request_id, CAS_RETRIES
        )))
    }

    /// Append a log entry and publish it to subscribers, in order.
    pub async fn log(&self, request_id: &str, entry: SessionLogEntry) -> Result<()> {
        let seq = self.broker.next_seq(request_id);
        self.store.append_log(request_id, &entry).await?;
        self.broker.publish(
            request_id,
            ProgressEvent::Log {
                seq,
                request_id: request_id.to_string(),
                entry,
            },
        );
        Ok(())
    }

    /// Persist the unified result, then commit the terminal transition.
    /// The result write lands before the status flip so a reader that
    /// observes `completed` always finds the result.
    pub async fn complete(&self, request_id: &str, result: &UnifiedResult) -> Result<()> {
        self.store.save_result(request_id, result).await?;
        self.transition(request_id, SessionStatus::Completed)
            .await?;
        Ok(())
    }

    pub async fn fail(&self, request_id: &str, reason: &str) -> Result<()> {
        self.log(
            request_id,
            SessionLogEntry::new(LogLevel::Error, format!("session failed: {}", reason)),
        )
        .await?;
        self.transition(request_id, SessionStatus::Failed).await?;
        Ok(())
    }

    /// Startup recovery per the crash contract: processing sessions are
    /// failed with reason "interrupted", queued ones are handed back for
    /// re-admission.
    pub async fn recover(&self) -> Result<Vec<Session>> {
        let (interrupted, queued) = self.store.recover().await?;
        for request_id in interrupted {
            info!(request_id, "marked interrupted session failed at startup");
        }
        Ok(queued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fidelis_core::{
        BehavioralSpec, BrokerConfig, InputBundle, TechnologyContext, ValidationScope,
    };

    async fn manager() -> SessionManager {
        let store = Arc::new(SessionStore::in_memory().await.unwrap());
        let broker = Arc::new(ProgressBroker::new(BrokerConfig::default()));
        SessionManager::new(store, broker)
    }

    fn session() -> Session {
        Session::new(
            ValidationScope::Api,
            TechnologyContext::new("python-flask"),
            TechnologyContext::new("java-spring"),
            InputBundle::default(),
            InputBundle::default(),
            BehavioralSpec::default(),
            "tenant-a",
        )
    }

    #[tokio::test]
    async fn happy_path_lifecycle() {
        let manager = manager().await;
        let session = session();
        manager.create(&session).await.unwrap();

        for status in [
            SessionStatus::Queued,
            SessionStatus::Processing,
            SessionStatus::Completed,
        ] {
            assert_eq!(
                manager.transition(&session.request_id, status).await.unwrap(),
                TransitionOutcome::Applied
            );
        }
        let loaded = manager
            .store()
            .load(&session.request_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.status, SessionStatus::Completed);
        assert!(loaded.version >= 3);
    }

    #[tokio::test]
    async fn repeated_transition_is_noop() {
        let manager = manager().await;
        let session = session();
        manager.create(&session).await.unwrap();
        manager
            .transition(&session.request_id, SessionStatus::Queued)
            .await
            .unwrap();
        assert_eq!(
            manager
                .transition(&session.request_id, SessionStatus::Queued)
                .await
                .unwrap(),
            TransitionOutcome::NoOp
        );
    }

    #[tokio::test]
    async fn terminal_is_monotone() {
        let manager = manager().await;
        let session = session();
        manager.create(&session).await.unwrap();
        manager
            .transition(&session.request_id, SessionStatus::Queued)
            .await
            .unwrap();
        manager
            .transition(&session.request_id, SessionStatus::Cancelled)
            .await
            .unwrap();

        // Cancelling twice has the same terminal effect as once; nothing
        // can leave the terminal state.
        assert_eq!(
            manager
                .transition(&session.request_id, SessionStatus::Cancelled)
                .await
                .unwrap(),
            TransitionOutcome::NoOp
        );
        assert_eq!(
            manager
                .transition(&session.request_id, SessionStatus::Processing)
                .await
                .unwrap(),
            TransitionOutcome::NoOp
        );
        let loaded = manager
            .store()
            .load(&session.request_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.status, SessionStatus::Cancelled);
    }

    #[tokio::test]
    async fn illegal_transition_is_a_conflict() {
        let manager = manager().await;
        let session = session();
        manager.create(&session).await.unwrap();
        let err = manager
            .transition(&session.request_id, SessionStatus::Processing)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "conflict");
    }

    #[tokio::test]
    async fn status_changes_emit_ordered_progress_events() {
        let manager = manager().await;
        let session = session();
        manager.create(&session).await.unwrap();
        manager
            .transition(&session.request_id, SessionStatus::Queued)
            .await
            .unwrap();
        manager
            .transition(&session.request_id, SessionStatus::Processing)
            .await
            .unwrap();

        let subscription = manager.broker().subscribe(&session.request_id).unwrap();
        let seqs: Vec<u64> = subscription.replay.iter().map(|e| e.seq()).collect();
        let mut sorted = seqs.clone();
        sorted.sort_unstable();
        assert_eq!(seqs, sorted);
        assert!(seqs.len() >= 3); // created log + two transitions
    }

    #[tokio::test]
    async fn exactly_one_racing_worker_wins_processing() {
        let manager = Arc::new(manager().await);
        let session = session();
        manager.create(&session).await.unwrap();
        manager
            .transition(&session.request_id, SessionStatus::Queued)
            .await
            .unwrap();

        let mut applied = 0;
        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = Arc::clone(&manager);
            let request_id = session.request_id.clone();
            handles.push(tokio::spawn(async move {
                manager
                    .transition(&request_id, SessionStatus::Processing)
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            if handle.await.unwrap() == TransitionOutcome::Applied {
                applied += 1;
            }
        }
        assert_eq!(applied, 1);
    }
}
