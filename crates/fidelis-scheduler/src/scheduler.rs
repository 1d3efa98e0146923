use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use fidelis_core::{
    FidelisError, PriorityBand, Result, SchedulerConfig, Session, SessionStatus, UnifiedResult,
};
use fidelis_session::{SessionManager, TransitionOutcome};

use crate::queue::{BandQueue, Job};

/// Context handed to the pipeline for one session run.
pub struct WorkerContext {
    pub cancel: CancellationToken,
    pub deadline: Instant,
}

/// The work a worker performs for one session. Split out as a seam so the
/// scheduler can be exercised without the full pipeline.
#[async_trait]
pub trait SessionPipeline: Send + Sync {
    async fn run(&self, session: &Session, ctx: &WorkerContext) -> Result<UnifiedResult>;
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct QueueStats {
    pub depth: usize,
    pub interactive_depth: usize,
    pub batch_depth: usize,
    pub active_workers: usize,
    pub refusing: bool,
}

/// Admission control, queueing, deadlines and cancellation for validation
/// sessions. Workers are a fixed pool; each session is owned by exactly
/// one worker from `processing` entry to its terminal transition.
pub struct Scheduler {
    config: SchedulerConfig,
    manager: Arc<SessionManager>,
    pipeline: Arc<dyn SessionPipeline>,
    queue: Arc<BandQueue>,
    cancels: DashMap<String, CancellationToken>,
    tenant_inflight: DashMap<String, usize>,
    active_workers: Arc<AtomicUsize>,
    refusing: Arc<AtomicBool>,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        manager: Arc<SessionManager>,
        pipeline: Arc<dyn SessionPipeline>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            manager,
            pipeline,
            queue: Arc::new(BandQueue::new()),
            cancels: DashMap::new(),
            tenant_inflight: DashMap::new(),
            active_workers: Arc::new(AtomicUsize::new(0)),
            refusing: Arc::new(AtomicBool::new(false)),
            shutdown: CancellationToken::new(),
        })
    }

    /// Spawn the worker pool and re-admit queued sessions that survived a
    /// restart.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let recovered = self.manager.recover().await?;
        for session in recovered {
            info!(request_id = %session.request_id, "re-admitting recovered session");
            // Recovered sessions may still be pending; queued is a no-op.
            self.manager
                .transition(&session.request_id, SessionStatus::Queued)
                .await?;
            self.enqueue_admitted(&session, PriorityBand::Batch);
        }
        for worker_id in 0..self.config.worker_count {
            let scheduler = Arc::clone(self);
            tokio::spawn(async move { scheduler.worker_loop(worker_id).await });
        }
        Ok(())
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Admission: enforce backpressure and per-tenant caps, create the
    /// session in `pending`, then promote to `queued`.
    pub async fn admit(&self, session: Session, band: PriorityBand) -> Result<String> {
        let depth = self.queue.depth();
        let refuse_at = self.config.queue_refuse_factor * self.config.worker_count;
        let resume_at = self.config.queue_resume_factor * self.config.worker_count;

        if self.refusing.load(Ordering::Acquire) {
            if depth < resume_at {
                self.refusing.store(false, Ordering::Release);
            } else {
                return Err(FidelisError::Overloaded("queue depth above limit".into()));
            }
        } else if depth >= refuse_at {
            self.refusing.store(true, Ordering::Release);
            return Err(FidelisError::Overloaded("queue depth above limit".into()));
        }

        let inflight = self
            .tenant_inflight
            .get(&session.tenant)
            .map(|c| *c)
            .unwrap_or(0);
        if inflight >= self.config.max_per_tenant {
            return Err(FidelisError::Overloaded(format!(
                "tenant {} at concurrency cap",
                session.tenant
            )));
        }
        let global: usize = self.tenant_inflight.iter().map(|e| *e.value()).sum();
        if global >= self.config.max_concurrent_sessions + self.queue_capacity() {
            return Err(FidelisError::Overloaded("engine at capacity".into()));
        }

        self.manager.create(&session).await?;
        self.manager
            .transition(&session.request_id, SessionStatus::Queued)
            .await?;
        *self
            .tenant_inflight
            .entry(session.tenant.clone())
            .or_insert(0) += 1;
        self.enqueue_admitted(&session, band);
        Ok(session.request_id.clone())
    }

    fn queue_capacity(&self) -> usize {
        self.config.queue_refuse_factor * self.config.worker_count
    }

    fn enqueue_admitted(&self, session: &Session, band: PriorityBand) {
        let cancel = CancellationToken::new();
        self.cancels
            .insert(session.request_id.clone(), cancel.clone());
        self.queue.push(Job {
            request_id: session.request_id.clone(),
            tenant: session.tenant.clone(),
            band,
            cancel,
        });
    }

    /// Client cancellation: signal the owning worker (or drop the queued
    /// job) and mark the session cancelled. Idempotent.
    pub async fn cancel(&self, request_id: &str) -> Result<()> {
        if let Some(token) = self.cancels.get(request_id) {
            token.cancel();
        }
        match self.manager.transition(request_id, SessionStatus::Cancelled).await {
            Ok(_) => Ok(()),
            // The worker may have already moved it terminal.
            Err(FidelisError::Conflict(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    pub fn stats(&self) -> QueueStats {
        let (interactive_depth, batch_depth) = self.queue.depths();
        QueueStats {
            depth: interactive_depth + batch_depth,
            interactive_depth,
            batch_depth,
            active_workers: self.active_workers.load(Ordering::Relaxed),
            refusing: self.refusing.load(Ordering::Relaxed),
        }
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        loop {
            let job = tokio::select! {
                job = self.queue.pop() => job,
                _ = self.shutdown.cancelled() => return,
            };
            self.active_workers.fetch_add(1, Ordering::Relaxed);
            metrics::gauge!("fidelis_active_workers")
                .set(self.active_workers.load(Ordering::Relaxed) as f64);
            self.run_job(worker_id, &job).await;
            self.active_workers.fetch_sub(1, Ordering::Relaxed);
            self.release(&job);
        }
    }

    fn release(&self, job: &Job) {
        self.cancels.remove(&job.request_id);
        if let Some(mut count) = self.tenant_inflight.get_mut(&job.tenant) {
            *count = count.saturating_sub(1);
        }
    }

    async fn run_job(&self, worker_id: usize, job: &Job) {
        let request_id = job.request_id.as_str();
        match self.manager.transition(request_id, SessionStatus::Processing).await {
            Ok(TransitionOutcome::Applied) => {}
            Ok(TransitionOutcome::NoOp) => {
                // Cancelled (or otherwise terminal) while queued.
                return;
            }
            Err(err) => {
                error!(request_id, error = %err, "could not claim session");
                return;
            }
        }

        let session = match self.manager.store().load(request_id).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                error!(request_id, "session vanished after claim");
                return;
            }
            Err(err) => {
                error!(request_id, error = %err, "session load failed");
                let _ = self.manager.fail(request_id, &err.to_string()).await;
                return;
            }
        };

        let deadline = Duration::from_secs(self.config.session_deadline_secs);
        let grace = Duration::from_secs(self.config.cancel_grace_secs);
        let ctx = WorkerContext {
            cancel: job.cancel.clone(),
            deadline: Instant::now() + deadline,
        };
        info!(worker_id, request_id, "worker picked up session");

        let pipeline = self.pipeline.run(&session, &ctx);
        tokio::pin!(pipeline);

        let outcome = tokio::select! {
            result = &mut pipeline => JobOutcome::Finished(result),
            _ = tokio::time::sleep(deadline) => {
                // Deadline fired: signal cancellation, then give the
                // worker the grace window to acknowledge.
                job.cancel.cancel();
                match tokio::time::timeout(grace, &mut pipeline).await {
                    Ok(_) => JobOutcome::TimedOut,
                    Err(_) => {
                        warn!(request_id, "worker wedged past grace window, forcing timeout");
                        JobOutcome::TimedOut
                    }
                }
            }
            _ = job.cancel.cancelled() => {
                match tokio::time::timeout(grace, &mut pipeline).await {
                    Ok(_) | Err(_) => JobOutcome::Cancelled,
                }
            }
        };

        match outcome {
            JobOutcome::Finished(Ok(result)) => {
                if let Err(err) = self.manager.complete(request_id, &result).await {
                    error!(request_id, error = %err, "result commit failed");
                    let _ = self.manager.fail(request_id, &err.to_string()).await;
                }
            }
            JobOutcome::Finished(Err(FidelisError::Cancelled)) => {
                let _ = self
                    .manager
                    .transition(request_id, SessionStatus::Cancelled)
                    .await;
            }
            JobOutcome::Finished(Err(FidelisError::DeadlineExceeded(_))) => {
                let _ = self
                    .manager
                    .transition(request_id, SessionStatus::TimedOut)
                    .await;
            }
            JobOutcome::Finished(Err(err)) => {
                let _ = self.manager.fail(request_id, &err.to_string()).await;
            }
            JobOutcome::TimedOut => {
                // Partial results are discarded with the dropped future.
                let _ = self
                    .manager
                    .log(
                        request_id,
                        fidelis_core::SessionLogEntry::new(
                            fidelis_core::LogLevel::Error,
                            "session deadline exceeded",
                        )
                        .with_payload(json!({"deadline_secs": self.config.session_deadline_secs})),
                    )
                    .await;
                let _ = self
                    .manager
                    .transition(request_id, SessionStatus::TimedOut)
                    .await;
            }
            JobOutcome::Cancelled => {
                let _ = self
                    .manager
                    .transition(request_id, SessionStatus::Cancelled)
                    .await;
            }
        }
    }
}

enum JobOutcome {
    Finished(Result<UnifiedResult>),
    TimedOut,
    Cancelled,
}
