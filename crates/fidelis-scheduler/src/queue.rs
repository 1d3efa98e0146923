use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use fidelis_core::PriorityBand;

/// One admitted unit of work.
#[derive(Clone)]
pub struct Job {
    pub request_id: String,
    pub tenant: String,
    pub band: PriorityBand,
    pub cancel: CancellationToken,
}

/// Two-band FIFO queue: interactive drains strictly before batch; FIFO
/// within a band.
pub struct BandQueue {
    interactive: Mutex<VecDeque<Job>>,
    batch: Mutex<VecDeque<Job>>,
    notify: Notify,
}

impl Default for BandQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl BandQueue {
    pub fn new() -> Self {
        Self {
            interactive: Mutex::new(VecDeque::new()),
            batch: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    pub fn push(&self, job: Job) {
        match job.band {
            PriorityBand::Interactive => self.interactive.lock().push_back(job),
            PriorityBand::Batch => self.batch.lock().push_back(job),
        }
        self.notify.notify_one();
        metrics::gauge!("fidelis_queue_depth").set(self.depth() as f64);
    }

    fn try_pop(&self) -> Option<Job> {
        if let Some(job) = self.interactive.lock().pop_front() {
            return Some(job);
        }
        self.batch.lock().pop_front()
    }

    /// Wait for the next job. Jobs cancelled while queued are skipped.
    pub async fn pop(self: &Arc<Self>) -> Job {
        loop {
            while let Some(job) = self.try_pop() {
                metrics::gauge!("fidelis_queue_depth").set(self.depth() as f64);
                if job.cancel.is_cancelled() {
                    continue;
                }
                return job;
            }
            self.notify.notified().await;
        }
    }

    pub fn depth(&self) -> usize {
        self.interactive.lock().len() + self.batch.lock().len()
    }

    pub fn depths(&self) -> (usize, usize) {
        (self.interactive.lock().len(), self.batch.lock().len())
    }
}
