use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

use fidelis_core::{BrokerConfig, ProgressEvent};

struct Topic {
    /// Replay buffer: every event since session creation, in order.
    history: Vec<ProgressEvent>,
    sender: broadcast::Sender<ProgressEvent>,
    next_seq: u64,
    terminal: bool,
}

/// Per-session progress topics. Append and subscriber dispatch happen
/// under the same topic lock so every subscriber observes the same order.
/// Slow subscribers fall behind the broadcast buffer and are disconnected
/// by the transport on lag.
pub struct ProgressBroker {
    topics: DashMap<String, Arc<Mutex<Topic>>>,
    config: BrokerConfig,
}

pub struct Subscription {
    /// Events already published, for late joiners.
    pub replay: Vec<ProgressEvent>,
    /// Live feed; a `Lagged` receive error means the subscriber was too
    /// slow and must be dropped.
    pub live: broadcast::Receiver<ProgressEvent>,
}

impl ProgressBroker {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            topics: DashMap::new(),
            config,
        }
    }

    fn topic(&self, request_id: &str) -> Arc<Mutex<Topic>> {
        self.topics
            .entry(request_id.to_string())
            .or_insert_with(|| {
                let (sender, _) = broadcast::channel(self.config.subscriber_buffer);
                Arc::new(Mutex::new(Topic {
                    history: Vec::new(),
                    sender,
                    next_seq: 1,
                    terminal: false,
                }))
            })
            .clone()
    }

    /// Assign the next sequence number for a session's event. Sequencing
    /// and publication are separate so callers can stamp an event before
    /// persisting it.
    pub fn next_seq(&self, request_id: &str) -> u64 {
        let topic = self.topic(request_id);
        let mut topic = topic.lock();
        let seq = topic.next_seq;
        topic.next_seq += 1;
        seq
    }

    pub fn publish(&self, request_id: &str, event: ProgressEvent) {
        let topic = self.topic(request_id);
        let mut topic = topic.lock();
        topic.history.push(event.clone());
        let _ = topic.sender.send(event);
    }

    /// Subscribe with replay-from-start. Returns `None` once the topic has
    /// been evicted; callers then read the terminal snapshot from storage.
    pub fn subscribe(&self, request_id: &str) -> Option<Subscription> {
        let topic = self.topics.get(request_id)?.clone();
        let topic = topic.lock();
        Some(Subscription {
            replay: topic.history.clone(),
            live: topic.sender.subscribe(),
        })
    }

    pub fn is_active(&self, request_id: &str) -> bool {
        self.topics.contains_key(request_id)
    }

    /// Mark the session terminal: the topic stays replayable for the hold
    /// window, then is evicted.
    pub fn mark_terminal(self: &Arc<Self>, request_id: &str) {
        if let Some(topic) = self.topics.get(request_id) {
            topic.lock().terminal = true;
        }
        let broker = Arc::clone(self);
        let request_id = request_id.to_string();
        let hold = Duration::from_secs(self.config.terminal_hold_secs);
        tokio::spawn(async move {
            tokio::time::sleep(hold).await;
            broker.evict(&request_id);
        });
    }

    pub fn evict(&self, request_id: &str) {
        if self.topics.remove(request_id).is_some() {
            debug!(request_id, "progress topic evicted");
        }
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fidelis_core::{LogLevel, SessionLogEntry, SessionStatus};

    fn log_event(request_id: &str, seq: u64, message: &str) -> ProgressEvent {
        ProgressEvent::Log {
            seq,
            request_id: request_id.to_string(),
            entry: SessionLogEntry::new(LogLevel::Info, message),
        }
    }

    #[tokio::test]
    async fn events_arrive_in_publish_order() {
        let broker = Arc::new(ProgressBroker::new(BrokerConfig::default()));
        let seq1 = broker.next_seq("req_a");
        broker.publish("req_a", log_event("req_a", seq1, "first"));

        let mut subscription = broker.subscribe("req_a").unwrap();
        assert_eq!(subscription.replay.len(), 1);

        let seq2 = broker.next_seq("req_a");
        broker.publish("req_a", log_event("req_a", seq2, "second"));
        let live = subscription.live.recv().await.unwrap();
        assert_eq!(live.seq(), 2);
        assert!(subscription.replay[0].seq() < live.seq());
    }

    #[tokio::test]
    async fn late_subscriber_replays_from_start() {
        let broker = Arc::new(ProgressBroker::new(BrokerConfig::default()));
        for message in ["one", "two", "three"] {
            let seq = broker.next_seq("req_b");
            broker.publish("req_b", log_event("req_b", seq, message));
        }
        let subscription = broker.subscribe("req_b").unwrap();
        let seqs: Vec<u64> = subscription.replay.iter().map(|e| e.seq()).collect();
        assert_eq!(seqs, [1, 2, 3]);
    }

    #[tokio::test]
    async fn terminal_topic_evicts_after_hold() {
        let broker = Arc::new(ProgressBroker::new(BrokerConfig {
            terminal_hold_secs: 0,
            ..BrokerConfig::default()
        }));
        let seq = broker.next_seq("req_c");
        broker.publish(
            "req_c",
            ProgressEvent::StatusChanged {
                seq,
                request_id: "req_c".into(),
                from: SessionStatus::Processing,
                to: SessionStatus::Completed,
                ts: chrono::Utc::now(),
            },
        );
        broker.mark_terminal("req_c");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(broker.subscribe("req_c").is_none());
    }

    #[tokio::test]
    async fn distinct_sessions_have_distinct_sequences() {
        let broker = Arc::new(ProgressBroker::new(BrokerConfig::default()));
        assert_eq!(broker.next_seq("req_x"), 1);
        assert_eq!(broker.next_seq("req_y"), 1);
        assert_eq!(broker.next_seq("req_x"), 2);
    }
}
