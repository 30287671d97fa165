use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::transport::{ChatTransport, StatusHandle};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboxConfig {
    /// Identical (phone, body) pairs inside this window are dropped.
    pub dedup_window: Duration,
    /// Queued messages older than this are discarded instead of delivered.
    pub max_age: Duration,
    pub flush_interval: Duration,
    /// Pause between consecutive sends in one flush pass.
    pub send_spacing: Duration,
    pub max_attempts: u32,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            dedup_window: Duration::from_secs(60),
            max_age: Duration::from_secs(4 * 3600),
            flush_interval: Duration::from_secs(120),
            send_spacing: Duration::from_secs(1),
            max_attempts: 3,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    Queued,
    Deduplicated,
}

#[derive(Clone, Debug)]
struct QueuedMessage {
    phone_number: String,
    body: String,
    enqueued_at: DateTime<Utc>,
    attempts: u32,
}

/// Outbound message buffer in front of the transport. Messages go straight
/// out while the link is up; otherwise they wait in the queue and a
/// periodic flush drains them once the connection returns.
pub struct Outbox {
    transport: Arc<dyn ChatTransport>,
    status: StatusHandle,
    config: OutboxConfig,
    queue: Mutex<VecDeque<QueuedMessage>>,
    recent: Mutex<HashMap<(String, String), DateTime<Utc>>>,
}

impl Outbox {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        status: StatusHandle,
        config: OutboxConfig,
    ) -> Self {
        Self {
            transport,
            status,
            config,
            queue: Mutex::new(VecDeque::new()),
            recent: Mutex::new(HashMap::new()),
        }
    }

    pub async fn depth(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Send now if possible, queue otherwise. Duplicates within the dedup
    /// window are dropped silently; retries of a repeated customer tap
    /// should not fan out into repeated sends.
    pub async fn deliver(&self, phone_number: &str, body: &str) -> DeliveryOutcome {
        if self.is_duplicate(phone_number, body).await {
            debug!(phone_number, "dropping duplicate outbound message");
            return DeliveryOutcome::Deduplicated;
        }

        if self.status.read().await.is_ready() {
            match self.transport.send_text(phone_number, body).await {
                Ok(()) => return DeliveryOutcome::Sent,
                Err(send_error) => {
                    warn!(phone_number, error = %send_error, "direct send failed, queueing");
                }
            }
        }

        self.queue.lock().await.push_back(QueuedMessage {
            phone_number: phone_number.to_string(),
            body: body.to_string(),
            enqueued_at: Utc::now(),
            attempts: 0,
        });
        DeliveryOutcome::Queued
    }

    /// One drain pass over a snapshot of the queue. Entries that fail are
    /// put back until their attempt budget runs out; entries past the age
    /// limit are dropped, a four-hour-old reply helps nobody.
    pub async fn flush(&self) {
        if !self.status.read().await.is_ready() {
            return;
        }

        let drained: Vec<QueuedMessage> = {
            let mut queue = self.queue.lock().await;
            queue.drain(..).collect()
        };
        if drained.is_empty() {
            return;
        }

        info!(count = drained.len(), "flushing outbound queue");
        let now = Utc::now();
        let max_age = chrono::Duration::from_std(self.config.max_age)
            .unwrap_or_else(|_| chrono::Duration::hours(4));

        let mut first = true;
        for mut entry in drained {
            if now - entry.enqueued_at > max_age {
                warn!(
                    phone_number = %entry.phone_number,
                    "dropping expired queued message"
                );
                continue;
            }

            if !first && !self.config.send_spacing.is_zero() {
                tokio::time::sleep(self.config.send_spacing).await;
            }
            first = false;

            match self.transport.send_text(&entry.phone_number, &entry.body).await {
                Ok(()) => {}
                Err(send_error) => {
                    entry.attempts += 1;
                    if entry.attempts < self.config.max_attempts {
                        warn!(
                            phone_number = %entry.phone_number,
                            attempts = entry.attempts,
                            error = %send_error,
                            "queued send failed, will retry"
                        );
                        self.queue.lock().await.push_back(entry);
                    } else {
                        warn!(
                            phone_number = %entry.phone_number,
                            attempts = entry.attempts,
                            error = %send_error,
                            "queued send failed permanently, dropping"
                        );
                    }
                }
            }
        }
    }

    /// Periodic flusher. The caller aborts the handle on shutdown.
    pub fn spawn_flush_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let outbox = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(outbox.config.flush_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                outbox.flush().await;
            }
        })
    }

    async fn is_duplicate(&self, phone_number: &str, body: &str) -> bool {
        let window = chrono::Duration::from_std(self.config.dedup_window)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        let now = Utc::now();
        let key = (phone_number.to_string(), body.to_string());

        let mut recent = self.recent.lock().await;
        recent.retain(|_, sent_at| now - *sent_at <= window);

        if recent.contains_key(&key) {
            return true;
        }
        recent.insert(key, now);
        false
    }
}
