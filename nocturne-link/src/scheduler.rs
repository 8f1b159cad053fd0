//! Scheduler loop draining the priority queue into the transport.

use crate::config::QueueConfig;
use crate::error::TransportError;
use crate::metrics::Metrics;
use crate::queue::{Lane, MessageQueue, Next, QueuedMessage, SendOutcome};
use crate::session::SessionRegistry;
use crate::transport::Transport;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Instant;

/// Retry bounds per lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub urgent: u32,
    pub normal: u32,
    /// Added for transfer start and end.
    pub critical_extra: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            urgent: config.urgent_retries,
            normal: config.normal_retries,
            critical_extra: config.critical_extra_retries,
        }
    }

    /// Retries allowed after the first attempt. Bulk chunks are never retried.
    pub fn max_retries(&self, lane: Lane, critical: bool) -> u32 {
        match lane {
            Lane::Urgent => self.urgent,
            Lane::Normal if critical => self.normal + self.critical_extra,
            Lane::Normal => self.normal,
            Lane::Bulk => 0,
        }
    }
}

/// Sends queued messages one at a time, honouring pacing and backoff.
pub struct Scheduler<T: Transport> {
    queue: Arc<MessageQueue>,
    sessions: Arc<SessionRegistry>,
    transport: Arc<T>,
    config: QueueConfig,
    retry: RetryPolicy,
    metrics: Option<Arc<Metrics>>,
    shutdown: AtomicBool,
    sent: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    retried: AtomicU64,
}

impl<T: Transport> Scheduler<T> {
    pub fn new(
        queue: Arc<MessageQueue>,
        sessions: Arc<SessionRegistry>,
        transport: Arc<T>,
        config: QueueConfig,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Self {
            retry: RetryPolicy::from_config(&config),
            queue,
            sessions,
            transport,
            config,
            metrics,
            shutdown: AtomicBool::new(false),
            sent: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            retried: AtomicU64::new(0),
        }
    }

    /// Runs the scheduler loop (call from a background task).
    pub async fn run(&self) {
        tracing::info!(
            "Scheduler started (bulk_interval={}ms, normal_interval={}ms, send_timeout={}ms)",
            self.config.bulk_interval_ms,
            self.config.normal_interval_ms,
            self.config.send_timeout_ms
        );

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            match self.queue.next_ready(Instant::now()) {
                Next::Ready(msg) => self.dispatch(msg).await,
                Next::Wait(at) => {
                    tokio::select! {
                        _ = self.queue.notified() => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                Next::Idle => {
                    tokio::select! {
                        _ = self.queue.notified() => {}
                        _ = tokio::time::sleep(self.config.idle_tick()) => {}
                    }
                }
            }
        }

        tracing::info!("Scheduler stopped");
    }

    /// Signals the scheduler to shut down.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.queue.wake();
    }

    async fn dispatch(&self, mut msg: QueuedMessage) {
        if msg.is_cancelled() {
            self.drop_message(msg, SendOutcome::Cancelled, "cancelled");
            return;
        }

        // The peer may have been removed after this message was dequeued.
        if !self.sessions.contains(&msg.peer) {
            self.drop_message(msg, SendOutcome::PeerGone, "peer_gone");
            return;
        }

        let timeout = self.config.send_timeout();
        let send = self
            .transport
            .send(&msg.peer, msg.channel, msg.bytes.clone());
        let result = match tokio::time::timeout(timeout, send).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::TimedOut(timeout)),
        };

        let now = Instant::now();
        match result {
            Ok(()) => {
                self.queue.on_sent(&msg.peer, msg.lane, msg.is_test, now);
                self.sent.fetch_add(1, Ordering::Relaxed);
                if let Some(m) = &self.metrics {
                    m.frames_sent_total
                        .with_label_values(&[msg.lane.as_str()])
                        .inc();
                }
                tracing::debug!(
                    "Sent {:?}#{} to {} on {} ({} bytes)",
                    msg.message_type,
                    msg.message_id,
                    msg.peer,
                    msg.channel,
                    msg.bytes.len()
                );
                msg.complete(SendOutcome::Sent);
            }
            Err(e) => {
                let backoff = self.queue.on_failed(&msg.peer, now);
                self.failed.fetch_add(1, Ordering::Relaxed);
                if let Some(m) = &self.metrics {
                    m.frames_failed_total
                        .with_label_values(&[msg.lane.as_str()])
                        .inc();
                }

                let limit = self.retry.max_retries(msg.lane, msg.critical);
                if msg.attempts < limit {
                    msg.attempts += 1;
                    self.retried.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        "Send of {:?} to {} failed ({}), retry {}/{} after {:?}",
                        msg.message_type,
                        msg.peer,
                        e,
                        msg.attempts,
                        limit,
                        backoff.unwrap_or_default()
                    );
                    self.queue.requeue_front(msg);
                } else {
                    tracing::warn!(
                        "Dropping {:?}#{} for {} after {} attempts: {}",
                        msg.message_type,
                        msg.message_id,
                        msg.peer,
                        msg.attempts + 1,
                        e
                    );
                    self.drop_message(msg, SendOutcome::Failed, "send_failed");
                }
            }
        }

        if let Some(m) = &self.metrics {
            let depths = self.queue.total_depths();
            m.lane_depth
                .with_label_values(&[Lane::Urgent.as_str()])
                .set(depths.urgent as f64);
            m.lane_depth
                .with_label_values(&[Lane::Normal.as_str()])
                .set(depths.normal as f64);
            m.lane_depth
                .with_label_values(&[Lane::Bulk.as_str()])
                .set(depths.bulk as f64);
        }
    }

    fn drop_message(&self, msg: QueuedMessage, outcome: SendOutcome, reason: &str) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        if let Some(m) = &self.metrics {
            m.frames_dropped_total.with_label_values(&[reason]).inc();
        }
        msg.complete(outcome);
    }

    /// Returns scheduler statistics.
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
        }
    }
}

/// Scheduler statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub sent: u64,
    pub failed: u64,
    pub dropped: u64,
    pub retried: u64,
}
