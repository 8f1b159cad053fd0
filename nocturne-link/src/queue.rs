//! Three-lane priority queue with per-peer pacing and backoff.
//!
//! Each peer owns an urgent, a normal and a bulk lane. Within a peer the
//! highest non-empty lane always goes first. Across peers the oldest ready
//! message of the highest lane wins, so a backed-off peer never stalls others.

use crate::config::{CongestionConfig, QueueConfig};
use crate::congestion::{CongestionState, ConnectionQuality};
use crate::error::{CapacityError, LinkError};
use crate::session::{ChannelId, PeerId};
use bytes::Bytes;
use nocturne_protocol::{Frame, MessageType, Namespace, ProtocolError};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Priority lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Lane {
    Urgent,
    Normal,
    Bulk,
}

impl Lane {
    /// Lanes in priority order.
    pub const ALL: [Lane; 3] = [Lane::Urgent, Lane::Normal, Lane::Bulk];

    /// Lane a host-originated message type belongs to.
    pub fn for_message(ty: MessageType) -> Self {
        match ty {
            MessageType::Capabilities
            | MessageType::TimeSync
            | MessageType::ProtocolEnable
            | MessageType::Error => Lane::Urgent,
            t if t.is_transfer_chunk() => Lane::Bulk,
            _ => Lane::Normal,
        }
    }

    fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Lane::Urgent => "urgent",
            Lane::Normal => "normal",
            Lane::Bulk => "bulk",
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag. Returns true only for the call that set it.
    pub fn cancel(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Final fate of a queued message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The transport accepted the bytes.
    Sent,
    /// The send failed and no retries remain.
    Failed,
    /// The owning transfer was cancelled first.
    Cancelled,
    /// The peer disconnected first.
    PeerGone,
}

/// Callback run once with the message's outcome.
pub type Completion = Box<dyn FnOnce(SendOutcome) + Send>;

/// An encoded frame waiting in a lane.
pub struct QueuedMessage {
    pub peer: PeerId,
    pub channel: ChannelId,
    pub lane: Lane,
    pub message_type: MessageType,
    pub message_id: u16,
    pub bytes: Bytes,
    /// Test traffic skips pacing and backoff.
    pub is_test: bool,
    /// Transfer start and end get an extra retry.
    pub critical: bool,
    pub attempts: u32,
    seq: u64,
    cancel: Option<CancelToken>,
    completion: Option<Completion>,
}

impl QueuedMessage {
    /// Encodes `frame` for `peer`, deriving lane and channel from its type.
    pub fn new(peer: PeerId, frame: &Frame) -> Result<Self, ProtocolError> {
        let ty = frame.message_type;
        Ok(Self {
            peer,
            channel: ChannelId::for_frame(frame),
            lane: Lane::for_message(ty),
            message_type: ty,
            message_id: frame.message_id,
            bytes: frame.encode()?.freeze(),
            is_test: ty.is_test(),
            critical: ty.namespace() == Namespace::BulkTransfer
                && (ty.is_transfer_start() || ty.is_transfer_end()),
            attempts: 0,
            seq: 0,
            cancel: None,
            completion: None,
        })
    }

    pub fn with_lane(mut self, lane: Lane) -> Self {
        self.lane = lane;
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_completion(mut self, f: impl FnOnce(SendOutcome) + Send + 'static) -> Self {
        self.completion = Some(Box::new(f));
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| c.is_cancelled())
    }

    /// Runs the completion callback, if any.
    pub fn complete(mut self, outcome: SendOutcome) {
        if let Some(f) = self.completion.take() {
            f(outcome);
        }
    }
}

impl fmt::Debug for QueuedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedMessage")
            .field("peer", &self.peer)
            .field("lane", &self.lane)
            .field("message_type", &self.message_type)
            .field("message_id", &self.message_id)
            .field("len", &self.bytes.len())
            .field("attempts", &self.attempts)
            .finish()
    }
}

/// Result of asking the queue for work.
#[derive(Debug)]
pub enum Next {
    Ready(QueuedMessage),
    /// Messages are queued but none may go before this instant.
    Wait(Instant),
    Idle,
}

#[derive(Default)]
struct PeerLanes {
    lanes: [VecDeque<QueuedMessage>; 3],
    paced_until: [Option<Instant>; 3],
    congestion: CongestionState,
}

impl PeerLanes {
    fn depth(&self) -> usize {
        self.lanes.iter().map(VecDeque::len).sum()
    }

    /// Front of the highest non-empty lane and the instant it may be sent.
    fn head(&self, now: Instant) -> Option<(Lane, u64, Option<Instant>)> {
        let lane = Lane::ALL
            .into_iter()
            .find(|l| !self.lanes[l.index()].is_empty())?;
        let msg = self.lanes[lane.index()].front()?;

        if msg.is_test {
            return Some((lane, msg.seq, None));
        }

        let paced = self.paced_until[lane.index()].filter(|t| *t > now);
        let blocked = self.congestion.blocked_until(now);
        let wait = match (paced, blocked) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        Some((lane, msg.seq, wait))
    }
}

struct Inner {
    peers: HashMap<PeerId, PeerLanes>,
    next_seq: u64,
}

/// Lane snapshot for one peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaneDepths {
    pub urgent: usize,
    pub normal: usize,
    pub bulk: usize,
}

impl LaneDepths {
    pub fn total(&self) -> usize {
        self.urgent + self.normal + self.bulk
    }
}

/// Priority queue shared by producers and the scheduler.
pub struct MessageQueue {
    inner: Mutex<Inner>,
    capacity: [usize; 3],
    intervals: [Duration; 3],
    congestion: CongestionConfig,
    notify: Notify,
}

impl MessageQueue {
    pub fn new(queue: &QueueConfig, congestion: &CongestionConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                peers: HashMap::new(),
                next_seq: 0,
            }),
            capacity: [
                queue.urgent_capacity,
                queue.normal_capacity,
                queue.bulk_capacity,
            ],
            intervals: [
                Duration::ZERO,
                queue.normal_interval(),
                queue.bulk_interval(),
            ],
            congestion: congestion.clone(),
            notify: Notify::new(),
        }
    }

    /// Creates empty lanes for a peer. Idempotent.
    pub fn register_peer(&self, peer: &PeerId) {
        self.inner.lock().peers.entry(peer.clone()).or_default();
    }

    pub fn is_registered(&self, peer: &PeerId) -> bool {
        self.inner.lock().peers.contains_key(peer)
    }

    /// Appends a message to its lane.
    ///
    /// Fails immediately when the peer is unknown or the lane is full; the
    /// message's completion is not run in that case.
    pub fn enqueue(&self, mut msg: QueuedMessage) -> Result<(), LinkError> {
        {
            let mut inner = self.inner.lock();
            let seq = inner.next_seq;
            let lanes = inner
                .peers
                .get_mut(&msg.peer)
                .ok_or_else(|| LinkError::PeerNotConnected(msg.peer.clone()))?;

            let lane = &mut lanes.lanes[msg.lane.index()];
            let capacity = self.capacity[msg.lane.index()];
            if lane.len() >= capacity {
                return Err(CapacityError {
                    peer: msg.peer.clone(),
                    lane: msg.lane,
                    capacity,
                }
                .into());
            }

            msg.seq = seq;
            lane.push_back(msg);
            inner.next_seq += 1;
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Puts a message back at the head of its lane for a retry.
    ///
    /// Dropped (with `PeerGone`) if the peer was removed meanwhile.
    pub fn requeue_front(&self, msg: QueuedMessage) {
        let rejected = {
            let mut inner = self.inner.lock();
            match inner.peers.get_mut(&msg.peer) {
                Some(lanes) => {
                    lanes.lanes[msg.lane.index()].push_front(msg);
                    None
                }
                None => Some(msg),
            }
        };
        match rejected {
            Some(msg) => msg.complete(SendOutcome::PeerGone),
            None => self.notify.notify_one(),
        }
    }

    /// Pops the next message that may be sent at `now`.
    pub fn next_ready(&self, now: Instant) -> Next {
        let mut inner = self.inner.lock();

        let mut best: Option<(Lane, u64, PeerId)> = None;
        let mut earliest: Option<Instant> = None;

        for (peer, lanes) in inner.peers.iter() {
            let Some((lane, seq, wait)) = lanes.head(now) else {
                continue;
            };
            match wait {
                Some(at) => earliest = Some(earliest.map_or(at, |e| e.min(at))),
                None => {
                    let better = match &best {
                        None => true,
                        Some((best_lane, best_seq, _)) => (lane, seq) < (*best_lane, *best_seq),
                    };
                    if better {
                        best = Some((lane, seq, peer.clone()));
                    }
                }
            }
        }

        if let Some((lane, _, peer)) = best {
            if let Some(msg) = inner
                .peers
                .get_mut(&peer)
                .and_then(|l| l.lanes[lane.index()].pop_front())
            {
                return Next::Ready(msg);
            }
        }

        match earliest {
            Some(at) => Next::Wait(at),
            None => Next::Idle,
        }
    }

    /// Records a successful send and starts the lane's pacing interval.
    pub fn on_sent(&self, peer: &PeerId, lane: Lane, is_test: bool, now: Instant) {
        let mut inner = self.inner.lock();
        if let Some(lanes) = inner.peers.get_mut(peer) {
            lanes.congestion.on_success(&self.congestion);
            if !is_test {
                let interval = self.intervals[lane.index()];
                lanes.paced_until[lane.index()] =
                    (!interval.is_zero()).then_some(now + interval);
            }
        }
    }

    /// Records a failed send and backs the peer off. Returns the new backoff.
    pub fn on_failed(&self, peer: &PeerId, now: Instant) -> Option<Duration> {
        let mut inner = self.inner.lock();
        inner.peers.get_mut(peer).map(|lanes| {
            lanes.congestion.on_failure(&self.congestion, now);
            lanes.congestion.backoff
        })
    }

    /// Removes a peer and everything queued for it.
    ///
    /// The returned messages are completed with `PeerGone` by the caller,
    /// outside the lock.
    pub fn purge_peer(&self, peer: &PeerId) -> Vec<QueuedMessage> {
        let removed = self.inner.lock().peers.remove(peer);
        removed
            .map(|lanes| lanes.lanes.into_iter().flatten().collect())
            .unwrap_or_default()
    }

    /// Removes every cancelled message queued for a peer.
    pub fn purge_cancelled(&self, peer: &PeerId) -> Vec<QueuedMessage> {
        let mut inner = self.inner.lock();
        let Some(lanes) = inner.peers.get_mut(peer) else {
            return Vec::new();
        };

        let mut removed = Vec::new();
        for lane in lanes.lanes.iter_mut() {
            let (gone, kept): (VecDeque<_>, VecDeque<_>) =
                lane.drain(..).partition(QueuedMessage::is_cancelled);
            *lane = kept;
            removed.extend(gone);
        }
        removed
    }

    pub fn depths(&self, peer: &PeerId) -> LaneDepths {
        let inner = self.inner.lock();
        inner
            .peers
            .get(peer)
            .map(|l| LaneDepths {
                urgent: l.lanes[0].len(),
                normal: l.lanes[1].len(),
                bulk: l.lanes[2].len(),
            })
            .unwrap_or_default()
    }

    /// Total queued messages across all peers, per lane.
    pub fn total_depths(&self) -> LaneDepths {
        let inner = self.inner.lock();
        let mut depths = LaneDepths::default();
        for lanes in inner.peers.values() {
            depths.urgent += lanes.lanes[0].len();
            depths.normal += lanes.lanes[1].len();
            depths.bulk += lanes.lanes[2].len();
        }
        depths
    }

    pub fn congestion(&self, peer: &PeerId) -> Option<CongestionState> {
        let now = Instant::now();
        self.inner.lock().peers.get_mut(peer).map(|l| {
            l.congestion.decay(&self.congestion, now);
            l.congestion.clone()
        })
    }

    /// Link quality for a peer; unknown peers are `Poor`.
    pub fn quality(&self, peer: &PeerId) -> ConnectionQuality {
        let total_capacity: usize = self.capacity.iter().sum();
        let now = Instant::now();
        let mut inner = self.inner.lock();
        match inner.peers.get_mut(peer) {
            Some(lanes) => {
                lanes.congestion.decay(&self.congestion, now);
                ConnectionQuality::assess(
                    lanes.congestion.failure_streak,
                    lanes.depth(),
                    total_capacity,
                )
            }
            None => ConnectionQuality::Poor,
        }
    }

    /// Waits until a producer enqueues something.
    pub async fn notified(&self) {
        self.notify.notified().await
    }

    /// Wakes the scheduler.
    pub fn wake(&self) {
        self.notify.notify_one();
    }
}
