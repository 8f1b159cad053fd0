//! # nocturne-link
//!
//! Link layer for nocturne.
//!
//! This crate provides:
//! - Per-peer sessions with MTU, subscriptions and negotiated capabilities
//! - A three-lane priority queue with pacing and congestion backoff
//! - A scheduler that drives an abstract [`Transport`]
//! - Bulk transfer orchestration with supersession and cancellation
//! - State fan-out with per-peer deduplication
//! - Layered configuration and optional prometheus metrics

pub mod config;
pub mod congestion;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod queue;
pub mod scheduler;
pub mod session;
pub mod transport;

pub use config::{
    Config, ConfigError, CongestionConfig, DeviceConfig, MetricsConfig, QueueConfig,
    TransferConfig,
};
pub use congestion::{CongestionState, ConnectionQuality};
pub use error::{CapacityError, LinkError, TransportError};
pub use metrics::Metrics;
pub use orchestrator::{
    time_sync_now, AssetProvider, DeviceInfo, InboundEvent, Orchestrator, TransferReport,
};
pub use queue::{CancelToken, Lane, LaneDepths, MessageQueue, QueuedMessage, SendOutcome};
pub use scheduler::{RetryPolicy, Scheduler, SchedulerStats};
pub use session::{ChannelId, PeerId, PeerSession, SessionRegistry, TransferHandle, TransferId};
pub use transport::{FnTransport, Transport};
