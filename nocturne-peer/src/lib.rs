//! # nocturne-peer
//!
//! Peer side of the nocturne link.
//!
//! This crate provides:
//! - A receiving state machine that mirrors what a display peer sees
//! - An in-memory loopback [`Transport`](nocturne_link::Transport) with
//!   failure injection, for tests and demos

pub mod error;
pub mod loopback;
pub mod mirror;

pub use error::PeerError;
pub use loopback::LoopbackTransport;
pub use mirror::{PeerEvent, PeerMirror};
