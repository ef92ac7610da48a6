//! Producer/viewer WebRTC sessions over Kinesis Video signaling
//!
//! This crate turns a signaling channel name plus credentials into a live
//! peer-to-peer media connection between one publisher (KVS `MASTER`) and
//! one subscriber (KVS `VIEWER`).
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  NegotiationEngine (IDLE → RESOLVING → NEGOTIATING → …)  │
//! │  ├─ ChannelResolver          name → ARN + endpoints      │
//! │  ├─ RelayCredentialProvider  ARN → TURN servers          │
//! │  ├─ SignalingConnector       SigV4-presigned WebSocket   │
//! │  ├─ TransportFactory         webrtc-rs peer connection   │
//! │  └─ per-attempt task         offer/answer, candidates    │
//! │     ↓                                                    │
//! │  observers: remote media, connection state, errors       │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Every collaborator sits behind a trait; [`NegotiationEngine::kvs`] wires
//! the KVS and webrtc-rs implementations, [`NegotiationEngine::builder`]
//! swaps any of them.
//!
//! # Example
//!
//! ```
//! use remotemedia_kvs_webrtc::EngineOptions;
//! use std::time::Duration;
//!
//! let options = EngineOptions::default().with_signaling_timeout(Duration::from_secs(5));
//! assert!(options.validate().is_ok());
//! assert_eq!(
//!     options.stun_servers("us-west-2")[0],
//!     "stun:stun.kinesisvideo.us-west-2.amazonaws.com:443"
//! );
//! ```

#![warn(clippy::all)]

pub mod auth;
pub mod config;
pub mod directory;
pub mod error;
pub mod negotiation;
pub mod observer;
pub mod signaling;
pub mod transport;

// Re-exports for public API
pub use config::{Credentials, EngineOptions, Role, SessionConfig};
pub use directory::{ChannelDescriptor, ChannelResolver, RelayCredentialProvider, RelayDescriptor};
pub use error::{Error, Result};
pub use negotiation::{EngineState, NegotiationEngine, NegotiationEngineBuilder};
pub use observer::RemoteMedia;
pub use signaling::{IceCandidate, SessionDescription, SignalingConnector, SignalingEvent};
pub use transport::{
    ConnectionState, InboundTrack, LocalTrack, MediaKind, TransportFactory, TransportSession,
    TransportStats,
};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let ver = version();
        assert!(!ver.is_empty());
    }
}
