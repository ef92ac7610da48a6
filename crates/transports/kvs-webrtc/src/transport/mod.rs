//! Transport session seam
//!
//! The engine drives a [`TransportSession`] (one per connection attempt)
//! and listens to its [`TransportEvent`] stream. The default
//! implementation wraps a webrtc-rs peer connection.

pub mod webrtc;

use crate::directory::RelayDescriptor;
use crate::signaling::{IceCandidate, SessionDescription};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

pub use self::webrtc::{WebRtcTransportFactory, WebRtcTransportSession};

/// Outbound media track supplied by the caller
pub type LocalTrack = Arc<dyn ::webrtc::track::track_local::TrackLocal + Send + Sync>;

/// Transport connection state, surfaced to observers unmodified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Created, nothing attempted yet
    New,
    /// ICE/DTLS in progress
    Connecting,
    /// Media can flow
    Connected,
    /// Connectivity lost
    Disconnected,
    /// Connectivity checks failed
    Failed,
    /// Closed locally
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::New => "new",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Media type of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Audio track
    Audio,
    /// Video track
    Video,
}

/// A track received from the remote peer
#[derive(Clone)]
pub struct InboundTrack {
    /// Track id
    pub id: String,

    /// Stream (msid) the track belongs to
    pub stream_id: String,

    /// Audio or video
    pub kind: MediaKind,

    /// Underlying RTP track, when the transport exposes one
    pub remote: Option<Arc<::webrtc::track::track_remote::TrackRemote>>,
}

impl fmt::Debug for InboundTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundTrack")
            .field("id", &self.id)
            .field("stream_id", &self.stream_id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Events raised by a transport session
#[derive(Debug)]
pub enum TransportEvent {
    /// A local candidate was gathered
    LocalCandidate(IceCandidate),
    /// Connection state changed
    StateChanged(ConnectionState),
    /// A remote track arrived
    Track(InboundTrack),
}

/// Receiving half of a transport's event stream
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// ICE servers for one attempt
#[derive(Debug, Clone, Default)]
pub struct IceConfiguration {
    /// STUN URLs
    pub stun_servers: Vec<String>,

    /// Relay (TURN) descriptors; empty means direct/STUN only
    pub relays: Vec<RelayDescriptor>,
}

/// Point-in-time statistics snapshot
#[derive(Debug, Clone)]
pub struct TransportStats {
    /// When the snapshot was taken
    pub collected_at: chrono::DateTime<chrono::Utc>,

    /// Stats report keyed by stats id
    pub report: serde_json::Value,
}

/// A negotiated (or negotiating) peer-to-peer session
#[async_trait]
pub trait TransportSession: Send + Sync {
    /// Attach an outbound track
    async fn add_track(&self, track: LocalTrack) -> Result<()>;

    /// Create an offer
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Create an answer to the current remote offer
    async fn create_answer(&self) -> Result<SessionDescription>;

    /// Apply the local description
    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

    /// Apply the remote description
    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    /// Apply a remote candidate
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Live statistics
    async fn stats(&self) -> Result<TransportStats>;

    /// Detach outbound tracks and close
    async fn close(&self) -> Result<()>;
}

/// Creates transport sessions
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Create a session configured with `ice`
    async fn create(
        &self,
        ice: IceConfiguration,
    ) -> Result<(Arc<dyn TransportSession>, TransportEvents)>;
}
