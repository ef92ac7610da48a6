//! Signaling channel: offer/answer/candidate exchange through the relay
//!
//! The channel frames, authenticates and routes messages; it never
//! interprets them. Opening is asynchronous: [`SignalingConnector::open`]
//! hands back the channel immediately, and the event stream later yields
//! exactly one of [`SignalingEvent::Open`] or [`SignalingEvent::Error`] to
//! report how the connection went.

pub mod protocol;
pub mod websocket;

use crate::config::Role;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use websocket::WebSocketSignalingConnector;

/// Offer or answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// Session offer
    Offer,
    /// Session answer
    Answer,
}

/// A session description as exchanged on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer
    #[serde(rename = "type")]
    pub sdp_type: SdpType,

    /// SDP body
    pub sdp: String,
}

impl SessionDescription {
    /// Wrap an SDP offer
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// Wrap an SDP answer
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A trickled ICE candidate (`RTCIceCandidateInit` shape)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// Candidate attribute line
    pub candidate: String,

    /// Media stream identification tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,

    /// Index of the m-line this candidate belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,

    /// ICE ufrag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// Candidate with only the attribute line set
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
            username_fragment: None,
        }
    }
}

/// Payload-bearing message kinds a channel can send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    /// SDP offer
    Offer(SessionDescription),
    /// SDP answer
    Answer(SessionDescription),
    /// Trickled candidate
    Candidate(IceCandidate),
}

impl OutboundMessage {
    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::Offer(_) => "offer",
            OutboundMessage::Answer(_) => "answer",
            OutboundMessage::Candidate(_) => "candidate",
        }
    }
}

/// Events delivered by a signaling channel
#[derive(Debug)]
pub enum SignalingEvent {
    /// The channel is open and can carry messages
    Open,

    /// An offer, with the sender's client id when the relay supplies one
    SdpOffer {
        /// Decoded description
        description: SessionDescription,
        /// Sender client id
        sender: Option<String>,
    },

    /// An answer
    SdpAnswer {
        /// Decoded description
        description: SessionDescription,
        /// Sender client id
        sender: Option<String>,
    },

    /// A remote candidate
    IceCandidate {
        /// Decoded candidate
        candidate: IceCandidate,
        /// Sender client id
        sender: Option<String>,
    },

    /// Opening failed, the relay rejected a message, or a frame could not
    /// be decoded (`Error::SignalingProtocolError`)
    Error(Error),

    /// The channel closed
    Close {
        /// Close reason if known
        reason: Option<String>,
    },
}

/// Receiving half of a signaling channel
pub type SignalingEvents = mpsc::UnboundedReceiver<SignalingEvent>;

/// Parameters for opening a channel
#[derive(Debug, Clone)]
pub struct SignalingRequest {
    /// Secure WebSocket endpoint from the channel descriptor
    pub endpoint: String,

    /// Channel identifier
    pub channel_id: String,

    /// Role on the channel
    pub role: Role,

    /// Addressing token (subscribers only)
    pub client_id: Option<String>,
}

/// Sending half of an open (or opening) signaling channel
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Send `message`, addressed to `recipient` if given
    async fn send(&self, message: OutboundMessage, recipient: Option<&str>) -> Result<()>;

    /// Close the channel; idempotent
    async fn close(&self);
}

/// Opens signaling channels
#[async_trait]
pub trait SignalingConnector: Send + Sync {
    /// Begin opening a channel
    ///
    /// Returns as soon as the attempt has started; watch the event stream
    /// for `Open` or `Error`.
    async fn open(
        &self,
        request: SignalingRequest,
    ) -> Result<(Box<dyn SignalingChannel>, SignalingEvents)>;
}
