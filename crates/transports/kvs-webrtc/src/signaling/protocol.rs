//! KVS signaling wire envelopes
//!
//! Outbound frames carry an `action`, a base64 JSON `messagePayload` and an
//! optional `recipientClientId`. Inbound frames carry a `messageType`, the
//! payload, and the `senderClientId` when the sender is a viewer.

use super::{IceCandidate, OutboundMessage, SdpType, SessionDescription, SignalingEvent};
use crate::{Error, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Outbound message action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    /// `SDP_OFFER`
    SdpOffer,
    /// `SDP_ANSWER`
    SdpAnswer,
    /// `ICE_CANDIDATE`
    IceCandidate,
}

/// Frame sent to the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundEnvelope {
    /// Message kind
    pub action: Action,

    /// base64-encoded JSON payload
    pub message_payload: String,

    /// Target client (publisher → subscriber only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_client_id: Option<String>,
}

/// Inbound message type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// Offer from a viewer
    SdpOffer,
    /// Answer from the master
    SdpAnswer,
    /// Remote candidate
    IceCandidate,
    /// Relay rejected a message we sent
    StatusResponse,
    /// Relay is about to drop the connection
    GoAway,
    /// Relay asks clients to refresh TURN credentials
    ReconnectIceServer,
    /// Anything newer than this client
    #[serde(other)]
    Unknown,
}

/// Frame received from the relay
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEnvelope {
    /// Message kind
    pub message_type: MessageType,

    /// base64-encoded JSON payload
    #[serde(default)]
    pub message_payload: Option<String>,

    /// Sender client id (absent when the master is the sender)
    #[serde(default)]
    pub sender_client_id: Option<String>,

    /// Populated for `STATUS_RESPONSE`
    #[serde(default)]
    pub status_response: Option<StatusResponse>,
}

/// Relay status for a previously sent message
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    /// Correlation id of the message this refers to
    pub correlation_id: Option<String>,
    /// Error type name
    pub error_type: Option<String>,
    /// HTTP-like status code
    pub status_code: Option<String>,
    /// Human-readable description
    pub description: Option<String>,
}

/// Frame an outbound message
pub fn encode(message: &OutboundMessage, recipient: Option<&str>) -> Result<String> {
    let (action, payload) = match message {
        OutboundMessage::Offer(desc) => (Action::SdpOffer, serde_json::to_vec(desc)?),
        OutboundMessage::Answer(desc) => (Action::SdpAnswer, serde_json::to_vec(desc)?),
        OutboundMessage::Candidate(candidate) => {
            (Action::IceCandidate, serde_json::to_vec(candidate)?)
        }
    };

    let envelope = OutboundEnvelope {
        action,
        message_payload: BASE64.encode(payload),
        recipient_client_id: recipient.map(str::to_string),
    };

    Ok(serde_json::to_string(&envelope)?)
}

/// Decode one inbound text frame
///
/// Returns `Ok(None)` for frames that carry nothing the engine acts on
/// (keepalives, unknown types, `RECONNECT_ICE_SERVER`). Malformed frames are
/// `Error::SignalingProtocolError`.
pub fn decode(text: &str) -> Result<Option<SignalingEvent>> {
    if text.trim().is_empty() {
        return Ok(None);
    }

    let envelope: InboundEnvelope = serde_json::from_str(text)
        .map_err(|e| Error::SignalingProtocolError(format!("Invalid envelope: {}", e)))?;

    let sender = envelope.sender_client_id.filter(|id| !id.is_empty());

    let event = match envelope.message_type {
        MessageType::SdpOffer => SignalingEvent::SdpOffer {
            description: decode_description(envelope.message_payload.as_deref(), SdpType::Offer)?,
            sender,
        },
        MessageType::SdpAnswer => SignalingEvent::SdpAnswer {
            description: decode_description(envelope.message_payload.as_deref(), SdpType::Answer)?,
            sender,
        },
        MessageType::IceCandidate => SignalingEvent::IceCandidate {
            candidate: decode_payload::<IceCandidate>(envelope.message_payload.as_deref())?,
            sender,
        },
        MessageType::StatusResponse => {
            let status = envelope.status_response.unwrap_or_default();
            SignalingEvent::Error(Error::SignalingProtocolError(format!(
                "relay rejected message {}: {} {} {}",
                status.correlation_id.as_deref().unwrap_or("-"),
                status.status_code.as_deref().unwrap_or("?"),
                status.error_type.as_deref().unwrap_or("UnknownError"),
                status.description.as_deref().unwrap_or("")
            )))
        }
        MessageType::GoAway => SignalingEvent::Close {
            reason: Some("relay sent GO_AWAY".to_string()),
        },
        MessageType::ReconnectIceServer | MessageType::Unknown => return Ok(None),
    };

    Ok(Some(event))
}

fn decode_payload<T>(payload: Option<&str>) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let payload = payload
        .ok_or_else(|| Error::SignalingProtocolError("Missing messagePayload".to_string()))?;
    let bytes = BASE64
        .decode(payload)
        .map_err(|e| Error::SignalingProtocolError(format!("Invalid base64 payload: {}", e)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| Error::SignalingProtocolError(format!("Invalid payload JSON: {}", e)))
}

fn decode_description(payload: Option<&str>, expected: SdpType) -> Result<SessionDescription> {
    let desc: SessionDescription = decode_payload(payload)?;
    if desc.sdp_type != expected {
        return Err(Error::SignalingProtocolError(format!(
            "Expected {:?} payload, got {:?}",
            expected, desc.sdp_type
        )));
    }
    Ok(desc)
}
