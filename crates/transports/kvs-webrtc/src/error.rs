//! Error types for KVS WebRTC sessions

/// Result type alias using the crate Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while establishing or running a session
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Channel lookup failed or returned no channel identifier
    #[error("Channel resolution failed: {0}")]
    ResolutionError(String),

    /// Relay (TURN) credential fetch failed
    #[error("Relay credential fetch failed: {0}")]
    CredentialError(String),

    /// Signaling channel did not open in time
    #[error("Signaling channel did not open within {0:?}")]
    SignalingTimeoutError(std::time::Duration),

    /// Malformed or out-of-sequence message from the relay
    #[error("Signaling protocol error: {0}")]
    SignalingProtocolError(String),

    /// Socket-level signaling failure (connect, send, unexpected close)
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// Offer/answer/candidate rejected by the transport layer
    #[error("Negotiation error: {0}")]
    NegotiationError(String),

    /// Transport reported `failed` or an unexpected `disconnected`
    #[error("Transport failure: peer connection {0}")]
    TransportFailure(crate::transport::ConnectionState),

    /// `connect` called while another attempt is resolving or negotiating
    #[error("A connection attempt is already in progress")]
    AlreadyConnecting,

    /// `connect` called while a session is live
    #[error("Session is already connected; call disconnect first")]
    AlreadyConnected,

    /// The attempt was interrupted by `disconnect`
    #[error("Connection attempt cancelled")]
    Cancelled,

    /// Control-plane HTTP error
    #[error("HTTP error: {0}")]
    Http(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtc(String),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Whether this error ends the current connection attempt
    ///
    /// Credential and protocol errors degrade instead of failing; `Cancelled`
    /// is the caller's own doing and is never reported as a failure.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::CredentialError(_)
                | Error::SignalingProtocolError(_)
                | Error::Cancelled
                | Error::AlreadyConnecting
                | Error::AlreadyConnected
        )
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<webrtc::Error> for Error {
    fn from(e: webrtc::Error) -> Self {
        Error::WebRtc(e.to_string())
    }
}
