//! Configuration types for KVS WebRTC sessions

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Which side of the channel this engine plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Stream producer; answers offers (KVS `MASTER`)
    #[serde(rename = "MASTER", alias = "master", alias = "publisher")]
    Publisher,
    /// Stream viewer; sends the offer (KVS `VIEWER`)
    #[serde(rename = "VIEWER", alias = "viewer", alias = "subscriber")]
    Subscriber,
}

impl Role {
    /// Role name as the signaling service spells it
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            Role::Publisher => "MASTER",
            Role::Subscriber => "VIEWER",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire_str())
    }
}

/// Access credential pair (plus optional session token)
///
/// Passed through to request signing untouched. Deliberately not
/// `Serialize` so it cannot be written back out.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    /// Access key id
    pub access_key_id: String,

    /// Secret access key
    pub secret_access_key: String,

    /// Session token for temporary credentials
    #[serde(default)]
    pub session_token: Option<String>,
}

impl Credentials {
    /// Create a long-term credential pair
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }

    /// Attach a session token
    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    /// Read `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and the optional
    /// `AWS_SESSION_TOKEN` from the environment
    pub fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .map_err(|_| Error::InvalidConfig("AWS_ACCESS_KEY_ID is not set".to_string()))?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .map_err(|_| Error::InvalidConfig("AWS_SECRET_ACCESS_KEY is not set".to_string()))?;

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token: std::env::var("AWS_SESSION_TOKEN").ok().filter(|t| !t.is_empty()),
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Everything needed to reach one signaling channel
///
/// Immutable for the lifetime of a connection attempt.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Region identifier (e.g. `us-west-2`)
    pub region: String,

    /// Credential pair used to sign every request
    pub credentials: Credentials,

    /// Human-readable channel name
    pub channel_name: String,
}

impl SessionConfig {
    /// Create a session configuration
    pub fn new(
        region: impl Into<String>,
        credentials: Credentials,
        channel_name: impl Into<String>,
    ) -> Self {
        Self {
            region: region.into(),
            credentials,
            channel_name: channel_name.into(),
        }
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `region` is empty or contains characters other than `[a-z0-9-]`
    /// - `channel_name` is empty, longer than 256 characters, or contains
    ///   characters other than `[a-zA-Z0-9_.-]`
    /// - either half of the credential pair is empty
    pub fn validate(&self) -> Result<()> {
        if self.region.is_empty()
            || !self
                .region
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(Error::InvalidConfig(format!(
                "region must match [a-z0-9-]+, got {:?}",
                self.region
            )));
        }

        if self.channel_name.is_empty() || self.channel_name.len() > 256 {
            return Err(Error::InvalidConfig(format!(
                "channel_name must be 1-256 characters, got {}",
                self.channel_name.len()
            )));
        }

        if !self
            .channel_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        {
            return Err(Error::InvalidConfig(format!(
                "channel_name must match [a-zA-Z0-9_.-]+, got {:?}",
                self.channel_name
            )));
        }

        if self.credentials.access_key_id.is_empty() || self.credentials.secret_access_key.is_empty()
        {
            return Err(Error::InvalidConfig(
                "access key id and secret access key are required".to_string(),
            ));
        }

        Ok(())
    }
}

/// Tunables for the negotiation engine and its collaborators
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// How long the signaling channel may take to open, measured from the
    /// start of `connect` (default: 10000ms)
    pub signaling_timeout_ms: u64,

    /// Per-request timeout for control-plane HTTP calls (default: 10000ms)
    pub http_timeout_ms: u64,

    /// Protocol errors tolerated per attempt before it is failed (default: 3)
    pub max_protocol_errors: u32,

    /// Prepend the region's STUN server to the ICE server list (default: true)
    pub use_region_stun: bool,

    /// Additional STUN server URLs
    pub extra_stun_servers: Vec<String>,

    /// Control-plane endpoint override (default: regional endpoint)
    pub control_plane_endpoint: Option<String>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            signaling_timeout_ms: 10_000,
            http_timeout_ms: 10_000,
            max_protocol_errors: 3,
            use_region_stun: true,
            extra_stun_servers: Vec::new(),
            control_plane_endpoint: None,
        }
    }
}

impl EngineOptions {
    /// Signaling open timeout as a `Duration`
    pub fn signaling_timeout(&self) -> Duration {
        Duration::from_millis(self.signaling_timeout_ms)
    }

    /// HTTP request timeout as a `Duration`
    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    /// Control-plane endpoint for `region`
    pub fn control_plane_endpoint(&self, region: &str) -> String {
        self.control_plane_endpoint
            .clone()
            .unwrap_or_else(|| format!("https://kinesisvideo.{}.amazonaws.com", region))
    }

    /// STUN servers to use in `region`, region server first
    pub fn stun_servers(&self, region: &str) -> Vec<String> {
        let mut servers = Vec::with_capacity(self.extra_stun_servers.len() + 1);
        if self.use_region_stun {
            servers.push(format!("stun:stun.kinesisvideo.{}.amazonaws.com:443", region));
        }
        servers.extend(self.extra_stun_servers.iter().cloned());
        servers
    }

    /// Validate option ranges
    ///
    /// # Errors
    ///
    /// Returns an error if either timeout is zero or a STUN URL does not
    /// use the `stun:`/`stuns:` scheme.
    pub fn validate(&self) -> Result<()> {
        if self.signaling_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "signaling_timeout_ms must be greater than zero".to_string(),
            ));
        }

        if self.http_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "http_timeout_ms must be greater than zero".to_string(),
            ));
        }

        if let Some(bad) = self
            .extra_stun_servers
            .iter()
            .find(|url| !url.starts_with("stun:") && !url.starts_with("stuns:"))
        {
            return Err(Error::InvalidConfig(format!(
                "STUN server URLs must start with stun: or stuns:, got {}",
                bad
            )));
        }

        Ok(())
    }

    /// Parse options from YAML
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let options: Self = serde_yaml::from_str(yaml)
            .map_err(|e| Error::InvalidConfig(format!("Invalid options YAML: {}", e)))?;
        options.validate()?;
        Ok(options)
    }

    /// Load options from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            Error::InvalidConfig(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Set the signaling open timeout
    pub fn with_signaling_timeout(mut self, timeout: Duration) -> Self {
        self.signaling_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the control-plane endpoint
    ///
    /// Useful for private endpoints and for tests.
    pub fn with_control_plane_endpoint(mut self, endpoint: &str) -> Self {
        self.control_plane_endpoint = Some(endpoint.trim_end_matches('/').to_string());
        self
    }

    /// Set the protocol error budget
    pub fn with_max_protocol_errors(mut self, max: u32) -> Self {
        self.max_protocol_errors = max;
        self
    }
}
