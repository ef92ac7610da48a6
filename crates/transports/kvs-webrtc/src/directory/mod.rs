//! Channel resolution and relay credential lookup
//!
//! Both are thin request/response calls against the signaling service's
//! control plane. Neither retries nor caches: a channel descriptor is
//! re-resolved for every connection attempt and relay credentials are only
//! valid for a few minutes.

pub mod relay;
pub mod resolver;

use crate::auth::SigV4Signer;
use crate::config::Role;
use crate::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

pub use relay::KvsRelayCredentialProvider;
pub use resolver::KvsChannelResolver;

/// Where a channel lives and how to reach it in a given role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelDescriptor {
    /// Unique channel identifier (ARN)
    pub channel_id: String,

    /// Secure WebSocket signaling endpoint
    pub signaling_endpoint: String,

    /// HTTPS endpoint (relay configuration and other REST calls)
    pub https_endpoint: String,
}

/// One traversal relay (TURN) server entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayDescriptor {
    /// `turn:`/`turns:` URIs for this relay
    pub urls: Vec<String>,

    /// Username, if the relay requires authentication
    pub username: Option<String>,

    /// Time-limited credential
    pub credential: Option<String>,

    /// Validity of the credential
    pub ttl: Option<Duration>,
}

/// Resolves a channel name to its identifier and endpoints
#[async_trait]
pub trait ChannelResolver: Send + Sync {
    /// Resolve `channel_name` for `role`
    ///
    /// Returns `Ok(None)` if the directory has no channel identifier for
    /// that name.
    async fn resolve(&self, channel_name: &str, role: Role) -> Result<Option<ChannelDescriptor>>;
}

/// Fetches short-lived relay credentials for a channel
#[async_trait]
pub trait RelayCredentialProvider: Send + Sync {
    /// Fetch the relay list for `channel`; an empty list is valid
    async fn relay_servers(
        &self,
        channel: &ChannelDescriptor,
        client_id: Option<&str>,
    ) -> Result<Vec<RelayDescriptor>>;
}

/// Shared SigV4-signed JSON POST used by both control-plane clients
pub(crate) struct SignedJsonClient {
    http: reqwest::Client,
    signer: SigV4Signer,
}

/// Outcome of a control-plane call that reached the server
pub(crate) enum JsonReply<T> {
    Ok(T),
    Status(reqwest::StatusCode, String),
}

impl SignedJsonClient {
    pub(crate) fn new(signer: SigV4Signer, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| crate::Error::Http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { http, signer })
    }

    pub(crate) async fn post<B, T>(&self, url: &str, body: &B) -> Result<JsonReply<T>>
    where
        B: Serialize + ?Sized,
        T: for<'de> Deserialize<'de>,
    {
        let url = Url::parse(url)
            .map_err(|e| crate::Error::InvalidConfig(format!("Invalid endpoint {}: {}", url, e)))?;
        let payload = serde_json::to_vec(body)?;

        let headers = self.signer.sign_headers(
            "POST",
            &url,
            &[("content-type", "application/json")],
            &payload,
            Utc::now(),
        )?;

        debug!("POST {}", url);

        let mut request = self
            .http
            .post(url.clone())
            .header("content-type", "application/json")
            .body(payload);
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| crate::Error::Http(format!("POST {} failed: {}", url, e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| crate::Error::Http(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Ok(JsonReply::Status(status, text));
        }

        Ok(JsonReply::Ok(serde_json::from_str(&text)?))
    }
}
