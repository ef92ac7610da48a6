//! Channel name → ARN → role-specific endpoints

use super::{ChannelDescriptor, ChannelResolver, JsonReply, SignedJsonClient};
use crate::auth::SigV4Signer;
use crate::config::{EngineOptions, Role, SessionConfig};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

/// Service name used in the SigV4 credential scope
pub(crate) const SERVICE: &str = "kinesisvideo";

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeChannelRequest<'a> {
    channel_name: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeChannelResponse {
    channel_info: Option<ChannelInfo>,
}

#[derive(Deserialize)]
struct ChannelInfo {
    #[serde(rename = "ChannelARN")]
    channel_arn: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct EndpointRequest<'a> {
    #[serde(rename = "ChannelARN")]
    channel_arn: &'a str,
    single_master_channel_endpoint_configuration: EndpointConfiguration<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct EndpointConfiguration<'a> {
    protocols: [&'a str; 2],
    role: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EndpointResponse {
    #[serde(default)]
    resource_endpoint_list: Vec<ResourceEndpoint>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ResourceEndpoint {
    protocol: String,
    resource_endpoint: String,
}

/// Resolves channels through the KVS control plane
pub struct KvsChannelResolver {
    client: SignedJsonClient,
    endpoint: String,
}

impl KvsChannelResolver {
    /// Create a resolver for the session's region and credentials
    pub fn new(config: &SessionConfig, options: &EngineOptions) -> Result<Self> {
        let signer = SigV4Signer::new(config.credentials.clone(), &config.region, SERVICE);
        Ok(Self {
            client: SignedJsonClient::new(signer, options.http_timeout())?,
            endpoint: options.control_plane_endpoint(&config.region),
        })
    }

    async fn describe_channel(&self, channel_name: &str) -> Result<Option<String>> {
        let url = format!("{}/describeSignalingChannel", self.endpoint);
        let reply: JsonReply<DescribeChannelResponse> = self
            .client
            .post(&url, &DescribeChannelRequest { channel_name })
            .await?;

        match reply {
            JsonReply::Ok(body) => Ok(body
                .channel_info
                .and_then(|info| info.channel_arn)
                .filter(|arn| !arn.is_empty())),
            JsonReply::Status(status, _) if status == reqwest::StatusCode::NOT_FOUND => {
                debug!("Channel {} does not exist", channel_name);
                Ok(None)
            }
            JsonReply::Status(status, body) => Err(Error::Http(format!(
                "describeSignalingChannel returned {}: {}",
                status, body
            ))),
        }
    }

    async fn channel_endpoints(&self, channel_arn: &str, role: Role) -> Result<(String, String)> {
        let url = format!("{}/getSignalingChannelEndpoint", self.endpoint);
        let request = EndpointRequest {
            channel_arn,
            single_master_channel_endpoint_configuration: EndpointConfiguration {
                protocols: ["WSS", "HTTPS"],
                role: role.as_wire_str(),
            },
        };

        let body = match self.client.post::<_, EndpointResponse>(&url, &request).await? {
            JsonReply::Ok(body) => body,
            JsonReply::Status(status, body) => {
                return Err(Error::Http(format!(
                    "getSignalingChannelEndpoint returned {}: {}",
                    status, body
                )))
            }
        };

        let find = |protocol: &str| {
            body.resource_endpoint_list
                .iter()
                .find(|e| e.protocol.eq_ignore_ascii_case(protocol))
                .map(|e| e.resource_endpoint.clone())
        };

        let wss = find("WSS").ok_or_else(|| {
            Error::ResolutionError(format!("No WSS endpoint for channel {}", channel_arn))
        })?;
        let https = find("HTTPS").ok_or_else(|| {
            Error::ResolutionError(format!("No HTTPS endpoint for channel {}", channel_arn))
        })?;

        Ok((wss, https))
    }
}

#[async_trait]
impl ChannelResolver for KvsChannelResolver {
    #[instrument(skip(self))]
    async fn resolve(&self, channel_name: &str, role: Role) -> Result<Option<ChannelDescriptor>> {
        let Some(channel_id) = self.describe_channel(channel_name).await? else {
            return Ok(None);
        };

        let (signaling_endpoint, https_endpoint) =
            self.channel_endpoints(&channel_id, role).await?;

        info!(
            "Resolved channel {} -> {} (signaling: {})",
            channel_name, channel_id, signaling_endpoint
        );

        Ok(Some(ChannelDescriptor {
            channel_id,
            signaling_endpoint,
            https_endpoint,
        }))
    }
}
