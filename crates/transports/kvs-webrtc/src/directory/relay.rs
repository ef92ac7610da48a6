//! TURN relay credentials (`GetIceServerConfig`)

use super::resolver::SERVICE;
use super::{ChannelDescriptor, JsonReply, RelayCredentialProvider, RelayDescriptor, SignedJsonClient};
use crate::auth::SigV4Signer;
use crate::config::{EngineOptions, SessionConfig};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct IceServerConfigRequest<'a> {
    #[serde(rename = "ChannelARN")]
    channel_arn: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_id: Option<&'a str>,
    service: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct IceServerConfigResponse {
    #[serde(default)]
    ice_server_list: Vec<IceServer>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct IceServer {
    #[serde(default)]
    uris: Vec<String>,
    username: Option<String>,
    password: Option<String>,
    ttl: Option<u64>,
}

impl From<IceServer> for RelayDescriptor {
    fn from(server: IceServer) -> Self {
        Self {
            urls: server.uris,
            username: server.username,
            credential: server.password,
            ttl: server.ttl.map(Duration::from_secs),
        }
    }
}

/// Fetches TURN credentials from the channel's HTTPS endpoint
pub struct KvsRelayCredentialProvider {
    client: SignedJsonClient,
}

impl KvsRelayCredentialProvider {
    /// Create a provider for the session's region and credentials
    pub fn new(config: &SessionConfig, options: &EngineOptions) -> Result<Self> {
        let signer = SigV4Signer::new(config.credentials.clone(), &config.region, SERVICE);
        Ok(Self {
            client: SignedJsonClient::new(signer, options.http_timeout())?,
        })
    }
}

#[async_trait]
impl RelayCredentialProvider for KvsRelayCredentialProvider {
    #[instrument(skip(self, channel), fields(channel_id = %channel.channel_id))]
    async fn relay_servers(
        &self,
        channel: &ChannelDescriptor,
        client_id: Option<&str>,
    ) -> Result<Vec<RelayDescriptor>> {
        let url = format!(
            "{}/v1/get-ice-server-config",
            channel.https_endpoint.trim_end_matches('/')
        );
        let request = IceServerConfigRequest {
            channel_arn: &channel.channel_id,
            client_id,
            service: "TURN",
        };

        let body = match self
            .client
            .post::<_, IceServerConfigResponse>(&url, &request)
            .await?
        {
            JsonReply::Ok(body) => body,
            JsonReply::Status(status, body) => {
                return Err(Error::CredentialError(format!(
                    "get-ice-server-config returned {}: {}",
                    status, body
                )))
            }
        };

        let relays: Vec<RelayDescriptor> = body
            .ice_server_list
            .into_iter()
            .filter(|server| !server.uris.is_empty())
            .map(RelayDescriptor::from)
            .collect();

        debug!("Fetched {} relay server(s)", relays.len());

        Ok(relays)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credentials;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider() -> KvsRelayCredentialProvider {
        let config = SessionConfig::new("us-west-2", Credentials::new("AKID", "secret"), "demo");
        KvsRelayCredentialProvider::new(&config, &EngineOptions::default()).unwrap()
    }

    fn channel(https_endpoint: String) -> ChannelDescriptor {
        ChannelDescriptor {
            channel_id: "arn:aws:kinesisvideo:us-west-2:1:channel/demo/1".to_string(),
            signaling_endpoint: "wss://v-1.example".to_string(),
            https_endpoint,
        }
    }

    #[tokio::test]
    async fn test_fetch_relay_servers() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/get-ice-server-config"))
            .and(body_partial_json(serde_json::json!({
                "ChannelARN": "arn:aws:kinesisvideo:us-west-2:1:channel/demo/1",
                "ClientId": "viewer-1",
                "Service": "TURN"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "IceServerList": [
                    {
                        "Uris": ["turn:1.2.3.4:443?transport=udp", "turns:1.2.3.4:443?transport=tcp"],
                        "Username": "1700000000:channel",
                        "Password": "pw",
                        "Ttl": 300
                    },
                    { "Uris": [] }
                ]
            })))
            .mount(&mock_server)
            .await;

        let relays = provider()
            .relay_servers(&channel(mock_server.uri()), Some("viewer-1"))
            .await
            .unwrap();

        assert_eq!(relays.len(), 1);
        assert_eq!(relays[0].urls.len(), 2);
        assert_eq!(relays[0].username.as_deref(), Some("1700000000:channel"));
        assert_eq!(relays[0].credential.as_deref(), Some("pw"));
        assert_eq!(relays[0].ttl, Some(Duration::from_secs(300)));
    }

    #[tokio::test]
    async fn test_empty_list_is_valid() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/get-ice-server-config"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&mock_server)
            .await;

        let relays = provider()
            .relay_servers(&channel(mock_server.uri()), None)
            .await
            .unwrap();
        assert!(relays.is_empty());
    }

    #[tokio::test]
    async fn test_server_error_is_credential_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/get-ice-server-config"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let err = provider()
            .relay_servers(&channel(mock_server.uri()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CredentialError(_)));
    }
}
