//! Scripted channel resolver and relay credential provider

use async_trait::async_trait;
use parking_lot::Mutex;
use remotemedia_kvs_webrtc::{
    ChannelDescriptor, ChannelResolver, Error, RelayCredentialProvider, RelayDescriptor, Result,
    Role,
};
use std::time::Duration;

/// Resolver answering every lookup with one scripted descriptor
pub struct FakeResolver {
    descriptor: Option<ChannelDescriptor>,
    delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<(String, Role)>>,
}

impl FakeResolver {
    /// Resolve every name to `channel_id`
    pub fn resolving_to(channel_id: &str) -> Self {
        Self {
            descriptor: Some(ChannelDescriptor {
                channel_id: channel_id.to_string(),
                signaling_endpoint: "wss://signaling.test".to_string(),
                https_endpoint: "https://api.signaling.test".to_string(),
            }),
            delay: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Report every channel as unknown
    pub fn unknown() -> Self {
        Self {
            descriptor: None,
            delay: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Stall each lookup by `delay`
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Lookups made so far
    pub fn calls(&self) -> Vec<(String, Role)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ChannelResolver for FakeResolver {
    async fn resolve(&self, channel_name: &str, role: Role) -> Result<Option<ChannelDescriptor>> {
        self.calls.lock().push((channel_name.to_string(), role));
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.descriptor.clone())
    }
}

/// Relay provider returning a scripted list or failing
pub struct FakeRelayProvider {
    relays: Vec<RelayDescriptor>,
    fail: bool,
    delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<(String, Option<String>)>>,
}

impl FakeRelayProvider {
    /// Return one TURN relay
    pub fn with_one_relay() -> Self {
        Self {
            relays: vec![RelayDescriptor {
                urls: vec!["turn:relay.test:443?transport=udp".to_string()],
                username: Some("user".to_string()),
                credential: Some("secret".to_string()),
                ttl: Some(Duration::from_secs(300)),
            }],
            fail: false,
            delay: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Fail every fetch
    pub fn failing() -> Self {
        Self {
            relays: Vec::new(),
            fail: true,
            delay: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Stall each fetch by `delay`
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Fetches made so far as (channel id, client id)
    pub fn calls(&self) -> Vec<(String, Option<String>)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl RelayCredentialProvider for FakeRelayProvider {
    async fn relay_servers(
        &self,
        channel: &ChannelDescriptor,
        client_id: Option<&str>,
    ) -> Result<Vec<RelayDescriptor>> {
        self.calls
            .lock()
            .push((channel.channel_id.clone(), client_id.map(str::to_string)));
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(Error::CredentialError("relay service unavailable".to_string()));
        }
        Ok(self.relays.clone())
    }
}
