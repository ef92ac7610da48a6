//! Negotiation engine test harness
//!
//! Provides scripted stand-ins for every collaborator the engine talks to:
//! - `FakeResolver` / `FakeRelayProvider` for the control plane
//! - `FakeConnector` whose channels the test drives as the relay
//! - `FakeTransportFactory` recording every transport call
//!
//! Basic usage pattern:
//!
//! 1. Create a `Harness` and tweak the fakes
//! 2. Build an engine with `harness.engine(role)`
//! 3. Drive the relay / transport through `RelayEnd` and `TransportEnd`
//! 4. Assert on recorded calls and observed events

#![allow(dead_code)]

pub mod directory;
pub mod signaling;
pub mod transport;

use parking_lot::Mutex;
use remotemedia_kvs_webrtc::{
    ConnectionState, Credentials, EngineOptions, EngineState, Error, NegotiationEngine,
    RemoteMedia, Role, SessionConfig,
};
use std::sync::Arc;
use std::time::Duration;

pub use directory::{FakeRelayProvider, FakeResolver};
pub use signaling::{FakeConnector, RelayEnd};
pub use transport::{FakeTransportFactory, TransportCall, TransportEnd};

/// How long `wait_until` polls before giving up
const WAIT_LIMIT: Duration = Duration::from_secs(3);

/// The four fakes wired into an engine
pub struct Harness {
    pub resolver: Arc<FakeResolver>,
    pub relays: Arc<FakeRelayProvider>,
    pub connector: Arc<FakeConnector>,
    pub transports: Arc<FakeTransportFactory>,
}

impl Harness {
    /// Channel "demo" resolving to "chan-1", one relay, auto-opening signaling
    pub fn new() -> Self {
        Self {
            resolver: Arc::new(FakeResolver::resolving_to("chan-1")),
            relays: Arc::new(FakeRelayProvider::with_one_relay()),
            connector: Arc::new(FakeConnector::new()),
            transports: Arc::new(FakeTransportFactory::new()),
        }
    }

    pub fn with_resolver(mut self, resolver: FakeResolver) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    pub fn with_relays(mut self, relays: FakeRelayProvider) -> Self {
        self.relays = Arc::new(relays);
        self
    }

    pub fn with_connector(mut self, connector: FakeConnector) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    /// Engine for `role` with default options
    pub fn engine(&self, role: Role) -> NegotiationEngine {
        self.engine_with_options(role, EngineOptions::default())
    }

    /// Engine for `role` with `options`
    pub fn engine_with_options(&self, role: Role, options: EngineOptions) -> NegotiationEngine {
        let config = SessionConfig::new("us-west-2", Credentials::new("AKID", "secret"), "demo");
        NegotiationEngine::builder(config, role)
            .with_options(options)
            .with_resolver(self.resolver.clone())
            .with_relay_provider(self.relays.clone())
            .with_signaling_connector(self.connector.clone())
            .with_transport_factory(self.transports.clone())
            .build()
            .expect("harness engine should build")
    }

    /// Most recently opened signaling channel
    pub fn relay(&self) -> RelayEnd {
        self.connector.last().expect("no signaling channel opened")
    }

    /// Most recently created transport session
    pub fn transport(&self) -> TransportEnd {
        self.transports.last().expect("no transport session created")
    }
}

/// Everything the engine reported through its observers
#[derive(Default)]
pub struct Recorder {
    pub states: Mutex<Vec<EngineState>>,
    pub connection_states: Mutex<Vec<ConnectionState>>,
    pub errors: Mutex<Vec<String>>,
    pub media: Mutex<Vec<Arc<RemoteMedia>>>,
}

impl Recorder {
    /// Register on every observer slot of `engine`
    pub fn attach(engine: &NegotiationEngine) -> Arc<Self> {
        let recorder = Arc::new(Self::default());

        let r = Arc::clone(&recorder);
        engine.on_state_change(move |state| r.states.lock().push(state));
        let r = Arc::clone(&recorder);
        engine.on_connection_state(move |state| r.connection_states.lock().push(state));
        let r = Arc::clone(&recorder);
        engine.on_error(move |e: &Error| r.errors.lock().push(e.to_string()));
        let r = Arc::clone(&recorder);
        engine.on_remote_media(move |media| r.media.lock().push(media));

        recorder
    }

    pub fn states(&self) -> Vec<EngineState> {
        self.states.lock().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }
}

/// Poll `condition` until it holds; panics after a few seconds
pub async fn wait_until<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Give the attempt task a chance to drain queued events
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
