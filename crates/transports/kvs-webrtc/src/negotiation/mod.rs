//! Negotiation engine
//!
//! Turns a channel name and credentials into a live peer connection:
//! resolves the channel, fetches relay credentials, opens the signaling
//! channel and drives offer/answer/candidate exchange for its role.
//!
//! ```text
//! IDLE → RESOLVING → NEGOTIATING → CONNECTED → CLOSED
//!            └───────────┴─────────────┴──→ FAILED
//! ```
//!
//! Each `connect` is one attempt running on its own task (see
//! [`session`]); `disconnect` cancels it and waits for teardown.

pub mod candidates;
pub(crate) mod session;
pub(crate) mod strategy;

use crate::config::{EngineOptions, Role, SessionConfig};
use crate::directory::{
    ChannelResolver, KvsChannelResolver, KvsRelayCredentialProvider, RelayCredentialProvider,
};
use crate::observer::{Observers, RemoteMedia};
use crate::signaling::{SignalingConnector, WebSocketSignalingConnector};
use crate::transport::{
    ConnectionState, LocalTrack, TransportFactory, TransportSession, TransportStats,
    WebRtcTransportFactory,
};
use crate::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, instrument, warn, Instrument};

pub use candidates::PendingCandidates;

/// Engine lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    /// Constructed, never connected
    Idle,
    /// Looking up the channel and relay credentials
    Resolving,
    /// Transport built, exchanging offer/answer/candidates
    Negotiating,
    /// Transport reported `connected`
    Connected,
    /// Disconnected by the caller
    Closed,
    /// Attempt ended with a fatal error
    Failed,
}

impl EngineState {
    /// Whether a new `connect` may start from this state
    pub fn can_connect(&self) -> bool {
        matches!(
            self,
            EngineState::Idle | EngineState::Closed | EngineState::Failed
        )
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineState::Idle => "IDLE",
            EngineState::Resolving => "RESOLVING",
            EngineState::Negotiating => "NEGOTIATING",
            EngineState::Connected => "CONNECTED",
            EngineState::Closed => "CLOSED",
            EngineState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Collaborators an attempt calls out to
#[derive(Clone)]
pub(crate) struct Seams {
    pub resolver: Arc<dyn ChannelResolver>,
    pub relay_provider: Arc<dyn RelayCredentialProvider>,
    pub connector: Arc<dyn SignalingConnector>,
    pub transport_factory: Arc<dyn TransportFactory>,
}

struct Inner {
    state: EngineState,
    attempt: u64,
    cancel: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
    transport: Option<Arc<dyn TransportSession>>,
    remote_client_id: Option<String>,
}

/// State shared between the engine handle and its attempt task
///
/// The lock is never held across an `.await` or while an observer runs.
pub(crate) struct Shared {
    inner: Mutex<Inner>,
    pub(crate) observers: Observers,
    /// Held by the attempt task from start to end of teardown
    pub(crate) slot: Arc<tokio::sync::Mutex<()>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: EngineState::Idle,
                attempt: 0,
                cancel: None,
                task: None,
                transport: None,
                remote_client_id: None,
            }),
            observers: Observers::default(),
            slot: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    fn current(inner: &Inner, attempt: u64) -> bool {
        inner.attempt == attempt && inner.state != EngineState::Closed
    }

    /// Whether `attempt` is still the live attempt
    pub(crate) fn is_current(&self, attempt: u64) -> bool {
        Self::current(&self.inner.lock(), attempt)
    }

    /// Report the `RESOLVING` state the attempt started in
    pub(crate) fn announce(&self, attempt: u64) {
        let state = {
            let inner = self.inner.lock();
            if !Self::current(&inner, attempt) {
                return;
            }
            inner.state
        };
        info!("Engine state: {}", state);
        self.observers.state_change(state);
    }

    /// Move the live attempt to `to`; false if the attempt is stale
    pub(crate) fn transition(&self, attempt: u64, to: EngineState) -> bool {
        {
            let mut inner = self.inner.lock();
            if !Self::current(&inner, attempt) {
                return false;
            }
            if inner.state == to {
                return true;
            }
            inner.state = to;
        }
        info!("Engine state: {}", to);
        self.observers.state_change(to);
        true
    }

    /// Fail the live attempt and report `error`
    pub(crate) fn fail(&self, attempt: u64, error: &Error) {
        {
            let mut inner = self.inner.lock();
            if !Self::current(&inner, attempt) || inner.state == EngineState::Failed {
                return;
            }
            inner.state = EngineState::Failed;
            inner.remote_client_id = None;
        }
        info!("Engine state: {}", EngineState::Failed);
        self.observers.state_change(EngineState::Failed);
        self.observers.error(error);
    }

    pub(crate) fn attach_transport(&self, attempt: u64, transport: Arc<dyn TransportSession>) -> bool {
        let mut inner = self.inner.lock();
        if !Self::current(&inner, attempt) {
            return false;
        }
        inner.transport = Some(transport);
        true
    }

    pub(crate) fn detach_transport(&self, attempt: u64) {
        let mut inner = self.inner.lock();
        if inner.attempt == attempt {
            inner.transport = None;
        }
    }

    pub(crate) fn set_remote_client_id(&self, attempt: u64, remote: Option<&str>) {
        let mut inner = self.inner.lock();
        if Self::current(&inner, attempt) {
            inner.remote_client_id = remote.map(str::to_string);
        }
    }
}

/// Drives one peer connection for a fixed role
///
/// # Example
///
/// ```no_run
/// use remotemedia_kvs_webrtc::{Credentials, EngineOptions, NegotiationEngine, Role, SessionConfig};
///
/// # async fn example() -> remotemedia_kvs_webrtc::Result<()> {
/// let config = SessionConfig::new("us-west-2", Credentials::from_env()?, "demo");
/// let engine = NegotiationEngine::kvs(config, Role::Subscriber, EngineOptions::default())?;
///
/// engine.on_connection_state(|state| println!("transport {}", state));
/// engine.connect(Vec::new()).await?;
/// # Ok(())
/// # }
/// ```
pub struct NegotiationEngine {
    config: SessionConfig,
    role: Role,
    options: EngineOptions,
    seams: Seams,
    shared: Arc<Shared>,
}

impl NegotiationEngine {
    /// Engine wired to the KVS control plane, WebSocket signaling and
    /// webrtc-rs
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if the config or options do not
    /// validate.
    pub fn kvs(config: SessionConfig, role: Role, options: EngineOptions) -> Result<Self> {
        Self::builder(config, role).with_options(options).build()
    }

    /// Builder for substituting individual collaborators
    pub fn builder(config: SessionConfig, role: Role) -> NegotiationEngineBuilder {
        NegotiationEngineBuilder {
            config,
            role,
            options: EngineOptions::default(),
            resolver: None,
            relay_provider: None,
            connector: None,
            transport_factory: None,
        }
    }

    /// Role fixed at construction
    pub fn role(&self) -> Role {
        self.role
    }

    /// Session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Engine options
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Current lifecycle state
    pub fn state(&self) -> EngineState {
        self.shared.inner.lock().state
    }

    /// Remote participant being negotiated with (publisher only)
    pub fn remote_client_id(&self) -> Option<String> {
        self.shared.inner.lock().remote_client_id.clone()
    }

    /// Receive the inbound media aggregate; replaces any earlier callback
    pub fn on_remote_media<F>(&self, callback: F)
    where
        F: Fn(Arc<RemoteMedia>) + Send + Sync + 'static,
    {
        self.shared.observers.set_remote_media(Arc::new(callback));
    }

    /// Receive transport state changes; replaces any earlier callback
    pub fn on_connection_state<F>(&self, callback: F)
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.shared.observers.set_connection_state(Arc::new(callback));
    }

    /// Receive fatal errors; replaces any earlier callback
    pub fn on_error<F>(&self, callback: F)
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.shared.observers.set_error(Arc::new(callback));
    }

    /// Receive engine lifecycle transitions; replaces any earlier callback
    pub fn on_state_change<F>(&self, callback: F)
    where
        F: Fn(EngineState) + Send + Sync + 'static,
    {
        self.shared.observers.set_state_change(Arc::new(callback));
    }

    /// Start a connection attempt with `tracks` as outbound media
    ///
    /// Returns once the signaling channel is open and negotiation is under
    /// way; later progress is reported through the observers and
    /// [`state`](Self::state). The engine detaches `tracks` on teardown but
    /// never stops them. If a previous attempt is still tearing down, the
    /// new one starts once it has released its transport and channel.
    ///
    /// # Errors
    ///
    /// - `Error::AlreadyConnecting` / `Error::AlreadyConnected` if an
    ///   attempt is live (the live attempt is left untouched)
    /// - `Error::Cancelled` if `disconnect` interrupts the attempt
    /// - any fatal error that failed the attempt (also sent to `on_error`)
    #[instrument(skip(self, tracks), fields(channel = %self.config.channel_name, role = %self.role))]
    pub async fn connect(&self, tracks: Vec<LocalTrack>) -> Result<()> {
        let ready = {
            let mut inner = self.shared.inner.lock();
            match inner.state {
                EngineState::Resolving | EngineState::Negotiating => {
                    return Err(Error::AlreadyConnecting)
                }
                EngineState::Connected => return Err(Error::AlreadyConnected),
                EngineState::Idle | EngineState::Closed | EngineState::Failed => {}
            }

            inner.attempt += 1;
            let number = inner.attempt;
            let (cancel_tx, cancel_rx) = watch::channel(false);
            let (ready_tx, ready_rx) = oneshot::channel();

            let setup = session::AttemptSetup {
                number,
                channel_name: self.config.channel_name.clone(),
                region: self.config.region.clone(),
                role: self.role,
                options: self.options.clone(),
                tracks,
                seams: self.seams.clone(),
                shared: Arc::clone(&self.shared),
                cancel: cancel_rx,
                started: tokio::time::Instant::now(),
            };

            let span = info_span!(
                "attempt",
                channel = %self.config.channel_name,
                role = %self.role,
                attempt = number
            );

            inner.state = EngineState::Resolving;
            inner.remote_client_id = None;
            inner.cancel = Some(cancel_tx);
            inner.task = Some(tokio::spawn(
                session::run(setup, ready_tx).instrument(span),
            ));

            debug!("Started attempt {}", number);
            ready_rx
        };

        ready.await.unwrap_or(Err(Error::Cancelled))
    }

    /// Tear down the current attempt, if any, and move to `CLOSED`
    ///
    /// Idempotent and safe in any state. Waits until the attempt's
    /// resources are released.
    pub async fn disconnect(&self) {
        let (task, changed) = {
            let mut inner = self.shared.inner.lock();
            if let Some(cancel) = inner.cancel.take() {
                let _ = cancel.send(true);
            }
            let changed = inner.state != EngineState::Closed;
            inner.state = EngineState::Closed;
            inner.remote_client_id = None;
            (inner.task.take(), changed)
        };

        if changed {
            info!("Engine state: {}", EngineState::Closed);
            self.shared.observers.state_change(EngineState::Closed);
        }

        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Attempt task ended abnormally: {}", e);
            }
        }
    }

    /// Statistics of the live transport session; `None` without one
    pub async fn stats(&self) -> Option<TransportStats> {
        let transport = self.shared.inner.lock().transport.clone()?;
        match transport.stats().await {
            Ok(stats) => Some(stats),
            Err(e) => {
                debug!("Failed to collect stats: {}", e);
                None
            }
        }
    }
}

impl Drop for NegotiationEngine {
    fn drop(&mut self) {
        if let Some(cancel) = self.shared.inner.lock().cancel.take() {
            let _ = cancel.send(true);
        }
    }
}

/// Builder for [`NegotiationEngine`]
///
/// Collaborators not supplied default to the KVS / webrtc-rs
/// implementations.
pub struct NegotiationEngineBuilder {
    config: SessionConfig,
    role: Role,
    options: EngineOptions,
    resolver: Option<Arc<dyn ChannelResolver>>,
    relay_provider: Option<Arc<dyn RelayCredentialProvider>>,
    connector: Option<Arc<dyn SignalingConnector>>,
    transport_factory: Option<Arc<dyn TransportFactory>>,
}

impl NegotiationEngineBuilder {
    /// Set engine options
    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// Use a custom channel resolver
    pub fn with_resolver(mut self, resolver: Arc<dyn ChannelResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Use a custom relay credential provider
    pub fn with_relay_provider(mut self, provider: Arc<dyn RelayCredentialProvider>) -> Self {
        self.relay_provider = Some(provider);
        self
    }

    /// Use a custom signaling connector
    pub fn with_signaling_connector(mut self, connector: Arc<dyn SignalingConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Use a custom transport factory
    pub fn with_transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.transport_factory = Some(factory);
        self
    }

    /// Validate configuration and build the engine
    pub fn build(self) -> Result<NegotiationEngine> {
        self.config.validate()?;
        self.options.validate()?;

        let resolver: Arc<dyn ChannelResolver> = match self.resolver {
            Some(resolver) => resolver,
            None => Arc::new(KvsChannelResolver::new(&self.config, &self.options)?),
        };
        let relay_provider: Arc<dyn RelayCredentialProvider> = match self.relay_provider {
            Some(provider) => provider,
            None => Arc::new(KvsRelayCredentialProvider::new(&self.config, &self.options)?),
        };
        let connector: Arc<dyn SignalingConnector> = match self.connector {
            Some(connector) => connector,
            None => Arc::new(WebSocketSignalingConnector::new(&self.config)),
        };
        let transport_factory: Arc<dyn TransportFactory> = match self.transport_factory {
            Some(factory) => factory,
            None => Arc::new(WebRtcTransportFactory::new()),
        };

        info!(
            "Created {} engine for channel {} in {}",
            self.role, self.config.channel_name, self.config.region
        );

        Ok(NegotiationEngine {
            config: self.config,
            role: self.role,
            options: self.options,
            seams: Seams {
                resolver,
                relay_provider,
                connector,
                transport_factory,
            },
            shared: Arc::new(Shared::new()),
        })
    }
}
