//! One connection attempt, from channel resolution to teardown
//!
//! An attempt runs on its own task. The task owns the transport session,
//! the signaling channel and the candidate buffer, so every handler runs
//! serialized on it. The engine only keeps a cancel signal and the join
//! handle.

use super::strategy::{self, RoleStrategy};
use super::{EngineState, Seams, Shared};
use crate::config::{EngineOptions, Role};
use crate::directory::ChannelDescriptor;
use crate::negotiation::candidates::PendingCandidates;
use crate::observer::RemoteMedia;
use crate::signaling::{
    IceCandidate, OutboundMessage, SignalingChannel, SignalingEvent, SignalingEvents,
    SignalingRequest,
};
use crate::transport::{
    ConnectionState, IceConfiguration, LocalTrack, TransportEvent, TransportEvents,
    TransportSession,
};
use crate::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Everything an attempt task needs, moved in at spawn
pub(crate) struct AttemptSetup {
    pub number: u64,
    pub channel_name: String,
    pub region: String,
    pub role: Role,
    pub options: EngineOptions,
    pub tracks: Vec<LocalTrack>,
    pub seams: Seams,
    pub shared: Arc<Shared>,
    pub cancel: watch::Receiver<bool>,
    pub started: Instant,
}

/// Resources of an established attempt, handed to the role strategy
pub(crate) struct AttemptContext {
    pub transport: Arc<dyn TransportSession>,
    channel: Box<dyn SignalingChannel>,
    candidates: PendingCandidates,
    protocol_errors: u32,
    max_protocol_errors: u32,
    connected: bool,
    signaling_live: bool,
}

impl AttemptContext {
    /// Send through the signaling channel
    pub async fn send(&self, message: OutboundMessage, recipient: Option<&str>) -> Result<()> {
        self.channel.send(message, recipient).await
    }

    /// Count a dropped message; fails once the tolerance is exceeded
    /// while still negotiating
    pub fn protocol_error(&mut self, error: Error) -> Result<()> {
        self.protocol_errors += 1;
        warn!(
            count = self.protocol_errors,
            "Dropping signaling message: {}", error
        );
        if self.protocol_errors > self.max_protocol_errors && !self.connected {
            return Err(error);
        }
        Ok(())
    }

    /// The relay went away after the media path came up; stop using it
    fn signaling_lost(&mut self, error: Error) {
        warn!("Signaling channel lost while connected: {}", error);
        self.signaling_live = false;
    }

    /// Buffer or apply a remote candidate
    pub async fn remote_candidate(
        &mut self,
        candidate: IceCandidate,
        sender: Option<String>,
    ) -> Result<()> {
        match self.candidates.push(candidate, sender) {
            None => {
                debug!(pending = self.candidates.len(), "Buffered remote candidate");
                Ok(())
            }
            Some((candidate, _)) => self.apply_candidate(candidate).await,
        }
    }

    /// Apply every buffered candidate, skipping ones not sent by `remote`
    pub async fn flush_candidates(&mut self, remote: Option<&str>) -> Result<()> {
        let pending = self.candidates.flush();
        debug!("Applying {} buffered candidate(s)", pending.len());

        for (candidate, sender) in pending {
            if let (Some(remote), Some(sender)) = (remote, sender.as_deref()) {
                if remote != sender {
                    debug!("Discarding buffered candidate from {}", sender);
                    continue;
                }
            }
            self.apply_candidate(candidate).await?;
        }
        Ok(())
    }

    async fn apply_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        self.transport
            .add_ice_candidate(candidate)
            .await
            .map_err(|e| Error::NegotiationError(format!("Remote candidate rejected: {}", e)))
    }

    /// Release everything this attempt owns
    async fn teardown(mut self) {
        if let Err(e) = self.transport.close().await {
            warn!("Error closing transport: {}", e);
        }
        self.channel.close().await;
        self.candidates.clear();
        debug!("Attempt resources released");
    }
}

/// Races attempt steps against cancellation and the signaling deadline
struct StepGuard {
    cancel: watch::Receiver<bool>,
    deadline: Instant,
    timeout: Duration,
}

impl StepGuard {
    fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    async fn step<F: Future>(&mut self, fut: F) -> Result<F::Output> {
        tokio::select! {
            biased;
            _ = cancelled(&mut self.cancel) => Err(Error::Cancelled),
            _ = tokio::time::sleep_until(self.deadline) => {
                Err(Error::SignalingTimeoutError(self.timeout))
            }
            out = fut => Ok(out),
        }
    }
}

/// Resolves once the engine has signaled cancellation
pub(crate) async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            return;
        }
    }
}

struct Established {
    ctx: AttemptContext,
    signaling: SignalingEvents,
    transport_events: TransportEvents,
}

/// Run an attempt to completion
///
/// `ready` receives the outcome of the connect phase: `Ok` once the
/// signaling channel is open and the role's opening move (the
/// subscriber's offer) has been sent.
pub(crate) async fn run(mut setup: AttemptSetup, ready: oneshot::Sender<Result<()>>) {
    // Held until teardown finishes so a follow-up attempt never overlaps
    // this one's transport or channel
    let _slot = Arc::clone(&setup.shared.slot).lock_owned().await;

    let number = setup.number;
    let shared = Arc::clone(&setup.shared);
    shared.announce(number);

    let timeout = setup.options.signaling_timeout();
    let mut guard = StepGuard {
        cancel: setup.cancel.clone(),
        deadline: setup.started + timeout,
        timeout,
    };

    let tracks = std::mem::take(&mut setup.tracks);
    let Established {
        mut ctx,
        signaling,
        transport_events,
    } = match establish(&mut guard, &setup, tracks).await {
        Ok(established) => established,
        Err(e) => {
            shared.detach_transport(number);
            if !matches!(e, Error::Cancelled) {
                warn!("Connection attempt failed: {}", e);
                shared.fail(number, &e);
            }
            let _ = ready.send(Err(e));
            return;
        }
    };

    let mut strategy = strategy::for_role(setup.role);
    if let Err(e) = strategy.on_open(&mut ctx).await {
        ctx.teardown().await;
        shared.detach_transport(number);
        warn!("Connection attempt failed: {}", e);
        shared.fail(number, &e);
        let _ = ready.send(Err(e));
        return;
    }

    let _ = ready.send(Ok(()));

    let reason = drive(
        number,
        &shared,
        &mut ctx,
        strategy.as_mut(),
        signaling,
        transport_events,
        setup.cancel.clone(),
    )
    .await;

    ctx.teardown().await;
    shared.detach_transport(number);

    match reason {
        Error::Cancelled => info!("Attempt closed"),
        e => {
            warn!("Attempt ended: {}", e);
            shared.fail(number, &e);
        }
    }
}

async fn establish(
    guard: &mut StepGuard,
    setup: &AttemptSetup,
    tracks: Vec<LocalTrack>,
) -> Result<Established> {
    let AttemptSetup {
        number,
        channel_name,
        role,
        options,
        seams,
        shared,
        ..
    } = setup;
    let (number, role) = (*number, *role);

    let channel = match guard.step(seams.resolver.resolve(channel_name, role)).await? {
        Ok(Some(channel)) => channel,
        Ok(None) => {
            return Err(Error::ResolutionError(format!(
                "No signaling channel named {}",
                channel_name
            )))
        }
        Err(Error::ResolutionError(msg)) => return Err(Error::ResolutionError(msg)),
        Err(e) => return Err(Error::ResolutionError(e.to_string())),
    };
    info!("Resolved channel {}", channel.channel_id);

    let client_id = match role {
        Role::Subscriber => Some(uuid::Uuid::new_v4().to_string()),
        Role::Publisher => None,
    };

    // Relays are optional; a slow fetch must leave time to open signaling
    let budget = guard.remaining().min(options.http_timeout()) / 2;
    let fetch = tokio::time::timeout(
        budget,
        seams
            .relay_provider
            .relay_servers(&channel, client_id.as_deref()),
    );
    let relays = match guard.step(fetch).await? {
        Ok(Ok(relays)) => relays,
        Ok(Err(e)) => {
            warn!("Proceeding without relay servers: {}", e);
            Vec::new()
        }
        Err(_) => {
            warn!(
                "Proceeding without relay servers: no response within {:?}",
                budget
            );
            Vec::new()
        }
    };

    if !shared.transition(number, EngineState::Negotiating) {
        return Err(Error::Cancelled);
    }

    let ice = IceConfiguration {
        stun_servers: options.stun_servers(&setup.region),
        relays,
    };
    let (transport, transport_events) = seams.transport_factory.create(ice).await?;

    if !shared.attach_transport(number, Arc::clone(&transport)) {
        close_transport(&transport).await;
        return Err(Error::Cancelled);
    }

    let opened = open_signaling(guard, &*transport, tracks, &channel, role, client_id, seams).await;
    let (channel, signaling) = match opened {
        Ok(opened) => opened,
        Err(e) => {
            close_transport(&transport).await;
            return Err(e);
        }
    };

    if !shared.is_current(number) {
        close_transport(&transport).await;
        channel.close().await;
        return Err(Error::Cancelled);
    }

    info!("Signaling channel open");

    Ok(Established {
        ctx: AttemptContext {
            transport,
            channel,
            candidates: PendingCandidates::new(),
            protocol_errors: 0,
            max_protocol_errors: options.max_protocol_errors,
            connected: false,
            signaling_live: true,
        },
        signaling,
        transport_events,
    })
}

async fn open_signaling(
    guard: &mut StepGuard,
    transport: &dyn TransportSession,
    tracks: Vec<LocalTrack>,
    descriptor: &ChannelDescriptor,
    role: Role,
    client_id: Option<String>,
    seams: &Seams,
) -> Result<(Box<dyn SignalingChannel>, SignalingEvents)> {
    for track in tracks {
        transport.add_track(track).await?;
    }

    let request = SignalingRequest {
        endpoint: descriptor.signaling_endpoint.clone(),
        channel_id: descriptor.channel_id.clone(),
        role,
        client_id,
    };

    let (channel, mut events) = guard.step(seams.connector.open(request)).await??;

    let first = match guard.step(events.recv()).await {
        Ok(first) => first,
        Err(e) => {
            channel.close().await;
            return Err(e);
        }
    };

    let error = match first {
        Some(SignalingEvent::Open) => return Ok((channel, events)),
        Some(SignalingEvent::Error(e)) => e,
        Some(other) => Error::Signaling(format!("Unexpected event before open: {:?}", other)),
        None => Error::Signaling("Signaling channel closed before opening".to_string()),
    };

    channel.close().await;
    Err(error)
}

async fn close_transport(transport: &Arc<dyn TransportSession>) {
    if let Err(e) = transport.close().await {
        warn!("Error closing transport: {}", e);
    }
}

/// Event loop; returns why the attempt ended
async fn drive(
    number: u64,
    shared: &Shared,
    ctx: &mut AttemptContext,
    strategy: &mut dyn RoleStrategy,
    mut signaling: SignalingEvents,
    mut transport_events: TransportEvents,
    mut cancel: watch::Receiver<bool>,
) -> Error {
    let media = Arc::new(RemoteMedia::new());

    loop {
        let signaling_live = ctx.signaling_live;
        let result = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => return Error::Cancelled,
            event = signaling.recv(), if signaling_live => match event {
                Some(event) => on_signaling(number, shared, ctx, strategy, event).await,
                None => Err(Error::Signaling("Signaling channel closed".to_string())),
            },
            Some(event) = transport_events.recv() => {
                on_transport(number, shared, ctx, strategy, &media, event).await
            }
        };

        match result {
            Ok(()) => {}
            Err(e @ Error::SignalingProtocolError(_)) => {
                if let Err(e) = ctx.protocol_error(e) {
                    return e;
                }
            }
            Err(e @ Error::Signaling(_)) if ctx.connected => ctx.signaling_lost(e),
            Err(e) => return e,
        }
    }
}

async fn on_signaling(
    number: u64,
    shared: &Shared,
    ctx: &mut AttemptContext,
    strategy: &mut dyn RoleStrategy,
    event: SignalingEvent,
) -> Result<()> {
    match event {
        SignalingEvent::Open => {
            debug!("Ignoring repeated open");
            Ok(())
        }
        SignalingEvent::SdpOffer {
            description,
            sender,
        } => {
            strategy.on_offer(ctx, description, sender).await?;
            shared.set_remote_client_id(number, strategy.remote_client_id());
            Ok(())
        }
        SignalingEvent::SdpAnswer {
            description,
            sender,
        } => strategy.on_answer(ctx, description, sender).await,
        SignalingEvent::IceCandidate { candidate, sender } => {
            if !strategy.accepts_candidate_from(sender.as_deref()) {
                debug!(
                    "Dropping candidate from {}",
                    sender.as_deref().unwrap_or("-")
                );
                return Ok(());
            }
            ctx.remote_candidate(candidate, sender).await
        }
        SignalingEvent::Error(e) => Err(e),
        SignalingEvent::Close { reason } => Err(Error::Signaling(format!(
            "Signaling channel closed: {}",
            reason.as_deref().unwrap_or("no reason given")
        ))),
    }
}

async fn on_transport(
    number: u64,
    shared: &Shared,
    ctx: &mut AttemptContext,
    strategy: &dyn RoleStrategy,
    media: &Arc<RemoteMedia>,
    event: TransportEvent,
) -> Result<()> {
    match event {
        TransportEvent::LocalCandidate(_) if !ctx.signaling_live => {
            debug!("Signaling gone; not sending local candidate");
            Ok(())
        }
        TransportEvent::LocalCandidate(candidate) => {
            ctx.send(
                OutboundMessage::Candidate(candidate),
                strategy.remote_client_id(),
            )
            .await
        }
        TransportEvent::StateChanged(state) => {
            info!("Transport state: {}", state);
            shared.observers.connection_state(state);
            match state {
                ConnectionState::Connected => {
                    ctx.connected = true;
                    shared.transition(number, EngineState::Connected);
                    Ok(())
                }
                ConnectionState::Failed
                | ConnectionState::Disconnected
                | ConnectionState::Closed => Err(Error::TransportFailure(state)),
                ConnectionState::New | ConnectionState::Connecting => Ok(()),
            }
        }
        TransportEvent::Track(track) => {
            info!("Remote {:?} track {}", track.kind, track.id);
            media.push(track);
            shared.observers.remote_media(Arc::clone(media));
            Ok(())
        }
    }
}
