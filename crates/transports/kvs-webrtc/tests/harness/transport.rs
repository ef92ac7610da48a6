//! Recording transport session
//!
//! Records every call in order and lets the test raise transport events
//! (local candidates, state changes, remote tracks).

use async_trait::async_trait;
use parking_lot::Mutex;
use remotemedia_kvs_webrtc::signaling::SdpType;
use remotemedia_kvs_webrtc::transport::{IceConfiguration, TransportEvent, TransportEvents};
use remotemedia_kvs_webrtc::{
    ConnectionState, Error, IceCandidate, InboundTrack, LocalTrack, MediaKind, Result,
    SessionDescription, TransportFactory, TransportSession, TransportStats,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Remote descriptions with this SDP are rejected
pub const BAD_SDP: &str = "bad-sdp";

/// Candidates starting with this prefix are rejected
pub const BAD_CANDIDATE: &str = "bad";

/// One call made on a transport session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    AddTrack,
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpType),
    SetRemote(SdpType, String),
    AddCandidate(String),
    Close,
}

/// Test-side view of one created session
#[derive(Clone)]
pub struct TransportEnd {
    pub ice: IceConfiguration,
    events: mpsc::UnboundedSender<TransportEvent>,
    calls: Arc<Mutex<Vec<TransportCall>>>,
}

impl TransportEnd {
    /// Calls made so far, in order
    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }

    /// Candidates applied so far, in order
    pub fn applied_candidates(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::AddCandidate(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    /// Number of `close` calls
    pub fn close_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| **call == TransportCall::Close)
            .count()
    }

    /// Whether a remote description has been applied
    pub fn has_remote_description(&self) -> bool {
        self.calls()
            .iter()
            .any(|call| matches!(call, TransportCall::SetRemote(..)))
    }

    pub fn set_state(&self, state: ConnectionState) {
        let _ = self.events.send(TransportEvent::StateChanged(state));
    }

    pub fn gather(&self, candidate: &str) {
        let _ = self
            .events
            .send(TransportEvent::LocalCandidate(IceCandidate::new(candidate)));
    }

    pub fn remote_track(&self, id: &str, kind: MediaKind) {
        let _ = self.events.send(TransportEvent::Track(InboundTrack {
            id: id.to_string(),
            stream_id: "remote-stream".to_string(),
            kind,
            remote: None,
        }));
    }
}

/// Factory producing recording sessions
#[derive(Default)]
pub struct FakeTransportFactory {
    created: Mutex<Vec<TransportEnd>>,
    close_delay: Mutex<Option<Duration>>,
    live: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl FakeTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions created
    pub fn created_count(&self) -> usize {
        self.created.lock().len()
    }

    /// Most recently created session
    pub fn last(&self) -> Option<TransportEnd> {
        self.created.lock().last().cloned()
    }

    /// Stall each `close` by `delay`
    pub fn set_close_delay(&self, delay: Duration) {
        *self.close_delay.lock() = Some(delay);
    }

    /// Most sessions ever open at the same time
    pub fn peak_live(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportFactory for FakeTransportFactory {
    async fn create(
        &self,
        ice: IceConfiguration,
    ) -> Result<(Arc<dyn TransportSession>, TransportEvents)> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let calls = Arc::new(Mutex::new(Vec::new()));

        self.created.lock().push(TransportEnd {
            ice,
            events: events_tx,
            calls: Arc::clone(&calls),
        });

        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(live, Ordering::SeqCst);

        Ok((
            Arc::new(FakeTransport {
                calls,
                close_delay: *self.close_delay.lock(),
                closed: AtomicBool::new(false),
                live: Arc::clone(&self.live),
            }),
            events_rx,
        ))
    }
}

struct FakeTransport {
    calls: Arc<Mutex<Vec<TransportCall>>>,
    close_delay: Option<Duration>,
    closed: AtomicBool,
    live: Arc<AtomicUsize>,
}

impl FakeTransport {
    fn record(&self, call: TransportCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl TransportSession for FakeTransport {
    async fn add_track(&self, _track: LocalTrack) -> Result<()> {
        self.record(TransportCall::AddTrack);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        self.record(TransportCall::CreateOffer);
        Ok(SessionDescription::offer("local-offer"))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.record(TransportCall::CreateAnswer);
        Ok(SessionDescription::answer("local-answer"))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.record(TransportCall::SetLocal(description.sdp_type));
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        if description.sdp == BAD_SDP {
            return Err(Error::NegotiationError("unparseable SDP".to_string()));
        }
        self.record(TransportCall::SetRemote(description.sdp_type, description.sdp));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        if candidate.candidate.starts_with(BAD_CANDIDATE) {
            return Err(Error::WebRtc("malformed candidate".to_string()));
        }
        self.record(TransportCall::AddCandidate(candidate.candidate));
        Ok(())
    }

    async fn stats(&self) -> Result<TransportStats> {
        Ok(TransportStats {
            collected_at: chrono::Utc::now(),
            report: serde_json::json!({ "calls": self.calls.lock().len() }),
        })
    }

    async fn close(&self) -> Result<()> {
        if let Some(delay) = self.close_delay {
            tokio::time::sleep(delay).await;
        }
        self.record(TransportCall::Close);
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
