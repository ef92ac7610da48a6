//! In-memory signaling connector
//!
//! Every `open` records the request and hands the test the sending half of
//! the event stream so it can play the relay.

use async_trait::async_trait;
use parking_lot::Mutex;
use remotemedia_kvs_webrtc::signaling::{
    OutboundMessage, SignalingChannel, SignalingEvents, SignalingRequest,
};
use remotemedia_kvs_webrtc::{Error, Result, SessionDescription, SignalingConnector, SignalingEvent};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// A message the engine sent, with its recipient
pub type Sent = (OutboundMessage, Option<String>);

/// Test-side view of one opened channel
#[derive(Clone)]
pub struct RelayEnd {
    pub request: SignalingRequest,
    events: mpsc::UnboundedSender<SignalingEvent>,
    sent: Arc<Mutex<Vec<Sent>>>,
    closes: Arc<AtomicUsize>,
}

impl RelayEnd {
    /// Deliver an event to the engine
    pub fn emit(&self, event: SignalingEvent) {
        let _ = self.events.send(event);
    }

    pub fn open(&self) {
        self.emit(SignalingEvent::Open);
    }

    pub fn offer_from(&self, sender: &str, sdp: &str) {
        self.emit(SignalingEvent::SdpOffer {
            description: SessionDescription::offer(sdp),
            sender: Some(sender.to_string()),
        });
    }

    pub fn answer(&self, sdp: &str) {
        self.emit(SignalingEvent::SdpAnswer {
            description: SessionDescription::answer(sdp),
            sender: None,
        });
    }

    pub fn candidate_from(&self, sender: Option<&str>, candidate: &str) {
        self.emit(SignalingEvent::IceCandidate {
            candidate: remotemedia_kvs_webrtc::IceCandidate::new(candidate),
            sender: sender.map(str::to_string),
        });
    }

    /// Messages the engine has sent so far
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    /// Offers the engine has sent so far
    pub fn offers(&self) -> Vec<Sent> {
        self.sent()
            .into_iter()
            .filter(|(m, _)| matches!(m, OutboundMessage::Offer(_)))
            .collect()
    }

    /// Answers the engine has sent so far
    pub fn answers(&self) -> Vec<Sent> {
        self.sent()
            .into_iter()
            .filter(|(m, _)| matches!(m, OutboundMessage::Answer(_)))
            .collect()
    }

    /// Candidates the engine has sent so far
    pub fn candidates(&self) -> Vec<Sent> {
        self.sent()
            .into_iter()
            .filter(|(m, _)| matches!(m, OutboundMessage::Candidate(_)))
            .collect()
    }

    /// Times the engine closed this channel
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Connector whose channels are driven by the test
pub struct FakeConnector {
    auto_open: AtomicBool,
    opened: Mutex<Vec<RelayEnd>>,
}

impl FakeConnector {
    /// Channels report `Open` as soon as they are opened
    pub fn new() -> Self {
        Self {
            auto_open: AtomicBool::new(true),
            opened: Mutex::new(Vec::new()),
        }
    }

    /// Leave channels pending until the test calls `RelayEnd::open`
    pub fn manual_open(self) -> Self {
        self.auto_open.store(false, Ordering::SeqCst);
        self
    }

    /// Number of `open` calls
    pub fn open_count(&self) -> usize {
        self.opened.lock().len()
    }

    /// Most recently opened channel
    pub fn last(&self) -> Option<RelayEnd> {
        self.opened.lock().last().cloned()
    }
}

#[async_trait]
impl SignalingConnector for FakeConnector {
    async fn open(
        &self,
        request: SignalingRequest,
    ) -> Result<(Box<dyn SignalingChannel>, SignalingEvents)> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let closes = Arc::new(AtomicUsize::new(0));

        let end = RelayEnd {
            request,
            events: events_tx,
            sent: Arc::clone(&sent),
            closes: Arc::clone(&closes),
        };
        if self.auto_open.load(Ordering::SeqCst) {
            end.open();
        }
        self.opened.lock().push(end);

        Ok((
            Box::new(FakeChannel {
                sent,
                closes,
                closed: AtomicBool::new(false),
            }),
            events_rx,
        ))
    }
}

struct FakeChannel {
    sent: Arc<Mutex<Vec<Sent>>>,
    closes: Arc<AtomicUsize>,
    closed: AtomicBool,
}

#[async_trait]
impl SignalingChannel for FakeChannel {
    async fn send(&self, message: OutboundMessage, recipient: Option<&str>) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Signaling("channel closed".to_string()));
        }
        self.sent
            .lock()
            .push((message, recipient.map(str::to_string)));
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}
