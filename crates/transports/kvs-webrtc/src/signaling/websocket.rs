//! WebSocket signaling channel to the KVS relay

use super::protocol;
use super::{
    OutboundMessage, SignalingChannel, SignalingConnector, SignalingEvent, SignalingEvents,
    SignalingRequest,
};
use crate::auth::SigV4Signer;
use crate::config::{Role, SessionConfig};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Lifetime of the presigned connect URL
const PRESIGN_EXPIRY: Duration = Duration::from_secs(299);

/// Opens SigV4-presigned WebSocket channels
pub struct WebSocketSignalingConnector {
    signer: SigV4Signer,
}

impl WebSocketSignalingConnector {
    /// Create a connector signing with the session's credentials
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            signer: SigV4Signer::new(config.credentials.clone(), &config.region, "kinesisvideo"),
        }
    }

    /// Build the presigned URL for `request`
    ///
    /// Publishers connect with the channel ARN only; subscribers also pass
    /// their client id so the relay can route the publisher's replies.
    pub fn channel_url(&self, request: &SignalingRequest) -> Result<Url> {
        let mut url = Url::parse(&request.endpoint).map_err(|e| {
            Error::InvalidConfig(format!(
                "Invalid signaling endpoint {}: {}",
                request.endpoint, e
            ))
        })?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("X-Amz-ChannelARN", &request.channel_id);
            if request.role == Role::Subscriber {
                if let Some(client_id) = &request.client_id {
                    query.append_pair("X-Amz-ClientId", client_id);
                }
            }
        }

        self.signer.presign_url(&url, PRESIGN_EXPIRY, Utc::now())
    }

    /// Connect, then split into sender and receiver tasks
    async fn connection_task(
        url: Url,
        endpoint: String,
        rx: mpsc::UnboundedReceiver<Message>,
        events: mpsc::UnboundedSender<SignalingEvent>,
        closed: Arc<AtomicBool>,
    ) {
        let ws_stream = match connect_async(url.as_str()).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                warn!("Failed to connect to signaling endpoint {}: {}", endpoint, e);
                let _ = events.send(SignalingEvent::Error(Error::Signaling(format!(
                    "Failed to connect: {}",
                    e
                ))));
                return;
            }
        };

        if closed.load(Ordering::SeqCst) {
            debug!("Signaling channel closed while connecting; dropping socket");
            return;
        }

        info!("Connected to signaling endpoint {}", endpoint);
        let _ = events.send(SignalingEvent::Open);

        let (write, read) = ws_stream.split();

        tokio::spawn(Self::sender_task(write, rx));
        Self::receiver_task(read, events, closed).await;
    }

    /// Sender task: sends queued frames to the WebSocket
    async fn sender_task(
        mut write: futures::stream::SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<Message>,
    ) {
        while let Some(msg) = rx.recv().await {
            let is_close = matches!(msg, Message::Close(_));
            if let Err(e) = write.send(msg).await {
                error!("Failed to send WebSocket message: {}", e);
                break;
            }
            if is_close {
                break;
            }
        }

        let _ = write.close().await;
        debug!("Sender task terminated");
    }

    /// Receiver task: decodes frames into events
    async fn receiver_task(
        mut read: futures::stream::SplitStream<WsStream>,
        events: mpsc::UnboundedSender<SignalingEvent>,
        closed: Arc<AtomicBool>,
    ) {
        let mut reason = None;

        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => match protocol::decode(&text) {
                    Ok(Some(event)) => {
                        if events.send(event).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!("Dropping undecodable signaling frame: {}", e);
                        let _ = events.send(SignalingEvent::Error(e));
                    }
                },
                Ok(Message::Close(frame)) => {
                    reason = frame.map(|f| f.reason.to_string()).filter(|r| !r.is_empty());
                    info!("WebSocket connection closed");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    if !closed.load(Ordering::SeqCst) {
                        error!("WebSocket error: {}", e);
                        let _ = events.send(SignalingEvent::Error(Error::Signaling(format!(
                            "WebSocket error: {}",
                            e
                        ))));
                    }
                    debug!("Receiver task terminated");
                    return;
                }
            }
        }

        if !closed.load(Ordering::SeqCst) {
            let _ = events.send(SignalingEvent::Close { reason });
        }

        debug!("Receiver task terminated");
    }
}

#[async_trait]
impl SignalingConnector for WebSocketSignalingConnector {
    async fn open(
        &self,
        request: SignalingRequest,
    ) -> Result<(Box<dyn SignalingChannel>, SignalingEvents)> {
        let url = self.channel_url(&request)?;

        info!(
            "Opening signaling channel to {} as {}",
            request.endpoint, request.role
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        tokio::spawn(Self::connection_task(
            url,
            request.endpoint,
            rx,
            events_tx,
            Arc::clone(&closed),
        ));

        Ok((Box::new(WebSocketSignalingChannel { tx, closed }), events_rx))
    }
}

/// Sending half of a WebSocket signaling channel
///
/// Frames queue until the socket is up, so sends issued right after
/// `Open` never race the sender task.
pub struct WebSocketSignalingChannel {
    tx: mpsc::UnboundedSender<Message>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl SignalingChannel for WebSocketSignalingChannel {
    async fn send(&self, message: OutboundMessage, recipient: Option<&str>) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Signaling(
                "Cannot send on a closed signaling channel".to_string(),
            ));
        }

        let json = protocol::encode(&message, recipient)?;
        debug!(
            "Sending {} (recipient: {})",
            message.kind(),
            recipient.unwrap_or("-")
        );

        self.tx
            .send(Message::Text(json))
            .map_err(|e| Error::Signaling(format!("Failed to send message: {}", e)))
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("Closing signaling channel");
            let _ = self.tx.send(Message::Close(None));
        }
    }
}
