//! webrtc-rs peer connection transport

use super::{
    ConnectionState, IceConfiguration, InboundTrack, LocalTrack, MediaKind, TransportEvent,
    TransportEvents, TransportFactory, TransportSession, TransportStats,
};
use crate::signaling::{IceCandidate, SdpType, SessionDescription};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

/// Builds webrtc-rs peer connections with the default codec set
#[derive(Debug, Clone, Default)]
pub struct WebRtcTransportFactory;

impl WebRtcTransportFactory {
    /// Create a factory
    pub fn new() -> Self {
        Self
    }

    fn ice_servers(ice: &IceConfiguration) -> Vec<RTCIceServer> {
        ice.stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .chain(ice.relays.iter().map(|relay| {
                #[allow(clippy::needless_update)]
                RTCIceServer {
                    urls: relay.urls.clone(),
                    username: relay.username.clone().unwrap_or_default(),
                    credential: relay.credential.clone().unwrap_or_default(),
                    ..Default::default()
                }
            }))
            .collect()
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    #[instrument(skip(self, ice), fields(stun = ice.stun_servers.len(), relays = ice.relays.len()))]
    async fn create(
        &self,
        ice: IceConfiguration,
    ) -> Result<(Arc<dyn TransportSession>, TransportEvents)> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtc(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::WebRtc(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: Self::ice_servers(&ice),
            ..Default::default()
        };

        let peer_connection = Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
            Error::WebRtc(format!("Failed to create peer connection: {}", e))
        })?);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        WebRtcTransportSession::install_handlers(&peer_connection, events_tx);

        info!("Created peer connection");

        Ok((
            Arc::new(WebRtcTransportSession { peer_connection }),
            events_rx,
        ))
    }
}

/// A transport session backed by an `RTCPeerConnection`
pub struct WebRtcTransportSession {
    peer_connection: Arc<RTCPeerConnection>,
}

impl WebRtcTransportSession {
    /// Underlying peer connection
    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.peer_connection
    }

    fn install_handlers(
        peer_connection: &Arc<RTCPeerConnection>,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) {
        let candidate_tx = events.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let events = candidate_tx.clone();
            Box::pin(async move {
                // None marks end of gathering
                let Some(candidate) = candidate else {
                    debug!("ICE gathering complete");
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = events.send(TransportEvent::LocalCandidate(from_candidate_init(init)));
                    }
                    Err(e) => warn!("Failed to serialize local candidate: {}", e),
                }
            })
        }));

        let state_tx = events.clone();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |s: RTCPeerConnectionState| {
                let events = state_tx.clone();
                Box::pin(async move {
                    let state = match s {
                        RTCPeerConnectionState::New => ConnectionState::New,
                        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
                        RTCPeerConnectionState::Connected => ConnectionState::Connected,
                        RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
                        RTCPeerConnectionState::Failed => ConnectionState::Failed,
                        RTCPeerConnectionState::Closed => ConnectionState::Closed,
                        _ => return,
                    };
                    debug!("Peer connection state: {}", state);
                    let _ = events.send(TransportEvent::StateChanged(state));
                })
            },
        ));

        let track_tx = events;
        peer_connection.on_track(Box::new(move |track, _receiver, _transceiver| {
            let events = track_tx.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Audio => MediaKind::Audio,
                    RTPCodecType::Video => MediaKind::Video,
                    other => {
                        warn!("Ignoring remote track of kind {}", other);
                        return;
                    }
                };
                info!("Remote {:?} track added: {}", kind, track.id());
                let _ = events.send(TransportEvent::Track(InboundTrack {
                    id: track.id(),
                    stream_id: track.stream_id(),
                    kind,
                    remote: Some(track),
                }));
            })
        }));
    }
}

fn from_candidate_init(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_m_line_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn to_rtc_description(description: SessionDescription) -> Result<RTCSessionDescription> {
    let result = match description.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(description.sdp),
        SdpType::Answer => RTCSessionDescription::answer(description.sdp),
    };
    result.map_err(|e| Error::NegotiationError(format!("Invalid session description: {}", e)))
}

#[async_trait]
impl TransportSession for WebRtcTransportSession {
    async fn add_track(&self, track: LocalTrack) -> Result<()> {
        let sender = self
            .peer_connection
            .add_track(track)
            .await
            .map_err(|e| Error::WebRtc(format!("Failed to add track: {}", e)))?;

        // Drain RTCP so interceptors keep running
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while sender.read(&mut rtcp_buf).await.is_ok() {}
        });

        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::NegotiationError(format!("Failed to create offer: {}", e)))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::NegotiationError(format!("Failed to create answer: {}", e)))?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.peer_connection
            .set_local_description(to_rtc_description(description)?)
            .await
            .map_err(|e| {
                Error::NegotiationError(format!("Failed to set local description: {}", e))
            })
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.peer_connection
            .set_remote_description(to_rtc_description(description)?)
            .await
            .map_err(|e| {
                Error::NegotiationError(format!("Failed to set remote description: {}", e))
            })
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_m_line_index,
            username_fragment: candidate.username_fragment,
        };

        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::WebRtc(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn stats(&self) -> Result<TransportStats> {
        let report = self.peer_connection.get_stats().await;
        Ok(TransportStats {
            collected_at: chrono::Utc::now(),
            report: serde_json::to_value(&report.reports)?,
        })
    }

    async fn close(&self) -> Result<()> {
        for sender in self.peer_connection.get_senders().await {
            if let Err(e) = self.peer_connection.remove_track(&sender).await {
                debug!("Failed to detach sender: {}", e);
            }
        }

        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::WebRtc(format!("Failed to close peer connection: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::RelayDescriptor;
    use webrtc::api::media_engine::MIME_TYPE_OPUS;
    use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
    use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

    fn audio_track() -> LocalTrack {
        Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                ..Default::default()
            },
            "audio".to_owned(),
            "kvs-test".to_owned(),
        ))
    }

    #[test]
    fn test_ice_servers_include_relays() {
        let ice = IceConfiguration {
            stun_servers: vec!["stun:stun.example.com:443".to_string()],
            relays: vec![RelayDescriptor {
                urls: vec!["turn:1.2.3.4:443".to_string()],
                username: Some("user".to_string()),
                credential: Some("pw".to_string()),
                ttl: None,
            }],
        };

        let servers = WebRtcTransportFactory::ice_servers(&ice);
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].urls, vec!["stun:stun.example.com:443".to_string()]);
        assert_eq!(servers[1].username, "user");
        assert_eq!(servers[1].credential, "pw");
    }

    #[tokio::test]
    async fn test_offer_carries_attached_track() {
        let (session, _events) = WebRtcTransportFactory::new()
            .create(IceConfiguration::default())
            .await
            .unwrap();

        session.add_track(audio_track()).await.unwrap();
        let offer = session.create_offer().await.unwrap();
        assert_eq!(offer.sdp_type, SdpType::Offer);
        assert!(offer.sdp.contains("m=audio"));

        session.set_local_description(offer).await.unwrap();
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_offer_answer_between_two_sessions() {
        let factory = WebRtcTransportFactory::new();
        let (offerer, _a) = factory.create(IceConfiguration::default()).await.unwrap();
        let (answerer, _b) = factory.create(IceConfiguration::default()).await.unwrap();

        offerer.add_track(audio_track()).await.unwrap();
        let offer = offerer.create_offer().await.unwrap();
        offerer.set_local_description(offer.clone()).await.unwrap();

        answerer.set_remote_description(offer).await.unwrap();
        let answer = answerer.create_answer().await.unwrap();
        assert_eq!(answer.sdp_type, SdpType::Answer);
        answerer.set_local_description(answer.clone()).await.unwrap();
        offerer.set_remote_description(answer).await.unwrap();

        assert!(offerer.stats().await.unwrap().report.is_object());

        offerer.close().await.unwrap();
        answerer.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_garbage_remote_description_is_rejected() {
        let (session, _events) = WebRtcTransportFactory::new()
            .create(IceConfiguration::default())
            .await
            .unwrap();

        let err = session
            .set_remote_description(SessionDescription::offer("not sdp"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NegotiationError(_)));
    }
}
