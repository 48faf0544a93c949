//! webrtc-rs peer connection wrapper
//!
//! Implements the negotiation transport contract on top of
//! `RTCPeerConnection`. Media here is negotiation plumbing only: local
//! track handles map to static sample tracks with the matching codec
//! capability; feeding samples into them is the capture collaborator's
//! concern.

use crate::config::RtcConfig;
use async_trait::async_trait;
use paircall_signaling::{
    CandidateCallback, CandidateEntry, ConnectionState, ConnectionStateCallback, Error,
    LocalTrack, NegotiationState, NegotiationTransport, RemoteTrack, RemoteTrackCallback, Result,
    SdpKind, SessionDescription, TrackKind, TransportFactory,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Negotiation transport backed by webrtc-rs
pub struct RtcTransport {
    peer_connection: Arc<RTCPeerConnection>,
    senders: Mutex<HashMap<TrackKind, Arc<RTCRtpSender>>>,
    closed: AtomicBool,
}

impl RtcTransport {
    /// Create an unconnected transport from the given ICE configuration
    pub async fn new(config: &RtcConfig) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::Transport(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine)
                .map_err(|e| Error::Transport(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let ice_servers: Vec<RTCIceServer> = config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .chain(config.turn_servers.iter().map(|turn| RTCIceServer {
                urls: vec![turn.url.clone()],
                username: turn.username.clone(),
                credential: turn.credential.clone(),
            }))
            .collect();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ice_candidate_pool_size: config.ice_candidate_pool_size,
            ..Default::default()
        };

        let peer_connection = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(|e| Error::Transport(format!("Failed to create peer connection: {}", e)))?,
        );
        debug!("Peer connection created");

        Ok(Self {
            peer_connection,
            senders: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }
}

/// Map a webrtc-rs signaling state onto the negotiation sub-states
///
/// The provisional-answer states collapse onto their nearest pending
/// neighbour; the controller only distinguishes the four sub-states it
/// guards on.
fn map_signaling_state(state: RTCSignalingState) -> NegotiationState {
    match state {
        RTCSignalingState::Stable => NegotiationState::Stable,
        RTCSignalingState::HaveLocalOffer | RTCSignalingState::HaveRemotePranswer => {
            NegotiationState::HaveLocalOffer
        }
        RTCSignalingState::HaveRemoteOffer | RTCSignalingState::HaveLocalPranswer => {
            NegotiationState::HaveRemoteOffer
        }
        RTCSignalingState::Closed | RTCSignalingState::Unspecified => NegotiationState::Closed,
    }
}

fn map_connection_state(state: RTCPeerConnectionState) -> ConnectionState {
    match state {
        RTCPeerConnectionState::New | RTCPeerConnectionState::Unspecified => ConnectionState::New,
        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
        RTCPeerConnectionState::Connected => ConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => ConnectionState::Failed,
        RTCPeerConnectionState::Closed => ConnectionState::Closed,
    }
}

/// Codec capability advertised for an outgoing track of the given kind
fn codec_capability(kind: TrackKind) -> RTCRtpCodecCapability {
    match kind {
        TrackKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48000,
            channels: 2,
            sdp_fmtp_line: String::new(),
            rtcp_feedback: vec![],
        },
        TrackKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            clock_rate: 90000,
            channels: 0,
            sdp_fmtp_line: String::new(),
            rtcp_feedback: vec![],
        },
    }
}

fn build_static_track(track: &LocalTrack) -> Arc<TrackLocalStaticSample> {
    Arc::new(TrackLocalStaticSample::new(
        codec_capability(track.kind()),
        track.id().to_string(),
        track.stream_id().to_string(),
    ))
}

fn to_rtc_description(desc: &SessionDescription) -> Result<RTCSessionDescription> {
    match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp.clone()),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp.clone()),
    }
    .map_err(|e| Error::Sdp(format!("Failed to parse session description: {}", e)))
}

fn from_rtc_description(desc: RTCSessionDescription) -> Option<SessionDescription> {
    let kind = match desc.sdp_type {
        RTCSdpType::Offer => SdpKind::Offer,
        RTCSdpType::Answer => SdpKind::Answer,
        _ => return None,
    };
    Some(SessionDescription {
        kind,
        sdp: desc.sdp,
    })
}

#[async_trait]
impl NegotiationTransport for RtcTransport {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::Sdp(format!("Failed to create offer: {}", e)))?;
        from_rtc_description(offer)
            .ok_or_else(|| Error::Sdp("offer has unsupported description type".to_string()))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::Sdp(format!("Failed to create answer: {}", e)))?;
        from_rtc_description(answer)
            .ok_or_else(|| Error::Sdp("answer has unsupported description type".to_string()))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.peer_connection
            .set_local_description(to_rtc_description(&desc)?)
            .await
            .map_err(|e| Error::Sdp(format!("Failed to set local description: {}", e)))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.peer_connection
            .set_remote_description(to_rtc_description(&desc)?)
            .await
            .map_err(|e| Error::Sdp(format!("Failed to set remote description: {}", e)))
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.peer_connection
            .local_description()
            .await
            .and_then(from_rtc_description)
    }

    async fn remote_description(&self) -> Option<SessionDescription> {
        self.peer_connection
            .remote_description()
            .await
            .and_then(from_rtc_description)
    }

    async fn add_ice_candidate(&self, candidate: CandidateEntry) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::IceCandidate(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn negotiation_state(&self) -> NegotiationState {
        if self.closed.load(Ordering::SeqCst) {
            return NegotiationState::Closed;
        }
        map_signaling_state(self.peer_connection.signaling_state())
    }

    async fn add_track(&self, track: LocalTrack) -> Result<()> {
        let kind = track.kind();
        let rtc_track = build_static_track(&track);
        let sender = self
            .peer_connection
            .add_track(rtc_track as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| Error::Transport(format!("Failed to add {} track: {}", kind, e)))?;
        self.senders.lock().insert(kind, sender);
        debug!("Added outgoing {} track {}", kind, track.id());
        Ok(())
    }

    async fn sender_kinds(&self) -> Vec<TrackKind> {
        self.senders.lock().keys().copied().collect()
    }

    async fn replace_track(&self, kind: TrackKind, track: LocalTrack) -> Result<()> {
        let sender = self
            .senders
            .lock()
            .get(&kind)
            .cloned()
            .ok_or_else(|| Error::Transport(format!("no active {} sender", kind)))?;

        let rtc_track = build_static_track(&track);
        sender
            .replace_track(Some(rtc_track as Arc<dyn TrackLocal + Send + Sync>))
            .await
            .map_err(|e| Error::Transport(format!("Failed to replace {} track: {}", kind, e)))?;
        info!("Replaced outgoing {} track with {}", kind, track.id());
        Ok(())
    }

    fn on_ice_candidate(&self, callback: CandidateCallback) {
        self.peer_connection
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                if let Some(candidate) = candidate {
                    match candidate.to_json() {
                        Ok(init) => callback(CandidateEntry {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        }),
                        Err(e) => warn!("Failed to serialize local candidate: {}", e),
                    }
                } else {
                    debug!("Candidate gathering complete");
                }
                Box::pin(async {})
            }));
    }

    fn on_remote_track(&self, callback: RemoteTrackCallback) {
        self.peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>, _receiver, _transceiver| {
                let kind = match track.kind() {
                    RTPCodecType::Audio => Some(TrackKind::Audio),
                    RTPCodecType::Video => Some(TrackKind::Video),
                    RTPCodecType::Unspecified => None,
                };
                if let Some(kind) = kind {
                    callback(RemoteTrack {
                        id: track.id(),
                        kind,
                    });
                }
                Box::pin(async {})
            },
        ));
    }

    fn on_connection_state_change(&self, callback: ConnectionStateCallback) {
        self.peer_connection.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                callback(map_connection_state(state));
                Box::pin(async {})
            },
        ));
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Closing peer connection");
        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::Transport(format!("Failed to close peer connection: {}", e)))
    }
}

/// Creates one [`RtcTransport`] per controller session
pub struct RtcFactory {
    config: RtcConfig,
}

impl RtcFactory {
    /// Build a factory with a validated configuration
    pub fn new(config: RtcConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }
}

#[async_trait]
impl TransportFactory for RtcFactory {
    async fn create(&self) -> Result<Arc<dyn NegotiationTransport>> {
        Ok(Arc::new(RtcTransport::new(&self.config).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signaling_state_mapping() {
        assert_eq!(
            map_signaling_state(RTCSignalingState::Stable),
            NegotiationState::Stable
        );
        assert_eq!(
            map_signaling_state(RTCSignalingState::HaveLocalOffer),
            NegotiationState::HaveLocalOffer
        );
        assert_eq!(
            map_signaling_state(RTCSignalingState::HaveRemotePranswer),
            NegotiationState::HaveLocalOffer
        );
        assert_eq!(
            map_signaling_state(RTCSignalingState::HaveRemoteOffer),
            NegotiationState::HaveRemoteOffer
        );
        assert_eq!(
            map_signaling_state(RTCSignalingState::Closed),
            NegotiationState::Closed
        );
    }

    #[test]
    fn test_codec_capability_mime_types() {
        assert_eq!(codec_capability(TrackKind::Audio).mime_type, MIME_TYPE_OPUS);
        assert_eq!(codec_capability(TrackKind::Video).mime_type, MIME_TYPE_VP8);
        assert_eq!(codec_capability(TrackKind::Video).clock_rate, 90000);
    }

    #[tokio::test]
    async fn test_new_transport_starts_stable() {
        let transport = RtcTransport::new(&RtcConfig::default()).await.unwrap();
        assert_eq!(transport.negotiation_state().await, NegotiationState::Stable);
        assert!(transport.local_description().await.is_none());
        assert!(transport.remote_description().await.is_none());
    }

    #[tokio::test]
    async fn test_offer_moves_to_have_local_offer() {
        let transport = RtcTransport::new(&RtcConfig::default()).await.unwrap();
        transport
            .add_track(LocalTrack::new("mic", TrackKind::Audio, "stream"))
            .await
            .unwrap();

        let offer = transport.create_offer().await.unwrap();
        assert_eq!(offer.kind, SdpKind::Offer);

        transport.set_local_description(offer).await.unwrap();
        assert_eq!(
            transport.negotiation_state().await,
            NegotiationState::HaveLocalOffer
        );
    }

    #[tokio::test]
    async fn test_replace_video_track_in_place() {
        let transport = RtcTransport::new(&RtcConfig::default()).await.unwrap();
        transport
            .add_track(LocalTrack::new("cam", TrackKind::Video, "stream"))
            .await
            .unwrap();
        assert_eq!(transport.sender_kinds().await, vec![TrackKind::Video]);

        transport
            .replace_track(
                TrackKind::Video,
                LocalTrack::new("screen", TrackKind::Video, "stream"),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_replace_without_sender_fails() {
        let transport = RtcTransport::new(&RtcConfig::default()).await.unwrap();
        let err = transport
            .replace_track(
                TrackKind::Video,
                LocalTrack::new("screen", TrackKind::Video, "stream"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let transport = RtcTransport::new(&RtcConfig::default()).await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert_eq!(transport.negotiation_state().await, NegotiationState::Closed);
    }
}
