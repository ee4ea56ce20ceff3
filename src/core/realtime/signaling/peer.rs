//! Offer/answer negotiation for the peer transport.
//!
//! The local offer is published only after candidate gathering completes, so
//! the signaling endpoint receives a full description in one POST. Events
//! travel on the `oai-events` data channel; audio rides the peer's media
//! tracks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::stats::StatsReportType;
use webrtc::track::track_remote::TrackRemote;

use super::{mint_credential, superseded, until_cancelled};
use crate::core::realtime::base::{
    EndpointConfig, RealtimeConfig, RealtimeError, RealtimeResult, SignalingStage, TransportKind,
};
use crate::core::realtime::codec;
use crate::core::realtime::credential::{CredentialIssuer, EphemeralCredential};
use crate::core::realtime::media::MediaCapture;
use crate::core::realtime::openai::OPENAI_EVENTS_CHANNEL;
use crate::core::realtime::telemetry::RawStats;
use crate::core::realtime::transport::{
    INBOUND_CHANNEL_CAPACITY, InboundFrame, Transport, TransportLink,
};

const AUDIO_KIND: &str = "audio";

/// Offer/answer negotiation over HTTP.
pub struct PeerSignaling {
    http: reqwest::Client,
    calls_url: String,
    ice_servers: Vec<String>,
    gathering_timeout: std::time::Duration,
}

impl PeerSignaling {
    pub fn new(endpoints: &EndpointConfig, http: reqwest::Client) -> Self {
        Self {
            http,
            calls_url: endpoints.calls_url.clone(),
            ice_servers: endpoints.ice_servers.clone(),
            gathering_timeout: endpoints.gathering_timeout,
        }
    }

    pub(super) async fn negotiate(
        &self,
        config: &RealtimeConfig,
        issuer: &dyn CredentialIssuer,
        capture: Option<Arc<dyn MediaCapture>>,
        cancel: &CancellationToken,
    ) -> RealtimeResult<Transport> {
        let pc = self.build_peer_connection().await?;

        match self
            .negotiate_on(&pc, config, issuer, capture, cancel)
            .await
        {
            Ok(transport) => Ok(transport),
            Err(e) => {
                if let Err(close_err) = pc.close().await {
                    debug!(error = %close_err, "Failed to close abandoned peer connection");
                }
                Err(e)
            }
        }
    }

    async fn build_peer_connection(&self) -> RealtimeResult<Arc<RTCPeerConnection>> {
        let offer_err = |e: webrtc::Error| RealtimeError::signaling(SignalingStage::Offer, e.to_string());

        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(offer_err)?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(offer_err)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        // Host candidates only when no servers are configured
        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };
        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let pc = api.new_peer_connection(rtc_config).await.map_err(offer_err)?;
        Ok(Arc::new(pc))
    }

    async fn negotiate_on(
        &self,
        pc: &Arc<RTCPeerConnection>,
        config: &RealtimeConfig,
        issuer: &dyn CredentialIssuer,
        capture: Option<Arc<dyn MediaCapture>>,
        cancel: &CancellationToken,
    ) -> RealtimeResult<Transport> {
        let track_err =
            |e: webrtc::Error| RealtimeError::signaling(SignalingStage::MediaTrack, e.to_string());

        // Outbound audio, or receive-only when there is nothing to send
        match capture {
            Some(capture) => {
                pc.add_track(capture.track()).await.map_err(track_err)?;
            }
            None => {
                pc.add_transceiver_from_kind(
                    RTPCodecType::Audio,
                    Some(RTCRtpTransceiverInit {
                        direction: RTCRtpTransceiverDirection::Recvonly,
                        send_encodings: vec![],
                    }),
                )
                .await
                .map_err(track_err)?;
            }
        }

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let open = Arc::new(AtomicBool::new(false));

        let session_update = if config.send_session_update {
            Some(codec::encode(&codec::session_update(config))?)
        } else {
            None
        };

        let dc = pc
            .create_data_channel(OPENAI_EVENTS_CHANNEL, None)
            .await
            .map_err(|e| RealtimeError::signaling(SignalingStage::DataChannel, e.to_string()))?;
        wire_data_channel(&dc, inbound_tx.clone(), open.clone(), session_update);
        wire_peer_connection(pc, inbound_tx);

        // Offer and candidate gathering
        let offer_err = |e: webrtc::Error| RealtimeError::signaling(SignalingStage::Offer, e.to_string());
        let offer = pc.create_offer(None).await.map_err(offer_err)?;
        let mut gather_complete = pc.gathering_complete_promise().await;
        pc.set_local_description(offer).await.map_err(offer_err)?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(superseded()),
            _ = gather_complete.recv() => {
                debug!("Candidate gathering complete");
            }
            _ = tokio::time::sleep(self.gathering_timeout) => {
                warn!(
                    timeout_ms = self.gathering_timeout.as_millis() as u64,
                    "Candidate gathering timed out, continuing with gathered candidates"
                );
            }
        }

        let local_sdp = pc
            .local_description()
            .await
            .map(|desc| desc.sdp)
            .ok_or_else(|| {
                RealtimeError::signaling(SignalingStage::Gathering, "No local description")
            })?;

        let credential = mint_credential(issuer, config, cancel).await?;

        let answer_sdp = until_cancelled(
            cancel,
            exchange_sdp(&self.http, &self.calls_url, &credential, local_sdp),
        )
        .await?;

        let remote_err = |e: webrtc::Error| {
            RealtimeError::signaling(SignalingStage::RemoteDescription, e.to_string())
        };
        let answer = RTCSessionDescription::answer(answer_sdp).map_err(remote_err)?;
        pc.set_remote_description(answer).await.map_err(remote_err)?;

        info!("Peer transport negotiated");

        Ok(Transport {
            link: Arc::new(PeerLink {
                pc: pc.clone(),
                dc,
                open,
            }),
            inbound: inbound_rx,
        })
    }
}

/// POST the local description and return the answer SDP.
pub async fn exchange_sdp(
    http: &reqwest::Client,
    calls_url: &str,
    credential: &EphemeralCredential,
    offer_sdp: String,
) -> RealtimeResult<String> {
    let response = http
        .post(calls_url)
        .bearer_auth(credential.expose())
        .header(CONTENT_TYPE, "application/sdp")
        .body(offer_sdp)
        .send()
        .await
        .map_err(|e| RealtimeError::signaling(SignalingStage::Exchange, e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(RealtimeError::signaling(
            SignalingStage::Exchange,
            format!("SDP exchange failed: {}", status.as_u16()),
        ));
    }

    let answer = response
        .text()
        .await
        .map_err(|e| RealtimeError::signaling(SignalingStage::Exchange, e.to_string()))?;

    if answer.trim().is_empty() {
        return Err(RealtimeError::signaling(
            SignalingStage::Exchange,
            "Empty SDP answer",
        ));
    }

    Ok(answer)
}

/// Binary and non-UTF-8 payloads pass through as lossy text so they still
/// reach the event log.
fn forward_message(tx: mpsc::Sender<InboundFrame>, msg: DataChannelMessage) -> impl Future<Output = ()> {
    async move {
        let text = String::from_utf8_lossy(&msg.data).into_owned();
        let _ = tx.send(InboundFrame::Message(text)).await;
    }
}

fn wire_data_channel(
    dc: &Arc<RTCDataChannel>,
    tx: mpsc::Sender<InboundFrame>,
    open: Arc<AtomicBool>,
    session_update: Option<String>,
) {
    let weak: Weak<RTCDataChannel> = Arc::downgrade(dc);
    let open_flag = open.clone();
    dc.on_open(Box::new(move || {
        open_flag.store(true, Ordering::SeqCst);
        let weak = weak.clone();
        let update = session_update.clone();
        Box::pin(async move {
            info!("Event channel open");
            if let (Some(update), Some(dc)) = (update, weak.upgrade()) {
                if let Err(e) = dc.send_text(update).await {
                    warn!(error = %e, "Failed to send session.update");
                }
            }
        })
    }));

    let message_tx = tx.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        Box::pin(forward_message(message_tx.clone(), msg))
    }));

    let close_tx = tx.clone();
    let close_flag = open;
    dc.on_close(Box::new(move || {
        close_flag.store(false, Ordering::SeqCst);
        let tx = close_tx.clone();
        Box::pin(async move {
            let _ = tx
                .send(InboundFrame::Fault("data channel closed".to_string()))
                .await;
        })
    }));

    dc.on_error(Box::new(move |err: webrtc::Error| {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx
                .send(InboundFrame::Fault(format!("data channel error: {err}")))
                .await;
        })
    }));
}

fn wire_peer_connection(pc: &Arc<RTCPeerConnection>, tx: mpsc::Sender<InboundFrame>) {
    // Channels opened by the remote end carry events too
    let remote_tx = tx.clone();
    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        debug!(label = %dc.label(), "Remote data channel");
        let tx = remote_tx.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            Box::pin(forward_message(tx.clone(), msg))
        }));
        Box::pin(async {})
    }));

    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            info!(kind = ?track.kind(), "Remote track attached");
            Box::pin(async {})
        },
    ));

    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        debug!(?state, "Peer connection state changed");
        let tx = tx.clone();
        Box::pin(async move {
            if state == RTCPeerConnectionState::Failed {
                let _ = tx
                    .send(InboundFrame::Fault("peer connection failed".to_string()))
                    .await;
            }
        })
    }));
}

/// Established peer transport.
pub struct PeerLink {
    pc: Arc<RTCPeerConnection>,
    dc: Arc<RTCDataChannel>,
    open: Arc<AtomicBool>,
}

#[async_trait]
impl TransportLink for PeerLink {
    fn kind(&self) -> TransportKind {
        TransportKind::Peer
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send_text(&self, text: String) -> RealtimeResult<()> {
        if !self.is_open() {
            return Err(RealtimeError::Transport("data channel not open".to_string()));
        }
        self.dc
            .send_text(text)
            .await
            .map(|_| ())
            .map_err(|e| RealtimeError::Transport(e.to_string()))
    }

    async fn stats(&self) -> Option<RawStats> {
        let report = self.pc.get_stats().await;
        let mut raw = RawStats::default();

        for stat in report.reports.values() {
            match stat {
                StatsReportType::OutboundRTP(out) if out.kind == AUDIO_KIND => {
                    raw.bytes_sent += out.bytes_sent as u64;
                    raw.packets_sent += out.packets_sent as u64;
                }
                StatsReportType::InboundRTP(inb) if inb.kind == AUDIO_KIND => {
                    raw.bytes_received += inb.bytes_received as u64;
                    raw.packets_received += inb.packets_received as u64;
                }
                StatsReportType::CandidatePair(pair) if pair.nominated => {
                    raw.round_trip_time_secs = Some(pair.current_round_trip_time);
                }
                _ => {}
            }
        }

        Some(raw)
    }

    async fn close(&self) -> RealtimeResult<()> {
        self.open.store(false, Ordering::SeqCst);

        let dc_result = self.dc.close().await;
        let pc_result = self.pc.close().await;

        if let Err(e) = dc_result {
            debug!(error = %e, "Data channel close failed");
        }
        pc_result.map_err(|e| RealtimeError::Transport(e.to_string()))
    }
}
