//! In-process peer standing in for the realtime calls endpoint
//!
//! The calls mock hands each posted offer to an answering peer running on the
//! test runtime and replies with its complete answer description. Events the
//! client writes on the data channel are recorded; the test can push server
//! events back over the same channel.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use super::CALLS_PATH;

type Reply = std::sync::mpsc::Sender<Result<String, String>>;

/// Answering side of the peer transport.
pub struct MockAnswerer {
    pub received: Arc<Mutex<Vec<Value>>>,
    pub offers: Arc<Mutex<Vec<String>>>,
    channel: Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
    peers: Arc<Mutex<Vec<Arc<RTCPeerConnection>>>>,
}

impl MockAnswerer {
    /// Mount the calls endpoint on `server` and start answering offers.
    pub async fn mount(server: &MockServer) -> Self {
        let answerer = Self {
            received: Arc::new(Mutex::new(Vec::new())),
            offers: Arc::new(Mutex::new(Vec::new())),
            channel: Arc::new(Mutex::new(None)),
            peers: Arc::new(Mutex::new(Vec::new())),
        };

        let (offer_tx, mut offer_rx) = mpsc::unbounded_channel::<(String, Reply)>();
        let received = answerer.received.clone();
        let offers = answerer.offers.clone();
        let channel = answerer.channel.clone();
        let peers = answerer.peers.clone();

        tokio::spawn(async move {
            while let Some((offer, reply)) = offer_rx.recv().await {
                offers.lock().unwrap().push(offer.clone());
                let result = match answer(offer, received.clone(), channel.clone()).await {
                    Ok((pc, sdp)) => {
                        peers.lock().unwrap().push(pc);
                        Ok(sdp)
                    }
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
        });

        Mock::given(method("POST"))
            .and(path(CALLS_PATH))
            .respond_with(AnswerResponder { offers: offer_tx })
            .mount(server)
            .await;

        answerer
    }

    pub fn received_of_type(&self, event_type: &str) -> Vec<Value> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter(|v| v["type"] == event_type)
            .cloned()
            .collect()
    }

    pub fn offers(&self) -> Vec<String> {
        self.offers.lock().unwrap().clone()
    }

    /// Send a server event on the client's data channel once it is open.
    pub async fn send(&self, event: Value) {
        let text = event.to_string();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let dc = self.channel.lock().unwrap().clone();
            if let Some(dc) = dc {
                if dc.send_text(text.clone()).await.is_ok() {
                    return;
                }
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "data channel never opened"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    pub async fn close(&self) {
        let peers: Vec<_> = self.peers.lock().unwrap().drain(..).collect();
        for pc in peers {
            let _ = pc.close().await;
        }
    }
}

async fn answer(
    offer_sdp: String,
    received: Arc<Mutex<Vec<Value>>>,
    channel: Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
) -> Result<(Arc<RTCPeerConnection>, String), String> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(|e| e.to_string())?;
    let registry = register_default_interceptors(Registry::new(), &mut media_engine)
        .map_err(|e| e.to_string())?;
    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let pc = Arc::new(
        api.new_peer_connection(RTCConfiguration::default())
            .await
            .map_err(|e| e.to_string())?,
    );

    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        let received = received.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            if let Ok(value) = serde_json::from_slice::<Value>(&msg.data) {
                received.lock().unwrap().push(value);
            }
            Box::pin(async {})
        }));
        *channel.lock().unwrap() = Some(dc);
        Box::pin(async {})
    }));

    let offer = RTCSessionDescription::offer(offer_sdp).map_err(|e| e.to_string())?;
    pc.set_remote_description(offer)
        .await
        .map_err(|e| e.to_string())?;
    let local = pc.create_answer(None).await.map_err(|e| e.to_string())?;
    let mut gathered = pc.gathering_complete_promise().await;
    pc.set_local_description(local)
        .await
        .map_err(|e| e.to_string())?;
    let _ = tokio::time::timeout(Duration::from_secs(5), gathered.recv()).await;

    let sdp = pc
        .local_description()
        .await
        .map(|desc| desc.sdp)
        .ok_or_else(|| "no local description".to_string())?;
    Ok((pc, sdp))
}

/// Blocks the mock server thread until the answering task replies.
struct AnswerResponder {
    offers: mpsc::UnboundedSender<(String, Reply)>,
}

impl Respond for AnswerResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let offer = String::from_utf8_lossy(&request.body).into_owned();
        let (reply_tx, reply_rx) = std::sync::mpsc::channel();
        if self.offers.send((offer, reply_tx)).is_err() {
            return ResponseTemplate::new(500);
        }
        match reply_rx.recv_timeout(Duration::from_secs(10)) {
            Ok(Ok(sdp)) => ResponseTemplate::new(201).set_body_string(sdp),
            _ => ResponseTemplate::new(500),
        }
    }
}
