use anyhow::{Context, Result, anyhow};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use streamgate_core::IceCandidate;
use streamgate_server::INPUT_DATA_CHANNEL;
use tokio::sync::mpsc;
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// A browser-like viewer: offers, opens the input data channel and trickles
/// candidates that the test forwards by hand.
pub struct ViewerClient {
    peer_connection: Arc<RTCPeerConnection>,
    data_channel: tokio::sync::Mutex<Option<Arc<RTCDataChannel>>>,
    candidates: Arc<Mutex<Vec<IceCandidate>>>,
    connection_state: Arc<Mutex<RTCPeerConnectionState>>,
    dc_open_tx: mpsc::Sender<()>,
    dc_open_rx: tokio::sync::Mutex<mpsc::Receiver<()>>,
}

impl ViewerClient {
    pub async fn new() -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let peer_connection = Arc::new(
            api.new_peer_connection(RTCConfiguration::default())
                .await?,
        );

        let connection_state = Arc::new(Mutex::new(RTCPeerConnectionState::New));
        let state = Arc::clone(&connection_state);
        peer_connection.on_peer_connection_state_change(Box::new(move |s| {
            tracing::debug!("[Viewer] Connection state: {:?}", s);
            *state.lock().unwrap() = s;
            Box::pin(async {})
        }));

        let candidates = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&candidates);
        peer_connection.on_ice_candidate(Box::new(move |c: Option<RTCIceCandidate>| {
            if let Some(init) = c.and_then(|c| c.to_json().ok()) {
                sink.lock().unwrap().push(IceCandidate {
                    sdp_mid: init.sdp_mid.unwrap_or_default(),
                    sdp_mline_index: init.sdp_mline_index.unwrap_or_default(),
                    candidate: init.candidate,
                });
            }
            Box::pin(async {})
        }));

        let (dc_open_tx, dc_open_rx) = mpsc::channel(1);
        Ok(Self {
            peer_connection,
            data_channel: tokio::sync::Mutex::new(None),
            candidates,
            connection_state,
            dc_open_tx,
            dc_open_rx: tokio::sync::Mutex::new(dc_open_rx),
        })
    }

    /// Open the input data channel and return the offer SDP.
    pub async fn create_offer(&self) -> Result<String> {
        let dc = self
            .peer_connection
            .create_data_channel(INPUT_DATA_CHANNEL, None)
            .await
            .context("Failed to create data channel")?;

        let dc_open_tx = self.dc_open_tx.clone();
        dc.on_open(Box::new(move || {
            Box::pin(async move {
                tracing::debug!("[Viewer] Data channel opened");
                let _ = dc_open_tx.send(()).await;
            })
        }));
        *self.data_channel.lock().await = Some(dc);

        let offer = self.peer_connection.create_offer(None).await?;
        self.peer_connection
            .set_local_description(offer.clone())
            .await?;
        Ok(offer.sdp)
    }

    pub async fn set_remote_answer(&self, sdp: String) -> Result<()> {
        let answer = RTCSessionDescription::answer(sdp)?;
        self.peer_connection
            .set_remote_description(answer)
            .await?;
        Ok(())
    }

    pub async fn add_remote_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        self.peer_connection
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate.clone(),
                sdp_mid: Some(candidate.sdp_mid.clone()),
                sdp_mline_index: Some(candidate.sdp_mline_index),
                ..Default::default()
            })
            .await?;
        Ok(())
    }

    /// Candidates gathered since the last call.
    pub fn take_candidates(&self) -> Vec<IceCandidate> {
        std::mem::take(&mut *self.candidates.lock().unwrap())
    }

    pub fn is_connected(&self) -> bool {
        *self.connection_state.lock().unwrap() == RTCPeerConnectionState::Connected
    }

    pub async fn wait_for_data_channel(&self, timeout_ms: u64) -> Result<()> {
        let mut rx = self.dc_open_rx.lock().await;
        tokio::time::timeout(Duration::from_millis(timeout_ms), rx.recv())
            .await
            .context("Data channel did not open")?
            .ok_or_else(|| anyhow!("Data channel notifier closed"))
    }

    pub async fn send_text(&self, text: &str) -> Result<()> {
        let dc = self.data_channel.lock().await.clone();
        let dc = dc.ok_or_else(|| anyhow!("No data channel"))?;
        dc.send_text(text.to_owned()).await?;
        Ok(())
    }

    pub async fn close(&self) -> Result<()> {
        self.peer_connection.close().await?;
        Ok(())
    }
}
