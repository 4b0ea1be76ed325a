use anyhow::{Result, bail};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use streamgate_core::{IceCandidate, PeerId, SessionDescription};
use streamgate_server::{
    PeerTransport, PeerTransportEvent, PeerTransportFactory, TransportConfig, TransportEventSink,
    VideoSource, VideoTrack,
};
use webrtc::api::media_engine::MIME_TYPE_VP8;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// SDP the fake transport answers every offer with.
pub const FAKE_ANSWER_SDP: &str = "v=0 fake-answer";
pub const FAKE_OFFER_SDP: &str = "v=0 fake-offer";

/// Remote descriptions containing this marker are rejected.
pub const REJECTED_SDP_MARKER: &str = "reject-me";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    SetRemote(PeerId, SessionDescription),
    CreateAnswer(PeerId),
    CreateOffer(PeerId),
    AddCandidate(PeerId, IceCandidate),
    AddVideo(PeerId),
    Close(PeerId),
}

#[derive(Default)]
struct FactoryInner {
    created: Mutex<Vec<PeerId>>,
    calls: Mutex<Vec<TransportCall>>,
    /// Every event sink handed out per peer, oldest first.
    events: Mutex<HashMap<PeerId, Vec<TransportEventSink>>>,
    configs: Mutex<Vec<TransportConfig>>,
}

/// PeerTransportFactory that records every call instead of opening sockets.
#[derive(Clone, Default)]
pub struct FakeTransportFactory {
    inner: Arc<FactoryInner>,
}

impl FakeTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> Vec<PeerId> {
        self.inner.created.lock().unwrap().clone()
    }

    pub fn created_count(&self, peer_id: PeerId) -> usize {
        self.created().iter().filter(|id| **id == peer_id).count()
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.inner.calls.lock().unwrap().clone()
    }

    pub fn last_config(&self) -> Option<TransportConfig> {
        self.inner.configs.lock().unwrap().last().cloned()
    }

    /// Raise a transport event as the latest peer connection of `peer_id` would.
    pub async fn raise(&self, peer_id: PeerId, event: PeerTransportEvent) {
        let sink = self
            .inner
            .events
            .lock()
            .unwrap()
            .get(&peer_id)
            .and_then(|sinks| sinks.last().cloned());
        let sink = sink.expect("No transport created for peer");
        assert!(sink.send(event).await, "Orchestrator stopped");
    }

    /// Raise a transport event from the `index`-th connection ever created
    /// for `peer_id`, even if that connection was closed since.
    pub async fn raise_on(&self, peer_id: PeerId, index: usize, event: PeerTransportEvent) {
        let sink = self
            .inner
            .events
            .lock()
            .unwrap()
            .get(&peer_id)
            .and_then(|sinks| sinks.get(index).cloned());
        let sink = sink.expect("No such transport for peer");
        assert!(sink.send(event).await, "Orchestrator stopped");
    }
}

#[async_trait]
impl PeerTransportFactory for FakeTransportFactory {
    async fn create(
        &self,
        peer_id: PeerId,
        config: &TransportConfig,
        events: TransportEventSink,
    ) -> Result<Box<dyn PeerTransport>> {
        tracing::debug!("[FakeTransport] create for {}", peer_id);
        self.inner.created.lock().unwrap().push(peer_id);
        self.inner.configs.lock().unwrap().push(config.clone());
        self.inner
            .events
            .lock()
            .unwrap()
            .entry(peer_id)
            .or_default()
            .push(events);
        Ok(Box::new(FakePeerTransport {
            peer_id,
            inner: self.inner.clone(),
        }))
    }
}

struct FakePeerTransport {
    peer_id: PeerId,
    inner: Arc<FactoryInner>,
}

impl FakePeerTransport {
    fn record(&self, call: TransportCall) {
        self.inner.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl PeerTransport for FakePeerTransport {
    async fn set_remote_description(&self, description: &SessionDescription) -> Result<()> {
        if description.sdp.contains(REJECTED_SDP_MARKER) {
            bail!("remote description rejected");
        }
        self.record(TransportCall::SetRemote(self.peer_id, description.clone()));
        Ok(())
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.record(TransportCall::CreateAnswer(self.peer_id));
        Ok(SessionDescription::answer(FAKE_ANSWER_SDP))
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        self.record(TransportCall::CreateOffer(self.peer_id));
        Ok(SessionDescription::offer(FAKE_OFFER_SDP))
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        self.record(TransportCall::AddCandidate(self.peer_id, candidate.clone()));
        Ok(())
    }

    async fn add_video_track(&self, _track: VideoTrack) -> Result<()> {
        self.record(TransportCall::AddVideo(self.peer_id));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.record(TransportCall::Close(self.peer_id));
        Ok(())
    }
}

/// VideoSource that hands out a VP8 sample track and counts attach/detach.
#[derive(Clone, Default)]
pub struct CountingVideoSource {
    attached: Arc<AtomicUsize>,
    detached: Arc<AtomicUsize>,
}

impl CountingVideoSource {
    pub fn attached(&self) -> usize {
        self.attached.load(Ordering::SeqCst)
    }

    pub fn detached(&self) -> usize {
        self.detached.load(Ordering::SeqCst)
    }
}

impl VideoSource for CountingVideoSource {
    fn attach_video_source(&self, _peer_id: PeerId) -> Option<VideoTrack> {
        self.attached.fetch_add(1, Ordering::SeqCst);
        let track = TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                ..Default::default()
            },
            "video".to_owned(),
            "streamgate".to_owned(),
        );
        Some(Arc::new(track))
    }

    fn detach_video_source(&self, _peer_id: PeerId) {
        self.detached.fetch_add(1, Ordering::SeqCst);
    }
}

/// Offer as a viewer would send it.
pub fn offer_json(sdp: &str) -> String {
    format!(r#"{{"type":"offer","sdp":"{sdp}"}}"#)
}

/// ICE candidate as a viewer would send it.
pub fn candidate_json(candidate: &str) -> String {
    format!(r#"{{"sdpMid":"0","sdpMLineIndex":0,"candidate":"{candidate}"}}"#)
}
