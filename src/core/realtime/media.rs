//! Local audio capture for peer sessions.
//!
//! The controller acquires a [`MediaCapture`] from its [`MediaSource`] before
//! negotiating a peer transport and stops it on teardown. Encoding is left to
//! the capture: samples written to the track are already Opus frames.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;
use webrtc::api::media_engine::MIME_TYPE_OPUS;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use super::base::{RealtimeError, RealtimeResult};

/// Opus clock rate.
pub const OPUS_CLOCK_RATE: u32 = 48000;

/// An acquired capture stream.
#[async_trait]
pub trait MediaCapture: Send + Sync {
    /// Track to attach to the peer connection.
    fn track(&self) -> Arc<dyn TrackLocal + Send + Sync>;

    /// Release the capture. Called once on teardown.
    async fn stop(&self) -> RealtimeResult<()>;
}

/// Source of local audio capture.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Acquire a capture stream, failing with
    /// [`RealtimeError::MediaAcquisition`] when denied or unavailable.
    async fn acquire(&self) -> RealtimeResult<Arc<dyn MediaCapture>>;
}

/// Default source: an Opus sample track the caller feeds with
/// [`LocalAudioCapture::write_frame`].
#[derive(Debug, Clone)]
pub struct LocalAudioSource {
    stream_id: String,
}

impl Default for LocalAudioSource {
    fn default() -> Self {
        Self {
            stream_id: "realtime-session".to_string(),
        }
    }
}

impl LocalAudioSource {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
        }
    }

    /// Create a capture without going through the trait object.
    pub fn open(&self) -> Arc<LocalAudioCapture> {
        let track = TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: OPUS_CLOCK_RATE,
                channels: 2,
                ..Default::default()
            },
            "audio".to_owned(),
            self.stream_id.clone(),
        );
        Arc::new(LocalAudioCapture {
            track: Arc::new(track),
            stopped: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl MediaSource for LocalAudioSource {
    async fn acquire(&self) -> RealtimeResult<Arc<dyn MediaCapture>> {
        Ok(self.open())
    }
}

/// Capture backed by a static Opus sample track.
pub struct LocalAudioCapture {
    track: Arc<TrackLocalStaticSample>,
    stopped: AtomicBool,
}

impl LocalAudioCapture {
    /// Write one encoded Opus frame of `duration`.
    ///
    /// Frames written after [`MediaCapture::stop`] are dropped.
    pub async fn write_frame(&self, data: Bytes, duration: Duration) -> RealtimeResult<()> {
        if self.is_stopped() {
            return Ok(());
        }
        let sample = Sample {
            data,
            duration,
            ..Default::default()
        };
        self.track
            .write_sample(&sample)
            .await
            .map_err(|e| RealtimeError::MediaAcquisition(e.to_string()))
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaCapture for LocalAudioCapture {
    fn track(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.track.clone()
    }

    async fn stop(&self) -> RealtimeResult<()> {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            debug!("Local audio capture stopped");
        }
        Ok(())
    }
}
