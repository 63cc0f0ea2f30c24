//! Local audio capture and playback backed by webrtc-rs tracks.
//!
//! A process has no browser microphone, so "capturing" produces an Opus
//! sample track the embedding application feeds with encoded frames.

use crate::application::call::media::{AudioOutput, MediaDevices};
use crate::domain::call::{
    AudioConstraints, LocalStream, LocalTrack, OutputDevice, RemoteStream, TrackKind, TrackSource,
};
use crate::domain::shared::error::{CallError, DeviceError};
use crate::domain::shared::result::CallResult;
use async_trait::async_trait;
use bytes::Bytes;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;
use webrtc::api::media_engine::MIME_TYPE_OPUS;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Opus frame length written by [`WebRtcAudioTrack::write_frame`]
pub const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Captured audio track; stopping it silences every later write
pub struct WebRtcAudioTrack {
    id: String,
    track: Arc<TrackLocalStaticSample>,
    stopped: AtomicBool,
}

impl WebRtcAudioTrack {
    pub fn new(id: &str, stream_id: &str) -> Self {
        let track = TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: 48_000,
                channels: 2,
                sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
                rtcp_feedback: vec![],
            },
            id.to_string(),
            stream_id.to_string(),
        );
        Self {
            id: id.to_string(),
            track: Arc::new(track),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn local(&self) -> Arc<TrackLocalStaticSample> {
        self.track.clone()
    }

    /// Write one encoded Opus frame
    pub async fn write_frame(&self, frame: Bytes) -> CallResult<()> {
        if self.is_stopped() {
            return Ok(());
        }
        self.track
            .write_sample(&Sample {
                data: frame,
                duration: FRAME_DURATION,
                ..Default::default()
            })
            .await
            .map_err(|e| CallError::Capture(e.to_string()))
    }
}

impl TrackSource for WebRtcAudioTrack {
    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            debug!("media.track_stopped id={}", self.id);
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Microphone stand-in producing Opus sample tracks
pub struct WebRtcAudioDevices {
    enabled: bool,
    current: Mutex<Option<Arc<WebRtcAudioTrack>>>,
}

impl WebRtcAudioDevices {
    pub fn new() -> Self {
        Self {
            enabled: true,
            current: Mutex::new(None),
        }
    }

    /// Devices that refuse every capture, like a denied permission prompt
    pub fn denied() -> Self {
        Self {
            enabled: false,
            current: Mutex::new(None),
        }
    }

    /// Track of the most recent capture, for the application to feed
    pub fn current_track(&self) -> Option<Arc<WebRtcAudioTrack>> {
        self.current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Default for WebRtcAudioDevices {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaDevices for WebRtcAudioDevices {
    async fn get_user_media(
        &self,
        constraints: AudioConstraints,
    ) -> std::result::Result<LocalStream, DeviceError> {
        if !self.enabled {
            return Err(DeviceError::new(
                "NotAllowedError",
                "Microphone access is disabled",
            ));
        }
        if constraints.video {
            return Err(DeviceError::new(
                "OverconstrainedError",
                "Video capture is not available",
            ));
        }

        let stream_id = format!("livedesk-{}", Uuid::new_v4());
        let track_id = format!("audio-{}", Uuid::new_v4());
        let track = Arc::new(WebRtcAudioTrack::new(&track_id, &stream_id));
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = Some(track.clone());

        info!("media.capture stream={} track={}", stream_id, track_id);
        Ok(LocalStream {
            id: stream_id,
            tracks: vec![LocalTrack {
                id: track_id,
                kind: TrackKind::Audio,
                source: track,
            }],
        })
    }
}

/// Playback sink that only records what it was given
#[derive(Default)]
pub struct NullAudioOutput {
    attached: Mutex<Option<RemoteStream>>,
}

impl NullAudioOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attached(&self) -> Option<RemoteStream> {
        self.attached
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl AudioOutput for NullAudioOutput {
    fn attach(&self, stream: RemoteStream) {
        *self.attached.lock().unwrap_or_else(|e| e.into_inner()) = Some(stream);
    }

    fn detach(&self) {
        self.attached.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    fn supports_sink_selection(&self) -> bool {
        false
    }

    async fn output_devices(&self) -> CallResult<Vec<OutputDevice>> {
        Ok(Vec::new())
    }

    async fn set_sink(&self, _device_id: &str) -> CallResult<()> {
        Ok(())
    }
}
