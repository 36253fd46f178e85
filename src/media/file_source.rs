//! File-backed media source
//!
//! Stands in for camera, microphone and screen capture by replaying IVF (VP8)
//! and Ogg (Opus) files into WebRTC sample tracks. Disabled tracks keep their
//! pump running but skip writing, which is how a toggle mutes in place.

use super::{MediaError, MediaSource, MediaStream, MediaTrack, TrackSource};
use crate::config::MediaConfig;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;
use webrtc::media::io::ivf_reader::IVFReader;
use webrtc::media::io::ogg_reader::OggReader;
use webrtc::media::Sample;

/// Opus pages are paced at 20ms
const OPUS_PAGE_DURATION: Duration = Duration::from_millis(20);

pub struct FileMediaSource {
    config: MediaConfig,
}

impl FileMediaSource {
    pub fn new(config: MediaConfig) -> Self {
        Self { config }
    }

    fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.config.frame_interval_ms.max(1))
    }
}

#[async_trait]
impl MediaSource for FileMediaSource {
    async fn acquire_camera_mic(&self) -> Result<MediaStream, MediaError> {
        let camera = self
            .config
            .camera_file
            .clone()
            .ok_or_else(|| MediaError::Unavailable("no camera source configured".to_string()))?;
        let mic = self
            .config
            .mic_file
            .clone()
            .ok_or_else(|| MediaError::Unavailable("no microphone source configured".to_string()))?;

        probe_ivf(&camera)?;
        probe_ogg(&mic)?;

        let stream_id = format!("camera-{}", uuid::Uuid::new_v4());
        let audio = MediaTrack::for_source(TrackSource::Microphone, &stream_id);
        let video = MediaTrack::for_source(TrackSource::Camera, &stream_id);

        tokio::spawn(pump_ogg(audio.clone(), mic));
        tokio::spawn(pump_ivf(
            video.clone(),
            camera,
            self.frame_interval(),
            self.config.loop_camera,
        ));

        info!("Acquired camera/mic stream {}", stream_id);
        Ok(MediaStream::new(stream_id, vec![audio, video]))
    }

    async fn acquire_screen(&self) -> Result<MediaStream, MediaError> {
        let screen = self
            .config
            .screen_file
            .clone()
            .ok_or_else(|| MediaError::Denied("screen capture not available".to_string()))?;

        probe_ivf(&screen)?;

        let stream_id = format!("screen-{}", uuid::Uuid::new_v4());
        let video = MediaTrack::for_source(TrackSource::Screen, &stream_id);

        // Screen capture ends when the file runs out, like a user ending the share.
        tokio::spawn(pump_ivf(video.clone(), screen, self.frame_interval(), false));

        info!("Acquired screen stream {}", stream_id);
        Ok(MediaStream::new(stream_id, vec![video]))
    }
}

fn open(path: &Path) -> Result<BufReader<File>, MediaError> {
    let file = File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            MediaError::Denied(format!("{}: {}", path.display(), e))
        } else {
            MediaError::Unavailable(format!("{}: {}", path.display(), e))
        }
    })?;
    Ok(BufReader::new(file))
}

fn probe_ivf(path: &Path) -> Result<(), MediaError> {
    IVFReader::new(open(path)?)
        .map(|_| ())
        .map_err(|e| MediaError::Source(format!("Invalid IVF file {}: {}", path.display(), e)))
}

fn probe_ogg(path: &Path) -> Result<(), MediaError> {
    OggReader::new(open(path)?, true)
        .map(|_| ())
        .map_err(|e| MediaError::Source(format!("Invalid Ogg file {}: {}", path.display(), e)))
}

async fn pump_ivf(track: MediaTrack, path: PathBuf, interval: Duration, looping: bool) {
    let local = track.local();
    let mut frames: u64 = 0;

    loop {
        let mut reader = match open(&path).and_then(|r| {
            IVFReader::new(r).map_err(|e| MediaError::Source(e.to_string()))
        }) {
            Ok((reader, _header)) => reader,
            Err(e) => {
                warn!("Track {}: cannot read {}: {}", track.id(), path.display(), e);
                track.mark_ended();
                return;
            }
        };

        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if track.is_stopped() {
                debug!("Track {} pump exiting after {} frames", track.id(), frames);
                return;
            }
            let frame = match reader.parse_next_frame() {
                Ok((frame, _)) => frame,
                Err(_) => break,
            };
            if !track.is_enabled() {
                continue;
            }
            frames += 1;
            let sample = Sample {
                data: frame.freeze(),
                duration: interval,
                ..Default::default()
            };
            if let Err(e) = local.write_sample(&sample).await {
                debug!("Track {} write error: {}", track.id(), e);
            }
        }

        if !looping {
            info!("Track {} reached end of {}", track.id(), path.display());
            track.mark_ended();
            return;
        }
    }
}

async fn pump_ogg(track: MediaTrack, path: PathBuf) {
    let local = track.local();

    loop {
        let mut reader = match open(&path).and_then(|r| {
            OggReader::new(r, true).map_err(|e| MediaError::Source(e.to_string()))
        }) {
            Ok((reader, _header)) => reader,
            Err(e) => {
                warn!("Track {}: cannot read {}: {}", track.id(), path.display(), e);
                track.mark_ended();
                return;
            }
        };

        let mut ticker = tokio::time::interval(OPUS_PAGE_DURATION);
        loop {
            ticker.tick().await;
            if track.is_stopped() {
                return;
            }
            let page = match reader.parse_next_page() {
                Ok((page, _)) => page,
                Err(_) => break,
            };
            if !track.is_enabled() {
                continue;
            }
            let sample = Sample {
                data: page.freeze(),
                duration: OPUS_PAGE_DURATION,
                ..Default::default()
            };
            if let Err(e) = local.write_sample(&sample).await {
                debug!("Track {} write error: {}", track.id(), e);
            }
        }
    }
}
