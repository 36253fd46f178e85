use crate::media::{MediaStream, MediaTrack};
use serde::Serialize;

/// The local actor's own capture streams and toggle flags
#[derive(Debug, Default)]
pub struct LocalMediaState {
    pub camera: Option<MediaStream>,
    pub screen: Option<MediaStream>,
    pub mic_enabled: bool,
    pub video_enabled: bool,
    pub screen_sharing: bool,
}

/// Serializable view of [`LocalMediaState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFlags {
    pub mic_enabled: bool,
    pub video_enabled: bool,
    pub screen_sharing: bool,
}

impl LocalMediaState {
    pub fn with_camera(camera: MediaStream) -> Self {
        Self {
            camera: Some(camera),
            screen: None,
            mic_enabled: true,
            video_enabled: true,
            screen_sharing: false,
        }
    }

    pub fn audio_track(&self) -> Option<&MediaTrack> {
        self.camera.as_ref().and_then(|s| s.audio_track())
    }

    pub fn camera_track(&self) -> Option<&MediaTrack> {
        self.camera.as_ref().and_then(|s| s.video_track())
    }

    pub fn screen_track(&self) -> Option<&MediaTrack> {
        self.screen.as_ref().and_then(|s| s.video_track())
    }

    /// Video currently sent to viewers: the screen while sharing, else the camera
    pub fn active_video(&self) -> Option<&MediaTrack> {
        if self.screen_sharing {
            self.screen_track().or_else(|| self.camera_track())
        } else {
            self.camera_track()
        }
    }

    pub fn flags(&self) -> MediaFlags {
        MediaFlags {
            mic_enabled: self.mic_enabled,
            video_enabled: self.video_enabled,
            screen_sharing: self.screen_sharing,
        }
    }

    pub fn live_track_count(&self) -> usize {
        self.camera.as_ref().map(|s| s.live_track_count()).unwrap_or(0)
            + self.screen.as_ref().map(|s| s.live_track_count()).unwrap_or(0)
    }
}
