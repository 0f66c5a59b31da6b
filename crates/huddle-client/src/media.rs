//! Local media handle.
//!
//! Capture and rendering belong to the application; the client only needs the track list
//! to attach to a peer connection and the enabled flags behind the mute/hide buttons.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTrack {
    pub id: String,
    pub kind: TrackKind,
    pub enabled: bool,
}

impl MediaTrack {
    pub fn audio(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: TrackKind::Audio,
            enabled: true,
        }
    }

    pub fn video(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: TrackKind::Video,
            enabled: true,
        }
    }
}

/// The local camera/microphone stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalMedia {
    tracks: Vec<MediaTrack>,
}

impl LocalMedia {
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self { tracks }
    }

    /// One microphone and one camera track.
    pub fn camera_and_microphone(stream_id: &str) -> Self {
        Self::new(vec![
            MediaTrack::audio(format!("{stream_id}-audio")),
            MediaTrack::video(format!("{stream_id}-video")),
        ])
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    /// Flip every audio track. Returns true when audio is now muted.
    pub fn toggle_audio_mute(&mut self) -> bool {
        self.toggle(TrackKind::Audio)
    }

    /// Flip every video track. Returns true when video is now hidden.
    pub fn toggle_video_hidden(&mut self) -> bool {
        self.toggle(TrackKind::Video)
    }

    pub fn is_audio_muted(&self) -> bool {
        !self.any_enabled(TrackKind::Audio)
    }

    pub fn is_video_hidden(&self) -> bool {
        !self.any_enabled(TrackKind::Video)
    }

    fn toggle(&mut self, kind: TrackKind) -> bool {
        let enable = !self.any_enabled(kind);
        for track in self.tracks.iter_mut().filter(|t| t.kind == kind) {
            track.enabled = enable;
        }
        !enable
    }

    fn any_enabled(&self, kind: TrackKind) -> bool {
        self.tracks.iter().any(|t| t.kind == kind && t.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggles_only_touch_their_kind() {
        let mut media = LocalMedia::camera_and_microphone("local");

        assert!(media.toggle_audio_mute());
        assert!(media.is_audio_muted());
        assert!(!media.is_video_hidden());

        assert!(media.toggle_video_hidden());
        assert!(!media.toggle_audio_mute());
        assert!(!media.is_audio_muted());
        assert!(media.is_video_hidden());
    }
}
