use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// Tracks resolved for a client at setup time.
#[derive(Debug, Clone)]
pub struct PathTracks {
    pub video_track: Option<u8>,
    pub sps: Option<Vec<u8>>,
    pub pps: Option<Vec<u8>>,
    pub audio_track: Option<u8>,
    pub audio_sample_rate: Option<u32>,
    pub audio_channels: Option<u8>,
}

impl PathTracks {
    pub fn has_any_track(&self) -> bool {
        self.video_track.is_some() || self.audio_track.is_some()
    }
}

/// External collaborator that publishes sources and resolves path
/// configuration: out of scope for this crate, modeled as a trait at the
/// boundary exactly like the teacher's own `Overseer`.
#[async_trait]
pub trait PathManager: Send + Sync {
    /// Requests tracks for `path`, gating setup/play. Fails setup if no
    /// matching video/audio track is found, or if more than one of either is
    /// present.
    async fn setup_and_play(&self, path: &str) -> Result<PathTracks>;

    /// Notifies the path that a client is going away. The client waits for
    /// this to return before proceeding with teardown.
    async fn on_client_remove(&self, path: &str, client_id: Uuid) -> Result<()>;

    /// Notifies the path's owner that the client has fully closed.
    async fn on_client_close(&self, path: &str, client_id: Uuid) -> Result<()>;
}

/// Minimal in-process `PathManager`, used for local testing and the
/// binary's demo mode — mirrors the teacher's `StaticOverseer`.
pub struct StaticPathManager {
    tracks: PathTracks,
}

impl StaticPathManager {
    pub fn new(tracks: PathTracks) -> Self {
        Self { tracks }
    }
}

#[async_trait]
impl PathManager for StaticPathManager {
    async fn setup_and_play(&self, _path: &str) -> Result<PathTracks> {
        if !self.tracks.has_any_track() {
            anyhow::bail!("unable to find a video or audio track");
        }
        Ok(self.tracks.clone())
    }

    async fn on_client_remove(&self, _path: &str, _client_id: Uuid) -> Result<()> {
        Ok(())
    }

    async fn on_client_close(&self, _path: &str, _client_id: Uuid) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracks(video: bool, audio: bool) -> PathTracks {
        PathTracks {
            video_track: video.then_some(0),
            sps: video.then(|| vec![0x67]),
            pps: video.then(|| vec![0x68]),
            audio_track: audio.then_some(1),
            audio_sample_rate: audio.then_some(48_000),
            audio_channels: audio.then_some(2),
        }
    }

    #[tokio::test]
    async fn setup_fails_with_no_tracks() {
        let mgr = StaticPathManager::new(tracks(false, false));
        assert!(mgr.setup_and_play("/live").await.is_err());
    }

    #[tokio::test]
    async fn setup_succeeds_with_video_only() {
        let mgr = StaticPathManager::new(tracks(true, false));
        let t = mgr.setup_and_play("/live").await.unwrap();
        assert!(t.video_track.is_some());
        assert!(t.audio_track.is_none());
    }
}
