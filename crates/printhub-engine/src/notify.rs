//! # Notification Sink
//!
//! Audible cues at the station: a chime when a job arrives, another when it
//! prints, a buzzer when it fails.
//!
//! ```text
//!   PENDING, accepted  ──► sounds.new_job
//!   SUCCEEDED          ──► sounds.success
//!   FAILED / ABANDONED ──► sounds.failure
//! ```
//!
//! A job put back in the queue is PENDING again but stays quiet.
//!
//! Playback runs in its own task; a missing player or asset is logged and
//! otherwise ignored.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use printhub_core::{JobEvent, JobStatus};

use crate::config::{ConfigStore, NotificationSettings};
use crate::events::JobEventSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sound {
    NewJob,
    Success,
    Failure,
}

impl Sound {
    pub fn for_event(event: &JobEvent) -> Option<Sound> {
        match event.status {
            JobStatus::Pending if event.accepted => Some(Sound::NewJob),
            JobStatus::Pending => None,
            JobStatus::Succeeded => Some(Sound::Success),
            JobStatus::Failed | JobStatus::Abandoned => Some(Sound::Failure),
            JobStatus::Routing | JobStatus::Printing => None,
        }
    }

    fn asset(&self, settings: &NotificationSettings) -> PathBuf {
        match self {
            Sound::NewJob => settings.sounds.new_job.clone(),
            Sound::Success => settings.sounds.success.clone(),
            Sound::Failure => settings.sounds.failure.clone(),
        }
    }
}

/// One playback request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoundRequest {
    pub sound: Sound,
    pub player: String,
    pub asset: PathBuf,
    pub volume: u8,
}

#[async_trait]
pub trait SoundPlayer: Send + Sync {
    async fn play(&self, request: &SoundRequest) -> std::io::Result<()>;
}

/// Runs the configured player command with the asset as its last argument.
///
/// `{volume}` in the command is replaced with the 0-100 volume.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandPlayer;

#[async_trait]
impl SoundPlayer for CommandPlayer {
    async fn play(&self, request: &SoundRequest) -> std::io::Result<()> {
        let command = request.player.replace("{volume}", &request.volume.to_string());
        let mut parts = command.split_whitespace();
        let program = parts.next().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "player command is empty")
        })?;

        let status = tokio::process::Command::new(program)
            .args(parts)
            .arg(&request.asset)
            .kill_on_drop(true)
            .status()
            .await?;

        if !status.success() {
            return Err(std::io::Error::other(format!(
                "{} exited with {}",
                program, status
            )));
        }
        Ok(())
    }
}

/// Plays a sound for each relevant job event.
pub struct NotificationSink {
    config: Arc<ConfigStore>,
    player: Arc<dyn SoundPlayer>,
}

impl NotificationSink {
    pub fn new(config: Arc<ConfigStore>, player: Arc<dyn SoundPlayer>) -> Self {
        NotificationSink { config, player }
    }

    /// Resolves the request for `sound`, or `None` when muted.
    pub async fn request_for(&self, sound: Sound) -> Option<SoundRequest> {
        let settings = self.config.get().await.notifications;
        if !settings.enabled || settings.volume == 0 {
            return None;
        }
        Some(SoundRequest {
            sound,
            player: settings.player.clone(),
            asset: sound.asset(&settings),
            volume: settings.volume,
        })
    }
}

impl JobEventSink for NotificationSink {
    fn on_event(&self, event: &JobEvent) {
        let Some(sound) = Sound::for_event(event) else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("No runtime for notification playback");
            return;
        };

        let config = self.config.clone();
        let player = self.player.clone();
        let job_id = event.job_id.clone();
        runtime.spawn(async move {
            let sink = NotificationSink { config, player };
            let Some(request) = sink.request_for(sound).await else {
                return;
            };
            if let Err(e) = sink.player.play(&request).await {
                warn!(job_id = %job_id, sound = ?sound, error = %e, "Notification playback failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StationConfig;
    use chrono::Utc;
    use tokio::sync::mpsc;

    struct RecordingPlayer(mpsc::UnboundedSender<SoundRequest>);

    #[async_trait]
    impl SoundPlayer for RecordingPlayer {
        async fn play(&self, request: &SoundRequest) -> std::io::Result<()> {
            let _ = self.0.send(request.clone());
            Ok(())
        }
    }

    fn event(status: JobStatus) -> JobEvent {
        JobEvent {
            job_id: "j1".into(),
            status,
            printer: None,
            error: None,
            attempt: 1,
            accepted: false,
            timestamp: Utc::now(),
        }
    }

    fn sink(config: StationConfig) -> (NotificationSink, mpsc::UnboundedReceiver<SoundRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = NotificationSink::new(
            Arc::new(ConfigStore::in_memory(config)),
            Arc::new(RecordingPlayer(tx)),
        );
        (sink, rx)
    }

    fn accepted() -> JobEvent {
        JobEvent {
            accepted: true,
            ..event(JobStatus::Pending)
        }
    }

    #[test]
    fn test_sound_mapping() {
        assert_eq!(Sound::for_event(&accepted()), Some(Sound::NewJob));
        assert_eq!(Sound::for_event(&event(JobStatus::Succeeded)), Some(Sound::Success));
        assert_eq!(Sound::for_event(&event(JobStatus::Abandoned)), Some(Sound::Failure));
        assert_eq!(Sound::for_event(&event(JobStatus::Printing)), None);
    }

    #[tokio::test]
    async fn test_requeued_job_stays_quiet() {
        let (sink, mut rx) = sink(StationConfig::default());
        sink.on_event(&event(JobStatus::Pending));
        sink.on_event(&accepted());

        let request = rx.recv().await.unwrap();
        assert_eq!(request.sound, Sound::NewJob);
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_plays_failure_sound() {
        let (sink, mut rx) = sink(StationConfig::default());
        sink.on_event(&event(JobStatus::Printing));
        sink.on_event(&event(JobStatus::Failed));

        let request = rx.recv().await.unwrap();
        assert_eq!(request.sound, Sound::Failure);
        assert_eq!(request.asset, PathBuf::from("sounds/failure.wav"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_muted_when_volume_zero() {
        let mut config = StationConfig::default();
        config.notifications.volume = 0;
        let (sink, _rx) = sink(config);
        assert!(sink.request_for(Sound::Success).await.is_none());
    }

    #[tokio::test]
    async fn test_disabled_notifications() {
        let mut config = StationConfig::default();
        config.notifications.enabled = false;
        let (sink, _rx) = sink(config);
        assert!(sink.request_for(Sound::NewJob).await.is_none());
    }
}
