//! Media backend for a browser-hosted stage.
//!
//! The server cannot make sound itself. `RemoteMediaPlayer` checks that a
//! resource is reachable and is audio, then tells connected stage clients what
//! to play or stop through `audio_command` events. The client answers with
//! lifecycle reports on `POST /api/v1/audio/media-events`.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{header::CONTENT_TYPE, Client, StatusCode, Url};
use serde::Serialize;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use super::controller::MediaReporter;
use super::media::{MediaError, MediaPlayer, PlaybackId};
use crate::events::{EventSink, StageEvent};

const PREFLIGHT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AudioCommand {
    Play { playback_id: PlaybackId, url: String },
    Stop { playback_id: PlaybackId },
    CancelSpeech,
}

pub struct RemoteMediaPlayer {
    client: Client,
    sink: Arc<dyn EventSink>,
    runtime: Handle,
}

impl RemoteMediaPlayer {
    pub fn new(sink: Arc<dyn EventSink>, runtime: Handle) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(PREFLIGHT_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            sink,
            runtime,
        })
    }

    fn send(&self, command: AudioCommand) {
        self.sink.publish(StageEvent::AudioCommand { command });
    }
}

fn parse_url(url: &str) -> Result<Url, MediaError> {
    let parsed = Url::parse(url).map_err(|_| MediaError::InvalidUrl(url.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        _ => Err(MediaError::InvalidUrl(url.to_string())),
    }
}

fn is_audio(content_type: &str) -> bool {
    let mime = content_type.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    mime.starts_with("audio/") || mime == "application/octet-stream"
}

/// HEAD the resource. Servers that refuse HEAD get the benefit of the doubt.
async fn preflight(client: &Client, url: Url) -> Result<(), MediaError> {
    let response = client
        .head(url)
        .send()
        .await
        .map_err(|e| MediaError::Unreachable(e.to_string()))?;

    let status = response.status();
    if status == StatusCode::METHOD_NOT_ALLOWED {
        return Ok(());
    }
    if !status.is_success() {
        return Err(MediaError::Status(status.as_u16()));
    }

    match response.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
        Some(ct) if !is_audio(ct) => Err(MediaError::NotAudio(ct.to_string())),
        _ => Ok(()),
    }
}

impl MediaPlayer for RemoteMediaPlayer {
    fn start(&self, id: PlaybackId, url: &str, reporter: MediaReporter) -> Result<(), MediaError> {
        let parsed = parse_url(url)?;
        let client = self.client.clone();
        let sink = Arc::clone(&self.sink);
        let url = url.to_string();

        self.runtime.spawn(async move {
            match preflight(&client, parsed).await {
                Ok(()) if reporter.is_current() => {
                    sink.publish(StageEvent::AudioCommand {
                        command: AudioCommand::Play {
                            playback_id: id,
                            url,
                        },
                    });
                }
                Ok(()) => debug!(playback_id = id.0, "Resource superseded during preflight"),
                Err(e) => {
                    warn!(playback_id = id.0, url = %url, "Audio preflight failed: {e}");
                    reporter.failed(e.to_string());
                }
            }
        });
        Ok(())
    }

    fn stop(&self, id: PlaybackId) {
        self.send(AudioCommand::Stop { playback_id: id });
    }

    fn cancel_speech(&self) {
        self.send(AudioCommand::CancelSpeech);
    }
}
