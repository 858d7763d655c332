use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::audio::controller::DEFAULT_DEBOUNCE_MS;
use crate::reveal::policy::{
    RevealPolicy, DEFAULT_COUNTDOWN_SECS, DEFAULT_EXTENSION_SECS, DEFAULT_MAX_REVEALS,
    DEFAULT_WINDOW_SECS,
};
use crate::reveal::registry::DEFAULT_SESSION_TTL_SECS;

const DEFAULT_EVENT_BUFFER: usize = 100;
/// Upper bound for every reveal duration setting (one day).
const MAX_REVEAL_SECS: i64 = 24 * 60 * 60;
const MAX_REPLAYS: u32 = 100;

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub rust_log: String,
    pub speech_api_url: String,
    pub speech_api_key: Option<String>,
    pub audio_debounce_ms: u64,
    pub reveal_countdown_secs: u8,
    pub reveal_window_secs: i64,
    pub reveal_extension_secs: i64,
    pub reveal_max_replays: u32,
    /// Inactive reveal sessions untouched for this long are evicted.
    pub reveal_session_ttl_secs: i64,
    /// Events buffered per SSE subscriber before a slow client starts lagging.
    pub event_buffer: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let config = Config {
            port: env_or("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            speech_api_url: require_env("SPEECH_API_URL")?,
            speech_api_key: std::env::var("SPEECH_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            audio_debounce_ms: env_or("AUDIO_DEBOUNCE_MS", DEFAULT_DEBOUNCE_MS)?,
            reveal_countdown_secs: env_or("REVEAL_COUNTDOWN_SECS", DEFAULT_COUNTDOWN_SECS)?,
            reveal_window_secs: env_or("REVEAL_WINDOW_SECS", DEFAULT_WINDOW_SECS)?,
            reveal_extension_secs: env_or("REVEAL_EXTENSION_SECS", DEFAULT_EXTENSION_SECS)?,
            reveal_max_replays: env_or("REVEAL_MAX_REPLAYS", DEFAULT_MAX_REVEALS)?,
            reveal_session_ttl_secs: env_or("REVEAL_SESSION_TTL_SECS", DEFAULT_SESSION_TTL_SECS)?,
            event_buffer: env_or("EVENT_BUFFER", DEFAULT_EVENT_BUFFER)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.reveal_countdown_secs > 0,
            "REVEAL_COUNTDOWN_SECS must be at least 1"
        );
        anyhow::ensure!(
            self.reveal_max_replays <= MAX_REPLAYS,
            "REVEAL_MAX_REPLAYS must be at most {MAX_REPLAYS}"
        );
        anyhow::ensure!(self.event_buffer > 0, "EVENT_BUFFER must be positive");
        self.reveal_policy()?;
        self.session_ttl()?;
        Ok(())
    }

    pub fn reveal_policy(&self) -> Result<RevealPolicy> {
        Ok(RevealPolicy {
            countdown_secs: self.reveal_countdown_secs,
            initial_window: bounded_secs("REVEAL_WINDOW_SECS", self.reveal_window_secs)?,
            replay_extension: bounded_secs("REVEAL_EXTENSION_SECS", self.reveal_extension_secs)?,
            max_reveals: self.reveal_max_replays,
            ..RevealPolicy::default()
        })
    }

    pub fn session_ttl(&self) -> Result<chrono::Duration> {
        bounded_secs("REVEAL_SESSION_TTL_SECS", self.reveal_session_ttl_secs)
    }

    pub fn audio_debounce(&self) -> Duration {
        Duration::from_millis(self.audio_debounce_ms)
    }
}

fn bounded_secs(key: &str, secs: i64) -> Result<chrono::Duration> {
    anyhow::ensure!(
        (1..=MAX_REVEAL_SECS).contains(&secs),
        "{key} must be between 1 and {MAX_REVEAL_SECS}, got {secs}"
    );
    chrono::Duration::try_seconds(secs).with_context(|| format!("{key} is out of range: {secs}"))
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    parse_or(key, std::env::var(key).ok(), default)
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(v) if !v.trim().is_empty() => v
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} must be a valid number, got '{v}'")),
        _ => Ok(default),
    }
}
