mod audio;
mod config;
mod errors;
mod events;
mod reveal;
mod routes;
mod runtime;
mod speech;
mod state;
#[cfg(test)]
mod testing;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::runtime::Handle;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::audio::{AudioPlaybackController, RemoteMediaPlayer};
use crate::config::Config;
use crate::events::EventBus;
use crate::reveal::RevealRegistry;
use crate::routes::build_router;
use crate::runtime::{SystemClock, TokioScheduler};
use crate::speech::HttpSpeechProvider;
use crate::state::AppState;

const IDLE_SWEEP_SECS: u64 = 60;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting interview stage API v{}", env!("CARGO_PKG_VERSION"));

    let clock = Arc::new(SystemClock);
    let scheduler = Arc::new(TokioScheduler::current());
    let bus = EventBus::new(config.event_buffer);
    let sink = Arc::new(bus.clone());

    let policy = config.reveal_policy()?;
    let reveals = Arc::new(
        RevealRegistry::new(policy, clock.clone(), scheduler, sink.clone())
            .with_idle_ttl(config.session_ttl()?),
    );
    spawn_idle_sweep(Arc::clone(&reveals));
    info!(
        "Reveal policy: {}s countdown, {}s window, +{}s x{} replays (max {}s visible)",
        policy.countdown_secs,
        policy.initial_window.num_seconds(),
        policy.replay_extension.num_seconds(),
        policy.max_reveals,
        policy.max_visible().num_seconds()
    );

    let player = RemoteMediaPlayer::new(sink.clone(), Handle::current())
        .context("Failed to build media preflight client")?;
    let audio = AudioPlaybackController::new(
        Arc::new(player),
        clock,
        sink,
        config.audio_debounce(),
    );
    info!("Audio controller initialized (debounce {}ms)", config.audio_debounce_ms);

    let speech = HttpSpeechProvider::new(config.speech_api_url.clone(), config.speech_api_key.clone())
        .context("Failed to build speech client")?;
    info!("Speech provider initialized ({})", config.speech_api_url);

    let state = AppState {
        bus,
        reveals,
        audio,
        speech: Arc::new(speech),
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins to the stage client host

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Evicts abandoned reveal sessions even when no new session is being started.
fn spawn_idle_sweep(reveals: Arc<RevealRegistry>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(IDLE_SWEEP_SECS));
        loop {
            interval.tick().await;
            reveals.evict_idle();
        }
    });
}
