pub mod events;
pub mod health;

use axum::{
    routing::{get, post, put},
    Router,
};

use crate::audio::handlers as audio;
use crate::reveal::handlers as reveal;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/v1/events", get(events::handle_events))
        // Question reveal
        .route(
            "/api/v1/sessions/:session_id/reveal",
            put(reveal::handle_start_reveal)
                .get(reveal::handle_get_reveal)
                .delete(reveal::handle_close_reveal),
        )
        .route(
            "/api/v1/sessions/:session_id/reveal/replay",
            post(reveal::handle_replay),
        )
        // Audio
        .route("/api/v1/audio", get(audio::handle_get_audio))
        .route("/api/v1/audio/play", post(audio::handle_play))
        .route("/api/v1/audio/speak", post(audio::handle_speak))
        .route("/api/v1/audio/stop", post(audio::handle_stop))
        .route("/api/v1/audio/replay", post(audio::handle_replay_audio))
        .route(
            "/api/v1/audio/media-events",
            post(audio::handle_media_event),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;
    use crate::audio::AudioPlaybackController;
    use crate::events::EventBus;
    use crate::reveal::policy::RevealPolicy;
    use crate::reveal::RevealRegistry;
    use crate::runtime::Scheduler;
    use crate::speech::SpeechProvider;
    use crate::testing::{
        FakeMediaPlayer, ManualClock, StaticSpeechProvider, VirtualScheduler,
    };

    struct Stage {
        router: Router,
        clock: Arc<ManualClock>,
        scheduler: Arc<VirtualScheduler>,
        bus: EventBus,
    }

    fn stage_with(speech: Arc<dyn SpeechProvider>) -> Stage {
        let clock = ManualClock::new();
        let scheduler = VirtualScheduler::new(clock.clone());
        let bus = EventBus::new(64);
        let sink = Arc::new(bus.clone());
        let state = AppState {
            bus: bus.clone(),
            reveals: Arc::new(RevealRegistry::new(
                RevealPolicy::default(),
                clock.clone(),
                scheduler.clone(),
                sink.clone(),
            )),
            audio: AudioPlaybackController::new(
                FakeMediaPlayer::new(),
                clock.clone(),
                sink,
                std::time::Duration::from_millis(500),
            ),
            speech,
        };
        Stage {
            router: build_router(state),
            clock,
            scheduler,
            bus,
        }
    }

    fn stage() -> Stage {
        stage_with(StaticSpeechProvider::new())
    }

    async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(b) => builder
                .header("content-type", "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_health_reports_service() {
        let s = stage();
        let (status, body) = send(&s.router, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "interview-stage-api");
        assert_eq!(body["reveal_sessions"], 0);
    }

    #[tokio::test]
    async fn test_reveal_session_lifecycle_over_http() {
        let s = stage();
        let uri = format!("/api/v1/sessions/{}/reveal", Uuid::new_v4());

        let (status, body) = send(
            &s.router,
            Method::PUT,
            &uri,
            Some(json!({ "turn_id": "turn-1" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["phase"], "counting-down");
        assert_eq!(body["countdown_value"], 3);

        let replay_uri = format!("{uri}/replay");
        let (_, body) = send(&s.router, Method::POST, &replay_uri, None).await;
        assert_eq!(body["outcome"]["result"], "unavailable");

        s.scheduler.advance_ms(3_000);
        let (_, body) = send(&s.router, Method::GET, &uri, None).await;
        assert_eq!(body["phase"], "visible");
        assert_eq!(body["remaining_time"], 20);

        let (_, body) = send(&s.router, Method::POST, &replay_uri, None).await;
        assert_eq!(body["outcome"]["result"], "granted");
        assert_eq!(body["snapshot"]["reveal_count"], 1);
        assert_eq!(body["snapshot"]["remaining_time"], 28);

        let (status, _) = send(&s.router, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(s.scheduler.pending(), 0);

        let (status, body) = send(&s.router, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_accessible_reveal_never_hides() {
        let s = stage();
        let uri = format!("/api/v1/sessions/{}/reveal", Uuid::new_v4());
        send(
            &s.router,
            Method::PUT,
            &uri,
            Some(json!({ "turn_id": "turn-1", "accessibility_mode": true })),
        )
        .await;
        s.scheduler.advance_ms(120_000);
        let (_, body) = send(&s.router, Method::GET, &uri, None).await;
        assert_eq!(body["phase"], "accessible-always-visible");
        assert_eq!(body["question_visible"], true);
        assert_eq!(body["remaining_time"], Value::Null);
    }

    #[tokio::test]
    async fn test_reveal_events_reach_subscribers() {
        let s = stage();
        let mut rx = s.bus.subscribe();
        let uri = format!("/api/v1/sessions/{}/reveal", Uuid::new_v4());
        send(&s.router, Method::PUT, &uri, Some(json!({ "turn_id": "turn-1" }))).await;

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.event.name(), "countdown_tick");
    }

    #[tokio::test]
    async fn test_audio_play_debounce_and_lifecycle() {
        let s = stage();
        let (status, body) = send(
            &s.router,
            Method::POST,
            "/api/v1/audio/play",
            Some(json!({ "url": "https://cdn.test/q1.mp3" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"]["result"], "accepted");
        assert_eq!(body["snapshot"]["state"], "loading");
        let playback_id = body["outcome"]["playback_id"].clone();

        let (_, body) = send(
            &s.router,
            Method::POST,
            "/api/v1/audio/play",
            Some(json!({ "url": "https://cdn.test/q2.mp3" })),
        )
        .await;
        assert_eq!(body["outcome"]["result"], "debounced");
        assert_eq!(body["snapshot"]["current_url"], "https://cdn.test/q1.mp3");

        let (_, body) = send(
            &s.router,
            Method::POST,
            "/api/v1/audio/media-events",
            Some(json!({ "playback_id": playback_id, "kind": "started" })),
        )
        .await;
        assert_eq!(body["accepted"], true);

        let (_, body) = send(&s.router, Method::GET, "/api/v1/audio", None).await;
        assert_eq!(body["state"], "playing");
        assert_eq!(body["is_playing"], true);

        let (_, body) = send(&s.router, Method::POST, "/api/v1/audio/stop", None).await;
        assert_eq!(body["state"], "idle");

        let (_, body) = send(
            &s.router,
            Method::POST,
            "/api/v1/audio/media-events",
            Some(json!({ "playback_id": playback_id, "kind": "ended" })),
        )
        .await;
        assert_eq!(body["accepted"], false, "stopped resource must not report");
    }

    #[tokio::test]
    async fn test_audio_play_rejects_blank_url() {
        let s = stage();
        let (status, body) = send(
            &s.router,
            Method::POST,
            "/api/v1/audio/play",
            Some(json!({ "url": "  " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_audio_replay_with_nothing_bound() {
        let s = stage();
        let (_, body) = send(&s.router, Method::POST, "/api/v1/audio/replay", None).await;
        assert_eq!(body["outcome"]["result"], "nothing_bound");
        assert_eq!(body["snapshot"]["state"], "idle");
    }

    #[tokio::test]
    async fn test_audio_replay_is_not_debounced() {
        let s = stage();
        send(
            &s.router,
            Method::POST,
            "/api/v1/audio/play",
            Some(json!({ "url": "https://cdn.test/q1.mp3" })),
        )
        .await;
        s.clock.advance(chrono::Duration::milliseconds(10));
        let (_, body) = send(&s.router, Method::POST, "/api/v1/audio/replay", None).await;
        assert_eq!(body["outcome"]["result"], "restarted");
        assert_eq!(body["snapshot"]["state"], "loading");
    }

    #[tokio::test]
    async fn test_speak_synthesizes_then_plays() {
        let s = stage();
        let (status, body) = send(
            &s.router,
            Method::POST,
            "/api/v1/audio/speak",
            Some(json!({ "text": "Why this role?" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["url"], "https://tts.test/14.mp3");
        assert_eq!(body["outcome"]["result"], "accepted");
        assert_eq!(body["snapshot"]["current_url"], "https://tts.test/14.mp3");
    }

    #[tokio::test]
    async fn test_speak_upstream_failure_is_bad_gateway() {
        let s = stage_with(StaticSpeechProvider::failing());
        let (status, body) = send(
            &s.router,
            Method::POST,
            "/api/v1/audio/speak",
            Some(json!({ "text": "Why this role?" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["code"], "SPEECH_ERROR");
    }
}
