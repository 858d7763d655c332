use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;

use crate::state::AppState;

/// GET /api/v1/events
/// Streams every stage event to a connected stage client.
pub async fn handle_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    state.bus.sse()
}
