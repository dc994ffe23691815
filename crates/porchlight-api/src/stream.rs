use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::Stream;
use uuid::Uuid;

use porchlight_feed::event_stream;

use crate::state::AppState;

/// Board feed: every lifecycle event for every request.
pub async fn stream_board(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscriber = state.hub.subscribe_board();
    Sse::new(event_stream(subscriber)).keep_alive(KeepAlive::default())
}

/// Feed scoped to a single request. Subscribing to an id with no stored
/// request is allowed and simply stays quiet.
pub async fn stream_request(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscriber = state.hub.subscribe_request(id);
    Sse::new(event_stream(subscriber)).keep_alive(KeepAlive::default())
}
