use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::Event;
use futures_util::Stream;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::hub::FeedSubscriber;

/// Streaming subscribers live at most this long. The deadline is fixed at
/// registration; event traffic does not extend it.
pub const SUBSCRIBER_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Adapt a feed registration into a server-sent event stream. Each frame
/// carries the event kind as the SSE event name and the JSON-encoded
/// request snapshot as its data. The subscriber unregisters itself when the
/// stream is dropped or its lifetime expires.
pub fn event_stream(
    mut subscriber: FeedSubscriber,
) -> impl Stream<Item = Result<Event, Infallible>> {
    // Fixed here, at registration time, not at first poll.
    let deadline = Instant::now() + SUBSCRIBER_TIMEOUT;
    async_stream::stream! {
        loop {
            match tokio::time::timeout_at(deadline, subscriber.recv()).await {
                Ok(Some(event)) => {
                    match Event::default()
                        .event(event.kind.as_str())
                        .json_data(&event.payload)
                    {
                        Ok(frame) => yield Ok(frame),
                        Err(err) => warn!("Dropping feed event that failed to serialize: {err}"),
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    debug!(
                        "Feed subscriber {} reached its lifetime limit",
                        subscriber.id()
                    );
                    break;
                }
            }
        }
    }
}
