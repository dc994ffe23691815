//! Process-local fan-out of request lifecycle events.
//!
//! The [`FeedHub`] keeps two registries: one board-wide feed and one bucket
//! per request id. Handlers publish committed events into the hub; each
//! subscriber drains its own channel into a server-sent event stream.

mod hub;
mod stream;

pub use hub::{FeedHub, FeedScope, FeedSubscriber};
pub use stream::{SUBSCRIBER_TIMEOUT, event_stream};
