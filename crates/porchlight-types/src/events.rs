use crate::api::RequestSnapshot;

/// Kinds of lifecycle events delivered over the board and per-request
/// feeds. `RequestCompleted` and `RequestAssigned` belong to the
/// assignment flow and are not yet produced by any operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    RequestCreated,
    RequestCancelled,
    RequestCompleted,
    RequestAssigned,
}

impl EventKind {
    /// Stable label, used as the SSE event name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequestCreated => "REQUEST_CREATED",
            Self::RequestCancelled => "REQUEST_CANCELLED",
            Self::RequestCompleted => "REQUEST_COMPLETED",
            Self::RequestAssigned => "REQUEST_ASSIGNED",
        }
    }
}

/// A lifecycle event carrying the full post-transition snapshot of the
/// affected request, never a reference into mutable state. Constructed
/// after the transition commits, broadcast, and discarded; never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestEvent {
    pub kind: EventKind,
    pub payload: RequestSnapshot,
}
