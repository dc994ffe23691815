use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use porchlight_types::events::RequestEvent;

/// Scope of one feed registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedScope {
    Board,
    Request(Uuid),
}

#[derive(Clone)]
struct FeedSender {
    id: Uuid,
    tx: mpsc::UnboundedSender<Arc<RequestEvent>>,
}

/// Shared registry of live feed subscribers.
///
/// Registration, removal and publishing run concurrently from independent
/// tasks. Locks are held only to snapshot or mutate the registries, never
/// while sending, so a slow consumer cannot stall a publisher. Request
/// buckets are created on first subscription and dropped with their last
/// subscriber.
#[derive(Clone)]
pub struct FeedHub {
    inner: Arc<FeedHubInner>,
}

struct FeedHubInner {
    /// Board-wide subscribers: every published event reaches all of them
    board: RwLock<Vec<FeedSender>>,

    /// Per-request buckets: request_id -> that request's subscribers
    requests: RwLock<HashMap<Uuid, Vec<FeedSender>>>,
}

impl FeedHub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FeedHubInner {
                board: RwLock::new(Vec::new()),
                requests: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Register a subscriber on the board feed. Never blocks and never
    /// fails.
    pub fn subscribe_board(&self) -> FeedSubscriber {
        self.subscribe(FeedScope::Board)
    }

    /// Register a subscriber on one request's feed. The request does not
    /// have to exist; an unknown id simply yields a silent feed.
    pub fn subscribe_request(&self, request_id: Uuid) -> FeedSubscriber {
        self.subscribe(FeedScope::Request(request_id))
    }

    fn subscribe(&self, scope: FeedScope) -> FeedSubscriber {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let sender = FeedSender { id, tx };
        match scope {
            FeedScope::Board => self.board_write().push(sender),
            FeedScope::Request(request_id) => {
                self.requests_write()
                    .entry(request_id)
                    .or_default()
                    .push(sender);
            }
        }
        debug!("Feed subscriber {id} registered on {scope:?}");
        FeedSubscriber {
            id,
            scope,
            rx,
            hub: self.clone(),
        }
    }

    /// Deliver an event to every current board subscriber. Subscribers
    /// whose receiving half is gone are pruned; publishing itself cannot
    /// fail.
    pub fn publish_board(&self, event: Arc<RequestEvent>) {
        let targets: Vec<FeedSender> = self.board_read().clone();
        for id in send_to_all(&targets, &event) {
            self.remove(FeedScope::Board, id);
        }
    }

    /// Deliver an event to the subscribers of one request's feed, if any.
    pub fn publish_to_request(&self, request_id: Uuid, event: Arc<RequestEvent>) {
        let targets: Vec<FeedSender> = match self.requests_read().get(&request_id) {
            Some(bucket) => bucket.clone(),
            None => return,
        };
        for id in send_to_all(&targets, &event) {
            self.remove(FeedScope::Request(request_id), id);
        }
    }

    /// Remove one subscriber from its registry. Safe to call repeatedly and
    /// from any trigger: client close, lifetime limit, delivery failure.
    pub fn remove(&self, scope: FeedScope, subscriber_id: Uuid) {
        match scope {
            FeedScope::Board => {
                let mut board = self.board_write();
                let before = board.len();
                board.retain(|sender| sender.id != subscriber_id);
                if board.len() < before {
                    debug!("Feed subscriber {subscriber_id} removed from board feed");
                }
            }
            FeedScope::Request(request_id) => {
                let mut requests = self.requests_write();
                if let Some(bucket) = requests.get_mut(&request_id) {
                    bucket.retain(|sender| sender.id != subscriber_id);
                    if bucket.is_empty() {
                        requests.remove(&request_id);
                    }
                }
            }
        }
    }

    fn board_read(&self) -> RwLockReadGuard<'_, Vec<FeedSender>> {
        self.inner.board.read().expect("feed registry lock poisoned")
    }

    fn board_write(&self) -> RwLockWriteGuard<'_, Vec<FeedSender>> {
        self.inner.board.write().expect("feed registry lock poisoned")
    }

    fn requests_read(&self) -> RwLockReadGuard<'_, HashMap<Uuid, Vec<FeedSender>>> {
        self.inner
            .requests
            .read()
            .expect("feed registry lock poisoned")
    }

    fn requests_write(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, Vec<FeedSender>>> {
        self.inner
            .requests
            .write()
            .expect("feed registry lock poisoned")
    }

    #[cfg(test)]
    pub(crate) fn board_len(&self) -> usize {
        self.board_read().len()
    }

    #[cfg(test)]
    pub(crate) fn request_bucket_len(&self, request_id: Uuid) -> Option<usize> {
        self.requests_read().get(&request_id).map(Vec::len)
    }
}

fn send_to_all(targets: &[FeedSender], event: &Arc<RequestEvent>) -> Vec<Uuid> {
    let mut dead = Vec::new();
    for sender in targets {
        if sender.tx.send(Arc::clone(event)).is_err() {
            dead.push(sender.id);
        }
    }
    dead
}

/// Live registration handle holding the receiving half of one subscriber's
/// channel. Dropping the handle unregisters it, so an abandoned stream
/// cleans up after itself.
pub struct FeedSubscriber {
    id: Uuid,
    scope: FeedScope,
    rx: mpsc::UnboundedReceiver<Arc<RequestEvent>>,
    hub: FeedHub,
}

impl FeedSubscriber {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Next event, or `None` once the sending side has been torn down.
    pub async fn recv(&mut self) -> Option<Arc<RequestEvent>> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`FeedSubscriber::recv`].
    pub fn try_recv(&mut self) -> Option<Arc<RequestEvent>> {
        self.rx.try_recv().ok()
    }

    #[cfg(test)]
    pub(crate) fn close_channel(&mut self) {
        self.rx.close();
    }
}

impl Drop for FeedSubscriber {
    fn drop(&mut self) {
        self.hub.remove(self.scope, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use porchlight_types::api::RequestSnapshot;
    use porchlight_types::events::EventKind;
    use porchlight_types::models::RequestStatus;

    fn snapshot(request_id: Uuid) -> RequestSnapshot {
        RequestSnapshot {
            id: request_id,
            title: "Need groceries".to_string(),
            details: "Milk and bread".to_string(),
            status: RequestStatus::Open,
            category: None,
            location_lat: None,
            location_lng: None,
            address: None,
            elderly_id: Uuid::new_v4(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            photos: Vec::new(),
        }
    }

    fn event(kind: EventKind, request_id: Uuid) -> Arc<RequestEvent> {
        Arc::new(RequestEvent {
            kind,
            payload: snapshot(request_id),
        })
    }

    #[tokio::test]
    async fn board_subscribers_each_receive_published_events() {
        let hub = FeedHub::new();
        let mut first = hub.subscribe_board();
        let mut second = hub.subscribe_board();

        let published = event(EventKind::RequestCreated, Uuid::new_v4());
        hub.publish_board(Arc::clone(&published));

        let got = first.recv().await.unwrap();
        assert_eq!(*got, *published);
        let got = second.recv().await.unwrap();
        assert_eq!(got.kind, EventKind::RequestCreated);

        // Exactly one delivery per subscriber.
        assert!(first.try_recv().is_none());
        assert!(second.try_recv().is_none());
    }

    #[tokio::test]
    async fn request_feeds_do_not_cross_talk() {
        let hub = FeedHub::new();
        let watched = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut subscriber = hub.subscribe_request(watched);

        hub.publish_to_request(other, event(EventKind::RequestCancelled, other));
        assert!(subscriber.try_recv().is_none());

        hub.publish_to_request(watched, event(EventKind::RequestCancelled, watched));
        let got = subscriber.recv().await.unwrap();
        assert_eq!(got.payload.id, watched);
    }

    #[tokio::test]
    async fn board_publish_does_not_reach_request_feeds() {
        let hub = FeedHub::new();
        let request_id = Uuid::new_v4();
        let mut subscriber = hub.subscribe_request(request_id);

        hub.publish_board(event(EventKind::RequestCreated, request_id));
        assert!(subscriber.try_recv().is_none());
    }

    #[tokio::test]
    async fn dropping_the_handle_unregisters_it() {
        let hub = FeedHub::new();
        let subscriber = hub.subscribe_board();
        assert_eq!(hub.board_len(), 1);

        drop(subscriber);
        assert_eq!(hub.board_len(), 0);
    }

    #[tokio::test]
    async fn request_buckets_appear_and_disappear_with_subscribers() {
        let hub = FeedHub::new();
        let request_id = Uuid::new_v4();
        assert_eq!(hub.request_bucket_len(request_id), None);

        let first = hub.subscribe_request(request_id);
        let second = hub.subscribe_request(request_id);
        assert_eq!(hub.request_bucket_len(request_id), Some(2));

        drop(first);
        assert_eq!(hub.request_bucket_len(request_id), Some(1));
        drop(second);
        assert_eq!(hub.request_bucket_len(request_id), None);
    }

    #[tokio::test]
    async fn removal_is_idempotent() {
        let hub = FeedHub::new();
        let request_id = Uuid::new_v4();
        let subscriber = hub.subscribe_request(request_id);
        let id = subscriber.id();

        hub.remove(FeedScope::Request(request_id), id);
        hub.remove(FeedScope::Request(request_id), id);
        assert_eq!(hub.request_bucket_len(request_id), None);

        // The handle's own drop fires a third removal.
        drop(subscriber);

        // Removing from a feed that never saw this id is also fine.
        hub.remove(FeedScope::Board, id);
    }

    #[tokio::test]
    async fn dead_subscribers_are_pruned_on_publish() {
        let hub = FeedHub::new();
        let mut dead = hub.subscribe_board();
        let mut live = hub.subscribe_board();
        dead.close_channel();
        assert_eq!(hub.board_len(), 2);

        hub.publish_board(event(EventKind::RequestCompleted, Uuid::new_v4()));

        assert_eq!(hub.board_len(), 1);
        assert!(live.recv().await.is_some());
        assert!(dead.try_recv().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_subscribe_publish_and_drop_is_safe() {
        let hub = FeedHub::new();
        let request_id = Uuid::new_v4();

        let mut tasks = Vec::new();
        for i in 0..16 {
            let hub = hub.clone();
            tasks.push(tokio::spawn(async move {
                let mut subscriber = if i % 2 == 0 {
                    hub.subscribe_board()
                } else {
                    hub.subscribe_request(request_id)
                };
                hub.publish_board(event(EventKind::RequestCreated, request_id));
                hub.publish_to_request(
                    request_id,
                    event(EventKind::RequestAssigned, request_id),
                );
                // Drain whatever arrived before dropping out of the feed.
                while subscriber.try_recv().is_some() {}
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(hub.board_len(), 0);
        assert_eq!(hub.request_bucket_len(request_id), None);
    }
}
