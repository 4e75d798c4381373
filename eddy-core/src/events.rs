//! Lifecycle event fan-out.
//!
//! Subscribers are plain callbacks. Publishing iterates over a snapshot of
//! the subscriber list taken before dispatch, so a callback may subscribe or
//! unsubscribe (itself included) while an event is being delivered.

use std::path::PathBuf;
use std::sync::{Arc, Weak};

use futures::{Stream, stream};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::protocol::{Direction, Message, SearchResult};
use crate::scheduler::{DownloadFailure, DownloadId};

/// Lifecycle events observable by the launcher, caches and the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    HubConnected {
        address: String,
    },
    /// The hub accepted our nick
    HubValidated {
        hub_name: Option<String>,
    },
    HubDisconnected {
        reason: String,
    },
    PeerConnected {
        nick: String,
        /// Which side of the transfer we took
        direction: Direction,
    },
    PeerDisconnected {
        nick: String,
    },
    DownloadStarted {
        id: DownloadId,
        nick: String,
        file: String,
        size: u64,
    },
    DownloadProgress {
        id: DownloadId,
        nick: String,
        file: String,
        received: u64,
        size: u64,
        percent: f64,
    },
    DownloadFinished {
        id: DownloadId,
        nick: String,
        file: String,
        path: PathBuf,
    },
    DownloadFailed {
        id: DownloadId,
        nick: String,
        file: String,
        reason: DownloadFailure,
    },
    UploadStarted {
        nick: String,
        file: String,
        size: u64,
    },
    UploadFinished {
        nick: String,
        file: String,
        sent: u64,
        completed: bool,
    },
    SearchResult(SearchResult),
    Chat {
        from: String,
        text: String,
    },
    PrivateMessage {
        from: String,
        text: String,
    },
    FileListReady {
        nick: String,
        path: PathBuf,
    },
    /// Hub message with no dedicated handling
    Hub(Message),
    /// Peer message neither transfer direction consumed
    PeerMessage {
        nick: String,
        message: Message,
    },
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    entries: Vec<(SubscriptionId, Callback)>,
}

impl Subscribers {
    fn allocate(&mut self) -> SubscriptionId {
        self.next_id += 1;
        SubscriptionId(self.next_id)
    }
}

/// Multi-producer event channel with observer-list dispatch.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<Subscribers>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback invoked for every published event.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let mut subscribers = self.inner.lock();
        let id = subscribers.allocate();
        subscribers.entries.push((id, Arc::new(callback)));
        id
    }

    /// Removes a subscriber. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.inner.lock();
        let before = subscribers.entries.len();
        subscribers.entries.retain(|(entry, _)| *entry != id);
        subscribers.entries.len() != before
    }

    /// Forwards every event into an unbounded channel.
    ///
    /// The subscription removes itself once the receiver is dropped.
    pub fn subscribe_channel(&self) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        let weak: Weak<Mutex<Subscribers>> = Arc::downgrade(&self.inner);

        let mut subscribers = self.inner.lock();
        let id = subscribers.allocate();
        let callback: Callback = Arc::new(move |event: &Event| {
            if tx.send(event.clone()).is_err() {
                if let Some(inner) = weak.upgrade() {
                    EventBus { inner }.unsubscribe(id);
                }
            }
        });
        subscribers.entries.push((id, callback));
        rx
    }

    /// Events as a [`Stream`]. Dropping it unsubscribes on the next publish.
    pub fn subscribe_stream(&self) -> impl Stream<Item = Event> + Send + 'static {
        stream::unfold(self.subscribe_channel(), |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
    }

    /// Delivers `event` to every current subscriber.
    pub fn publish(&self, event: Event) {
        let snapshot: Vec<Callback> = self
            .inner
            .lock()
            .entries
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        for callback in snapshot {
            callback(&event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().entries.len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn chat(text: &str) -> Event {
        Event::Chat {
            from: "hub".to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_publish_reaches_all_subscribers() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let count = Arc::clone(&count);
            bus.subscribe(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        bus.publish(chat("hi"));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_subscriber_can_unsubscribe_itself_during_dispatch() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));

        let id = {
            let bus_inner = bus.clone();
            let calls = Arc::clone(&calls);
            let slot = Arc::clone(&slot);
            bus.subscribe(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                if let Some(id) = *slot.lock() {
                    bus_inner.unsubscribe(id);
                }
            })
        };
        *slot.lock() = Some(id);

        let other_calls = Arc::new(AtomicUsize::new(0));
        {
            let other_calls = Arc::clone(&other_calls);
            bus.subscribe(move |_| {
                other_calls.fetch_add(1, Ordering::SeqCst);
            });
        }

        bus.publish(chat("one"));
        bus.publish(chat("two"));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(other_calls.load(Ordering::SeqCst), 2);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_unsubscribe_unknown_id() {
        let bus = EventBus::new();
        let id = bus.subscribe(|_| {});
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
    }

    #[tokio::test]
    async fn test_channel_subscription_drops_with_receiver() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_channel();

        bus.publish(chat("first"));
        assert_eq!(rx.recv().await, Some(chat("first")));

        drop(rx);
        bus.publish(chat("second"));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_stream_subscription() {
        use futures::StreamExt;

        let bus = EventBus::new();
        let events = bus.subscribe_stream();
        bus.publish(chat("a"));
        bus.publish(chat("b"));

        let received: Vec<Event> = events.take(2).collect().await;
        assert_eq!(received, vec![chat("a"), chat("b")]);
    }
}
