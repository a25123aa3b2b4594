use super::types::{MessageItem, Thread};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, error};

#[derive(Debug, Clone, PartialEq)]
pub struct MessageEvent {
    pub thread_id: String,
    pub item_id: String,
    pub user_id: String,
    pub text: String,
    pub timestamp: i64,
    pub item: MessageItem,
    pub is_from_me: bool,
}

impl MessageEvent {
    pub fn from_item(thread_id: &str, item: &MessageItem, self_user_id: &str) -> Self {
        Self {
            thread_id: thread_id.to_string(),
            item_id: item.item_id.clone(),
            user_id: item.user_id.clone(),
            text: item.text.clone().unwrap_or_default(),
            timestamp: item.timestamp,
            item: item.clone(),
            is_from_me: item.user_id == self_user_id,
        }
    }

    pub fn replied_to_item_id(&self) -> Option<&str> {
        self.item.replied_to_item_id()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingEvent {
    pub thread_id: String,
    pub user_id: String,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequestEvent {
    pub count: usize,
    pub threads: Vec<Thread>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    pub message: String,
    /// Set when the failure needs re-authentication rather than waiting.
    pub fatal: bool,
}

/// Everything the engine publishes to bot code.
#[derive(Debug, Clone, PartialEq)]
pub enum DirectEvent {
    Message(MessageEvent),
    Typing(TypingEvent),
    PendingRequest(PendingRequestEvent),
    Error(ErrorEvent),
    PollingStarted,
    PollingStopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Message,
    Typing,
    PendingRequest,
    Error,
    PollingStarted,
    PollingStopped,
}

impl DirectEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DirectEvent::Message(_) => EventKind::Message,
            DirectEvent::Typing(_) => EventKind::Typing,
            DirectEvent::PendingRequest(_) => EventKind::PendingRequest,
            DirectEvent::Error(_) => EventKind::Error,
            DirectEvent::PollingStarted => EventKind::PollingStarted,
            DirectEvent::PollingStopped => EventKind::PollingStopped,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Message => "message",
            EventKind::Typing => "typing",
            EventKind::PendingRequest => "pending_request",
            EventKind::Error => "error",
            EventKind::PollingStarted => "polling:start",
            EventKind::PollingStopped => "polling:stop",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&DirectEvent) + Send + Sync>;

/// Publish/subscribe hub for [`DirectEvent`]s.
///
/// Typed callbacks run inline on the publishing task, in registration order;
/// a panicking callback is logged and skipped. Async consumers can instead
/// take a broadcast receiver with [`EventEmitter::subscribe`].
pub struct EventEmitter {
    listeners: Mutex<Vec<(ListenerId, EventKind, Listener)>>,
    next_id: AtomicU64,
    sender: broadcast::Sender<DirectEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            sender,
        }
    }

    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&DirectEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock_listeners().push((id, kind, Arc::new(listener)));
        id
    }

    pub fn on_message<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&MessageEvent) + Send + Sync + 'static,
    {
        self.on(EventKind::Message, move |event| {
            if let DirectEvent::Message(msg) = event {
                listener(msg);
            }
        })
    }

    pub fn on_typing<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&TypingEvent) + Send + Sync + 'static,
    {
        self.on(EventKind::Typing, move |event| {
            if let DirectEvent::Typing(typing) = event {
                listener(typing);
            }
        })
    }

    pub fn on_pending_request<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&PendingRequestEvent) + Send + Sync + 'static,
    {
        self.on(EventKind::PendingRequest, move |event| {
            if let DirectEvent::PendingRequest(pending) = event {
                listener(pending);
            }
        })
    }

    pub fn on_error<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ErrorEvent) + Send + Sync + 'static,
    {
        self.on(EventKind::Error, move |event| {
            if let DirectEvent::Error(err) = event {
                listener(err);
            }
        })
    }

    pub fn on_polling_start<F>(&self, listener: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on(EventKind::PollingStarted, move |_| listener())
    }

    pub fn on_polling_stop<F>(&self, listener: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on(EventKind::PollingStopped, move |_| listener())
    }

    /// Remove a listener. Returns false if it was already gone.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock_listeners();
        let before = listeners.len();
        listeners.retain(|(lid, _, _)| *lid != id);
        listeners.len() != before
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.lock_listeners()
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .count()
    }

    /// Get a receiver for every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<DirectEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: DirectEvent) {
        let kind = event.kind();
        // Snapshot so callbacks may register or remove listeners.
        let targets: Vec<Listener> = self
            .lock_listeners()
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .map(|(_, _, l)| l.clone())
            .collect();

        debug!("Emitting {} to {} listener(s)", kind, targets.len());

        for listener in targets {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                error!("Listener for {} event panicked", kind);
            }
        }

        // No receivers is fine.
        let _ = self.sender.send(event);
    }

    fn lock_listeners(&self) -> std::sync::MutexGuard<'_, Vec<(ListenerId, EventKind, Listener)>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn message(id: &str) -> DirectEvent {
        DirectEvent::Message(MessageEvent::from_item(
            "t",
            &MessageItem::text(id, "u", "hi", 1),
            "me",
        ))
    }

    #[test]
    fn test_listeners_receive_only_their_kind() {
        let emitter = EventEmitter::default();
        let messages = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));

        let m = messages.clone();
        emitter.on_message(move |_| {
            m.fetch_add(1, Ordering::SeqCst);
        });
        let m = messages.clone();
        emitter.on_message(move |_| {
            m.fetch_add(1, Ordering::SeqCst);
        });
        let e = errors.clone();
        emitter.on_error(move |_| {
            e.fetch_add(1, Ordering::SeqCst);
        });

        emitter.emit(message("1"));

        assert_eq!(messages.load(Ordering::SeqCst), 2);
        assert_eq!(errors.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_others() {
        let emitter = EventEmitter::default();
        let calls = Arc::new(AtomicUsize::new(0));

        emitter.on_message(|_| panic!("bot bug"));
        let c = calls.clone();
        emitter.on_message(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        emitter.emit(message("1"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_off_removes_listener() {
        let emitter = EventEmitter::default();
        let id = emitter.on_polling_start(|| {});
        assert_eq!(emitter.listener_count(EventKind::PollingStarted), 1);
        assert!(emitter.off(id));
        assert!(!emitter.off(id));
        assert_eq!(emitter.listener_count(EventKind::PollingStarted), 0);
    }

    #[tokio::test]
    async fn test_broadcast_subscriber_gets_events() {
        let emitter = EventEmitter::default();
        let mut rx = emitter.subscribe();

        emitter.emit(DirectEvent::PollingStarted);
        emitter.emit(message("7"));

        assert_eq!(rx.recv().await.unwrap(), DirectEvent::PollingStarted);
        match rx.recv().await.unwrap() {
            DirectEvent::Message(msg) => assert_eq!(msg.item_id, "7"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_message_event_flags_own_items() {
        let item = MessageItem::text("1", "me", "hello", 3);
        let event = MessageEvent::from_item("t", &item, "me");
        assert!(event.is_from_me);
        assert_eq!(event.text, "hello");
    }
}
