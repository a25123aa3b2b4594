use super::events::MessageEvent;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info};

pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_millis(120_000);

/// Deadline used when `registered_at + timeout` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Called once with the first inbound item that replies to the watched item.
pub type ReplyCallback = Box<dyn FnOnce(MessageEvent) + Send + 'static>;

/// A registered wait for a reply to one outbound item.
struct ReplyHandler {
    callback: ReplyCallback,
    registration: u64,
    registered_at: Instant,
    deadline: Instant,
    expiry: JoinHandle<()>,
}

/// Matches inbound replies to outbound items that are waiting for one.
///
/// Every registration gets its own expiry timer, so handlers expire on time
/// even while polling is stopped or slow.
#[derive(Clone)]
pub struct ReplyCorrelator {
    pending: Arc<Mutex<HashMap<String, ReplyHandler>>>,
    next_registration: Arc<AtomicU64>,
}

impl ReplyCorrelator {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_registration: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Wait for a reply to `item_id`. Registering the same id again replaces
    /// the previous handler, which is dropped without being called.
    pub async fn register(&self, item_id: &str, callback: ReplyCallback, timeout: Duration) {
        let registration = self.next_registration.fetch_add(1, Ordering::Relaxed);
        let registered_at = Instant::now();
        let deadline = registered_at
            .checked_add(timeout)
            .unwrap_or_else(|| registered_at + FAR_FUTURE);

        // Hold the lock while spawning so the timer cannot run before the
        // handler is in the map.
        let mut map = self.pending.lock().await;
        let expiry = {
            let pending = self.pending.clone();
            let item_id = item_id.to_string();
            tokio::spawn(async move {
                sleep_until(deadline).await;
                let mut map = pending.lock().await;
                // Only remove the registration this timer belongs to.
                if map
                    .get(&item_id)
                    .map(|h| h.registration == registration)
                    .unwrap_or(false)
                {
                    map.remove(&item_id);
                    info!("Reply handler for {} expired", item_id);
                }
            })
        };

        let handler = ReplyHandler {
            callback,
            registration,
            registered_at,
            deadline,
            expiry,
        };

        if let Some(previous) = map.insert(item_id.to_string(), handler) {
            previous.expiry.abort();
            debug!("Replaced existing reply handler for {}", item_id);
        }
        debug!("Registered reply handler for {} ({:?})", item_id, timeout);
    }

    /// Hand `inbound` to the handler waiting on the item it replies to.
    /// Returns true if a handler was found and invoked.
    pub async fn resolve(&self, inbound: &MessageEvent) -> bool {
        let Some(target) = inbound.replied_to_item_id() else {
            return false;
        };

        let handler = {
            let mut map = self.pending.lock().await;
            match map.remove(target) {
                Some(h) => h,
                None => return false,
            }
        };
        handler.expiry.abort();

        if Instant::now() > handler.deadline {
            // Timer has not fired yet but the deadline already passed.
            debug!("Reply handler for {} past deadline, dropping", target);
            return false;
        }

        debug!(
            "Reply {} matched {} after {:?}",
            inbound.item_id,
            target,
            handler.registered_at.elapsed()
        );

        let callback = handler.callback;
        let event = inbound.clone();
        if catch_unwind(AssertUnwindSafe(move || callback(event))).is_err() {
            error!("Reply handler for {} panicked", target);
        }
        true
    }

    /// Cancel the wait on `item_id`. Returns false if nothing was pending.
    pub async fn clear(&self, item_id: &str) -> bool {
        let mut map = self.pending.lock().await;
        match map.remove(item_id) {
            Some(handler) => {
                handler.expiry.abort();
                debug!("Cleared reply handler for {}", item_id);
                true
            }
            None => false,
        }
    }

    pub async fn is_pending(&self, item_id: &str) -> bool {
        self.pending.lock().await.contains_key(item_id)
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

impl Default for ReplyCorrelator {
    fn default() -> Self {
        Self::new()
    }
}
