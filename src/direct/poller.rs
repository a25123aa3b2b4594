use super::correlator::ReplyCorrelator;
use super::error::DirectError;
use super::events::{DirectEvent, ErrorEvent, EventEmitter, MessageEvent, PendingRequestEvent};
use super::inbox::InboxReader;
use super::ledger::{DedupLedger, DEFAULT_LEDGER_CAPACITY};
use super::types::InboxSnapshot;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5000);

/// How the loop decides which items are new.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollMode {
    /// Every unseen item of every thread, tracked by id.
    #[default]
    Ledger,
    /// Only each thread's latest item from someone else, newer than the
    /// highest timestamp emitted so far.
    Watermark,
}

#[derive(Debug, Clone)]
pub struct PollSettings {
    pub mode: PollMode,
    pub ledger_capacity: usize,
    pub error_backoff_multiplier: u32,
    pub check_pending: bool,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            mode: PollMode::Ledger,
            ledger_capacity: DEFAULT_LEDGER_CAPACITY,
            error_backoff_multiplier: 2,
            check_pending: true,
        }
    }
}

/// State only ever touched by the cycle holding the lock.
struct CycleState {
    ledger: DedupLedger,
    watermark: i64,
}

/// Drives fetch -> diff -> emit -> pending check -> sleep.
///
/// At most one loop runs per poller. A loop restarted while the previous one
/// is still finishing its cycle waits on the run lock, so `PollingStarted`
/// always follows the previous loop's `PollingStopped`.
pub struct Poller {
    reader: InboxReader,
    emitter: Arc<EventEmitter>,
    correlator: ReplyCorrelator,
    self_user_id: String,
    settings: PollSettings,
    running: AtomicBool,
    epoch: AtomicU64,
    cycle: Mutex<CycleState>,
    run_lock: Mutex<()>,
    wake: Notify,
}

impl Poller {
    pub fn new(
        reader: InboxReader,
        emitter: Arc<EventEmitter>,
        correlator: ReplyCorrelator,
        self_user_id: impl Into<String>,
        settings: PollSettings,
    ) -> Self {
        let ledger = DedupLedger::new(settings.ledger_capacity);
        Self {
            reader,
            emitter,
            correlator,
            self_user_id: self_user_id.into(),
            settings,
            running: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            cycle: Mutex::new(CycleState {
                ledger,
                watermark: 0,
            }),
            run_lock: Mutex::new(()),
            wake: Notify::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run the loop until [`Poller::stop`] is called. Returns immediately if
    /// a loop is already running.
    pub async fn run(&self, interval: Duration) {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Already polling");
            return;
        }
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let _reset = ResetOnDrop {
            poller: self,
            epoch,
        };

        // Bumping the epoch above tells an older loop to leave; wait for it.
        let _run = self.run_lock.lock().await;
        if !self.is_current(epoch) {
            debug!("Stopped before the previous loop finished");
            return;
        }

        info!(
            "Polling started (interval {}ms, mode {:?})",
            interval.as_millis(),
            self.settings.mode
        );
        self.emitter.emit(DirectEvent::PollingStarted);

        loop {
            if !self.is_current(epoch) {
                break;
            }

            let delay = match self.run_cycle().await {
                Ok(()) => interval,
                Err(e) => {
                    if e.is_fatal() {
                        error!("Polling failed, session needs attention: {}", e);
                    } else {
                        error!("Polling failed: {}", e);
                    }
                    self.emitter.emit(DirectEvent::Error(ErrorEvent {
                        message: e.to_string(),
                        fatal: e.is_fatal(),
                    }));
                    interval.saturating_mul(self.settings.error_backoff_multiplier.max(1))
                }
            };

            // Register for the wake-up before re-checking the flag so a stop
            // issued in between is not missed.
            let notified = self.wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.is_current(epoch) {
                break;
            }

            debug!("Next poll in {}ms", delay.as_millis());
            tokio::select! {
                _ = sleep(delay) => {}
                _ = &mut notified => {}
            }
        }

        info!("Polling stopped");
        self.emitter.emit(DirectEvent::PollingStopped);
    }

    /// Ask the running loop to stop. A cycle in progress still completes.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            debug!("Stop requested");
        }
        self.wake.notify_waiters();
    }

    /// One fetch-diff-emit pass, without sleeping.
    pub async fn run_cycle(&self) -> Result<(), DirectError> {
        let mut state = self.cycle.lock().await;
        debug!("Poll cycle start");

        let inbox = self.reader.fetch_inbox().await?;
        let fresh = match self.settings.mode {
            PollMode::Ledger => self.diff_by_ledger(&mut state, &inbox),
            PollMode::Watermark => self.diff_by_watermark(&mut state, &inbox),
        };

        if !fresh.is_empty() {
            debug!("{} new message(s)", fresh.len());
        }
        for event in fresh {
            self.correlator.resolve(&event).await;
            self.emitter.emit(DirectEvent::Message(event));
        }

        if self.settings.check_pending {
            let pending = self.reader.fetch_pending().await?;
            if !pending.threads.is_empty() {
                info!("{} pending message request(s)", pending.threads.len());
                self.emitter
                    .emit(DirectEvent::PendingRequest(PendingRequestEvent {
                        count: pending.threads.len(),
                        threads: pending.threads,
                    }));
            }
        }

        debug!("Poll cycle done (ledger holds {})", state.ledger.len());
        Ok(())
    }

    pub async fn ledger_len(&self) -> usize {
        self.cycle.lock().await.ledger.len()
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.running.load(Ordering::SeqCst) && self.epoch.load(Ordering::SeqCst) == epoch
    }

    fn diff_by_ledger(&self, state: &mut CycleState, inbox: &InboxSnapshot) -> Vec<MessageEvent> {
        let mut fresh = Vec::new();
        for thread in &inbox.threads {
            for item in &thread.items {
                if state.ledger.should_emit(&item.item_id) {
                    fresh.push(MessageEvent::from_item(
                        &thread.thread_id,
                        item,
                        &self.self_user_id,
                    ));
                }
            }
        }
        fresh
    }

    fn diff_by_watermark(
        &self,
        state: &mut CycleState,
        inbox: &InboxSnapshot,
    ) -> Vec<MessageEvent> {
        let mut fresh = Vec::new();
        for thread in &inbox.threads {
            let Some(latest) = thread.latest_item() else {
                continue;
            };
            if latest.user_id == self.self_user_id || latest.timestamp <= state.watermark {
                continue;
            }
            state.watermark = latest.timestamp;
            fresh.push(MessageEvent::from_item(
                &thread.thread_id,
                latest,
                &self.self_user_id,
            ));
        }
        fresh
    }
}

/// Clears the running flag if the loop future is dropped mid-flight.
struct ResetOnDrop<'a> {
    poller: &'a Poller,
    epoch: u64,
}

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        if self.poller.epoch.load(Ordering::SeqCst) == self.epoch {
            self.poller.running.store(false, Ordering::SeqCst);
        }
    }
}

/// Cloneable stop switch for a poller running elsewhere.
#[derive(Clone)]
pub struct PollHandle {
    poller: Arc<Poller>,
}

impl PollHandle {
    pub fn new(poller: Arc<Poller>) -> Self {
        Self { poller }
    }

    pub fn stop(&self) {
        self.poller.stop();
    }

    pub fn is_running(&self) -> bool {
        self.poller.is_running()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::direct::inbox::default_strategies;
    use crate::direct::types::{MessageItem, SendResult, Thread, UserProfile};
    use crate::transport::{DirectTransport, ThreadAction};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    /// Serves the same inbox on every fetch.
    struct FixedInbox {
        inbox: StdMutex<InboxSnapshot>,
    }

    #[async_trait]
    impl DirectTransport for FixedInbox {
        async fn fetch_inbox(
            &self,
            _: crate::direct::types::InboxVariant,
        ) -> Result<InboxSnapshot, DirectError> {
            Ok(self.inbox.lock().unwrap().clone())
        }

        async fn fetch_pending_inbox(&self) -> Result<InboxSnapshot, DirectError> {
            Ok(InboxSnapshot::default())
        }

        async fn fetch_thread(&self, _: &str) -> Result<Thread, DirectError> {
            unimplemented!()
        }

        async fn send_text(&self, _: &str, _: &str) -> Result<SendResult, DirectError> {
            unimplemented!()
        }

        async fn send_text_to_users(
            &self,
            _: &[String],
            _: &str,
        ) -> Result<SendResult, DirectError> {
            unimplemented!()
        }

        async fn send_photo(&self, _: &str, _: &[u8]) -> Result<SendResult, DirectError> {
            unimplemented!()
        }

        async fn send_video(&self, _: &str, _: &[u8]) -> Result<SendResult, DirectError> {
            unimplemented!()
        }

        async fn send_voice_note(&self, _: &str, _: &[u8]) -> Result<SendResult, DirectError> {
            unimplemented!()
        }

        async fn send_link(&self, _: &str, _: &str, _: &str) -> Result<SendResult, DirectError> {
            unimplemented!()
        }

        async fn thread_action(&self, _: &str, _: ThreadAction) -> Result<(), DirectError> {
            unimplemented!()
        }

        async fn fetch_user_by_username(&self, _: &str) -> Result<UserProfile, DirectError> {
            unimplemented!()
        }

        async fn fetch_user_info(&self, _: &str) -> Result<UserProfile, DirectError> {
            unimplemented!()
        }

        async fn search_users(&self, _: &str) -> Result<Vec<UserProfile>, DirectError> {
            unimplemented!()
        }
    }

    fn thread(id: &str, items: Vec<MessageItem>) -> Thread {
        Thread {
            thread_id: id.to_string(),
            items,
            ..Thread::default()
        }
    }

    fn poller(inbox: InboxSnapshot, mode: PollMode) -> (Poller, Arc<StdMutex<Vec<String>>>) {
        let transport = Arc::new(FixedInbox {
            inbox: StdMutex::new(inbox),
        });
        let emitter = Arc::new(EventEmitter::default());
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let s = seen.clone();
        emitter.on_message(move |m| s.lock().unwrap().push(m.item_id.clone()));

        let poller = Poller::new(
            InboxReader::new(transport, default_strategies()),
            emitter,
            ReplyCorrelator::new(),
            "me",
            PollSettings {
                mode,
                ..PollSettings::default()
            },
        );
        (poller, seen)
    }

    #[tokio::test]
    async fn test_ledger_mode_emits_each_item_once() {
        let inbox = InboxSnapshot::with_threads(vec![
            thread(
                "t1",
                vec![
                    MessageItem::text("a2", "friend", "second", 20),
                    MessageItem::text("a1", "me", "first", 10),
                ],
            ),
            thread("t2", vec![MessageItem::text("b1", "other", "yo", 15)]),
        ]);
        let (poller, seen) = poller(inbox, PollMode::Ledger);

        poller.run_cycle().await.unwrap();
        poller.run_cycle().await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["a2", "a1", "b1"]);
        assert_eq!(poller.ledger_len().await, 3);
    }

    #[tokio::test]
    async fn test_watermark_mode_emits_latest_from_others() {
        let inbox = InboxSnapshot::with_threads(vec![
            thread(
                "t1",
                vec![
                    MessageItem::text("a2", "friend", "new", 20),
                    MessageItem::text("a1", "friend", "old", 10),
                ],
            ),
            thread("t2", vec![MessageItem::text("b1", "me", "mine", 30)]),
            thread("t3", vec![MessageItem::text("c1", "other", "older", 15)]),
        ]);
        let (poller, seen) = poller(inbox, PollMode::Watermark);

        poller.run_cycle().await.unwrap();
        poller.run_cycle().await.unwrap();

        // c1 is below the watermark already raised by a2.
        assert_eq!(*seen.lock().unwrap(), vec!["a2"]);
    }

    #[tokio::test]
    async fn test_stop_before_start_is_harmless() {
        let (poller, _) = poller(InboxSnapshot::default(), PollMode::Ledger);
        poller.stop();
        assert!(!poller.is_running());
    }
}
