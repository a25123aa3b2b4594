// Shared fixtures for the integration tests: a scripted transport that
// records every call with the (paused) tokio clock.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use inbox_pulse::config::Config;
use inbox_pulse::direct::{
    DirectClient, DirectError, DirectEvent, InboxSnapshot, InboxVariant, MessageItem, SendResult,
    Thread, UserProfile,
};
use inbox_pulse::transport::{DirectTransport, ThreadAction};

pub const SELF_ID: &str = "me";

#[derive(Default)]
pub struct ScriptedTransport {
    /// Served in order; once empty, `steady` is served.
    inbox_script: Mutex<VecDeque<Result<InboxSnapshot, DirectError>>>,
    steady: Mutex<InboxSnapshot>,
    pending: Mutex<InboxSnapshot>,
    /// Served in order before `pending`.
    pending_script: Mutex<VecDeque<Result<InboxSnapshot, DirectError>>>,
    send_script: Mutex<VecDeque<Result<SendResult, DirectError>>>,
    fetch_delay: Mutex<Duration>,
    pub fetch_times: Mutex<Vec<Instant>>,
    pub sent: Mutex<Vec<(String, String)>>,
    pub photo_attempts: Mutex<usize>,
    /// (kind, thread_id, byte count) for every video or voice upload attempt.
    pub media_attempts: Mutex<Vec<(String, String, usize)>>,
    users: Mutex<Vec<UserProfile>>,
    pub actions: Mutex<Vec<(String, ThreadAction)>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_inbox(&self, result: Result<InboxSnapshot, DirectError>) {
        self.inbox_script.lock().unwrap().push_back(result);
    }

    pub fn set_steady(&self, inbox: InboxSnapshot) {
        *self.steady.lock().unwrap() = inbox;
    }

    pub fn set_pending(&self, inbox: InboxSnapshot) {
        *self.pending.lock().unwrap() = inbox;
    }

    pub fn push_pending(&self, result: Result<InboxSnapshot, DirectError>) {
        self.pending_script.lock().unwrap().push_back(result);
    }

    pub fn push_send(&self, result: Result<SendResult, DirectError>) {
        self.send_script.lock().unwrap().push_back(result);
    }

    pub fn add_user(&self, pk: &str, username: &str) {
        self.users.lock().unwrap().push(UserProfile {
            pk: pk.to_string(),
            username: username.to_string(),
            ..UserProfile::default()
        });
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock().unwrap() = delay;
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_times.lock().unwrap().len()
    }

    fn record_media(&self, kind: &str, thread_id: &str, bytes: &[u8]) -> Result<SendResult, DirectError> {
        self.media_attempts.lock().unwrap().push((
            kind.to_string(),
            thread_id.to_string(),
            bytes.len(),
        ));
        self.next_send(thread_id)
    }

    fn find_user(&self, matches: impl Fn(&UserProfile) -> bool) -> Result<UserProfile, DirectError> {
        self.users
            .lock()
            .unwrap()
            .iter()
            .find(|u| matches(u))
            .cloned()
            .ok_or_else(|| DirectError::Api {
                status: 404,
                error_type: "user_not_found".to_string(),
                message: "User not found".to_string(),
            })
    }

    fn next_send(&self, thread_id: &str) -> Result<SendResult, DirectError> {
        self.send_script.lock().unwrap().pop_front().unwrap_or_else(|| {
            Ok(SendResult {
                item_id: format!("out-{}", self.sent.lock().unwrap().len()),
                thread_id: Some(thread_id.to_string()),
                client_context: None,
            })
        })
    }
}

#[async_trait]
impl DirectTransport for ScriptedTransport {
    async fn fetch_inbox(&self, _variant: InboxVariant) -> Result<InboxSnapshot, DirectError> {
        self.fetch_times.lock().unwrap().push(Instant::now());
        let delay = *self.fetch_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.inbox_script.lock().unwrap().pop_front();
        match scripted {
            Some(result) => result,
            None => Ok(self.steady.lock().unwrap().clone()),
        }
    }

    async fn fetch_pending_inbox(&self) -> Result<InboxSnapshot, DirectError> {
        let scripted = self.pending_script.lock().unwrap().pop_front();
        match scripted {
            Some(result) => result,
            None => Ok(self.pending.lock().unwrap().clone()),
        }
    }

    async fn fetch_thread(&self, thread_id: &str) -> Result<Thread, DirectError> {
        self.steady
            .lock()
            .unwrap()
            .threads
            .iter()
            .find(|t| t.thread_id == thread_id)
            .cloned()
            .ok_or_else(|| DirectError::Api {
                status: 404,
                error_type: "not_found".to_string(),
                message: "thread not found".to_string(),
            })
    }

    async fn send_text(&self, thread_id: &str, text: &str) -> Result<SendResult, DirectError> {
        let result = self.next_send(thread_id);
        if result.is_ok() {
            self.sent
                .lock()
                .unwrap()
                .push((thread_id.to_string(), text.to_string()));
        }
        result
    }

    async fn send_text_to_users(
        &self,
        user_ids: &[String],
        text: &str,
    ) -> Result<SendResult, DirectError> {
        self.send_text(&user_ids.join(","), text).await
    }

    async fn send_photo(&self, thread_id: &str, _photo: &[u8]) -> Result<SendResult, DirectError> {
        *self.photo_attempts.lock().unwrap() += 1;
        self.next_send(thread_id)
    }

    async fn send_video(&self, thread_id: &str, video: &[u8]) -> Result<SendResult, DirectError> {
        self.record_media("video", thread_id, video)
    }

    async fn send_voice_note(
        &self,
        thread_id: &str,
        audio: &[u8],
    ) -> Result<SendResult, DirectError> {
        self.record_media("voice", thread_id, audio)
    }

    async fn send_link(
        &self,
        thread_id: &str,
        url: &str,
        text: &str,
    ) -> Result<SendResult, DirectError> {
        self.send_text(thread_id, &format!("{} {}", text, url)).await
    }

    async fn thread_action(
        &self,
        thread_id: &str,
        action: ThreadAction,
    ) -> Result<(), DirectError> {
        self.actions
            .lock()
            .unwrap()
            .push((thread_id.to_string(), action));
        Ok(())
    }

    async fn fetch_user_by_username(&self, username: &str) -> Result<UserProfile, DirectError> {
        self.find_user(|u| u.username == username)
    }

    async fn fetch_user_info(&self, user_id: &str) -> Result<UserProfile, DirectError> {
        self.find_user(|u| u.pk == user_id)
    }

    async fn search_users(&self, query: &str) -> Result<Vec<UserProfile>, DirectError> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.username.contains(query))
            .cloned()
            .collect())
    }
}

pub fn thread(id: &str, items: Vec<MessageItem>) -> Thread {
    Thread {
        thread_id: id.to_string(),
        items,
        ..Thread::default()
    }
}

pub fn inbox(threads: Vec<Thread>) -> InboxSnapshot {
    InboxSnapshot::with_threads(threads)
}

pub fn text(item_id: &str, user_id: &str, ts: i64) -> MessageItem {
    MessageItem::text(item_id, user_id, &format!("text of {}", item_id), ts)
}

pub fn client(transport: Arc<ScriptedTransport>, interval_ms: u64) -> DirectClient {
    let mut config = Config::default();
    config.polling.interval_ms = interval_ms;
    DirectClient::new(transport, SELF_ID, &config)
}

/// Short label per event, for asserting on ordering.
pub fn event_label(event: &DirectEvent) -> String {
    match event {
        DirectEvent::Message(m) => format!("message:{}", m.item_id),
        DirectEvent::Typing(_) => "typing".to_string(),
        DirectEvent::PendingRequest(p) => format!("pending:{}", p.count),
        DirectEvent::Error(e) if e.fatal => "fatal".to_string(),
        DirectEvent::Error(_) => "error".to_string(),
        DirectEvent::PollingStarted => "start".to_string(),
        DirectEvent::PollingStopped => "stop".to_string(),
    }
}

/// Drains whatever the receiver has buffered so far.
pub fn drain_labels(events: &mut broadcast::Receiver<DirectEvent>) -> Vec<String> {
    let mut labels = Vec::new();
    while let Ok(event) = events.try_recv() {
        labels.push(event_label(&event));
    }
    labels
}

/// Collects the ids of every message event the client publishes.
pub fn record_messages(client: &DirectClient) -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    client.on_message(move |m| s.lock().unwrap().push(m.item_id.clone()));
    seen
}
