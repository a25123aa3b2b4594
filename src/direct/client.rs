use super::correlator::ReplyCorrelator;
use super::error::DirectError;
use super::events::{
    DirectEvent, ErrorEvent, EventEmitter, EventKind, ListenerId, MessageEvent,
    PendingRequestEvent, TypingEvent,
};
use super::inbox::InboxReader;
use super::poller::{PollHandle, PollSettings, Poller};
use super::retry::{send_with_retry, RetryPolicy};
use super::types::{InboxSnapshot, RecentMessage, SendResult, Thread, UserProfile};
use crate::config::Config;
use crate::transport::{DirectTransport, HttpTransport, ThreadAction};
use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Per-call overrides for [`DirectClient::send_message_with_reply`].
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// How long to wait for a reply; the configured default when unset.
    pub timeout: Option<Duration>,
    /// Retry transient send failures with the client's retry policy.
    pub retry: bool,
}

/// Direct-message client: polling engine, reply correlation, outbound sends
/// and thread operations over one transport.
pub struct DirectClient {
    transport: Arc<dyn DirectTransport>,
    reader: InboxReader,
    emitter: Arc<EventEmitter>,
    correlator: ReplyCorrelator,
    poller: Arc<Poller>,
    retry: RetryPolicy,
    reply_timeout: Duration,
    poll_interval: Duration,
    self_user_id: String,
}

impl DirectClient {
    pub fn new(
        transport: Arc<dyn DirectTransport>,
        self_user_id: impl Into<String>,
        config: &Config,
    ) -> Self {
        let self_user_id = self_user_id.into();
        let reader = InboxReader::new(transport.clone(), config.inbox.fallback.clone());
        let emitter = Arc::new(EventEmitter::default());
        let correlator = ReplyCorrelator::new();

        let settings = PollSettings {
            mode: config.polling.mode,
            ledger_capacity: config.polling.ledger_capacity,
            error_backoff_multiplier: config.polling.error_backoff_multiplier,
            check_pending: config.polling.check_pending,
        };
        let poller = Arc::new(Poller::new(
            reader.clone(),
            emitter.clone(),
            correlator.clone(),
            self_user_id.clone(),
            settings,
        ));

        Self {
            transport,
            reader,
            emitter,
            correlator,
            poller,
            retry: RetryPolicy::from(&config.retry),
            reply_timeout: Duration::from_millis(config.replies.default_timeout_ms),
            poll_interval: Duration::from_millis(config.polling.interval_ms),
            self_user_id,
        }
    }

    /// Build an HTTP-backed client from the session section of `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let cookies = config.session.resolve_cookies()?;
        let user_id = cookies
            .user_id()
            .map(str::to_string)
            .ok_or_else(|| DirectError::NotLoggedIn("session has no user id".to_string()))?;
        let transport = HttpTransport::new(&config.session, &config.inbox, cookies)?;
        info!("Direct client ready for user {}", user_id);
        Ok(Self::new(Arc::new(transport), user_id, config))
    }

    pub fn self_user_id(&self) -> &str {
        &self.self_user_id
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    // Polling

    /// Run the poll loop on the current task until [`DirectClient::stop_polling`].
    pub async fn start_polling(&self, interval: Option<Duration>) {
        self.poller
            .run(interval.unwrap_or(self.poll_interval))
            .await;
    }

    /// Run the poll loop on a background task.
    pub fn spawn_polling(&self, interval: Option<Duration>) -> JoinHandle<()> {
        let poller = self.poller.clone();
        let interval = interval.unwrap_or(self.poll_interval);
        tokio::spawn(async move { poller.run(interval).await })
    }

    pub fn stop_polling(&self) {
        self.poller.stop();
    }

    pub fn is_polling(&self) -> bool {
        self.poller.is_running()
    }

    pub fn poll_handle(&self) -> PollHandle {
        PollHandle::new(self.poller.clone())
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    // Reply correlation

    pub async fn register_reply_handler<F>(
        &self,
        item_id: &str,
        callback: F,
        timeout: Option<Duration>,
    ) where
        F: FnOnce(MessageEvent) + Send + 'static,
    {
        self.correlator
            .register(
                item_id,
                Box::new(callback),
                timeout.unwrap_or(self.reply_timeout),
            )
            .await;
    }

    pub async fn clear_reply_handler(&self, item_id: &str) -> bool {
        self.correlator.clear(item_id).await
    }

    /// Send `text` and call `on_reply` with the first inbound item that
    /// replies to it.
    pub async fn send_message_with_reply<F>(
        &self,
        thread_id: &str,
        text: &str,
        on_reply: F,
        options: SendOptions,
    ) -> Result<SendResult, DirectError>
    where
        F: FnOnce(MessageEvent) + Send + 'static,
    {
        let sent = if options.retry {
            self.send_with_retry("send_message", || self.transport.send_text(thread_id, text))
                .await?
        } else {
            self.transport.send_text(thread_id, text).await?
        };
        self.register_reply_handler(&sent.item_id, on_reply, options.timeout)
            .await;
        Ok(sent)
    }

    // Sends

    /// Run `send_once` under this client's retry policy.
    pub async fn send_with_retry<T, F, Fut>(
        &self,
        label: &str,
        send_once: F,
    ) -> Result<T, DirectError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DirectError>>,
    {
        send_with_retry(&self.retry, label, send_once).await
    }

    pub async fn send_message(&self, thread_id: &str, text: &str) -> Result<SendResult, DirectError> {
        let sent = self.transport.send_text(thread_id, text).await?;
        debug!("Sent {} to thread {}", sent.item_id, thread_id);
        Ok(sent)
    }

    pub async fn send_message_to_users(
        &self,
        user_ids: &[String],
        text: &str,
    ) -> Result<SendResult, DirectError> {
        self.transport.send_text_to_users(user_ids, text).await
    }

    /// Upload and send a photo, retrying transient failures.
    pub async fn send_photo(&self, thread_id: &str, photo: &[u8]) -> Result<SendResult, DirectError> {
        self.send_with_retry("send_photo", || self.transport.send_photo(thread_id, photo))
            .await
    }

    /// Upload and send an MP4 video, retrying transient failures.
    pub async fn send_video(&self, thread_id: &str, video: &[u8]) -> Result<SendResult, DirectError> {
        self.send_with_retry("send_video", || self.transport.send_video(thread_id, video))
            .await
    }

    /// Upload and send an audio clip as a voice note, retrying transient failures.
    pub async fn send_voice_note(
        &self,
        thread_id: &str,
        audio: &[u8],
    ) -> Result<SendResult, DirectError> {
        self.send_with_retry("send_voice_note", || {
            self.transport.send_voice_note(thread_id, audio)
        })
        .await
    }

    pub async fn send_link(
        &self,
        thread_id: &str,
        url: &str,
        text: &str,
    ) -> Result<SendResult, DirectError> {
        self.transport.send_link(thread_id, url, text).await
    }

    // Reads

    pub async fn get_inbox(&self) -> Result<InboxSnapshot, DirectError> {
        self.reader.fetch_inbox().await
    }

    pub async fn get_pending_inbox(&self) -> Result<InboxSnapshot, DirectError> {
        self.reader.fetch_pending().await
    }

    pub async fn get_thread(&self, thread_id: &str) -> Result<Thread, DirectError> {
        self.transport.fetch_thread(thread_id).await
    }

    // Users

    pub async fn get_user_by_username(&self, username: &str) -> Result<UserProfile, DirectError> {
        let username = username.trim_start_matches('@');
        self.transport.fetch_user_by_username(username).await
    }

    pub async fn get_user_info(&self, user_id: &str) -> Result<UserProfile, DirectError> {
        self.transport.fetch_user_info(user_id).await
    }

    pub async fn search_users(&self, query: &str) -> Result<Vec<UserProfile>, DirectError> {
        self.transport.search_users(query).await
    }

    /// Resolve each username to its account id, then send `text` to them
    /// as one group message.
    pub async fn send_message_to_usernames(
        &self,
        usernames: &[String],
        text: &str,
    ) -> Result<SendResult, DirectError> {
        let mut user_ids = Vec::with_capacity(usernames.len());
        for username in usernames {
            let user = self.get_user_by_username(username).await?;
            debug!("Resolved {} to {}", username, user.pk);
            user_ids.push(user.pk);
        }
        self.send_message_to_users(&user_ids, text).await
    }

    /// Up to `limit` messages across all threads, newest first.
    pub async fn get_recent_messages(&self, limit: usize) -> Result<Vec<RecentMessage>, DirectError> {
        let inbox = self.get_inbox().await?;
        let mut messages: Vec<RecentMessage> = inbox
            .threads
            .iter()
            .flat_map(|thread| {
                thread.items.iter().map(move |item| RecentMessage {
                    thread_id: thread.thread_id.clone(),
                    thread_title: thread.thread_title.clone(),
                    item_id: item.item_id.clone(),
                    user_id: item.user_id.clone(),
                    text: item.text.clone().unwrap_or_default(),
                    timestamp: item.timestamp,
                })
            })
            .collect();
        messages.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        messages.truncate(limit);
        Ok(messages)
    }

    pub async fn unseen_count(&self) -> Result<usize, DirectError> {
        let inbox = self.get_inbox().await?;
        Ok(inbox.unseen_from_others(&self.self_user_id))
    }

    // Thread operations

    pub async fn mark_seen(&self, thread_id: &str, item_id: &str) -> Result<(), DirectError> {
        self.act(
            thread_id,
            ThreadAction::MarkSeen {
                item_id: item_id.to_string(),
            },
        )
        .await
    }

    pub async fn approve_thread(&self, thread_id: &str) -> Result<(), DirectError> {
        self.act(thread_id, ThreadAction::Approve).await
    }

    /// Approve every pending request. Returns how many were approved.
    pub async fn approve_all_pending(&self) -> Result<usize, DirectError> {
        let pending = self.get_pending_inbox().await?;
        for thread in &pending.threads {
            self.approve_thread(&thread.thread_id).await?;
        }
        Ok(pending.threads.len())
    }

    pub async fn react(&self, thread_id: &str, item_id: &str, emoji: &str) -> Result<(), DirectError> {
        self.act(
            thread_id,
            ThreadAction::React {
                item_id: item_id.to_string(),
                emoji: emoji.to_string(),
            },
        )
        .await
    }

    pub async fn remove_reaction(&self, thread_id: &str, item_id: &str) -> Result<(), DirectError> {
        self.act(
            thread_id,
            ThreadAction::RemoveReaction {
                item_id: item_id.to_string(),
            },
        )
        .await
    }

    /// Delete an item for everyone. Any wait for a reply to it is dropped.
    pub async fn unsend(&self, thread_id: &str, item_id: &str) -> Result<(), DirectError> {
        self.act(
            thread_id,
            ThreadAction::Unsend {
                item_id: item_id.to_string(),
            },
        )
        .await?;
        self.correlator.clear(item_id).await;
        Ok(())
    }

    /// Toggle the typing indicator, and publish the change locally.
    pub async fn indicate_typing(&self, thread_id: &str, active: bool) -> Result<(), DirectError> {
        self.act(thread_id, ThreadAction::Typing { active }).await?;
        self.emitter.emit(DirectEvent::Typing(TypingEvent {
            thread_id: thread_id.to_string(),
            user_id: self.self_user_id.clone(),
            is_typing: active,
        }));
        Ok(())
    }

    pub async fn mute_thread(&self, thread_id: &str) -> Result<(), DirectError> {
        self.act(thread_id, ThreadAction::Mute).await
    }

    pub async fn unmute_thread(&self, thread_id: &str) -> Result<(), DirectError> {
        self.act(thread_id, ThreadAction::Unmute).await
    }

    /// Hide the thread from the inbox (the API's "delete").
    pub async fn delete_thread(&self, thread_id: &str) -> Result<(), DirectError> {
        self.act(thread_id, ThreadAction::Hide).await
    }

    pub async fn leave_thread(&self, thread_id: &str) -> Result<(), DirectError> {
        self.act(thread_id, ThreadAction::Leave).await
    }

    pub async fn update_thread_title(&self, thread_id: &str, title: &str) -> Result<(), DirectError> {
        self.act(thread_id, ThreadAction::UpdateTitle(title.to_string()))
            .await
    }

    pub async fn add_users_to_thread(
        &self,
        thread_id: &str,
        user_ids: &[String],
    ) -> Result<(), DirectError> {
        self.act(thread_id, ThreadAction::AddUsers(user_ids.to_vec()))
            .await
    }

    async fn act(&self, thread_id: &str, action: ThreadAction) -> Result<(), DirectError> {
        let name = action.name();
        self.transport.thread_action(thread_id, action).await?;
        debug!("{} on thread {}", name, thread_id);
        Ok(())
    }

    // Events

    pub fn events(&self) -> &Arc<EventEmitter> {
        &self.emitter
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DirectEvent> {
        self.emitter.subscribe()
    }

    pub fn on_message<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&MessageEvent) + Send + Sync + 'static,
    {
        self.emitter.on_message(listener)
    }

    pub fn on_typing<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&TypingEvent) + Send + Sync + 'static,
    {
        self.emitter.on_typing(listener)
    }

    pub fn on_pending_request<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&PendingRequestEvent) + Send + Sync + 'static,
    {
        self.emitter.on_pending_request(listener)
    }

    pub fn on_error<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ErrorEvent) + Send + Sync + 'static,
    {
        self.emitter.on_error(listener)
    }

    pub fn on_polling_start<F>(&self, listener: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.emitter.on_polling_start(listener)
    }

    pub fn on_polling_stop<F>(&self, listener: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.emitter.on_polling_stop(listener)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.emitter.off(id)
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.emitter.listener_count(kind)
    }
}
