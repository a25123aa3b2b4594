pub mod cookies;
pub mod http;

pub use cookies::SessionCookies;
pub use http::HttpTransport;

use crate::direct::error::DirectError;
use crate::direct::types::{InboxSnapshot, InboxVariant, SendResult, Thread, UserProfile};
use async_trait::async_trait;

/// Per-thread operations that acknowledge with nothing but success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadAction {
    MarkSeen { item_id: String },
    Approve,
    React { item_id: String, emoji: String },
    RemoveReaction { item_id: String },
    Unsend { item_id: String },
    Typing { active: bool },
    Mute,
    Unmute,
    Hide,
    Leave,
    UpdateTitle(String),
    AddUsers(Vec<String>),
}

impl ThreadAction {
    pub fn name(&self) -> &'static str {
        match self {
            ThreadAction::MarkSeen { .. } => "mark_seen",
            ThreadAction::Approve => "approve",
            ThreadAction::React { .. } => "react",
            ThreadAction::RemoveReaction { .. } => "remove_reaction",
            ThreadAction::Unsend { .. } => "unsend",
            ThreadAction::Typing { .. } => "typing",
            ThreadAction::Mute => "mute",
            ThreadAction::Unmute => "unmute",
            ThreadAction::Hide => "hide",
            ThreadAction::Leave => "leave",
            ThreadAction::UpdateTitle(_) => "update_title",
            ThreadAction::AddUsers(_) => "add_users",
        }
    }
}

/// Authenticated access to the direct-message API.
///
/// Implementations must report a rejected inbox query shape as
/// [`DirectError::Restricted`] so the inbox reader can fall back, and
/// classify 5xx / 429 / throttle responses so sends can be retried.
#[async_trait]
pub trait DirectTransport: Send + Sync {
    async fn fetch_inbox(&self, variant: InboxVariant) -> Result<InboxSnapshot, DirectError>;

    async fn fetch_pending_inbox(&self) -> Result<InboxSnapshot, DirectError>;

    async fn fetch_thread(&self, thread_id: &str) -> Result<Thread, DirectError>;

    async fn send_text(&self, thread_id: &str, text: &str) -> Result<SendResult, DirectError>;

    async fn send_text_to_users(
        &self,
        user_ids: &[String],
        text: &str,
    ) -> Result<SendResult, DirectError>;

    async fn send_photo(&self, thread_id: &str, photo: &[u8]) -> Result<SendResult, DirectError>;

    /// Upload an MP4 and share it to the thread.
    async fn send_video(&self, thread_id: &str, video: &[u8]) -> Result<SendResult, DirectError>;

    /// Upload an audio clip and share it as a voice note.
    async fn send_voice_note(
        &self,
        thread_id: &str,
        audio: &[u8],
    ) -> Result<SendResult, DirectError>;

    async fn send_link(
        &self,
        thread_id: &str,
        url: &str,
        text: &str,
    ) -> Result<SendResult, DirectError>;

    async fn thread_action(&self, thread_id: &str, action: ThreadAction)
        -> Result<(), DirectError>;

    async fn fetch_user_by_username(&self, username: &str) -> Result<UserProfile, DirectError>;

    async fn fetch_user_info(&self, user_id: &str) -> Result<UserProfile, DirectError>;

    async fn search_users(&self, query: &str) -> Result<Vec<UserProfile>, DirectError>;
}
