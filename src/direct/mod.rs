//! Polling engine for direct messages: inbox fallback, de-duplication,
//! reply correlation, event emission and retrying sends.

pub mod client;
pub mod correlator;
pub mod error;
pub mod events;
pub mod inbox;
pub mod ledger;
pub mod poller;
pub mod retry;
pub mod types;

pub use client::{DirectClient, SendOptions};
pub use correlator::{ReplyCallback, ReplyCorrelator, DEFAULT_REPLY_TIMEOUT};
pub use error::DirectError;
pub use events::{
    DirectEvent, ErrorEvent, EventEmitter, EventKind, ListenerId, MessageEvent,
    PendingRequestEvent, TypingEvent,
};
pub use inbox::{InboxReader, InboxStrategy};
pub use ledger::DedupLedger;
pub use poller::{PollHandle, PollMode, PollSettings, Poller};
pub use retry::{send_with_retry, RetryPolicy};
pub use types::{
    InboxSnapshot, InboxVariant, ItemType, MessageItem, RecentMessage, SendResult, Thread,
    ThreadUser, UserProfile,
};
