use super::error::DirectError;
use super::types::{InboxSnapshot, InboxVariant};
use crate::transport::DirectTransport;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// One way of reading the inbox, tried in configured order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InboxStrategy {
    /// Inbox query with thread/message limits.
    Full,
    /// Parameterless inbox query.
    Simplified,
    /// Pending-requests inbox used in place of the main one.
    Pending,
    /// Give up quietly with an empty snapshot.
    Empty,
}

impl fmt::Display for InboxStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InboxStrategy::Full => "full",
            InboxStrategy::Simplified => "simplified",
            InboxStrategy::Pending => "pending",
            InboxStrategy::Empty => "empty",
        };
        f.write_str(name)
    }
}

pub fn default_strategies() -> Vec<InboxStrategy> {
    vec![
        InboxStrategy::Full,
        InboxStrategy::Simplified,
        InboxStrategy::Pending,
        InboxStrategy::Empty,
    ]
}

/// Reads the inbox through an ordered chain of query shapes.
///
/// The next strategy is only tried when the current one is rejected as
/// restricted; any other error is returned as-is.
#[derive(Clone)]
pub struct InboxReader {
    transport: Arc<dyn DirectTransport>,
    strategies: Vec<InboxStrategy>,
}

impl InboxReader {
    pub fn new(transport: Arc<dyn DirectTransport>, strategies: Vec<InboxStrategy>) -> Self {
        let strategies = if strategies.is_empty() {
            default_strategies()
        } else {
            strategies
        };
        Self {
            transport,
            strategies,
        }
    }

    pub fn strategies(&self) -> &[InboxStrategy] {
        &self.strategies
    }

    pub async fn fetch_inbox(&self) -> Result<InboxSnapshot, DirectError> {
        let mut last_error = None;

        for strategy in &self.strategies {
            let result = match strategy {
                InboxStrategy::Full => self.transport.fetch_inbox(InboxVariant::Full).await,
                InboxStrategy::Simplified => {
                    self.transport.fetch_inbox(InboxVariant::Simplified).await
                }
                InboxStrategy::Pending => self.transport.fetch_pending_inbox().await,
                InboxStrategy::Empty => {
                    warn!("All inbox queries restricted, returning empty inbox");
                    return Ok(InboxSnapshot::default());
                }
            };

            match result {
                Ok(snapshot) => {
                    debug!(
                        "Inbox fetched via {} ({} threads)",
                        strategy,
                        snapshot.threads.len()
                    );
                    return Ok(snapshot);
                }
                Err(e) if e.is_restricted() => {
                    warn!("Inbox query '{}' restricted: {}", strategy, e);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            DirectError::InvalidResponse("no inbox strategy configured".to_string())
        }))
    }

    pub async fn fetch_pending(&self) -> Result<InboxSnapshot, DirectError> {
        self.transport.fetch_pending_inbox().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::direct::error::RESTRICTED_ERROR_CODE;
    use crate::direct::types::{SendResult, Thread, UserProfile};
    use crate::transport::ThreadAction;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockTransport {
        full: Mutex<Option<DirectError>>,
        simplified: Mutex<Option<DirectError>>,
        pending: Mutex<Option<DirectError>>,
        calls: Mutex<Vec<String>>,
    }

    fn restricted() -> DirectError {
        DirectError::Restricted {
            code: RESTRICTED_ERROR_CODE,
            message: "query not allowed".to_string(),
        }
    }

    fn snapshot(thread_id: &str) -> InboxSnapshot {
        InboxSnapshot::with_threads(vec![Thread {
            thread_id: thread_id.to_string(),
            ..Thread::default()
        }])
    }

    #[async_trait]
    impl DirectTransport for MockTransport {
        async fn fetch_inbox(&self, variant: InboxVariant) -> Result<InboxSnapshot, DirectError> {
            let (slot, name) = match variant {
                InboxVariant::Full => (&self.full, "full"),
                InboxVariant::Simplified => (&self.simplified, "simplified"),
            };
            self.calls.lock().unwrap().push(name.to_string());
            match slot.lock().unwrap().take() {
                Some(e) => Err(e),
                None => Ok(snapshot(name)),
            }
        }

        async fn fetch_pending_inbox(&self) -> Result<InboxSnapshot, DirectError> {
            self.calls.lock().unwrap().push("pending".to_string());
            match self.pending.lock().unwrap().take() {
                Some(e) => Err(e),
                None => Ok(snapshot("pending")),
            }
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

    #[tokio::test]
    async fn test_full_query_used_when_allowed() {
        let transport = Arc::new(MockTransport::default());
        let reader = InboxReader::new(transport.clone(), default_strategies());

        let inbox = reader.fetch_inbox().await.unwrap();
        assert_eq!(inbox.threads[0].thread_id, "full");
        assert_eq!(*transport.calls.lock().unwrap(), vec!["full"]);
    }

    #[tokio::test]
    async fn test_restricted_full_falls_back_to_simplified() {
        let transport = Arc::new(MockTransport::default());
        *transport.full.lock().unwrap() = Some(restricted());
        let reader = InboxReader::new(transport.clone(), default_strategies());

        let inbox = reader.fetch_inbox().await.unwrap();
        assert_eq!(inbox.threads[0].thread_id, "simplified");
        assert_eq!(*transport.calls.lock().unwrap(), vec!["full", "simplified"]);
    }

    #[tokio::test]
    async fn test_every_step_restricted_ends_empty() {
        let transport = Arc::new(MockTransport::default());
        *transport.full.lock().unwrap() = Some(restricted());
        *transport.simplified.lock().unwrap() = Some(restricted());
        *transport.pending.lock().unwrap() = Some(restricted());
        let reader = InboxReader::new(transport.clone(), default_strategies());

        let inbox = reader.fetch_inbox().await.unwrap();
        assert!(inbox.threads.is_empty());
        assert_eq!(
            *transport.calls.lock().unwrap(),
            vec!["full", "simplified", "pending"]
        );
    }

    #[tokio::test]
    async fn test_other_errors_do_not_fall_back() {
        let transport = Arc::new(MockTransport::default());
        *transport.full.lock().unwrap() = Some(DirectError::ServerError {
            status: 502,
            message: "Bad Gateway".to_string(),
        });
        let reader = InboxReader::new(transport.clone(), default_strategies());

        let err = reader.fetch_inbox().await.unwrap_err();
        assert!(matches!(err, DirectError::ServerError { status: 502, .. }));
        assert_eq!(*transport.calls.lock().unwrap(), vec!["full"]);
    }

    #[tokio::test]
    async fn test_chain_without_empty_returns_last_restriction() {
        let transport = Arc::new(MockTransport::default());
        *transport.full.lock().unwrap() = Some(restricted());
        let reader = InboxReader::new(transport.clone(), vec![InboxStrategy::Full]);

        let err = reader.fetch_inbox().await.unwrap_err();
        assert!(err.is_restricted());
    }

    #[test]
    fn test_strategy_names_deserialize() {
        let parsed: Vec<InboxStrategy> =
            serde_json::from_str(r#"["full","simplified","pending","empty"]"#).unwrap();
        assert_eq!(parsed, default_strategies());
    }
}
