//! Message source collaborator consumed by the pane runtime.
//!
//! [`MessageSource`] is the only I/O boundary of the pane. This crate also
//! ships an in-memory implementation and a retry/timeout decorator.

use std::sync::Arc;

use async_trait::async_trait;
use pane_core::{Cursor, Direction, Message, MessageId, Neighbourhood};
use thiserror::Error;

mod memory;
mod retry;

pub use memory::InMemoryMessageSource;
pub use retry::{RetryPolicy, RetryingSource};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("message source unavailable: {0}")]
    Unavailable(String),
    #[error("message source call timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },
    #[error("message source rate limited")]
    RateLimited { retry_after_ms: Option<u64> },
    #[error("message source backend failure: {0}")]
    Backend(String),
}

impl SourceError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Backend(_))
    }

    pub fn retry_after_hint_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_ms } => *retry_after_ms,
            _ => None,
        }
    }
}

/// Paged access to a conversation history.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Messages strictly beyond `cursor` in `direction`, at most `page_size`.
    ///
    /// `Up` pages are newest-first, `Down` pages oldest-first. A `None`
    /// cursor starts from the newest (`Up`) or oldest (`Down`) message. A
    /// short page means the direction is exhausted.
    async fn fetch_page(
        &self,
        conversation_id: &str,
        cursor: Option<Cursor>,
        direction: Direction,
        page_size: u32,
    ) -> Result<Vec<Message>, SourceError>;

    /// Up to `window` messages on each side of `target` with gap metadata
    /// on both sides, or `None` when the target no longer exists.
    ///
    /// `context_anchor` names a message the caller already holds; gap counts
    /// are measured towards it when it lies outside the neighbourhood.
    async fn fetch_neighbourhood(
        &self,
        conversation_id: &str,
        target: MessageId,
        window: u32,
        context_anchor: Option<MessageId>,
    ) -> Result<Option<Neighbourhood>, SourceError>;
}

#[async_trait]
impl<S: MessageSource + ?Sized> MessageSource for Arc<S> {
    async fn fetch_page(
        &self,
        conversation_id: &str,
        cursor: Option<Cursor>,
        direction: Direction,
        page_size: u32,
    ) -> Result<Vec<Message>, SourceError> {
        (**self)
            .fetch_page(conversation_id, cursor, direction, page_size)
            .await
    }

    async fn fetch_neighbourhood(
        &self,
        conversation_id: &str,
        target: MessageId,
        window: u32,
        context_anchor: Option<MessageId>,
    ) -> Result<Option<Neighbourhood>, SourceError> {
        (**self)
            .fetch_neighbourhood(conversation_id, target, window, context_anchor)
            .await
    }
}
