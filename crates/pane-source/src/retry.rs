use std::{future::Future, time::Duration};

use async_trait::async_trait;
use pane_core::{Cursor, Direction, Message, MessageId, Neighbourhood};
use tracing::warn;

use crate::{MessageSource, SourceError};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
        }
    }

    pub fn base_delay_ms(&self) -> u64 {
        self.base_delay_ms
    }

    pub fn max_delay_ms(&self) -> u64 {
        self.max_delay_ms
    }

    pub fn delay_for_attempt(&self, attempt: u32, retry_after_hint_ms: Option<u64>) -> Duration {
        let shift = attempt.min(20);
        let multiplier = 1_u64 << shift;
        let calculated = self.base_delay_ms.saturating_mul(multiplier);
        let hinted = retry_after_hint_ms.unwrap_or(0);
        let bounded = calculated.max(hinted).min(self.max_delay_ms);
        Duration::from_millis(bounded)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(250, 5_000)
    }
}

/// Wraps a [`MessageSource`] with a per-call timeout and backoff retries.
///
/// Only retryable [`SourceError`]s are repeated. A missing jump target is a
/// successful answer and is returned as is.
#[derive(Debug, Clone)]
pub struct RetryingSource<S> {
    inner: S,
    policy: RetryPolicy,
    timeout: Duration,
    max_retries: u32,
}

impl<S: MessageSource> RetryingSource<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn run<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T, SourceError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, SourceError>> + Send,
        T: Send,
    {
        let mut attempt = 0;
        loop {
            let outcome = match tokio::time::timeout(self.timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(SourceError::Timeout {
                    after_ms: self.timeout.as_millis() as u64,
                }),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    let delay = self
                        .policy
                        .delay_for_attempt(attempt, err.retry_after_hint_ms());
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "message source call failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl<S: MessageSource> MessageSource for RetryingSource<S> {
    async fn fetch_page(
        &self,
        conversation_id: &str,
        cursor: Option<Cursor>,
        direction: Direction,
        page_size: u32,
    ) -> Result<Vec<Message>, SourceError> {
        self.run("fetch_page", || {
            self.inner
                .fetch_page(conversation_id, cursor, direction, page_size)
        })
        .await
    }

    async fn fetch_neighbourhood(
        &self,
        conversation_id: &str,
        target: MessageId,
        window: u32,
        context_anchor: Option<MessageId>,
    ) -> Result<Option<Neighbourhood>, SourceError> {
        self.run("fetch_neighbourhood", || {
            self.inner
                .fetch_neighbourhood(conversation_id, target, window, context_anchor)
        })
        .await
    }
}
