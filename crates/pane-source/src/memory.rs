use std::{
    collections::HashMap,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use async_trait::async_trait;
use pane_core::{Cursor, Direction, Message, MessageId, Neighbourhood, NeighbourhoodGap};

use crate::{MessageSource, SourceError};

/// Full conversation histories held in memory, served page by page.
#[derive(Clone, Default)]
pub struct InMemoryMessageSource {
    conversations: Arc<RwLock<HashMap<String, Vec<Message>>>>,
}

impl InMemoryMessageSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the history of `conversation_id`.
    pub fn insert_conversation(
        &self,
        conversation_id: impl Into<String>,
        mut messages: Vec<Message>,
    ) -> Result<(), SourceError> {
        messages.sort_by_key(Message::cursor);
        messages.dedup_by_key(|message| message.id);
        self.write()?.insert(conversation_id.into(), messages);
        Ok(())
    }

    /// Add one message at its ordered position.
    pub fn push(&self, conversation_id: &str, message: Message) -> Result<(), SourceError> {
        let mut conversations = self.write()?;
        let history = conversations.entry(conversation_id.to_owned()).or_default();
        if history.iter().any(|known| known.id == message.id) {
            return Ok(());
        }
        let at = history.partition_point(|known| known.cursor() < message.cursor());
        history.insert(at, message);
        Ok(())
    }

    /// Delete one message. Returns whether it existed.
    pub fn remove(&self, conversation_id: &str, message_id: MessageId) -> Result<bool, SourceError> {
        let mut conversations = self.write()?;
        let Some(history) = conversations.get_mut(conversation_id) else {
            return Ok(false);
        };
        let before = history.len();
        history.retain(|message| message.id != message_id);
        Ok(history.len() != before)
    }

    pub fn len(&self, conversation_id: &str) -> Result<usize, SourceError> {
        Ok(self
            .read()?
            .get(conversation_id)
            .map_or(0, Vec::len))
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Vec<Message>>>, SourceError> {
        self.conversations
            .read()
            .map_err(|_| SourceError::Backend("poisoned lock".to_owned()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Vec<Message>>>, SourceError> {
        self.conversations
            .write()
            .map_err(|_| SourceError::Backend("poisoned lock".to_owned()))
    }
}

#[async_trait]
impl MessageSource for InMemoryMessageSource {
    async fn fetch_page(
        &self,
        conversation_id: &str,
        cursor: Option<Cursor>,
        direction: Direction,
        page_size: u32,
    ) -> Result<Vec<Message>, SourceError> {
        let conversations = self.read()?;
        let history = conversations
            .get(conversation_id)
            .ok_or_else(|| SourceError::Backend(format!("unknown conversation {conversation_id}")))?;
        let limit = page_size as usize;

        let page = match direction {
            Direction::Up => {
                let end = cursor.map_or(history.len(), |cursor| {
                    history.partition_point(|message| message.cursor() < cursor)
                });
                let start = end.saturating_sub(limit);
                history[start..end].iter().rev().cloned().collect()
            }
            Direction::Down => {
                let start = cursor.map_or(0, |cursor| {
                    history.partition_point(|message| message.cursor() <= cursor)
                });
                let end = start.saturating_add(limit).min(history.len());
                history[start..end].to_vec()
            }
        };
        Ok(page)
    }

    async fn fetch_neighbourhood(
        &self,
        conversation_id: &str,
        target: MessageId,
        window: u32,
        context_anchor: Option<MessageId>,
    ) -> Result<Option<Neighbourhood>, SourceError> {
        let conversations = self.read()?;
        let Some(history) = conversations.get(conversation_id) else {
            return Ok(None);
        };
        let Some(idx) = history.iter().position(|message| message.id == target) else {
            return Ok(None);
        };

        let window = window as usize;
        let lo = idx.saturating_sub(window);
        let hi = idx.saturating_add(window).saturating_add(1).min(history.len());
        let anchor_idx =
            context_anchor.and_then(|id| history.iter().position(|message| message.id == id));

        let floor = match anchor_idx {
            Some(anchor) if anchor < lo => anchor + 1,
            _ => 0,
        };
        let ceiling = match anchor_idx {
            Some(anchor) if anchor >= hi => anchor,
            _ => history.len(),
        };

        let before_missing = lo - floor;
        let gap_before = NeighbourhoodGap {
            exists: before_missing > 0,
            missing_count: u32::try_from(before_missing).unwrap_or(u32::MAX),
            last_message_id: None,
            last_message_sent_at_ms: None,
        };
        let after_missing = ceiling - hi;
        let last = &history[hi - 1];
        let gap_after = NeighbourhoodGap {
            exists: after_missing > 0,
            missing_count: u32::try_from(after_missing).unwrap_or(u32::MAX),
            last_message_id: Some(last.id),
            last_message_sent_at_ms: Some(last.sent_at_ms),
        };

        Ok(Some(Neighbourhood {
            messages: history[lo..hi].to_vec(),
            gap_before,
            gap_after,
        }))
    }
}
