//! Remote chat-service boundary.
//!
//! The rest of the crate talks to Telegram only through [`ChatService`]. The
//! MTProto binding lives in [`mtproto`] behind the `mtproto` feature.

use crate::model::{ChatId, ChatRecord, ChatRef, MessageId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

#[cfg(test)]
pub mod fake;
#[cfg(feature = "mtproto")]
pub mod mtproto;

#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("throttled by the service, retry in {}s", wait.as_secs())]
    Throttled { wait: Duration },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("already a participant")]
    AlreadyParticipant,
    #[error("remote error: {0}")]
    Other(String),
}

impl RemoteError {
    /// Throttles are the only errors worth retrying as-is.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Throttled { .. })
    }
}

/// One entry of the dialog listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSummary {
    pub chat: ChatRecord,
    /// Timestamp of the most recent message, `None` for an empty history.
    pub last_message_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub date: DateTime<Utc>,
    /// Sent by the logged-in account.
    pub outgoing: bool,
    pub text: String,
}

/// Opaque position in the dialog listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DialogCursor(pub usize);

#[derive(Debug, Clone)]
pub struct DialogPage {
    pub items: Vec<ConversationSummary>,
    /// `None` once the listing is exhausted.
    pub next: Option<DialogCursor>,
}

/// Ordering guarantee of [`ChatService::list_conversations`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityOrder {
    Unordered,
    OldestFirst,
}

#[async_trait]
pub trait ChatService: Send + Sync {
    /// One page of dialogs starting at `cursor` (`None` = first page).
    async fn list_conversations(
        &self,
        cursor: Option<DialogCursor>,
    ) -> Result<DialogPage, RemoteError>;

    /// Up to `limit` messages older than `before`, newest first. An empty
    /// result means the history is exhausted.
    async fn list_messages(
        &self,
        chat: ChatId,
        before: Option<MessageId>,
        limit: usize,
    ) -> Result<Vec<Message>, RemoteError>;

    /// Returns how many of `ids` the service confirmed deleted.
    async fn delete_messages(&self, chat: ChatId, ids: &[MessageId]) -> Result<usize, RemoteError>;

    async fn add_participant(&self, chat: ChatId, user: ChatId) -> Result<(), RemoteError>;

    async fn promote_admin(&self, chat: ChatId, user: ChatId) -> Result<(), RemoteError>;

    async fn resolve_chat(&self, chat: &ChatRef) -> Result<ChatRecord, RemoteError>;

    /// Like [`resolve_chat`](Self::resolve_chat) but the target must be a user.
    async fn resolve_user(&self, user: &ChatRef) -> Result<ChatRecord, RemoteError>;

    fn activity_order(&self) -> ActivityOrder {
        ActivityOrder::Unordered
    }
}
