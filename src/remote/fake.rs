//! Scriptable in-memory [`ChatService`] for tests.

use super::{
    ActivityOrder, ChatService, ConversationSummary, DialogCursor, DialogPage, Message, RemoteError,
};
use crate::model::{ChatId, ChatKind, ChatRecord, ChatRef, MessageId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

/// Mutating call recorded by the fake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Delete(ChatId, Vec<MessageId>),
    Add(ChatId, ChatId),
    Promote(ChatId, ChatId),
}

#[derive(Default)]
struct State {
    dialogs: Vec<ConversationSummary>,
    page_size: usize,
    fail_listing_at_page: Option<usize>,
    histories: HashMap<ChatId, Vec<Message>>,
    delete_script: HashMap<ChatId, VecDeque<Option<RemoteError>>>,
    add_errors: HashMap<ChatId, RemoteError>,
    promote_errors: HashMap<ChatId, RemoteError>,
    users: Vec<ChatRecord>,
    order: Option<ActivityOrder>,
    pages_served: usize,
    calls: Vec<Call>,
}

pub struct FakeService {
    state: Mutex<State>,
}

impl Default for FakeService {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeService {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                page_size: 2,
                ..State::default()
            }),
        }
    }

    fn with(self, f: impl FnOnce(&mut State)) -> Self {
        f(&mut self.state.lock().unwrap());
        self
    }

    pub fn page_size(self, n: usize) -> Self {
        self.with(|s| s.page_size = n)
    }

    pub fn order(self, order: ActivityOrder) -> Self {
        self.with(|s| s.order = Some(order))
    }

    pub fn dialog(self, chat: ChatRecord, last_message_at: Option<DateTime<Utc>>) -> Self {
        self.with(|s| {
            s.dialogs.push(ConversationSummary {
                chat,
                last_message_at,
            })
        })
    }

    pub fn user(self, user: ChatRecord) -> Self {
        self.with(|s| s.users.push(user))
    }

    pub fn fail_listing_at_page(self, page: usize) -> Self {
        self.with(|s| s.fail_listing_at_page = Some(page))
    }

    /// `own` outgoing and `others` incoming messages, interleaved, newest first.
    pub fn history(self, chat: ChatId, own: usize, others: usize) -> Self {
        self.with(|s| {
            let total = own + others;
            let base = Utc::now();
            let mut msgs = Vec::with_capacity(total);
            let (mut o, mut x) = (0, 0);
            for i in 0..total {
                let outgoing = if o < own && (x >= others || i % 2 == 0) {
                    o += 1;
                    true
                } else {
                    x += 1;
                    false
                };
                let id = (total - i) as MessageId;
                msgs.push(Message {
                    id,
                    date: base - chrono::Duration::minutes(i as i64),
                    outgoing,
                    text: format!("message {id}"),
                });
            }
            s.histories.insert(chat, msgs);
        })
    }

    /// Script the outcome of successive delete calls in `chat`; `None` = succeed.
    pub fn delete_results(self, chat: ChatId, script: Vec<Option<RemoteError>>) -> Self {
        self.with(|s| {
            s.delete_script.insert(chat, script.into());
        })
    }

    pub fn add_error(self, chat: ChatId, err: RemoteError) -> Self {
        self.with(|s| {
            s.add_errors.insert(chat, err);
        })
    }

    pub fn promote_error(self, chat: ChatId, err: RemoteError) -> Self {
        self.with(|s| {
            s.promote_errors.insert(chat, err);
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn own_messages_left(&self, chat: ChatId) -> usize {
        self.state
            .lock()
            .unwrap()
            .histories
            .get(&chat)
            .map(|h| h.iter().filter(|m| m.outgoing).count())
            .unwrap_or(0)
    }

    pub fn pages_served(&self) -> usize {
        self.state.lock().unwrap().pages_served
    }
}

fn matches_ref(r: &ChatRecord, target: &ChatRef) -> bool {
    match target {
        ChatRef::Id(id) => r.chat_id == *id,
        ChatRef::Username(u) => r
            .username
            .as_deref()
            .is_some_and(|x| x.eq_ignore_ascii_case(u)),
        ChatRef::Phone(_) => false,
    }
}

#[async_trait]
impl ChatService for FakeService {
    async fn list_conversations(
        &self,
        cursor: Option<DialogCursor>,
    ) -> Result<DialogPage, RemoteError> {
        let mut s = self.state.lock().unwrap();
        let start = cursor.unwrap_or_default().0;
        let page_index = start / s.page_size.max(1);
        if s.fail_listing_at_page == Some(page_index) {
            return Err(RemoteError::Other("connection reset".into()));
        }
        s.pages_served += 1;
        let end = (start + s.page_size.max(1)).min(s.dialogs.len());
        let items = s.dialogs[start.min(end)..end].to_vec();
        let next = (end < s.dialogs.len()).then_some(DialogCursor(end));
        Ok(DialogPage { items, next })
    }

    async fn list_messages(
        &self,
        chat: ChatId,
        before: Option<MessageId>,
        limit: usize,
    ) -> Result<Vec<Message>, RemoteError> {
        let s = self.state.lock().unwrap();
        let Some(h) = s.histories.get(&chat) else {
            return Err(RemoteError::NotFound(format!("chat {chat}")));
        };
        Ok(h.iter()
            .filter(|m| before.map_or(true, |b| m.id < b))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn delete_messages(&self, chat: ChatId, ids: &[MessageId]) -> Result<usize, RemoteError> {
        let mut s = self.state.lock().unwrap();
        if let Some(Some(err)) = s.delete_script.get_mut(&chat).and_then(|q| q.pop_front()) {
            return Err(err);
        }
        s.calls.push(Call::Delete(chat, ids.to_vec()));
        let h = s.histories.entry(chat).or_default();
        let before = h.len();
        h.retain(|m| !ids.contains(&m.id));
        Ok(before - h.len())
    }

    async fn add_participant(&self, chat: ChatId, user: ChatId) -> Result<(), RemoteError> {
        let mut s = self.state.lock().unwrap();
        s.calls.push(Call::Add(chat, user));
        match s.add_errors.get(&chat) {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    async fn promote_admin(&self, chat: ChatId, user: ChatId) -> Result<(), RemoteError> {
        let mut s = self.state.lock().unwrap();
        s.calls.push(Call::Promote(chat, user));
        match s.promote_errors.get(&chat) {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    async fn resolve_chat(&self, chat: &ChatRef) -> Result<ChatRecord, RemoteError> {
        let s = self.state.lock().unwrap();
        s.dialogs
            .iter()
            .map(|d| &d.chat)
            .chain(s.users.iter())
            .find(|r| matches_ref(r, chat))
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(chat.to_string()))
    }

    async fn resolve_user(&self, user: &ChatRef) -> Result<ChatRecord, RemoteError> {
        let r = self.resolve_chat(user).await?;
        if r.chat_kind != ChatKind::Private {
            return Err(RemoteError::Unsupported(format!("{user} is not a user")));
        }
        Ok(r)
    }

    fn activity_order(&self) -> ActivityOrder {
        self.state
            .lock()
            .unwrap()
            .order
            .unwrap_or(ActivityOrder::Unordered)
    }
}
