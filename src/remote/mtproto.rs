//! [`ChatService`] over a Telegram user account (MTProto via grammers).

use super::{
    ActivityOrder, ChatService, ConversationSummary, DialogCursor, DialogPage, Message, RemoteError,
};
use crate::{
    config::Credentials,
    model::{ChatId, ChatKind, ChatRecord, ChatRef, MessageId},
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use grammers_client::{
    grammers_tl_types as tl,
    types::{Chat, PackedChat},
    Client, Config, InitParams, InvocationError, SignInError,
};
use grammers_session::Session;
use std::{
    collections::HashMap,
    io::{self, BufRead, Write},
    path::PathBuf,
    sync::Mutex as StdMutex,
    time::Duration,
};
use tokio::sync::Mutex;
use tracing::{debug, info};

const DIALOG_PAGE_SIZE: usize = 100;

struct DialogWalk {
    iter: grammers_client::client::dialogs::DialogIter,
    pos: usize,
}

pub struct MtprotoService {
    client: Client,
    session_file: PathBuf,
    walk: Mutex<Option<DialogWalk>>,
    packed: StdMutex<HashMap<ChatId, PackedChat>>,
}

fn prompt(label: &str) -> Result<String> {
    print!("{label}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn map_err(e: InvocationError) -> RemoteError {
    match e {
        InvocationError::Rpc(rpc) => {
            let name = rpc.name.as_str();
            match name {
                "FLOOD_WAIT" | "FLOOD_PREMIUM_WAIT" | "SLOWMODE_WAIT" => RemoteError::Throttled {
                    wait: Duration::from_secs(u64::from(rpc.value.unwrap_or(1))),
                },
                "USER_ALREADY_PARTICIPANT" => RemoteError::AlreadyParticipant,
                "CHAT_ADMIN_REQUIRED" | "RIGHT_FORBIDDEN" | "CHAT_WRITE_FORBIDDEN"
                | "USER_PRIVACY_RESTRICTED" | "ADMINS_TOO_MUCH" | "USER_NOT_MUTUAL_CONTACT" => {
                    RemoteError::Forbidden(name.to_string())
                }
                "USERNAME_NOT_OCCUPIED" | "USER_NOT_PARTICIPANT" | "CHANNEL_PRIVATE" => {
                    RemoteError::NotFound(name.to_string())
                }
                n if n.ends_with("_INVALID") => RemoteError::NotFound(n.to_string()),
                n => RemoteError::Other(format!("{} ({})", n, rpc.code)),
            }
        }
        other => RemoteError::Other(other.to_string()),
    }
}

fn record_of(chat: &Chat) -> ChatRecord {
    let (kind, is_bot) = match chat {
        Chat::User(u) => (ChatKind::Private, Some(u.is_bot())),
        Chat::Group(g) if g.is_megagroup() => (ChatKind::Supergroup, None),
        Chat::Group(_) => (ChatKind::Group, None),
        Chat::Channel(_) => (ChatKind::Channel, None),
    };
    let mut r = ChatRecord::new(chat.id(), chat.name().to_string(), kind);
    r.username = chat.username().map(str::to_string);
    r.is_bot = is_bot;
    r
}

impl MtprotoService {
    /// Connect, signing in interactively when the session is not yet
    /// authorized.
    pub async fn connect(creds: &Credentials) -> Result<Self> {
        let session = Session::load_file_or_create(&creds.session_file)
            .with_context(|| format!("open session {}", creds.session_file.display()))?;
        let client = Client::connect(Config {
            session,
            api_id: creds.api_id,
            api_hash: creds.api_hash.clone(),
            params: InitParams {
                // Throttles must surface so the engines can apply their own policy.
                flood_sleep_threshold: 0,
                ..Default::default()
            },
        })
        .await
        .context("connect to Telegram")?;

        let svc = Self {
            client,
            session_file: creds.session_file.clone(),
            walk: Mutex::new(None),
            packed: StdMutex::new(HashMap::new()),
        };
        if !svc.client.is_authorized().await.context("check authorization")? {
            svc.sign_in().await?;
        }
        Ok(svc)
    }

    async fn sign_in(&self) -> Result<()> {
        let phone = prompt("Phone number (international format): ")?;
        let token = self
            .client
            .request_login_code(&phone)
            .await
            .context("request login code")?;
        let code = prompt("Login code: ")?;
        match self.client.sign_in(&token, &code).await {
            Ok(_) => {}
            Err(SignInError::PasswordRequired(pw)) => {
                let password = prompt("Two-step verification password: ")?;
                self.client
                    .check_password(pw, password.trim())
                    .await
                    .context("check 2FA password")?;
            }
            Err(e) => return Err(anyhow!("sign in failed: {e}")),
        }
        self.save_session()?;
        info!("signed in, session saved to {}", self.session_file.display());
        Ok(())
    }

    pub fn save_session(&self) -> Result<()> {
        self.client
            .session()
            .save_to_file(&self.session_file)
            .with_context(|| format!("save session {}", self.session_file.display()))
    }

    fn remember(&self, chat: &Chat) {
        if let Ok(mut m) = self.packed.lock() {
            m.insert(chat.id(), chat.pack());
        }
    }

    fn cached(&self, id: ChatId) -> Option<PackedChat> {
        self.packed.lock().ok().and_then(|m| m.get(&id).copied())
    }

    /// Look a chat up by id, walking the dialog list to fill the cache.
    async fn packed_by_id(&self, id: ChatId) -> Result<(PackedChat, ChatRecord), RemoteError> {
        let mut dialogs = self.client.iter_dialogs();
        while let Some(d) = dialogs.next().await.map_err(map_err)? {
            let chat = d.chat();
            self.remember(chat);
            if chat.id() == id {
                return Ok((chat.pack(), record_of(chat)));
            }
        }
        Err(RemoteError::NotFound(format!("chat {id} is not among your dialogs")))
    }

    async fn packed(&self, id: ChatId) -> Result<PackedChat, RemoteError> {
        match self.cached(id) {
            Some(p) => Ok(p),
            None => self.packed_by_id(id).await.map(|(p, _)| p),
        }
    }
}

impl Drop for MtprotoService {
    fn drop(&mut self) {
        if let Err(e) = self.save_session() {
            tracing::warn!("{e:#}");
        }
    }
}

#[async_trait]
impl ChatService for MtprotoService {
    async fn list_conversations(
        &self,
        cursor: Option<DialogCursor>,
    ) -> Result<DialogPage, RemoteError> {
        let start = cursor.unwrap_or_default().0;
        let mut guard = self.walk.lock().await;
        if guard.as_ref().map_or(true, |w| w.pos != start) {
            let mut walk = DialogWalk {
                iter: self.client.iter_dialogs(),
                pos: 0,
            };
            while walk.pos < start {
                if walk.iter.next().await.map_err(map_err)?.is_none() {
                    break;
                }
                walk.pos += 1;
            }
            *guard = Some(walk);
        }
        let Some(walk) = guard.as_mut() else {
            return Err(RemoteError::Other("dialog walk not initialised".into()));
        };

        let mut items = Vec::with_capacity(DIALOG_PAGE_SIZE);
        let mut exhausted = false;
        while items.len() < DIALOG_PAGE_SIZE {
            match walk.iter.next().await.map_err(map_err)? {
                Some(d) => {
                    walk.pos += 1;
                    let chat = d.chat();
                    self.remember(chat);
                    items.push(ConversationSummary {
                        chat: record_of(chat),
                        last_message_at: d.last_message.as_ref().map(|m| m.date()),
                    });
                }
                None => {
                    exhausted = true;
                    break;
                }
            }
        }
        debug!("fetched {} dialogs (position {})", items.len(), walk.pos);
        let next = (!exhausted).then_some(DialogCursor(walk.pos));
        Ok(DialogPage { items, next })
    }

    async fn list_messages(
        &self,
        chat: ChatId,
        before: Option<MessageId>,
        limit: usize,
    ) -> Result<Vec<Message>, RemoteError> {
        let packed = self.packed(chat).await?;
        let mut iter = self.client.iter_messages(packed).limit(limit);
        if let Some(b) = before {
            iter = iter.offset_id(b);
        }
        let mut out = Vec::with_capacity(limit);
        while let Some(m) = iter.next().await.map_err(map_err)? {
            out.push(Message {
                id: m.id(),
                date: m.date(),
                outgoing: m.outgoing(),
                text: m.text().to_string(),
            });
        }
        Ok(out)
    }

    async fn delete_messages(&self, chat: ChatId, ids: &[MessageId]) -> Result<usize, RemoteError> {
        let packed = self.packed(chat).await?;
        self.client
            .delete_messages(packed, ids)
            .await
            .map_err(map_err)
    }

    async fn add_participant(&self, chat: ChatId, user: ChatId) -> Result<(), RemoteError> {
        let channel = self
            .packed(chat)
            .await?
            .try_to_input_channel()
            .ok_or_else(|| RemoteError::Unsupported("only channels and supergroups".into()))?;
        let user = self
            .packed(user)
            .await?
            .try_to_input_user()
            .ok_or_else(|| RemoteError::Unsupported("target is not a user".into()))?;
        self.client
            .invoke(&tl::functions::channels::InviteToChannel {
                channel,
                users: vec![user],
            })
            .await
            .map(|_| ())
            .map_err(map_err)
    }

    async fn promote_admin(&self, chat: ChatId, user: ChatId) -> Result<(), RemoteError> {
        let channel = self.packed(chat).await?;
        let user = self.packed(user).await?;
        let mut rights = self.client.set_admin_rights(channel, user);
        rights
            .change_info(true)
            .post_messages(true)
            .edit_messages(true)
            .delete_messages(true)
            .ban_users(true)
            .invite_users(true)
            .pin_messages(true)
            .add_admins(false)
            .anonymous(false)
            .manage_call(true)
            .other(true)
            .rank("Admin");
        rights.await.map_err(map_err)
    }

    async fn resolve_chat(&self, chat: &ChatRef) -> Result<ChatRecord, RemoteError> {
        match chat {
            ChatRef::Id(id) => self.packed_by_id(*id).await.map(|(_, r)| r),
            ChatRef::Username(u) => {
                let found = self.client.resolve_username(u).await.map_err(map_err)?;
                let chat = found.ok_or_else(|| RemoteError::NotFound(format!("@{u}")))?;
                self.remember(&chat);
                Ok(record_of(&chat))
            }
            ChatRef::Phone(p) => Err(RemoteError::Unsupported(format!(
                "lookup by phone ({p}); use the numeric id or @username"
            ))),
        }
    }

    async fn resolve_user(&self, user: &ChatRef) -> Result<ChatRecord, RemoteError> {
        let r = self.resolve_chat(user).await?;
        if r.chat_kind != ChatKind::Private {
            return Err(RemoteError::Unsupported(format!(
                "{user} is a {}, not a user",
                r.chat_kind
            )));
        }
        Ok(r)
    }

    fn activity_order(&self) -> ActivityOrder {
        // Pinned dialogs come first regardless of activity.
        ActivityOrder::Unordered
    }
}
