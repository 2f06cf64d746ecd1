use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, sync::OnceLock};

/// Remote chat identifier as the service reports it (`-100…` for channels).
pub type ChatId = i64;

/// Remote message identifier, unique within one chat.
pub type MessageId = i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
}

impl ChatKind {
    /// Basic groups and private chats cannot take programmatic admin promotion.
    pub fn supports_admin_promotion(self) -> bool {
        matches!(self, ChatKind::Supergroup | ChatKind::Channel)
    }

    pub fn label(self) -> &'static str {
        match self {
            ChatKind::Private => "private",
            ChatKind::Group => "group",
            ChatKind::Supergroup => "supergroup",
            ChatKind::Channel => "channel",
        }
    }
}

impl fmt::Display for ChatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One conversation as stored in the candidate list and dialog dumps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub chat_id: ChatId,
    #[serde(default)]
    pub display_name: String,
    pub chat_kind: ChatKind,
    pub last_activity_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unread_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_bot: Option<bool>,
}

impl ChatRecord {
    pub fn new(chat_id: ChatId, display_name: impl Into<String>, chat_kind: ChatKind) -> Self {
        Self {
            chat_id,
            display_name: display_name.into(),
            chat_kind,
            last_activity_at: None,
            username: None,
            member_count: None,
            unread_count: None,
            is_bot: None,
        }
    }

    /// Name for terminal output; deleted accounts have an empty display name.
    pub fn label(&self) -> String {
        if !self.display_name.is_empty() {
            return self.display_name.clone();
        }
        match &self.username {
            Some(u) if !u.is_empty() => format!("@{}", u),
            _ => self.chat_id.to_string(),
        }
    }

    /// Date part of the last activity, or `-` when the chat has no messages.
    pub fn last_activity_day(&self) -> String {
        self.last_activity_at
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "-".to_string())
    }
}

/// How a chat or user is named on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatRef {
    Id(ChatId),
    Username(String),
    Phone(String),
}

#[derive(Debug, thiserror::Error)]
#[error("not a chat reference: '{0}' (expected an id, @username, t.me link or +phone)")]
pub struct ChatRefParseError(pub String);

fn id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^-?\d{1,19}$").expect("static regex"))
}

fn phone_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\+\d{7,15}$").expect("static regex"))
}

fn link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:https?://)?(?:t\.me|telegram\.me)/([A-Za-z][A-Za-z0-9_]{3,31})/?$")
            .expect("static regex")
    })
}

fn username_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^@?([A-Za-z][A-Za-z0-9_]{3,31})$").expect("static regex"))
}

impl FromStr for ChatRef {
    type Err = ChatRefParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if id_re().is_match(s) {
            return s
                .parse::<i64>()
                .map(ChatRef::Id)
                .map_err(|_| ChatRefParseError(s.to_string()));
        }
        if phone_re().is_match(s) {
            return Ok(ChatRef::Phone(s.to_string()));
        }
        if let Some(c) = link_re().captures(s).or_else(|| username_re().captures(s)) {
            return Ok(ChatRef::Username(c[1].to_string()));
        }
        Err(ChatRefParseError(s.to_string()))
    }
}

impl fmt::Display for ChatRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatRef::Id(id) => write!(f, "{}", id),
            ChatRef::Username(u) => write!(f, "@{}", u),
            ChatRef::Phone(p) => f.write_str(p),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Partial,
    Failed,
    Skipped,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutcomeStatus::Success => "success",
            OutcomeStatus::Partial => "partial",
            OutcomeStatus::Failed => "failed",
            OutcomeStatus::Skipped => "skipped",
        })
    }
}

/// Per-chat result of a cleanup pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupOutcome {
    pub chat_id: ChatId,
    pub label: String,
    pub status: OutcomeStatus,
    /// Own messages found during enumeration.
    pub found: usize,
    /// Messages the service confirmed deleted (always 0 in dry-run).
    pub deleted: usize,
    pub detail: String,
}

/// Per-chat result of an admin promotion pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminOutcome {
    pub chat: String,
    pub chat_id: Option<ChatId>,
    pub status: OutcomeStatus,
    pub detail: String,
}

/// Aggregate counts printed at the end of a batch command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub success: usize,
    pub partial: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl Tally {
    pub fn from_statuses(statuses: impl IntoIterator<Item = OutcomeStatus>) -> Self {
        let mut t = Tally::default();
        for s in statuses {
            match s {
                OutcomeStatus::Success => t.success += 1,
                OutcomeStatus::Partial => t.partial += 1,
                OutcomeStatus::Failed => t.failed += 1,
                OutcomeStatus::Skipped => t.skipped += 1,
            }
        }
        t
    }

    pub fn total(&self) -> usize {
        self.success + self.partial + self.failed + self.skipped
    }

    /// True when there was work and none of it went through.
    pub fn all_failed(&self) -> bool {
        self.total() > 0 && self.failed + self.partial == self.total()
    }
}

impl fmt::Display for Tally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} partial, {} failed, {} skipped ({} total)",
            self.success,
            self.partial,
            self.failed,
            self.skipped,
            self.total()
        )
    }
}
