//! Add one user to several chats and promote them to administrator.

use crate::{
    model::{AdminOutcome, ChatKind, ChatRecord, ChatRef, OutcomeStatus, Tally},
    remote::{ChatService, RemoteError},
    retry::{with_throttle, RetryPolicy},
};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("cannot resolve user {user}: {source}")]
    UserResolution {
        user: String,
        #[source]
        source: RemoteError,
    },
}

#[derive(Debug)]
pub struct AdminReport {
    pub user: ChatRecord,
    pub outcomes: Vec<AdminOutcome>,
    pub dry_run: bool,
}

impl AdminReport {
    pub fn tally(&self) -> Tally {
        Tally::from_statuses(self.outcomes.iter().map(|o| o.status))
    }
}

pub struct AdminOperator<'a, S: ChatService + ?Sized> {
    service: &'a S,
    policy: RetryPolicy,
    dry_run: bool,
}

impl<'a, S: ChatService + ?Sized> AdminOperator<'a, S> {
    pub fn new(service: &'a S, policy: RetryPolicy, dry_run: bool) -> Self {
        Self {
            service,
            policy,
            dry_run,
        }
    }

    /// Failures are per chat; only an unresolvable target user aborts.
    pub async fn promote_everywhere<F>(
        &self,
        user: &ChatRef,
        chats: &[ChatRef],
        mut on_outcome: F,
    ) -> Result<AdminReport, AdminError>
    where
        F: FnMut(&AdminOutcome),
    {
        let target = with_throttle(self.policy, "resolve user", || self.service.resolve_user(user))
            .await
            .map_err(|source| AdminError::UserResolution {
                user: user.to_string(),
                source,
            })?;
        info!("promoting {} ({}) in {} chats", target.label(), target.chat_id, chats.len());

        let mut outcomes = Vec::with_capacity(chats.len());
        for chat in chats {
            let outcome = self.promote_in(&target, chat).await;
            on_outcome(&outcome);
            outcomes.push(outcome);
        }
        Ok(AdminReport {
            user: target,
            outcomes,
            dry_run: self.dry_run,
        })
    }

    async fn promote_in(&self, user: &ChatRecord, chat_ref: &ChatRef) -> AdminOutcome {
        let mut outcome = AdminOutcome {
            chat: chat_ref.to_string(),
            chat_id: None,
            status: OutcomeStatus::Failed,
            detail: String::new(),
        };

        let chat = match with_throttle(self.policy, "resolve chat", || {
            self.service.resolve_chat(chat_ref)
        })
        .await
        {
            Ok(c) => c,
            Err(e) => {
                outcome.detail = format!("could not resolve chat: {e}");
                return outcome;
            }
        };
        outcome.chat = chat.label();
        outcome.chat_id = Some(chat.chat_id);

        match chat.chat_kind {
            ChatKind::Private => {
                outcome.status = OutcomeStatus::Skipped;
                outcome.detail = "a private chat, not a group or channel".into();
                return outcome;
            }
            ChatKind::Group => {
                outcome.status = OutcomeStatus::Skipped;
                outcome.detail =
                    "basic groups do not support programmatic admin promotion; promote manually"
                        .into();
                return outcome;
            }
            ChatKind::Supergroup | ChatKind::Channel => {}
        }

        if self.dry_run {
            outcome.status = OutcomeStatus::Success;
            outcome.detail = format!("would add {} and promote to admin", user.label());
            return outcome;
        }

        let added = match with_throttle(self.policy, "add participant", || {
            self.service.add_participant(chat.chat_id, user.chat_id)
        })
        .await
        {
            Ok(()) => true,
            Err(RemoteError::AlreadyParticipant) => false,
            Err(e) => {
                // Promotion can still work for members we failed to re-invite.
                warn!("could not add {} to {}: {}", user.chat_id, chat.chat_id, e);
                false
            }
        };

        match with_throttle(self.policy, "promote admin", || {
            self.service.promote_admin(chat.chat_id, user.chat_id)
        })
        .await
        {
            Ok(()) => {
                outcome.status = OutcomeStatus::Success;
                outcome.detail = if added {
                    "added and promoted to admin".into()
                } else {
                    "promoted to admin".into()
                };
            }
            Err(e) => {
                outcome.status = if added {
                    OutcomeStatus::Partial
                } else {
                    OutcomeStatus::Failed
                };
                outcome.detail = match (&e, added) {
                    (RemoteError::Forbidden(_), _) => {
                        format!("you lack admin rights here: {e}")
                    }
                    (_, true) => format!("added, but promotion failed: {e}"),
                    (_, false) => format!("promotion failed: {e}"),
                };
            }
        }
        outcome
    }
}
