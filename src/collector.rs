//! Activity collection: page through every dialog and keep the inactive ones.

use crate::{
    model::ChatRecord,
    remote::{ActivityOrder, ChatService, ConversationSummary, DialogCursor, RemoteError},
    retry::{with_throttle, RetryPolicy},
    store::{CandidateList, CandidateStore, KeepList, StoreError},
};
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_INACTIVE_MONTHS: u32 = 6;
const DAYS_PER_MONTH: i64 = 30;

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("dialog listing interrupted after {scanned} dialogs ({collected} inactive so far): {source}")]
    Interrupted {
        collected: usize,
        scanned: usize,
        #[source]
        source: RemoteError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy)]
pub struct CollectOptions {
    pub months: u32,
    /// Stop once this many inactive chats were collected.
    pub limit: Option<usize>,
    pub now: DateTime<Utc>,
}

impl CollectOptions {
    pub fn new(months: u32, limit: Option<usize>) -> Self {
        Self {
            months,
            limit,
            now: Utc::now(),
        }
    }

    pub fn cutoff(&self) -> DateTime<Utc> {
        self.now - Duration::days(i64::from(self.months) * DAYS_PER_MONTH)
    }
}

/// A chat with no messages at all counts as inactive.
pub fn is_inactive(last_message_at: Option<DateTime<Utc>>, cutoff: DateTime<Utc>) -> bool {
    last_message_at.map_or(true, |t| t < cutoff)
}

#[derive(Debug)]
pub struct CollectReport {
    pub list: CandidateList,
    pub scanned: usize,
    pub kept: usize,
}

fn to_record(s: ConversationSummary) -> ChatRecord {
    ChatRecord {
        last_activity_at: s.last_message_at,
        ..s.chat
    }
}

/// Walk the dialog listing page by page, handing each summary to `visit`
/// until it returns `false` or the listing ends. Returns how many were seen.
async fn walk_dialogs<S, F>(service: &S, policy: RetryPolicy, mut visit: F) -> Result<usize, (usize, RemoteError)>
where
    S: ChatService + ?Sized,
    F: FnMut(ConversationSummary) -> bool,
{
    let mut cursor: Option<DialogCursor> = None;
    let mut scanned = 0usize;
    loop {
        let page = with_throttle(policy, "list dialogs", || service.list_conversations(cursor))
            .await
            .map_err(|e| (scanned, e))?;
        debug!("dialog page: {} items, more={}", page.items.len(), page.next.is_some());
        for summary in page.items {
            scanned += 1;
            if !visit(summary) {
                return Ok(scanned);
            }
        }
        match page.next {
            Some(next) => cursor = Some(next),
            None => return Ok(scanned),
        }
    }
}

/// Compute the inactive, not-kept chats. Nothing is written.
pub async fn collect_inactive<S, K>(
    service: &S,
    keep: &K,
    opts: CollectOptions,
    policy: RetryPolicy,
) -> Result<CollectReport, CollectError>
where
    S: ChatService + ?Sized,
    K: KeepList + ?Sized,
{
    let cutoff = opts.cutoff();
    let oldest_first = service.activity_order() == ActivityOrder::OldestFirst;
    let mut records = Vec::new();
    let mut kept = 0usize;

    let walked = walk_dialogs(service, policy, |summary| {
        if !is_inactive(summary.last_message_at, cutoff) {
            // Ascending order: nothing after this one can be older.
            return !oldest_first;
        }
        if keep.contains(summary.chat.chat_id) {
            kept += 1;
            return true;
        }
        records.push(to_record(summary));
        opts.limit.map_or(true, |l| records.len() < l)
    })
    .await;

    let scanned = walked.map_err(|(scanned, source)| CollectError::Interrupted {
        collected: records.len(),
        scanned,
        source,
    })?;

    info!(
        "collected {} inactive chats out of {} scanned ({} on keep-list)",
        records.len(),
        scanned,
        kept
    );
    Ok(CollectReport {
        list: CandidateList::from_records(records),
        scanned,
        kept,
    })
}

/// Rebuild the candidate file from scratch. On error the file is untouched.
pub async fn collect_into<S, K>(
    service: &S,
    keep: &K,
    store: &CandidateStore,
    opts: CollectOptions,
    policy: RetryPolicy,
) -> Result<CollectReport, CollectError>
where
    S: ChatService + ?Sized,
    K: KeepList + ?Sized,
{
    let report = collect_inactive(service, keep, opts, policy).await?;
    store.save(&report.list)?;
    Ok(report)
}

/// Every dialog, unfiltered, for the `store` dump.
pub async fn list_all_dialogs<S>(service: &S, policy: RetryPolicy) -> Result<Vec<ChatRecord>, CollectError>
where
    S: ChatService + ?Sized,
{
    let mut out = Vec::new();
    walk_dialogs(service, policy, |s| {
        out.push(to_record(s));
        true
    })
    .await
    .map_err(|(scanned, source)| CollectError::Interrupted {
        collected: scanned,
        scanned,
        source,
    })?;
    Ok(out)
}
