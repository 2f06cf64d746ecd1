//! Bulk deletion of the account's own messages.
//!
//! A chat leaves the candidate list only after every one of its messages was
//! confirmed deleted; the list is saved right after each such removal.

use crate::{
    model::{ChatId, ChatRecord, CleanupOutcome, MessageId, OutcomeStatus, Tally},
    remote::{ChatService, Message, RemoteError},
    retry::{with_throttle, RetryPolicy},
    store::{CandidateList, CandidateStore, StoreError},
};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Most ids the service accepts in one delete call.
pub const DELETE_BATCH_SIZE: usize = 100;
pub const DEFAULT_HISTORY_PAGE_SIZE: usize = 100;
pub const DEFAULT_CLEAR_LIMIT: usize = 100;

#[derive(Debug, Error)]
pub enum CleanupError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("still throttled on the first chat ({chat_id}), nothing was cleaned: {source}")]
    ThrottledBeforeProgress {
        chat_id: ChatId,
        #[source]
        source: RemoteError,
    },
}

#[derive(Debug)]
pub struct CleanupReport {
    pub outcomes: Vec<CleanupOutcome>,
    pub dry_run: bool,
}

impl CleanupReport {
    pub fn tally(&self) -> Tally {
        Tally::from_statuses(self.outcomes.iter().map(|o| o.status))
    }

    pub fn found(&self) -> usize {
        self.outcomes.iter().map(|o| o.found).sum()
    }

    pub fn deleted(&self) -> usize {
        self.outcomes.iter().map(|o| o.deleted).sum()
    }
}

struct ChatRun {
    outcome: CleanupOutcome,
    /// Set when the chat failed because the throttle retry budget ran out.
    throttled_out: Option<RemoteError>,
}

pub struct CleanupEngine<'a, S: ChatService + ?Sized> {
    service: &'a S,
    policy: RetryPolicy,
    page_size: usize,
    dry_run: bool,
}

impl<'a, S: ChatService + ?Sized> CleanupEngine<'a, S> {
    pub fn new(service: &'a S, policy: RetryPolicy, dry_run: bool) -> Self {
        Self {
            service,
            policy,
            page_size: DEFAULT_HISTORY_PAGE_SIZE,
            dry_run,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// The account's own messages in `chat`, newest first.
    ///
    /// With a cap, enumeration stops at the `cap` most recent own messages.
    pub async fn scan_own_messages(
        &self,
        chat: ChatId,
        cap: Option<usize>,
    ) -> Result<Vec<Message>, RemoteError> {
        let mut own = Vec::new();
        if cap == Some(0) {
            return Ok(own);
        }
        let mut before: Option<MessageId> = None;
        loop {
            let page = with_throttle(self.policy, "list messages", || {
                self.service.list_messages(chat, before, self.page_size)
            })
            .await?;
            let Some(last) = page.last() else {
                return Ok(own);
            };
            before = Some(last.id);
            for m in page {
                if !m.outgoing {
                    continue;
                }
                own.push(m);
                if cap.is_some_and(|c| own.len() >= c) {
                    return Ok(own);
                }
            }
        }
    }

    /// Delete previously scanned messages. In dry-run nothing is sent.
    pub async fn delete_scanned(&self, record: &ChatRecord, messages: &[Message]) -> CleanupOutcome {
        self.delete_run(record, messages).await.outcome
    }

    async fn delete_run(&self, record: &ChatRecord, messages: &[Message]) -> ChatRun {
        let found = messages.len();
        let mut outcome = CleanupOutcome {
            chat_id: record.chat_id,
            label: record.label(),
            status: OutcomeStatus::Success,
            found,
            deleted: 0,
            detail: String::new(),
        };

        if found == 0 {
            outcome.detail = "no messages found".into();
            return ChatRun {
                outcome,
                throttled_out: None,
            };
        }
        if self.dry_run {
            outcome.detail = format!("would delete {found} messages");
            return ChatRun {
                outcome,
                throttled_out: None,
            };
        }

        let ids: Vec<MessageId> = messages.iter().map(|m| m.id).collect();
        let mut failure: Option<RemoteError> = None;
        for batch in ids.chunks(DELETE_BATCH_SIZE) {
            match with_throttle(self.policy, "delete messages", || {
                self.service.delete_messages(record.chat_id, batch)
            })
            .await
            {
                Ok(n) => {
                    if n < batch.len() {
                        debug!(
                            "chat {}: {} of {} deletions confirmed",
                            record.chat_id,
                            n,
                            batch.len()
                        );
                    }
                    outcome.deleted += n.min(batch.len());
                }
                Err(e) => {
                    warn!("chat {}: delete failed: {}", record.chat_id, e);
                    failure = Some(e);
                    break;
                }
            }
        }

        let throttled_out = failure.as_ref().filter(|e| e.is_transient()).cloned();
        match failure {
            Some(e) => {
                outcome.status = if outcome.deleted > 0 {
                    OutcomeStatus::Partial
                } else {
                    OutcomeStatus::Failed
                };
                outcome.detail = format!("deleted {}/{}: {}", outcome.deleted, found, e);
            }
            None if outcome.deleted < found => {
                outcome.status = OutcomeStatus::Partial;
                outcome.detail = format!("only {}/{} deletions confirmed", outcome.deleted, found);
            }
            None => {
                outcome.detail = format!("deleted {found} messages");
            }
        }
        ChatRun {
            outcome,
            throttled_out,
        }
    }

    async fn clean_chat(&self, record: &ChatRecord, cap: Option<usize>) -> ChatRun {
        match self.scan_own_messages(record.chat_id, cap).await {
            Ok(messages) => self.delete_run(record, &messages).await,
            Err(e) => {
                warn!("chat {}: scan failed: {}", record.chat_id, e);
                ChatRun {
                    outcome: CleanupOutcome {
                        chat_id: record.chat_id,
                        label: record.label(),
                        status: OutcomeStatus::Failed,
                        found: 0,
                        deleted: 0,
                        detail: format!("could not read history: {e}"),
                    },
                    throttled_out: e.is_transient().then_some(e),
                }
            }
        }
    }

    /// Clean every chat of `list` in order, saving the shrinking list to
    /// `store` after each fully cleaned chat. `on_outcome` sees each result
    /// as soon as it is known.
    pub async fn clean_list<F>(
        &self,
        store: &CandidateStore,
        list: &CandidateList,
        mut on_outcome: F,
    ) -> Result<CleanupReport, CleanupError>
    where
        F: FnMut(usize, &CleanupOutcome),
    {
        let mut remaining = list.clone();
        let mut outcomes: Vec<CleanupOutcome> = Vec::with_capacity(list.len());

        for (i, record) in list.records().iter().enumerate() {
            let run = self.clean_chat(record, None).await;

            if let Some(source) = run.throttled_out {
                if outcomes.is_empty() && run.outcome.deleted == 0 {
                    return Err(CleanupError::ThrottledBeforeProgress {
                        chat_id: record.chat_id,
                        source,
                    });
                }
            }

            if !self.dry_run && run.outcome.status == OutcomeStatus::Success {
                remaining.remove(record.chat_id);
                store.save(&remaining)?;
                debug!("chat {} removed, {} left", record.chat_id, remaining.len());
            }

            on_outcome(i, &run.outcome);
            outcomes.push(run.outcome);
        }

        let report = CleanupReport {
            outcomes,
            dry_run: self.dry_run,
        };
        info!("cleanup finished: {}", report.tally());
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::ChatKind,
        remote::fake::{Call, FakeService},
    };
    use std::time::Duration;

    fn chat(id: ChatId, name: &str) -> ChatRecord {
        ChatRecord::new(id, name, ChatKind::Private)
    }

    fn throttle() -> Option<RemoteError> {
        Some(RemoteError::Throttled {
            wait: Duration::from_millis(1),
        })
    }

    fn setup(records: Vec<ChatRecord>) -> (tempfile::TempDir, CandidateStore, CandidateList) {
        let dir = tempfile::tempdir().unwrap();
        let store = CandidateStore::new(dir.path().join("candidates.json"));
        let list = CandidateList::from_records(records);
        store.save(&list).unwrap();
        (dir, store, list)
    }

    #[tokio::test]
    async fn scan_pages_through_history_and_filters_own() {
        let svc = FakeService::new().history(1, 7, 5);
        let engine = CleanupEngine::new(&svc, RetryPolicy::default(), true).with_page_size(3);
        let own = engine.scan_own_messages(1, None).await.unwrap();
        assert_eq!(own.len(), 7);
        assert!(own.iter().all(|m| m.outgoing));
        assert!(own.windows(2).all(|w| w[0].id > w[1].id));
    }

    #[tokio::test]
    async fn cap_bounds_most_recent_own_messages() {
        let svc = FakeService::new().history(1, 10, 10);
        let engine = CleanupEngine::new(&svc, RetryPolicy::default(), true).with_page_size(4);
        let all = engine.scan_own_messages(1, None).await.unwrap();
        let capped = engine.scan_own_messages(1, Some(3)).await.unwrap();
        assert_eq!(capped, all[..3].to_vec());

        // A cap landing exactly on a page boundary.
        let svc = FakeService::new().history(1, 10, 0);
        let engine = CleanupEngine::new(&svc, RetryPolicy::default(), true).with_page_size(4);
        let one_page = engine.scan_own_messages(1, Some(4)).await.unwrap();
        let ids: Vec<MessageId> = one_page.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![10, 9, 8, 7]);
    }

    #[tokio::test]
    async fn zero_cap_selects_nothing() {
        let svc = FakeService::new().history(1, 5, 0);
        let engine = CleanupEngine::new(&svc, RetryPolicy::default(), false);
        let own = engine.scan_own_messages(1, Some(0)).await.unwrap();
        assert!(own.is_empty());

        let outcome = engine.delete_scanned(&chat(1, "a"), &own).await;
        assert_eq!(outcome.deleted, 0);
        assert!(svc.calls().is_empty());
        assert_eq!(svc.own_messages_left(1), 5);
    }

    #[tokio::test]
    async fn success_then_exhausted_throttle_keeps_only_failed_chat() {
        // A: 3 own messages, all deleted. B: 150 own messages, second batch
        // stays throttled past the retry budget.
        let svc = FakeService::new()
            .history(1, 3, 2)
            .history(2, 150, 0)
            .delete_results(2, vec![None, throttle(), throttle(), throttle(), throttle()]);
        let (_dir, store, list) = setup(vec![chat(1, "A"), chat(2, "B")]);
        let engine = CleanupEngine::new(&svc, RetryPolicy::default(), false);

        let report = engine.clean_list(&store, &list, |_, _| {}).await.unwrap();

        assert_eq!(store.load().unwrap().ids(), vec![2]);
        let a = &report.outcomes[0];
        assert_eq!((a.status, a.deleted), (OutcomeStatus::Success, 3));
        let b = &report.outcomes[1];
        assert_eq!(b.status, OutcomeStatus::Partial);
        assert_eq!(b.deleted, DELETE_BATCH_SIZE);
        assert_eq!(svc.own_messages_left(1), 0);
    }

    #[tokio::test]
    async fn one_failing_chat_is_isolated() {
        let svc = FakeService::new()
            .history(1, 2, 0)
            .history(2, 2, 0)
            .history(3, 2, 0)
            .history(4, 2, 0)
            .delete_results(3, vec![Some(RemoteError::Forbidden("chat inaccessible".into()))]);
        let (_dir, store, list) =
            setup(vec![chat(1, "a"), chat(2, "b"), chat(3, "c"), chat(4, "d")]);
        let engine = CleanupEngine::new(&svc, RetryPolicy::default(), false);

        let report = engine.clean_list(&store, &list, |_, _| {}).await.unwrap();

        assert_eq!(store.load().unwrap().ids(), vec![3]);
        assert_eq!(report.tally().success, 3);
        assert_eq!(report.outcomes[2].status, OutcomeStatus::Failed);
        assert!(!report.tally().all_failed());
    }

    #[tokio::test]
    async fn retries_through_a_short_throttle() {
        let svc = FakeService::new()
            .history(1, 4, 0)
            .delete_results(1, vec![throttle(), None]);
        let (_dir, store, list) = setup(vec![chat(1, "a")]);
        let engine = CleanupEngine::new(&svc, RetryPolicy::default(), false);
        let report = engine.clean_list(&store, &list, |_, _| {}).await.unwrap();
        assert_eq!(report.outcomes[0].status, OutcomeStatus::Success);
        assert_eq!(report.deleted(), 4);
        assert!(store.load().unwrap().is_empty());
    }

    #[tokio::test]
    async fn throttled_out_on_first_chat_aborts_without_touching_file() {
        let svc = FakeService::new()
            .history(1, 2, 0)
            .history(2, 2, 0)
            .delete_results(1, vec![throttle(), throttle(), throttle(), throttle()]);
        let (dir, store, list) = setup(vec![chat(1, "a"), chat(2, "b")]);
        let before = std::fs::read(dir.path().join("candidates.json")).unwrap();
        let engine = CleanupEngine::new(&svc, RetryPolicy::default(), false);

        let err = engine.clean_list(&store, &list, |_, _| {}).await.unwrap_err();

        assert!(matches!(err, CleanupError::ThrottledBeforeProgress { chat_id: 1, .. }));
        assert_eq!(before, std::fs::read(dir.path().join("candidates.json")).unwrap());
        assert_eq!(svc.own_messages_left(2), 2);
    }

    #[tokio::test]
    async fn first_chat_throttled_after_progress_is_partial_not_abort() {
        let svc = FakeService::new()
            .history(1, 150, 0)
            .history(2, 2, 0)
            .delete_results(1, vec![None, throttle(), throttle(), throttle(), throttle()]);
        let (_dir, store, list) = setup(vec![chat(1, "a"), chat(2, "b")]);
        let engine = CleanupEngine::new(&svc, RetryPolicy::default(), false);

        let mut seen = Vec::new();
        let report = engine
            .clean_list(&store, &list, |i, o| seen.push((i, o.status)))
            .await
            .unwrap();

        assert_eq!(
            seen,
            vec![(0, OutcomeStatus::Partial), (1, OutcomeStatus::Success)]
        );
        assert_eq!(report.outcomes[0].deleted, DELETE_BATCH_SIZE);
        assert_eq!(svc.own_messages_left(1), 50);
        assert_eq!(svc.own_messages_left(2), 0);
        assert_eq!(store.load().unwrap().ids(), vec![1]);
    }

    #[tokio::test]
    async fn dry_run_counts_without_mutating() {
        let svc = FakeService::new().history(1, 5, 3).history(2, 0, 4);
        let (dir, store, list) = setup(vec![chat(1, "a"), chat(2, "b")]);
        let path = dir.path().join("candidates.json");
        let before = std::fs::read(&path).unwrap();

        let dry = CleanupEngine::new(&svc, RetryPolicy::default(), true);
        let report = dry.clean_list(&store, &list, |_, _| {}).await.unwrap();

        assert!(svc.calls().is_empty());
        assert_eq!(before, std::fs::read(&path).unwrap());
        assert_eq!(report.found(), 5);
        assert_eq!(report.deleted(), 0);

        let real = CleanupEngine::new(&svc, RetryPolicy::default(), false);
        let report = real.clean_list(&store, &list, |_, _| {}).await.unwrap();
        assert_eq!(report.deleted(), 5);
        assert!(store.load().unwrap().is_empty());
    }

    #[tokio::test]
    async fn large_histories_are_deleted_in_bounded_batches() {
        let svc = FakeService::new().history(1, 250, 0);
        let (_dir, store, list) = setup(vec![chat(1, "a")]);
        let engine = CleanupEngine::new(&svc, RetryPolicy::default(), false);
        engine.clean_list(&store, &list, |_, _| {}).await.unwrap();
        let sizes: Vec<usize> = svc
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Delete(_, ids) => Some(ids.len()),
                _ => None,
            })
            .collect();
        assert_eq!(sizes, vec![100, 100, 50]);
    }

    #[tokio::test]
    async fn unreadable_history_fails_the_chat() {
        let svc = FakeService::new().history(2, 1, 0);
        let (_dir, store, list) = setup(vec![chat(2, "ok"), chat(404, "gone")]);
        let engine = CleanupEngine::new(&svc, RetryPolicy::default(), false);
        let report = engine.clean_list(&store, &list, |_, _| {}).await.unwrap();
        assert_eq!(report.outcomes[1].status, OutcomeStatus::Failed);
        assert_eq!(store.load().unwrap().ids(), vec![404]);
    }
}
