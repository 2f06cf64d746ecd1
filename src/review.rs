//! Interactive curation of a candidate list.
//!
//! [`ReviewSession`] is a synchronous state machine driven by a pull-based
//! [`KeySource`]. Every mutating key is flushed to disk before the next key
//! is read, so the file always equals the in-memory list.

use crate::{
    model::ChatRecord,
    store::{CandidateList, CandidateStore, KeepList, StoreError},
};
use std::io;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewKey {
    Up,
    Down,
    /// Drop the chat from this run's candidates.
    Delete,
    /// Drop the chat and never collect it again.
    Skip,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewState {
    Browsing,
    Mutated,
    Exited,
}

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("terminal error: {0}")]
    Terminal(#[from] io::Error),
}

pub trait KeySource {
    /// Blocks until the next meaningful key.
    fn next_key(&mut self) -> io::Result<ReviewKey>;
}

pub trait Renderer {
    fn render(&mut self, records: &[ChatRecord], cursor: usize, status: &str) -> io::Result<()>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReviewSummary {
    pub removed: usize,
    pub kept: usize,
    pub remaining: usize,
}

pub struct ReviewSession<'a, K: KeepList + ?Sized> {
    list: CandidateList,
    cursor: usize,
    state: ReviewState,
    status: String,
    store: &'a CandidateStore,
    keep: &'a mut K,
    summary: ReviewSummary,
}

impl<'a, K: KeepList + ?Sized> ReviewSession<'a, K> {
    pub fn new(list: CandidateList, store: &'a CandidateStore, keep: &'a mut K) -> Self {
        let state = if list.is_empty() {
            ReviewState::Exited
        } else {
            ReviewState::Browsing
        };
        Self {
            list,
            cursor: 0,
            state,
            status: String::new(),
            store,
            keep,
            summary: ReviewSummary::default(),
        }
    }

    pub fn list(&self) -> &CandidateList {
        &self.list
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn state(&self) -> ReviewState {
        self.state
    }

    fn summary(&self) -> ReviewSummary {
        ReviewSummary {
            remaining: self.list.len(),
            ..self.summary
        }
    }

    /// Apply one key. Mutations are persisted before this returns.
    pub fn apply(&mut self, key: ReviewKey) -> Result<ReviewState, StoreError> {
        if self.state == ReviewState::Exited {
            return Ok(self.state);
        }
        match key {
            ReviewKey::Up => self.cursor = self.cursor.saturating_sub(1),
            ReviewKey::Down => {
                if self.cursor + 1 < self.list.len() {
                    self.cursor += 1;
                }
            }
            ReviewKey::Delete | ReviewKey::Skip => {
                let Some(record) = self.list.get(self.cursor).cloned() else {
                    self.status = "No chats to remove".into();
                    return Ok(self.state);
                };
                if key == ReviewKey::Skip {
                    self.keep.append(record.chat_id)?;
                }
                let mut next = self.list.clone();
                next.remove_at(self.cursor);
                self.state = ReviewState::Mutated;
                self.store.save(&next)?;
                self.list = next;
                self.cursor = self.cursor.min(self.list.len().saturating_sub(1));

                if key == ReviewKey::Skip {
                    self.summary.kept += 1;
                    self.status = format!("Kept forever: {}", record.label());
                } else {
                    self.summary.removed += 1;
                    self.status = format!("Removed: {}", record.label());
                }
                debug!("review: {:?} {} -> {} left", key, record.chat_id, self.list.len());
                self.state = ReviewState::Browsing;
            }
            ReviewKey::Quit => self.state = ReviewState::Exited,
        }
        Ok(self.state)
    }

    /// Run until quit. An empty list returns at once without rendering.
    pub fn run<I, R>(&mut self, keys: &mut I, renderer: &mut R) -> Result<ReviewSummary, ReviewError>
    where
        I: KeySource + ?Sized,
        R: Renderer + ?Sized,
    {
        while self.state != ReviewState::Exited {
            renderer.render(self.list.records(), self.cursor, &self.status)?;
            let key = keys.next_key()?;
            self.apply(key)?;
        }
        Ok(self.summary())
    }
}
