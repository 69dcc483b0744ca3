use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One successful comment, remembered for the duplicate window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub post_id: String,
    /// Normalized author name; empty when the author was unreadable.
    pub author: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateHit {
    SamePost,
    SameAuthor,
}

/// Posts and authors acted on recently. Owned and persisted by the
/// coordinator; the worker gets a copy per cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InteractionHistory {
    entries: Vec<Interaction>,
}

impl InteractionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, post_id: &str, author: &str, at: DateTime<Utc>) {
        self.entries.push(Interaction {
            post_id: post_id.to_string(),
            author: author.to_string(),
            at,
        });
    }

    /// The first reason `post_id`/`author` counts as a repeat within `window`.
    pub fn duplicate_of(
        &self,
        post_id: &str,
        author: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Option<DuplicateHit> {
        let recent = || self.entries.iter().filter(move |e| now - e.at < window);
        if recent().any(|e| e.post_id == post_id) {
            return Some(DuplicateHit::SamePost);
        }
        if !author.is_empty() && recent().any(|e| e.author == author) {
            return Some(DuplicateHit::SameAuthor);
        }
        None
    }

    /// Drop entries older than `window`. Returns how many were removed.
    pub fn prune(&mut self, window: Duration, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| now - e.at < window);
        before - self.entries.len()
    }

    pub fn entries(&self) -> &[Interaction] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
