use crate::config::RunConfiguration;
use crate::engine::FilterName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Idle,
    Running,
    Paused,
    Stopping,
}

impl Phase {
    /// A run exists (possibly paused or winding down).
    pub fn is_active(self) -> bool {
        self != Phase::Idle
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Idle => "idle",
            Phase::Running => "running",
            Phase::Paused => "paused",
            Phase::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    MaxPosts,
    Stopped,
    FeedExhausted,
    Failed,
}

impl FinishReason {
    pub fn describe(self) -> &'static str {
        match self {
            FinishReason::MaxPosts => "Reached max posts",
            FinishReason::Stopped => "Stopped by operator",
            FinishReason::FeedExhausted => "No more posts in feed",
            FinishReason::Failed => "Run failed",
        }
    }
}

/// Target-list bookkeeping, keyed by normalized name. Empty outside list mode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorProgress {
    pub found: BTreeSet<String>,
    pub missing: BTreeSet<String>,
    pub pending: BTreeSet<String>,
    pub commented: BTreeSet<String>,
}

impl AuthorProgress {
    /// Apply a fresh resolution without losing progress already made, as
    /// happens when a restarted worker resolves the list again.
    pub fn merge_targets(&mut self, names: &[String], missing: &[String]) {
        for name in names {
            if !self.found.contains(name) && !self.commented.contains(name) {
                self.pending.insert(name.clone());
            }
        }
        self.missing = missing.iter().cloned().collect();
    }

    /// An author from the list showed up in the feed.
    pub fn mark_found(&mut self, name: &str) -> bool {
        if self.pending.remove(name) {
            self.found.insert(name.to_string());
            true
        } else {
            false
        }
    }

    pub fn mark_commented(&mut self, name: &str) -> bool {
        let known = self.pending.remove(name) | self.found.remove(name);
        if known {
            self.commented.insert(name.to_string());
        }
        known
    }
}

/// Coordinator-owned state of the current (or last) run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunState {
    pub phase: Phase,
    pub status: String,
    pub current_comment_count: u32,
    pub max_posts: u32,
    pub total_all_time_comments: u64,
    pub today_count: u64,
    pub authors: AuthorProgress,
    pub skipped: u32,
    pub failed: u32,
    pub rejections: BTreeMap<FilterName, u32>,
    pub last_error: Option<String>,
    pub config: Option<RunConfiguration>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished: Option<FinishReason>,
}

impl RunState {
    pub fn start(config: RunConfiguration, today_count: u64, all_time: u64, now: DateTime<Utc>) -> Self {
        Self {
            phase: Phase::Running,
            status: "Starting".to_string(),
            max_posts: config.max_posts,
            today_count,
            total_all_time_comments: all_time,
            config: Some(config),
            started_at: Some(now),
            ..Default::default()
        }
    }

    /// Clear run-scoped fields, keeping the day/all-time tallies on display.
    pub fn reset(&mut self) {
        *self = Self {
            status: "Ready".to_string(),
            today_count: self.today_count,
            total_all_time_comments: self.total_all_time_comments,
            ..Default::default()
        };
    }

    pub fn record_rejection(&mut self, by: FilterName) {
        self.skipped += 1;
        *self.rejections.entry(by).or_insert(0) += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_and_reset_keep_tallies() {
        let run = RunConfiguration { max_posts: 7, ..Default::default() };
        let mut state = RunState::start(run, 3, 40, Utc::now());
        assert_eq!(state.phase, Phase::Running);
        assert_eq!(state.max_posts, 7);
        state.current_comment_count = 2;
        state.record_rejection(FilterName::Promoted);
        state.record_rejection(FilterName::Promoted);
        assert_eq!(state.rejections[&FilterName::Promoted], 2);
        assert_eq!(state.skipped, 2);

        state.reset();
        assert_eq!(state.phase, Phase::Idle);
        assert_eq!(state.current_comment_count, 0);
        assert!(state.rejections.is_empty());
        assert_eq!(state.today_count, 3);
        assert_eq!(state.total_all_time_comments, 40);
    }

    #[test]
    fn test_author_progress_moves() {
        let names = vec!["jane doe".to_string(), "kim park".to_string()];
        let mut p = AuthorProgress::default();
        p.merge_targets(&names, &["bo chen".to_string()]);
        assert!(p.mark_found("jane doe"));
        assert!(!p.mark_found("jane doe"));
        assert!(p.mark_commented("jane doe"));
        assert!(!p.mark_commented("stranger"));
        assert_eq!(p.pending.len(), 1);
        assert!(p.found.is_empty());
        assert_eq!(p.commented.len(), 1);
        assert_eq!(p.missing.len(), 1);
    }

    #[test]
    fn test_merge_targets_keeps_progress() {
        let names = vec!["jane doe".to_string(), "kim park".to_string()];
        let mut p = AuthorProgress::default();
        p.merge_targets(&names, &[]);
        p.mark_commented("jane doe");
        p.merge_targets(&names, &["kim park".to_string()]);
        assert!(!p.pending.contains("jane doe"));
        assert!(p.pending.contains("kim park"));
        assert!(p.commented.contains("jane doe"));
        assert_eq!(p.missing.len(), 1);
    }

    #[test]
    fn test_rejection_map_serializes_with_filter_keys() {
        let mut state = RunState::default();
        state.record_rejection(FilterName::DuplicateWindow);
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["rejections"]["duplicate_window"], 1);
        let back: RunState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }
}
