use crate::bus::{ApprovalRequest, Message, StatusUpdate};
use crate::coordinator::state::Phase;
use std::collections::VecDeque;
use std::time::Instant;

const LOG_CAPACITY: usize = 200;

#[derive(Debug, Clone)]
pub struct AppState {
    pub start_time: Instant,
    pub status: StatusUpdate,
    pub today_count: u64,
    pub all_time_count: u64,
    /// Prompt awaiting the operator's approve/decline.
    pub approval: Option<ApprovalRequest>,
    pub logs: VecDeque<LogEntry>,
    pub log_scroll_offset: usize,
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub time: String,
    pub level: String,
    pub message: String,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            status: StatusUpdate {
                phase: Phase::Idle,
                comment_count: 0,
                max_posts: 0,
                status: "Ready".to_string(),
                authors_found: 0,
                authors_missing: 0,
                authors_pending: 0,
                authors_commented: 0,
                skipped: 0,
                failed: 0,
                last_error: None,
            },
            today_count: 0,
            all_time_count: 0,
            approval: None,
            logs: VecDeque::with_capacity(LOG_CAPACITY),
            log_scroll_offset: 0,
        }
    }

    pub fn push_log(&mut self, level: &str, message: String) {
        let time = chrono::Local::now().format("%H:%M:%S%.3f").to_string();
        if self.logs.len() >= LOG_CAPACITY {
            self.logs.pop_front();
        }
        self.logs.push_back(LogEntry {
            time,
            level: level.to_string(),
            message,
        });
    }

    pub fn uptime(&self) -> String {
        let secs = self.start_time.elapsed().as_secs();
        let h = secs / 3600;
        let m = (secs % 3600) / 60;
        format!("{}h {:02}m", h, m)
    }

    /// True when the authors panel has anything to show.
    pub fn list_mode(&self) -> bool {
        let s = &self.status;
        s.authors_found + s.authors_missing + s.authors_pending + s.authors_commented > 0
    }

    /// Fold one coordinator push into the view.
    pub fn apply(&mut self, message: Message) {
        match message {
            Message::StatusUpdate(update) => {
                if update.status != self.status.status && !update.status.is_empty() {
                    self.push_log("INFO", update.status.clone());
                }
                if update.last_error.is_some() && update.last_error != self.status.last_error {
                    let err = update.last_error.clone().unwrap_or_default();
                    self.push_log("WARN", err);
                }
                self.status = update;
            }
            Message::RealTimeCountUpdate { today_count, all_time_count } => {
                self.today_count = today_count;
                self.all_time_count = all_time_count;
            }
            Message::ApprovalPrompt(request) => {
                self.push_log(
                    "APPROVE",
                    format!("{}: \"{}\" [a]pprove / [d]ecline", request.author, request.comment),
                );
                self.approval = Some(request);
            }
            Message::ApprovalClosed { request_id } => {
                if self.approval.as_ref().is_some_and(|a| a.request_id == request_id) {
                    self.approval = None;
                }
            }
            other => {
                tracing::debug!(action = other.action(), "ui ignores message");
            }
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
