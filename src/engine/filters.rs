use crate::config::RunConfiguration;
use crate::engine::classifier::PostCandidate;
use crate::engine::history::{DuplicateHit, InteractionHistory};
use crate::engine::names::normalize_name;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterName {
    Blacklist,
    TargetList,
    TimeWindow,
    CompanyPage,
    FriendActivity,
    Promoted,
    DuplicateWindow,
}

impl FilterName {
    pub const ALL: [FilterName; 7] = [
        FilterName::Blacklist,
        FilterName::TargetList,
        FilterName::TimeWindow,
        FilterName::CompanyPage,
        FilterName::FriendActivity,
        FilterName::Promoted,
        FilterName::DuplicateWindow,
    ];

    pub fn label(self) -> &'static str {
        match self {
            FilterName::Blacklist => "blacklist",
            FilterName::TargetList => "target list",
            FilterName::TimeWindow => "time window",
            FilterName::CompanyPage => "company page",
            FilterName::FriendActivity => "friend activity",
            FilterName::Promoted => "promoted",
            FilterName::DuplicateWindow => "duplicate window",
        }
    }
}

impl fmt::Display for FilterName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterDecision {
    pub accepted: bool,
    pub rejected_by: Option<FilterName>,
    pub reason_detail: String,
}

impl FilterDecision {
    pub fn accept() -> Self {
        Self {
            accepted: true,
            rejected_by: None,
            reason_detail: String::new(),
        }
    }

    pub fn reject(by: FilterName, detail: impl Into<String>) -> Self {
        Self {
            accepted: false,
            rejected_by: Some(by),
            reason_detail: detail.into(),
        }
    }
}

/// The enabled filters for one run, in evaluation order. Evaluation stops at
/// the first rejection.
#[derive(Debug, Clone)]
pub struct FilterChain {
    steps: Vec<FilterName>,
    blacklist: HashSet<String>,
    allow: HashSet<String>,
    min_age_hours: f64,
    window: Duration,
}

impl FilterChain {
    /// `allow_names` is the resolved target list; ignored unless the run
    /// enables target-list mode, where `None` means no list could be loaded.
    pub fn from_run(run: &RunConfiguration, allow_names: Option<&[String]>) -> Self {
        let mut steps = Vec::new();
        if run.blacklist_enabled {
            steps.push(FilterName::Blacklist);
        }
        if run.target_list_enabled {
            steps.push(FilterName::TargetList);
        }
        if run.time_filter {
            steps.push(FilterName::TimeWindow);
        }
        if run.skip_company_pages {
            steps.push(FilterName::CompanyPage);
        }
        if run.skip_friend_activity {
            steps.push(FilterName::FriendActivity);
        }
        if run.skip_promoted {
            steps.push(FilterName::Promoted);
        }
        if run.duplicate_window_hours > 0 {
            steps.push(FilterName::DuplicateWindow);
        }

        let normalize_all = |names: &[String]| -> HashSet<String> {
            names
                .iter()
                .map(|n| normalize_name(n))
                .filter(|n| !n.is_empty())
                .collect()
        };

        Self {
            steps,
            blacklist: normalize_all(run.blacklist.as_slice()),
            allow: allow_names.map(normalize_all).unwrap_or_default(),
            min_age_hours: run.min_post_age_hours,
            window: Duration::hours(run.duplicate_window_hours as i64),
        }
    }

    pub fn steps(&self) -> &[FilterName] {
        &self.steps
    }

    pub fn evaluate(
        &self,
        candidate: &PostCandidate,
        history: &InteractionHistory,
        now: DateTime<Utc>,
    ) -> FilterDecision {
        for step in &self.steps {
            if let Some(detail) = self.check(*step, candidate, history, now) {
                return FilterDecision::reject(*step, detail);
            }
        }
        FilterDecision::accept()
    }

    /// `Some(reason)` when `step` rejects the candidate.
    fn check(
        &self,
        step: FilterName,
        c: &PostCandidate,
        history: &InteractionHistory,
        now: DateTime<Utc>,
    ) -> Option<String> {
        let who = c.author_name.as_deref().unwrap_or("unknown author");
        match step {
            FilterName::Blacklist => self
                .blacklist
                .contains(&c.author_normalized_name)
                .then(|| format!("{who} is blacklisted")),
            FilterName::TargetList => (!self.allow.contains(&c.author_normalized_name))
                .then(|| format!("{who} is not on the target list")),
            FilterName::TimeWindow => match c.age_hours {
                None => Some("post age unknown".to_string()),
                Some(age) if age < self.min_age_hours => Some(format!(
                    "post is {age:.1}h old, minimum is {:.1}h",
                    self.min_age_hours
                )),
                Some(_) => None,
            },
            FilterName::CompanyPage => c.is_company_page.then(|| format!("{who} is a company page")),
            FilterName::FriendActivity => {
                c.is_friend_activity.then(|| "surfaced by a connection's activity".to_string())
            }
            FilterName::Promoted => c.is_promoted.then(|| "promoted post".to_string()),
            FilterName::DuplicateWindow => history
                .duplicate_of(&c.post_id, &c.author_normalized_name, self.window, now)
                .map(|hit| match hit {
                    DuplicateHit::SamePost => "already commented on this post".to_string(),
                    DuplicateHit::SameAuthor => format!("commented on {who} recently"),
                }),
        }
    }
}
