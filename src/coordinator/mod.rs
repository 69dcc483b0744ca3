//! The coordinator is the single writer of run state, counters and the
//! lookup cache. It runs as one task draining its bus mailbox; everything it
//! learns from the worker or the operator is persisted before the UI is told.

pub mod state;

use crate::bus::{
    ApprovalRequest, Bus, Envelope, Handled, Mailbox, Message, Participant, Reply, Responder, StatusUpdate,
    WorkerState,
};
use crate::config::{RunConfiguration, TimingsConfig};
use crate::engine::FilterDecision;
use crate::execution::{FailureStage, SubmissionOutcome};
use crate::profiles::{resolve_members, ProfileResolver};
use crate::store::lookup_cache::{spawn_sweeper, LOOKUP_TTL, SWEEP_INTERVAL};
use crate::store::state_store::{today_key, ALL_TIME_KEY};
use crate::store::{JsonListStore, LookupCache, PersistedState, SharedCache, StateStore};
use chrono::{Local, Utc};
use state::{FinishReason, Phase, RunState};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

pub struct Coordinator {
    bus: Bus,
    store: StateStore,
    lists: JsonListStore,
    resolver: Arc<dyn ProfileResolver>,
    cache: SharedCache<String>,
    timings: TimingsConfig,
    /// Open approval prompts, answered by the operator or dropped on stop.
    approvals: HashMap<u64, oneshot::Sender<bool>>,
    next_request: u64,
}

fn answer(reply: Option<Responder>, r: Reply) {
    if let Some(responder) = reply {
        responder.respond(r);
    }
}

impl Coordinator {
    pub fn new(
        bus: Bus,
        store: StateStore,
        lists: JsonListStore,
        resolver: Arc<dyn ProfileResolver>,
        timings: TimingsConfig,
    ) -> Self {
        Self {
            bus,
            store,
            lists,
            resolver,
            cache: Arc::new(Mutex::new(LookupCache::new(LOOKUP_TTL))),
            timings,
            approvals: HashMap::new(),
            next_request: 0,
        }
    }

    pub fn run_state(&self) -> &RunState {
        &self.store.doc().run
    }

    /// Drain the mailbox until every sender is gone.
    pub async fn run(mut self, mut mailbox: Mailbox) {
        self.recover();
        let sweeper = spawn_sweeper(self.cache.clone(), SWEEP_INTERVAL);
        self.push_status();

        while let Some(env) = mailbox.recv().await {
            let from = env.from;
            let action = env.message.action();
            let handled = self.handle(env);
            tracing::trace!(%from, action, ?handled, "handled message");
        }

        sweeper.abort();
        tracing::info!("coordinator mailbox closed");
    }

    /// A run interrupted mid-stop is finished; a running or paused one is
    /// left for the worker to pick up when it (re)joins.
    fn recover(&mut self) {
        let phase = self.run_state().phase;
        match phase {
            Phase::Stopping => self.commit(|doc| {
                doc.run.phase = Phase::Idle;
                doc.run.finished = Some(FinishReason::Stopped);
                doc.run.status = FinishReason::Stopped.describe().to_string();
            }),
            Phase::Running | Phase::Paused => {
                tracing::info!(
                    %phase,
                    comments = self.run_state().current_comment_count,
                    "resuming persisted run"
                );
            }
            Phase::Idle => {}
        }
    }

    pub fn handle(&mut self, env: Envelope) -> Handled {
        let Envelope { from, message, reply } = env;
        match message {
            Message::Start { config } => answer(reply, self.start(config)),
            Message::Stop => answer(reply, self.stop()),
            Message::Pause => answer(reply, self.transition(Phase::Running, Phase::Paused, "Paused")),
            Message::Resume => answer(reply, self.transition(Phase::Paused, Phase::Running, "Resumed")),
            Message::Reset => answer(reply, self.reset()),
            Message::ApprovalAnswer { request_id, approved } => {
                answer(reply, self.approval_answer(request_id, approved))
            }
            Message::GetState => answer(reply, self.worker_state()),
            Message::GetControl => answer(reply, Reply::Control { phase: self.run_state().phase }),
            Message::ResolveProfiles => return self.resolve_profiles(reply),
            Message::RequestApproval(request) => return self.request_approval(request, reply),
            Message::AuthorSeen { author } => {
                self.author_seen(&author);
                answer(reply, Reply::Ack);
            }
            Message::RecordDecision { post_id, author, decision } => {
                self.record_decision(&post_id, &author, decision);
                answer(reply, Reply::Ack);
            }
            Message::RecordOutcome { author, outcome, error } => {
                self.record_outcome(&author, outcome, error);
                answer(reply, Reply::Ack);
            }
            Message::RunFinished { reason, detail } => {
                self.run_finished(reason, detail);
                answer(reply, Reply::Ack);
            }
            Message::PageError { detail } => {
                self.page_error(detail);
                answer(reply, Reply::Ack);
            }
            Message::ProfilesResolved { names, missing } => {
                self.commit(|doc| doc.run.authors.merge_targets(&names, &missing));
                answer(reply, Reply::Ack);
            }
            other => {
                tracing::warn!(%from, action = other.action(), "coordinator does not handle this message");
                answer(reply, Reply::Rejected {
                    reason: format!("unsupported action {}", other.action()),
                });
            }
        }
        Handled::Done
    }

    /// Mutate, persist, then push the new status to the UI.
    fn commit(&mut self, f: impl FnOnce(&mut PersistedState)) {
        if let Err(e) = self.store.update(f) {
            tracing::warn!(error = %format!("{e:#}"), "failed to persist run state");
        }
        self.push_status();
    }

    fn push_status(&self) {
        let run = self.run_state();
        let update = StatusUpdate {
            phase: run.phase,
            comment_count: run.current_comment_count,
            max_posts: run.max_posts,
            status: run.status.clone(),
            authors_found: run.authors.found.len(),
            authors_missing: run.authors.missing.len(),
            authors_pending: run.authors.pending.len(),
            authors_commented: run.authors.commented.len(),
            skipped: run.skipped,
            failed: run.failed,
            last_error: run.last_error.clone(),
        };
        self.to_ui(Message::StatusUpdate(update));
    }

    fn to_ui(&self, message: Message) {
        if let Err(e) = self.bus.emit(Participant::Coordinator, Participant::Ui, message) {
            tracing::debug!(error = %e, "ui push dropped");
        }
    }

    fn start(&mut self, config: RunConfiguration) -> Reply {
        if self.run_state().phase.is_active() {
            return Reply::Rejected {
                reason: "a run is already active".to_string(),
            };
        }
        if let Err(e) = config.validate() {
            let reason = e.to_string();
            tracing::warn!(error = %reason, "rejected run configuration");
            self.commit(|doc| {
                doc.run.last_error = Some(reason.clone());
                doc.run.status = format!("Invalid configuration: {reason}");
            });
            return Reply::Rejected { reason };
        }

        let today = today_key(Local::now().date_naive());
        let now = Utc::now();
        let max_posts = config.max_posts;
        self.commit(|doc| {
            let today_count = doc.counter(&today);
            let all_time = doc.counter(ALL_TIME_KEY);
            doc.run = RunState::start(config, today_count, all_time, now);
        });
        tracing::info!(max_posts, "run started");

        if let Err(e) = self.bus.emit(Participant::Coordinator, Participant::Worker, Message::BeginRun) {
            tracing::warn!(error = %e, "worker not reachable, it will pick the run up when it joins");
        }
        Reply::Ack
    }

    fn stop(&mut self) -> Reply {
        if !self.run_state().phase.is_active() {
            return Reply::Rejected {
                reason: "no active run".to_string(),
            };
        }
        self.decline_pending();
        self.commit(|doc| {
            doc.run.phase = Phase::Stopping;
            doc.run.status = "Stopping after the current post".to_string();
        });
        tracing::info!("stop requested");
        Reply::Ack
    }

    fn transition(&mut self, from: Phase, to: Phase, status: &str) -> Reply {
        let phase = self.run_state().phase;
        if phase != from {
            return Reply::Rejected {
                reason: format!("cannot go from {phase} to {to}"),
            };
        }
        self.commit(|doc| {
            doc.run.phase = to;
            doc.run.status = status.to_string();
        });
        tracing::info!(%from, %to, "phase changed");
        Reply::Ack
    }

    /// An active run sees `Idle` at its next control check and winds down.
    fn reset(&mut self) -> Reply {
        let was_active = self.run_state().phase.is_active();
        self.decline_pending();
        self.commit(|doc| doc.run.reset());
        tracing::info!(was_active, "run state reset");
        Reply::Ack
    }

    fn worker_state(&self) -> Reply {
        let doc = self.store.doc();
        Reply::State(Box::new(WorkerState {
            phase: doc.run.phase,
            config: doc.run.config.clone(),
            comment_count: doc.run.current_comment_count,
            history: doc.history.clone(),
        }))
    }

    fn author_seen(&mut self, author: &str) {
        if self.run_state().authors.pending.contains(author) {
            self.commit(|doc| {
                doc.run.authors.mark_found(author);
            });
        }
    }

    fn record_decision(&mut self, post_id: &str, author: &str, decision: FilterDecision) {
        let who = if author.is_empty() { "unknown author" } else { author };
        match decision.rejected_by {
            Some(filter) => {
                tracing::info!(post_id, author = who, %filter, detail = %decision.reason_detail, "post skipped");
                self.commit(|doc| {
                    doc.run.record_rejection(filter);
                    doc.run.status = format!("Skipped {who}: {}", decision.reason_detail);
                });
            }
            None => self.commit(|doc| doc.run.status = format!("Commenting on {who}'s post")),
        }
    }

    fn record_outcome(&mut self, author: &str, outcome: SubmissionOutcome, error: Option<String>) {
        if outcome.succeeded {
            let now = Utc::now();
            let today = today_key(Local::now().date_naive());
            let mut counts = (0, 0);
            self.commit(|doc| {
                let today_count = doc.increment(&today);
                let all_time = doc.increment(ALL_TIME_KEY);
                let window = doc.run.config.as_ref().map_or(0, |c| c.duplicate_window_hours);
                doc.history.record(&outcome.post_id, author, now);
                if window > 0 {
                    doc.history.prune(chrono::Duration::hours(window as i64), now);
                }

                let run = &mut doc.run;
                run.today_count = today_count;
                run.total_all_time_comments = all_time;
                if run.phase.is_active() {
                    run.current_comment_count += 1;
                }
                run.authors.mark_commented(author);
                run.status = format!(
                    "Commented on {author}'s post ({}/{})",
                    run.current_comment_count, run.max_posts
                );
                counts = (today_count, all_time);
            });
            tracing::info!(
                post_id = %outcome.post_id,
                author,
                url = outcome.comment_url.as_deref().unwrap_or("-"),
                today = counts.0,
                "comment recorded"
            );
            self.to_ui(Message::RealTimeCountUpdate {
                today_count: counts.0,
                all_time_count: counts.1,
            });
        } else if outcome.failure_stage == Some(FailureStage::ApprovalDeclined) {
            self.commit(|doc| {
                doc.run.skipped += 1;
                doc.run.status = format!("Comment for {author} declined");
            });
        } else {
            let reason = error
                .or_else(|| outcome.failure_stage.map(|s| s.to_string()))
                .unwrap_or_else(|| "unknown failure".to_string());
            tracing::warn!(post_id = %outcome.post_id, author, reason = %reason, "submission failed");
            self.commit(|doc| {
                doc.run.failed += 1;
                doc.run.status = format!("Failed on {}: {reason}", outcome.post_id);
                doc.run.last_error = Some(reason);
            });
        }
    }

    /// The run carries on; the error is only surfaced.
    fn page_error(&mut self, detail: String) {
        if !self.run_state().phase.is_active() {
            return;
        }
        tracing::warn!(detail = %detail, "worker recovered from a page error");
        self.commit(|doc| {
            doc.run.status = format!("Page error, retrying: {detail}");
            doc.run.last_error = Some(detail);
        });
    }

    fn run_finished(&mut self, reason: FinishReason, detail: Option<String>) {
        if !self.run_state().phase.is_active() {
            tracing::debug!(?reason, "finish for a run that was already reset");
            return;
        }
        tracing::info!(?reason, detail = detail.as_deref().unwrap_or(""), "run finished");
        self.decline_pending();
        self.commit(|doc| {
            let run = &mut doc.run;
            run.phase = Phase::Idle;
            run.finished = Some(reason);
            run.status = match &detail {
                Some(d) => format!("{}: {d}", reason.describe()),
                None => reason.describe().to_string(),
            };
            if reason == FinishReason::Failed {
                run.last_error = detail;
            }
        });
    }

    /// Deferred: resolution runs in a task that answers the worker once the
    /// whole batch has settled.
    fn resolve_profiles(&mut self, reply: Option<Responder>) -> Handled {
        let Some(responder) = reply else {
            tracing::warn!("resolveProfiles sent without a reply handle");
            return Handled::Done;
        };
        let list = self
            .run_state()
            .config
            .as_ref()
            .filter(|c| c.target_list_enabled)
            .and_then(|c| c.target_list.clone());
        let Some(list) = list else {
            responder.respond(Reply::Profiles { names: None });
            return Handled::Done;
        };
        let members = match self.lists.members(&list) {
            Ok(Some(members)) => members,
            Ok(None) => {
                tracing::info!(list = %list, "no usable list store");
                responder.respond(Reply::Profiles { names: None });
                return Handled::Done;
            }
            Err(e) => {
                tracing::warn!(list = %list, error = %format!("{e:#}"), "failed to load list");
                responder.respond(Reply::Profiles { names: None });
                return Handled::Done;
            }
        };
        if members.is_empty() {
            let known = self.lists.list_names().unwrap_or_default();
            tracing::warn!(list = %list, ?known, "target list has no members");
            self.commit(|doc| doc.run.last_error = Some(format!("target list {list} has no members")));
        }

        let resolver = self.resolver.clone();
        let cache = self.cache.clone();
        let bus = self.bus.clone();
        tokio::spawn(async move {
            let resolution = resolve_members(resolver, cache, members).await;
            tracing::info!(
                list = %list,
                resolved = resolution.names.len(),
                missing = resolution.missing.len(),
                "target list resolved"
            );
            let names = resolution.names.clone();
            let note = Message::ProfilesResolved {
                names: resolution.names,
                missing: resolution.missing,
            };
            if let Err(e) = bus.notify(Participant::Coordinator, Participant::Coordinator, note).await {
                tracing::warn!(error = %e, "could not record resolved profiles");
            }
            responder.respond(Reply::Profiles { names: Some(names) });
        });
        Handled::Deferred
    }

    /// Deferred: forwards the request to the operator and answers the worker
    /// with their decision, or a decline once the wait runs out.
    fn request_approval(&mut self, mut request: ApprovalRequest, reply: Option<Responder>) -> Handled {
        let Some(responder) = reply else {
            tracing::warn!("requestApproval sent without a reply handle");
            return Handled::Done;
        };
        self.next_request += 1;
        let request_id = self.next_request;
        request.request_id = request_id;
        let author = request.author.clone();

        if let Err(e) = self.bus.emit(Participant::Coordinator, Participant::Ui, Message::ApprovalPrompt(request)) {
            tracing::warn!(error = %e, "no operator to ask, declining");
            responder.respond(Reply::Approval { approved: false });
            return Handled::Done;
        }
        self.commit(|doc| doc.run.status = format!("Awaiting approval for {author}'s post"));

        let (tx, rx) = oneshot::channel();
        self.approvals.retain(|_, pending| !pending.is_closed());
        self.approvals.insert(request_id, tx);

        let wait = Duration::from_secs(self.timings.approval_timeout_s);
        let bus = self.bus.clone();
        tokio::spawn(async move {
            let approved = match tokio::time::timeout(wait, rx).await {
                Ok(Ok(approved)) => approved,
                Ok(Err(_)) => false,
                Err(_) => {
                    tracing::info!(request_id, "approval timed out, declining");
                    false
                }
            };
            responder.respond(Reply::Approval { approved });
            let _ = bus.emit(
                Participant::Coordinator,
                Participant::Ui,
                Message::ApprovalClosed { request_id },
            );
        });
        Handled::Deferred
    }

    fn approval_answer(&mut self, request_id: u64, approved: bool) -> Reply {
        let delivered = match self.approvals.remove(&request_id) {
            Some(tx) => tx.send(approved).is_ok(),
            None => false,
        };
        if !delivered {
            return Reply::Rejected {
                reason: format!("approval {request_id} is no longer open"),
            };
        }
        tracing::info!(request_id, approved, "operator answered approval");
        Reply::Ack
    }

    fn decline_pending(&mut self) {
        for (_, tx) in self.approvals.drain() {
            let _ = tx.send(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiles::StoredNameResolver;

    fn coordinator(bus: &Bus) -> Coordinator {
        let dir = std::env::temp_dir().join("feedpilot-coordinator-unit-absent");
        Coordinator::new(
            bus.clone(),
            StateStore::in_memory(),
            JsonListStore::new(&dir.join("lists.json")),
            Arc::new(StoredNameResolver),
            TimingsConfig::default(),
        )
    }

    fn request(message: Message) -> (Envelope, oneshot::Receiver<Reply>) {
        let (tx, rx) = oneshot::channel();
        let action = message.action();
        let env = Envelope {
            from: Participant::Ui,
            message,
            reply: Some(Responder::new(tx, action)),
        };
        (env, rx)
    }

    fn call(c: &mut Coordinator, message: Message) -> Reply {
        let (env, mut rx) = request(message);
        assert_eq!(c.handle(env), Handled::Done);
        rx.try_recv().unwrap()
    }

    #[tokio::test]
    async fn test_start_validates_and_rejects_second_start() {
        let bus = Bus::new();
        let mut c = coordinator(&bus);

        let bad = RunConfiguration { max_posts: 0, ..Default::default() };
        assert!(matches!(call(&mut c, Message::Start { config: bad }), Reply::Rejected { .. }));
        assert_eq!(c.run_state().phase, Phase::Idle);
        assert!(c.run_state().last_error.is_some());

        let good = RunConfiguration { max_posts: 3, ..Default::default() };
        assert_eq!(call(&mut c, Message::Start { config: good.clone() }), Reply::Ack);
        assert_eq!(c.run_state().phase, Phase::Running);
        assert!(matches!(call(&mut c, Message::Start { config: good }), Reply::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_pause_resume_stop_transitions() {
        let bus = Bus::new();
        let mut c = coordinator(&bus);
        assert!(matches!(call(&mut c, Message::Pause), Reply::Rejected { .. }));
        call(&mut c, Message::Start { config: RunConfiguration::default() });

        assert_eq!(call(&mut c, Message::Pause), Reply::Ack);
        assert_eq!(call(&mut c, Message::GetControl), Reply::Control { phase: Phase::Paused });
        assert_eq!(call(&mut c, Message::Resume), Reply::Ack);
        assert_eq!(call(&mut c, Message::Stop), Reply::Ack);
        assert_eq!(call(&mut c, Message::GetControl), Reply::Control { phase: Phase::Stopping });

        call(&mut c, Message::RunFinished { reason: FinishReason::Stopped, detail: None });
        assert_eq!(c.run_state().phase, Phase::Idle);
        assert_eq!(c.run_state().status, "Stopped by operator");
    }

    #[tokio::test]
    async fn test_outcomes_update_counters_and_push_counts() {
        let bus = Bus::new();
        let mut ui = bus.attach(Participant::Ui);
        let mut c = coordinator(&bus);
        call(&mut c, Message::Start { config: RunConfiguration::default() });

        let mut ok = SubmissionOutcome::failed("p1", FailureStage::ConfirmationTimeout);
        ok.succeeded = true;
        ok.failure_stage = None;
        call(&mut c, Message::RecordOutcome { author: "jane doe".into(), outcome: ok, error: None });
        call(&mut c, Message::RecordOutcome {
            author: "kim park".into(),
            outcome: SubmissionOutcome::failed("p2", FailureStage::EditorNotFound),
            error: None,
        });

        let run = c.run_state();
        assert_eq!(run.current_comment_count, 1);
        assert_eq!(run.total_all_time_comments, 1);
        assert_eq!(run.failed, 1);
        assert_eq!(run.last_error.as_deref(), Some("comment editor not found"));
        assert_eq!(c.store.doc().counter(ALL_TIME_KEY), 1);
        assert_eq!(c.store.doc().history.len(), 1);

        let mut saw_count = false;
        while let Ok(env) = ui.try_recv() {
            if let Message::RealTimeCountUpdate { today_count, all_time_count } = env.message {
                assert_eq!((today_count, all_time_count), (1, 1));
                saw_count = true;
            }
        }
        assert!(saw_count);
    }

    #[tokio::test]
    async fn test_reset_mid_run_reads_as_idle() {
        let bus = Bus::new();
        let mut c = coordinator(&bus);
        call(&mut c, Message::Start { config: RunConfiguration::default() });
        assert_eq!(call(&mut c, Message::Reset), Reply::Ack);
        assert_eq!(call(&mut c, Message::GetControl), Reply::Control { phase: Phase::Idle });
        // The late finish from the worker does not overwrite the reset.
        call(&mut c, Message::RunFinished { reason: FinishReason::Stopped, detail: None });
        assert_eq!(c.run_state().status, "Ready");
    }

    #[tokio::test]
    async fn test_approval_answer_reaches_waiting_worker_once() {
        let bus = Bus::new();
        let _ui = bus.attach(Participant::Ui);
        let mut c = coordinator(&bus);
        call(&mut c, Message::Start { config: RunConfiguration::default() });

        let (env, mut worker_rx) = request(Message::RequestApproval(ApprovalRequest {
            request_id: 0,
            post_id: "urn:li:activity:1".into(),
            author: "Jane Doe".into(),
            caption: "Shipping day".into(),
            comment: "Congrats!".into(),
        }));
        assert_eq!(c.handle(env), Handled::Deferred);

        assert_eq!(call(&mut c, Message::ApprovalAnswer { request_id: 1, approved: true }), Reply::Ack);
        assert!(matches!(
            call(&mut c, Message::ApprovalAnswer { request_id: 1, approved: false }),
            Reply::Rejected { .. }
        ));
        assert!(matches!(
            call(&mut c, Message::ApprovalAnswer { request_id: 9, approved: true }),
            Reply::Rejected { .. }
        ));

        let reply = tokio::time::timeout(Duration::from_secs(1), &mut worker_rx).await.unwrap().unwrap();
        assert_eq!(reply, Reply::Approval { approved: true });
    }

    #[tokio::test]
    async fn test_unknown_target_list_is_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let lists = dir.path().join("lists.json");
        std::fs::write(
            &lists,
            r#"{"enabled": true, "profiles": [{"profileUrn": "urn:li:fs_miniProfile:A",
                "fullName": "Jane Doe", "profileUrl": "https://www.linkedin.com/in/jane-doe",
                "listMembership": ["Leads"]}]}"#,
        )
        .unwrap();
        let bus = Bus::new();
        let mut c = Coordinator::new(
            bus.clone(),
            StateStore::in_memory(),
            JsonListStore::new(&lists),
            Arc::new(StoredNameResolver),
            TimingsConfig::default(),
        );
        let run = RunConfiguration {
            target_list_enabled: true,
            target_list: Some("Partners".into()),
            ..Default::default()
        };
        call(&mut c, Message::Start { config: run });

        let (env, rx) = request(Message::ResolveProfiles);
        assert_eq!(c.handle(env), Handled::Deferred);
        assert_eq!(
            c.run_state().last_error.as_deref(),
            Some("target list Partners has no members")
        );
        assert_eq!(rx.await.unwrap(), Reply::Profiles { names: Some(vec![]) });
    }

    #[tokio::test]
    async fn test_target_list_without_store_resolves_to_none() {
        let bus = Bus::new();
        let mut c = coordinator(&bus);
        let run = RunConfiguration {
            target_list_enabled: true,
            target_list: Some("Leads".into()),
            ..Default::default()
        };
        call(&mut c, Message::Start { config: run });
        assert_eq!(call(&mut c, Message::ResolveProfiles), Reply::Profiles { names: None });
    }
}
