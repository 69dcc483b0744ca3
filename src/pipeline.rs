//! The page worker: discovers posts, filters them and drives submissions,
//! one post at a time. It owns no run state; everything it learns goes to
//! the coordinator and everything it needs to (re)join a run comes back from
//! `getState`.

use crate::bus::{ApprovalRequest, Bus, BusError, Mailbox, Message, Participant, Reply, WorkerState};
use crate::config::{Config, RunConfiguration, TimingsConfig};
use crate::coordinator::state::{FinishReason, Phase};
use crate::engine::pacing::Pacing;
use crate::engine::{classify, poll_until, FilterChain, InteractionHistory, PollSpec};
use crate::execution::{CommentSequencer, FailureStage, SubmissionOutcome, SubmitOptions};
use crate::generator::{generate_or_fallback, CommentGenerator};
use crate::page::adapter::{self, DomAdapter};
use crate::page::{PageDriver, PostRecord};
use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// How often a paused worker asks whether it may continue.
const PAUSE_POLL: Duration = Duration::from_secs(1);
/// Slack on top of the coordinator's own approval timeout.
const APPROVAL_GRACE: Duration = Duration::from_secs(5);
/// Wait after a failed page read before trying again.
const PAGE_ERROR_BACKOFF: Duration = Duration::from_secs(2);
/// Control checks retried before the coordinator is taken to be gone.
const CONTROL_RETRIES: u32 = 3;

pub struct Worker {
    bus: Bus,
    driver: Arc<dyn PageDriver>,
    sequencer: CommentSequencer,
    generator: Arc<dyn CommentGenerator>,
    timings: TimingsConfig,
    base_url: String,
    fallback_text: String,
}

/// Why the inner loop handed control back.
enum Step {
    Continue,
    Finish(FinishReason),
}

impl Worker {
    pub fn new(bus: Bus, driver: Arc<dyn PageDriver>, generator: Arc<dyn CommentGenerator>, config: &Config) -> Self {
        Self {
            sequencer: CommentSequencer::new(driver.clone(), config.timings.clone(), &config.site.base_url),
            bus,
            driver,
            generator,
            timings: config.timings.clone(),
            base_url: config.site.base_url.clone(),
            fallback_text: config.comment_service.fallback_text.clone(),
        }
    }

    /// Join any run already in progress, then wait for `beginRun`.
    pub async fn serve(self, mut mailbox: Mailbox) {
        self.run_if_active().await;
        while let Some(mut env) = mailbox.recv().await {
            if env.message == Message::BeginRun {
                self.run_if_active().await;
                continue;
            }
            let action = env.message.action();
            tracing::warn!(from = %env.from, action, "worker does not handle this message");
            env.respond(Reply::Rejected {
                reason: format!("unsupported action {action}"),
            });
        }
        tracing::info!("worker mailbox closed");
    }

    async fn ask(&self, message: Message) -> Result<Reply, BusError> {
        self.bus.request(Participant::Worker, Participant::Coordinator, message).await
    }

    async fn tell(&self, message: Message) -> Result<(), BusError> {
        self.bus.notify(Participant::Worker, Participant::Coordinator, message).await
    }

    /// Best-effort report; a lost message is logged and the run goes on.
    async fn report(&self, message: Message) {
        let action = message.action();
        if let Err(e) = self.tell(message).await {
            tracing::warn!(action, error = %e, "could not reach coordinator");
        }
    }

    /// Surface a recovered page error, then back off.
    async fn page_trouble(&self, what: &str, err: &anyhow::Error) {
        let detail = format!("{what}: {err:#}");
        tracing::warn!(error = %detail, "page error, backing off");
        self.report(Message::PageError { detail }).await;
        tokio::time::sleep(PAGE_ERROR_BACKOFF).await;
    }

    async fn fetch_state(&self) -> Result<WorkerState> {
        match self.ask(Message::GetState).await? {
            Reply::State(state) => Ok(*state),
            _ => Err(BusError::UnexpectedReply("getState").into()),
        }
    }

    /// Run to completion if the coordinator says a run is active. A run
    /// interrupted by a worker restart continues from the persisted count.
    pub async fn run_if_active(&self) {
        let state = match self.fetch_state().await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "could not fetch run state");
                return;
            }
        };
        if !state.phase.is_active() {
            return;
        }
        let Some(run) = state.config else {
            tracing::warn!("active run has no configuration");
            return;
        };

        tracing::info!(
            comments = state.comment_count,
            max_posts = run.max_posts,
            "worker joining run"
        );
        let (reason, detail) = match self.execute(&run, state.comment_count, state.history).await {
            Ok(reason) => (reason, None),
            Err(e) => {
                tracing::error!(error = %format!("{e:#}"), "run aborted");
                (FinishReason::Failed, Some(format!("{e:#}")))
            }
        };
        if let Err(e) = self.tell(Message::RunFinished { reason, detail }).await {
            tracing::warn!(error = %e, "could not report run finish");
        }
    }

    async fn execute(
        &self,
        run: &RunConfiguration,
        mut count: u32,
        mut history: InteractionHistory,
    ) -> Result<FinishReason> {
        let allow = if run.target_list_enabled {
            match self.resolve_targets().await {
                Ok(names) => names,
                Err(e) => {
                    tracing::warn!(error = %format!("{e:#}"), "target list resolution failed");
                    None
                }
            }
        } else {
            None
        };
        if run.target_list_enabled && allow.is_none() {
            tracing::warn!(list = run.target_list.as_deref().unwrap_or(""), "no target list available, nothing will match");
        }
        let chain = FilterChain::from_run(run, allow.as_deref());
        let pacing = Pacing::from_run(run.comment_delay_ms, run.authenticity_boost);
        let opts = SubmitOptions::from(run);

        let mut seen: HashSet<String> = HashSet::new();
        let mut idle_loads = 0u32;

        loop {
            if !self.may_continue().await? {
                return Ok(FinishReason::Stopped);
            }
            if count >= run.max_posts {
                return Ok(FinishReason::MaxPosts);
            }

            // A failed read counts against the load budget like an empty load.
            let html = match self.driver.snapshot().await {
                Ok(html) => html,
                Err(e) => {
                    idle_loads += 1;
                    if idle_loads >= run.max_load_attempts {
                        let detail = format!("feed snapshot failed: {e:#}");
                        tracing::warn!(error = %detail, "feed unreadable, giving up");
                        self.report(Message::PageError { detail }).await;
                        return Ok(FinishReason::FeedExhausted);
                    }
                    self.page_trouble("feed snapshot failed", &e).await;
                    continue;
                }
            };
            let adapter = DomAdapter::probe(&html);
            let fresh: Vec<PostRecord> = adapter
                .scan(&html)
                .into_iter()
                .filter(|r| seen.insert(r.post_id.clone()))
                .collect();

            if fresh.is_empty() {
                if self.load_more(adapter, run).await {
                    continue;
                }
                idle_loads += 1;
                tracing::info!(idle_loads, max = run.max_load_attempts, "no new posts after loading");
                if idle_loads >= run.max_load_attempts {
                    return Ok(FinishReason::FeedExhausted);
                }
                continue;
            }
            idle_loads = 0;
            tracing::debug!(fresh = fresh.len(), variant = ?adapter.variant(), "scanned feed");

            for record in fresh {
                match self
                    .process(adapter, record, run, &chain, &pacing, &opts, &mut count, &mut history)
                    .await?
                {
                    Step::Continue => {}
                    Step::Finish(reason) => return Ok(reason),
                }
            }
        }
    }

    /// One post: control check, classify, filter, generate, approve, submit.
    #[allow(clippy::too_many_arguments)]
    async fn process(
        &self,
        adapter: DomAdapter,
        record: PostRecord,
        run: &RunConfiguration,
        chain: &FilterChain,
        pacing: &Pacing,
        opts: &SubmitOptions,
        count: &mut u32,
        history: &mut InteractionHistory,
    ) -> Result<Step> {
        if !self.may_continue().await? {
            return Ok(Step::Finish(FinishReason::Stopped));
        }
        if *count >= run.max_posts {
            return Ok(Step::Finish(FinishReason::MaxPosts));
        }

        let candidate = classify(&record, adapter.variant(), &self.base_url);
        let author = candidate.author_normalized_name.clone();
        let display = candidate.author_name.clone().unwrap_or_default();
        if !author.is_empty() {
            self.report(Message::AuthorSeen { author: author.clone() }).await;
        }

        let decision = chain.evaluate(&candidate, history, Utc::now());
        let accepted = decision.accepted;
        self.report(Message::RecordDecision {
            post_id: candidate.post_id.clone(),
            author: display.clone(),
            decision,
        })
        .await;
        if !accepted {
            return Ok(Step::Continue);
        }

        let (text, used_fallback) = generate_or_fallback(
            self.generator.as_ref(),
            &candidate.caption_text,
            &run.comment_style,
            &self.fallback_text,
        )
        .await;
        tracing::debug!(post_id = %candidate.post_id, used_fallback, "comment ready");

        if run.manual_approval {
            let request = ApprovalRequest {
                request_id: 0,
                post_id: candidate.post_id.clone(),
                author: display.clone(),
                caption: candidate.caption_text.clone(),
                comment: text.clone(),
            };
            if !self.approved(request).await {
                let outcome = SubmissionOutcome::failed(&candidate.post_id, FailureStage::ApprovalDeclined);
                self.report(Message::RecordOutcome { author, outcome, error: None }).await;
                return Ok(Step::Continue);
            }
        }

        let (outcome, error) = match self.sequencer.submit(adapter, &candidate.post_id, &text, opts).await {
            Ok(outcome) => (outcome, None),
            Err(e) => {
                let detail = format!("{e:#}");
                tracing::warn!(post_id = %candidate.post_id, error = %detail, "page driver failed during submission");
                (SubmissionOutcome::aborted(&candidate.post_id), Some(detail))
            }
        };
        let succeeded = outcome.succeeded;
        self.report(Message::RecordOutcome {
            author: author.clone(),
            outcome,
            error,
        })
        .await;
        if !succeeded {
            return Ok(Step::Continue);
        }

        *count += 1;
        history.record(&candidate.post_id, &author, Utc::now());
        if *count >= run.max_posts {
            return Ok(Step::Finish(FinishReason::MaxPosts));
        }

        let delay = pacing.next_delay(&mut rand::thread_rng());
        tracing::debug!(delay_ms = delay.as_millis() as u64, "pacing before next comment");
        tokio::time::sleep(delay).await;
        Ok(Step::Continue)
    }

    /// `true` while the run is live; waits out a pause. A coordinator that
    /// stays unreachable across the retries ends the run with an error.
    async fn may_continue(&self) -> Result<bool> {
        let mut failures = 0u32;
        loop {
            match self.ask(Message::GetControl).await {
                Ok(Reply::Control { phase: Phase::Running }) => return Ok(true),
                Ok(Reply::Control { phase: Phase::Paused }) => tokio::time::sleep(PAUSE_POLL).await,
                Ok(Reply::Control { .. }) => return Ok(false),
                Ok(_) => return Err(BusError::UnexpectedReply("getControl").into()),
                Err(e) => {
                    failures += 1;
                    if failures >= CONTROL_RETRIES {
                        return Err(e).context("coordinator unreachable");
                    }
                    tracing::warn!(error = %e, failures, "control check failed, retrying");
                    tokio::time::sleep(PAUSE_POLL).await;
                }
            }
        }
    }

    async fn resolve_targets(&self) -> Result<Option<Vec<String>>> {
        match self.ask(Message::ResolveProfiles).await? {
            Reply::Profiles { names } => Ok(names),
            _ => Err(BusError::UnexpectedReply("resolveProfiles").into()),
        }
    }

    /// Silence, a dropped request and an unreachable coordinator all count
    /// as a decline.
    async fn approved(&self, request: ApprovalRequest) -> bool {
        let wait = Duration::from_secs(self.timings.approval_timeout_s) + APPROVAL_GRACE;
        let reply = self
            .bus
            .request_timeout(Participant::Worker, Participant::Coordinator, Message::RequestApproval(request), wait)
            .await;
        match reply {
            Ok(Reply::Approval { approved }) => approved,
            Ok(other) => {
                tracing::warn!(?other, "unexpected approval reply, declining");
                false
            }
            Err(e) => {
                tracing::info!(error = %e, "no approval answer, declining");
                false
            }
        }
    }

    /// `false` when nothing new arrived, including when the page errored.
    async fn load_more(&self, adapter: DomAdapter, run: &RunConfiguration) -> bool {
        match self.try_load_more(adapter, run).await {
            Ok(grew) => grew,
            Err(e) => {
                self.page_trouble("loading more posts failed", &e).await;
                false
            }
        }
    }

    /// Load-more control first, scroll as the fallback. Success is judged
    /// only by the post count growing within the bounded wait.
    async fn try_load_more(&self, adapter: DomAdapter, run: &RunConfiguration) -> Result<bool> {
        let html = self.driver.snapshot().await?;
        let before = adapter.post_ids(&html).len();
        let clicked = match adapter.control_in_doc(&html, adapter::LOAD_MORE) {
            Some(css) => self.driver.click(&css).await?,
            None => false,
        };
        if !clicked {
            self.driver.scroll_to_bottom().await?;
        }

        let spec = PollSpec::new(
            Duration::from_millis(run.scroll_delay_ms),
            self.timings.feed_growth_poll_attempts,
        );
        let driver = self.driver.as_ref();
        let grew = poll_until(spec, move || async move {
            let html = driver.snapshot().await.ok()?;
            (adapter.post_ids(&html).len() > before).then_some(())
        })
        .await
        .is_ready();
        tracing::debug!(before, clicked, grew, "load more");
        Ok(grew)
    }
}
