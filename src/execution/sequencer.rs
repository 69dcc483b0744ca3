use crate::config::{RunConfiguration, TimingsConfig};
use crate::engine::poll::{poll_until, PollOutcome, PollSpec};
use crate::execution::links::{comment_deep_link, detect_new_comment};
use crate::execution::media::load_media;
use crate::page::adapter::{self, DomAdapter};
use crate::page::PageDriver;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// The sequencer step that failed a submission.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    #[error("identity menu not found")]
    IdentityMenuNotFound,
    #[error("identity modal did not open")]
    IdentityModalTimeout,
    #[error("identity option not found")]
    IdentityOptionNotFound,
    #[error("identity save button not found")]
    IdentitySaveNotFound,
    #[error("comment composer not found")]
    ComposerNotFound,
    #[error("comment editor not found")]
    EditorNotFound,
    #[error("submit button not found")]
    SubmitNotFound,
    #[error("post disappeared before the comment was confirmed")]
    ConfirmationTimeout,
    #[error("declined by operator")]
    ApprovalDeclined,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionOutcome {
    pub post_id: String,
    pub comment_urn: Option<String>,
    pub comment_url: Option<String>,
    pub succeeded: bool,
    pub failure_stage: Option<FailureStage>,
    #[serde(default)]
    pub attachment_added: bool,
    #[serde(default)]
    pub post_liked: bool,
    #[serde(default)]
    pub comment_liked: bool,
}

impl SubmissionOutcome {
    fn bare(post_id: &str, succeeded: bool, failure_stage: Option<FailureStage>) -> Self {
        Self {
            post_id: post_id.to_string(),
            comment_urn: None,
            comment_url: None,
            succeeded,
            failure_stage,
            attachment_added: false,
            post_liked: false,
            comment_liked: false,
        }
    }

    pub fn failed(post_id: &str, stage: FailureStage) -> Self {
        Self::bare(post_id, false, Some(stage))
    }

    /// Failed outside any sequencer step, e.g. the page driver errored.
    pub fn aborted(post_id: &str) -> Self {
        Self::bare(post_id, false, None)
    }

    pub fn confirmed(post_id: &str) -> Self {
        Self::bare(post_id, true, None)
    }
}

/// Per-run choices that shape a submission.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    pub identity_profile: Option<String>,
    pub attach_image: Option<String>,
    pub like_post: bool,
    pub like_own_comment: bool,
}

impl From<&RunConfiguration> for SubmitOptions {
    fn from(run: &RunConfiguration) -> Self {
        Self {
            identity_profile: run.identity_profile.clone(),
            attach_image: run.attach_image.clone(),
            like_post: run.like_post,
            like_own_comment: run.like_own_comment,
        }
    }
}

enum Confirmation {
    Grew(BTreeSet<String>),
    Vanished,
}

/// Drives one comment through identity switch, composer, text, optional
/// attachment, submit, confirmation and optional likes.
///
/// Structural misses fail the current post via `FailureStage`; only driver
/// errors come back as `Err`.
pub struct CommentSequencer {
    driver: Arc<dyn PageDriver>,
    timings: TimingsConfig,
    base_url: String,
    http: reqwest::Client,
}

impl CommentSequencer {
    pub fn new(driver: Arc<dyn PageDriver>, timings: TimingsConfig, base_url: &str) -> Self {
        Self {
            driver,
            timings,
            base_url: base_url.to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub async fn submit(
        &self,
        adapter: DomAdapter,
        post_id: &str,
        text: &str,
        opts: &SubmitOptions,
    ) -> Result<SubmissionOutcome> {
        if let Some(profile) = opts.identity_profile.as_deref() {
            if let Err(stage) = self.switch_identity(adapter, post_id, profile).await? {
                tracing::warn!(post_id, stage = %stage, "identity switch failed");
                return Ok(SubmissionOutcome::failed(post_id, stage));
            }
        }

        // Composer
        let html = self.driver.snapshot().await?;
        let Some(button) = adapter.control_in_post(&html, post_id, adapter::COMMENT_BUTTON) else {
            return Ok(self.fail(post_id, FailureStage::ComposerNotFound));
        };
        if !self.driver.click(&button).await? {
            return Ok(self.fail(post_id, FailureStage::ComposerNotFound));
        }

        let editor = self
            .poll_snapshot(self.composer_spec(), |html| {
                adapter.control_in_post(html, post_id, adapter::EDITOR)
            })
            .await?;
        let Some(editor) = editor.ready() else {
            return Ok(self.fail(post_id, FailureStage::EditorNotFound));
        };
        if !self.driver.insert_text(&editor, text).await? {
            return Ok(self.fail(post_id, FailureStage::EditorNotFound));
        }

        let attachment_added = match opts.attach_image.as_deref() {
            Some(source) => self.attach(adapter, post_id, source).await,
            None => false,
        };

        // Submit, remembering what was there before
        let html = self.driver.snapshot().await?;
        let Some(submit) = adapter.control_in_post(&html, post_id, adapter::SUBMIT) else {
            return Ok(self.fail(post_id, FailureStage::SubmitNotFound));
        };
        let before = adapter.comment_ids(&html, post_id).unwrap_or_default();
        if !self.driver.click(&submit).await? {
            return Ok(self.fail(post_id, FailureStage::SubmitNotFound));
        }

        let confirmation = self
            .poll_snapshot(self.confirm_spec(), |html| match adapter.comment_ids(html, post_id) {
                None => Some(Confirmation::Vanished),
                Some(after) if after.len() > before.len() => Some(Confirmation::Grew(after)),
                Some(_) => None,
            })
            .await?;

        let mut outcome = SubmissionOutcome::confirmed(post_id);
        outcome.attachment_added = attachment_added;
        match confirmation {
            PollOutcome::Ready(Confirmation::Vanished) => {
                return Ok(self.fail(post_id, FailureStage::ConfirmationTimeout));
            }
            PollOutcome::Ready(Confirmation::Grew(after)) => {
                outcome.comment_urn = detect_new_comment(&before, &after);
                outcome.comment_url = outcome
                    .comment_urn
                    .as_deref()
                    .and_then(|urn| comment_deep_link(&self.base_url, urn));
            }
            PollOutcome::TimedOut => {
                tracing::info!(post_id, "no new comment rendered in time, assuming it posted");
            }
        }

        if opts.like_post {
            outcome.post_liked = self.like(adapter, post_id, None).await?;
        }
        if opts.like_own_comment {
            if let Some(urn) = outcome.comment_urn.clone() {
                outcome.comment_liked = self.like(adapter, post_id, Some(&urn)).await?;
            }
        }

        tracing::info!(
            post_id,
            comment_urn = outcome.comment_urn.as_deref().unwrap_or("-"),
            attachment = outcome.attachment_added,
            "comment submitted"
        );
        Ok(outcome)
    }

    fn fail(&self, post_id: &str, stage: FailureStage) -> SubmissionOutcome {
        tracing::warn!(post_id, stage = %stage, "submission failed");
        SubmissionOutcome::failed(post_id, stage)
    }

    /// Open the identity menu, pick `profile` by its own text, save.
    async fn switch_identity(
        &self,
        adapter: DomAdapter,
        post_id: &str,
        profile: &str,
    ) -> Result<Result<(), FailureStage>> {
        let html = self.driver.snapshot().await?;
        let Some(menu) = adapter.control_in_post(&html, post_id, adapter::IDENTITY_MENU) else {
            return Ok(Err(FailureStage::IdentityMenuNotFound));
        };
        if !self.driver.click(&menu).await? {
            return Ok(Err(FailureStage::IdentityMenuNotFound));
        }

        // Options can render after the dialog shell, so wait for both.
        let modal = self
            .poll_snapshot(self.modal_spec(), |html| {
                if adapter.modal_open(html) {
                    adapter.identity_option(html, profile)
                } else {
                    None
                }
            })
            .await?;
        let option = match modal {
            PollOutcome::Ready(option) => option,
            PollOutcome::TimedOut => {
                let html = self.driver.snapshot().await?;
                let stage = if adapter.modal_open(&html) {
                    FailureStage::IdentityOptionNotFound
                } else {
                    FailureStage::IdentityModalTimeout
                };
                return Ok(Err(stage));
            }
        };
        if !self.driver.click(&option).await? {
            return Ok(Err(FailureStage::IdentityOptionNotFound));
        }
        tokio::time::sleep(Duration::from_millis(self.timings.identity_settle_ms)).await;

        let html = self.driver.snapshot().await?;
        let Some(save) = adapter.modal_save(&html) else {
            return Ok(Err(FailureStage::IdentitySaveNotFound));
        };
        if !self.driver.click(&save).await? {
            return Ok(Err(FailureStage::IdentitySaveNotFound));
        }
        tokio::time::sleep(Duration::from_millis(self.timings.identity_close_ms)).await;
        tracing::debug!(post_id, profile, "identity switched");
        Ok(Ok(()))
    }

    /// Attach an image to the open composer. Never fails the submission.
    async fn attach(&self, adapter: DomAdapter, post_id: &str, source: &str) -> bool {
        match self.try_attach(adapter, post_id, source).await {
            Ok(true) => true,
            Ok(false) => {
                tracing::warn!(post_id, "attachment controls not found, posting without image");
                false
            }
            Err(e) => {
                tracing::warn!(post_id, error = %e, "attachment failed, posting without image");
                false
            }
        }
    }

    async fn try_attach(&self, adapter: DomAdapter, post_id: &str, source: &str) -> Result<bool> {
        let html = self.driver.snapshot().await?;
        let Some(button) = adapter.control_in_post(&html, post_id, adapter::ADD_PHOTO) else {
            return Ok(false);
        };

        // The click only needs to materialize the hidden input.
        self.driver.set_file_picker_enabled(false).await?;
        let clicked = self.driver.click(&button).await;
        self.driver.set_file_picker_enabled(true).await?;
        if !clicked? {
            return Ok(false);
        }

        let file = load_media(&self.http, source).await?;
        let input = self
            .poll_snapshot(self.composer_spec(), |html| {
                adapter.control_in_post(html, post_id, adapter::FILE_INPUT)
            })
            .await?;
        match input.ready() {
            Some(input) => self.driver.attach_file(&input, &file).await,
            None => Ok(false),
        }
    }

    /// Check-then-click a like control and verify it took.
    async fn like(&self, adapter: DomAdapter, post_id: &str, comment: Option<&str>) -> Result<bool> {
        let find = |html: &str| match comment {
            Some(urn) => adapter.control_in_comment(html, post_id, urn, adapter::LIKE_COMMENT),
            None => adapter.control_in_post(html, post_id, adapter::LIKE_POST),
        };
        let what = if comment.is_some() { "comment" } else { "post" };

        let html = self.driver.snapshot().await?;
        let Some(button) = find(&html) else {
            tracing::warn!(post_id, what, "like control not found");
            return Ok(false);
        };
        if adapter.is_pressed(&html, &button) == Some(true) {
            tracing::debug!(post_id, what, "already liked");
            return Ok(true);
        }
        if !self.driver.click(&button).await? {
            return Ok(false);
        }
        tokio::time::sleep(Duration::from_millis(self.timings.like_settle_ms)).await;

        let html = self.driver.snapshot().await?;
        let pressed = adapter.is_pressed(&html, &button) == Some(true);
        if !pressed {
            tracing::warn!(post_id, what, "like did not register");
        }
        Ok(pressed)
    }

    /// Poll fresh snapshots through a synchronous probe. Driver errors end
    /// the poll early.
    async fn poll_snapshot<T, F>(&self, spec: PollSpec, probe: F) -> Result<PollOutcome<T>>
    where
        T: Send,
        F: Fn(&str) -> Option<T> + Sync,
    {
        let driver = self.driver.as_ref();
        let probe = &probe;
        let outcome = poll_until(spec, move || async move {
            match driver.snapshot().await {
                Ok(html) => probe(&html).map(Ok),
                Err(e) => Some(Err(e)),
            }
        })
        .await;
        match outcome {
            PollOutcome::Ready(Ok(v)) => Ok(PollOutcome::Ready(v)),
            PollOutcome::Ready(Err(e)) => Err(e),
            PollOutcome::TimedOut => Ok(PollOutcome::TimedOut),
        }
    }

    fn modal_spec(&self) -> PollSpec {
        PollSpec::new(
            Duration::from_millis(self.timings.modal_poll_ms),
            self.timings.modal_poll_attempts,
        )
    }

    fn composer_spec(&self) -> PollSpec {
        PollSpec::new(
            Duration::from_millis(self.timings.composer_poll_ms),
            self.timings.composer_poll_attempts,
        )
    }

    fn confirm_spec(&self) -> PollSpec {
        PollSpec::new(
            Duration::from_millis(self.timings.confirm_poll_ms),
            self.timings.confirm_poll_attempts,
        )
    }
}
