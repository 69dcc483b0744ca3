//! Typed message routing between the coordinator, the page worker and the
//! operator UI. Participants share nothing but this router.
//!
//! A request carries a [`Responder`]; answering consumes it, so a handler
//! can reply at most once, and a handler that drops it unanswered surfaces
//! as [`BusError::NoResponse`] on the requesting side. Handlers that need
//! to wait on something move the responder into a spawned task.

use crate::config::RunConfiguration;
use crate::coordinator::state::{FinishReason, Phase};
use crate::engine::{FilterDecision, InteractionHistory};
use crate::execution::SubmissionOutcome;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

const MAILBOX_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Participant {
    Coordinator,
    Worker,
    Ui,
}

impl fmt::Display for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Participant::Coordinator => "coordinator",
            Participant::Worker => "worker",
            Participant::Ui => "ui",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub phase: Phase,
    pub comment_count: u32,
    pub max_posts: u32,
    pub status: String,
    pub authors_found: usize,
    pub authors_missing: usize,
    pub authors_pending: usize,
    pub authors_commented: usize,
    pub skipped: u32,
    pub failed: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    /// Assigned by the coordinator when the request is forwarded.
    #[serde(default)]
    pub request_id: u64,
    pub post_id: String,
    pub author: String,
    pub caption: String,
    pub comment: String,
}

/// What the worker needs to (re)join a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerState {
    pub phase: Phase,
    pub config: Option<RunConfiguration>,
    pub comment_count: u32,
    pub history: InteractionHistory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Message {
    // operator UI -> coordinator
    Start { config: RunConfiguration },
    Stop,
    Pause,
    Resume,
    Reset,
    ApprovalAnswer { request_id: u64, approved: bool },

    // worker -> coordinator
    GetState,
    GetControl,
    ResolveProfiles,
    RequestApproval(ApprovalRequest),
    AuthorSeen { author: String },
    RecordDecision { post_id: String, author: String, decision: FilterDecision },
    /// `author` is the normalized name; `error` carries a driver failure
    /// that has no sequencer stage.
    RecordOutcome {
        author: String,
        outcome: SubmissionOutcome,
        #[serde(default)]
        error: Option<String>,
    },
    RunFinished { reason: FinishReason, detail: Option<String> },
    /// A page or bus hiccup the worker recovered from.
    PageError { detail: String },

    // coordinator -> itself, from deferred tasks
    ProfilesResolved { names: Vec<String>, missing: Vec<String> },

    // coordinator -> worker
    BeginRun,

    // coordinator -> UI
    StatusUpdate(StatusUpdate),
    RealTimeCountUpdate { today_count: u64, all_time_count: u64 },
    ApprovalPrompt(ApprovalRequest),
    ApprovalClosed { request_id: u64 },
}

impl Message {
    pub fn action(&self) -> &'static str {
        match self {
            Message::Start { .. } => "start",
            Message::Stop => "stop",
            Message::Pause => "pause",
            Message::Resume => "resume",
            Message::Reset => "reset",
            Message::ApprovalAnswer { .. } => "approvalAnswer",
            Message::GetState => "getState",
            Message::GetControl => "getControl",
            Message::ResolveProfiles => "resolveProfiles",
            Message::RequestApproval(_) => "requestApproval",
            Message::AuthorSeen { .. } => "authorSeen",
            Message::RecordDecision { .. } => "recordDecision",
            Message::RecordOutcome { .. } => "recordOutcome",
            Message::RunFinished { .. } => "runFinished",
            Message::PageError { .. } => "pageError",
            Message::ProfilesResolved { .. } => "profilesResolved",
            Message::BeginRun => "beginRun",
            Message::StatusUpdate(_) => "statusUpdate",
            Message::RealTimeCountUpdate { .. } => "realTimeCountUpdate",
            Message::ApprovalPrompt(_) => "approvalPrompt",
            Message::ApprovalClosed { .. } => "approvalClosed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Reply {
    Ack,
    Rejected { reason: String },
    State(Box<WorkerState>),
    Control { phase: Phase },
    /// `None` when no usable list exists.
    Profiles { names: Option<Vec<String>> },
    Approval { approved: bool },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("{0} is not attached to the bus")]
    NotAttached(Participant),
    #[error("{0} mailbox is closed")]
    Closed(Participant),
    #[error("{0} mailbox is full")]
    Full(Participant),
    #[error("{0} dropped the request without answering")]
    NoResponse(Participant),
    #[error("{0} did not answer in time")]
    Timeout(Participant),
    #[error("unexpected reply to {0}")]
    UnexpectedReply(&'static str),
}

/// One-shot reply handle. Consumed by [`Responder::respond`].
#[derive(Debug)]
pub struct Responder {
    tx: oneshot::Sender<Reply>,
    action: &'static str,
}

impl Responder {
    pub fn new(tx: oneshot::Sender<Reply>, action: &'static str) -> Self {
        Self { tx, action }
    }

    pub fn respond(self, reply: Reply) {
        if self.tx.send(reply).is_err() {
            tracing::debug!(action = self.action, "requester went away before the reply");
        }
    }
}

#[derive(Debug)]
pub struct Envelope {
    pub from: Participant,
    pub message: Message,
    pub reply: Option<Responder>,
}

impl Envelope {
    /// Answer if this was a request; no-op for notifications.
    pub fn respond(&mut self, reply: Reply) {
        if let Some(responder) = self.reply.take() {
            responder.respond(reply);
        }
    }
}

pub type Mailbox = mpsc::Receiver<Envelope>;

/// Whether a handler answered inline or handed its responder to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    Done,
    Deferred,
}

#[derive(Clone, Default)]
pub struct Bus {
    routes: Arc<RwLock<HashMap<Participant, mpsc::Sender<Envelope>>>>,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `who` and return its mailbox. Re-attaching replaces the
    /// previous route, which is how a restarted worker rejoins.
    pub fn attach(&self, who: Participant) -> Mailbox {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        match self.routes.write() {
            Ok(mut routes) => {
                routes.insert(who, tx);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(who, tx);
            }
        }
        tracing::debug!(participant = %who, "attached to bus");
        rx
    }

    fn route(&self, to: Participant) -> Result<mpsc::Sender<Envelope>, BusError> {
        let routes = match self.routes.read() {
            Ok(r) => r,
            Err(poisoned) => poisoned.into_inner(),
        };
        routes.get(&to).cloned().ok_or(BusError::NotAttached(to))
    }

    pub async fn request(&self, from: Participant, to: Participant, message: Message) -> Result<Reply, BusError> {
        let sender = self.route(to)?;
        let (tx, rx) = oneshot::channel();
        let action = message.action();
        let envelope = Envelope {
            from,
            message,
            reply: Some(Responder::new(tx, action)),
        };
        sender.send(envelope).await.map_err(|_| BusError::Closed(to))?;
        rx.await.map_err(|_| BusError::NoResponse(to))
    }

    pub async fn request_timeout(
        &self,
        from: Participant,
        to: Participant,
        message: Message,
        timeout: Duration,
    ) -> Result<Reply, BusError> {
        tokio::time::timeout(timeout, self.request(from, to, message))
            .await
            .map_err(|_| BusError::Timeout(to))?
    }

    /// Fire-and-forget, waiting for mailbox space.
    pub async fn notify(&self, from: Participant, to: Participant, message: Message) -> Result<(), BusError> {
        let sender = self.route(to)?;
        sender
            .send(Envelope { from, message, reply: None })
            .await
            .map_err(|_| BusError::Closed(to))
    }

    /// Fire-and-forget without waiting; drops the message when the mailbox
    /// is full. Used for UI pushes, which are superseded by the next one.
    pub fn emit(&self, from: Participant, to: Participant, message: Message) -> Result<(), BusError> {
        let sender = self.route(to)?;
        sender
            .try_send(Envelope { from, message, reply: None })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => BusError::Full(to),
                mpsc::error::TrySendError::Closed(_) => BusError::Closed(to),
            })
    }
}
