pub mod links;
pub mod media;
pub mod sequencer;

pub use sequencer::{CommentSequencer, FailureStage, SubmissionOutcome, SubmitOptions};
