pub mod batch;
pub mod classifier;
pub mod filters;
pub mod history;
pub mod names;
pub mod pacing;
pub mod poll;

pub use classifier::{classify, PostCandidate};
pub use filters::{FilterChain, FilterDecision, FilterName};
pub use history::InteractionHistory;
pub use poll::{poll_until, PollOutcome, PollSpec};
