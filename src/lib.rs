pub mod bus;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod execution;
pub mod generator;
pub mod page;
pub mod pipeline;
pub mod profiles;
pub mod store;
pub mod tui;
