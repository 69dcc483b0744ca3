pub mod lists;
pub mod lookup_cache;
pub mod state_store;

pub use lists::{JsonListStore, ListRecord};
pub use lookup_cache::{LookupCache, SharedCache};
pub use state_store::{PersistedState, StateStore};
