pub mod adapter;
pub mod dom;
pub mod simulated;
pub mod time_parse;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use adapter::{DomAdapter, PostRecord};

/// Which generation of the host page's markup is loaded. Chosen by probing
/// the document, never by a version string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomVariant {
    Legacy,
    #[default]
    Current,
}

/// An image ready to be handed to a file input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// Bridge to a live page. Reads go through `snapshot`; actions address
/// elements by CSS selector and report `false` when nothing matched.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Serialized HTML of the current document.
    async fn snapshot(&self) -> Result<String>;

    async fn click(&self, selector: &str) -> Result<bool>;

    /// Paste text into a contenteditable or input.
    async fn insert_text(&self, selector: &str, text: &str) -> Result<bool>;

    async fn scroll_to_bottom(&self) -> Result<()>;

    /// Turn the native file-picker trigger off/on so clicking an upload
    /// button materializes the input without opening an OS dialog.
    async fn set_file_picker_enabled(&self, enabled: bool) -> Result<()>;

    /// Assign `file` to the matched file input and dispatch `change`.
    async fn attach_file(&self, selector: &str, file: &MediaFile) -> Result<bool>;
}
