//! History source seam: everything the migrator knows about TFVC comes
//! through [`HistorySource`].

pub mod client;
mod types;

pub use types::{Change, ChangesetMeta, ChangeTypes, Item, Label, MergeSource};

/// Failure talking to the history source, surfaced after the adapter's own
/// retry policy is exhausted.
#[derive(Debug)]
pub struct SourceError {
    message: String,
}

impl SourceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for SourceError {}

/// Read-only view of a TFVC repository's history.
///
/// Changesets are enumerated in ascending id order. Implementations handle
/// their own transport retries; an error from any method is final.
#[async_trait::async_trait]
pub trait HistorySource: Send + Sync {
    async fn list_changesets(
        &self,
        root_path: &str,
        min: Option<u32>,
        max: Option<u32>,
    ) -> Result<Vec<ChangesetMeta>, SourceError>;

    async fn list_changeset_changes(
        &self,
        changeset_id: u32,
    ) -> Result<Vec<Change>, SourceError>;

    /// Fully recursive listing of `scope_paths` (pre-unioned,
    /// non-overlapping) at `changeset`.
    async fn list_items(
        &self,
        scope_paths: &[String],
        changeset: u32,
    ) -> Result<Vec<Item>, SourceError>;

    async fn fetch_content(
        &self,
        path: &str,
        changeset: u32,
    ) -> Result<Vec<u8>, SourceError>;

    async fn list_labels(&self, root_path: &str) -> Result<Vec<Label>, SourceError>;

    /// The highest changeset among the label's items, if it has any.
    async fn label_items(&self, label: &Label) -> Result<Option<u32>, SourceError>;
}
