//! TFVC domain model: changesets, changes, items, labels.

bitflags::bitflags! {
    /// Flag set describing what happened to an item in a changeset.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct ChangeTypes: u32 {
        const ADD = 1 << 0;
        const EDIT = 1 << 1;
        const ENCODING = 1 << 2;
        const RENAME = 1 << 3;
        const DELETE = 1 << 4;
        const UNDELETE = 1 << 5;
        const BRANCH = 1 << 6;
        const MERGE = 1 << 7;
        const LOCK = 1 << 8;
        const ROLLBACK = 1 << 9;
        const SOURCE_RENAME = 1 << 10;
        const TARGET_RENAME = 1 << 11;
        const PROPERTY = 1 << 12;
    }
}

impl ChangeTypes {
    /// Parses the comma-separated flag list the TFVC REST API sends
    /// (e.g. `"rename, edit"`). Unknown tokens are ignored with a warning;
    /// they do not carry topology.
    pub fn parse_list(raw: &str) -> Self {
        let mut flags = Self::empty();
        for token in raw.split(',') {
            let token = token.trim();
            match token.to_ascii_lowercase().as_str() {
                "" | "none" => {}
                "add" => flags |= Self::ADD,
                "edit" => flags |= Self::EDIT,
                "encoding" => flags |= Self::ENCODING,
                "rename" => flags |= Self::RENAME,
                "delete" => flags |= Self::DELETE,
                "undelete" => flags |= Self::UNDELETE,
                "branch" => flags |= Self::BRANCH,
                "merge" => flags |= Self::MERGE,
                "lock" => flags |= Self::LOCK,
                "rollback" => flags |= Self::ROLLBACK,
                "sourcerename" => flags |= Self::SOURCE_RENAME,
                "targetrename" => flags |= Self::TARGET_RENAME,
                "property" | "properties" => flags |= Self::PROPERTY,
                other => {
                    tracing::warn!("ignoring unknown change type token {other:?}");
                }
            }
        }
        flags
    }
}

#[derive(Clone, Debug)]
pub struct ChangesetMeta {
    pub changeset_id: u32,
    pub author: String,
    pub checked_in_by: Option<String>,
    pub created_date: chrono::DateTime<chrono::Utc>,
    pub comment: Option<String>,
}

/// A versioned item, as listed by a changeset's change entries or a full
/// listing. `changeset_version` is the changeset that last changed it.
#[derive(Clone, Debug)]
pub struct Item {
    pub path: String,
    pub changeset_version: u32,
    pub is_folder: bool,
    pub is_branch: bool,
    pub is_symbolic_link: bool,
    pub size: u64,
    /// Server-side content hash, used as the blob-cache key. Compared
    /// verbatim, never decoded.
    pub hash: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Change {
    pub item: Item,
    pub change_type: ChangeTypes,
    /// For renames, the path the item had before this changeset.
    pub source_server_item: Option<String>,
    pub merge_sources: Vec<MergeSource>,
}

#[derive(Clone, Debug)]
pub struct MergeSource {
    pub server_item: String,
    pub version_to: u32,
    pub is_rename: bool,
}

#[derive(Clone, Debug)]
pub struct Label {
    pub id: u64,
    pub name: String,
    pub owner: Option<String>,
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::ChangeTypes;

    #[test]
    fn parses_flag_lists() {
        assert_eq!(ChangeTypes::parse_list("add"), ChangeTypes::ADD);
        assert_eq!(
            ChangeTypes::parse_list("rename, edit"),
            ChangeTypes::RENAME | ChangeTypes::EDIT,
        );
        assert_eq!(
            ChangeTypes::parse_list("branch, merge"),
            ChangeTypes::BRANCH | ChangeTypes::MERGE,
        );
        assert_eq!(
            ChangeTypes::parse_list("sourceRename, delete"),
            ChangeTypes::SOURCE_RENAME | ChangeTypes::DELETE,
        );
        assert_eq!(ChangeTypes::parse_list("none"), ChangeTypes::empty());
        assert_eq!(ChangeTypes::parse_list("whatever"), ChangeTypes::empty());
    }
}
