use std::collections::{BTreeMap, BTreeSet};

#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Test {
    #[serde(rename = "root-path")]
    pub(crate) root_path: String,
    #[serde(rename = "trunk-name", default = "default_trunk_name")]
    pub(crate) trunk_name: String,
    pub(crate) authors: String,
    #[serde(rename = "min-changeset")]
    pub(crate) min_changeset: Option<u32>,
    #[serde(rename = "max-changeset")]
    pub(crate) max_changeset: Option<u32>,
    #[serde(rename = "root-path-changes", default = "Vec::new")]
    pub(crate) root_path_changes: Vec<RootChange>,
    pub(crate) changesets: Vec<Changeset>,
    #[serde(default = "Vec::new")]
    pub(crate) labels: Vec<TestLabel>,
    #[serde(default = "false_")]
    pub(crate) failed: bool,
    pub(crate) expected: Option<Expected>,
}

#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RootChange {
    pub(crate) changeset: u32,
    pub(crate) path: String,
}

#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Changeset {
    pub(crate) id: u32,
    pub(crate) author: String,
    #[serde(rename = "checked-in-by")]
    pub(crate) checked_in_by: Option<String>,
    pub(crate) date: Option<String>,
    pub(crate) comment: Option<String>,
    #[serde(default = "Vec::new")]
    pub(crate) changes: Vec<TestChange>,
    /// Full listing after this changeset; omitted means unchanged from the
    /// previous changeset.
    pub(crate) items: Option<Vec<TestItem>>,
}

#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct TestChange {
    pub(crate) path: String,
    #[serde(rename = "type")]
    pub(crate) change_type: String,
    pub(crate) source: Option<String>,
    #[serde(rename = "merge-sources", default = "Vec::new")]
    pub(crate) merge_sources: Vec<TestMergeSource>,
}

#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct TestMergeSource {
    pub(crate) item: String,
    #[serde(rename = "version-to")]
    pub(crate) version_to: u32,
    #[serde(default = "false_")]
    pub(crate) rename: bool,
}

#[derive(Clone, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct TestItem {
    pub(crate) path: String,
    #[serde(default = "item_kind_file")]
    pub(crate) kind: ItemKind,
    pub(crate) content: Option<String>,
    /// Changeset that last changed the item; defaults to the listing's
    /// changeset.
    pub(crate) version: Option<u32>,
}

#[derive(Copy, Clone, PartialEq, Eq, serde::Deserialize)]
pub(crate) enum ItemKind {
    #[serde(rename = "file")]
    File,
    #[serde(rename = "dir")]
    Dir,
    #[serde(rename = "symlink")]
    Symlink,
}

#[inline(always)]
fn item_kind_file() -> ItemKind {
    ItemKind::File
}

#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct TestLabel {
    pub(crate) name: String,
    pub(crate) owner: Option<String>,
    pub(crate) description: Option<String>,
    #[serde(rename = "labelled-changeset")]
    pub(crate) labelled_changeset: Option<u32>,
}

#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Expected {
    pub(crate) refs: Option<BTreeSet<String>>,
    #[serde(default = "Vec::new")]
    pub(crate) revs: Vec<ExpectedRev>,
    #[serde(default = "Vec::new")]
    pub(crate) tags: Vec<ExpectedTag>,
}

#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ExpectedRev {
    pub(crate) rev: String,
    /// `Display Name <email>`
    pub(crate) author: Option<String>,
    pub(crate) committer: Option<String>,
    pub(crate) message: Option<String>,
    pub(crate) parents: Option<Vec<String>>,
    /// Exact file contents of the commit tree, keyed by repository path.
    pub(crate) tree: Option<BTreeMap<String, String>>,
}

#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ExpectedTag {
    pub(crate) tag: String,
    pub(crate) target: String,
    pub(crate) tagger: Option<String>,
    pub(crate) message: Option<String>,
}

#[inline(always)]
fn false_() -> bool {
    false
}

fn default_trunk_name() -> String {
    "main".into()
}
