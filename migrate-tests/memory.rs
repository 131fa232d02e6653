//! In-memory history source assembled from a test definition.

use std::collections::HashMap;
use std::hash::{Hash as _, Hasher as _};

use tfvc2git::paths;
use tfvc2git::tfvc::{
    Change, ChangesetMeta, ChangeTypes, HistorySource, Item, Label, MergeSource, SourceError,
};

use crate::defs;

pub(crate) struct MemoryHistory {
    changesets: Vec<(ChangesetMeta, Vec<Change>)>,
    listings: HashMap<u32, Vec<Item>>,
    contents: HashMap<(String, u32), Vec<u8>>,
    labels: Vec<(Label, Option<u32>)>,
}

impl MemoryHistory {
    pub(crate) fn from_defs(test: &defs::Test) -> Result<Self, String> {
        let mut changesets = Vec::new();
        let mut listings = HashMap::new();
        let mut contents = HashMap::new();
        let mut previous_listing: Vec<Item> = Vec::new();

        for changeset in test.changesets.iter() {
            let created_date = match changeset.date {
                Some(ref date) => chrono::DateTime::parse_from_rfc3339(date)
                    .map_err(|e| format!("bad date for CS{}: {e}", changeset.id))?
                    .with_timezone(&chrono::Utc),
                // one minute per changeset past a fixed epoch
                None => chrono::DateTime::from_timestamp(
                    1_577_836_800 + i64::from(changeset.id) * 60,
                    0,
                )
                .unwrap(),
            };

            let meta = ChangesetMeta {
                changeset_id: changeset.id,
                author: changeset.author.clone(),
                checked_in_by: changeset.checked_in_by.clone(),
                created_date,
                comment: changeset.comment.clone(),
            };

            let changes = changeset
                .changes
                .iter()
                .map(|change| Change {
                    item: Item {
                        path: change.path.clone(),
                        changeset_version: changeset.id,
                        is_folder: false,
                        is_branch: false,
                        is_symbolic_link: false,
                        size: 0,
                        hash: None,
                    },
                    change_type: ChangeTypes::parse_list(&change.change_type),
                    source_server_item: change.source.clone(),
                    merge_sources: change
                        .merge_sources
                        .iter()
                        .map(|source| MergeSource {
                            server_item: source.item.clone(),
                            version_to: source.version_to,
                            is_rename: source.rename,
                        })
                        .collect(),
                })
                .collect();

            let listing = match changeset.items {
                Some(ref items) => {
                    let mut listing = Vec::with_capacity(items.len());
                    for item in items {
                        let version = item.version.unwrap_or(changeset.id);
                        let content = item.content.as_deref().unwrap_or("").as_bytes();
                        if item.kind == defs::ItemKind::File {
                            contents.insert(
                                (item.path.to_ascii_lowercase(), version),
                                content.to_vec(),
                            );
                        }
                        listing.push(Item {
                            path: item.path.clone(),
                            changeset_version: version,
                            is_folder: item.kind == defs::ItemKind::Dir,
                            is_branch: false,
                            is_symbolic_link: item.kind == defs::ItemKind::Symlink,
                            size: content.len() as u64,
                            hash: Some(content_hash(content)),
                        });
                    }
                    listing
                }
                None => previous_listing.clone(),
            };
            listings.insert(changeset.id, listing.clone());
            previous_listing = listing;

            changesets.push((meta, changes));
        }

        let labels = test
            .labels
            .iter()
            .enumerate()
            .map(|(i, label)| {
                (
                    Label {
                        id: i as u64 + 1,
                        name: label.name.clone(),
                        owner: label.owner.clone(),
                        description: label.description.clone(),
                    },
                    label.labelled_changeset,
                )
            })
            .collect();

        Ok(Self {
            changesets,
            listings,
            contents,
            labels,
        })
    }
}

fn content_hash(content: &[u8]) -> String {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    content.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[async_trait::async_trait]
impl HistorySource for MemoryHistory {
    async fn list_changesets(
        &self,
        _root_path: &str,
        min: Option<u32>,
        max: Option<u32>,
    ) -> Result<Vec<ChangesetMeta>, SourceError> {
        Ok(self
            .changesets
            .iter()
            .map(|(meta, _)| meta.clone())
            .filter(|meta| min.is_none_or(|min| meta.changeset_id >= min))
            .filter(|meta| max.is_none_or(|max| meta.changeset_id <= max))
            .collect())
    }

    async fn list_changeset_changes(
        &self,
        changeset_id: u32,
    ) -> Result<Vec<Change>, SourceError> {
        self.changesets
            .iter()
            .find(|(meta, _)| meta.changeset_id == changeset_id)
            .map(|(_, changes)| changes.clone())
            .ok_or_else(|| SourceError::new(format!("unknown changeset CS{changeset_id}")))
    }

    async fn list_items(
        &self,
        scope_paths: &[String],
        changeset: u32,
    ) -> Result<Vec<Item>, SourceError> {
        let listing = self
            .listings
            .get(&changeset)
            .ok_or_else(|| SourceError::new(format!("no listing at CS{changeset}")))?;
        Ok(listing
            .iter()
            .filter(|item| {
                scope_paths
                    .iter()
                    .any(|scope| paths::is_or_contains(scope, &item.path))
            })
            .cloned()
            .collect())
    }

    async fn fetch_content(
        &self,
        path: &str,
        changeset: u32,
    ) -> Result<Vec<u8>, SourceError> {
        self.contents
            .get(&(path.to_ascii_lowercase(), changeset))
            .cloned()
            .ok_or_else(|| {
                SourceError::new(format!("no content for \"{path}\" at CS{changeset}"))
            })
    }

    async fn list_labels(&self, _root_path: &str) -> Result<Vec<Label>, SourceError> {
        Ok(self.labels.iter().map(|(label, _)| label.clone()).collect())
    }

    async fn label_items(&self, label: &Label) -> Result<Option<u32>, SourceError> {
        self.labels
            .iter()
            .find(|(known, _)| known.id == label.id)
            .map(|&(_, labelled_changeset)| labelled_changeset)
            .ok_or_else(|| SourceError::new(format!("unknown label \"{}\"", label.name)))
    }
}
