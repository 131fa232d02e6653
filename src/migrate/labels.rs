//! Replays TFVC labels as annotated tags.

use super::planner::CommitPlanner;
use crate::authors::AuthorsMap;
use crate::git;
use crate::git::store::{Store, StoreError};
use crate::tfvc::{ChangesetMeta, Label};
use crate::{FHashMap, FHashSet};

#[derive(Debug)]
pub enum TagError {
    Store(StoreError),
    UnmappedOwner { name: String },
}

impl From<StoreError> for TagError {
    fn from(error: StoreError) -> Self {
        Self::Store(error)
    }
}

impl std::fmt::Display for TagError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::Store(ref error) => error.fmt(f),
            Self::UnmappedOwner { ref name } => {
                write!(f, "label owner {name:?} is not in the authors file")
            }
        }
    }
}

impl TagError {
    pub fn category(&self) -> crate::errors::MigrateError {
        match self {
            Self::Store(_) => crate::errors::MigrateError::Io,
            Self::UnmappedOwner { .. } => crate::errors::MigrateError::Configuration,
        }
    }
}

/// Creates one annotated tag per label, attached to the commit of the
/// label's highest item changeset. When several branches received commits
/// at that changeset, one tag per branch is created with a branch-leaf
/// suffix.
pub fn create_tags(
    store: &mut Store,
    planner: &CommitPlanner,
    authors: &AuthorsMap,
    labels: &[(Label, Option<u32>)],
    metas_by_id: &FHashMap<u32, ChangesetMeta>,
) -> Result<usize, TagError> {
    let mut used_tag_names = FHashSet::default();
    let mut tags_created = 0;

    for (label, labelled_changeset) in labels {
        let Some(changeset) = *labelled_changeset else {
            tracing::warn!("label \"{}\" has no items, skipping", label.name);
            continue;
        };
        let Some(entries) = planner.commits_at(changeset) else {
            tracing::warn!(
                "label \"{}\" points at CS{changeset}, which is outside the migrated range",
                label.name,
            );
            continue;
        };

        let created: Vec<_> = entries.iter().filter(|entry| entry.created).collect();
        // when no branch committed at the labelled changeset, the first
        // recorded tip (the trunk, unless it is gone) stands in
        let targets: Vec<_> = if created.is_empty() {
            entries.iter().take(1).collect()
        } else {
            created
        };

        let tagger = match label.owner {
            Some(ref owner) => {
                let author =
                    authors
                        .get(owner)
                        .ok_or_else(|| TagError::UnmappedOwner {
                            name: owner.clone(),
                        })?;
                Some(gix_actor::Signature {
                    name: author.name.as_str().into(),
                    email: author.email.as_str().into(),
                    time: gix_date::Time {
                        seconds: metas_by_id
                            .get(&changeset)
                            .map_or(0, |meta| meta.created_date.timestamp()),
                        offset: 0,
                        sign: gix_date::time::Sign::Plus,
                    },
                })
            }
            None => None,
        };

        let base_name = git::legalize_ref_name(&label.name);
        for entry in targets {
            let mut tag_name = if entries.iter().filter(|e| e.created).count() > 1 {
                format!(
                    "{base_name}-{}",
                    git::legalize_ref_name(entry.branch.leaf()),
                )
            } else {
                base_name.clone()
            };
            let mut tries = 0;
            while !used_tag_names.insert(tag_name.clone()) {
                tries += 1;
                tag_name = format!("{base_name}_{tries}");
            }

            let tag_oid = store.put(gix_object::Tag {
                target: entry.commit,
                target_kind: gix_object::Kind::Commit,
                name: tag_name.as_str().into(),
                tagger: tagger.clone(),
                message: label.description.clone().unwrap_or_default().into(),
                pgp_signature: None,
            })?;
            store.set_ref(&format!("refs/tags/{tag_name}"), tag_oid)?;
            tags_created += 1;

            tracing::debug!(
                "created tag \"{tag_name}\" for label \"{}\" at CS{changeset}",
                label.name,
            );
        }
    }

    Ok(tags_created)
}
