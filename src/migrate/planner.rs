//! Replays mapping states as commits: trees, parents, refs and the
//! per-changeset commit index.

use gix_hash::ObjectId;

use super::analyzer::TopologicalOperation;
use super::blobs::{self, BlobCache};
use super::identity::BranchIdentity;
use super::state::{AdditionalParent, MappingState};
use crate::authors::AuthorsMap;
use crate::git;
use crate::git::store::{Store, StoreError};
use crate::paths::{self, PathKey};
use crate::tfvc::{ChangesetMeta, Item};
use crate::{FHashMap, FHashSet};

#[derive(Debug)]
pub enum PlanError {
    Store(StoreError),
    SymbolicLink {
        path: String,
    },
    DuplicateGitPath {
        branch: BranchIdentity,
        git_path: String,
    },
    MissingParent {
        parent_changeset: u32,
        parent_branch: BranchIdentity,
    },
    MissingBlob {
        path: String,
    },
    UnmappedIdentity {
        name: String,
    },
}

impl From<StoreError> for PlanError {
    fn from(error: StoreError) -> Self {
        Self::Store(error)
    }
}

impl std::fmt::Display for PlanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::Store(ref error) => error.fmt(f),
            Self::SymbolicLink { ref path } => {
                write!(f, "symbolic link \"{path}\" is not supported")
            }
            Self::DuplicateGitPath {
                ref branch,
                ref git_path,
            } => {
                write!(
                    f,
                    "two items of branch {branch} map to the same git path \"{git_path}\"",
                )
            }
            Self::MissingParent {
                parent_changeset,
                ref parent_branch,
            } => {
                write!(
                    f,
                    "commit index has no entry for {parent_branch} at CS{parent_changeset}",
                )
            }
            Self::MissingBlob { ref path } => {
                write!(f, "no blob was materialized for \"{path}\"")
            }
            Self::UnmappedIdentity { ref name } => {
                write!(f, "identity {name:?} is not in the authors file")
            }
        }
    }
}

impl PlanError {
    pub fn category(&self) -> crate::errors::MigrateError {
        match self {
            Self::Store(_) => crate::errors::MigrateError::Io,
            Self::SymbolicLink { .. } => crate::errors::MigrateError::NotImplemented,
            Self::DuplicateGitPath { .. }
            | Self::MissingParent { .. }
            | Self::MissingBlob { .. } => crate::errors::MigrateError::Invariant,
            Self::UnmappedIdentity { .. } => crate::errors::MigrateError::Configuration,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CommitIndexEntry {
    pub commit: ObjectId,
    pub branch: BranchIdentity,
    pub created: bool,
}

#[derive(Clone)]
struct BranchHead {
    commit: ObjectId,
    tree: ObjectId,
}

/// The files one branch sees at a changeset, as `(git_path, item)` pairs.
pub struct BranchFiles {
    pub branch: BranchIdentity,
    pub files: Vec<(String, Item)>,
}

pub struct CommitPlanner {
    trunk_name: String,
    authors: AuthorsMap,
    heads: FHashMap<BranchIdentity, BranchHead>,
    ref_names: FHashMap<BranchIdentity, String>,
    used_ref_names: FHashSet<String>,
    commit_index: FHashMap<u32, Vec<CommitIndexEntry>>,
}

impl CommitPlanner {
    pub fn new(trunk_name: &str, authors: AuthorsMap) -> Self {
        Self {
            trunk_name: trunk_name.to_owned(),
            authors,
            heads: FHashMap::default(),
            ref_names: FHashMap::default(),
            used_ref_names: FHashSet::default(),
            commit_index: FHashMap::default(),
        }
    }

    /// Moves refs for deletes and renames before any commit of the
    /// changeset is planned.
    pub fn apply_ref_ops(
        &mut self,
        store: &mut Store,
        state: &MappingState,
    ) -> Result<(), PlanError> {
        for op in &state.ops {
            match op {
                TopologicalOperation::Delete { branch, .. } => {
                    self.heads.remove(branch);
                    if let Some(ref_name) = self.ref_names.remove(branch) {
                        tracing::info!("removing ref {ref_name} of deleted branch {branch}");
                        self.used_ref_names.remove(&ref_name);
                        store.remove_ref(&ref_name)?;
                    }
                }
                TopologicalOperation::Rename {
                    old_identity,
                    new_identity,
                } => {
                    if let Some(head) = self.heads.remove(old_identity) {
                        self.heads.insert(new_identity.clone(), head);
                    }
                    // the branch keeps its ref across a path rename
                    if let Some(ref_name) = self.ref_names.remove(old_identity) {
                        self.ref_names.insert(new_identity.clone(), ref_name);
                    }
                }
                TopologicalOperation::Branch { .. } | TopologicalOperation::Merge { .. } => {}
            }
        }
        Ok(())
    }

    /// Projects the full item listing into per-branch file sets, in the
    /// state's dependency order.
    pub fn map_items(
        &self,
        state: &MappingState,
        items: &[Item],
    ) -> Result<Vec<BranchFiles>, PlanError> {
        let mut assignments = Vec::with_capacity(state.branch_mappings_in_dep_order.len());

        for (branch, mapping) in &state.branch_mappings_in_dep_order {
            // subtrees owned by branches nested under this one
            let nested_roots: Vec<&str> = state
                .branch_mappings_in_dep_order
                .iter()
                .filter(|(other, other_mapping)| {
                    other != branch
                        && paths::contains(
                            mapping.root_directory(),
                            other_mapping.root_directory(),
                        )
                })
                .map(|(_, other_mapping)| other_mapping.root_directory())
                .collect();

            let mut files = Vec::new();
            let mut seen_git_paths = FHashSet::default();
            for item in items {
                if item.is_folder || item.is_branch {
                    continue;
                }
                if nested_roots
                    .iter()
                    .any(|root| paths::is_or_contains(root, &item.path))
                {
                    continue;
                }
                let Some(git_path) = mapping.git_path(&item.path) else {
                    continue;
                };
                if git_path.is_empty() {
                    continue;
                }
                if item.is_symbolic_link {
                    return Err(PlanError::SymbolicLink {
                        path: item.path.clone(),
                    });
                }
                if !seen_git_paths.insert(PathKey::new(&git_path)) {
                    return Err(PlanError::DuplicateGitPath {
                        branch: branch.clone(),
                        git_path,
                    });
                }
                files.push((git_path, item.clone()));
            }

            assignments.push(BranchFiles {
                branch: branch.clone(),
                files,
            });
        }

        Ok(assignments)
    }

    /// Builds trees and writes the commits a changeset requires, recording
    /// every branch tip in the commit index. Returns the number of commits
    /// created.
    pub fn commit_branches(
        &mut self,
        store: &mut Store,
        meta: &ChangesetMeta,
        state: &MappingState,
        assignments: &[BranchFiles],
        cache: &BlobCache,
    ) -> Result<usize, PlanError> {
        let mut index_entries: Vec<CommitIndexEntry> = Vec::new();
        let mut commits_created = 0;

        for assignment in assignments {
            let branch = &assignment.branch;

            let mut tree_entries = Vec::with_capacity(assignment.files.len());
            for (git_path, item) in &assignment.files {
                let oid = if item.size == 0 {
                    store.empty_blob()?
                } else {
                    cache
                        .get(&blobs::cache_key(item))
                        .ok_or_else(|| PlanError::MissingBlob {
                            path: item.path.clone(),
                        })?
                };
                tree_entries.push((git_path.clone(), oid));
            }
            let tree_oid = store.put_tree_from_flat(&tree_entries)?;

            let head = self.heads.get(branch).cloned();
            let ops_for_branch = state.ops.iter().any(|op| match op {
                TopologicalOperation::Branch { new_branch, .. } => new_branch == branch,
                TopologicalOperation::Merge { target_branch, .. } => target_branch == branch,
                TopologicalOperation::Rename { new_identity, .. } => new_identity == branch,
                TopologicalOperation::Delete { .. } => false,
            });

            if !ops_for_branch {
                if let Some(ref head) = head {
                    if head.tree == tree_oid {
                        // nothing to commit; the tip still represents this
                        // changeset for later parent lookups
                        index_entries.push(CommitIndexEntry {
                            commit: head.commit,
                            branch: branch.clone(),
                            created: false,
                        });
                        continue;
                    }
                }
            }

            let mut parents = smallvec::SmallVec::new();
            parents.extend(head.as_ref().map(|head| head.commit));
            for additional in &state.additional_parents {
                if &additional.branch != branch {
                    continue;
                }
                let parent_commit =
                    self.resolve_parent(state.changeset, &index_entries, additional)?;
                if !parents.contains(&parent_commit) {
                    parents.push(parent_commit);
                }
            }

            let author = self.signature(&meta.author, meta)?;
            let committer = match meta.checked_in_by {
                Some(ref checked_in_by) => self.signature(checked_in_by, meta)?,
                None => author.clone(),
            };

            let commit_oid = store.put(gix_object::Commit {
                tree: tree_oid,
                parents,
                author,
                committer,
                encoding: None,
                message: meta.comment.clone().unwrap_or_default().into(),
                extra_headers: vec![],
            })?;

            let ref_name = self.ref_name_for(branch, &state.trunk);
            store.set_ref(&ref_name, commit_oid)?;
            store.set_head(&ref_name)?;

            self.heads.insert(
                branch.clone(),
                BranchHead {
                    commit: commit_oid,
                    tree: tree_oid,
                },
            );
            index_entries.push(CommitIndexEntry {
                commit: commit_oid,
                branch: branch.clone(),
                created: true,
            });
            commits_created += 1;

            tracing::debug!("CS{}: committed {commit_oid} on {branch}", state.changeset);
        }

        self.commit_index.insert(state.changeset, index_entries);
        Ok(commits_created)
    }

    pub fn commits_at(&self, changeset: u32) -> Option<&[CommitIndexEntry]> {
        self.commit_index
            .get(&changeset)
            .map(|entries| entries.as_slice())
    }

    fn resolve_parent(
        &self,
        current_changeset: u32,
        current_entries: &[CommitIndexEntry],
        additional: &AdditionalParent,
    ) -> Result<ObjectId, PlanError> {
        let entries = if additional.parent_changeset == current_changeset {
            current_entries
        } else {
            self.commit_index
                .get(&additional.parent_changeset)
                .map(|entries| entries.as_slice())
                .ok_or_else(|| PlanError::MissingParent {
                    parent_changeset: additional.parent_changeset,
                    parent_branch: additional.parent_branch.clone(),
                })?
        };

        entries
            .iter()
            .find(|entry| entry.branch == additional.parent_branch)
            .map(|entry| entry.commit)
            .ok_or_else(|| PlanError::MissingParent {
                parent_changeset: additional.parent_changeset,
                parent_branch: additional.parent_branch.clone(),
            })
    }

    fn signature(
        &self,
        tfvc_name: &str,
        meta: &ChangesetMeta,
    ) -> Result<gix_actor::Signature, PlanError> {
        let author = self
            .authors
            .get(tfvc_name)
            .ok_or_else(|| PlanError::UnmappedIdentity {
                name: tfvc_name.to_owned(),
            })?;
        Ok(gix_actor::Signature {
            name: author.name.as_str().into(),
            email: author.email.as_str().into(),
            time: gix_date::Time {
                seconds: meta.created_date.timestamp(),
                offset: 0,
                sign: gix_date::time::Sign::Plus,
            },
        })
    }

    fn ref_name_for(&mut self, branch: &BranchIdentity, trunk: &BranchIdentity) -> String {
        if let Some(ref_name) = self.ref_names.get(branch) {
            return ref_name.clone();
        }

        let base = if branch == trunk {
            self.trunk_name.clone()
        } else {
            git::legalize_ref_name(branch.leaf())
        };

        let mut ref_name = format!("refs/heads/{base}");
        let mut tries = 0;
        while self.used_ref_names.contains(&ref_name) {
            tries += 1;
            ref_name = format!("refs/heads/{base}_{tries}");
        }
        if tries != 0 {
            tracing::warn!(
                "branch {branch} is named \"{ref_name}\" to avoid a ref collision",
            );
        }

        self.used_ref_names.insert(ref_name.clone());
        self.ref_names.insert(branch.clone(), ref_name.clone());
        ref_name
    }
}
