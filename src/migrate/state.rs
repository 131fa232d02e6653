//! Folds topological operations into per-changeset mapping states.

use super::analyzer::{AnalyzeError, RootPathChange, TopologicalOperation, TopologyAnalyzer};
use super::identity::BranchIdentity;
use super::mapping::{BranchMapping, MappingError};
use crate::tfvc::Change;
use crate::{paths, topo_sort};

/// A branch-from or merge edge: `branch`'s next commit takes an extra
/// parent from `parent_branch` at `parent_changeset`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdditionalParent {
    pub branch: BranchIdentity,
    pub parent_changeset: u32,
    pub parent_branch: BranchIdentity,
}

/// Everything the commit planner needs to know about one changeset.
pub struct MappingState {
    pub changeset: u32,
    pub ops: Vec<TopologicalOperation>,
    pub additional_parents: Vec<AdditionalParent>,
    pub trunk: BranchIdentity,
    /// Live branches, ordered so every branch follows the branches it takes
    /// additional parents from in this changeset.
    pub branch_mappings_in_dep_order: Vec<(BranchIdentity, BranchMapping)>,
}

#[derive(Debug)]
pub enum StateError {
    Analyze(AnalyzeError),
    Mapping(MappingError),
    /// An operation referenced a branch with no mapping entry.
    MissingMapping { branch: BranchIdentity },
    DependencyCycle {
        error: topo_sort::TopologicalSortError<BranchIdentity>,
    },
}

impl From<AnalyzeError> for StateError {
    fn from(error: AnalyzeError) -> Self {
        Self::Analyze(error)
    }
}

impl From<MappingError> for StateError {
    fn from(error: MappingError) -> Self {
        Self::Mapping(error)
    }
}

impl std::fmt::Display for StateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::Analyze(ref error) => error.fmt(f),
            Self::Mapping(ref error) => error.fmt(f),
            Self::MissingMapping { ref branch } => {
                write!(f, "no mapping for branch {branch}")
            }
            Self::DependencyCycle { ref error } => error.fmt(f),
        }
    }
}

impl StateError {
    pub fn category(&self) -> crate::errors::MigrateError {
        match self {
            Self::Analyze(error) => error.category(),
            Self::Mapping(_) => crate::errors::MigrateError::NotImplemented,
            Self::MissingMapping { .. } | Self::DependencyCycle { .. } => {
                crate::errors::MigrateError::Invariant
            }
        }
    }
}

/// Produces one [`MappingState`] per changeset, in stream order. The first
/// changeset carries no operations and the trivial trunk mapping.
pub struct MappingStateIter {
    analyzer: TopologyAnalyzer,
    first_changeset: u32,
    started: bool,
    // insertion-ordered live map; order seeds the dependency sort
    mappings: Vec<(BranchIdentity, BranchMapping)>,
}

impl MappingStateIter {
    pub fn new(
        first_changeset: u32,
        root_path: &str,
        root_path_changes: Vec<RootPathChange>,
    ) -> Result<Self, StateError> {
        let analyzer = TopologyAnalyzer::new(first_changeset, root_path, root_path_changes)?;
        let trunk = analyzer.trunk().clone();
        let mappings = vec![(trunk, BranchMapping::new(root_path))];
        Ok(Self {
            analyzer,
            first_changeset,
            started: false,
            mappings,
        })
    }

    pub fn next_state(
        &mut self,
        changeset: u32,
        changes: &[Change],
    ) -> Result<MappingState, StateError> {
        if !self.started {
            self.started = true;
            debug_assert_eq!(changeset, self.first_changeset);
            return Ok(MappingState {
                changeset,
                ops: Vec::new(),
                additional_parents: Vec::new(),
                trunk: self.analyzer.trunk().clone(),
                branch_mappings_in_dep_order: self.mappings.clone(),
            });
        }

        let ops = self.analyzer.get_operations(changeset, changes)?;
        let mut additional_parents = Vec::new();

        for op in &ops {
            match op {
                TopologicalOperation::Branch {
                    source_branch,
                    source_branch_changeset,
                    source_branch_path,
                    new_branch,
                } => {
                    let source_mapping = self.find_mapping(source_branch)?.clone();
                    let new_mapping = if paths::is_or_contains(
                        source_mapping.root_directory(),
                        source_branch_path,
                    ) {
                        // the branched subtree becomes the new root
                        BranchMapping::new(new_branch.path.as_str())
                    } else {
                        source_mapping
                            .with_subdir_mapping(&new_branch.path, source_branch_path)
                    };
                    self.mappings.push((new_branch.clone(), new_mapping));
                    additional_parents.push(AdditionalParent {
                        branch: new_branch.clone(),
                        parent_changeset: *source_branch_changeset,
                        parent_branch: source_branch.clone(),
                    });
                }
                TopologicalOperation::Merge {
                    source_branch,
                    source_branch_changeset,
                    target_branch,
                    ..
                } => {
                    additional_parents.push(AdditionalParent {
                        branch: target_branch.clone(),
                        parent_changeset: *source_branch_changeset,
                        parent_branch: source_branch.clone(),
                    });
                }
                TopologicalOperation::Rename {
                    old_identity,
                    new_identity,
                } => {
                    let position = self.position_of(old_identity)?;
                    let renamed = self.mappings[position]
                        .1
                        .rename_root(&old_identity.path, &new_identity.path)?;
                    self.mappings[position] = (new_identity.clone(), renamed);
                }
                TopologicalOperation::Delete { branch, .. } => {
                    let position = self.position_of(branch)?;
                    self.mappings.remove(position);
                }
            }
        }

        let branch_mappings_in_dep_order = self.dependency_order(&additional_parents)?;

        Ok(MappingState {
            changeset,
            ops,
            additional_parents,
            trunk: self.analyzer.trunk().clone(),
            branch_mappings_in_dep_order,
        })
    }

    fn dependency_order(
        &self,
        additional_parents: &[AdditionalParent],
    ) -> Result<Vec<(BranchIdentity, BranchMapping)>, StateError> {
        topo_sort::sort_by_dependencies(
            self.mappings.clone(),
            |(branch, _)| branch.clone(),
            |(branch, _)| {
                additional_parents
                    .iter()
                    .filter(|edge| &edge.branch == branch)
                    .map(|edge| edge.parent_branch.clone())
                    // a parent deleted in this same changeset has its
                    // commits in the index already; no ordering is needed
                    .filter(|parent| self.mappings.iter().any(|(b, _)| b == parent))
                    .collect()
            },
        )
        .map_err(|error| StateError::DependencyCycle { error })
    }

    fn find_mapping(&self, branch: &BranchIdentity) -> Result<&BranchMapping, StateError> {
        self.mappings
            .iter()
            .find(|(b, _)| b == branch)
            .map(|(_, mapping)| mapping)
            .ok_or_else(|| StateError::MissingMapping {
                branch: branch.clone(),
            })
    }

    fn position_of(&self, branch: &BranchIdentity) -> Result<usize, StateError> {
        self.mappings
            .iter()
            .position(|(b, _)| b == branch)
            .ok_or_else(|| StateError::MissingMapping {
                branch: branch.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::MappingStateIter;
    use crate::migrate::identity::BranchIdentity;
    use crate::tfvc::{Change, ChangeTypes, Item, MergeSource};

    fn branch_change(path: &str, from: &str, version_to: u32) -> Change {
        Change {
            item: Item {
                path: path.to_owned(),
                changeset_version: 0,
                is_folder: false,
                is_branch: false,
                is_symbolic_link: false,
                size: 0,
                hash: None,
            },
            change_type: ChangeTypes::BRANCH,
            source_server_item: None,
            merge_sources: vec![MergeSource {
                server_item: from.to_owned(),
                version_to,
                is_rename: false,
            }],
        }
    }

    #[test]
    fn first_state_is_trivial() {
        let mut iter = MappingStateIter::new(1, "$/P", Vec::new()).unwrap();
        let state = iter.next_state(1, &[]).unwrap();
        assert!(state.ops.is_empty());
        assert!(state.additional_parents.is_empty());
        assert_eq!(state.trunk, BranchIdentity::new(1, "$/P"));
        assert_eq!(state.branch_mappings_in_dep_order.len(), 1);
        assert_eq!(
            state.branch_mappings_in_dep_order[0].1.git_path("$/P/f.txt").as_deref(),
            Some("f.txt"),
        );
    }

    #[test]
    fn branch_from_subdirectory_renames_the_root() {
        let mut iter = MappingStateIter::new(1, "$/P", Vec::new()).unwrap();
        iter.next_state(1, &[]).unwrap();
        let state = iter
            .next_state(2, &[branch_change("$/P/SubBranch", "$/P/Sub", 1)])
            .unwrap();

        let (branch, mapping) = &state.branch_mappings_in_dep_order[1];
        assert_eq!(branch, &BranchIdentity::new(2, "$/P/SubBranch"));
        assert_eq!(mapping.git_path("$/P/SubBranch/a.txt").as_deref(), Some("a.txt"));
        assert_eq!(mapping.git_path("$/P/Sub/a.txt"), None);
        assert_eq!(
            state.additional_parents[0].parent_branch,
            BranchIdentity::new(1, "$/P"),
        );
    }

    #[test]
    fn dependency_order_puts_source_first() {
        let mut iter = MappingStateIter::new(1, "$/P", Vec::new()).unwrap();
        iter.next_state(1, &[]).unwrap();
        let state = iter
            .next_state(2, &[branch_change("$/P/B", "$/P", 1)])
            .unwrap();

        let order: Vec<&BranchIdentity> = state
            .branch_mappings_in_dep_order
            .iter()
            .map(|(branch, _)| branch)
            .collect();
        assert_eq!(order[0], &BranchIdentity::new(1, "$/P"));
        assert_eq!(order[1], &BranchIdentity::new(2, "$/P/B"));
    }

    #[test]
    fn delete_removes_the_mapping() {
        let mut iter = MappingStateIter::new(1, "$/P", Vec::new()).unwrap();
        iter.next_state(1, &[]).unwrap();
        iter.next_state(2, &[branch_change("$/P/B", "$/P", 1)])
            .unwrap();

        let delete = Change {
            item: Item {
                path: "$/P/B".to_owned(),
                changeset_version: 0,
                is_folder: true,
                is_branch: false,
                is_symbolic_link: false,
                size: 0,
                hash: None,
            },
            change_type: ChangeTypes::DELETE,
            source_server_item: None,
            merge_sources: Vec::new(),
        };
        let state = iter.next_state(3, &[delete]).unwrap();
        assert_eq!(state.branch_mappings_in_dep_order.len(), 1);
    }

    #[test]
    fn rename_moves_the_mapping() {
        let mut iter = MappingStateIter::new(1, "$/P", Vec::new()).unwrap();
        iter.next_state(1, &[]).unwrap();

        let rename = Change {
            item: Item {
                path: "$/Q".to_owned(),
                changeset_version: 0,
                is_folder: true,
                is_branch: false,
                is_symbolic_link: false,
                size: 0,
                hash: None,
            },
            change_type: ChangeTypes::RENAME,
            source_server_item: Some("$/P".to_owned()),
            merge_sources: Vec::new(),
        };
        let state = iter.next_state(2, &[rename]).unwrap();
        assert_eq!(state.trunk, BranchIdentity::new(2, "$/Q"));
        let (branch, mapping) = &state.branch_mappings_in_dep_order[0];
        assert_eq!(branch, &BranchIdentity::new(2, "$/Q"));
        assert_eq!(mapping.git_path("$/Q/f.txt").as_deref(), Some("f.txt"));
    }
}
