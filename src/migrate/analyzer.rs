//! Turns per-changeset path changes into a stream of branch-graph events.

use std::collections::VecDeque;

use super::identity::BranchIdentity;
use super::registry::{BranchRegistry, RegistryError};
use crate::paths::{self, PathKey};
use crate::tfvc::{Change, ChangeTypes};
use crate::FHashSet;

/// A discrete branch-graph event derived from a changeset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TopologicalOperation {
    Branch {
        source_branch: BranchIdentity,
        source_branch_changeset: u32,
        source_branch_path: String,
        new_branch: BranchIdentity,
    },
    Merge {
        changeset: u32,
        source_branch: BranchIdentity,
        source_branch_changeset: u32,
        source_branch_path: String,
        target_branch: BranchIdentity,
        target_branch_path: String,
    },
    Rename {
        old_identity: BranchIdentity,
        new_identity: BranchIdentity,
    },
    Delete {
        changeset: u32,
        branch: BranchIdentity,
    },
}

/// Operator-supplied relocation of the migration root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RootPathChange {
    pub changeset: u32,
    pub new_root_path: String,
}

#[derive(Debug)]
pub enum AnalyzeError {
    Registry(RegistryError),
    /// A configured root-path change references a changeset the stream
    /// skipped; the root moved outside the analyzed history.
    RootChangeSkipped { expected: u32, current: u32 },
    PoorlyUnderstoodCombination {
        changeset: u32,
        path: String,
        change_type: ChangeTypes,
    },
    MergeFromUnknown {
        changeset: u32,
        source_path: String,
        target_path: String,
    },
}

impl From<RegistryError> for AnalyzeError {
    fn from(error: RegistryError) -> Self {
        Self::Registry(error)
    }
}

impl std::fmt::Display for AnalyzeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::Registry(ref error) => error.fmt(f),
            Self::RootChangeSkipped { expected, current } => {
                write!(
                    f,
                    "root path change at CS{expected} was never reached (stream is at CS{current}); \
                     the root moved outside the analyzed history",
                )
            }
            Self::PoorlyUnderstoodCombination {
                changeset,
                ref path,
                change_type,
            } => {
                write!(
                    f,
                    "CS{changeset}: \"{path}\" combines {change_type:?} on a branch path; \
                     this combination has not been validated",
                )
            }
            Self::MergeFromUnknown {
                changeset,
                ref source_path,
                ref target_path,
            } => {
                write!(
                    f,
                    "CS{changeset}: merge into \"{target_path}\" from \"{source_path}\", which is not in any known branch",
                )
            }
        }
    }
}

impl AnalyzeError {
    pub fn category(&self) -> crate::errors::MigrateError {
        match self {
            Self::Registry(_) | Self::MergeFromUnknown { .. } => {
                crate::errors::MigrateError::Invariant
            }
            Self::RootChangeSkipped { .. } => crate::errors::MigrateError::NotImplemented,
            Self::PoorlyUnderstoodCombination { .. } => {
                crate::errors::MigrateError::PoorlyUnderstood
            }
        }
    }
}

/// Folds one changeset at a time into the branch registry, emitting the
/// topological operations the changeset implies.
pub struct TopologyAnalyzer {
    registry: BranchRegistry,
    trunk: BranchIdentity,
    current_root: String,
    current_branch_paths: FHashSet<PathKey>,
    pending_root_changes: VecDeque<RootPathChange>,
}

impl TopologyAnalyzer {
    pub fn new(
        first_changeset: u32,
        root_path: &str,
        mut root_path_changes: Vec<RootPathChange>,
    ) -> Result<Self, AnalyzeError> {
        let trunk = BranchIdentity::new(first_changeset, root_path);
        let mut registry = BranchRegistry::new();
        registry.add(trunk.clone())?;

        let mut current_branch_paths = FHashSet::default();
        current_branch_paths.insert(PathKey::new(root_path));

        root_path_changes.sort_by_key(|change| change.changeset);

        Ok(Self {
            registry,
            trunk,
            current_root: root_path.to_owned(),
            current_branch_paths,
            pending_root_changes: root_path_changes.into(),
        })
    }

    pub fn trunk(&self) -> &BranchIdentity {
        &self.trunk
    }

    /// Processes the changes of `changeset` (every changeset after the
    /// first) and returns the operations in application order: root
    /// rewrite, branch renames, branches, merges, deletes.
    ///
    /// Renames run first so later lookups resolve against the new
    /// identities; branches run before deletes because a branch may be cut
    /// from an area that the same changeset then deletes.
    pub fn get_operations(
        &mut self,
        changeset: u32,
        changes: &[Change],
    ) -> Result<Vec<TopologicalOperation>, AnalyzeError> {
        let mut ops = Vec::new();

        self.apply_root_path_change(changeset, &mut ops)?;
        self.apply_branch_renames(changeset, changes, &mut ops)?;

        self.registry.no_further_changes_up_to(changeset - 1)?;

        self.apply_branches_and_merges(changeset, changes, &mut ops)?;
        self.apply_deletes(changeset, changes, &mut ops)?;

        Ok(ops)
    }

    fn apply_root_path_change(
        &mut self,
        changeset: u32,
        ops: &mut Vec<TopologicalOperation>,
    ) -> Result<(), AnalyzeError> {
        let Some(front) = self.pending_root_changes.front() else {
            return Ok(());
        };
        if front.changeset > changeset {
            return Ok(());
        }
        if front.changeset < changeset {
            return Err(AnalyzeError::RootChangeSkipped {
                expected: front.changeset,
                current: changeset,
            });
        }

        let change = self.pending_root_changes.pop_front().unwrap();
        self.current_branch_paths
            .remove(&PathKey::new(&self.current_root));
        let old_identity =
            self.registry
                .rename(changeset, &self.current_root, &change.new_root_path)?;
        let new_identity = BranchIdentity::new(changeset, change.new_root_path.as_str());

        tracing::info!(
            "CS{changeset}: migration root moves from \"{}\" to \"{}\"",
            self.current_root,
            change.new_root_path,
        );

        if self.trunk == old_identity {
            self.trunk = new_identity.clone();
        }
        self.current_root = change.new_root_path;
        self.current_branch_paths
            .insert(PathKey::new(&self.current_root));

        ops.push(TopologicalOperation::Rename {
            old_identity,
            new_identity,
        });
        Ok(())
    }

    fn apply_branch_renames(
        &mut self,
        changeset: u32,
        changes: &[Change],
        ops: &mut Vec<TopologicalOperation>,
    ) -> Result<(), AnalyzeError> {
        for change in changes {
            if !change.change_type.contains(ChangeTypes::RENAME) {
                continue;
            }
            let Some(ref source_path) = change.source_server_item else {
                continue;
            };
            if !self.current_branch_paths.contains(&PathKey::new(source_path)) {
                continue;
            }
            if change.change_type != ChangeTypes::RENAME {
                return Err(AnalyzeError::PoorlyUnderstoodCombination {
                    changeset,
                    path: change.item.path.clone(),
                    change_type: change.change_type,
                });
            }

            let new_path = &change.item.path;
            let old_identity = self.registry.rename(changeset, source_path, new_path)?;
            let new_identity = BranchIdentity::new(changeset, new_path.as_str());

            self.current_branch_paths.remove(&PathKey::new(source_path));
            self.current_branch_paths.insert(PathKey::new(new_path));
            if self.trunk == old_identity {
                self.trunk = new_identity.clone();
            }
            if paths::eq_ignore_case(&self.current_root, source_path) {
                self.current_root = new_path.clone();
            }

            ops.push(TopologicalOperation::Rename {
                old_identity,
                new_identity,
            });
        }
        Ok(())
    }

    fn apply_branches_and_merges(
        &mut self,
        changeset: u32,
        changes: &[Change],
        ops: &mut Vec<TopologicalOperation>,
    ) -> Result<(), AnalyzeError> {
        // grouped in first-seen order, keeping the highest source version
        let mut branch_groups: Vec<BranchGroup> = Vec::new();
        let mut merge_groups: Vec<MergeGroup> = Vec::new();

        for change in changes {
            let mut non_rename_sources = change
                .merge_sources
                .iter()
                .filter(|source| !source.is_rename);
            let (Some(merge_source), None) =
                (non_rename_sources.next(), non_rename_sources.next())
            else {
                continue;
            };

            let source_branch = self
                .registry
                .find(merge_source.version_to.saturating_sub(1), &merge_source.server_item)?;
            let Some(source_branch) = source_branch else {
                if self.registry.find(changeset - 1, &change.item.path)?.is_none() {
                    return Err(AnalyzeError::MergeFromUnknown {
                        changeset,
                        source_path: merge_source.server_item.clone(),
                        target_path: change.item.path.clone(),
                    });
                }
                // contribution from outside any branch into a known branch
                tracing::debug!(
                    "CS{changeset}: ignoring merge source \"{}\" outside known branches",
                    merge_source.server_item,
                );
                continue;
            };

            let (source_path, target_path) = paths::strip_common_trailing_segments(
                &merge_source.server_item,
                &change.item.path,
            );
            if source_path.is_empty() {
                // source and target collapse to the same path
                continue;
            }

            if change.change_type.contains(ChangeTypes::MERGE) {
                let Some(target_branch) =
                    self.registry.find(changeset - 1, &change.item.path)?
                else {
                    tracing::debug!(
                        "CS{changeset}: ignoring merge into \"{}\" outside known branches",
                        change.item.path,
                    );
                    continue;
                };

                let group = merge_groups.iter_mut().find(|group| {
                    group.source_branch == source_branch
                        && paths::eq_ignore_case(&group.source_path, source_path)
                        && group.target_branch == target_branch
                        && paths::eq_ignore_case(&group.target_path, target_path)
                });
                match group {
                    Some(group) => {
                        group.version_to = group.version_to.max(merge_source.version_to);
                    }
                    None => merge_groups.push(MergeGroup {
                        source_branch,
                        source_path: source_path.to_owned(),
                        target_branch,
                        target_path: target_path.to_owned(),
                        version_to: merge_source.version_to,
                    }),
                }
            } else {
                if self.current_branch_paths.contains(&PathKey::new(target_path)) {
                    // incremental branching into an already-live branch
                    continue;
                }

                let group = branch_groups.iter_mut().find(|group| {
                    group.source_branch == source_branch
                        && paths::eq_ignore_case(&group.source_path, source_path)
                        && paths::eq_ignore_case(&group.target_path, target_path)
                });
                match group {
                    Some(group) => {
                        group.version_to = group.version_to.max(merge_source.version_to);
                    }
                    None => branch_groups.push(BranchGroup {
                        source_branch,
                        source_path: source_path.to_owned(),
                        target_path: target_path.to_owned(),
                        version_to: merge_source.version_to,
                    }),
                }
            }
        }

        // within one source/target branch pair, only the outermost path
        // pair survives
        let retained: Vec<bool> = merge_groups
            .iter()
            .map(|group| {
                !merge_groups.iter().any(|other| {
                    !std::ptr::eq(other, group)
                        && other.source_branch == group.source_branch
                        && other.target_branch == group.target_branch
                        && paths::is_or_contains(&other.source_path, &group.source_path)
                        && paths::is_or_contains(&other.target_path, &group.target_path)
                })
            })
            .collect();
        let mut keep = retained.into_iter();
        merge_groups.retain(|_| keep.next().unwrap());

        for group in branch_groups {
            let new_branch = BranchIdentity::new(changeset, group.target_path.as_str());
            self.registry.add(new_branch.clone())?;
            self.current_branch_paths
                .insert(PathKey::new(&group.target_path));

            tracing::debug!(
                "CS{changeset}: branch {new_branch} from \"{}\"@CS{}",
                group.source_path,
                group.version_to,
            );
            ops.push(TopologicalOperation::Branch {
                source_branch: group.source_branch,
                source_branch_changeset: group.version_to,
                source_branch_path: group.source_path,
                new_branch,
            });
        }

        for group in merge_groups {
            tracing::debug!(
                "CS{changeset}: merge into {} from \"{}\"@CS{}",
                group.target_branch,
                group.source_path,
                group.version_to,
            );
            ops.push(TopologicalOperation::Merge {
                changeset,
                source_branch: group.source_branch,
                source_branch_changeset: group.version_to,
                source_branch_path: group.source_path,
                target_branch: group.target_branch,
                target_branch_path: group.target_path,
            });
        }

        Ok(())
    }

    fn apply_deletes(
        &mut self,
        changeset: u32,
        changes: &[Change],
        ops: &mut Vec<TopologicalOperation>,
    ) -> Result<(), AnalyzeError> {
        for change in changes {
            if !change.change_type.contains(ChangeTypes::DELETE) {
                continue;
            }
            let path = &change.item.path;
            if !self.current_branch_paths.contains(&PathKey::new(path)) {
                continue;
            }
            if change.change_type != ChangeTypes::DELETE {
                return Err(AnalyzeError::PoorlyUnderstoodCombination {
                    changeset,
                    path: path.clone(),
                    change_type: change.change_type,
                });
            }

            let branch = self.registry.delete(changeset, path)?;
            self.current_branch_paths.remove(&PathKey::new(path));

            tracing::debug!("CS{changeset}: delete branch {branch}");
            ops.push(TopologicalOperation::Delete { changeset, branch });
        }
        Ok(())
    }
}

struct BranchGroup {
    source_branch: BranchIdentity,
    source_path: String,
    target_path: String,
    version_to: u32,
}

struct MergeGroup {
    source_branch: BranchIdentity,
    source_path: String,
    target_branch: BranchIdentity,
    target_path: String,
    version_to: u32,
}

#[cfg(test)]
mod tests {
    use super::{AnalyzeError, RootPathChange, TopologicalOperation, TopologyAnalyzer};
    use crate::migrate::identity::BranchIdentity;
    use crate::tfvc::{Change, ChangeTypes, Item, MergeSource};

    fn item(path: &str) -> Item {
        Item {
            path: path.to_owned(),
            changeset_version: 0,
            is_folder: false,
            is_branch: false,
            is_symbolic_link: false,
            size: 0,
            hash: None,
        }
    }

    fn change(path: &str, change_type: ChangeTypes) -> Change {
        Change {
            item: item(path),
            change_type,
            source_server_item: None,
            merge_sources: Vec::new(),
        }
    }

    fn branch_change(path: &str, from: &str, version_to: u32) -> Change {
        Change {
            merge_sources: vec![MergeSource {
                server_item: from.to_owned(),
                version_to,
                is_rename: false,
            }],
            ..change(path, ChangeTypes::BRANCH)
        }
    }

    fn merge_change(path: &str, from: &str, version_to: u32) -> Change {
        Change {
            merge_sources: vec![MergeSource {
                server_item: from.to_owned(),
                version_to,
                is_rename: false,
            }],
            ..change(path, ChangeTypes::MERGE | ChangeTypes::EDIT)
        }
    }

    fn rename_change(path: &str, from: &str) -> Change {
        Change {
            source_server_item: Some(from.to_owned()),
            ..change(path, ChangeTypes::RENAME)
        }
    }

    #[test]
    fn branch_from_root() {
        let mut analyzer = TopologyAnalyzer::new(1, "$/P", Vec::new()).unwrap();
        let ops = analyzer
            .get_operations(2, &[branch_change("$/P/B", "$/P", 1)])
            .unwrap();
        assert_eq!(
            ops,
            [TopologicalOperation::Branch {
                source_branch: BranchIdentity::new(1, "$/P"),
                source_branch_changeset: 1,
                source_branch_path: "$/P".to_owned(),
                new_branch: BranchIdentity::new(2, "$/P/B"),
            }],
        );
    }

    #[test]
    fn file_level_branch_records_are_grouped() {
        let mut analyzer = TopologyAnalyzer::new(1, "$/P", Vec::new()).unwrap();
        let ops = analyzer
            .get_operations(
                2,
                &[
                    branch_change("$/P/B/a.txt", "$/P/A/a.txt", 1),
                    branch_change("$/P/B/sub/b.txt", "$/P/A/sub/b.txt", 1),
                ],
            )
            .unwrap();
        assert_eq!(
            ops,
            [TopologicalOperation::Branch {
                source_branch: BranchIdentity::new(1, "$/P"),
                source_branch_changeset: 1,
                source_branch_path: "$/P/A".to_owned(),
                new_branch: BranchIdentity::new(2, "$/P/B"),
            }],
        );
    }

    #[test]
    fn determinism() {
        let changes = [
            branch_change("$/P/B/a.txt", "$/P/A/a.txt", 1),
            merge_change("$/P/x.txt", "$/P/x.txt", 1),
        ];
        let run = || {
            let mut analyzer = TopologyAnalyzer::new(1, "$/P", Vec::new()).unwrap();
            analyzer.get_operations(2, &changes).unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn merge_produces_merge_op() {
        let mut analyzer = TopologyAnalyzer::new(1, "$/P", Vec::new()).unwrap();
        analyzer
            .get_operations(2, &[branch_change("$/P/B", "$/P", 1)])
            .unwrap();
        let ops = analyzer
            .get_operations(4, &[merge_change("$/P/file.txt", "$/P/B/file.txt", 3)])
            .unwrap();
        assert_eq!(
            ops,
            [TopologicalOperation::Merge {
                changeset: 4,
                source_branch: BranchIdentity::new(2, "$/P/B"),
                source_branch_changeset: 3,
                source_branch_path: "$/P/B".to_owned(),
                target_branch: BranchIdentity::new(1, "$/P"),
                target_branch_path: "$/P".to_owned(),
            }],
        );
    }

    #[test]
    fn contained_merge_records_are_deduplicated() {
        let mut analyzer = TopologyAnalyzer::new(1, "$/P", Vec::new()).unwrap();
        analyzer
            .get_operations(2, &[branch_change("$/P/B", "$/P", 1)])
            .unwrap();
        let ops = analyzer
            .get_operations(
                4,
                &[
                    merge_change("$/P/Sub/inner.txt", "$/P/B/Sub/inner.txt", 3),
                    merge_change("$/P/file.txt", "$/P/B/file.txt", 3),
                ],
            )
            .unwrap();
        // ($/P/B/Sub, $/P/Sub) is contained by ($/P/B, $/P); only the
        // outer merge survives
        assert_eq!(ops.len(), 1);
        assert!(matches!(
            &ops[0],
            TopologicalOperation::Merge { source_branch_path, .. }
                if source_branch_path == "$/P/B"
        ));
    }

    #[test]
    fn rename_of_live_branch() {
        let mut analyzer = TopologyAnalyzer::new(1, "$/P", Vec::new()).unwrap();
        let ops = analyzer
            .get_operations(2, &[rename_change("$/Q", "$/P")])
            .unwrap();
        assert_eq!(
            ops,
            [TopologicalOperation::Rename {
                old_identity: BranchIdentity::new(1, "$/P"),
                new_identity: BranchIdentity::new(2, "$/Q"),
            }],
        );
        assert_eq!(analyzer.trunk(), &BranchIdentity::new(2, "$/Q"));
    }

    #[test]
    fn rename_with_extra_flags_is_rejected() {
        let mut analyzer = TopologyAnalyzer::new(1, "$/P", Vec::new()).unwrap();
        let mut bad = rename_change("$/Q", "$/P");
        bad.change_type = ChangeTypes::RENAME | ChangeTypes::EDIT;
        assert!(matches!(
            analyzer.get_operations(2, &[bad]),
            Err(AnalyzeError::PoorlyUnderstoodCombination { .. }),
        ));
    }

    #[test]
    fn branch_then_delete_of_source_area() {
        let mut analyzer = TopologyAnalyzer::new(1, "$/P", Vec::new()).unwrap();
        analyzer
            .get_operations(2, &[branch_change("$/P/B", "$/P", 1)])
            .unwrap();
        let ops = analyzer
            .get_operations(
                3,
                &[
                    branch_change("$/P/C", "$/P/B", 2),
                    change("$/P/B", ChangeTypes::DELETE),
                ],
            )
            .unwrap();
        assert_eq!(ops.len(), 2);
        assert!(matches!(&ops[0], TopologicalOperation::Branch { new_branch, .. }
            if new_branch == &BranchIdentity::new(3, "$/P/C")));
        assert!(matches!(&ops[1], TopologicalOperation::Delete { branch, .. }
            if branch == &BranchIdentity::new(2, "$/P/B")));
    }

    #[test]
    fn root_path_change_renames_trunk() {
        let mut analyzer = TopologyAnalyzer::new(
            1,
            "$/P",
            vec![RootPathChange {
                changeset: 3,
                new_root_path: "$/New/P".to_owned(),
            }],
        )
        .unwrap();
        assert!(analyzer.get_operations(2, &[]).unwrap().is_empty());
        let ops = analyzer.get_operations(3, &[]).unwrap();
        assert_eq!(
            ops,
            [TopologicalOperation::Rename {
                old_identity: BranchIdentity::new(1, "$/P"),
                new_identity: BranchIdentity::new(3, "$/New/P"),
            }],
        );
        assert_eq!(analyzer.trunk(), &BranchIdentity::new(3, "$/New/P"));
    }

    #[test]
    fn skipped_root_path_change_fails() {
        let mut analyzer = TopologyAnalyzer::new(
            1,
            "$/P",
            vec![RootPathChange {
                changeset: 3,
                new_root_path: "$/New".to_owned(),
            }],
        )
        .unwrap();
        assert!(matches!(
            analyzer.get_operations(4, &[]),
            Err(AnalyzeError::RootChangeSkipped {
                expected: 3,
                current: 4,
            }),
        ));
    }

    #[test]
    fn merge_from_unknown_into_unknown_fails() {
        let mut analyzer = TopologyAnalyzer::new(1, "$/P", Vec::new()).unwrap();
        assert!(matches!(
            analyzer.get_operations(
                2,
                &[merge_change("$/Outside/f.txt", "$/Other/f.txt", 1)],
            ),
            Err(AnalyzeError::MergeFromUnknown { .. }),
        ));
    }
}
