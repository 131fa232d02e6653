//! Per-branch projection of TFVC server paths into the branch's Git tree.

use crate::paths;

#[derive(Debug, PartialEq, Eq)]
pub enum MappingError {
    /// Renaming a root while a subdirectory remap is active has not been
    /// validated against real histories.
    RenameWithSubdirMapping { root: String },
}

impl std::fmt::Display for MappingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::RenameWithSubdirMapping { ref root } => {
                write!(
                    f,
                    "renaming branch root \"{root}\" with an active subdirectory mapping is not implemented",
                )
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct SubdirMapping {
    branch_dir: String,
    target_dir: String,
}

/// Maps item paths of one branch into its Git repository paths.
///
/// With a subdirectory mapping present, items under `target_dir` are hidden
/// and items under `branch_dir` are rewritten to `target_dir`; after that,
/// an item under `root_directory` maps to its path with the root prefix
/// stripped, anything else is outside the branch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BranchMapping {
    root_directory: String,
    subdir_mapping: Option<SubdirMapping>,
}

impl BranchMapping {
    pub fn new(root_directory: impl Into<String>) -> Self {
        let root_directory = root_directory.into();
        debug_assert!(paths::is_absolute(&root_directory));
        Self {
            root_directory,
            subdir_mapping: None,
        }
    }

    pub fn root_directory(&self) -> &str {
        &self.root_directory
    }

    pub fn rename_root(&self, old_root: &str, new_root: &str) -> Result<Self, MappingError> {
        if self.subdir_mapping.is_some() {
            return Err(MappingError::RenameWithSubdirMapping {
                root: self.root_directory.clone(),
            });
        }
        Ok(Self {
            root_directory: paths::replace_containing(&self.root_directory, old_root, new_root),
            subdir_mapping: None,
        })
    }

    pub fn with_subdir_mapping(&self, branch_dir: &str, target_dir: &str) -> Self {
        debug_assert!(paths::contains(&self.root_directory, branch_dir));
        debug_assert!(paths::contains(&self.root_directory, target_dir));
        debug_assert!(!paths::overlaps(branch_dir, target_dir));
        Self {
            root_directory: self.root_directory.clone(),
            subdir_mapping: Some(SubdirMapping {
                branch_dir: branch_dir.to_owned(),
                target_dir: target_dir.to_owned(),
            }),
        }
    }

    /// The Git path of `item_path` in this branch's tree, or `None` when
    /// the item is not part of this branch's view.
    pub fn git_path(&self, item_path: &str) -> Option<String> {
        let mut path = std::borrow::Cow::Borrowed(item_path);
        if let Some(ref subdir) = self.subdir_mapping {
            if paths::is_or_contains(&subdir.target_dir, &path) {
                return None;
            }
            if paths::is_or_contains(&subdir.branch_dir, &path) {
                path = std::borrow::Cow::Owned(paths::replace_containing(
                    &path,
                    &subdir.branch_dir,
                    &subdir.target_dir,
                ));
            }
        }

        if paths::is_or_contains(&self.root_directory, &path) {
            Some(paths::remove_containing(&path, &self.root_directory).to_owned())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BranchMapping, MappingError};

    #[test]
    fn strips_root_prefix() {
        let mapping = BranchMapping::new("$/P/Branch");
        assert_eq!(
            mapping.git_path("$/P/Branch/Sub/a.txt").as_deref(),
            Some("Sub/a.txt"),
        );
        assert_eq!(mapping.git_path("$/p/branch/b.txt").as_deref(), Some("b.txt"));
        assert_eq!(mapping.git_path("$/P/Branch").as_deref(), Some(""));
        assert_eq!(mapping.git_path("$/P/Other/a.txt"), None);
    }

    #[test]
    fn rename_root_moves_the_view() {
        let mapping = BranchMapping::new("$/P");
        let renamed = mapping.rename_root("$/P", "$/Q").unwrap();
        assert_eq!(renamed.git_path("$/Q/a.txt").as_deref(), Some("a.txt"));
        assert_eq!(renamed.git_path("$/P/a.txt"), None);
    }

    #[test]
    fn rename_root_with_subdir_mapping_is_rejected() {
        let mapping = BranchMapping::new("$/W").with_subdir_mapping("$/W/New", "$/W/Old");
        assert!(matches!(
            mapping.rename_root("$/W", "$/V"),
            Err(MappingError::RenameWithSubdirMapping { .. }),
        ));
    }

    // mirrors the reference behavior for branches into a subdirectory of
    // the source's view
    #[test]
    fn subdir_mapping_rewrites_and_hides() {
        let mapping = BranchMapping::new("$/W").with_subdir_mapping("$/W/New", "$/W/Old");

        // items under the branch dir appear where the target dir lives
        assert_eq!(
            mapping.git_path("$/W/New/a.txt").as_deref(),
            Some("Old/a.txt"),
        );
        // the target dir subtree itself is hidden
        assert_eq!(mapping.git_path("$/W/Old/a.txt"), None);
        // everything else stays put
        assert_eq!(mapping.git_path("$/W/other.txt").as_deref(), Some("other.txt"));
    }
}
