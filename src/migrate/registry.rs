//! Registry of live branches, queryable at any already-seen changeset.

use super::identity::BranchIdentity;
use crate::paths;

#[derive(Debug, PartialEq, Eq)]
pub enum RegistryError {
    OutOfOrder { changeset: u32, max_known: u32 },
    Duplicate { path: String },
    NotFound { path: String },
    UnknownChangeset { changeset: u32, max_known: u32 },
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::OutOfOrder {
                changeset,
                max_known,
            } => {
                write!(
                    f,
                    "changeset CS{changeset} is not ahead of the registry (at CS{max_known})",
                )
            }
            Self::Duplicate { ref path } => {
                write!(f, "branch path \"{path}\" is already live")
            }
            Self::NotFound { ref path } => {
                write!(f, "no live branch at \"{path}\"")
            }
            Self::UnknownChangeset {
                changeset,
                max_known,
            } => {
                write!(
                    f,
                    "queried changeset CS{changeset} is past the registry (at CS{max_known})",
                )
            }
        }
    }
}

struct Entry {
    identity: BranchIdentity,
    deleted_at: Option<u32>,
}

/// Live branches ordered by descending path specificity, so a lookup scan
/// meets a nested branch before the branch containing it.
///
/// Mutations referencing changeset `n` require the registry to have seen
/// strictly less than `n` and leave it at `n - 1`, which allows several
/// operations on the same changeset before `no_further_changes_up_to(n)`
/// seals it. Deletes only mark entries, so lookups at earlier changesets
/// still resolve them; renames drop the old entry and insert the successor
/// identity.
pub struct BranchRegistry {
    entries: Vec<Entry>,
    max_known_changeset: u32,
}

impl BranchRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            max_known_changeset: 0,
        }
    }

    pub fn max_known_changeset(&self) -> u32 {
        self.max_known_changeset
    }

    pub fn add(&mut self, new: BranchIdentity) -> Result<(), RegistryError> {
        self.check_ahead(new.creation_changeset)?;

        if self
            .entries
            .iter()
            .any(|e| e.deleted_at.is_none() && paths::eq_ignore_case(&e.identity.path, &new.path))
        {
            return Err(RegistryError::Duplicate { path: new.path });
        }

        let max_known = new.creation_changeset - 1;
        self.insert_in_specificity_order(Entry {
            identity: new,
            deleted_at: None,
        });
        self.max_known_changeset = max_known;
        Ok(())
    }

    pub fn delete(&mut self, changeset: u32, path: &str) -> Result<BranchIdentity, RegistryError> {
        self.check_ahead(changeset)?;

        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.deleted_at.is_none() && paths::eq_ignore_case(&e.identity.path, path))
            .ok_or_else(|| RegistryError::NotFound {
                path: path.to_owned(),
            })?;
        entry.deleted_at = Some(changeset);
        let identity = entry.identity.clone();
        self.max_known_changeset = changeset - 1;
        Ok(identity)
    }

    pub fn rename(
        &mut self,
        changeset: u32,
        old_path: &str,
        new_path: &str,
    ) -> Result<BranchIdentity, RegistryError> {
        self.check_ahead(changeset)?;

        let position = self
            .entries
            .iter()
            .position(|e| {
                e.deleted_at.is_none() && paths::eq_ignore_case(&e.identity.path, old_path)
            })
            .ok_or_else(|| RegistryError::NotFound {
                path: old_path.to_owned(),
            })?;
        let old_entry = self.entries.remove(position);

        self.insert_in_specificity_order(Entry {
            identity: BranchIdentity::new(changeset, new_path),
            deleted_at: None,
        });
        self.max_known_changeset = changeset - 1;
        Ok(old_entry.identity)
    }

    /// The most specific branch containing `item_path` that is live at
    /// `changeset`.
    pub fn find(
        &self,
        changeset: u32,
        item_path: &str,
    ) -> Result<Option<BranchIdentity>, RegistryError> {
        if changeset > self.max_known_changeset {
            return Err(RegistryError::UnknownChangeset {
                changeset,
                max_known: self.max_known_changeset,
            });
        }

        Ok(self
            .entries
            .iter()
            .find(|e| {
                paths::is_or_contains(&e.identity.path, item_path)
                    && e.deleted_at.is_none_or(|deleted_at| deleted_at > changeset)
            })
            .map(|e| e.identity.clone()))
    }

    pub fn no_further_changes_up_to(&mut self, changeset: u32) -> Result<(), RegistryError> {
        if changeset < self.max_known_changeset {
            return Err(RegistryError::OutOfOrder {
                changeset,
                max_known: self.max_known_changeset,
            });
        }
        self.max_known_changeset = changeset;
        Ok(())
    }

    fn check_ahead(&self, changeset: u32) -> Result<(), RegistryError> {
        if changeset <= self.max_known_changeset {
            return Err(RegistryError::OutOfOrder {
                changeset,
                max_known: self.max_known_changeset,
            });
        }
        Ok(())
    }

    fn insert_in_specificity_order(&mut self, entry: Entry) {
        // before the first entry that is an ancestor of (or equal to) the
        // new path; descendants stay in front
        let position = self
            .entries
            .iter()
            .position(|e| paths::is_or_contains(&e.identity.path, &entry.identity.path))
            .unwrap_or(self.entries.len());
        self.entries.insert(position, entry);
    }
}
