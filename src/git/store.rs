//! Object store: a freshly initialized repository written as loose objects.
//!
//! Blobs, trees, commits and tags are zlib-compressed into
//! `.git/objects/`; refs and `HEAD` are written eagerly so a failed run
//! leaves an inspectable repository behind.

use std::collections::BTreeMap;
use std::io::Write as _;

use gix_hash::ObjectId;
use gix_object::tree::EntryKind;

#[derive(Debug)]
pub enum StoreError {
    TargetNotEmpty {
        path: std::path::PathBuf,
    },
    CreateDirError {
        path: std::path::PathBuf,
        error: std::io::Error,
    },
    ReadDirError {
        path: std::path::PathBuf,
        error: std::io::Error,
    },
    WriteFileError {
        path: std::path::PathBuf,
        error: std::io::Error,
    },
    RemoveFileError {
        path: std::path::PathBuf,
        error: std::io::Error,
    },
    RenameError {
        source_path: std::path::PathBuf,
        dest_path: std::path::PathBuf,
        error: std::io::Error,
    },
    SerializeObjectError {
        error: std::io::Error,
    },
    HashObjectError,
}

impl std::error::Error for StoreError {}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::TargetNotEmpty { ref path } => {
                write!(
                    f,
                    "target directory {path:?} is not empty (expected empty or a single empty \".git\" directory)",
                )
            }
            Self::CreateDirError {
                ref path,
                ref error,
            } => {
                write!(f, "failed to create directory {path:?}: {error}")
            }
            Self::ReadDirError {
                ref path,
                ref error,
            } => {
                write!(f, "failed to read directory {path:?}: {error}")
            }
            Self::WriteFileError {
                ref path,
                ref error,
            } => {
                write!(f, "failed to write file {path:?}: {error}")
            }
            Self::RemoveFileError {
                ref path,
                ref error,
            } => {
                write!(f, "failed to remove file {path:?}: {error}")
            }
            Self::RenameError {
                ref source_path,
                ref dest_path,
                ref error,
            } => {
                write!(
                    f,
                    "failed to rename {source_path:?} to {dest_path:?}: {error}"
                )
            }
            Self::SerializeObjectError { ref error } => {
                write!(f, "failed to serialize object: {error}")
            }
            Self::HashObjectError => f.write_str("failed to hash object"),
        }
    }
}

pub struct Store {
    git_dir: std::path::PathBuf,
    hash_kind: gix_hash::Kind,
    refs: BTreeMap<String, ObjectId>,
    empty_blob_oid: Option<ObjectId>,
    tmp_counter: u64,
}

impl Store {
    /// Prepares `out_dir` and initializes an empty repository inside it.
    ///
    /// The directory may be absent, empty, or contain nothing but an empty
    /// `.git` directory; anything else fails the precondition check.
    pub fn create(out_dir: &std::path::Path) -> Result<Self, StoreError> {
        create_dir_all(out_dir)?;

        let entries = out_dir
            .read_dir()
            .map_err(|e| StoreError::ReadDirError {
                path: out_dir.to_path_buf(),
                error: e,
            })?;
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::ReadDirError {
                path: out_dir.to_path_buf(),
                error: e,
            })?;
            if entry.file_name() != ".git" {
                return Err(StoreError::TargetNotEmpty {
                    path: out_dir.to_path_buf(),
                });
            }
            let git_entries = entry.path().read_dir().map_err(|e| StoreError::ReadDirError {
                path: entry.path(),
                error: e,
            })?;
            if git_entries.count() != 0 {
                return Err(StoreError::TargetNotEmpty {
                    path: out_dir.to_path_buf(),
                });
            }
        }

        let git_dir = out_dir.join(".git");
        init_repo(&git_dir)?;

        Ok(Self {
            git_dir,
            hash_kind: gix_hash::Kind::Sha1,
            refs: BTreeMap::new(),
            empty_blob_oid: None,
            tmp_counter: 0,
        })
    }

    pub fn put(&mut self, object: impl gix_object::WriteTo) -> Result<ObjectId, StoreError> {
        let mut data = Vec::new();
        object
            .write_to(&mut data)
            .map_err(|e| StoreError::SerializeObjectError { error: e })?;
        self.put_raw(object.kind(), &data)
    }

    pub fn put_blob(&mut self, data: &[u8]) -> Result<ObjectId, StoreError> {
        self.put_raw(gix_object::Kind::Blob, data)
    }

    /// The shared blob for size-zero items.
    pub fn empty_blob(&mut self) -> Result<ObjectId, StoreError> {
        if let Some(oid) = self.empty_blob_oid {
            return Ok(oid);
        }
        let oid = self.put_blob(b"")?;
        self.empty_blob_oid = Some(oid);
        Ok(oid)
    }

    /// Writes the nested trees for a flat list of `(git_path, blob)` pairs,
    /// all with the non-executable file mode, and returns the root tree.
    pub fn put_tree_from_flat(
        &mut self,
        entries: &[(String, ObjectId)],
    ) -> Result<ObjectId, StoreError> {
        let mut root = TreeNode::default();
        for (path, oid) in entries {
            let mut node = &mut root;
            let mut components = path.split('/').peekable();
            while let Some(component) = components.next() {
                if components.peek().is_some() {
                    node = node.dirs.entry(component.to_owned()).or_default();
                } else {
                    node.files.insert(component.to_owned(), *oid);
                }
            }
        }
        self.write_tree(&root)
    }

    fn write_tree(&mut self, node: &TreeNode) -> Result<ObjectId, StoreError> {
        let mut entries = Vec::with_capacity(node.files.len() + node.dirs.len());
        for (name, oid) in &node.files {
            entries.push(gix_object::tree::Entry {
                mode: EntryKind::Blob.into(),
                filename: name.as_str().into(),
                oid: *oid,
            });
        }
        for (name, subdir) in &node.dirs {
            let subdir_oid = self.write_tree(subdir)?;
            entries.push(gix_object::tree::Entry {
                mode: EntryKind::Tree.into(),
                filename: name.as_str().into(),
                oid: subdir_oid,
            });
        }
        // git orders tree entries as if directory names had a trailing slash
        entries.sort_by(|a, b| {
            let key = |entry: &gix_object::tree::Entry| {
                let mut k = entry.filename.to_vec();
                if entry.mode.is_tree() {
                    k.push(b'/');
                }
                k
            };
            key(a).cmp(&key(b))
        });

        self.put(gix_object::Tree { entries })
    }

    pub fn set_ref(&mut self, ref_name: &str, oid: ObjectId) -> Result<(), StoreError> {
        let ref_path = self.git_dir.join(ref_name);
        if let Some(parent) = ref_path.parent() {
            create_dir_all(parent)?;
        }
        write_file(&ref_path, format!("{oid}\n").as_bytes())?;
        self.refs.insert(ref_name.to_owned(), oid);
        Ok(())
    }

    pub fn remove_ref(&mut self, ref_name: &str) -> Result<(), StoreError> {
        let ref_path = self.git_dir.join(ref_name);
        std::fs::remove_file(&ref_path).map_err(|e| StoreError::RemoveFileError {
            path: ref_path,
            error: e,
        })?;
        self.refs.remove(ref_name);
        Ok(())
    }

    pub fn has_ref(&self, ref_name: &str) -> bool {
        self.refs.contains_key(ref_name)
    }

    pub fn set_head(&mut self, ref_name: &str) -> Result<(), StoreError> {
        let head_path = self.git_dir.join("HEAD");
        write_file(&head_path, format!("ref: {ref_name}\n").as_bytes())
    }

    fn put_raw(
        &mut self,
        kind: gix_object::Kind,
        data: &[u8],
    ) -> Result<ObjectId, StoreError> {
        let oid = gix_object::compute_hash(self.hash_kind, kind, data);

        let hex = oid.to_string();
        let (fan_out, rest) = hex.split_at(2);
        let obj_dir = self.git_dir.join("objects").join(fan_out);
        let obj_path = obj_dir.join(rest);
        if obj_path.exists() {
            // content-addressed: already stored
            return Ok(oid);
        }
        create_dir_all(&obj_dir)?;

        let tmp_path = obj_dir.join(format!("tmp_obj_{}", self.tmp_counter));
        self.tmp_counter += 1;

        let compressed = compress_loose(kind, data).map_err(|e| StoreError::WriteFileError {
            path: obj_path.clone(),
            error: e,
        })?;

        write_file(&tmp_path, &compressed)?;
        std::fs::rename(&tmp_path, &obj_path).map_err(|e| StoreError::RenameError {
            source_path: tmp_path,
            dest_path: obj_path,
            error: e,
        })?;

        Ok(oid)
    }
}

fn compress_loose(kind: gix_object::Kind, data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut compressed = Vec::with_capacity(data.len() / 2 + 64);
    let mut encoder =
        flate2::write::ZlibEncoder::new(&mut compressed, flate2::Compression::default());
    encoder.write_all(kind.as_bytes())?;
    write!(encoder, " {}\0", data.len())?;
    encoder.write_all(data)?;
    encoder.finish()?;
    Ok(compressed)
}

#[derive(Default)]
struct TreeNode {
    files: BTreeMap<String, ObjectId>,
    dirs: BTreeMap<String, TreeNode>,
}

fn init_repo(git_dir: &std::path::Path) -> Result<(), StoreError> {
    create_dir_all(git_dir)?;
    create_dir_all(&git_dir.join("objects").join("info"))?;
    create_dir_all(&git_dir.join("objects").join("pack"))?;
    create_dir_all(&git_dir.join("refs").join("heads"))?;
    create_dir_all(&git_dir.join("refs").join("tags"))?;
    create_dir_all(&git_dir.join("info"))?;

    write_file(&git_dir.join("info").join("exclude"), b"")?;
    write_file(
        &git_dir.join("config"),
        b"[core]\n\trepositoryformatversion = 0\n\tfilemode = true\n\tbare = false\n",
    )?;
    write_file(&git_dir.join("HEAD"), b"ref: refs/heads/main\n")?;

    Ok(())
}

fn create_dir_all(path: &std::path::Path) -> Result<(), StoreError> {
    std::fs::create_dir_all(path).map_err(|e| StoreError::CreateDirError {
        path: path.to_path_buf(),
        error: e,
    })
}

fn write_file(path: &std::path::Path, data: &[u8]) -> Result<(), StoreError> {
    std::fs::write(path, data).map_err(|e| StoreError::WriteFileError {
        path: path.to_path_buf(),
        error: e,
    })
}
