use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::{defs, memory};

pub(crate) fn run_test(test_path: &Path) -> Result<(), String> {
    let temp_dir = get_tmp_dir()?;

    let test_def_raw =
        std::fs::read(test_path).map_err(|e| format!("failed to read {test_path:?}: {e}"))?;
    let test_def: defs::Test = serde_yaml::from_slice(&test_def_raw)
        .map_err(|e| format!("failed to parse {test_path:?}: {e}"))?;

    let authors =
        tfvc2git::authors::AuthorsMap::parse(&mut test_def.authors.as_bytes())
            .map_err(|e| format!("failed to parse authors: {e}"))?;
    let source = Arc::new(memory::MemoryHistory::from_defs(&test_def)?);

    let repo_dir = temp_dir.join("migrated");
    let options = tfvc2git::migrate::MigrateOptions {
        root_path: test_def.root_path.clone(),
        out_dir: repo_dir.clone(),
        trunk_name: test_def.trunk_name.clone(),
        min_changeset: test_def.min_changeset,
        max_changeset: test_def.max_changeset,
        root_path_changes: test_def
            .root_path_changes
            .iter()
            .map(|change| tfvc2git::migrate::RootPathChange {
                changeset: change.changeset,
                new_root_path: change.path.clone(),
            })
            .collect(),
        parallelism: 4,
    };

    let result = run_migration(source, &authors, &options);

    if test_def.failed {
        if result.is_ok() {
            return Err("migration succeeded although a failure was expected".into());
        }
    } else {
        result.map_err(|e| format!("migration failed: {e}"))?;

        let git_repo = gix::open(&repo_dir)
            .map_err(|e| format!("failed to open git repository {repo_dir:?}: {e}"))?;

        if let Some(ref expected) = test_def.expected {
            if let Some(ref expected_refs) = expected.refs {
                check_refs(&git_repo, expected_refs)?;
            }
            for expected_rev in expected.revs.iter() {
                check_git_rev(&git_repo, expected_rev)
                    .map_err(|e| format!("revision {:?} check failed: {e}", expected_rev.rev))?;
            }
            for expected_tag in expected.tags.iter() {
                check_git_tag(&git_repo, expected_tag)
                    .map_err(|e| format!("tag {:?} check failed: {e}", expected_tag.tag))?;
            }
        }
    }

    std::fs::remove_dir_all(&temp_dir)
        .map_err(|e| format!("failed to remove {temp_dir:?}: {e}"))?;

    Ok(())
}

fn run_migration(
    source: Arc<memory::MemoryHistory>,
    authors: &tfvc2git::authors::AuthorsMap,
    options: &tfvc2git::migrate::MigrateOptions,
) -> Result<(), tfvc2git::errors::MigrateError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build runtime");

    let term_out = tfvc2git::term_out::init(std::time::Instant::now(), false);
    let progress_print = term_out.progress_print();
    let cancel = tokio_util::sync::CancellationToken::new();

    let result = runtime.block_on(tfvc2git::migrate::run(
        source,
        authors,
        options,
        &progress_print,
        &cancel,
    ));
    term_out.finish();
    result
}

fn get_tmp_dir() -> Result<PathBuf, String> {
    use rand::{Rng as _, SeedableRng as _};

    let mut rng = rand::rngs::StdRng::from_entropy();

    loop {
        let mut path = PathBuf::from(env!("CARGO_TARGET_TMPDIR"));
        path.push(format!("migrate-test-{:08x}", rng.gen::<u32>()));

        match std::fs::create_dir_all(&path) {
            Ok(()) => {
                return Ok(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                continue;
            }
            Err(e) => {
                return Err(format!("failed to create directory {path:?}: {e}"));
            }
        }
    }
}

fn check_refs(
    git_repo: &gix::Repository,
    expected_refs: &std::collections::BTreeSet<String>,
) -> Result<(), String> {
    let references = git_repo
        .references()
        .map_err(|e| format!("failed to iterate references: {e}"))?;

    let mut actual = std::collections::BTreeSet::new();
    for reference in references
        .all()
        .map_err(|e| format!("failed to iterate references: {e}"))?
    {
        let reference = reference.map_err(|e| format!("failed to read reference: {e}"))?;
        actual.insert(reference.name().as_bstr().to_string());
    }

    if actual != *expected_refs {
        return Err(format!(
            "unexpected refs: expected {expected_refs:?}, got {actual:?}",
        ));
    }
    Ok(())
}

fn check_git_rev(
    git_repo: &gix::Repository,
    expected: &defs::ExpectedRev,
) -> Result<(), String> {
    let parsed_rev = git_repo
        .rev_parse_single(expected.rev.as_str())
        .map_err(|e| format!("failed to revparse {:?}: {e}", expected.rev))?;
    let commit = parsed_rev
        .object()
        .map_err(|e| format!("failed to get object: {e}"))?
        .try_into_commit()
        .map_err(|e| format!("failed to get commit: {e}"))?;

    if let Some(ref expected_author) = expected.author {
        let author = commit
            .author()
            .map_err(|e| format!("failed to get commit author: {e}"))?;
        check_signature("author", &author, expected_author)?;
    }

    if let Some(ref expected_committer) = expected.committer {
        let committer = commit
            .committer()
            .map_err(|e| format!("failed to get commit committer: {e}"))?;
        check_signature("committer", &committer, expected_committer)?;
    }

    if let Some(ref expected_msg) = expected.message {
        let msg = commit
            .message_raw()
            .map_err(|e| format!("failed to get commit message: {e}"))?;
        if msg != expected_msg.as_str() {
            return Err(format!(
                "unexpected commit message: {msg:?} != {expected_msg:?}",
            ));
        }
    }

    if let Some(ref expected_parents) = expected.parents {
        let parent_ids = commit.parent_ids().collect::<Vec<_>>();
        if parent_ids.len() != expected_parents.len() {
            return Err(format!(
                "mismatched number of parents: expected {}, got {}",
                expected_parents.len(),
                parent_ids.len(),
            ));
        }
        for (i, (&parent_id, expected_parent)) in
            parent_ids.iter().zip(expected_parents.iter()).enumerate()
        {
            let parsed_parent_rev = git_repo
                .rev_parse_single(expected_parent.as_str())
                .map_err(|e| format!("failed to revparse {expected_parent:?}: {e}"))?;
            if parsed_parent_rev != parent_id {
                return Err(format!(
                    "parent {i} of {:?} is not {expected_parent:?}",
                    expected.rev,
                ));
            }
        }
    }

    if let Some(ref expected_tree) = expected.tree {
        let tree_id = commit
            .tree_id()
            .map_err(|e| format!("failed to get tree ID: {e}"))?;
        check_git_tree(tree_id, expected_tree)?;
    }

    Ok(())
}

fn check_signature(
    which: &str,
    signature: &gix::actor::SignatureRef<'_>,
    expected: &str,
) -> Result<(), String> {
    let actual = format!("{} <{}>", signature.name, signature.email);
    if actual != expected {
        return Err(format!("unexpected {which}: {actual:?} != {expected:?}"));
    }
    Ok(())
}

fn check_git_tree(
    git_root_tree_id: gix::Id<'_>,
    expected: &BTreeMap<String, String>,
) -> Result<(), String> {
    let mut files = BTreeMap::new();
    let mut tree_queue = Vec::new();

    tree_queue.push((String::new(), git_root_tree_id));
    while let Some((tree_path, tree_id)) = tree_queue.pop() {
        let git_tree = tree_id
            .object()
            .map_err(|e| format!("failed to get git object {tree_id}: {e}"))?
            .try_into_tree()
            .map_err(|e| format!("failed to convert git object {tree_id} to tree: {e}"))?;

        for entry in git_tree.iter() {
            let entry =
                entry.map_err(|e| format!("failed to iterate over tree entries: {e}"))?;
            let mode = entry.mode();

            let entry_path = if tree_path.is_empty() {
                entry.filename().to_string()
            } else {
                format!("{tree_path}/{}", entry.filename())
            };

            if mode.is_tree() {
                tree_queue.push((entry_path, entry.id()));
            } else {
                if !mode.is_blob() || mode.is_executable() {
                    return Err(format!(
                        "entry \"{entry_path}\" was expected to be a regular file",
                    ));
                }
                let blob = entry
                    .id()
                    .object()
                    .map_err(|e| format!("failed to get blob of \"{entry_path}\": {e}"))?
                    .into_blob();
                files.insert(entry_path, String::from_utf8_lossy(&blob.data).into_owned());
            }
        }
    }

    for (path, content) in files.iter() {
        match expected.get(path) {
            None => return Err(format!("unexpected tree entry: \"{path}\"")),
            Some(expected_content) => {
                if content != expected_content {
                    return Err(format!(
                        "incorrect data in entry \"{path}\": expected {expected_content:?}, got {content:?}",
                    ));
                }
            }
        }
    }
    for path in expected.keys() {
        if !files.contains_key(path) {
            return Err(format!("missing tree entry: \"{path}\""));
        }
    }

    Ok(())
}

fn check_git_tag(
    git_repo: &gix::Repository,
    expected: &defs::ExpectedTag,
) -> Result<(), String> {
    let parsed_tag = git_repo
        .rev_parse_single(expected.tag.as_str())
        .map_err(|e| format!("failed to revparse {:?}: {e}", expected.tag))?;
    let parsed_target = git_repo
        .rev_parse_single(expected.target.as_str())
        .map_err(|e| format!("failed to revparse {:?}: {e}", expected.target))?;

    let tag: gix::objs::Tag = parsed_tag
        .object()
        .map_err(|e| format!("failed to get object: {e}"))?
        .try_into_tag()
        .map_err(|e| format!("failed to get tag: {e}"))?
        .decode()
        .map_err(|e| format!("failed to decode tag: {e}"))?
        .into();

    if tag.target != parsed_target {
        return Err(format!(
            "tag {:?} does not point to {:?}",
            expected.tag, expected.target,
        ));
    }

    if let Some(ref expected_tagger) = expected.tagger {
        let tagger = tag.tagger.as_ref().ok_or("tag does not have a tagger")?;
        check_signature("tagger", &tagger.to_ref(), expected_tagger)?;
    }

    if let Some(ref expected_msg) = expected.message {
        if tag.message != expected_msg.as_str() {
            return Err(format!(
                "unexpected tag message: {:?} != {expected_msg:?}",
                tag.message,
            ));
        }
    }

    Ok(())
}
