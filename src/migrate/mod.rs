//! The migration pipeline: one pass over the changeset stream, replaying
//! TFVC history into the object store.

use std::sync::{Arc, Mutex};

use futures::stream::BoxStream;
use futures::StreamExt as _;
use tokio_util::sync::CancellationToken;

mod analyzer;
mod blobs;
mod identity;
mod labels;
mod mapping;
mod planner;
mod registry;
mod state;

pub use analyzer::{AnalyzeError, RootPathChange, TopologicalOperation, TopologyAnalyzer};
pub use blobs::{BlobCache, BlobError};
pub use identity::BranchIdentity;
pub use labels::TagError;
pub use mapping::{BranchMapping, MappingError};
pub use planner::{BranchFiles, CommitIndexEntry, CommitPlanner, PlanError};
pub use registry::{BranchRegistry, RegistryError};
pub use state::{AdditionalParent, MappingState, MappingStateIter, StateError};

use crate::authors::AuthorsMap;
use crate::concurrency::{Lookahead, ParallelMapError};
use crate::errors::MigrateError;
use crate::git::store::{Store, StoreError};
use crate::paths;
use crate::term_out::ProgressPrint;
use crate::tfvc::{Change, ChangesetMeta, HistorySource, Item, Label, SourceError};
use crate::{FHashMap, FHashSet};

pub struct MigrateOptions {
    pub root_path: String,
    pub out_dir: std::path::PathBuf,
    pub trunk_name: String,
    pub min_changeset: Option<u32>,
    pub max_changeset: Option<u32>,
    pub root_path_changes: Vec<RootPathChange>,
    pub parallelism: usize,
}

/// Runs the whole migration: listing, validation, per-changeset replay,
/// label tags. Partial output stays on disk when a later step fails.
pub async fn run(
    source: Arc<dyn HistorySource>,
    authors: &AuthorsMap,
    options: &MigrateOptions,
    progress: &ProgressPrint,
    cancel: &CancellationToken,
) -> Result<(), MigrateError> {
    validate_options(options)?;

    progress.set_progress("listing changesets".into());
    let metas = source
        .list_changesets(
            &options.root_path,
            options.min_changeset,
            options.max_changeset,
        )
        .await
        .map_err(|e| {
            tracing::error!("failed to list changesets: {e}");
            io_or_canceled(cancel)
        })?;
    if metas.is_empty() {
        tracing::error!(
            "no changesets found under \"{}\"; nothing to migrate",
            options.root_path,
        );
        return Err(MigrateError::Configuration);
    }
    for window in metas.windows(2) {
        if window[1].changeset_id <= window[0].changeset_id {
            tracing::error!("changeset ids are not strictly increasing");
            return Err(MigrateError::Invariant);
        }
    }

    let first_changeset = metas[0].changeset_id;
    for change in &options.root_path_changes {
        if change.changeset <= first_changeset {
            tracing::error!(
                "root path change at CS{} is not after the first changeset CS{first_changeset}",
                change.changeset,
            );
            return Err(MigrateError::Configuration);
        }
    }

    progress.set_progress("listing labels".into());
    let labels = source.list_labels(&options.root_path).await.map_err(|e| {
        tracing::error!("failed to list labels: {e}");
        io_or_canceled(cancel)
    })?;

    validate_identities(authors, &metas, &labels)?;

    let store = Store::create(&options.out_dir).map_err(|e| {
        tracing::error!("failed to initialize the target repository: {e}");
        match e {
            StoreError::TargetNotEmpty { .. } => MigrateError::Precondition,
            _ => MigrateError::Io,
        }
    })?;
    let store = Mutex::new(store);

    let metas_by_id: FHashMap<u32, ChangesetMeta> = metas
        .iter()
        .map(|meta| (meta.changeset_id, meta.clone()))
        .collect();
    let total = metas.len();

    let mut state_iter = MappingStateIter::new(
        first_changeset,
        &options.root_path,
        options.root_path_changes.clone(),
    )
    .map_err(|e| {
        tracing::error!("{e}");
        e.category()
    })?;
    let mut planner = planner::CommitPlanner::new(&options.trunk_name, authors.clone());
    let cache = blobs::BlobCache::new();

    // one changeset's change list downloads while the previous one commits
    let stream_source = source.clone();
    let changes_stream: BoxStream<'_, Result<(ChangesetMeta, Vec<Change>), SourceError>> =
        futures::stream::iter(metas)
        .then(move |meta| {
            let source = stream_source.clone();
            async move {
                let changes = source.list_changeset_changes(meta.changeset_id).await?;
                Ok((meta, changes))
            }
        })
        .boxed();
    let mut lookahead = Lookahead::new(changes_stream);

    let mut processed = 0usize;
    loop {
        match lookahead.next().await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                tracing::error!("failed to read the changeset stream: {e}");
                return Err(io_or_canceled(cancel));
            }
        }
        let Some((meta, changes)) = lookahead.take_current() else {
            break;
        };
        let changeset = meta.changeset_id;
        processed += 1;

        tracing::debug!("migrating CS{changeset}");
        progress.set_progress(format!(
            "CS{changeset} - analyzing topology ({processed} / {total})",
        ));
        let state = state_iter.next_state(changeset, &changes).map_err(|e| {
            tracing::error!("CS{changeset}: {e}");
            e.category()
        })?;

        {
            let mut store = store.lock().unwrap();
            planner.apply_ref_ops(&mut store, &state).map_err(|e| {
                tracing::error!("CS{changeset}: {e}");
                e.category()
            })?;
        }

        let scope = paths::non_overlapping_union(
            state
                .branch_mappings_in_dep_order
                .iter()
                .map(|(_, mapping)| mapping.root_directory()),
        );
        let items = if scope.is_empty() {
            Vec::new()
        } else {
            progress.set_progress(format!(
                "CS{changeset} - listing items ({processed} / {total})",
            ));
            source.list_items(&scope, changeset).await.map_err(|e| {
                tracing::error!("CS{changeset}: failed to list items: {e}");
                io_or_canceled(cancel)
            })?
        };

        let assignments = planner.map_items(&state, &items).map_err(|e| {
            tracing::error!("CS{changeset}: {e}");
            e.category()
        })?;

        let wanted: Vec<Item> = assignments
            .iter()
            .flat_map(|assignment| assignment.files.iter())
            .map(|(_, item)| item.clone())
            .filter(|item| item.size != 0)
            .collect();
        progress.set_progress(format!(
            "CS{changeset} - downloading content ({processed} / {total})",
        ));
        blobs::materialize(
            source.as_ref(),
            &store,
            &cache,
            &wanted,
            options.parallelism,
            cancel,
        )
        .await
        .map_err(|e| match e {
            ParallelMapError::Canceled => MigrateError::Canceled,
            ParallelMapError::Failed(errors) => {
                for error in &errors {
                    tracing::error!("CS{changeset}: download failed: {error}");
                }
                io_or_canceled(cancel)
            }
        })?;

        progress.set_progress(format!(
            "CS{changeset} - committing ({processed} / {total})",
        ));
        {
            let mut store = store.lock().unwrap();
            planner
                .commit_branches(&mut store, &meta, &state, &assignments, &cache)
                .map_err(|e| {
                    tracing::error!("CS{changeset}: {e}");
                    e.category()
                })?;
        }

        if cancel.is_cancelled() {
            tracing::warn!("canceled; stopping after CS{changeset}");
            return Err(MigrateError::Canceled);
        }
    }

    progress.set_progress("creating tags".into());
    let mut resolved_labels = Vec::with_capacity(labels.len());
    for label in labels {
        if cancel.is_cancelled() {
            return Err(MigrateError::Canceled);
        }
        let labelled_changeset = source.label_items(&label).await.map_err(|e| {
            tracing::error!("failed to list items of label \"{}\": {e}", label.name);
            io_or_canceled(cancel)
        })?;
        resolved_labels.push((label, labelled_changeset));
    }
    {
        let mut store = store.lock().unwrap();
        labels::create_tags(&mut store, &planner, authors, &resolved_labels, &metas_by_id)
            .map_err(|e| {
                tracing::error!("{e}");
                e.category()
            })?;
    }

    tracing::info!("migrated {processed} changeset(s)");
    Ok(())
}

fn validate_options(options: &MigrateOptions) -> Result<(), MigrateError> {
    if !paths::is_absolute(&options.root_path) || options.root_path.ends_with('/') {
        tracing::error!(
            "root path \"{}\" must be absolute ($/...) without a trailing slash",
            options.root_path,
        );
        return Err(MigrateError::Configuration);
    }
    if options.parallelism < 1 {
        tracing::error!("parallelism must be at least 1");
        return Err(MigrateError::Configuration);
    }

    let mut seen = FHashSet::default();
    for change in &options.root_path_changes {
        if !paths::is_absolute(&change.new_root_path) || change.new_root_path.ends_with('/') {
            tracing::error!(
                "root path change target \"{}\" must be absolute ($/...) without a trailing slash",
                change.new_root_path,
            );
            return Err(MigrateError::Configuration);
        }
        if !seen.insert(change.changeset) {
            tracing::error!(
                "more than one root path change at CS{}",
                change.changeset,
            );
            return Err(MigrateError::Configuration);
        }
    }
    Ok(())
}

fn validate_identities(
    authors: &AuthorsMap,
    metas: &[ChangesetMeta],
    labels: &[Label],
) -> Result<(), MigrateError> {
    let mut missing = FHashSet::default();
    let mut names = Vec::new();

    let mut check = |name: &str| {
        if !name.is_empty()
            && authors.get(name).is_none()
            && missing.insert(name.to_ascii_lowercase())
        {
            names.push(name.to_owned());
        }
    };
    for meta in metas {
        check(&meta.author);
        if let Some(ref checked_in_by) = meta.checked_in_by {
            check(checked_in_by);
        }
    }
    for label in labels {
        if let Some(ref owner) = label.owner {
            check(owner);
        }
    }

    if names.is_empty() {
        return Ok(());
    }
    for name in &names {
        tracing::error!("identity {name:?} is not in the authors file");
    }
    Err(MigrateError::Configuration)
}

fn io_or_canceled(cancel: &CancellationToken) -> MigrateError {
    if cancel.is_cancelled() {
        MigrateError::Canceled
    } else {
        MigrateError::Io
    }
}
