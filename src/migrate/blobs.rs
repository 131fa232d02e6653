//! Content materialization: downloads item bytes, renormalizes line
//! endings, and fills the blob cache.

use std::sync::Mutex;

use gix_hash::ObjectId;
use tokio_util::sync::CancellationToken;

use crate::concurrency::{parallel_map, ParallelMapError};
use crate::git::store::{Store, StoreError};
use crate::tfvc::{HistorySource, Item, SourceError};
use crate::{FHashMap, FHashSet};

const BINARY_SNIFF_LEN: usize = 8000;

#[derive(Debug)]
pub enum BlobError {
    Source(SourceError),
    Store(StoreError),
}

impl std::fmt::Display for BlobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::Source(ref error) => error.fmt(f),
            Self::Store(ref error) => error.fmt(f),
        }
    }
}

/// Cache of already-created blobs, keyed by item content hash. Entries are
/// never invalidated during a run. Insertions from parallel downloads are
/// mutex-guarded; reads happen after the per-changeset download barrier.
pub struct BlobCache {
    map: Mutex<FHashMap<String, ObjectId>>,
}

impl BlobCache {
    pub fn new() -> Self {
        Self {
            map: Mutex::new(FHashMap::default()),
        }
    }

    pub fn get(&self, key: &str) -> Option<ObjectId> {
        self.map.lock().unwrap().get(key).copied()
    }

    fn insert(&self, key: String, oid: ObjectId) {
        self.map.lock().unwrap().insert(key, oid);
    }
}

impl Default for BlobCache {
    fn default() -> Self {
        Self::new()
    }
}

/// The blob-cache key of an item. Items without a server-side hash fall
/// back to their path and version, which is just as stable within a run.
pub fn cache_key(item: &Item) -> String {
    match item.hash {
        Some(ref hash) => hash.clone(),
        None => format!(
            "{}@{}",
            item.path.to_ascii_lowercase(),
            item.changeset_version,
        ),
    }
}

/// Downloads and stores every item of `wanted` whose content is not yet
/// cached. `wanted` items must have nonzero size; duplicates by cache key
/// are fetched once.
pub async fn materialize(
    source: &dyn HistorySource,
    store: &Mutex<Store>,
    cache: &BlobCache,
    wanted: &[Item],
    parallelism: usize,
    cancel: &CancellationToken,
) -> Result<(), ParallelMapError<BlobError>> {
    let mut pending = Vec::new();
    let mut seen = FHashSet::default();
    for item in wanted {
        debug_assert!(item.size != 0);
        let key = cache_key(item);
        if cache.get(&key).is_none() && seen.insert(key.clone()) {
            pending.push((key, item));
        }
    }

    let factories = pending.into_iter().map(|(key, item)| {
        move || async move {
            let bytes = source
                .fetch_content(&item.path, item.changeset_version)
                .await
                .map_err(BlobError::Source)?;

            let mut store = store.lock().unwrap();
            let mut oid = store.put_blob(&bytes).map_err(BlobError::Store)?;
            if !is_binary(&bytes) && has_crlf(&bytes) {
                let renormalized = renormalize_crlf(&bytes);
                oid = store.put_blob(&renormalized).map_err(BlobError::Store)?;
            }
            drop(store);

            cache.insert(key, oid);
            Ok(())
        }
    });

    parallel_map(factories, parallelism, cancel).await.map(|_| ())
}

/// NUL in the leading window marks the content as binary, like Git's own
/// heuristic.
pub fn is_binary(data: &[u8]) -> bool {
    data.iter().take(BINARY_SNIFF_LEN).any(|&b| b == 0)
}

pub fn has_crlf(data: &[u8]) -> bool {
    data.windows(2).any(|pair| pair == b"\r\n")
}

/// Replaces every `CR LF` with `LF` in a single pass.
pub fn renormalize_crlf(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        if data[i] == b'\r' && data.get(i + 1) == Some(&b'\n') {
            out.push(b'\n');
            i += 2;
        } else {
            out.push(data[i]);
            i += 1;
        }
    }
    out
}
