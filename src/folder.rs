//! Per-folder cache state and the process-wide registry.
//!
//! A `FolderEntry` owns everything the pipeline knows about one indexed
//! folder: configuration, the chunk and file-state maps, the ANN index, the
//! monotonic revision, query caches, and the coordination slots for the
//! in-flight index job and the throttled health refresh.
//!
//! Lock order, where several are taken: `config` → `status` → `data`; the
//! `health` lock is only ever taken first. The data lock is a `RwLock` so
//! searches proceed concurrently and the indexer's final apply step is the
//! single writer.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::ann::{AnnParams, LshAnnIndex};
use crate::cache::LruCache;
use crate::chunker::Chunk;
use crate::config::{
    default_exclude_folders, default_include_extensions, QUERY_CACHE_TTL_MS,
    QUERY_EMBED_CACHE_MAX, QUERY_RESULT_CACHE_MAX,
};
use crate::indexer::IndexStatus;
use crate::storage::{self, FileState};

/// Replaces backslashes with `/` and trims trailing slashes.
pub fn normalize_folder_path(path: &str) -> String {
    let normalized = path.replace('\\', "/");
    let trimmed = normalized.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

#[derive(Debug, Clone)]
pub struct FolderConfig {
    pub enabled: bool,
    pub include_extensions: Vec<String>,
    pub exclude_folders: Vec<String>,
}

impl Default for FolderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            include_extensions: default_include_extensions(),
            exclude_folders: default_exclude_folders(),
        }
    }
}

/// The indexed data itself. Mutated only inside an index transaction's
/// apply step or the initial load.
#[derive(Debug, Default)]
pub struct FolderData {
    pub chunks: HashMap<String, Chunk>,
    pub file_states: HashMap<String, FileState>,
    pub ann_index: Option<LshAnnIndex>,
    pub index_revision: u64,
    pub persisted_loaded: bool,
    pub last_indexed_at: Option<i64>,
    pub db_size_bytes: u64,
}

/// Mutable pieces of the status surface, updated as a transaction runs.
#[derive(Debug, Clone, Default)]
pub struct StatusState {
    pub phase: crate::indexer::IndexPhase,
    pub total_files: usize,
    pub files_to_embed: usize,
    pub embedded_files: usize,
    pub skipped_unchanged: usize,
    pub message: Option<String>,
    pub drift_added_files: usize,
    pub drift_modified_files: usize,
    pub drift_deleted_files: usize,
    pub drift_checked_at: Option<i64>,
}

#[derive(Debug, Default)]
pub struct HealthState {
    pub last_checked: Option<Instant>,
}

/// A ranked result list pinned to the revision it was computed against.
#[derive(Debug, Clone)]
pub struct CachedQueryResult {
    pub revision: u64,
    pub ranked: Vec<(String, f32)>,
}

/// Shared handle for one in-flight index transaction. The first caller
/// installs it, runs the work, and publishes the final status; concurrent
/// callers wait on the condvar and receive the same result.
#[derive(Debug, Default)]
pub struct IndexJob {
    result: Mutex<Option<IndexStatus>>,
    done: Condvar,
}

impl IndexJob {
    pub fn finish(&self, status: IndexStatus) {
        let mut slot = self.result.lock().unwrap();
        *slot = Some(status);
        self.done.notify_all();
    }

    pub fn wait(&self) -> IndexStatus {
        let mut slot = self.result.lock().unwrap();
        loop {
            if let Some(status) = slot.as_ref() {
                return status.clone();
            }
            slot = self.done.wait(slot).unwrap();
        }
    }
}

#[derive(Debug)]
pub struct FolderEntry {
    pub folder_path: String,
    pub storage_path: Option<String>,
    pub config: Mutex<FolderConfig>,
    pub data: RwLock<FolderData>,
    pub status: Mutex<StatusState>,
    pub running_index: Mutex<Option<Arc<IndexJob>>>,
    pub health: Mutex<HealthState>,
    pub query_embedding_cache: Mutex<LruCache<String, Vec<f32>>>,
    pub query_result_cache: Mutex<LruCache<String, CachedQueryResult>>,
}

impl FolderEntry {
    fn new(folder_path: String, storage_path: Option<String>) -> Self {
        let ttl = Duration::from_millis(QUERY_CACHE_TTL_MS);
        Self {
            folder_path,
            storage_path,
            config: Mutex::new(FolderConfig::default()),
            data: RwLock::new(FolderData::default()),
            status: Mutex::new(StatusState::default()),
            running_index: Mutex::new(None),
            health: Mutex::new(HealthState::default()),
            query_embedding_cache: Mutex::new(LruCache::with_ttl(QUERY_EMBED_CACHE_MAX, ttl)),
            query_result_cache: Mutex::new(LruCache::with_ttl(QUERY_RESULT_CACHE_MAX, ttl)),
        }
    }

    pub fn storage_root(&self) -> PathBuf {
        storage::storage_root(&self.folder_path, self.storage_path.as_deref())
    }

    /// Loads persisted state on first use. Subsequent calls are no-ops.
    pub fn ensure_persisted_loaded(&self) {
        {
            let data = self.data.read().unwrap();
            if data.persisted_loaded {
                return;
            }
        }
        let mut data = self.data.write().unwrap();
        if data.persisted_loaded {
            return;
        }
        let root = self.storage_root();
        let loaded = storage::load(&root);
        data.chunks = loaded.chunks;
        data.file_states = loaded.file_states;
        data.last_indexed_at = loaded.last_indexed_at;
        data.db_size_bytes = storage::db_size_bytes(&root);
        data.ann_index = if data.chunks.is_empty() {
            None
        } else {
            LshAnnIndex::build(&data.chunks, &AnnParams::default())
        };
        data.persisted_loaded = true;
    }
}

/// Process-wide registry. One entry per `(folder path, storage override)`
/// pair, created lazily on first reference.
#[derive(Debug, Default)]
pub struct FolderRegistry {
    entries: DashMap<String, Arc<FolderEntry>>,
}

impl FolderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(folder: &str, storage: Option<&str>) -> String {
        match storage {
            Some(storage) => format!("{folder}::{storage}"),
            None => folder.to_string(),
        }
    }

    pub fn acquire(&self, folder_path: &str, storage_path: Option<&str>) -> Arc<FolderEntry> {
        let folder = normalize_folder_path(folder_path);
        let storage = storage_path.map(normalize_folder_path);
        let key = Self::key(&folder, storage.as_deref());
        self.entries
            .entry(key)
            .or_insert_with(|| Arc::new(FolderEntry::new(folder, storage)))
            .clone()
    }

    pub fn remove(&self, folder_path: &str, storage_path: Option<&str>) -> Option<Arc<FolderEntry>> {
        let folder = normalize_folder_path(folder_path);
        let storage = storage_path.map(normalize_folder_path);
        let key = Self::key(&folder, storage.as_deref());
        self.entries.remove(&key).map(|(_, entry)| entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn normalizes_separators_and_trailing_slashes() {
        assert_eq!(normalize_folder_path("/a/b/"), "/a/b");
        assert_eq!(normalize_folder_path("C:\\repo\\src\\"), "C:/repo/src");
        assert_eq!(normalize_folder_path("/"), "/");
    }

    #[test]
    fn acquire_is_singleton_per_folder() {
        let registry = FolderRegistry::new();
        let a = registry.acquire("/tmp/project/", None);
        let b = registry.acquire("/tmp/project", None);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn storage_override_gets_a_distinct_entry() {
        let registry = FolderRegistry::new();
        let plain = registry.acquire("/tmp/project", None);
        let redirected = registry.acquire("/tmp/project", Some("/tmp/elsewhere"));
        assert!(!Arc::ptr_eq(&plain, &redirected));
        assert_eq!(registry.len(), 2);
        assert_eq!(
            redirected.storage_root(),
            PathBuf::from("/tmp/elsewhere/.rag-ts")
        );
    }

    #[test]
    fn remove_drops_the_entry() {
        let registry = FolderRegistry::new();
        registry.acquire("/tmp/project", None);
        assert!(registry.remove("/tmp/project/", None).is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn index_job_hands_the_same_result_to_waiters() {
        let job = Arc::new(IndexJob::default());
        let waiter = {
            let job = job.clone();
            thread::spawn(move || job.wait())
        };
        let status = IndexStatus {
            folder_path: "/tmp/project".to_string(),
            ..IndexStatus::empty("/tmp/project")
        };
        job.finish(status.clone());
        let seen = waiter.join().unwrap();
        assert_eq!(seen.folder_path, status.folder_path);
        assert_eq!(job.wait().folder_path, status.folder_path);
    }
}
