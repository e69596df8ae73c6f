//! The index lifecycle orchestrator.
//!
//! One `index()` call is one transaction: scan the folder, drop tracked
//! files that vanished, skip files whose metadata or content hash is
//! unchanged, chunk and embed the rest under bounded concurrency, then apply
//! every mutation, rebuild the ANN index, bump the revision and persist in a
//! single write-locked step. A racing search observes the pre- or
//! post-transaction state, never a partial one.

mod status;

pub(crate) use status::build_status;
pub use status::{IndexPhase, IndexStatus};

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use rayon::prelude::*;
use sha1::{Digest, Sha1};
use tracing::{debug, warn};

use crate::ann::{AnnParams, LshAnnIndex};
use crate::cancel::{CancelToken, Cancelled};
use crate::chunker::{chunk_source, Chunk, ChunkOptions, SymbolExtractor};
use crate::config::{
    default_skip_files, EMBED_BATCH_SIZE, FILE_EMBED_CONCURRENCY, HEALTH_REFRESH_INTERVAL_MS,
    MAX_FILE_BYTES,
};
use crate::embedding::{embed_in_batches, EmbeddingProvider};
use crate::folder::{FolderEntry, FolderRegistry, IndexJob};
use crate::scanner::{scan_folder, ScanOptions, ScannedFile};
use crate::search::Searcher;
use crate::storage::{self, FileState};

pub type ProgressCallback = Box<dyn Fn(&IndexStatus) + Send + Sync>;

#[derive(Default)]
pub struct IndexOptions {
    pub include_extensions: Option<Vec<String>>,
    pub exclude_folders: Option<Vec<String>>,
    pub max_file_size: Option<u64>,
    pub concurrency: Option<usize>,
    pub embed_batch_size: Option<usize>,
    pub output_folder: Option<String>,
    pub cancel: Option<CancelToken>,
    pub on_progress: Option<ProgressCallback>,
}

pub struct Indexer {
    registry: Arc<FolderRegistry>,
    embedder: Arc<dyn EmbeddingProvider>,
    extractor: Option<Arc<dyn SymbolExtractor>>,
}

impl Indexer {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            registry: Arc::new(FolderRegistry::new()),
            embedder,
            extractor: None,
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn SymbolExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn registry(&self) -> Arc<FolderRegistry> {
        self.registry.clone()
    }

    /// A searcher sharing this indexer's folder registry and provider.
    pub fn searcher(&self) -> Searcher {
        Searcher::new(self.registry.clone(), self.embedder.clone())
    }

    /// Front-loads provider initialization with a single probe embedding.
    pub fn warmup(&self) -> Result<()> {
        let probe = vec!["warmup".to_string()];
        let _ = self.embedder.embed(&probe, &CancelToken::new())?;
        Ok(())
    }

    /// Runs one indexing transaction for `folder`. Concurrent callers on the
    /// same folder share the in-flight transaction and receive its result.
    /// Failures and cancellations are reported through the returned status
    /// (`phase` and `message`), not as errors.
    pub fn index(&self, folder: &Path, options: IndexOptions) -> IndexStatus {
        let entry = self
            .registry
            .acquire(&folder.to_string_lossy(), options.output_folder.as_deref());

        {
            let mut config = entry.config.lock().unwrap();
            config.enabled = true;
            if let Some(extensions) = &options.include_extensions {
                config.include_extensions = extensions.clone();
            }
            if let Some(folders) = &options.exclude_folders {
                config.exclude_folders = folders.clone();
            }
        }

        let job = {
            let mut running = entry.running_index.lock().unwrap();
            if let Some(job) = running.as_ref() {
                let job = job.clone();
                drop(running);
                debug!("Joining in-flight index for {}", entry.folder_path);
                return job.wait();
            }
            let job = Arc::new(IndexJob::default());
            *running = Some(job.clone());
            job
        };

        let cancel = options.cancel.clone().unwrap_or_default();
        let outcome = self.run_transaction(&entry, &options, &cancel);

        {
            let mut state = entry.status.lock().unwrap();
            match &outcome {
                Ok(()) => {
                    state.phase = IndexPhase::Ready;
                    state.message = None;
                    state.drift_added_files = 0;
                    state.drift_modified_files = 0;
                    state.drift_deleted_files = 0;
                }
                Err(err) if err.downcast_ref::<Cancelled>().is_some() => {
                    state.phase = IndexPhase::Idle;
                    state.message = Some("indexing cancelled".to_string());
                }
                Err(err) => {
                    warn!("folder" = %entry.folder_path, "error" = %err, "msg" = "indexing failed");
                    state.phase = IndexPhase::Error;
                    state.message = Some(err.to_string());
                }
            }
        }

        let final_status = self.snapshot(&entry);
        emit(&options, &final_status);
        job.finish(final_status.clone());
        *entry.running_index.lock().unwrap() = None;
        final_status
    }

    fn run_transaction(
        &self,
        entry: &Arc<FolderEntry>,
        options: &IndexOptions,
        cancel: &CancelToken,
    ) -> Result<()> {
        let started = Instant::now();
        entry.ensure_persisted_loaded();

        let (include_extensions, exclude_folders) = {
            let config = entry.config.lock().unwrap();
            (
                config.include_extensions.clone(),
                config.exclude_folders.clone(),
            )
        };

        set_phase(entry, IndexPhase::Scanning);
        self.emit_progress(entry, options);

        let scan_options = ScanOptions {
            include_extensions,
            exclude_folders,
            skip_files: default_skip_files(),
            max_file_size: options.max_file_size.unwrap_or(MAX_FILE_BYTES),
        };
        let candidates = scan_folder(Path::new(&entry.folder_path), &scan_options)?;
        debug!(
            "Scanned {}: {} candidate files",
            entry.folder_path,
            candidates.len()
        );

        {
            let mut state = entry.status.lock().unwrap();
            state.total_files = candidates.len();
            state.files_to_embed = 0;
            state.embedded_files = 0;
            state.skipped_unchanged = 0;
        }

        let snapshot: HashMap<String, FileState> =
            entry.data.read().unwrap().file_states.clone();
        let current: HashSet<&str> = candidates
            .iter()
            .map(|file| file.relative_path.as_str())
            .collect();

        let deleted: Vec<String> = snapshot
            .keys()
            .filter(|path| !current.contains(path.as_str()))
            .cloned()
            .collect();

        // selection: metadata fast path first, then content-hash verification
        let mut refreshed: Vec<(String, i64, u64)> = Vec::new();
        let mut changed: Vec<PendingFile> = Vec::new();
        for file in candidates {
            cancel.check()?;
            if let Some(previous) = snapshot.get(&file.relative_path) {
                if previous.modified_at == file.modified_at && previous.size == file.size {
                    bump_skipped(entry);
                    continue;
                }
            }
            let bytes = fs::read(&file.full_path)
                .with_context(|| format!("Failed to read {}", file.full_path.display()))?;
            let content_hash = format!("{:x}", Sha1::digest(&bytes));
            let hash_matches = snapshot
                .get(&file.relative_path)
                .map(|previous| previous.content_hash == content_hash)
                .unwrap_or(false);
            if hash_matches {
                refreshed.push((file.relative_path.clone(), file.modified_at, file.size));
                bump_skipped(entry);
                continue;
            }
            changed.push(PendingFile {
                content: String::from_utf8_lossy(&bytes).into_owned(),
                content_hash,
                file,
            });
        }

        set_phase(entry, IndexPhase::Embedding);
        {
            let mut state = entry.status.lock().unwrap();
            state.files_to_embed = changed.len();
        }
        self.emit_progress(entry, options);

        let concurrency = options.concurrency.unwrap_or(FILE_EMBED_CONCURRENCY).max(1);
        let batch_size = options.embed_batch_size.unwrap_or(EMBED_BATCH_SIZE).max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(concurrency)
            .build()
            .context("Failed to build indexing thread pool")?;

        let embedder = self.embedder.clone();
        let extractor = self.extractor.clone();
        let chunk_options = ChunkOptions::default();

        let upserts: Vec<FileUpsert> = pool.install(|| {
            changed
                .par_iter()
                .map(|pending| {
                    cancel.check()?;
                    let extension = extension_of(&pending.file.relative_path);
                    let drafts = chunk_source(
                        &pending.content,
                        &extension,
                        extractor.as_deref(),
                        &chunk_options,
                    );
                    let texts: Vec<String> =
                        drafts.iter().map(|draft| draft.content.clone()).collect();
                    let vectors = if texts.is_empty() {
                        Vec::new()
                    } else {
                        embed_in_batches(embedder.as_ref(), &texts, batch_size, cancel)?
                    };
                    let chunks: Vec<Chunk> = drafts
                        .into_iter()
                        .zip(vectors)
                        .enumerate()
                        .map(|(ordinal, (draft, embedding))| Chunk {
                            id: format!("{}::{}", pending.file.relative_path, ordinal),
                            file_path: pending.file.relative_path.clone(),
                            modified_at: pending.file.modified_at,
                            content: draft.content,
                            embedding,
                            symbols: (!draft.symbols.is_empty()).then_some(draft.symbols),
                        })
                        .collect();
                    let state = FileState {
                        modified_at: pending.file.modified_at,
                        size: pending.file.size,
                        content_hash: pending.content_hash.clone(),
                        chunk_ids: chunks.iter().map(|chunk| chunk.id.clone()).collect(),
                    };
                    {
                        let mut status = entry.status.lock().unwrap();
                        status.embedded_files += 1;
                    }
                    self.emit_progress(entry, options);
                    Ok(FileUpsert {
                        relative_path: pending.file.relative_path.clone(),
                        state,
                        chunks,
                    })
                })
                .collect::<Result<Vec<_>>>()
        })?;

        cancel.check()?;

        let mutated = !deleted.is_empty() || !upserts.is_empty();

        {
            let mut data = entry.data.write().unwrap();
            for path in &deleted {
                if let Some(state) = data.file_states.remove(path) {
                    for id in state.chunk_ids {
                        data.chunks.remove(&id);
                    }
                }
            }
            for (path, modified_at, size) in refreshed {
                if let Some(state) = data.file_states.get_mut(&path) {
                    state.modified_at = modified_at;
                    state.size = size;
                }
            }
            for upsert in upserts {
                if let Some(previous) = data.file_states.remove(&upsert.relative_path) {
                    for id in previous.chunk_ids {
                        data.chunks.remove(&id);
                    }
                }
                for chunk in upsert.chunks {
                    data.chunks.insert(chunk.id.clone(), chunk);
                }
                data.file_states.insert(upsert.relative_path, upsert.state);
            }
            if mutated {
                data.ann_index = LshAnnIndex::build(&data.chunks, &AnnParams::default());
                data.index_revision += 1;
                let root = entry.storage_root();
                storage::save(
                    &root,
                    &data.chunks,
                    &data.file_states,
                    Utc::now().timestamp_millis(),
                )?;
                data.db_size_bytes = storage::db_size_bytes(&root);
            }
            data.last_indexed_at = Some(Utc::now().timestamp_millis());
        }

        debug!(
            "Indexed {} in {:?} (mutated: {})",
            entry.folder_path,
            started.elapsed(),
            mutated
        );
        Ok(())
    }

    /// Current status for `folder`, refreshing drift counters at most once
    /// per `HEALTH_REFRESH_INTERVAL_MS`. Never mutates the index; drift
    /// errors zero the counters instead of propagating.
    pub fn status(&self, folder: &Path, output_folder: Option<&Path>) -> IndexStatus {
        let output = output_folder.map(|p| p.to_string_lossy().to_string());
        let entry = self
            .registry
            .acquire(&folder.to_string_lossy(), output.as_deref());
        entry.ensure_persisted_loaded();
        self.refresh_health(&entry);
        self.snapshot(&entry)
    }

    /// Drops the in-memory cache for `folder` and removes its storage
    /// directory.
    pub fn clear_folder(&self, folder: &Path, output_folder: Option<&Path>) {
        let folder_str = folder.to_string_lossy();
        let output = output_folder.map(|p| p.to_string_lossy().to_string());
        let root = match self.registry.remove(&folder_str, output.as_deref()) {
            Some(entry) => entry.storage_root(),
            None => {
                let normalized = crate::folder::normalize_folder_path(&folder_str);
                let storage = output
                    .as_deref()
                    .map(crate::folder::normalize_folder_path);
                storage::storage_root(&normalized, storage.as_deref())
            }
        };
        storage::clear(&root);
        debug!("Cleared folder cache for {}", folder_str);
    }

    fn refresh_health(&self, entry: &Arc<FolderEntry>) {
        let mut health = entry.health.lock().unwrap();
        let interval = Duration::from_millis(HEALTH_REFRESH_INTERVAL_MS);
        if health
            .last_checked
            .map(|at| at.elapsed() < interval)
            .unwrap_or(false)
        {
            return;
        }
        // concurrent callers queue on the health lock and then observe the
        // fresh stamp instead of recomputing
        let drift = self.compute_drift(entry);
        let mut state = entry.status.lock().unwrap();
        match drift {
            Ok((added, modified, deleted)) => {
                state.drift_added_files = added;
                state.drift_modified_files = modified;
                state.drift_deleted_files = deleted;
            }
            Err(err) => {
                warn!("folder" = %entry.folder_path, "error" = %err, "msg" = "drift refresh failed");
                state.drift_added_files = 0;
                state.drift_modified_files = 0;
                state.drift_deleted_files = 0;
            }
        }
        state.drift_checked_at = Some(Utc::now().timestamp_millis());
        health.last_checked = Some(Instant::now());
    }

    fn compute_drift(&self, entry: &FolderEntry) -> Result<(usize, usize, usize)> {
        let (include_extensions, exclude_folders) = {
            let config = entry.config.lock().unwrap();
            (
                config.include_extensions.clone(),
                config.exclude_folders.clone(),
            )
        };
        let scan_options = ScanOptions {
            include_extensions,
            exclude_folders,
            skip_files: default_skip_files(),
            max_file_size: MAX_FILE_BYTES,
        };
        let files = scan_folder(Path::new(&entry.folder_path), &scan_options)?;

        let data = entry.data.read().unwrap();
        let mut added = 0usize;
        let mut modified = 0usize;
        let mut seen: HashSet<&str> = HashSet::new();
        for file in &files {
            seen.insert(file.relative_path.as_str());
            match data.file_states.get(&file.relative_path) {
                None => added += 1,
                Some(previous)
                    if previous.modified_at != file.modified_at || previous.size != file.size =>
                {
                    modified += 1;
                }
                Some(_) => {}
            }
        }
        let deleted = data
            .file_states
            .keys()
            .filter(|path| !seen.contains(path.as_str()))
            .count();
        Ok((added, modified, deleted))
    }

    fn snapshot(&self, entry: &FolderEntry) -> IndexStatus {
        build_status(entry, self.registry.len())
    }

    fn emit_progress(&self, entry: &FolderEntry, options: &IndexOptions) {
        if let Some(callback) = &options.on_progress {
            callback(&self.snapshot(entry));
        }
    }
}

struct PendingFile {
    file: ScannedFile,
    content_hash: String,
    content: String,
}

struct FileUpsert {
    relative_path: String,
    state: FileState,
    chunks: Vec<Chunk>,
}

fn set_phase(entry: &FolderEntry, phase: IndexPhase) {
    entry.status.lock().unwrap().phase = phase;
}

fn bump_skipped(entry: &FolderEntry) {
    entry.status.lock().unwrap().skipped_unchanged += 1;
}

fn emit(options: &IndexOptions, status: &IndexStatus) {
    if let Some(callback) = &options.on_progress {
        callback(status);
    }
}

fn extension_of(relative_path: &str) -> String {
    let name = relative_path.rsplit('/').next().unwrap_or(relative_path);
    crate::scanner::file_extension(name).unwrap_or_default()
}
