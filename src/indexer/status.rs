use std::fmt;

use chrono::Utc;
use serde::Serialize;

use crate::config::STALE_INDEX_THRESHOLD_MS;
use crate::folder::FolderEntry;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexPhase {
    #[default]
    Idle,
    Scanning,
    Embedding,
    Ready,
    Error,
}

impl fmt::Display for IndexPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IndexPhase::Idle => "idle",
            IndexPhase::Scanning => "scanning",
            IndexPhase::Embedding => "embedding",
            IndexPhase::Ready => "ready",
            IndexPhase::Error => "error",
        };
        f.write_str(name)
    }
}

/// Point-in-time snapshot of a folder's index state, as reported by
/// `Indexer::index` and `Indexer::status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStatus {
    pub folder_path: String,
    pub enabled: bool,
    pub phase: IndexPhase,
    pub total_files: usize,
    pub files_to_embed: usize,
    pub embedded_files: usize,
    pub skipped_unchanged: usize,
    pub total_chunks: usize,
    pub db_size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_indexed_at: Option<i64>,
    pub stale_warning: bool,
    pub stale_age_ms: i64,
    pub stale_threshold_ms: u64,
    pub file_change_drift: usize,
    pub drift_added_files: usize,
    pub drift_modified_files: usize,
    pub drift_deleted_files: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drift_checked_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub include_extensions: Vec<String>,
    pub exclude_folders: Vec<String>,
    pub cached_folders: usize,
}

impl IndexStatus {
    pub(crate) fn empty(folder_path: &str) -> Self {
        Self {
            folder_path: folder_path.to_string(),
            enabled: true,
            phase: IndexPhase::Idle,
            total_files: 0,
            files_to_embed: 0,
            embedded_files: 0,
            skipped_unchanged: 0,
            total_chunks: 0,
            db_size_bytes: 0,
            last_indexed_at: None,
            stale_warning: false,
            stale_age_ms: 0,
            stale_threshold_ms: STALE_INDEX_THRESHOLD_MS,
            file_change_drift: 0,
            drift_added_files: 0,
            drift_modified_files: 0,
            drift_deleted_files: 0,
            drift_checked_at: None,
            message: None,
            include_extensions: Vec::new(),
            exclude_folders: Vec::new(),
            cached_folders: 0,
        }
    }
}

pub(crate) fn build_status(entry: &FolderEntry, cached_folders: usize) -> IndexStatus {
    let config = entry.config.lock().unwrap().clone();
    let state = entry.status.lock().unwrap().clone();
    let data = entry.data.read().unwrap();

    let now = Utc::now().timestamp_millis();
    let stale_age_ms = data
        .last_indexed_at
        .map(|at| (now - at).max(0))
        .unwrap_or(0);
    let stale_warning = data
        .last_indexed_at
        .map(|at| now - at > STALE_INDEX_THRESHOLD_MS as i64)
        .unwrap_or(false);

    IndexStatus {
        folder_path: entry.folder_path.clone(),
        enabled: config.enabled,
        phase: state.phase,
        total_files: state.total_files,
        files_to_embed: state.files_to_embed,
        embedded_files: state.embedded_files,
        skipped_unchanged: state.skipped_unchanged,
        total_chunks: data.chunks.len(),
        db_size_bytes: data.db_size_bytes,
        last_indexed_at: data.last_indexed_at,
        stale_warning,
        stale_age_ms,
        stale_threshold_ms: STALE_INDEX_THRESHOLD_MS,
        file_change_drift: state.drift_added_files
            + state.drift_modified_files
            + state.drift_deleted_files,
        drift_added_files: state.drift_added_files,
        drift_modified_files: state.drift_modified_files,
        drift_deleted_files: state.drift_deleted_files,
        drift_checked_at: state.drift_checked_at,
        message: state.message,
        include_extensions: config.include_extensions,
        exclude_folders: config.exclude_folders,
        cached_folders,
    }
}
