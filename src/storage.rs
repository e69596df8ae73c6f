//! On-disk persistence: two versioned JSON files under `.rag-ts/`.
//!
//! The loader is deliberately forgiving. Missing or corrupt files yield
//! empty maps and indexing proceeds as if cold; a single invalid record is
//! dropped without poisoning the rest of the file.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::chunker::Chunk;

pub const STORAGE_DIR: &str = ".rag-ts";
pub const DB_FILE: &str = ".rag-db";
pub const INDEX_FILE: &str = ".rag-index";
const FORMAT_VERSION: u64 = 1;

/// Per-file bookkeeping used for incremental drift detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileState {
    pub modified_at: i64,
    pub size: u64,
    pub content_hash: String,
    pub chunk_ids: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DbFile<'a> {
    version: u64,
    chunks: Vec<&'a Chunk>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IndexFile<'a> {
    version: u64,
    updated_at: i64,
    files: &'a HashMap<String, FileState>,
}

#[derive(Debug, Default)]
pub struct LoadedState {
    pub chunks: HashMap<String, Chunk>,
    pub file_states: HashMap<String, FileState>,
    pub last_indexed_at: Option<i64>,
}

/// `{storage_path ?? folder_path}/.rag-ts`.
pub fn storage_root(folder_path: &str, storage_path: Option<&str>) -> PathBuf {
    PathBuf::from(storage_path.unwrap_or(folder_path)).join(STORAGE_DIR)
}

pub fn save(
    root: &Path,
    chunks: &HashMap<String, Chunk>,
    file_states: &HashMap<String, FileState>,
    updated_at: i64,
) -> Result<()> {
    fs::create_dir_all(root).with_context(|| format!("Failed to create {}", root.display()))?;

    let mut ordered: Vec<&Chunk> = chunks.values().collect();
    ordered.sort_by(|a, b| a.id.cmp(&b.id));
    let db = serde_json::to_vec(&DbFile {
        version: FORMAT_VERSION,
        chunks: ordered,
    })
    .context("Failed to serialize chunk database")?;
    write_replacing(&root.join(DB_FILE), &db)?;

    let index = serde_json::to_vec(&IndexFile {
        version: FORMAT_VERSION,
        updated_at,
        files: file_states,
    })
    .context("Failed to serialize file index")?;
    write_replacing(&root.join(INDEX_FILE), &index)?;

    Ok(())
}

// write-then-rename so a crash mid-save cannot truncate a good file
fn write_replacing(path: &Path, bytes: &[u8]) -> Result<()> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    let tmp = path.with_file_name(format!("{name}.tmp"));
    fs::write(&tmp, bytes).with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

/// Best-effort load of both files. Anything unreadable degrades to empty.
pub fn load(root: &Path) -> LoadedState {
    let mut state = LoadedState::default();

    if let Some(value) = read_json(&root.join(DB_FILE)) {
        if version_matches(&value) {
            if let Some(entries) = value.get("chunks").and_then(Value::as_array) {
                for entry in entries {
                    match serde_json::from_value::<Chunk>(entry.clone()) {
                        Ok(chunk) if !chunk.id.is_empty() => {
                            state.chunks.insert(chunk.id.clone(), chunk);
                        }
                        Ok(_) => {}
                        Err(err) => {
                            warn!("error" = %err, "msg" = "dropping invalid chunk record");
                        }
                    }
                }
            }
        }
    }

    if let Some(value) = read_json(&root.join(INDEX_FILE)) {
        if version_matches(&value) {
            state.last_indexed_at = value.get("updatedAt").and_then(finite_millis);
            if let Some(files) = value.get("files").and_then(Value::as_object) {
                for (path, entry) in files {
                    match serde_json::from_value::<FileState>(entry.clone()) {
                        Ok(file_state) => {
                            state.file_states.insert(path.clone(), file_state);
                        }
                        Err(err) => {
                            warn!("path" = %path, "error" = %err, "msg" = "dropping invalid file state");
                        }
                    }
                }
            }
        }
    }

    // every tracked chunk id must resolve into the chunk map
    for file_state in state.file_states.values_mut() {
        file_state
            .chunk_ids
            .retain(|id| state.chunks.contains_key(id));
    }

    state
}

fn read_json(path: &Path) -> Option<Value> {
    let bytes = fs::read(path).ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!("path" = %path.display(), "error" = %err, "msg" = "ignoring unparseable storage file");
            None
        }
    }
}

fn version_matches(value: &Value) -> bool {
    value.get("version").and_then(Value::as_u64) == Some(FORMAT_VERSION)
}

fn finite_millis(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
}

/// Size of the chunk database in bytes, `0` when absent.
pub fn db_size_bytes(root: &Path) -> u64 {
    fs::metadata(root.join(DB_FILE)).map(|m| m.len()).unwrap_or(0)
}

/// Recursively removes the storage directory; missing counts as success.
pub fn clear(root: &Path) {
    if let Err(err) = fs::remove_dir_all(root) {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!("path" = %root.display(), "error" = %err, "msg" = "failed to remove storage directory");
        }
    }
}
