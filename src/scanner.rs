//! Filtered directory walk producing candidate file metadata for the
//! indexer and the drift refresh.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use ignore::WalkBuilder;

use crate::config::{
    default_exclude_folders, default_include_extensions, default_skip_files, MAX_FILE_BYTES,
};

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub include_extensions: Vec<String>,
    pub exclude_folders: Vec<String>,
    pub skip_files: Vec<String>,
    pub max_file_size: u64,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            include_extensions: default_include_extensions(),
            exclude_folders: default_exclude_folders(),
            skip_files: default_skip_files(),
            max_file_size: MAX_FILE_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub relative_path: String,
    pub full_path: PathBuf,
    pub modified_at: i64,
    pub size: u64,
}

/// Walks the tree under `root`, pruning directories named in
/// `exclude_folders` and keeping files whose lowercased extension appears in
/// `include_extensions` and whose size fits `max_file_size`. Any walker or
/// metadata error aborts the scan.
pub fn scan_folder(root: &Path, options: &ScanOptions) -> Result<Vec<ScannedFile>> {
    let exclude: HashSet<String> = options.exclude_folders.iter().cloned().collect();
    let skip: HashSet<&String> = options.skip_files.iter().collect();
    let include: HashSet<String> = options
        .include_extensions
        .iter()
        .map(|ext| ext.to_ascii_lowercase())
        .collect();

    let mut builder = WalkBuilder::new(root);
    builder
        .standard_filters(false)
        .follow_links(false)
        .sort_by_file_path(|a, b| a.cmp(b));
    builder.filter_entry(move |entry| {
        if entry.depth() == 0 {
            return true;
        }
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if !is_dir {
            return true;
        }
        entry
            .file_name()
            .to_str()
            .map(|name| !exclude.contains(name))
            .unwrap_or(true)
    });

    let mut files = Vec::new();
    for entry in builder.build() {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if skip.contains(&name) {
            continue;
        }
        let Some(extension) = file_extension(&name) else {
            continue;
        };
        if !include.contains(&extension) {
            continue;
        }
        let metadata = entry
            .metadata()
            .with_context(|| format!("Failed to stat {}", entry.path().display()))?;
        if metadata.len() > options.max_file_size {
            continue;
        }
        let modified_at = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        let relative_path = relative_posix(entry.path(), root);
        files.push(ScannedFile {
            relative_path,
            full_path: entry.into_path(),
            modified_at,
            size: metadata.len(),
        });
    }
    Ok(files)
}

/// The final dot and everything after it, lowercased. Dotfiles such as
/// `.gitignore` report no extension.
pub fn file_extension(name: &str) -> Option<String> {
    let index = name.rfind('.')?;
    if index == 0 {
        return None;
    }
    Some(name[index..].to_ascii_lowercase())
}

/// Posix-relative rendering of `path` under `root`.
pub fn relative_posix(path: &Path, root: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
