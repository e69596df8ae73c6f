//! Chunk data model and the symbol-aware / plain-text chunkers.
//!
//! Code files are partitioned along extracted symbol spans so a chunk holds
//! whole declarations where possible; everything else falls back to
//! fixed-size text chunking with overlap.

mod code;
mod language;
mod text;

pub use code::chunk_code;
pub use language::language_for_extension;
pub use text::chunk_text;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::config::{CHUNK_OVERLAP, CHUNK_SIZE, MIN_CHUNK_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolRange {
    pub start: Position,
    pub end: Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Class,
    Method,
    Interface,
    Type,
    Enum,
    Module,
    Variable,
    Import,
    Export,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeSymbol {
    pub name: String,
    pub kind: SymbolKind,
    pub name_range: SymbolRange,
    pub content_range: SymbolRange,
}

/// A persisted chunk: a trimmed fragment of one file plus its embedding.
/// `id` is `"{relative_path}::{ordinal}"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub id: String,
    pub file_path: String,
    pub modified_at: i64,
    pub content: String,
    pub embedding: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbols: Option<Vec<CodeSymbol>>,
}

/// A chunk before embedding: trimmed text plus the symbols it covers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkDraft {
    pub content: String,
    pub symbols: Vec<CodeSymbol>,
}

#[derive(Debug, Clone, Copy)]
pub struct ChunkOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_chunk_size: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            chunk_overlap: CHUNK_OVERLAP,
            min_chunk_size: MIN_CHUNK_SIZE,
        }
    }
}

/// Produces `{name, kind, ranges}` records from source text. Implementations
/// typically wrap a tree-sitter parser; an `Err` means "no symbols" and the
/// caller falls back to text chunking for that file.
pub trait SymbolExtractor: Send + Sync {
    fn extract_symbols(&self, source: &str, language: &str) -> Result<Vec<CodeSymbol>>;
}

/// Chunk `source` for a file with the given extension, using the code
/// chunker when the extension maps to a known language profile and an
/// extractor is available.
pub fn chunk_source(
    source: &str,
    extension: &str,
    extractor: Option<&dyn SymbolExtractor>,
    options: &ChunkOptions,
) -> Vec<ChunkDraft> {
    if let (Some(language), Some(extractor)) = (language_for_extension(extension), extractor) {
        return chunk_code(source, language, extractor, options);
    }
    chunk_text(source, options)
}
