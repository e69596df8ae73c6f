//! ragrep: incremental RAG indexing and semantic search for folders.
//!
//! The pipeline scans a folder, detects drift through content hashing,
//! partitions changed files into symbol-aware chunks, embeds them through an
//! injected provider, persists everything as versioned JSON, and answers
//! similarity queries through sign-projection LSH with an exact cosine
//! rerank. Single writer per folder, in-process, durable on disk.

pub mod ann;
pub mod cache;
pub mod cancel;
pub mod chunker;
pub mod config;
pub mod embedding;
pub mod folder;
pub mod indexer;
pub mod scanner;
pub mod search;
pub mod storage;
pub mod vector;

pub use cancel::{CancelToken, Cancelled};
pub use chunker::{
    Chunk, ChunkDraft, ChunkOptions, CodeSymbol, Position, SymbolExtractor, SymbolKind,
    SymbolRange,
};
pub use embedding::EmbeddingProvider;
pub use indexer::{IndexOptions, IndexPhase, IndexStatus, Indexer, ProgressCallback};
pub use search::{SearchMatch, SearchOptions, SearchResult, Searcher};
pub use storage::FileState;
