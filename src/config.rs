//! Shared defaults for the indexing pipeline and the query path.

pub const CHUNK_SIZE: usize = 1200;
pub const CHUNK_OVERLAP: usize = 200;
pub const MIN_CHUNK_SIZE: usize = 200;

pub const EMBED_BATCH_SIZE: usize = 16;
pub const FILE_EMBED_CONCURRENCY: usize = 2;
pub const MAX_FILE_BYTES: u64 = 1_048_576;

pub const TOP_K: usize = 6;
pub const QUERY_CACHE_TTL_MS: u64 = 600_000;
pub const QUERY_EMBED_CACHE_MAX: usize = 128;
pub const QUERY_RESULT_CACHE_MAX: usize = 64;
pub const QUERY_RESULT_CACHE_TOP_K: usize = 24;

pub const ANN_PROJECTION_DIM: usize = 16;
pub const ANN_MAX_HAMMING_DISTANCE: usize = 3;
pub const ANN_FALLBACK_MIN_CANDIDATES: usize = 32;
pub const ANN_MAX_RERANK_CANDIDATES: usize = 1200;

pub const HEALTH_REFRESH_INTERVAL_MS: u64 = 15_000;
pub const STALE_INDEX_THRESHOLD_MS: u64 = 1_800_000;

pub const DEFAULT_INCLUDE_EXTENSIONS: &[&str] = &[
    ".ts", ".tsx", ".js", ".jsx", ".mjs", ".cjs", ".rs", ".py", ".go", ".java", ".kt", ".c",
    ".h", ".cpp", ".hpp", ".cs", ".rb", ".php", ".swift", ".scala", ".sh", ".sql", ".html",
    ".css", ".scss", ".json", ".yaml", ".yml", ".toml", ".md", ".mdx", ".txt",
];

pub const DEFAULT_EXCLUDE_FOLDERS: &[&str] = &[
    "node_modules",
    ".git",
    "dist",
    "build",
    "out",
    "target",
    "coverage",
    ".next",
    ".venv",
    "venv",
    "__pycache__",
    ".idea",
    ".vscode",
    ".rag-ts",
];

pub const DEFAULT_SKIP_FILES: &[&str] = &[
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "Cargo.lock",
    ".DS_Store",
];

pub fn default_include_extensions() -> Vec<String> {
    DEFAULT_INCLUDE_EXTENSIONS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub fn default_exclude_folders() -> Vec<String> {
    DEFAULT_EXCLUDE_FOLDERS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub fn default_skip_files() -> Vec<String> {
    DEFAULT_SKIP_FILES.iter().map(|s| s.to_string()).collect()
}
