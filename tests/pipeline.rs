// End-to-end pipeline tests: index lifecycle, incremental re-index, the
// ANN query path, cancellation, storage redirection and corrupt-storage
// recovery, all driven through the public API with deterministic embedders.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tempfile::TempDir;

use ragrep::ann::{AnnParams, LshAnnIndex};
use ragrep::{
    CancelToken, Chunk, EmbeddingProvider, IndexOptions, IndexPhase, Indexer, SearchOptions,
};

/// Embeds text as keyword counts plus a length component, so similarity is
/// exact and reproducible: `[n("alpha"), n("beta"), n("gamma"), len/100]`.
struct KeywordEmbedder;

impl EmbeddingProvider for KeywordEmbedder {
    fn embed(&self, texts: &[String], _cancel: &CancelToken) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let lower = text.to_lowercase();
                vec![
                    lower.matches("alpha").count() as f32,
                    lower.matches("beta").count() as f32,
                    lower.matches("gamma").count() as f32,
                    text.len() as f32 / 100.0,
                ]
            })
            .collect())
    }
}

fn write_docs(root: &Path, files: &[(&str, &str)]) {
    for (name, content) in files {
        let path = root.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }
}

#[test]
fn incremental_no_op_keeps_revision_and_disk_untouched() {
    let temp = TempDir::new().unwrap();
    write_docs(temp.path(), &[("docs/a.md", "alpha content and context")]);

    let indexer = Indexer::new(Arc::new(KeywordEmbedder));
    let first = indexer.index(temp.path(), IndexOptions::default());
    assert_eq!(first.phase, IndexPhase::Ready);
    assert_eq!(first.total_files, 1);
    assert!(first.total_chunks >= 1);

    let entry = indexer
        .registry()
        .acquire(&temp.path().to_string_lossy(), None);
    let revision_before = entry.data.read().unwrap().index_revision;
    let db_path = temp.path().join(".rag-ts/.rag-db");
    let mtime_before = fs::metadata(&db_path).unwrap().modified().unwrap();

    // identical bytes, possibly fresh mtime: the hash gate must catch it
    write_docs(temp.path(), &[("docs/a.md", "alpha content and context")]);
    let second = indexer.index(temp.path(), IndexOptions::default());

    assert_eq!(second.phase, IndexPhase::Ready);
    assert!(second.skipped_unchanged >= 1);
    assert_eq!(entry.data.read().unwrap().index_revision, revision_before);
    assert_eq!(fs::metadata(&db_path).unwrap().modified().unwrap(), mtime_before);
}

#[test]
fn lsh_returns_exact_bucket_matches_and_rejects_foreign_dimensions() {
    let params = AnnParams {
        projection_dim: 8,
        max_hamming_distance: 0,
        fallback_min_candidates: 1,
        max_rerank_candidates: 1200,
    };
    let chunks: std::collections::HashMap<String, Chunk> = [
        ("c1", vec![1.0, 0.0, 0.0]),
        ("c2", vec![0.0, 1.0, 0.0]),
    ]
    .into_iter()
    .map(|(id, embedding)| {
        (
            id.to_string(),
            Chunk {
                id: id.to_string(),
                file_path: format!("{}.md", id),
                modified_at: 0,
                content: id.to_string(),
                embedding,
                symbols: None,
            },
        )
    })
    .collect();

    let index = LshAnnIndex::build(&chunks, &params).unwrap();
    let hits = index.query(&[1.0, 0.0, 0.0], &params).unwrap();
    assert!(hits.iter().any(|id| id == "c1"));

    assert!(index.query(&[1.0, 2.0, 3.0, 4.0], &params).is_none());
}

#[test]
fn search_finds_the_semantically_closest_file() {
    let temp = TempDir::new().unwrap();
    write_docs(
        temp.path(),
        &[
            ("docs/alpha.md", "alpha system architecture"),
            ("docs/beta.md", "beta deployment notes"),
        ],
    );

    let indexer = Indexer::new(Arc::new(KeywordEmbedder));
    let status = indexer.index(temp.path(), IndexOptions::default());
    assert_eq!(status.phase, IndexPhase::Ready);
    assert_eq!(status.total_files, 2);

    let searcher = indexer.searcher();
    let result = searcher
        .search(
            temp.path(),
            "alpha",
            &SearchOptions {
                top_k: Some(1),
                ..SearchOptions::default()
            },
        )
        .unwrap();

    assert_eq!(result.matches.len(), 1);
    assert_eq!(result.matches[0].file_path, "docs/alpha.md");
    assert!(result.matches[0].score > 0.0);
    assert_eq!(result.total_chunks, 2);
}

#[test]
fn blank_queries_and_unindexed_folders_return_empty_results() {
    let temp = TempDir::new().unwrap();
    write_docs(temp.path(), &[("docs/alpha.md", "alpha system architecture")]);

    let indexer = Indexer::new(Arc::new(KeywordEmbedder));
    indexer.index(temp.path(), IndexOptions::default());
    let searcher = indexer.searcher();

    let blank = searcher
        .search(temp.path(), "   \t ", &SearchOptions::default())
        .unwrap();
    assert!(blank.matches.is_empty());
    assert_eq!(blank.total_chunks, 1);

    let other = TempDir::new().unwrap();
    let cold = searcher
        .search(other.path(), "alpha", &SearchOptions::default())
        .unwrap();
    assert!(cold.matches.is_empty());
    assert_eq!(cold.total_chunks, 0);
}

#[test]
fn result_cache_is_invalidated_by_reindexing() {
    let temp = TempDir::new().unwrap();
    write_docs(temp.path(), &[("docs/a.md", "alpha original")]);

    let indexer = Indexer::new(Arc::new(KeywordEmbedder));
    indexer.index(temp.path(), IndexOptions::default());
    let searcher = indexer.searcher();

    let before = searcher
        .search(temp.path(), "alpha", &SearchOptions::default())
        .unwrap();
    assert_eq!(before.matches[0].content, "alpha original");

    write_docs(temp.path(), &[("docs/a.md", "alpha rewritten entirely")]);
    indexer.index(temp.path(), IndexOptions::default());

    let after = searcher
        .search(temp.path(), "alpha", &SearchOptions::default())
        .unwrap();
    assert_eq!(after.matches[0].content, "alpha rewritten entirely");
}

#[test]
fn cancellation_mid_run_persists_nothing() {
    struct TrippingEmbedder {
        cancel: CancelToken,
        calls: AtomicUsize,
    }

    impl EmbeddingProvider for TrippingEmbedder {
        fn embed(&self, texts: &[String], _cancel: &CancelToken) -> Result<Vec<Vec<f32>>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) + 1 >= 2 {
                self.cancel.cancel();
            }
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    let temp = TempDir::new().unwrap();
    let files: Vec<(String, String)> = (0..10)
        .map(|i| (format!("docs/f{}.md", i), format!("document number {}", i)))
        .collect();
    let borrowed: Vec<(&str, &str)> = files
        .iter()
        .map(|(name, content)| (name.as_str(), content.as_str()))
        .collect();
    write_docs(temp.path(), &borrowed);

    let cancel = CancelToken::new();
    let indexer = Indexer::new(Arc::new(TrippingEmbedder {
        cancel: cancel.clone(),
        calls: AtomicUsize::new(0),
    }));

    let status = indexer.index(
        temp.path(),
        IndexOptions {
            cancel: Some(cancel),
            ..IndexOptions::default()
        },
    );

    assert_eq!(status.phase, IndexPhase::Idle);
    assert!(status
        .message
        .as_deref()
        .unwrap_or_default()
        .contains("cancelled"));
    assert!(!temp.path().join(".rag-ts").exists());
}

#[test]
fn output_folder_redirection_separates_storage_and_lookup() {
    let folder_a = TempDir::new().unwrap();
    let folder_b = TempDir::new().unwrap();
    write_docs(folder_a.path(), &[("docs/alpha.md", "alpha system architecture")]);

    let indexer = Indexer::new(Arc::new(KeywordEmbedder));
    let status = indexer.index(
        folder_a.path(),
        IndexOptions {
            output_folder: Some(folder_b.path().to_string_lossy().to_string()),
            ..IndexOptions::default()
        },
    );
    assert_eq!(status.phase, IndexPhase::Ready);

    assert!(folder_b.path().join(".rag-ts/.rag-db").exists());
    assert!(!folder_a.path().join(".rag-ts").exists());

    let searcher = indexer.searcher();
    let redirected = searcher
        .search(
            folder_a.path(),
            "alpha",
            &SearchOptions {
                output_folder: Some(folder_b.path().to_string_lossy().to_string()),
                ..SearchOptions::default()
            },
        )
        .unwrap();
    assert_eq!(redirected.matches.len(), 1);

    let plain = searcher
        .search(folder_a.path(), "alpha", &SearchOptions::default())
        .unwrap();
    assert!(plain.matches.is_empty());
}

#[test]
fn corrupt_storage_is_recovered_by_reindexing() {
    let temp = TempDir::new().unwrap();
    write_docs(temp.path(), &[("docs/alpha.md", "alpha system architecture")]);

    let storage = temp.path().join(".rag-ts");
    fs::create_dir_all(&storage).unwrap();
    fs::write(storage.join(".rag-db"), "{ broken").unwrap();
    fs::write(storage.join(".rag-index"), "{ broken").unwrap();

    let indexer = Indexer::new(Arc::new(KeywordEmbedder));
    let status = indexer.index(temp.path(), IndexOptions::default());

    assert_eq!(status.phase, IndexPhase::Ready);
    assert_eq!(status.total_files, 1);
    assert!(status.total_chunks >= 1);

    let searcher = indexer.searcher();
    let result = searcher
        .search(temp.path(), "alpha", &SearchOptions::default())
        .unwrap();
    assert_eq!(result.matches.len(), 1);
}

#[test]
fn persisted_index_is_loaded_by_a_fresh_process() {
    let temp = TempDir::new().unwrap();
    write_docs(
        temp.path(),
        &[
            ("docs/alpha.md", "alpha system architecture"),
            ("docs/beta.md", "beta deployment notes"),
        ],
    );

    {
        let indexer = Indexer::new(Arc::new(KeywordEmbedder));
        indexer.index(temp.path(), IndexOptions::default());
    }

    // a fresh registry simulates a new process loading from disk
    let indexer = Indexer::new(Arc::new(KeywordEmbedder));
    let searcher = indexer.searcher();
    let result = searcher
        .search(
            temp.path(),
            "beta",
            &SearchOptions {
                top_k: Some(1),
                ..SearchOptions::default()
            },
        )
        .unwrap();

    assert_eq!(result.matches.len(), 1);
    assert_eq!(result.matches[0].file_path, "docs/beta.md");
}

#[test]
fn context_block_has_the_expected_shape() {
    let temp = TempDir::new().unwrap();
    write_docs(temp.path(), &[("docs/alpha.md", "alpha system architecture")]);

    let indexer = Indexer::new(Arc::new(KeywordEmbedder));
    indexer.index(temp.path(), IndexOptions::default());

    let context = indexer
        .searcher()
        .context_for_query(temp.path(), "alpha", &SearchOptions::default())
        .unwrap();

    assert!(context.starts_with("## RAG Context (project files)\n"));
    assert!(context
        .contains("Use the following snippets as additional project context when relevant:\n\n"));
    assert!(context.contains("### docs/alpha.md\nalpha system architecture\n"));
}

#[test]
fn clear_folder_forgets_everything() {
    let temp = TempDir::new().unwrap();
    write_docs(temp.path(), &[("docs/alpha.md", "alpha system architecture")]);

    let indexer = Indexer::new(Arc::new(KeywordEmbedder));
    indexer.index(temp.path(), IndexOptions::default());
    indexer.clear_folder(temp.path(), None);

    assert!(!temp.path().join(".rag-ts").exists());
    let result = indexer
        .searcher()
        .search(temp.path(), "alpha", &SearchOptions::default())
        .unwrap();
    assert!(result.matches.is_empty());
}
