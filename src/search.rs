//! The query path: normalized query keys, revision-checked result caching,
//! a query embedding cache, ANN candidate retrieval with brute-force
//! fallback, and exact cosine reranking.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Result};
use tracing::debug;

use crate::ann::{rank_candidates, AnnParams};
use crate::cancel::CancelToken;
use crate::config::{QUERY_RESULT_CACHE_TOP_K, TOP_K};
use crate::embedding::EmbeddingProvider;
use crate::folder::{CachedQueryResult, FolderEntry, FolderRegistry};

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub top_k: Option<usize>,
    pub output_folder: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchMatch {
    pub file_path: String,
    pub score: f32,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResult {
    pub matches: Vec<SearchMatch>,
    pub duration_ms: u64,
    pub total_chunks: usize,
}

pub struct Searcher {
    registry: Arc<FolderRegistry>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl Searcher {
    pub fn new(registry: Arc<FolderRegistry>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { registry, embedder }
    }

    pub fn search(&self, folder: &Path, query: &str, options: &SearchOptions) -> Result<SearchResult> {
        let started = Instant::now();
        let entry = self
            .registry
            .acquire(&folder.to_string_lossy(), options.output_folder.as_deref());
        entry.ensure_persisted_loaded();

        let top_k = options.top_k.unwrap_or(TOP_K).max(1);
        let enabled = entry.config.lock().unwrap().enabled;
        let total_chunks = entry.data.read().unwrap().chunks.len();
        let trimmed = query.trim();

        if !enabled || total_chunks == 0 || trimmed.is_empty() {
            return Ok(SearchResult {
                matches: Vec::new(),
                duration_ms: started.elapsed().as_millis() as u64,
                total_chunks,
            });
        }

        let query_key = normalize_query(query);

        // a cached ranking is only valid for the revision it was computed at
        {
            let revision = entry.data.read().unwrap().index_revision;
            let mut cache = entry.query_result_cache.lock().unwrap();
            if let Some(cached) = cache.get(&query_key) {
                if cached.revision == revision && cached.ranked.len() >= top_k {
                    let ranked = cached.ranked.clone();
                    drop(cache);
                    debug!("Result cache hit for \"{}\"", query_key);
                    return Ok(SearchResult {
                        matches: self.materialize(&entry, &ranked, top_k),
                        duration_ms: started.elapsed().as_millis() as u64,
                        total_chunks,
                    });
                }
            }
        }

        let embedding = {
            let cached = entry
                .query_embedding_cache
                .lock()
                .unwrap()
                .get(&query_key)
                .cloned();
            match cached {
                Some(vector) => vector,
                None => {
                    let texts = vec![trimmed.to_string()];
                    let vectors = self.embedder.embed(&texts, &CancelToken::new())?;
                    let vector = vectors
                        .into_iter()
                        .next()
                        .ok_or_else(|| anyhow!("embedding provider returned no vector for query"))?;
                    entry
                        .query_embedding_cache
                        .lock()
                        .unwrap()
                        .insert(query_key.clone(), vector.clone());
                    vector
                }
            }
        };

        let rerank_depth = top_k.max(QUERY_RESULT_CACHE_TOP_K);
        let (ranked, revision) = {
            let data = entry.data.read().unwrap();
            let params = AnnParams::default();
            let candidates = data
                .ann_index
                .as_ref()
                .and_then(|ann| ann.query(&embedding, &params));
            let ranked = match candidates {
                Some(ids) => {
                    debug!("ANN returned {} candidates", ids.len());
                    rank_candidates(
                        ids.iter().filter_map(|id| data.chunks.get(id)),
                        &embedding,
                        rerank_depth,
                    )
                }
                None => rank_candidates(data.chunks.values(), &embedding, rerank_depth),
            };
            (ranked, data.index_revision)
        };

        entry.query_result_cache.lock().unwrap().insert(
            query_key,
            CachedQueryResult {
                revision,
                ranked: ranked.clone(),
            },
        );

        Ok(SearchResult {
            matches: self.materialize(&entry, &ranked, top_k),
            duration_ms: started.elapsed().as_millis() as u64,
            total_chunks,
        })
    }

    /// Ranked snippets rendered as a prompt context block.
    pub fn context_for_query(
        &self,
        folder: &Path,
        query: &str,
        options: &SearchOptions,
    ) -> Result<String> {
        let result = self.search(folder, query, options)?;
        let mut out = String::from("## RAG Context (project files)\n");
        out.push_str("Use the following snippets as additional project context when relevant:\n\n");
        for matched in &result.matches {
            out.push_str("### ");
            out.push_str(&matched.file_path);
            out.push('\n');
            out.push_str(&matched.content);
            out.push('\n');
        }
        Ok(out)
    }

    /// Looks ranked ids back up in the live chunk map; ids that vanished in
    /// a racing index transaction are skipped.
    fn materialize(
        &self,
        entry: &FolderEntry,
        ranked: &[(String, f32)],
        top_k: usize,
    ) -> Vec<SearchMatch> {
        let data = entry.data.read().unwrap();
        ranked
            .iter()
            .filter_map(|(id, score)| {
                data.chunks.get(id).map(|chunk| SearchMatch {
                    file_path: chunk.file_path.clone(),
                    score: round3(*score),
                    content: chunk.content.clone(),
                })
            })
            .take(top_k)
            .collect()
    }
}

/// Lowercased, trimmed, inner whitespace collapsed to single spaces.
pub(crate) fn normalize_query(query: &str) -> String {
    query
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn round3(score: f32) -> f32 {
    (score * 1000.0).round() / 1000.0
}
