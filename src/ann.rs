//! Sign-projection LSH over chunk embeddings.
//!
//! Embeddings are reduced to short binary signatures through a deterministic
//! random projection; buckets keyed by signature give sublinear candidate
//! retrieval, and the exact cosine rerank runs only over the candidate set.

use std::collections::{HashMap, HashSet};

use crate::chunker::Chunk;
use crate::config::{
    ANN_FALLBACK_MIN_CANDIDATES, ANN_MAX_HAMMING_DISTANCE, ANN_MAX_RERANK_CANDIDATES,
    ANN_PROJECTION_DIM,
};
use crate::vector::{cosine_similarity, projection_matrix};

#[derive(Debug, Clone, Copy)]
pub struct AnnParams {
    pub projection_dim: usize,
    pub max_hamming_distance: usize,
    pub fallback_min_candidates: usize,
    pub max_rerank_candidates: usize,
}

impl Default for AnnParams {
    fn default() -> Self {
        Self {
            projection_dim: ANN_PROJECTION_DIM,
            max_hamming_distance: ANN_MAX_HAMMING_DISTANCE,
            fallback_min_candidates: ANN_FALLBACK_MIN_CANDIDATES,
            max_rerank_candidates: ANN_MAX_RERANK_CANDIDATES,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LshAnnIndex {
    dimensions: usize,
    projection: Vec<Vec<f32>>,
    buckets: HashMap<String, Vec<String>>,
}

impl LshAnnIndex {
    /// Builds an index over the current chunk set. Requires at least one
    /// chunk with a non-empty embedding; chunks whose embedding length
    /// disagrees with the first are skipped.
    pub fn build(chunks: &HashMap<String, Chunk>, params: &AnnParams) -> Option<Self> {
        let mut ids: Vec<&String> = chunks.keys().collect();
        ids.sort();
        let first = ids.first().and_then(|id| chunks.get(*id))?;
        if first.embedding.is_empty() {
            return None;
        }
        let dimensions = first.embedding.len();
        let projection = projection_matrix(dimensions, params.projection_dim.max(1));

        let mut buckets: HashMap<String, Vec<String>> = HashMap::new();
        for id in ids {
            let chunk = &chunks[id];
            if chunk.embedding.len() != dimensions {
                continue;
            }
            let signature = signature_string(&chunk.embedding, &projection);
            buckets.entry(signature).or_default().push(id.clone());
        }

        Some(Self {
            dimensions,
            projection,
            buckets,
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn signature(&self, embedding: &[f32]) -> String {
        signature_string(embedding, &self.projection)
    }

    /// Candidate chunk ids for `query_embedding`, probing every bucket whose
    /// signature lies within the Hamming bound (exact, 1-flip and 2-flip
    /// probes). Returns `None` on a dimension mismatch or when the candidate
    /// set is too small to be worth reranking; callers then brute-force over
    /// the full chunk set.
    pub fn query(&self, query_embedding: &[f32], params: &AnnParams) -> Option<Vec<String>> {
        if query_embedding.len() != self.dimensions {
            return None;
        }

        let mut bits = self.signature(query_embedding).into_bytes();
        let limit = params.max_rerank_candidates.max(1);
        let mut candidates: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        let mut full = self.collect_bucket(&bits, &mut candidates, &mut seen, limit);

        if !full && params.max_hamming_distance >= 1 {
            for i in 0..bits.len() {
                flip(&mut bits, i);
                full = self.collect_bucket(&bits, &mut candidates, &mut seen, limit);
                flip(&mut bits, i);
                if full {
                    break;
                }
            }
        }

        if !full && params.max_hamming_distance >= 2 {
            'pairs: for i in 0..bits.len() {
                for j in (i + 1)..bits.len() {
                    flip(&mut bits, i);
                    flip(&mut bits, j);
                    full = self.collect_bucket(&bits, &mut candidates, &mut seen, limit);
                    flip(&mut bits, j);
                    flip(&mut bits, i);
                    if full {
                        break 'pairs;
                    }
                }
            }
        }

        if candidates.len() < params.fallback_min_candidates {
            return None;
        }
        Some(candidates)
    }

    fn collect_bucket(
        &self,
        signature: &[u8],
        candidates: &mut Vec<String>,
        seen: &mut HashSet<String>,
        limit: usize,
    ) -> bool {
        if candidates.len() >= limit {
            return true;
        }
        let key = match std::str::from_utf8(signature) {
            Ok(key) => key,
            Err(_) => return false,
        };
        if let Some(ids) = self.buckets.get(key) {
            for id in ids {
                if candidates.len() >= limit {
                    return true;
                }
                if seen.insert(id.clone()) {
                    candidates.push(id.clone());
                }
            }
        }
        candidates.len() >= limit
    }
}

fn signature_string(embedding: &[f32], projection: &[Vec<f32>]) -> String {
    projection
        .iter()
        .map(|row| {
            let dot: f32 = row.iter().zip(embedding).map(|(a, b)| a * b).sum();
            if dot >= 0.0 {
                '1'
            } else {
                '0'
            }
        })
        .collect()
}

fn flip(bits: &mut [u8], index: usize) {
    bits[index] = if bits[index] == b'1' { b'0' } else { b'1' };
}

/// Exact cosine rerank: scores every candidate, drops non-positive scores,
/// and returns the best `top_k` as `(chunk id, score)` pairs.
pub fn rank_candidates<'a, I>(chunks: I, query_embedding: &[f32], top_k: usize) -> Vec<(String, f32)>
where
    I: IntoIterator<Item = &'a Chunk>,
{
    let mut scored: Vec<(String, f32)> = chunks
        .into_iter()
        .filter_map(|chunk| {
            let score = cosine_similarity(&chunk.embedding, query_embedding);
            (score > 0.0).then(|| (chunk.id.clone(), score))
        })
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(top_k);
    scored
}
