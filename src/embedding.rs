//! The embedding provider seam. The core never talks to a model or a
//! network directly; callers inject any `EmbeddingProvider` and the indexer
//! batches texts through it.

use anyhow::{anyhow, Result};

use crate::cancel::CancelToken;

pub trait EmbeddingProvider: Send + Sync {
    /// Embed `texts`, returning exactly one vector per input in order.
    /// Implementations should honor `cancel` for long-running calls.
    fn embed(&self, texts: &[String], cancel: &CancelToken) -> Result<Vec<Vec<f32>>>;
}

/// Feeds `texts` to the provider in batches of at most `batch_size`,
/// checking the token before each call. The provider is never invoked with
/// an empty slice.
pub fn embed_in_batches(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    batch_size: usize,
    cancel: &CancelToken,
) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }
    let batch_size = batch_size.max(1);
    let mut vectors = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size) {
        cancel.check()?;
        let mut out = provider.embed(batch, cancel)?;
        if out.len() != batch.len() {
            return Err(anyhow!(
                "embedding provider returned {} vectors for {} texts",
                out.len(),
                batch.len()
            ));
        }
        vectors.append(&mut out);
    }
    Ok(vectors)
}
