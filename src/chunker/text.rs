use super::{ChunkDraft, ChunkOptions};

/// Deterministic fixed-size chunking with overlap. Line endings are
/// normalized to `\n` and every emitted chunk is individually trimmed.
/// Sizes are measured in characters so multi-byte input never splits a
/// UTF-8 sequence.
pub fn chunk_text(source: &str, options: &ChunkOptions) -> Vec<ChunkDraft> {
    let normalized = source.replace("\r\n", "\n");
    let trimmed = normalized.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let chunk_size = options.chunk_size.max(1);
    let chars: Vec<char> = trimmed.chars().collect();
    let mut drafts = Vec::new();
    let mut start = 0usize;

    loop {
        let end = usize::min(start + chunk_size, chars.len());
        let piece: String = chars[start..end].iter().collect();
        let piece = piece.trim();
        if !piece.is_empty() {
            drafts.push(ChunkDraft {
                content: piece.to_string(),
                symbols: Vec::new(),
            });
        }
        if end >= chars.len() {
            break;
        }
        start = usize::max(start + 1, end.saturating_sub(options.chunk_overlap));
    }

    drafts
}
