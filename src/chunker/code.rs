use tracing::warn;

use super::text::chunk_text;
use super::{ChunkDraft, ChunkOptions, CodeSymbol, SymbolExtractor};

/// Symbol-aware chunking: walks the extracted symbol spans in source order,
/// packing gap text and symbol text into chunks of at most `chunk_size`
/// characters. Extraction failures and symbol-free files fall back to plain
/// text chunking.
pub fn chunk_code(
    source: &str,
    language: &str,
    extractor: &dyn SymbolExtractor,
    options: &ChunkOptions,
) -> Vec<ChunkDraft> {
    let symbols = match extractor.extract_symbols(source, language) {
        Ok(symbols) => symbols,
        Err(err) => {
            warn!(
                "language" = language,
                "error" = %err,
                "msg" = "symbol extraction failed, falling back to text chunking"
            );
            return chunk_text(source, options);
        }
    };

    let mut spans: Vec<CodeSymbol> = symbols
        .into_iter()
        .filter_map(|symbol| clamp_span(symbol, source))
        .collect();
    spans.sort_by(|a, b| {
        a.content_range
            .start
            .offset
            .cmp(&b.content_range.start.offset)
            .then(a.content_range.end.offset.cmp(&b.content_range.end.offset))
    });

    let mut builder = ChunkBuilder::new(options);
    let mut cursor = 0usize;

    for span in spans {
        let start = span.content_range.start.offset;
        let end = span.content_range.end.offset;
        if start > cursor {
            builder.append(slice(source, cursor, start).trim(), None);
        }
        builder.append(slice(source, start, end).trim(), Some(span));
        cursor = cursor.max(end);
    }

    let mut drafts = builder.finish();

    if cursor < source.len() {
        let tail = slice(source, cursor, source.len());
        if !tail.trim().is_empty() {
            drafts.extend(chunk_text(tail, options));
        }
    }

    if drafts.is_empty() {
        return chunk_text(source, options);
    }

    merge_small_chunks(drafts, options)
}

struct ChunkBuilder<'a> {
    options: &'a ChunkOptions,
    drafts: Vec<ChunkDraft>,
    pending: String,
    pending_symbols: Vec<CodeSymbol>,
}

impl<'a> ChunkBuilder<'a> {
    fn new(options: &'a ChunkOptions) -> Self {
        Self {
            options,
            drafts: Vec::new(),
            pending: String::new(),
            pending_symbols: Vec::new(),
        }
    }

    fn append(&mut self, text: &str, symbol: Option<CodeSymbol>) {
        if text.is_empty() {
            return;
        }
        let would_hold = char_len(&self.pending) + char_len(text) + 1;
        if !self.pending.is_empty() && would_hold > self.options.chunk_size {
            self.flush();
        }
        if !self.pending.is_empty() {
            self.pending.push('\n');
        }
        self.pending.push_str(text);
        if let Some(symbol) = symbol {
            self.pending_symbols.push(symbol);
        }
    }

    fn flush(&mut self) {
        let content = self.pending.trim().to_string();
        let symbols = std::mem::take(&mut self.pending_symbols);
        self.pending.clear();
        if content.is_empty() {
            return;
        }
        if char_len(&content) > self.options.chunk_size {
            // an oversized declaration splits like plain text, every piece
            // keeping the accumulated symbol metadata
            for piece in chunk_text(&content, self.options) {
                self.drafts.push(ChunkDraft {
                    content: piece.content,
                    symbols: symbols.clone(),
                });
            }
        } else {
            self.drafts.push(ChunkDraft { content, symbols });
        }
    }

    fn finish(mut self) -> Vec<ChunkDraft> {
        self.flush();
        self.drafts
    }
}

/// Clamps a symbol's content span into the source and snaps the offsets to
/// char boundaries; zero-length and backward spans are dropped.
fn clamp_span(mut symbol: CodeSymbol, source: &str) -> Option<CodeSymbol> {
    let len = source.len();
    let start = floor_char_boundary(source, symbol.content_range.start.offset.min(len));
    let end = floor_char_boundary(source, symbol.content_range.end.offset.min(len));
    if end <= start {
        return None;
    }
    symbol.content_range.start.offset = start;
    symbol.content_range.end.offset = end;
    Some(symbol)
}

fn floor_char_boundary(source: &str, mut index: usize) -> usize {
    while index > 0 && !source.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn slice(source: &str, start: usize, end: usize) -> &str {
    let start = floor_char_boundary(source, start.min(source.len()));
    let end = floor_char_boundary(source, end.min(source.len()));
    if end <= start {
        return "";
    }
    &source[start..end]
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Folds chunks shorter than `min_chunk_size` into their neighbours so tiny
/// declarations do not become standalone chunks.
fn merge_small_chunks(drafts: Vec<ChunkDraft>, options: &ChunkOptions) -> Vec<ChunkDraft> {
    if drafts.len() <= 1 || options.min_chunk_size == 0 {
        return drafts;
    }

    let mut merged: Vec<ChunkDraft> = Vec::new();
    for draft in drafts {
        if char_len(&draft.content) < options.min_chunk_size {
            if let Some(previous) = merged.last_mut() {
                previous.content.push('\n');
                previous.content.push_str(&draft.content);
                previous.symbols.extend(draft.symbols);
                continue;
            }
        }
        merged.push(draft);
    }

    // a short straggler at the end folds backward into its predecessor
    if merged.len() >= 2 {
        let tail_short = merged
            .last()
            .map(|draft| char_len(&draft.content) < options.min_chunk_size)
            .unwrap_or(false);
        if tail_short {
            if let Some(tail) = merged.pop() {
                if let Some(previous) = merged.last_mut() {
                    previous.content.push('\n');
                    previous.content.push_str(&tail.content);
                    previous.symbols.extend(tail.symbols);
                }
            }
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::{Position, SymbolKind, SymbolRange};
    use anyhow::anyhow;

    fn span(start: usize, end: usize) -> SymbolRange {
        SymbolRange {
            start: Position {
                line: 0,
                column: 0,
                offset: start,
            },
            end: Position {
                line: 0,
                column: 0,
                offset: end,
            },
        }
    }

    fn symbol(name: &str, start: usize, end: usize) -> CodeSymbol {
        CodeSymbol {
            name: name.to_string(),
            kind: SymbolKind::Function,
            name_range: span(start, start + name.len()),
            content_range: span(start, end),
        }
    }

    struct FixedExtractor {
        symbols: Vec<CodeSymbol>,
    }

    impl SymbolExtractor for FixedExtractor {
        fn extract_symbols(&self, _source: &str, _language: &str) -> anyhow::Result<Vec<CodeSymbol>> {
            Ok(self.symbols.clone())
        }
    }

    struct FailingExtractor;

    impl SymbolExtractor for FailingExtractor {
        fn extract_symbols(&self, _source: &str, _language: &str) -> anyhow::Result<Vec<CodeSymbol>> {
            Err(anyhow!("parser exploded"))
        }
    }

    fn small_options() -> ChunkOptions {
        ChunkOptions {
            chunk_size: 40,
            chunk_overlap: 8,
            min_chunk_size: 0,
        }
    }

    #[test]
    fn extractor_failure_falls_back_to_text() {
        let drafts = chunk_code("fn main() {}", "rust", &FailingExtractor, &small_options());
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].content, "fn main() {}");
        assert!(drafts[0].symbols.is_empty());
    }

    #[test]
    fn no_symbols_falls_back_to_text() {
        let extractor = FixedExtractor { symbols: vec![] };
        let drafts = chunk_code("plain body", "rust", &extractor, &small_options());
        assert_eq!(drafts.len(), 1);
        assert!(drafts[0].symbols.is_empty());
    }

    #[test]
    fn symbols_are_attached_to_their_chunk() {
        let source = "fn alpha() {}\nfn beta() {}";
        let extractor = FixedExtractor {
            symbols: vec![symbol("alpha", 0, 13), symbol("beta", 14, 26)],
        };
        let drafts = chunk_code(source, "rust", &extractor, &small_options());
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].content, "fn alpha() {}\nfn beta() {}");
        let names: Vec<&str> = drafts[0].symbols.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
    }

    #[test]
    fn oversized_pending_flushes_before_next_symbol() {
        let a = "a".repeat(30);
        let b = "b".repeat(30);
        let source = format!("{}\n{}", a, b);
        let extractor = FixedExtractor {
            symbols: vec![symbol("first", 0, 30), symbol("second", 31, 61)],
        };
        let drafts = chunk_code(&source, "rust", &extractor, &small_options());
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].content, a);
        assert_eq!(drafts[1].content, b);
        assert_eq!(drafts[0].symbols.len(), 1);
        assert_eq!(drafts[1].symbols.len(), 1);
    }

    #[test]
    fn gap_text_between_symbols_is_kept() {
        let source = "fn a() {}\n// glue comment\nfn b() {}";
        let extractor = FixedExtractor {
            symbols: vec![symbol("a", 0, 9), symbol("b", 26, 35)],
        };
        let drafts = chunk_code(source, "rust", &extractor, &small_options());
        let all: String = drafts
            .iter()
            .map(|d| d.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        assert!(all.contains("// glue comment"));
    }

    #[test]
    fn trailing_text_after_last_symbol_has_no_symbol_metadata() {
        let source = "fn a() {}\ntrailing notes go here";
        let extractor = FixedExtractor {
            symbols: vec![symbol("a", 0, 9)],
        };
        let drafts = chunk_code(source, "rust", &extractor, &small_options());
        let tail = drafts.last().unwrap();
        assert!(tail.content.contains("trailing notes"));
        assert!(tail.symbols.is_empty());
    }

    #[test]
    fn invalid_spans_are_rejected() {
        let source = "fn a() {}";
        let extractor = FixedExtractor {
            symbols: vec![
                symbol("zero", 3, 3),
                symbol("backward", 7, 2),
                symbol("beyond", 0, 500),
            ],
        };
        let drafts = chunk_code(source, "rust", &extractor, &small_options());
        // the clamped "beyond" span still covers the whole source
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].content, "fn a() {}");
        assert_eq!(drafts[0].symbols.len(), 1);
        assert_eq!(drafts[0].symbols[0].name, "beyond");
    }

    #[test]
    fn oversized_symbol_splits_and_replicates_symbols() {
        let body = "x".repeat(120);
        let extractor = FixedExtractor {
            symbols: vec![symbol("giant", 0, 120)],
        };
        let drafts = chunk_code(&body, "rust", &extractor, &small_options());
        assert!(drafts.len() > 1);
        for draft in &drafts {
            assert_eq!(draft.symbols.len(), 1);
            assert_eq!(draft.symbols[0].name, "giant");
        }
    }

    #[test]
    fn small_chunks_merge_into_previous() {
        let source = "fn a() {}\nfn b() {}";
        let extractor = FixedExtractor {
            symbols: vec![symbol("a", 0, 9), symbol("b", 10, 19)],
        };
        let options = ChunkOptions {
            chunk_size: 12,
            chunk_overlap: 0,
            min_chunk_size: 10,
        };
        let drafts = chunk_code(source, "rust", &extractor, &options);
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].symbols.len(), 2);
    }
}
