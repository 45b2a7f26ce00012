//! Turns a block stream into the final chunk sequence.
//!
//! Responsibilities: track the heading stack so every chunk carries its
//! section path, split oversized paragraphs at sentence boundaries, merge
//! undersized peers, and mint stable chunk ids.

use unicode_segmentation::UnicodeSegmentation;
use uuid::Uuid;

use super::config::ChunkingConfig;
use super::segmenter::Block;
use super::tokenizer::count_tokens;
use super::{Chunk, SourceDocument};

struct Fragment {
    text: String,
    section_path: Vec<String>,
    token_count: usize,
    /// Atomic fragments (code fences, tables, unsplittable sentences) never
    /// merge with neighbors and may exceed the token budget.
    atomic: bool,
}

/// Assembles chunks from segmented blocks. Deterministic for a given
/// `(document, blocks, config)` triple.
pub fn assemble(doc: &SourceDocument, blocks: Vec<Block>, config: &ChunkingConfig) -> Vec<Chunk> {
    let mut heading_stack: Vec<(usize, String)> = Vec::new();
    let mut fragments: Vec<Fragment> = Vec::new();

    for block in blocks {
        match block {
            Block::Heading { level, title } => {
                while heading_stack
                    .last()
                    .is_some_and(|(open, _)| *open >= level)
                {
                    heading_stack.pop();
                }
                heading_stack.push((level, title));
            }
            Block::Paragraph { text } => {
                let path = section_path(&heading_stack);
                for piece in split_paragraph(&text, config.max_tokens) {
                    fragments.push(piece_fragment(piece, path.clone()));
                }
            }
            Block::CodeFence { text } | Block::Table { text } => {
                let token_count = count_tokens(&text);
                if token_count == 0 {
                    continue;
                }
                fragments.push(Fragment {
                    text,
                    section_path: section_path(&heading_stack),
                    token_count,
                    atomic: true,
                });
            }
        }
    }

    let merged = if config.merge_peers {
        merge_undersized(fragments, config)
    } else {
        fragments
    };

    merged
        .into_iter()
        .enumerate()
        .map(|(sequence_index, fragment)| Chunk {
            id: chunk_id(&doc.id, sequence_index, &fragment.text),
            text: fragment.text,
            section_path: fragment.section_path,
            source_doc_id: doc.id.clone(),
            token_count: fragment.token_count,
            sequence_index,
        })
        .collect()
}

fn section_path(stack: &[(usize, String)]) -> Vec<String> {
    stack.iter().map(|(_, title)| title.clone()).collect()
}

fn piece_fragment(piece: SplitPiece, section_path: Vec<String>) -> Fragment {
    Fragment {
        token_count: count_tokens(&piece.text),
        text: piece.text,
        section_path,
        atomic: piece.atomic,
    }
}

struct SplitPiece {
    text: String,
    atomic: bool,
}

/// Splits a paragraph that exceeds `max_tokens` at sentence boundaries,
/// greedily packing sentences up to the budget. A single sentence larger
/// than the budget is kept whole and marked atomic.
fn split_paragraph(text: &str, max_tokens: usize) -> Vec<SplitPiece> {
    if count_tokens(text) <= max_tokens {
        return vec![SplitPiece {
            text: text.to_string(),
            atomic: false,
        }];
    }

    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut current_tokens = 0usize;

    for sentence in text.unicode_sentences() {
        let sentence_tokens = count_tokens(sentence);
        if sentence_tokens == 0 {
            continue;
        }
        if sentence_tokens > max_tokens {
            flush_piece(&mut pieces, &mut current, &mut current_tokens);
            pieces.push(SplitPiece {
                text: sentence.trim().to_string(),
                atomic: true,
            });
            continue;
        }
        if current_tokens + sentence_tokens > max_tokens {
            flush_piece(&mut pieces, &mut current, &mut current_tokens);
        }
        current.push_str(sentence);
        current_tokens += sentence_tokens;
    }
    flush_piece(&mut pieces, &mut current, &mut current_tokens);
    pieces
}

fn flush_piece(pieces: &mut Vec<SplitPiece>, current: &mut String, current_tokens: &mut usize) {
    let text = current.trim().to_string();
    current.clear();
    *current_tokens = 0;
    if !text.is_empty() {
        pieces.push(SplitPiece {
            text,
            atomic: false,
        });
    }
}

/// Merges consecutive undersized, non-atomic fragments that share a section
/// path, as long as the merge stays within the token budget.
fn merge_undersized(fragments: Vec<Fragment>, config: &ChunkingConfig) -> Vec<Fragment> {
    let mut merged: Vec<Fragment> = Vec::new();

    for fragment in fragments {
        let mergeable = merged.last().is_some_and(|prev: &Fragment| {
            !prev.atomic
                && !fragment.atomic
                && prev.section_path == fragment.section_path
                && (prev.token_count < config.min_tokens
                    || fragment.token_count < config.min_tokens)
                && prev.token_count + fragment.token_count <= config.max_tokens
        });

        if mergeable {
            let prev = merged.last_mut().expect("checked non-empty");
            prev.text.push_str("\n\n");
            prev.text.push_str(&fragment.text);
            prev.token_count = count_tokens(&prev.text);
        } else {
            merged.push(fragment);
        }
    }

    merged
}

/// Stable chunk id: UUIDv5 over the source id, position, and content, so
/// re-chunking unchanged input reproduces identical ids with no persisted
/// state.
fn chunk_id(source_doc_id: &str, sequence_index: usize, text: &str) -> Uuid {
    let name = format!("{source_doc_id}/{sequence_index}/{text}");
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(text: &str) -> SourceDocument {
        SourceDocument {
            id: "doc-1".into(),
            text: text.into(),
        }
    }

    fn run(text: &str, config: &ChunkingConfig) -> Vec<Chunk> {
        let document = doc(text);
        let blocks = super::super::segmenter::segment(&document.text);
        assemble(&document, blocks, config)
    }

    #[test]
    fn chunk_ids_are_stable_across_runs() {
        let config = ChunkingConfig::default();
        let text = "# A\n\nSome paragraph text that forms a chunk.\n";
        let first = run(text, &config);
        let second = run(text, &config);
        assert_eq!(
            first.iter().map(|c| c.id).collect::<Vec<_>>(),
            second.iter().map(|c| c.id).collect::<Vec<_>>()
        );
    }

    #[test]
    fn section_path_tracks_heading_stack() {
        let config = ChunkingConfig {
            merge_peers: false,
            ..Default::default()
        };
        let text = "# Top\n\nintro\n\n## Inner\n\nnested text\n\n# Next\n\ntail text\n";
        let chunks = run(text, &config);
        assert_eq!(chunks[0].section_path, vec!["Top"]);
        assert_eq!(chunks[1].section_path, vec!["Top", "Inner"]);
        assert_eq!(chunks[2].section_path, vec!["Next"]);
    }

    #[test]
    fn oversized_paragraph_splits_at_sentences() {
        let config = ChunkingConfig {
            max_tokens: 20,
            min_tokens: 1,
            merge_peers: false,
        };
        let sentences = "This sentence talks about one topic in detail. ".repeat(10);
        let chunks = run(&sentences, &config);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.token_count <= config.max_tokens);
        }
    }

    #[test]
    fn undersized_peers_merge_within_section() {
        let config = ChunkingConfig {
            max_tokens: 200,
            min_tokens: 50,
            merge_peers: true,
        };
        let text = "# S\n\nshort one\n\nshort two\n\nshort three\n";
        let merged = run(text, &config);
        let unmerged = run(
            text,
            &ChunkingConfig {
                merge_peers: false,
                ..config.clone()
            },
        );
        assert!(merged.len() < unmerged.len());
        assert_eq!(merged[0].section_path, vec!["S"]);
    }

    #[test]
    fn code_fence_never_merges() {
        let config = ChunkingConfig {
            max_tokens: 500,
            min_tokens: 100,
            merge_peers: true,
        };
        let text = "# S\n\nshort intro\n\n```\nlet a = 1;\n```\n\nshort outro\n";
        let chunks = run(text, &config);
        let fence_chunks: Vec<_> = chunks.iter().filter(|c| c.text.contains("let a")).collect();
        assert_eq!(fence_chunks.len(), 1);
        assert!(fence_chunks[0].text.trim_start().starts_with("```"));
    }

    #[test]
    fn sequence_index_is_dense_and_ordered() {
        let chunks = run(
            "# A\n\none\n\n# B\n\ntwo\n\n# C\n\nthree\n",
            &ChunkingConfig::default(),
        );
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.sequence_index, i);
            assert!(chunk.token_count > 0);
        }
    }
}
