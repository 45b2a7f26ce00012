//! Structural segmentation of Markdown source into blocks.
//!
//! The segmenter is a line-oriented scanner, not a full Markdown parser. It
//! recognizes exactly the structures that matter for chunk boundaries:
//! ATX headings, fenced code blocks, pipe tables, and blank-line separated
//! paragraphs. Anything it cannot make sense of degrades to paragraph text,
//! so malformed markup never fails a document.

use std::sync::OnceLock;

use regex::Regex;

/// One structural unit of a source document, in document order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Block {
    /// ATX heading (`#` through `######`).
    Heading { level: usize, title: String },
    /// Blank-line separated prose. Splittable at sentence boundaries.
    Paragraph { text: String },
    /// Fenced code block, fence lines included. Atomic.
    CodeFence { text: String },
    /// Consecutive pipe-table lines. Atomic.
    Table { text: String },
}

fn heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(#{1,6})\s+(.+?)\s*$").expect("valid heading regex"))
}

/// Returns the fence marker (``` or ~~~) opening this line, if any.
fn fence_marker(line: &str) -> Option<&'static str> {
    let trimmed = line.trim_start();
    if trimmed.starts_with("```") {
        Some("```")
    } else if trimmed.starts_with("~~~") {
        Some("~~~")
    } else {
        None
    }
}

fn is_table_line(line: &str) -> bool {
    line.trim_start().starts_with('|')
}

/// Splits `source` into an ordered block sequence.
///
/// Deterministic: the same source always yields the same blocks. An
/// unterminated code fence is reinterpreted as paragraphs rather than
/// swallowing the rest of the document into one opaque block.
pub fn segment(source: &str) -> Vec<Block> {
    let lines: Vec<&str> = source.lines().collect();
    let mut blocks = Vec::new();
    let mut paragraph: Vec<&str> = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];

        if let Some(marker) = fence_marker(line) {
            flush_paragraph(&mut blocks, &mut paragraph);
            match find_fence_close(&lines, i + 1, marker) {
                Some(close) => {
                    let text = lines[i..=close].join("\n");
                    blocks.push(Block::CodeFence { text });
                    i = close + 1;
                }
                None => {
                    // Unterminated fence: degrade to paragraph-level splitting
                    // of the remaining lines.
                    for rest in &lines[i..] {
                        push_paragraph_line(&mut blocks, &mut paragraph, rest);
                    }
                    i = lines.len();
                }
            }
            continue;
        }

        if let Some(caps) = heading_re().captures(line) {
            flush_paragraph(&mut blocks, &mut paragraph);
            blocks.push(Block::Heading {
                level: caps[1].len(),
                title: caps[2].to_string(),
            });
            i += 1;
            continue;
        }

        if is_table_line(line) {
            let mut end = i;
            while end + 1 < lines.len() && is_table_line(lines[end + 1]) {
                end += 1;
            }
            if end > i {
                flush_paragraph(&mut blocks, &mut paragraph);
                blocks.push(Block::Table {
                    text: lines[i..=end].join("\n"),
                });
                i = end + 1;
                continue;
            }
            // A lone pipe line is just prose.
        }

        push_paragraph_line(&mut blocks, &mut paragraph, line);
        i += 1;
    }

    flush_paragraph(&mut blocks, &mut paragraph);
    blocks
}

fn find_fence_close(lines: &[&str], from: usize, marker: &str) -> Option<usize> {
    lines[from..]
        .iter()
        .position(|line| line.trim_start().starts_with(marker))
        .map(|offset| from + offset)
}

fn push_paragraph_line<'a>(blocks: &mut Vec<Block>, paragraph: &mut Vec<&'a str>, line: &'a str) {
    if line.trim().is_empty() {
        flush_paragraph(blocks, paragraph);
    } else {
        paragraph.push(line);
    }
}

fn flush_paragraph(blocks: &mut Vec<Block>, paragraph: &mut Vec<&str>) {
    if paragraph.is_empty() {
        return;
    }
    let text = paragraph.join("\n").trim().to_string();
    paragraph.clear();
    if !text.is_empty() {
        blocks.push(Block::Paragraph { text });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headings_and_paragraphs() {
        let blocks = segment("# Title\n\nFirst paragraph.\n\n## Sub\n\nSecond paragraph.\n");
        assert_eq!(
            blocks[0],
            Block::Heading {
                level: 1,
                title: "Title".into()
            }
        );
        assert!(matches!(&blocks[1], Block::Paragraph { text } if text == "First paragraph."));
        assert_eq!(
            blocks[2],
            Block::Heading {
                level: 2,
                title: "Sub".into()
            }
        );
    }

    #[test]
    fn fenced_code_is_one_block() {
        let source = "Intro text.\n\n```rust\nfn main() {}\n\nfn other() {}\n```\n\nOutro.";
        let blocks = segment(source);
        let fences: Vec<_> = blocks
            .iter()
            .filter(|b| matches!(b, Block::CodeFence { .. }))
            .collect();
        assert_eq!(fences.len(), 1);
        if let Block::CodeFence { text } = fences[0] {
            assert!(text.contains("fn main"));
            assert!(text.contains("fn other"));
        }
    }

    #[test]
    fn unterminated_fence_degrades_to_paragraphs() {
        let source = "Before.\n\n```\nlet x = 1;\nlet y = 2;\n";
        let blocks = segment(source);
        assert!(blocks.iter().all(|b| !matches!(b, Block::CodeFence { .. })));
        assert!(blocks.len() >= 2);
    }

    #[test]
    fn table_lines_group_into_one_block() {
        let source = "| a | b |\n|---|---|\n| 1 | 2 |\n\nAfter the table.";
        let blocks = segment(source);
        assert!(matches!(&blocks[0], Block::Table { text } if text.lines().count() == 3));
        assert!(matches!(&blocks[1], Block::Paragraph { .. }));
    }

    #[test]
    fn empty_source_yields_no_blocks() {
        assert!(segment("").is_empty());
        assert!(segment("\n\n   \n").is_empty());
    }
}
