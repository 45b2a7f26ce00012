//! Token counting for chunk budgets.
//!
//! With the default `tiktoken` feature this uses the cl100k BPE vocabulary,
//! matching what most embedding providers bill against. Without the feature a
//! character-based heuristic keeps the chunker usable in minimal builds.

#[cfg(feature = "tiktoken")]
use std::sync::OnceLock;

#[cfg(feature = "tiktoken")]
fn bpe() -> Option<&'static tiktoken_rs::CoreBPE> {
    static BPE: OnceLock<Option<tiktoken_rs::CoreBPE>> = OnceLock::new();
    BPE.get_or_init(|| tiktoken_rs::cl100k_base().ok()).as_ref()
}

/// Number of tokens in `text`. Returns 0 only for empty/whitespace input.
pub fn count_tokens(text: &str) -> usize {
    if text.trim().is_empty() {
        return 0;
    }

    #[cfg(feature = "tiktoken")]
    if let Some(bpe) = bpe() {
        return bpe.encode_ordinary(text).len().max(1);
    }

    heuristic_count(text)
}

/// Rough token estimate: one token per four characters, floored at the word
/// count so short texts are not undercounted.
#[allow(dead_code)]
fn heuristic_count(text: &str) -> usize {
    let chars = text.trim().chars().count();
    let words = text.split_whitespace().count();
    (chars / 4).max(words).max(1)
}
