// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Token estimation for streams cut short before the backend reports usage.

use std::sync::LazyLock;

use tiktoken_rs::CoreBPE;
use tracing::warn;

static CL100K: LazyLock<Option<CoreBPE>> = LazyLock::new(|| match tiktoken_rs::cl100k_base() {
    Ok(bpe) => Some(bpe),
    Err(e) => {
        warn!(error = %e, "cl100k tokenizer unavailable, falling back to chars/4");
        None
    }
});

/// Estimates the BPE token count of `text`.
pub fn estimate_tokens(text: &str) -> u64 {
    if text.is_empty() {
        return 0;
    }
    match CL100K.as_ref() {
        Some(bpe) => bpe.encode_ordinary(text).len() as u64,
        None => (text.chars().count() as u64).div_ceil(4),
    }
}

/// Whitespace-delimited word count, used by the length heuristics.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_has_no_tokens() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn estimate_is_positive_for_text() {
        let n = estimate_tokens("The quick brown fox jumps over the lazy dog.");
        assert!(n >= 5 && n <= 20, "unexpected estimate {n}");
    }

    #[test]
    fn word_count_ignores_extra_whitespace() {
        assert_eq!(word_count("  set   a timer \n"), 3);
        assert_eq!(word_count(""), 0);
    }
}
