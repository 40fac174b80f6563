//! Prompt size policy and token estimation.
//!
//! Token counts use a character heuristic: ~4 characters per token,
//! rounded up. Good enough for logging and for the session view; the
//! provider reports exact usage after the call.

use physiogold_config::PromptConfig;
use serde::Serialize;

/// Estimate the token count for a string.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.len().div_ceil(4)
}

/// Caps applied while composing a prompt. `None` leaves that part
/// unbounded, which is the default for both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PromptBudget {
    pub max_corpus_chars: Option<usize>,
    pub max_history_turns: Option<usize>,
}

impl PromptBudget {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn from_config(config: &PromptConfig) -> Self {
        Self {
            max_corpus_chars: config.max_corpus_chars,
            max_history_turns: config.max_history_turns,
        }
    }

    /// The corpus prefix that fits, and whether anything was cut.
    pub fn fit_corpus<'a>(&self, corpus: &'a str) -> (&'a str, bool) {
        let Some(max) = self.max_corpus_chars else {
            return (corpus, false);
        };
        match corpus.char_indices().nth(max) {
            Some((cut, _)) => (&corpus[..cut], true),
            None => (corpus, false),
        }
    }

    /// Index of the first history turn to render out of `len`.
    pub fn history_start(&self, len: usize) -> usize {
        match self.max_history_turns {
            Some(max) => len.saturating_sub(max),
            None => 0,
        }
    }
}
