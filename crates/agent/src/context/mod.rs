//! Prompt context: the text sent to the model on every turn.
//!
//! | Part | Source | Trim strategy |
//! |------|--------|---------------|
//! | Role + rules | Mode template | Never trimmed |
//! | Reference documents | Session corpus | Prefix kept (only with `max_corpus_chars`) |
//! | User history | Conversation log | Oldest dropped (only with `max_history_turns`) |

pub mod budget;
pub mod composer;

pub use budget::{PromptBudget, estimate_tokens};
pub use composer::{ComposedPrompt, PromptComposer};
