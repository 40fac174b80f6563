//! LLM provider implementation and model selection for PhysioGold.
//!
//! The Gemini provider implements `physiogold_core::Provider`; the
//! selector picks which of its models a session talks to.

pub mod gemini;
pub mod selector;

pub use gemini::{GeminiFactory, GeminiProvider};
pub use selector::{ModelSelector, Selection, SelectionSource};
