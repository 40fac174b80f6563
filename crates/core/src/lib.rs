//! # PhysioGold Core
//!
//! Domain types, traits, and error definitions for the PhysioGold chat
//! assistant. This crate has **no framework dependencies**: it defines the
//! model that every other crate implements against.
//!
//! - Conversation turns and the append-only conversation log
//! - The two operating modes and their prompt templates
//! - The `Provider` trait over the hosted generation API
//! - Uploaded documents and the per-session credential

pub mod document;
pub mod error;
pub mod message;
pub mod mode;
pub mod provider;

// Re-export key types at crate root for ergonomics
pub use document::UploadedDocument;
pub use error::{DocumentError, ProviderError, TurnError};
pub use message::{ConversationLog, Role, SessionId, Turn};
pub use mode::{Mode, ModeTemplate};
pub use provider::{
    Credential, GenerationRequest, GenerationResponse, ModelDescriptor, ModelId, Provider,
    ProviderFactory, StreamChunk,
};
