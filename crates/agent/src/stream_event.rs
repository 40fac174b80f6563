//! Turn-level streaming events.
//!
//! `TurnEvent` wraps provider stream chunks into the events the gateway
//! forwards to the browser over SSE:
//! - `delta` carries partial reply text
//! - `done` closes a successful turn with the full reply
//! - `error` closes a failed turn

use physiogold_core::provider::Usage;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// Partial reply text from the model.
    Delta { content: String },

    /// The assistant turn has been appended.
    Done {
        reply: String,
        model: String,
        turns: usize,
        usage: Option<Usage>,
    },

    /// The cycle failed; no assistant turn was appended.
    Error { message: String },
}

impl TurnEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Delta { .. } => "delta",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }
}
