//! The PhysioGold request/response cycle.
//!
//! A session goes through the same steps for every message:
//!
//! 1. **Append** the user turn to the conversation log
//! 2. **Compose** the prompt (mode template + reference documents + history)
//! 3. **Generate** a reply with the session's model, bounded by a timeout
//! 4. **Append** the assistant turn, or record the error and keep the user turn
//!
//! Nothing is shared between sessions; each `Session` owns its log,
//! documents and provider.

pub mod context;
pub mod session;
pub mod stream_event;
pub mod turn;

pub use context::{ComposedPrompt, PromptBudget, PromptComposer, estimate_tokens};
pub use session::{PhaseHandle, Session, SessionError, SessionView, TurnPhase};
pub use stream_event::TurnEvent;
pub use turn::{TurnController, TurnOutcome};
