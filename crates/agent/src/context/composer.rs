//! Prompt composition.
//!
//! Builds the single text prompt sent on every turn:
//!
//! ```text
//! <role description>
//! <rules>
//! [
//!
//! IMPORTANT REFERENCE DOCUMENTS (Adhere strictly to these):
//! <corpus>]
//!
//! User History:
//! <role>: <text>        (one line per turn, oldest first)
//! ```
//!
//! The reference block is emitted only when the corpus is non-empty, so an
//! empty corpus and no documents at all compose to the same bytes.
//!
//! # Determinism
//!
//! Composition is a pure function of the template, corpus, log and
//! budget. It is redone from scratch on every turn.

use crate::context::budget::{PromptBudget, estimate_tokens};
use physiogold_core::message::ConversationLog;
use physiogold_core::mode::ModeTemplate;
use serde::Serialize;
use tracing::debug;

const REFERENCE_HEADER: &str = "\n\nIMPORTANT REFERENCE DOCUMENTS (Adhere strictly to these):\n";
const HISTORY_HEADER: &str = "\n\nUser History:\n";

/// A composed prompt plus what was left out of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComposedPrompt {
    pub text: String,
    pub estimated_tokens: usize,
    /// The corpus was cut to fit `max_corpus_chars`
    pub corpus_truncated: bool,
    /// Oldest turns left out to fit `max_history_turns`
    pub turns_omitted: usize,
}

/// Stateless prompt composer. Create one and reuse it.
#[derive(Debug, Clone, Default)]
pub struct PromptComposer {
    budget: PromptBudget,
}

impl PromptComposer {
    pub fn new(budget: PromptBudget) -> Self {
        Self { budget }
    }

    pub fn compose(
        &self,
        template: ModeTemplate,
        corpus: Option<&str>,
        log: &ConversationLog,
    ) -> ComposedPrompt {
        let mut text = String::new();
        text.push_str(template.role_description);
        text.push('\n');
        text.push_str(template.rules);
        text.push('\n');

        let mut corpus_truncated = false;
        if let Some(corpus) = corpus.filter(|c| !c.is_empty()) {
            let (kept, cut) = self.budget.fit_corpus(corpus);
            corpus_truncated = cut;
            text.push_str(REFERENCE_HEADER);
            text.push_str(kept);
        }

        text.push_str(HISTORY_HEADER);
        let turns = log.all();
        let start = self.budget.history_start(turns.len());
        for turn in &turns[start..] {
            text.push_str(turn.role().as_str());
            text.push_str(": ");
            text.push_str(turn.text());
            text.push('\n');
        }

        let estimated_tokens = estimate_tokens(&text);
        debug!(
            chars = text.len(),
            estimated_tokens,
            turns = turns.len() - start,
            turns_omitted = start,
            corpus_truncated,
            "Prompt composed"
        );

        ComposedPrompt {
            text,
            estimated_tokens,
            corpus_truncated,
            turns_omitted: start,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use physiogold_core::message::Turn;
    use physiogold_core::mode::Mode;

    fn log_of(turns: &[Turn]) -> ConversationLog {
        let mut log = ConversationLog::new();
        for t in turns {
            log.append(t.clone());
        }
        log
    }

    #[test]
    fn patient_intake_first_message() {
        let log = log_of(&[Turn::user("My knee hurts")]);
        let prompt = PromptComposer::default().compose(Mode::PatientIntake.template(), None, &log);

        let template = Mode::PatientIntake.template();
        let opening = format!("{}\n{}\n", template.role_description, template.rules);
        assert!(prompt.text.starts_with(&opening));
        assert!(!prompt.text.contains("IMPORTANT REFERENCE DOCUMENTS"));
        assert!(prompt.text.ends_with("User History:\nuser: My knee hurts\n"));
        assert_eq!(prompt.text, format!("{opening}\n\nUser History:\nuser: My knee hurts\n"));
    }

    #[test]
    fn empty_corpus_is_identical_to_no_documents() {
        let log = log_of(&[Turn::user("hi")]);
        let composer = PromptComposer::default();
        let template = Mode::ClinicianMentor.template();
        assert_eq!(
            composer.compose(template, None, &log),
            composer.compose(template, Some(""), &log)
        );
    }

    #[test]
    fn reference_block_between_rules_and_history() {
        let log = log_of(&[Turn::user("Assess my shoulder")]);
        let prompt = PromptComposer::default().compose(
            Mode::ClinicianMentor.template(),
            Some("Rotator cuff guideline text"),
            &log,
        );

        let rules_at = prompt.text.find("RULES:").unwrap();
        let docs_at = prompt.text.find(REFERENCE_HEADER).unwrap();
        let history_at = prompt.text.find(HISTORY_HEADER).unwrap();
        assert!(rules_at < docs_at && docs_at < history_at);
        assert!(prompt.text.contains(
            "(Adhere strictly to these):\nRotator cuff guideline text\n\nUser History:\n"
        ));
    }

    #[test]
    fn history_is_rendered_in_order_with_lowercase_roles() {
        let log = log_of(&[
            Turn::user("first"),
            Turn::assistant("second"),
            Turn::user("third"),
        ]);
        let prompt = PromptComposer::default().compose(Mode::PatientIntake.template(), None, &log);
        assert!(
            prompt
                .text
                .ends_with("User History:\nuser: first\nassistant: second\nuser: third\n")
        );
        assert_eq!(prompt.turns_omitted, 0);
        assert!(!prompt.corpus_truncated);
    }

    #[test]
    fn budget_trims_corpus_and_history() {
        let log = log_of(&[
            Turn::user("one"),
            Turn::assistant("two"),
            Turn::user("three"),
        ]);
        let composer = PromptComposer::new(PromptBudget {
            max_corpus_chars: Some(5),
            max_history_turns: Some(1),
        });
        let prompt = composer.compose(Mode::PatientIntake.template(), Some("0123456789"), &log);

        assert!(prompt.corpus_truncated);
        assert_eq!(prompt.turns_omitted, 2);
        assert!(prompt.text.contains(":\n01234\n\nUser History:\nuser: three\n"));
        assert!(!prompt.text.contains("user: one"));
    }

    #[test]
    fn composition_is_deterministic() {
        let log = log_of(&[Turn::user("a"), Turn::assistant("b")]);
        let composer = PromptComposer::default();
        let first = composer.compose(Mode::PatientIntake.template(), Some("doc"), &log);
        let second = composer.compose(Mode::PatientIntake.template(), Some("doc"), &log);
        assert_eq!(first, second);
        assert_eq!(first.estimated_tokens, estimate_tokens(&first.text));
    }
}
