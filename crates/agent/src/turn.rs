//! The request/response cycle for one user message.
//!
//! Phases: `Idle → Appending → Generating → Appending → Idle` on success,
//! `Generating → Idle` on failure. A failed generation keeps the user turn
//! in the log, appends no assistant turn, and records the error on the
//! session so it can be shown next to the unanswered message.

use crate::context::PromptComposer;
use crate::session::{Session, TurnPhase};
use crate::stream_event::TurnEvent;
use physiogold_config::AppConfig;
use physiogold_core::error::{ProviderError, TurnError};
use physiogold_core::message::Turn;
use physiogold_core::provider::{GenerationRequest, ModelId, Provider, Usage};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Result of a successful cycle.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub reply: String,
    pub model: ModelId,
    pub usage: Option<Usage>,
    /// Log length after the assistant turn was appended
    pub turns: usize,
    pub prompt_tokens_estimated: usize,
}

impl TurnOutcome {
    pub fn done_event(&self) -> TurnEvent {
        TurnEvent::Done {
            reply: self.reply.clone(),
            model: self.model.to_string(),
            turns: self.turns,
            usage: self.usage,
        }
    }
}

pub struct TurnController {
    composer: PromptComposer,
    timeout: Duration,
    temperature: Option<f32>,
    max_output_tokens: Option<u32>,
}

struct Prepared {
    provider: Arc<dyn Provider>,
    request: GenerationRequest,
    prompt_tokens: usize,
}

impl TurnController {
    pub fn new(composer: PromptComposer, timeout: Duration) -> Self {
        Self {
            composer,
            timeout,
            temperature: None,
            max_output_tokens: None,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let budget = crate::context::PromptBudget::from_config(&config.prompt);
        Self::new(
            PromptComposer::new(budget),
            Duration::from_secs(config.provider.timeout_secs),
        )
        .with_sampling(config.provider.temperature, config.provider.max_output_tokens)
    }

    pub fn with_sampling(
        mut self,
        temperature: Option<f32>,
        max_output_tokens: Option<u32>,
    ) -> Self {
        self.temperature = temperature;
        self.max_output_tokens = max_output_tokens;
        self
    }

    /// Run one full cycle and return the reply.
    pub async fn submit(
        &self,
        session: &mut Session,
        text: &str,
    ) -> Result<TurnOutcome, TurnError> {
        let prepared = self.begin(session, text)?;
        let Prepared {
            provider,
            request,
            prompt_tokens,
        } = prepared;

        let result = match tokio::time::timeout(self.timeout, provider.generate(request)).await {
            Ok(result) => result.map(|r| (r.text, r.model, r.usage)),
            Err(_) => Err(self.timed_out()),
        };

        match result {
            Ok((reply, model, usage)) => {
                Ok(self.finish(session, reply, model, usage, prompt_tokens))
            }
            Err(e) => Err(self.fail(session, e)),
        }
    }

    /// Like [`submit`](Self::submit), but forwards reply deltas to `tx` as
    /// they arrive. The assistant turn is appended only once the stream has
    /// completed. Final `done`/`error` events are left to the caller.
    pub async fn submit_streaming(
        &self,
        session: &mut Session,
        text: &str,
        tx: mpsc::Sender<TurnEvent>,
    ) -> Result<TurnOutcome, TurnError> {
        let Prepared {
            provider,
            request,
            prompt_tokens,
        } = self.begin(session, text)?;
        let model = request.model.clone();

        let collect = collect_stream(provider.as_ref(), request, &tx);
        let result = match tokio::time::timeout(self.timeout, collect).await {
            Ok(result) => result,
            Err(_) => Err(self.timed_out()),
        };

        match result {
            Ok((reply, usage)) => Ok(self.finish(session, reply, model, usage, prompt_tokens)),
            Err(e) => Err(self.fail(session, e)),
        }
    }

    fn begin(&self, session: &mut Session, text: &str) -> Result<Prepared, TurnError> {
        let (provider, model) = session
            .generation_target()
            .ok_or(TurnError::MissingCredential)?;
        if text.trim().is_empty() {
            return Err(TurnError::EmptyMessage);
        }

        session.set_phase(TurnPhase::Appending);
        session.append(Turn::user(text));

        let prompt = self.composer.compose(
            session.mode().template(),
            Some(session.corpus().text.as_str()),
            session.log(),
        );
        info!(
            session = %session.id(),
            mode = ?session.mode(),
            model = %model,
            turns = session.log().len(),
            estimated_tokens = prompt.estimated_tokens,
            "Generating reply"
        );

        let mut request = GenerationRequest::new(model, prompt.text);
        request.temperature = self.temperature;
        request.max_output_tokens = self.max_output_tokens;

        session.set_phase(TurnPhase::Generating);
        Ok(Prepared {
            provider,
            request,
            prompt_tokens: prompt.estimated_tokens,
        })
    }

    fn finish(
        &self,
        session: &mut Session,
        reply: String,
        model: ModelId,
        usage: Option<Usage>,
        prompt_tokens: usize,
    ) -> TurnOutcome {
        session.set_phase(TurnPhase::Appending);
        session.append(Turn::assistant(reply.clone()));
        session.set_phase(TurnPhase::Idle);

        debug!(session = %session.id(), reply_chars = reply.len(), "Assistant turn appended");
        TurnOutcome {
            reply,
            model,
            usage,
            turns: session.log().len(),
            prompt_tokens_estimated: prompt_tokens,
        }
    }

    fn fail(&self, session: &mut Session, error: ProviderError) -> TurnError {
        let error = TurnError::Generation(error);
        warn!(session = %session.id(), error = %error, "Generation failed");
        session.record_error(error.to_string());
        session.set_phase(TurnPhase::Idle);
        error
    }

    fn timed_out(&self) -> ProviderError {
        ProviderError::Timeout(format!("no reply within {}s", self.timeout.as_secs()))
    }
}

impl Default for TurnController {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Drain a provider stream, forwarding non-empty deltas.
async fn collect_stream(
    provider: &dyn Provider,
    request: GenerationRequest,
    tx: &mpsc::Sender<TurnEvent>,
) -> Result<(String, Option<Usage>), ProviderError> {
    let mut rx = provider.stream(request).await?;
    let mut reply = String::new();
    let mut usage = None;

    while let Some(chunk) = rx.recv().await {
        let chunk = chunk?;
        if let Some(content) = chunk.content.filter(|c| !c.is_empty()) {
            reply.push_str(&content);
            // A closed receiver means the client went away; keep going so
            // the log still gets the full reply.
            let _ = tx.send(TurnEvent::Delta { content }).await;
        }
        if chunk.usage.is_some() {
            usage = chunk.usage;
        }
        if chunk.done {
            if reply.is_empty() {
                return Err(ProviderError::MalformedResponse(
                    "stream finished without any text".into(),
                ));
            }
            return Ok((reply, usage));
        }
    }

    Err(ProviderError::StreamInterrupted(
        "stream closed before completion".into(),
    ))
}
