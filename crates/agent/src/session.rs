//! Per-user session state.
//!
//! A session holds everything one browser tab needs between requests: the
//! selected mode, the provider built from the entered API key and the model
//! chosen for it, the uploaded documents and their corpus, the conversation
//! log, and the errors shown next to it.

use chrono::{DateTime, Utc};
use physiogold_core::document::UploadedDocument;
use physiogold_core::error::ProviderError;
use physiogold_core::message::{ConversationLog, SessionId, Turn};
use physiogold_core::mode::Mode;
use physiogold_core::provider::{Credential, ModelDescriptor, ModelId, Provider, ProviderFactory};
use physiogold_documents::{DocumentLoader, DocumentSummary, ExtractionWarning, LoadedCorpus};
use physiogold_providers::{ModelSelector, Selection};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::{debug, info};

/// Where the session is in its request/response cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    #[default]
    Idle,
    Appending,
    Generating,
}

impl TurnPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => TurnPhase::Appending,
            2 => TurnPhase::Generating,
            _ => TurnPhase::Idle,
        }
    }
}

/// Read side of a session's phase, usable while the session itself is
/// locked by a running cycle.
#[derive(Debug, Clone, Default)]
pub struct PhaseHandle(Arc<AtomicU8>);

impl PhaseHandle {
    pub fn get(&self) -> TurnPhase {
        TurnPhase::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, phase: TurnPhase) {
        self.0.store(phase as u8, Ordering::Release);
    }
}

/// A failure shown to the user next to the conversation.
#[derive(Debug, Clone, Serialize)]
pub struct SessionError {
    pub message: String,
    pub at: DateTime<Utc>,
}

pub struct Session {
    id: SessionId,
    mode: Mode,
    credential: Option<Credential>,
    provider: Option<Arc<dyn Provider>>,
    selection: Option<Selection>,
    documents: Vec<UploadedDocument>,
    corpus: LoadedCorpus,
    log: ConversationLog,
    errors: Vec<SessionError>,
    phase: PhaseHandle,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new() -> Self {
        Self::with_id(SessionId::new())
    }

    pub fn with_id(id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            id,
            mode: Mode::default(),
            credential: None,
            provider: None,
            selection: None,
            documents: Vec::new(),
            corpus: LoadedCorpus::default(),
            log: ConversationLog::new(),
            errors: Vec::new(),
            phase: PhaseHandle::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Takes effect from the next turn; the log is kept.
    pub fn set_mode(&mut self, mode: Mode) {
        if self.mode != mode {
            debug!(session = %self.id, mode = %mode, "Mode changed");
        }
        self.mode = mode;
        self.touch();
    }

    /// Build a provider for `api_key` and select its model.
    ///
    /// A blank key clears the configuration and returns `Ok(None)`. Model
    /// discovery failures do not fail this call; the selector falls back.
    pub async fn configure_credential(
        &mut self,
        api_key: &str,
        factory: &dyn ProviderFactory,
        selector: &ModelSelector,
    ) -> Result<Option<Selection>, ProviderError> {
        let Some(credential) = Credential::new(api_key) else {
            self.credential = None;
            self.provider = None;
            self.selection = None;
            self.touch();
            info!(session = %self.id, "Credential cleared");
            return Ok(None);
        };

        let provider = factory.build(&credential)?;
        let selection = selector.select(provider.as_ref()).await;

        info!(
            session = %self.id,
            provider = provider.name(),
            model = %selection.model,
            "Credential configured"
        );
        self.credential = Some(credential);
        self.provider = Some(provider);
        self.selection = Some(selection.clone());
        self.touch();
        Ok(Some(selection))
    }

    pub fn is_configured(&self) -> bool {
        self.provider.is_some() && self.credential.is_some()
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    /// The provider and the model id to use for the next call.
    pub fn generation_target(&self) -> Option<(Arc<dyn Provider>, ModelId)> {
        let provider = self.provider.clone()?;
        let model = self.selection.as_ref()?.model.clone();
        Some((provider, model))
    }

    /// Models visible to the configured key. Unlike selection, errors are
    /// returned to the caller.
    pub async fn available_models(&self) -> Result<Vec<ModelDescriptor>, ProviderError> {
        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| ProviderError::NotConfigured("no API key entered".into()))?;
        provider.list_models().await
    }

    /// Add documents after the existing ones and rebuild the corpus.
    pub async fn add_documents(
        &mut self,
        documents: Vec<UploadedDocument>,
        loader: &DocumentLoader,
    ) {
        self.documents.extend(documents);
        self.rebuild_corpus(loader).await;
    }

    /// Remove every document called `name`. Returns how many were removed.
    pub async fn remove_document(&mut self, name: &str, loader: &DocumentLoader) -> usize {
        let before = self.documents.len();
        self.documents.retain(|d| d.name != name);
        let removed = before - self.documents.len();
        if removed > 0 {
            self.rebuild_corpus(loader).await;
        }
        removed
    }

    pub fn clear_documents(&mut self) {
        self.documents.clear();
        self.corpus = LoadedCorpus::default();
        self.touch();
    }

    async fn rebuild_corpus(&mut self, loader: &DocumentLoader) {
        self.corpus = loader.load_blocking(self.documents.clone()).await;
        info!(
            session = %self.id,
            documents = self.documents.len(),
            corpus_chars = self.corpus.text.len(),
            warnings = self.corpus.warnings.len(),
            "Reference corpus rebuilt"
        );
        self.touch();
    }

    pub fn documents(&self) -> &[UploadedDocument] {
        &self.documents
    }

    pub fn corpus(&self) -> &LoadedCorpus {
        &self.corpus
    }

    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    pub fn errors(&self) -> &[SessionError] {
        &self.errors
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase.get()
    }

    pub fn phase_handle(&self) -> PhaseHandle {
        self.phase.clone()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub(crate) fn append(&mut self, turn: Turn) {
        self.log.append(turn);
        self.touch();
    }

    pub(crate) fn record_error(&mut self, message: impl Into<String>) {
        self.errors.push(SessionError {
            message: message.into(),
            at: Utc::now(),
        });
        self.touch();
    }

    pub(crate) fn set_phase(&mut self, phase: TurnPhase) {
        self.phase.set(phase);
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Snapshot for the UI.
    pub fn view(&self) -> SessionView {
        SessionView {
            id: self.id.to_string(),
            mode: self.mode,
            mode_label: self.mode.label(),
            credential_configured: self.is_configured(),
            selection: self.selection.clone(),
            documents: self.corpus.documents.clone(),
            warnings: self.corpus.warnings.clone(),
            corpus_chars: self.corpus.text.len(),
            turns: self.log.all().to_vec(),
            errors: self.errors.clone(),
            phase: self.phase.get(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("credential", &self.credential)
            .field("selection", &self.selection)
            .field("documents", &self.documents.len())
            .field("turns", &self.log.len())
            .field("errors", &self.errors.len())
            .field("phase", &self.phase.get())
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub id: String,
    pub mode: Mode,
    pub mode_label: &'static str,
    pub credential_configured: bool,
    pub selection: Option<Selection>,
    pub documents: Vec<DocumentSummary>,
    pub warnings: Vec<ExtractionWarning>,
    pub corpus_chars: usize,
    pub turns: Vec<Turn>,
    pub errors: Vec<SessionError>,
    pub phase: TurnPhase,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use physiogold_core::error::DocumentError;
    use physiogold_core::provider::{GenerationRequest, GenerationResponse};
    use physiogold_documents::PageExtractor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ListingProvider;

    #[async_trait]
    impl Provider for ListingProvider {
        fn name(&self) -> &str {
            "listing_mock"
        }

        async fn generate(
            &self,
            request: GenerationRequest,
        ) -> Result<GenerationResponse, ProviderError> {
            Ok(GenerationResponse {
                text: "ok".into(),
                model: request.model,
                usage: None,
            })
        }

        async fn list_models(&self) -> Result<Vec<ModelDescriptor>, ProviderError> {
            Ok(vec![
                ModelDescriptor::new("models/gemini-pro", &["generateContent"]),
                ModelDescriptor::new("models/gemini-2.0-flash", &["generateContent"]),
            ])
        }
    }

    struct CountingFactory {
        builds: AtomicUsize,
    }

    impl ProviderFactory for CountingFactory {
        fn build(&self, _credential: &Credential) -> Result<Arc<dyn Provider>, ProviderError> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(ListingProvider))
        }
    }

    struct Utf8Pages;

    impl PageExtractor for Utf8Pages {
        fn extract_pages(&self, document: &UploadedDocument) -> Result<Vec<String>, DocumentError> {
            Ok(vec![String::from_utf8_lossy(&document.bytes).to_string()])
        }
    }

    fn factory() -> CountingFactory {
        CountingFactory {
            builds: AtomicUsize::new(0),
        }
    }

    #[test]
    fn new_session_is_empty_and_idle() {
        let session = Session::new();
        assert_eq!(session.mode(), Mode::PatientIntake);
        assert!(!session.is_configured());
        assert!(session.log().is_empty());
        assert!(session.corpus().text.is_empty());
        assert_eq!(session.phase(), TurnPhase::Idle);
    }

    #[tokio::test]
    async fn configuring_selects_fast_tier_once() {
        let factory = factory();
        let mut session = Session::new();
        let selection = session
            .configure_credential("AIza-test", &factory, &ModelSelector::default())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(selection.model.as_str(), "models/gemini-2.0-flash");
        assert!(session.is_configured());
        assert_eq!(factory.builds.load(Ordering::SeqCst), 1);
        let (_, model) = session.generation_target().unwrap();
        assert_eq!(model, selection.model);
    }

    #[tokio::test]
    async fn blank_key_clears_configuration() {
        let factory = factory();
        let mut session = Session::new();
        session
            .configure_credential("AIza-test", &factory, &ModelSelector::default())
            .await
            .unwrap();
        let cleared = session
            .configure_credential("   ", &factory, &ModelSelector::default())
            .await
            .unwrap();

        assert!(cleared.is_none());
        assert!(!session.is_configured());
        assert!(session.generation_target().is_none());
    }

    #[tokio::test]
    async fn listing_without_provider_is_an_error() {
        let session = Session::new();
        let err = session.available_models().await.unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn documents_rebuild_corpus_in_upload_order() {
        let loader = DocumentLoader::new(Arc::new(Utf8Pages));
        let mut session = Session::new();
        session
            .add_documents(vec![UploadedDocument::new("a.pdf", b"AAA".to_vec())], &loader)
            .await;
        session
            .add_documents(vec![UploadedDocument::new("b.pdf", b"BBB".to_vec())], &loader)
            .await;
        assert_eq!(session.corpus().text.as_str(), "AAABBB");

        assert_eq!(session.remove_document("a.pdf", &loader).await, 1);
        assert_eq!(session.corpus().text.as_str(), "BBB");
        assert_eq!(session.remove_document("missing.pdf", &loader).await, 0);

        session.clear_documents();
        assert!(session.documents().is_empty());
        assert!(session.corpus().text.is_empty());
    }

    #[test]
    fn mode_change_keeps_log() {
        let mut session = Session::new();
        session.append(Turn::user("hello"));
        session.set_mode(Mode::ClinicianMentor);
        assert_eq!(session.mode(), Mode::ClinicianMentor);
        assert_eq!(session.log().len(), 1);
    }

    #[test]
    fn phase_handle_tracks_the_session() {
        let mut session = Session::new();
        let handle = session.phase_handle();
        assert_eq!(handle.get(), TurnPhase::Idle);

        session.set_phase(TurnPhase::Generating);
        assert_eq!(handle.get(), TurnPhase::Generating);
        assert_eq!(session.view().phase, TurnPhase::Generating);

        session.set_phase(TurnPhase::Idle);
        assert_eq!(handle.get(), TurnPhase::Idle);
    }

    #[tokio::test]
    async fn view_and_debug_never_show_key() {
        let mut session = Session::new();
        session
            .configure_credential("AIza-secret-key", &factory(), &ModelSelector::default())
            .await
            .unwrap();

        let view = serde_json::to_value(session.view()).unwrap();
        assert_eq!(view["mode"], "patient_intake");
        assert_eq!(view["credential_configured"], true);
        assert_eq!(view["selection"]["source"], "discovered");
        assert!(!view.to_string().contains("AIza-secret-key"));
        assert!(!format!("{session:?}").contains("AIza-secret-key"));
    }
}
