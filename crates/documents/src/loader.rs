//! Corpus building from a set of uploaded documents.

use physiogold_core::document::UploadedDocument;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::extract::{ExtensionExtractor, PageExtractor};

/// Concatenated text of every readable uploaded document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorpusText(String);

impl CorpusText {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl From<String> for CorpusText {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// What was extracted from one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentSummary {
    pub name: String,
    pub pages: usize,
    pub chars: usize,
}

/// A document that was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionWarning {
    pub document: String,
    pub message: String,
}

/// Result of loading a document set. Rebuilt from scratch on every change.
#[derive(Debug, Clone, Default)]
pub struct LoadedCorpus {
    pub text: CorpusText,
    pub documents: Vec<DocumentSummary>,
    pub warnings: Vec<ExtractionWarning>,
}

#[derive(Clone)]
pub struct DocumentLoader {
    extractor: Arc<dyn PageExtractor>,
}

impl DocumentLoader {
    pub fn new(extractor: Arc<dyn PageExtractor>) -> Self {
        Self { extractor }
    }

    /// Extract and concatenate all documents, skipping unreadable ones.
    pub fn load(&self, documents: &[UploadedDocument]) -> LoadedCorpus {
        let mut corpus = LoadedCorpus::default();
        let mut text = String::new();

        for document in documents {
            match self.extractor.extract_pages(document) {
                Ok(pages) => {
                    let before = text.len();
                    for page in &pages {
                        text.push_str(page);
                    }
                    corpus.documents.push(DocumentSummary {
                        name: document.name.clone(),
                        pages: pages.len(),
                        chars: text[before..].chars().count(),
                    });
                }
                Err(e) => {
                    warn!(document = %document.name, error = %e, "Skipping unreadable document");
                    corpus.warnings.push(ExtractionWarning {
                        document: document.name.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        debug!(
            documents = corpus.documents.len(),
            skipped = corpus.warnings.len(),
            bytes = text.len(),
            "Corpus rebuilt"
        );
        corpus.text = CorpusText(text);
        corpus
    }

    /// `load` on the blocking pool; PDF parsing is CPU bound.
    pub async fn load_blocking(&self, documents: Vec<UploadedDocument>) -> LoadedCorpus {
        let loader = self.clone();
        let names: Vec<String> = documents.iter().map(|d| d.name.clone()).collect();

        match tokio::task::spawn_blocking(move || loader.load(&documents)).await {
            Ok(corpus) => corpus,
            Err(e) => {
                warn!(error = %e, "Document extraction task failed");
                LoadedCorpus {
                    warnings: names
                        .into_iter()
                        .map(|document| ExtractionWarning {
                            document,
                            message: format!("extraction task failed: {e}"),
                        })
                        .collect(),
                    ..LoadedCorpus::default()
                }
            }
        }
    }
}

impl Default for DocumentLoader {
    fn default() -> Self {
        Self::new(Arc::new(ExtensionExtractor::default()))
    }
}
