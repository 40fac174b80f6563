//! Per-page text extraction.

use physiogold_core::document::UploadedDocument;
use physiogold_core::error::DocumentError;

/// Extracts the text of each page of a document, in page order.
pub trait PageExtractor: Send + Sync {
    fn extract_pages(&self, document: &UploadedDocument) -> Result<Vec<String>, DocumentError>;
}

/// PDF text via `pdf-extract`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfExtractor;

impl PageExtractor for PdfExtractor {
    fn extract_pages(&self, document: &UploadedDocument) -> Result<Vec<String>, DocumentError> {
        let failed = |reason: String| DocumentError::ExtractionFailed {
            name: document.name.clone(),
            reason,
        };

        // pdf-extract panics on some malformed inputs
        let bytes = document.bytes.as_slice();
        std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes))
            .map_err(|_| failed("parser panicked on malformed PDF".into()))?
            .map_err(|e| failed(e.to_string()))
    }
}

/// UTF-8 text files, treated as a single page.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

impl PageExtractor for PlainTextExtractor {
    fn extract_pages(&self, document: &UploadedDocument) -> Result<Vec<String>, DocumentError> {
        std::str::from_utf8(&document.bytes)
            .map(|text| vec![text.to_string()])
            .map_err(|e| DocumentError::ExtractionFailed {
                name: document.name.clone(),
                reason: format!("not valid UTF-8: {e}"),
            })
    }
}

/// Dispatches on file extension, falling back to the `%PDF` magic bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtensionExtractor {
    pdf: PdfExtractor,
    text: PlainTextExtractor,
}

const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "markdown", "text"];

impl PageExtractor for ExtensionExtractor {
    fn extract_pages(&self, document: &UploadedDocument) -> Result<Vec<String>, DocumentError> {
        match document.extension().as_deref() {
            Some("pdf") => self.pdf.extract_pages(document),
            Some(ext) if TEXT_EXTENSIONS.contains(&ext) => self.text.extract_pages(document),
            _ if document.bytes.starts_with(b"%PDF") => self.pdf.extract_pages(document),
            _ => Err(DocumentError::Unsupported(document.name.clone())),
        }
    }
}
