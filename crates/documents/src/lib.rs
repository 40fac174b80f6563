//! Reference document loading for PhysioGold.
//!
//! Turns the uploaded documents of a session into one corpus string:
//! documents in upload order, pages in page order, nothing inserted in
//! between. A document that cannot be read is skipped with a warning
//! instead of discarding the whole upload.

pub mod extract;
pub mod loader;

pub use extract::{ExtensionExtractor, PageExtractor, PdfExtractor, PlainTextExtractor};
pub use loader::{CorpusText, DocumentLoader, DocumentSummary, ExtractionWarning, LoadedCorpus};
