//! Uploaded reference documents.

use serde::Serialize;

/// A document as uploaded by the user, kept in upload order.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct UploadedDocument {
    pub name: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

impl UploadedDocument {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// Lowercased file extension, if any.
    pub fn extension(&self) -> Option<String> {
        std::path::Path::new(&self.name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }
}

impl std::fmt::Debug for UploadedDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadedDocument")
            .field("name", &self.name)
            .field("size", &self.bytes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_is_lowercased() {
        let doc = UploadedDocument::new("Guidelines.PDF", b"%PDF".to_vec());
        assert_eq!(doc.extension().as_deref(), Some("pdf"));
    }

    #[test]
    fn debug_omits_bytes() {
        let doc = UploadedDocument::new("notes.txt", b"secret body".to_vec());
        let debug = format!("{doc:?}");
        assert!(debug.contains("notes.txt"));
        assert!(!debug.contains("secret body"));
    }
}
