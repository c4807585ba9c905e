//! File-to-text extraction, dispatched by extension.
//!
//! `.txt` and `.md` are read verbatim; `.pdf` goes through pdf-extract.
//! Anything else is rejected so callers fail before copying junk into a
//! collection.

use std::path::Path;

use crate::error::{Error, Result};

/// Extract plain text from the file at `path`.
///
/// PDF extraction is CPU-bound; run through `spawn_blocking` from async
/// contexts (the collection does).
pub fn extract_text(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(Error::NotFound(format!(
            "file does not exist: {}",
            path.display()
        )));
    }

    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "txt" | "md" => {
            tracing::debug!("Reading text file: {}", path.display());
            Ok(std::fs::read_to_string(path)?)
        }
        "pdf" => {
            let text = pdf_extract::extract_text(path)
                .map_err(|e| Error::Internal(format!("pdf extraction failed: {e}")))?;
            Ok(text)
        }
        other => Err(Error::Invalid(format!(
            "unsupported file type: .{other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_extract_txt_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        fs::write(&path, "hello\nworld").unwrap();
        assert_eq!(extract_text(&path).unwrap(), "hello\nworld");
    }

    #[test]
    fn test_extract_md_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readme.md");
        fs::write(&path, "# Title").unwrap();
        assert_eq!(extract_text(&path).unwrap(), "# Title");
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.png");
        fs::write(&path, [0u8; 4]).unwrap();
        assert!(matches!(extract_text(&path), Err(Error::Invalid(_))));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            extract_text(Path::new("/nonexistent/file.txt")),
            Err(Error::NotFound(_))
        ));
    }
}
