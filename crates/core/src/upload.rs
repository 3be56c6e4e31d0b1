//! The uploaded file as handed over by the upload-handling collaborator.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Extensions accepted when no explicit list is configured.
pub const DEFAULT_ALLOWED_EXTENSIONS: [&str; 7] =
    [".pdf", ".doc", ".docx", ".txt", ".jpg", ".jpeg", ".png"];

/// A file staged on local disk by the upload boundary, waiting to be processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    /// Name the client uploaded the file under.
    pub original_name: String,
    /// Where the upload boundary staged the bytes.
    pub temp_path: PathBuf,
    pub mime_type: String,
    pub size_bytes: u64,
}

impl FileDescriptor {
    pub fn new(
        original_name: impl Into<String>,
        temp_path: impl Into<PathBuf>,
        mime_type: impl Into<String>,
        size_bytes: u64,
    ) -> Self {
        Self {
            original_name: original_name.into(),
            temp_path: temp_path.into(),
            mime_type: mime_type.into(),
            size_bytes,
        }
    }

    /// Lower-cased extension including the leading dot (`".pdf"`), or an
    /// empty string when the name has none.
    pub fn extension(&self) -> String {
        Path::new(&self.original_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .filter(|ext| !ext.is_empty())
            .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
            .unwrap_or_default()
    }

    /// Structural checks: a usable name and a staged path.
    pub fn validate(&self) -> DomainResult<()> {
        let name = self.original_name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("original name is empty"));
        }
        if name.contains('/') || name.contains('\\') {
            return Err(DomainError::validation("original name must not contain path separators"));
        }
        if self.temp_path.as_os_str().is_empty() {
            return Err(DomainError::validation("temp path is empty"));
        }
        Ok(())
    }
}

/// Allow-list of file extensions, normalized to lower case with a leading dot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllowedExtensions(Vec<String>);

impl AllowedExtensions {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = Vec::new();
        for ext in extensions {
            let ext = ext.as_ref().trim().to_ascii_lowercase();
            if ext.is_empty() {
                continue;
            }
            let ext = if ext.starts_with('.') { ext } else { format!(".{ext}") };
            if !normalized.contains(&ext) {
                normalized.push(ext);
            }
        }
        Self(normalized)
    }

    /// Parse a comma-separated list such as `".pdf, txt,.PNG"`.
    pub fn parse_list(list: &str) -> Self {
        Self::new(list.split(','))
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn allows(&self, descriptor: &FileDescriptor) -> bool {
        let ext = descriptor.extension();
        !ext.is_empty() && self.0.iter().any(|allowed| *allowed == ext)
    }

    /// Fails with [`DomainError::InvalidFileType`] when the extension is not allowed.
    pub fn check(&self, descriptor: &FileDescriptor) -> DomainResult<()> {
        if self.allows(descriptor) {
            Ok(())
        } else {
            Err(DomainError::invalid_file_type(descriptor.extension()))
        }
    }
}

impl Default for AllowedExtensions {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_EXTENSIONS)
    }
}
