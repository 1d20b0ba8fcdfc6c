//! On-disk storage for registration documents.
//!
//! Files are stored flat in the upload directory under generated names and
//! referenced from the registration row by their public `/uploads/...` path.

use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

use crate::config::UploadConfig;

/// URL prefix the upload directory is served under
pub const PUBLIC_PREFIX: &str = "/uploads/";

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("file exceeds maximum allowed size of {0} bytes")]
    TooLarge(usize),

    #[error("file type '{0}' is not allowed")]
    DisallowedType(String),

    #[error("uploaded file is empty")]
    Empty,

    #[error("failed to store file: {0}")]
    Io(#[from] std::io::Error),
}

/// Documents accepted with a registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    IdDocument,
    MunResume,
}

impl DocumentKind {
    /// Multipart field name
    pub fn field_name(&self) -> &'static str {
        match self {
            DocumentKind::IdDocument => "idDocument",
            DocumentKind::MunResume => "munResume",
        }
    }

    pub fn from_field(name: &str) -> Option<Self> {
        match name {
            "idDocument" => Some(DocumentKind::IdDocument),
            "munResume" => Some(DocumentKind::MunResume),
            _ => None,
        }
    }

    fn slug(&self) -> &'static str {
        match self {
            DocumentKind::IdDocument => "id-document",
            DocumentKind::MunResume => "mun-resume",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DocumentStore {
    dir: PathBuf,
    max_bytes: usize,
    allowed_extensions: Vec<String>,
}

impl DocumentStore {
    pub fn new(config: &UploadConfig) -> Self {
        Self {
            dir: config.dir.clone(),
            max_bytes: config.max_file_bytes,
            allowed_extensions: config
                .allowed_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Lowercased extension of an uploaded file name, if allowed
    pub fn check_extension(&self, original_name: &str) -> Result<String, UploadError> {
        let ext = Path::new(original_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        if ext.is_empty() || !self.allowed_extensions.contains(&ext) {
            return Err(UploadError::DisallowedType(if ext.is_empty() {
                original_name.to_string()
            } else {
                ext
            }));
        }
        Ok(ext)
    }

    /// Write a document and return its public path
    pub async fn save(
        &self,
        kind: DocumentKind,
        original_name: &str,
        data: &[u8],
    ) -> Result<String, UploadError> {
        if data.is_empty() {
            return Err(UploadError::Empty);
        }
        if data.len() > self.max_bytes {
            return Err(UploadError::TooLarge(self.max_bytes));
        }
        let ext = self.check_extension(original_name)?;

        fs::create_dir_all(&self.dir).await?;

        let file_name = format!("{}-{}.{}", uuid::Uuid::new_v4(), kind.slug(), ext);
        let path = self.dir.join(&file_name);
        fs::write(&path, data).await?;

        debug!(path = %path.display(), bytes = data.len(), "Stored upload");
        Ok(format!("{}{}", PUBLIC_PREFIX, file_name))
    }

    /// Map a stored public path back to a file inside the upload dir.
    ///
    /// Only the final path component is used, so a stored value cannot
    /// point outside the directory.
    fn resolve(&self, stored: &str) -> Option<PathBuf> {
        let name = Path::new(stored).file_name()?.to_str()?;
        if name.is_empty() || name == "." || name == ".." {
            return None;
        }
        Some(self.dir.join(name))
    }

    /// Delete a stored document. Missing files are not an error.
    pub async fn remove(&self, stored: &str) {
        let Some(path) = self.resolve(stored) else {
            warn!(stored = %stored, "Ignoring unresolvable upload path");
            return;
        };
        match fs::remove_file(&path).await {
            Ok(()) => debug!(path = %path.display(), "Removed upload"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove upload"),
        }
    }
}
