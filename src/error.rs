use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TexPackError>;

#[derive(Debug, Error)]
pub enum TexPackError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("ZIP archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Project root not specified (pass --root or set OVERLEAF_ROOT)")]
    ProjectRootNotSet,

    #[error("Main file not found: {0}")]
    MissingMainFile(PathBuf),

    #[error("Unsupported bibliography backend: {0}")]
    UnsupportedBackend(String),

    #[error("Unsupported archive format: {0} (use 'gz' or 'zip')")]
    UnsupportedArchiveFormat(String),

    #[error("Invalid source: {0}")]
    InvalidSource(String),

    #[error("Image conversion failed for {path}: {reason}")]
    ImageConversion { path: PathBuf, reason: String },

    #[error("Malformed BibTeX in {path}: {reason}")]
    MalformedBibtex { path: PathBuf, reason: String },
}
