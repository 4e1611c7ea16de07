//! Error types for tocsplit operations.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

/// Errors that abort the conversion of one input file.
///
/// Malformed navigation documents and unresolved anchors are not represented
/// here: both are recovered from inside the pipeline and only logged.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid EPUB container: {0}")]
    Archive(String),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Rendering failed: {0}")]
    Render(#[from] RenderError),

    #[error("Cannot write {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Filesystem {
            path: path.into(),
            source,
        }
    }
}

/// Failures of the external Markdown engine.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("pandoc executable not found (searched PATH and common install locations)")]
    NotFound,

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("engine exited with {status}: {stderr}")]
    Failed { status: ExitStatus, stderr: String },

    #[error("engine did not finish within {0:?}")]
    Timeout(Duration),

    #[error("engine returned non-UTF-8 output")]
    InvalidOutput(#[from] std::string::FromUtf8Error),

    #[error("engine I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
