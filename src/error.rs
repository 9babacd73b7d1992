use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid hex file: {0}")]
    Hex(#[from] HexError),

    #[error("Invalid package: {0}")]
    Package(#[from] PackageError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("Temporary file error at {}: {}", .path.display(), .source)]
    Resource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

/// Hex record failures, tagged with the 1-based line number.
#[derive(Error, Debug)]
pub enum HexError {
    #[error("line {line}: malformed record")]
    MalformedLine { line: usize },

    #[error("line {line}: byte count does not match record length")]
    LengthMismatch { line: usize },

    #[error("line {line}: checksum mismatch")]
    ChecksumMismatch { line: usize },

    #[error("line {line}: {source}")]
    Record {
        line: usize,
        #[source]
        source: ihex::ReaderError,
    },
}

#[derive(Error, Debug)]
pub enum PackageError {
    #[error("failed to read archive")]
    ArchiveUnreadable(#[source] zip::result::ZipError),

    #[error("missing manifest.json")]
    MissingManifest,

    #[error("failed to parse manifest.json")]
    MalformedManifest(#[source] serde_json::Error),

    #[error("chip \"{0}\" is not supported")]
    UnsupportedChip(String),

    #[error("manifest.json is missing field \"images\"")]
    MissingImages,

    #[error("manifest.json field \"images\" is empty")]
    EmptyImages,

    #[error("manifest.json is missing field \"{0}\"")]
    MissingField(&'static str),

    #[error("invalid address \"{0}\"")]
    InvalidAddress(String),

    #[error("file {0} not found in archive")]
    MissingEntry(String),

    #[error("md5 of {file} does not match manifest (expected {expected}, got {actual})")]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to start burner: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Burner terminated by signal {}", .signal.map_or_else(|| "unknown".to_string(), |s| s.to_string()))]
    Terminated { signal: Option<i32> },

    #[error("Burner exited with code {code}{}", .last_error.as_ref().map(|e| format!(": {e}")).unwrap_or_default())]
    AbnormalExit {
        code: i32,
        last_error: Option<String>,
    },

    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// Cancelled operations are expected to be discarded silently.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Process(ProcessError::Cancelled))
    }

    /// Short, user facing description of the failure.
    pub fn summary(&self) -> &'static str {
        match self {
            Error::Hex(_) => "Not a valid hex file",
            Error::Package(_) => "Not a valid LPK package",
            Error::Process(ProcessError::Cancelled) => "Flashing cancelled",
            Error::Process(_) => "Flashing failed",
            Error::Resource { .. } => "Temporary file error",
            Error::Io(_) => "File error",
            Error::Configuration(_) => "Invalid configuration",
        }
    }

    /// Technical detail to show next to the summary.
    pub fn details(&self) -> Option<String> {
        match self {
            Error::Hex(e) => Some(e.to_string()),
            Error::Package(e) => Some(e.to_string()),
            Error::Process(ProcessError::Cancelled) => None,
            Error::Process(e) => Some(e.to_string()),
            Error::Resource { source, .. } => Some(source.to_string()),
            Error::Io(e) => Some(e.to_string()),
            Error::Configuration(msg) => Some(msg.clone()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
