//! `auditgrid-io` — loads engagement extracts from disk into typed records.
//!
//! All column-name knowledge and value coercion lives here. The engine crate
//! never sees a raw field; it receives `Dataset` records with every
//! unparseable value already collapsed to `None` and counted.

pub mod csv;

pub use csv::{load_client_aging, load_dataset, LoadStats};

/// IO-layer failures. Data-quality problems inside a readable file are not
/// errors; they degrade to `None` fields and show up in [`LoadStats`].
#[derive(Debug)]
pub enum IoError {
    /// Underlying filesystem or decoder failure.
    Read { path: String, source: std::io::Error },
    /// Malformed CSV structure (not value-level coercion).
    Csv { path: String, message: String },
    /// A key column the loader cannot proceed without.
    MissingColumn { path: String, column: String },
    /// Only `.csv` extracts are supported.
    UnsupportedFormat(String),
}

impl std::fmt::Display for IoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read { path, source } => write!(f, "failed to read {path}: {source}"),
            Self::Csv { path, message } => write!(f, "malformed CSV in {path}: {message}"),
            Self::MissingColumn { path, column } => {
                write!(f, "{path}: required column '{column}' not found")
            }
            Self::UnsupportedFormat(path) => {
                write!(f, "unsupported file format: {path} (expected .csv)")
            }
        }
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Read { source, .. } => Some(source),
            _ => None,
        }
    }
}
