//! Error types for the Cactus orchestration layer.

use std::path::PathBuf;

/// Result type for experiment, tree and tool operations.
pub type CactusResult<T> = Result<T, CactusError>;

/// Errors raised while reading configuration documents or dispatching tools.
#[derive(Debug, thiserror::Error)]
pub enum CactusError {
    /// Filesystem access failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The XML document could not be parsed or written.
    #[error("XML error: {0}")]
    Xml(String),

    /// A required element is absent.
    #[error("Missing element <{0}>")]
    MissingElement(String),

    /// A required attribute is absent.
    #[error("Missing attribute '{attribute}' on <{element}>")]
    MissingAttribute { element: String, attribute: String },

    /// An attribute holds a value that cannot be used.
    #[error("Invalid value '{value}' for attribute '{attribute}': {reason}")]
    InvalidAttribute {
        attribute: String,
        value: String,
        reason: String,
    },

    /// Newick string could not be parsed.
    #[error("Newick parse error at offset {offset}: {message}")]
    Newick { offset: usize, message: String },

    /// Event (leaf) name not present in the species tree.
    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    /// Operation not supported by the configured database type.
    #[error("Database type '{actual}' does not support {operation}")]
    DatabaseType { actual: String, operation: String },

    /// Invalid input to a command builder.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// An external tool could not be started.
    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// An external tool exited unsuccessfully.
    #[error("{program} exited with status {status}: {stderr}")]
    ToolFailed {
        program: String,
        status: i32,
        stderr: String,
    },

    /// A flat-file tool output did not have the expected shape.
    #[error("Malformed output {path} line {line}: {reason}")]
    MalformedOutput {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// The job tree did not finish every step.
    #[error("Job tree {path} is not complete: {reason}")]
    JobTreeIncomplete { path: PathBuf, reason: String },
}

impl CactusError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn missing_attribute(element: &str, attribute: &str) -> Self {
        Self::MissingAttribute {
            element: element.to_string(),
            attribute: attribute.to_string(),
        }
    }

    /// Tool failures can be retried; document errors cannot.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ToolFailed { .. } | Self::Spawn { .. })
    }
}

impl From<quick_xml::Error> for CactusError {
    fn from(err: quick_xml::Error) -> Self {
        Self::Xml(err.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for CactusError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        Self::Xml(err.to_string())
    }
}
