use serde::Serialize;
use thiserror::Error;

/// Structured error payload crossing the command boundary.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorInfo {
    pub kind: &'static str,
    pub message: String,
    pub context: Option<String>,
}

impl ErrorInfo {
    pub fn new(kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// Error taxonomy for the launcher core. Variants map 1:1 onto the kinds the
/// command surface is allowed to report; nothing below this boundary invents
/// a new kind without adding it here first.
#[derive(Error, Debug)]
pub enum LauncherError {
    #[error("network error: {0}")]
    Network(String),

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    Checksum { expected: String, actual: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("path traversal rejected: {0}")]
    PathTraversal(String),

    #[error("schema version {found} is newer than supported version {max_supported}")]
    SchemaTooNew { found: u32, max_supported: u32 },

    #[error("invalid schema: {0}")]
    SchemaInvalid(String),

    #[error("incompatible Java: found major {actual}, need {required}")]
    JavaIncompatible {
        actual: u32,
        required: u32,
        path: String,
    },

    #[error("instance busy: an install is already in flight")]
    Busy,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl LauncherError {
    pub fn kind(&self) -> &'static str {
        match self {
            LauncherError::Network(_) => "Network",
            LauncherError::Checksum { .. } => "Checksum",
            LauncherError::Filesystem(_) => "Filesystem",
            LauncherError::PathTraversal(_) => "Filesystem",
            LauncherError::SchemaTooNew { .. } => "SchemaTooNew",
            LauncherError::SchemaInvalid(_) => "SchemaInvalid",
            LauncherError::JavaIncompatible { .. } => "JavaIncompatible",
            LauncherError::Busy => "Busy",
            LauncherError::NotFound(_) => "NotFound",
            LauncherError::Cancelled => "Cancelled",
            LauncherError::Internal(_) => "Internal",
        }
    }

    pub fn to_error_info(&self) -> ErrorInfo {
        let info = ErrorInfo::new(self.kind(), self.to_string());
        match self {
            LauncherError::Checksum { expected, actual } => {
                info.with_context(format!("expected {expected}, got {actual}"))
            }
            LauncherError::JavaIncompatible {
                actual,
                required,
                path,
            } => info.with_context(format!("java at {path} is major {actual}, need {required}")),
            LauncherError::SchemaTooNew {
                found,
                max_supported,
            } => info.with_context(format!("on-disk schema {found} > supported {max_supported}")),
            _ => info,
        }
    }
}

impl From<std::io::Error> for LauncherError {
    fn from(err: std::io::Error) -> Self {
        LauncherError::Filesystem(err.to_string())
    }
}

impl From<reqwest::Error> for LauncherError {
    fn from(err: reqwest::Error) -> Self {
        LauncherError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for LauncherError {
    fn from(err: serde_json::Error) -> Self {
        LauncherError::SchemaInvalid(err.to_string())
    }
}

impl From<tokio::task::JoinError> for LauncherError {
    fn from(err: tokio::task::JoinError) -> Self {
        LauncherError::Internal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LauncherError>;

impl Serialize for LauncherError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_error_info().serialize(serializer)
    }
}
