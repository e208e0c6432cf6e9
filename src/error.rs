//! Error types for the sandbox core.

use std::path::PathBuf;

/// Errors raised by capability primitives and the surrounding machinery.
///
/// Security denials deliberately share one variant: the snippet only ever
/// sees the rendered message, and every denial renders with the
/// `SecurityException:` prefix so callers (and tests) can recognize the
/// class without matching on internals.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// A capability contract was breached (path escape, classified-op
    /// mismatch, disallowed command or host, use outside scope).
    #[error("SecurityException: {0}")]
    Security(String),

    /// A spawned process exceeded its timeout and was terminated.
    #[error("process '{command}' timed out after {timeout_ms} ms")]
    Timeout { command: String, timeout_ms: u64 },

    /// The chat primitive was invoked without a configured endpoint.
    #[error("chat endpoint not configured")]
    ChatNotConfigured,

    /// The chat endpoint was reached but the exchange failed.
    #[error("chat request failed: {0}")]
    Chat(String),

    /// An I/O failure on a host path.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A user-supplied regex or glob did not compile.
    #[error("invalid pattern: {0}")]
    Pattern(String),

    /// An HTTP request failed below the status-code level.
    #[error("http request failed: {0}")]
    Http(String),

    /// A session id had no live session behind it.
    #[error("unknown session: {0}")]
    UnknownSession(String),
}

impl SandboxError {
    /// Convenience constructor for security denials.
    pub fn security(reason: impl Into<String>) -> Self {
        Self::Security(reason.into())
    }

    /// Wraps an I/O error with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result alias used throughout the sandbox core.
pub type Result<T> = std::result::Result<T, SandboxError>;
