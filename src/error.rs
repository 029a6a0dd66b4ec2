//! Error taxonomy shared by every component of the pipeline.
//!
//! Raw I/O, database, and third-party failures are converted into a
//! [`RagError`] at the component boundary where they occur, so callers only
//! ever see one of the kinds below.
//!
//! | Kind | Raised by | Recovery |
//! |------|-----------|----------|
//! | [`Configuration`](RagError::Configuration) | config, chunker, store | fatal at startup |
//! | [`SourceUnavailable`](RagError::SourceUnavailable) | source walk | fatal during rebuild |
//! | [`CorruptState`](RagError::CorruptState) | store load | triggers a rebuild |
//! | [`Store`](RagError::Store) | store | retried, then fatal |
//! | [`NotReady`](RagError::NotReady) | retrieval pipeline | returned to callers |
//! | [`Embedding`](RagError::Embedding) | embedders | retried per batch, then fatal |

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = RagError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum RagError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("source directory unavailable: {}: {reason}", path.display())]
    SourceUnavailable { path: PathBuf, reason: String },

    #[error("persisted index state is corrupt: {0}")]
    CorruptState(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("index is not ready")]
    NotReady,

    #[error("embedding failed: {message}")]
    Embedding { message: String, retryable: bool },
}

impl RagError {
    pub fn configuration(message: impl Into<String>) -> Self {
        RagError::Configuration(message.into())
    }

    pub fn corrupt(message: impl Into<String>) -> Self {
        RagError::CorruptState(message.into())
    }

    pub fn store(message: impl Into<String>) -> Self {
        RagError::Store(message.into())
    }

    /// A transient embedding failure (timeouts, 429/5xx, model load hiccups).
    pub fn embedding_transient(message: impl Into<String>) -> Self {
        RagError::Embedding {
            message: message.into(),
            retryable: true,
        }
    }

    /// An embedding failure that another attempt will not fix.
    pub fn embedding_permanent(message: impl Into<String>) -> Self {
        RagError::Embedding {
            message: message.into(),
            retryable: false,
        }
    }

    /// Machine-readable class reported to HTTP callers instead of the message.
    pub fn class(&self) -> &'static str {
        match self {
            RagError::Configuration(_) => "configuration_error",
            RagError::SourceUnavailable { .. } => "source_unavailable",
            RagError::CorruptState(_) => "corrupt_state",
            RagError::Store(_) => "store_error",
            RagError::NotReady => "not_ready",
            RagError::Embedding { .. } => "embedding_failure",
        }
    }

    /// Whether a [`RetryPolicy`](crate::retry::RetryPolicy) may try again.
    pub fn is_retryable(&self) -> bool {
        match self {
            RagError::Store(_) => true,
            RagError::Embedding { retryable, .. } => *retryable,
            _ => false,
        }
    }
}

impl From<sqlx::Error> for RagError {
    fn from(err: sqlx::Error) -> Self {
        RagError::Store(err.to_string())
    }
}

impl From<std::io::Error> for RagError {
    fn from(err: std::io::Error) -> Self {
        RagError::Store(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(RagError::store("locked").is_retryable());
        assert!(RagError::embedding_transient("429").is_retryable());
        assert!(!RagError::embedding_permanent("400").is_retryable());
        assert!(!RagError::configuration("bad overlap").is_retryable());
        assert!(!RagError::corrupt("count mismatch").is_retryable());
        assert!(!RagError::NotReady.is_retryable());
    }

    #[test]
    fn test_class_names() {
        assert_eq!(RagError::NotReady.class(), "not_ready");
        assert_eq!(
            RagError::embedding_transient("timed out").class(),
            "embedding_failure"
        );
        let err = RagError::SourceUnavailable {
            path: PathBuf::from("/missing"),
            reason: "not found".into(),
        };
        assert_eq!(err.class(), "source_unavailable");
        assert!(err.to_string().contains("/missing"));
    }
}
