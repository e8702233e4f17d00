//! Error taxonomy.
//!
//! Three families of failure flow through the crate:
//!
//! | Family | Type | Policy |
//! |--------|------|--------|
//! | Misconfiguration | [`ConfigError`] | always raised |
//! | Remote service | [`RemoteError`] | raised or logged, per [`SafeIndex`](crate::safe_index::SafeIndex) |
//! | Record extraction / data store | [`SyncError::Extraction`], [`SyncError::Store`] | always raised |

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("failed to compute attribute '{attribute}': {source}")]
    Extraction {
        attribute: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("data store error: {0}")]
    Store(#[source] anyhow::Error),
}

impl SyncError {
    pub fn extraction(attribute: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Extraction {
            attribute: attribute.into(),
            source,
        }
    }

    pub fn store(source: anyhow::Error) -> Self {
        Self::Store(source)
    }

    /// True when the error is a remote 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::Remote(e) if e.is_not_found())
    }
}

/// Integrator misconfiguration. Never tolerated silently.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("cannot index a record with a blank object id")]
    BlankObjectId,

    #[error("cannot mix slaves and replicas in the same configuration (add_slave is deprecated)")]
    MixedReplicaKinds,

    #[error("cannot specify additional attributes on a replica index ({0})")]
    AttributesOnReplica(String),

    #[error("cannot specify additional indexes on a replica index ({0})")]
    NestedOnReplica(String),

    #[error("options auto_index and auto_remove cannot be set on nested indexes ({0})")]
    AutoOptionsOnNested(String),

    #[error("cannot use enqueue when the synchronous option is set")]
    EnqueueWithSynchronous,

    #[error("the inherit option only applies to replica indexes ({0})")]
    InheritOnNonReplica(String),

    #[error("unknown index setting: {0}")]
    UnknownSetting(String),

    #[error("invalid index/replica name: {0}")]
    UnknownIndex(String),

    #[error("model '{0}' is already registered")]
    DuplicateModel(String),

    #[error("model '{0}' was registered with a different record type")]
    ModelTypeMismatch(String),

    #[error("unknown model: {0}")]
    UnknownModel(String),
}

/// A failure reported by the remote search service or its transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("remote error{}: {message}", .status.map(|s| format!(" {}", s)).unwrap_or_default())]
pub struct RemoteError {
    /// HTTP status when the service answered; `None` for transport failures.
    pub status: Option<u16>,
    pub message: String,
}

impl RemoteError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(404, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_error_display_includes_status() {
        let e = RemoteError::new(503, "service unavailable");
        assert_eq!(e.to_string(), "remote error 503: service unavailable");

        let t = RemoteError::transport("connection reset");
        assert_eq!(t.to_string(), "remote error: connection reset");
    }

    #[test]
    fn not_found_detection() {
        let err: SyncError = RemoteError::not_found("Index does not exist").into();
        assert!(err.is_not_found());

        let err: SyncError = ConfigError::BlankObjectId.into();
        assert!(!err.is_not_found());
    }
}
