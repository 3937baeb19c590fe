//! Error types shared by every reviewflow-core module.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::types::{ArticleId, Step};

#[derive(Debug, Error)]
pub enum Error {
    /// Bad input rejected before any side effect (including provider cost).
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// The generation provider failed; no record was written.
    #[error("generation failed for article {article_id}: {source}")]
    Generation {
        article_id: ArticleId,
        #[source]
        source: ProviderError,
    },

    /// Saving decisions failed. The session stays dirty.
    #[error("failed to persist decisions for article {article_id}: {reason}")]
    Persistence { article_id: ArticleId, reason: String },

    #[error("cannot navigate from {from} to {to}: {reason}")]
    NavigationBlocked { from: Step, to: Step, reason: String },

    #[error("a review session is already open for article {0}")]
    SessionAlreadyOpen(ArticleId),

    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A value does not fit the column type it is stored in.
    #[error("{field} out of range for storage: {value}")]
    OutOfRange { field: &'static str, value: u64 },

    /// The background generation task panicked or was cancelled.
    #[error("generation task for article {article_id} did not finish: {reason}")]
    GenerationTask { article_id: ArticleId, reason: String },

    /// An error produced once and observed by several waiters of the same
    /// in-flight generation.
    #[error(transparent)]
    Shared(Arc<Error>),
}

impl Error {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Error::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Turns the error of a shared generation back into an owned one.
    ///
    /// Variants with cloneable contents are rebuilt so every waiter can match
    /// on them; only storage errors stay behind `Error::Shared`.
    pub(crate) fn from_shared(err: Arc<Error>) -> Self {
        let shared = match Arc::try_unwrap(err) {
            Ok(owned) => return owned,
            Err(shared) => shared,
        };
        let rebuilt = match &*shared {
            Error::Validation(msg) => Some(Error::Validation(msg.clone())),
            Error::NotFound { kind, id } => Some(Error::NotFound {
                kind: *kind,
                id: id.clone(),
            }),
            Error::Generation { article_id, source } => Some(Error::Generation {
                article_id: *article_id,
                source: source.clone(),
            }),
            Error::Persistence { article_id, reason } => Some(Error::Persistence {
                article_id: *article_id,
                reason: reason.clone(),
            }),
            Error::OutOfRange { field, value } => Some(Error::OutOfRange {
                field: *field,
                value: *value,
            }),
            Error::GenerationTask { article_id, reason } => Some(Error::GenerationTask {
                article_id: *article_id,
                reason: reason.clone(),
            }),
            _ => None,
        };
        rebuilt.unwrap_or_else(|| Error::Shared(shared))
    }

    /// True for `NotFound`, including one observed through a shared handle.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Shared(inner) => inner.is_not_found(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failures reported by (or while talking to) the AI generation provider.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Network-level hiccup worth one retry.
    #[error("transient provider failure: {0}")]
    Transient(String),

    #[error("provider rejected the request: {0}")]
    Rejected(String),

    #[error("provider did not answer within {0:?}")]
    Timeout(Duration),

    #[error("provider payload could not be parsed: {0}")]
    MalformedPayload(String),

    #[error("provider payload out of bounds: {0}")]
    OutOfBounds(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

/// Failures while loading the TOML configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config parse error in {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
