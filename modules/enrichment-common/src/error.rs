//! Worker-level error taxonomy.

use thiserror::Error;
use uuid::Uuid;

use crate::source::SourceKind;

pub type Result<T> = std::result::Result<T, EnrichmentError>;

#[derive(Debug, Error)]
pub enum EnrichmentError {
    /// Storage or transaction failure. Retried by the durable layer.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Vendor call failed after classification.
    #[error("{vendor} vendor error: {message}")]
    Vendor {
        vendor: SourceKind,
        message: String,
        retryable: bool,
    },

    /// Missing or invalid configuration (unknown source, bad credentials).
    #[error("configuration error: {0}")]
    Config(String),

    #[error("member not found: {0}")]
    MemberNotFound(Uuid),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EnrichmentError {
    /// Whether the durable layer should retry the step that produced this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Database(_) | Self::Other(_) => true,
            Self::Vendor { retryable, .. } => *retryable,
            Self::Config(_) | Self::MemberNotFound(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let transient = EnrichmentError::Vendor {
            vendor: SourceKind::Serp,
            message: "429".into(),
            retryable: true,
        };
        assert!(transient.is_retryable());
        assert!(!EnrichmentError::Config("no key".into()).is_retryable());
        assert!(!EnrichmentError::MemberNotFound(Uuid::nil()).is_retryable());
        assert!(EnrichmentError::Other(anyhow::anyhow!("boom")).is_retryable());
    }
}
