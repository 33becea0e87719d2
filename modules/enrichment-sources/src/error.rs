use enrichment_common::{EnrichmentError, SourceKind};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, VendorError>;

#[derive(Debug, Clone, Error)]
pub enum VendorError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Unauthorized (status {status})")]
    Unauthorized { status: u16 },

    #[error("Rate limited")]
    RateLimited,

    #[error("Parse error: {0}")]
    Parse(String),
}

impl VendorError {
    /// Transient failures are worth another attempt; the rest are configuration
    /// or contract problems that retrying will not fix.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::RateLimited => true,
            Self::Api { status, .. } => *status >= 500,
            Self::Unauthorized { .. } | Self::Parse(_) => false,
        }
    }

    pub fn into_enrichment_error(self, vendor: SourceKind) -> EnrichmentError {
        EnrichmentError::Vendor {
            vendor,
            retryable: self.is_retryable(),
            message: self.to_string(),
        }
    }
}

impl From<reqwest::Error> for VendorError {
    fn from(err: reqwest::Error) -> Self {
        VendorError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for VendorError {
    fn from(err: serde_json::Error) -> Self {
        VendorError::Parse(err.to_string())
    }
}
