pub mod attributes;
pub mod config;
pub mod dates;
pub mod error;
pub mod source;
pub mod types;

pub use config::{EnrichmentConfig, VendorConfig};
pub use error::{EnrichmentError, Result};
pub use source::SourceKind;
pub use types::*;
