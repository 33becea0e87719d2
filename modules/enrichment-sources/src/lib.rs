pub mod attribute_settings;
pub mod clearbit;
pub mod crustdata;
pub mod error;
pub(crate) mod http;
pub mod linkedin;
pub mod linkedin_scraper;
pub(crate) mod payload;
pub mod progai;
pub mod registry;
pub mod serp;
pub mod social;
pub mod source;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use error::VendorError;
pub use registry::SourceRegistry;
pub use source::{EnrichmentSource, SourceSettings};
