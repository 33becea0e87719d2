pub mod cache;
pub mod credit;
pub mod eligibility;
pub mod profile;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

#[cfg(feature = "test-utils")]
pub mod testutil;

pub use cache::{EnrichmentCacheStore, PgEnrichmentCacheStore};
pub use credit::{CreditStatusCache, InMemoryCreditStatusCache, PgCreditStatusCache};
pub use eligibility::{EligibilityQuery, SourceQueryInput};
pub use profile::{PgProfileStore, ProfileStore, ProfileTransaction};

use sqlx::PgPool;

/// Run the embedded SQL migrations.
pub async fn migrate(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
