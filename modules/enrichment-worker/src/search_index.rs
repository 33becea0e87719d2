//! Fire-and-forget resync notifications for the search index.

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Failures are logged, never returned.
    async fn sync_member(&self, member_id: Uuid);

    async fn sync_organizations(&self, organization_ids: &[Uuid]);
}

/// Client for the search-sync HTTP service.
pub struct HttpSearchIndex {
    http: reqwest::Client,
    base_url: String,
}

impl HttpSearchIndex {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<(), reqwest::Error> {
        self.http
            .post(format!("{}{}", self.base_url, path))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl SearchIndex for HttpSearchIndex {
    async fn sync_member(&self, member_id: Uuid) {
        let body = json!({ "memberId": member_id, "withAggs": false });
        match self.post("/sync/members", body).await {
            Ok(()) => debug!(%member_id, "Member search sync triggered"),
            Err(e) => warn!(%member_id, error = %e, "Failed to trigger member search sync"),
        }
    }

    async fn sync_organizations(&self, organization_ids: &[Uuid]) {
        for organization_id in organization_ids {
            let body = json!({ "organizationIds": [organization_id], "withAggs": false });
            if let Err(e) = self.post("/sync/organizations", body).await {
                warn!(%organization_id, error = %e, "Failed to trigger organization search sync");
            }
        }
    }
}

/// Used when no search-sync URL is configured.
pub struct NoopSearchIndex;

#[async_trait]
impl SearchIndex for NoopSearchIndex {
    async fn sync_member(&self, _member_id: Uuid) {}

    async fn sync_organizations(&self, _organization_ids: &[Uuid]) {}
}
