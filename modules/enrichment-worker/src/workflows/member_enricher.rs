//! Restate virtual object enriching one member, keyed by member id.
//!
//! Each source is its own journaled step, so a crash mid-member resumes at
//! the first source that has not completed. Keying by member serializes
//! concurrent requests for the same member.

use std::collections::BTreeMap;
use std::sync::Arc;

use restate_sdk::prelude::*;
use tracing::{info, warn};

use crate::deps::EnrichmentDeps;
use crate::orchestrator::{load_member, process_source, should_reconcile};

use super::member_squasher::MemberSquasherClient;
use super::{
    enrichment_retry_policy, handler_error, member_key, read_status, Done, EmptyRequest,
    EnrichMemberResult, MemberSnapshot, SquashRequest,
};

#[restate_sdk::object]
#[name = "MemberEnricher"]
pub trait MemberEnricher {
    async fn enrich() -> Result<EnrichMemberResult, HandlerError>;
    #[shared]
    async fn get_status(req: EmptyRequest) -> Result<String, HandlerError>;
}

pub struct MemberEnricherImpl {
    deps: Arc<EnrichmentDeps>,
}

impl MemberEnricherImpl {
    pub fn with_deps(deps: Arc<EnrichmentDeps>) -> Self {
        Self { deps }
    }
}

impl MemberEnricher for MemberEnricherImpl {
    async fn enrich(&self, ctx: ObjectContext<'_>) -> Result<EnrichMemberResult, HandlerError> {
        let member_id = member_key(ctx.key())?;
        ctx.set("status", "Loading member...".to_string());

        let deps = self.deps.clone();
        let snapshot = ctx
            .run(|| async move {
                let member = load_member(&deps, member_id).await.map_err(handler_error)?;
                Ok(MemberSnapshot { member })
            })
            .retry_policy(enrichment_retry_policy())
            .await?;
        let member = snapshot.member;

        let kinds = self.deps.sources.kinds();
        let mut outcomes = BTreeMap::new();

        for kind in &kinds {
            let kind = *kind;
            ctx.set("status", format!("Enriching from {kind}..."));

            let deps = self.deps.clone();
            let m = member.clone();
            // Rejected requests come back as Unavailable; exhausted retries fail the member.
            let outcome = ctx
                .run(|| async move { process_source(&deps, &m, kind).await.map_err(handler_error) })
                .retry_policy(enrichment_retry_policy())
                .await
                .inspect_err(|e| {
                    warn!(%member_id, source = %kind, error = %e, "Source failed after retries");
                })?;
            outcomes.insert(kind, outcome);
        }

        let squash_requested = should_reconcile(&self.deps.settings, &member, &outcomes);
        if squash_requested {
            ctx.object_client::<MemberSquasherClient>(ctx.key())
                .squash(SquashRequest {
                    sources: kinds.clone(),
                })
                .send();
        } else {
            let deps = self.deps.clone();
            ctx.run(|| async move {
                deps.profiles
                    .touch_last_tried_at(member_id)
                    .await
                    .map_err(handler_error)?;
                Ok(Done {})
            })
            .retry_policy(enrichment_retry_policy())
            .await?;
        }

        ctx.set(
            "status",
            if squash_requested {
                "Enriched, squash requested".to_string()
            } else {
                "Enriched".to_string()
            },
        );
        info!(%member_id, ?outcomes, squash_requested, "MemberEnricher complete");

        Ok(EnrichMemberResult {
            outcomes,
            squash_requested,
        })
    }

    async fn get_status(
        &self,
        ctx: SharedObjectContext<'_>,
        _req: EmptyRequest,
    ) -> Result<String, HandlerError> {
        read_status(&ctx).await
    }
}
