//! Restate virtual object reconciling one member's source caches into the
//! profile, keyed by member id.
//!
//! The plan (cache reads plus oracle calls) is journaled, so a retried write
//! never asks the oracle again.

use std::sync::Arc;

use restate_sdk::prelude::*;
use tracing::{info, warn};

use crate::deps::EnrichmentDeps;
use crate::squash::{apply_plan, plan_squash};

use super::{
    enrichment_retry_policy, handler_error, member_key, read_status, Done, EmptyRequest,
    PlannedSquash, SquashRequest, SquashResult,
};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct Applied {
    updated: bool,
}
crate::impl_restate_serde!(Applied);

#[restate_sdk::object]
#[name = "MemberSquasher"]
pub trait MemberSquasher {
    async fn squash(req: SquashRequest) -> Result<SquashResult, HandlerError>;
    #[shared]
    async fn get_status(req: EmptyRequest) -> Result<String, HandlerError>;
}

pub struct MemberSquasherImpl {
    deps: Arc<EnrichmentDeps>,
}

impl MemberSquasherImpl {
    pub fn with_deps(deps: Arc<EnrichmentDeps>) -> Self {
        Self { deps }
    }
}

impl MemberSquasher for MemberSquasherImpl {
    async fn squash(
        &self,
        ctx: ObjectContext<'_>,
        req: SquashRequest,
    ) -> Result<SquashResult, HandlerError> {
        let member_id = member_key(ctx.key())?;
        ctx.set("status", "Planning squash...".to_string());

        let deps = self.deps.clone();
        let sources = req.sources;
        let planned = ctx
            .run(|| async move {
                let plan = plan_squash(&deps, member_id, &sources)
                    .await
                    .map_err(handler_error)?;
                Ok(PlannedSquash { plan })
            })
            .retry_policy(enrichment_retry_policy())
            .await?;

        let Some(plan) = planned.plan else {
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
            ctx.set("status", "Nothing to squash".to_string());
            return Ok(SquashResult {
                planned: false,
                updated: false,
            });
        };

        ctx.set("status", "Writing profile...".to_string());
        let deps = self.deps.clone();
        let applied = match ctx
            .run(|| async move {
                let updated = apply_plan(&deps, plan).await.map_err(handler_error)?;
                Ok(Applied { updated })
            })
            .retry_policy(enrichment_retry_policy())
            .await
        {
            Ok(applied) => applied,
            Err(e) => {
                warn!(%member_id, error = %e, "Squash write failed, marking member tried");
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
                ctx.set("status", "Squash failed".to_string());
                return Err(e.into());
            }
        };

        ctx.set(
            "status",
            if applied.updated {
                "Profile updated".to_string()
            } else {
                "Profile unchanged".to_string()
            },
        );
        info!(%member_id, updated = applied.updated, "MemberSquasher complete");

        Ok(SquashResult {
            planned: true,
            updated: applied.updated,
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
