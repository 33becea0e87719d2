//! Restate virtual object sweeping the member population on a durable loop.
//!
//! Runs as a singleton (key `"global"`). Each invocation enriches one page of
//! eligible members, then re-sends itself: immediately while pages keep
//! coming, after the idle interval once the population is exhausted.
//! `start` is idempotent: it only sends `run` when no loop is scheduled.

use std::sync::Arc;

use restate_sdk::prelude::*;
use tracing::{info, warn};

use crate::deps::EnrichmentDeps;
use crate::scanner::{concurrency_ceiling, find_page, run_page};

use super::member_enricher::MemberEnricherClient;
use super::{
    enrichment_retry_policy, handler_error, read_status, EmptyRequest, MemberPage, SweepResult,
};

#[restate_sdk::object]
#[name = "EnrichmentSweep"]
pub trait EnrichmentSweep {
    async fn start() -> Result<bool, HandlerError>;
    async fn run() -> Result<SweepResult, HandlerError>;
    #[shared]
    async fn get_status(req: EmptyRequest) -> Result<String, HandlerError>;
}

pub struct EnrichmentSweepImpl {
    deps: Arc<EnrichmentDeps>,
}

impl EnrichmentSweepImpl {
    pub fn with_deps(deps: Arc<EnrichmentDeps>) -> Self {
        Self { deps }
    }
}

const LOOP_STATE: &str = "loop";

impl EnrichmentSweep for EnrichmentSweepImpl {
    async fn start(&self, ctx: ObjectContext<'_>) -> Result<bool, HandlerError> {
        if ctx.get::<String>(LOOP_STATE).await?.is_some() {
            info!("Enrichment sweep already scheduled");
            return Ok(false);
        }
        ctx.set(LOOP_STATE, "scheduled".to_string());
        ctx.object_client::<EnrichmentSweepClient>(ctx.key())
            .run()
            .send();
        info!("Enrichment sweep started");
        Ok(true)
    }

    async fn run(&self, ctx: ObjectContext<'_>) -> Result<SweepResult, HandlerError> {
        ctx.set("status", "Finding eligible members...".to_string());

        let deps = self.deps.clone();
        // A failed lookup counts as an empty page; the loop must keep going.
        let page = match ctx
            .run(|| async move {
                let members = find_page(&deps).await.map_err(handler_error)?;
                Ok(MemberPage { members })
            })
            .retry_policy(enrichment_retry_policy())
            .await
        {
            Ok(page) => page,
            Err(e) => {
                warn!(error = %e, "Finding eligible members failed, retrying after the idle interval");
                MemberPage { members: vec![] }
            }
        };

        let concurrency = concurrency_ceiling(
            &page.members,
            &self.deps.sources,
            self.deps.settings.global_max_concurrency,
        );
        ctx.set(
            "status",
            format!(
                "Enriching {} members, {concurrency} at a time...",
                page.members.len()
            ),
        );

        let report = run_page(&page.members, concurrency, |id| {
            ctx.object_client::<MemberEnricherClient>(id.to_string())
                .enrich()
                .call()
        })
        .await;

        let next_run = if page.members.is_empty() {
            self.deps.settings.idle_interval
        } else {
            std::time::Duration::ZERO
        };

        ctx.set(LOOP_STATE, "scheduled".to_string());
        let next = ctx.object_client::<EnrichmentSweepClient>(ctx.key()).run();
        if next_run.is_zero() {
            next.send();
        } else {
            next.send_after(next_run);
        }

        ctx.set(
            "status",
            format!(
                "Page done: {} succeeded, {} failed",
                report.succeeded,
                report.failed.len()
            ),
        );
        info!(
            members = report.members,
            concurrency,
            next_run_in_secs = next_run.as_secs(),
            "EnrichmentSweep page complete"
        );

        Ok(SweepResult {
            page: report,
            concurrency,
            next_run_in_secs: next_run.as_secs(),
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
