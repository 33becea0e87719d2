//! Restate durable handlers for member enrichment.
//!
//! Three virtual objects, all holding `Arc<EnrichmentDeps>`:
//! - `MemberEnricher` (keyed by member id) walks the sources, one journaled
//!   step per source, then hands off to the squasher.
//! - `MemberSquasher` (keyed by member id) plans and applies a reconciliation.
//! - `EnrichmentSweep` (keyed `"global"`) processes one page of eligible
//!   members per invocation and re-sends itself.

pub mod enrichment_sweep;
pub mod member_enricher;
pub mod member_squasher;

use std::collections::BTreeMap;
use std::time::Duration;

use restate_sdk::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use enrichment_common::{EnrichableMember, EnrichmentError, SourceKind};

use crate::orchestrator::SourceOutcome;
use crate::scanner::PageReport;
use crate::squash::SquashPlan;

pub use enrichment_sweep::{EnrichmentSweep, EnrichmentSweepClient, EnrichmentSweepImpl};
pub use member_enricher::{MemberEnricher, MemberEnricherClient, MemberEnricherImpl};
pub use member_squasher::{MemberSquasher, MemberSquasherClient, MemberSquasherImpl};

/// Key of the singleton sweep object.
pub const SWEEP_KEY: &str = "global";

/// Retry policy for journaled side effects: 15 s, doubling, capped at 60 s, 4 attempts.
pub fn enrichment_retry_policy() -> RunRetryPolicy {
    RunRetryPolicy::new()
        .initial_delay(Duration::from_secs(15))
        .exponentiation_factor(2.0)
        .max_delay(Duration::from_secs(60))
        .max_attempts(4)
}

/// Transient failures are retried by Restate, the rest fail the step for good.
pub fn handler_error(e: EnrichmentError) -> HandlerError {
    if e.is_retryable() {
        e.into()
    } else {
        TerminalError::new(e.to_string()).into()
    }
}

pub(crate) fn member_key(key: &str) -> Result<Uuid, TerminalError> {
    key.parse()
        .map_err(|e: uuid::Error| TerminalError::new(format!("Invalid member UUID in object key: {e}")))
}

pub(crate) async fn read_status(ctx: &SharedObjectContext<'_>) -> Result<String, HandlerError> {
    Ok(ctx
        .get::<String>("status")
        .await?
        .unwrap_or_else(|| "idle".to_string()))
}

// ---------------------------------------------------------------------------
// Restate serde bridge
// ---------------------------------------------------------------------------

/// Implement Restate SDK serialization traits for types that already have serde derives.
#[macro_export]
macro_rules! impl_restate_serde {
    ($type:ty) => {
        impl restate_sdk::serde::Serialize for $type {
            type Error = serde_json::Error;

            fn serialize(&self) -> Result<bytes::Bytes, Self::Error> {
                serde_json::to_vec(self).map(bytes::Bytes::from)
            }
        }

        impl restate_sdk::serde::Deserialize for $type {
            type Error = serde_json::Error;

            fn deserialize(bytes: &mut bytes::Bytes) -> Result<Self, Self::Error> {
                serde_json::from_slice(bytes)
            }
        }

        impl restate_sdk::serde::WithContentType for $type {
            fn content_type() -> &'static str {
                "application/json"
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmptyRequest {}
impl_restate_serde!(EmptyRequest);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SquashRequest {
    pub sources: Vec<SourceKind>,
}
impl_restate_serde!(SquashRequest);

// ---------------------------------------------------------------------------
// Journaled step results
// ---------------------------------------------------------------------------

impl_restate_serde!(SourceOutcome);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberSnapshot {
    pub member: EnrichableMember,
}
impl_restate_serde!(MemberSnapshot);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberPage {
    pub members: Vec<EnrichableMember>,
}
impl_restate_serde!(MemberPage);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedSquash {
    pub plan: Option<SquashPlan>,
}
impl_restate_serde!(PlannedSquash);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Done {}
impl_restate_serde!(Done);

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichMemberResult {
    pub outcomes: BTreeMap<SourceKind, SourceOutcome>,
    pub squash_requested: bool,
}
impl_restate_serde!(EnrichMemberResult);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SquashResult {
    pub planned: bool,
    pub updated: bool,
}
impl_restate_serde!(SquashResult);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepResult {
    pub page: PageReport,
    pub concurrency: usize,
    pub next_run_in_secs: u64,
}
impl_restate_serde!(SweepResult);
