use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::source::SourceKind;

/// Vendor endpoints and credentials.
#[derive(Debug, Clone, Default)]
pub struct VendorConfig {
    pub progai_url: String,
    pub progai_api_key: String,
    /// Fall back to verified e-mail lookups when no GitHub handle is known.
    pub progai_use_email_for_enrichment: bool,
    /// Emit e-mail identities found by progai.
    pub progai_enrich_email_identities: bool,
    pub clearbit_url: String,
    pub clearbit_api_key: String,
    pub serp_url: String,
    pub serp_account_url: String,
    pub serp_api_key: String,
    pub crustdata_url: String,
    pub crustdata_api_key: String,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EnrichmentConfig {
    // Database
    pub database_url: String,

    // Restate
    pub restate_port: u16,
    pub restate_admin_url: Option<String>,
    pub restate_self_url: Option<String>,
    pub restate_auth_token: Option<String>,
    /// When set, `serve` starts the sweep loop through this ingress.
    pub restate_ingress_url: Option<String>,

    // Arbitration oracle
    pub anthropic_api_key: Option<String>,
    pub anthropic_model: String,

    // Search index sync
    pub search_sync_url: Option<String>,

    // Vendors
    pub vendors: VendorConfig,
    pub sources: Vec<SourceKind>,

    // Sweep tuning
    pub page_size: i64,
    pub global_max_concurrency: usize,
    pub min_activity_for_squash: i64,
    pub idle_interval: Duration,
    pub retry_tried_members_after: Duration,
    pub credit_status_ttl: Duration,

    // Reconciliation
    pub attribute_platform_priority: Vec<String>,
}

const DEFAULT_PLATFORM_PRIORITY: &str =
    "custom,enrichment,github,linkedin,twitter,devto,reddit,stackoverflow,discord,slack";

impl EnrichmentConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL is required")?,
            restate_port: parse_env("PORT", 9080)?,
            restate_admin_url: optional_env("RESTATE_ADMIN_URL"),
            restate_self_url: optional_env("RESTATE_SELF_URL"),
            restate_auth_token: optional_env("RESTATE_AUTH_TOKEN"),
            restate_ingress_url: optional_env("RESTATE_INGRESS_URL"),
            anthropic_api_key: optional_env("ANTHROPIC_API_KEY"),
            anthropic_model: env::var("ANTHROPIC_MODEL")
                .unwrap_or_else(|_| "claude-haiku-4-5-20251001".to_string()),
            search_sync_url: optional_env("SEARCH_SYNC_API_URL"),
            vendors: VendorConfig {
                progai_url: env::var("ENRICHMENT_PROGAI_URL")
                    .unwrap_or_else(|_| "https://api.prog.ai".to_string()),
                progai_api_key: env::var("ENRICHMENT_PROGAI_API_KEY").unwrap_or_default(),
                progai_use_email_for_enrichment: parse_env("ENRICHMENT_PROGAI_USE_EMAIL", false)?,
                progai_enrich_email_identities: parse_env(
                    "ENRICHMENT_PROGAI_ENRICH_EMAIL_IDENTITIES",
                    true,
                )?,
                clearbit_url: env::var("ENRICHMENT_CLEARBIT_URL")
                    .unwrap_or_else(|_| "https://person.clearbit.com/v2/people/find".to_string()),
                clearbit_api_key: env::var("ENRICHMENT_CLEARBIT_API_KEY").unwrap_or_default(),
                serp_url: env::var("ENRICHMENT_SERP_API_URL")
                    .unwrap_or_else(|_| "https://serpapi.com/search.json".to_string()),
                serp_account_url: env::var("ENRICHMENT_SERP_ACCOUNT_URL")
                    .unwrap_or_else(|_| "https://serpapi.com/account".to_string()),
                serp_api_key: env::var("ENRICHMENT_SERP_API_KEY").unwrap_or_default(),
                crustdata_url: env::var("ENRICHMENT_CRUSTDATA_URL")
                    .unwrap_or_else(|_| "https://api.crustdata.com".to_string()),
                crustdata_api_key: env::var("ENRICHMENT_CRUSTDATA_API_KEY").unwrap_or_default(),
            },
            sources: parse_sources(env::var("ENRICHMENT_SOURCES").ok().as_deref())?,
            page_size: parse_env("ENRICHMENT_PAGE_SIZE", 100)?,
            global_max_concurrency: parse_env("ENRICHMENT_MAX_CONCURRENCY", 15)?,
            min_activity_for_squash: parse_env("ENRICHMENT_MIN_ACTIVITY_FOR_SQUASH", 10)?,
            idle_interval: Duration::from_secs(parse_env("ENRICHMENT_IDLE_INTERVAL_SECS", 300)?),
            retry_tried_members_after: Duration::from_secs(parse_env(
                "ENRICHMENT_RETRY_TRIED_AFTER_SECS",
                24 * 3600,
            )?),
            credit_status_ttl: Duration::from_secs(parse_env("ENRICHMENT_CREDIT_TTL_SECS", 60)?),
            attribute_platform_priority: split_list(
                &env::var("ATTRIBUTE_PLATFORM_PRIORITY")
                    .unwrap_or_else(|_| DEFAULT_PLATFORM_PRIORITY.to_string()),
            ),
        };

        config.log_keys();
        Ok(config)
    }

    fn log_keys(&self) {
        fn preview(val: &str) -> String {
            if val.is_empty() {
                return "<not set>".to_string();
            }
            let n = val.len().min(5);
            format!("{}...({} chars)", &val[..n], val.len())
        }
        fn preview_opt(val: &Option<String>) -> String {
            val.as_deref().map(preview).unwrap_or_else(|| "<not set>".to_string())
        }

        tracing::info!("Config loaded:");
        tracing::info!("  ANTHROPIC_API_KEY: {}", preview_opt(&self.anthropic_api_key));
        tracing::info!("  ENRICHMENT_PROGAI_API_KEY: {}", preview(&self.vendors.progai_api_key));
        tracing::info!("  ENRICHMENT_CLEARBIT_API_KEY: {}", preview(&self.vendors.clearbit_api_key));
        tracing::info!("  ENRICHMENT_SERP_API_KEY: {}", preview(&self.vendors.serp_api_key));
        tracing::info!(
            "  ENRICHMENT_CRUSTDATA_API_KEY: {}",
            preview(&self.vendors.crustdata_api_key)
        );
        tracing::info!("  SEARCH_SYNC_API_URL: {}", preview_opt(&self.search_sync_url));
        tracing::info!("  RESTATE_ADMIN_URL: {}", preview_opt(&self.restate_admin_url));
        tracing::info!(sources = ?self.sources, page_size = self.page_size, "  Sweep settings");
    }
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{key} is invalid: {e}")),
        _ => Ok(default),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_sources(raw: Option<&str>) -> Result<Vec<SourceKind>> {
    let Some(raw) = raw.filter(|s| !s.trim().is_empty()) else {
        return Ok(SourceKind::ALL.to_vec());
    };
    let mut sources = split_list(raw)
        .iter()
        .map(|s| s.parse::<SourceKind>().map_err(anyhow::Error::msg))
        .collect::<Result<Vec<_>>>()?;
    sources.sort();
    sources.dedup();
    Ok(sources)
}
