use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The closed set of enrichment vendors.
///
/// Declaration order is the order sources are evaluated for a member: the
/// LinkedIn-driven sources come last so they can discover handles in the
/// caches written by the earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourceKind {
    #[serde(rename = "progai")]
    ProgAi,
    #[serde(rename = "clearbit")]
    Clearbit,
    #[serde(rename = "serp")]
    Serp,
    #[serde(rename = "progai-linkedin-scraper")]
    ProgAiLinkedinScraper,
    #[serde(rename = "crustdata")]
    Crustdata,
}

impl SourceKind {
    pub const ALL: [SourceKind; 5] = [
        SourceKind::ProgAi,
        SourceKind::Clearbit,
        SourceKind::Serp,
        SourceKind::ProgAiLinkedinScraper,
        SourceKind::Crustdata,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProgAi => "progai",
            Self::Clearbit => "clearbit",
            Self::Serp => "serp",
            Self::ProgAiLinkedinScraper => "progai-linkedin-scraper",
            Self::Crustdata => "crustdata",
        }
    }

    /// Platform key under which this source's attribute values and identities are stored.
    pub fn platform(&self) -> String {
        format!("enrichment-{}", self.as_str())
    }

    /// Source tag written on work-experience rows produced by this vendor.
    pub fn organization_source(&self) -> String {
        self.platform()
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown enrichment source: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_str() {
        for kind in SourceKind::ALL {
            assert_eq!(kind.as_str().parse::<SourceKind>().unwrap(), kind);
        }
    }

    #[test]
    fn platform_is_prefixed() {
        assert_eq!(SourceKind::Crustdata.platform(), "enrichment-crustdata");
        assert_eq!(
            SourceKind::ProgAiLinkedinScraper.platform(),
            "enrichment-progai-linkedin-scraper"
        );
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_string(&SourceKind::ProgAiLinkedinScraper).unwrap();
        assert_eq!(json, "\"progai-linkedin-scraper\"");
    }

    #[test]
    fn unknown_source_rejected() {
        assert!("apollo".parse::<SourceKind>().is_err());
    }
}
