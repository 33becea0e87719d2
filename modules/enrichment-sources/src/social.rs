//! Social handle and URL normalization shared by the adapters.

use std::sync::LazyLock;

use regex::Regex;

use enrichment_common::{MemberIdentity, MemberIdentityType, NormalizedEnrichmentData};

static LINKEDIN_PROFILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"in/([^/?#]+)").expect("valid regex"));
static LINKEDIN_COMPANY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"company/([^/?#]+)").expect("valid regex"));
static LINKEDIN_SCHOOL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"school/([^/?#]+)").expect("valid regex"));
static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid regex"));

/// Append an unverified username identity unless it is empty or already present.
pub fn push_social_identity(out: &mut NormalizedEnrichmentData, platform: &str, handle: &str) {
    let handle = handle.trim();
    if handle.is_empty() {
        return;
    }
    let identity = MemberIdentity::username(platform, handle, false);
    if out.identities.iter().any(|i| i.same_key(&identity)) {
        return;
    }
    out.identities.push(identity);
}

/// Append an unverified e-mail identity unless already present.
pub fn push_email_identity(out: &mut NormalizedEnrichmentData, platform: &str, email: &str) {
    let email = email.trim();
    if email.is_empty() {
        return;
    }
    let identity = MemberIdentity::email(platform, email, false);
    if out.identities.iter().any(|i| i.same_key(&identity)) {
        return;
    }
    out.identities.push(identity);
}

pub fn is_email(s: &str) -> bool {
    EMAIL.is_match(s.trim())
}

/// Last non-empty path segment of a URL or path, e.g. `https://x.com/in/jane/` → `jane`.
pub fn last_path_segment(url: &str) -> Option<String> {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Person handle from a LinkedIn profile URL (`.../in/<handle>`).
pub fn linkedin_profile_handle(url: &str) -> Option<String> {
    LINKEDIN_PROFILE
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Organization handle from a LinkedIn company or school URL, prefixed with its kind.
pub fn linkedin_organization_handle(url: &str) -> Option<String> {
    if let Some(c) = LINKEDIN_COMPANY.captures(url).and_then(|c| c.get(1)) {
        return Some(format!("company:{}", c.as_str()));
    }
    LINKEDIN_SCHOOL
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| format!("school:{}", m.as_str()))
}

/// Canonical LinkedIn URL: bare `linkedin.com` host, no query, no trailing slash.
/// Non-LinkedIn URLs come back untouched.
pub fn normalize_linkedin_url(raw: &str) -> Option<String> {
    let mut parsed = url::Url::parse(raw).ok()?;
    let is_linkedin = parsed
        .host_str()
        .is_some_and(|h| h.ends_with("linkedin.com"));
    if !is_linkedin {
        return Some(raw.to_string());
    }
    parsed.set_host(Some("linkedin.com")).ok()?;
    parsed.set_query(None);
    parsed.set_fragment(None);

    let path = parsed.path().trim_end_matches('/').to_string();
    Some(format!("{}://linkedin.com{}", parsed.scheme(), path))
}

/// Lowercased hostname of a URL or bare domain, `www.` stripped unless `keep_www`.
pub fn normalize_hostname(raw: &str, keep_www: bool) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };
    let parsed = url::Url::parse(&with_scheme).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    if keep_www {
        return Some(host);
    }
    Some(host.strip_prefix("www.").map(str::to_string).unwrap_or(host))
}

#[cfg(test)]
mod tests {
    use super::*;
    use enrichment_common::platform;

    #[test]
    fn social_identities_dedupe() {
        let mut out = NormalizedEnrichmentData::default();
        push_social_identity(&mut out, platform::GITHUB, "octocat");
        push_social_identity(&mut out, platform::GITHUB, "octocat");
        push_social_identity(&mut out, platform::TWITTER, "  ");
        assert_eq!(out.identities.len(), 1);
        assert!(!out.identities[0].verified);
    }

    #[test]
    fn linkedin_handles() {
        assert_eq!(
            linkedin_profile_handle("https://linkedin.com/in/jane-doe"),
            Some("jane-doe".into())
        );
        assert_eq!(
            linkedin_organization_handle("https://www.linkedin.com/company/acme/about"),
            Some("company:acme".into())
        );
        assert_eq!(
            linkedin_organization_handle("https://www.linkedin.com/school/mit"),
            Some("school:mit".into())
        );
        assert_eq!(linkedin_organization_handle("https://acme.com"), None);
    }

    #[test]
    fn linkedin_url_canonicalized() {
        assert_eq!(
            normalize_linkedin_url("https://de.linkedin.com/in/jane/?trk=abc").as_deref(),
            Some("https://linkedin.com/in/jane")
        );
        assert_eq!(
            normalize_linkedin_url("https://example.com/x?y=1").as_deref(),
            Some("https://example.com/x?y=1")
        );
    }

    #[test]
    fn hostnames() {
        assert_eq!(normalize_hostname("https://www.Acme.com/about", false), Some("acme.com".into()));
        assert_eq!(normalize_hostname("acme.io", false), Some("acme.io".into()));
        assert_eq!(normalize_hostname("www.acme.io", true), Some("www.acme.io".into()));
        assert_eq!(normalize_hostname("", false), None);
    }

    #[test]
    fn path_segments_and_emails() {
        assert_eq!(last_path_segment("https://linkedin.com/in/jane/"), Some("jane".into()));
        assert_eq!(last_path_segment("jane"), Some("jane".into()));
        assert!(is_email("a@b.co"));
        assert!(!is_email("not an email"));
    }
}
