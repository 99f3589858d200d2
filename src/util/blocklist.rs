//! Domain blocklist matching.
//!
//! Patterns come in three shapes:
//!
//! - `example.com` blocks the domain and every subdomain of it
//! - `*.example.com` blocks the same set (wildcard spelling)
//! - `blog.example.com` blocks only that host and its own subdomains
//!
//! Matching ignores case and a leading `www.` on either side.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Subscription plan of a user. Only [`Plan::Enterprise`] bypasses the blocklist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Pro,
    Enterprise,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Pro => "pro",
            Plan::Enterprise => "enterprise",
        }
    }

    /// Whether this plan skips the domain blocklist entirely.
    pub fn bypasses_blocklist(&self) -> bool {
        matches!(self, Plan::Enterprise)
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Plan::Free),
            "pro" => Ok(Plan::Pro),
            "enterprise" => Ok(Plan::Enterprise),
            other => Err(format!("unknown plan: {other}")),
        }
    }
}

fn canonical(domain: &str) -> String {
    let lowered = domain.trim().trim_end_matches('.').to_ascii_lowercase();
    match lowered.strip_prefix("www.") {
        Some(rest) => rest.to_owned(),
        None => lowered,
    }
}

/// Returns true when `domain` equals `base` or is a subdomain of it.
fn is_same_or_subdomain(domain: &str, base: &str) -> bool {
    if base.is_empty() {
        return false;
    }
    domain == base
        || (domain.len() > base.len()
            && domain.ends_with(base)
            && domain.as_bytes()[domain.len() - base.len() - 1] == b'.')
}

/// Checks a single domain against a set of blocklist patterns.
///
/// An enterprise `plan` always returns `false`.
///
/// # Examples
///
/// ```
/// use feedmill::util::{is_domain_blocked, Plan};
///
/// assert!(is_domain_blocked("sub.example.com", &["example.com"], None));
/// assert!(!is_domain_blocked("x.com", &["example.com"], Some(Plan::Enterprise)));
/// ```
pub fn is_domain_blocked<S: AsRef<str>>(domain: &str, patterns: &[S], plan: Option<Plan>) -> bool {
    if plan.is_some_and(|p| p.bypasses_blocklist()) {
        return false;
    }

    let domain = canonical(domain);
    if domain.is_empty() {
        return false;
    }

    patterns.iter().any(|pattern| {
        let pattern = canonical(pattern.as_ref());
        match pattern.strip_prefix("*.") {
            Some(base) => is_same_or_subdomain(&domain, base),
            None => is_same_or_subdomain(&domain, &pattern),
        }
    })
}
