// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Scope matching rules used when answering Probe messages.
//!
//! Two rules are supported:
//! - RFC 3986: scheme and authority compared case-insensitively, then the
//!   probe path segments must be a prefix of the target path segments.
//! - strcmp0: exact, case-sensitive string equality.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// URI naming the RFC 3986 prefix rule (the default).
pub const MATCH_BY_RFC3986: &str = "http://docs.oasis-open.org/ws-dd/ns/discovery/2009/01/rfc3986";

/// URI naming the exact string rule.
pub const MATCH_BY_STRCMP0: &str = "http://docs.oasis-open.org/ws-dd/ns/discovery/2009/01/strcmp0";

/// Scope matching rule requested by a probe.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MatchBy {
    #[default]
    Rfc3986,
    Strcmp0,
    Unsupported(String),
}

impl MatchBy {
    pub fn as_uri(&self) -> &str {
        match self {
            Self::Rfc3986 => MATCH_BY_RFC3986,
            Self::Strcmp0 => MATCH_BY_STRCMP0,
            Self::Unsupported(uri) => uri,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unsupported(_))
    }

    /// Returns true when `probe_scope` matches `target_scope` under this rule.
    /// Unsupported rules never match.
    pub fn matches(&self, probe_scope: &str, target_scope: &str) -> bool {
        match self {
            Self::Rfc3986 => rfc3986_matches(probe_scope, target_scope),
            Self::Strcmp0 => probe_scope == target_scope,
            Self::Unsupported(_) => false,
        }
    }

    /// Every probe scope must match at least one target scope.
    pub fn matches_all(
        &self,
        probe_scopes: &BTreeSet<String>,
        target_scopes: &BTreeSet<String>,
    ) -> bool {
        probe_scopes
            .iter()
            .all(|p| target_scopes.iter().any(|t| self.matches(p, t)))
    }
}

impl From<String> for MatchBy {
    fn from(uri: String) -> Self {
        match uri.as_str() {
            "" | MATCH_BY_RFC3986 => Self::Rfc3986,
            MATCH_BY_STRCMP0 => Self::Strcmp0,
            _ => Self::Unsupported(uri),
        }
    }
}

impl From<MatchBy> for String {
    fn from(rule: MatchBy) -> Self {
        rule.as_uri().to_string()
    }
}

struct SplitUri<'a> {
    scheme: &'a str,
    authority: &'a str,
    segments: Vec<&'a str>,
}

fn split_uri(uri: &str) -> Option<SplitUri<'_>> {
    let (scheme, rest) = uri.split_once(':')?;
    if scheme.is_empty() {
        return None;
    }
    let (authority, path) = match rest.strip_prefix("//") {
        Some(after) => match after.find('/') {
            Some(idx) => (&after[..idx], &after[idx..]),
            None => (after, ""),
        },
        None => ("", rest),
    };
    // Query and fragment are not part of the comparison.
    let path = path.split(['?', '#']).next().unwrap_or("");
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.iter().any(|s| *s == "." || *s == "..") {
        return None;
    }
    Some(SplitUri {
        scheme,
        authority,
        segments,
    })
}

fn rfc3986_matches(probe_scope: &str, target_scope: &str) -> bool {
    let (Some(probe), Some(target)) = (split_uri(probe_scope), split_uri(target_scope)) else {
        return false;
    };
    if !probe.scheme.eq_ignore_ascii_case(target.scheme)
        || !probe.authority.eq_ignore_ascii_case(target.authority)
    {
        return false;
    }
    probe.segments.len() <= target.segments.len()
        && probe
            .segments
            .iter()
            .zip(target.segments.iter())
            .all(|(p, t)| p == t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc3986_prefix_segments() {
        let rule = MatchBy::Rfc3986;
        assert!(rule.matches("http://example.com/abc", "http://example.com/abc/def"));
        assert!(rule.matches("http://EXAMPLE.com/abc", "HTTP://example.com/abc/"));
        assert!(!rule.matches("http://example.com/ab", "http://example.com/abc"));
        assert!(!rule.matches("http://example.com/abc/def", "http://example.com/abc"));
        assert!(!rule.matches("http://example.com/ABC", "http://example.com/abc"));
        assert!(!rule.matches("http://other.com/abc", "http://example.com/abc"));
    }

    #[test]
    fn test_rfc3986_rejects_dot_segments() {
        let rule = MatchBy::Rfc3986;
        assert!(!rule.matches("http://example.com/a/../b", "http://example.com/b"));
    }

    #[test]
    fn test_strcmp0_exact() {
        let rule = MatchBy::Strcmp0;
        assert!(rule.matches("urn:floor:3", "urn:floor:3"));
        assert!(!rule.matches("urn:floor:3", "urn:floor:3/east"));
    }

    #[test]
    fn test_matches_all() {
        let target: BTreeSet<String> = ["ldap:///ou=eng/room=1", "urn:site:paris"]
            .into_iter()
            .map(String::from)
            .collect();
        let probe: BTreeSet<String> = ["ldap:///ou=eng"].into_iter().map(String::from).collect();
        assert!(MatchBy::Rfc3986.matches_all(&probe, &target));
        assert!(MatchBy::Rfc3986.matches_all(&BTreeSet::new(), &target));

        let probe: BTreeSet<String> = ["ldap:///ou=eng", "urn:site:lyon"]
            .into_iter()
            .map(String::from)
            .collect();
        assert!(!MatchBy::Rfc3986.matches_all(&probe, &target));
    }

    #[test]
    fn test_match_by_from_uri() {
        assert_eq!(MatchBy::from(String::new()), MatchBy::Rfc3986);
        assert_eq!(MatchBy::from(MATCH_BY_STRCMP0.to_string()), MatchBy::Strcmp0);
        let other = MatchBy::from("urn:custom".to_string());
        assert!(!other.is_supported());
        assert!(!other.matches("a", "a"));
    }
}
