//! Wildcard domain helpers.
//!
//! A wildcard covers exactly one label: `*.example.com` matches
//! `www.example.com` but neither `example.com` nor `a.b.example.com`.
//! Gateway names may themselves be wildcards; `*.example.com` covers itself.

use std::collections::BTreeSet;

/// True for `*.<base>` where the base has at least two labels.
///
/// `*.example.com` is a wildcard; `www.example.com`, `www.example.*` and
/// `*ww.example.com` are not.
pub fn is_wildcard(domain: &str) -> bool {
    domain.starts_with("*.") && domain.split('.').count() > 2
}

/// True if `domain` is covered by `wildcard`.
pub fn matches_wildcard(domain: &str, wildcard: &str) -> bool {
    let Some(base) = wildcard.strip_prefix("*.") else {
        return false;
    };
    match domain.split_once('.') {
        Some((label, rest)) => !label.is_empty() && rest == base,
        None => false,
    }
}

/// True if `host` is `domain` itself or covered by it when it is a wildcard.
pub fn host_matches(host: &str, domain: &str) -> bool {
    host == domain || (is_wildcard(domain) && matches_wildcard(host, domain))
}

/// Names from `candidates` covered by `wildcard`, sorted.
pub fn expand_wildcard<'a, I>(wildcard: &str, candidates: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a String>,
{
    candidates
        .into_iter()
        .filter(|name| matches_wildcard(name, wildcard))
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
