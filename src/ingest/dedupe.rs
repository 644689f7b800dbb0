// src/ingest/dedupe.rs
//! Natural keys for feed entries.
//!
//! Link-based when a link exists (scheme/host lower-cased, fragment and
//! `utm_*` tracking parameters dropped, trailing slash trimmed); otherwise a
//! `title|source` composite.

use sha2::{Digest, Sha256};

use super::types::Entry;

pub fn dedupe_key(link: &str, title: &str, source: &str) -> String {
    let link = link.trim();
    if !link.is_empty() {
        return format!("link:{}", normalize_link(link));
    }
    format!("title:{}|{}", collapse_lower(title), collapse_lower(source))
}

/// Short stable id (first 8 bytes of SHA-256, hex) for an entry.
pub fn entry_id(e: &Entry) -> String {
    let key = dedupe_key(&e.link, &e.title, &e.source);
    let digest = Sha256::digest(key.as_bytes());
    let mut out = String::with_capacity(16);
    for b in digest.iter().take(8) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

pub fn normalize_link(link: &str) -> String {
    let link = link.split('#').next().unwrap_or_default();

    let (base, query) = match link.split_once('?') {
        Some((b, q)) => (b, Some(q)),
        None => (link, None),
    };

    // Lower-case scheme + authority only; paths can be case-sensitive.
    let base = match base.split_once("://") {
        Some((scheme, rest)) => {
            let (host, path) = match rest.find('/') {
                Some(i) => rest.split_at(i),
                None => (rest, ""),
            };
            format!(
                "{}://{}{}",
                scheme.to_ascii_lowercase(),
                host.to_ascii_lowercase(),
                path
            )
        }
        None => base.to_string(),
    };
    let base = base.trim_end_matches('/').to_string();

    let kept: Vec<&str> = query
        .unwrap_or_default()
        .split('&')
        .filter(|p| !p.is_empty())
        .filter(|p| !p.to_ascii_lowercase().starts_with("utm_"))
        .collect();

    if kept.is_empty() {
        base
    } else {
        format!("{}?{}", base, kept.join("&"))
    }
}

fn collapse_lower(s: &str) -> String {
    s.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}
