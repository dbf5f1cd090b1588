//! Host-derived source authority scoring.
//!
//! Maps a source URL to an integer in `[0, 100]` used to rank citations and
//! to decide whether a source counts as "authoritative" (score ≥ 70) or
//! "credible" (score ≥ 65) for corroboration purposes.

use crate::types::SourceRef;

/// Hosted blog platforms never get the generic `www.*` bump.
const BLOG_PLATFORMS: &[&str] = &[
    "medium.com",
    "wordpress.com",
    "blogspot.com",
    "substack.com",
    "tumblr.com",
    "blogger.com",
];

/// Extract the lowercased host from a URL, or `None` when the input is not
/// an absolute http(s) URL.
pub fn host_of(url: &str) -> Option<String> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))?;
    let host = rest.split(['/', '?', '#']).next()?;
    let host = host.split('@').last()?.split(':').next()?;
    if host.is_empty() {
        return None;
    }
    Some(host.to_ascii_lowercase())
}

fn host_matches(host: &str, domain: &str) -> bool {
    host == domain || host.ends_with(&format!(".{domain}"))
}

/// Authority score for a source URL.
pub fn authority_score(url: &str) -> u8 {
    let Some(host) = host_of(url) else {
        return 0;
    };

    if host_matches(&host, "sec.gov") {
        return 100;
    }
    if host_matches(&host, "wikidata.org") {
        return 90;
    }
    if host_matches(&host, "wikipedia.org") {
        return 85;
    }
    if host.ends_with(".gov") {
        return 80;
    }
    if host.ends_with(".edu") {
        return 75;
    }
    if host_matches(&host, "bloomberg.com") {
        return 74;
    }
    if host_matches(&host, "reuters.com") {
        return 73;
    }
    if host_matches(&host, "ft.com") {
        return 72;
    }
    if host_matches(&host, "nytimes.com") {
        return 72;
    }
    if host_matches(&host, "wsj.com") {
        return 71;
    }
    if host.starts_with("www.") && !BLOG_PLATFORMS.iter().any(|b| host_matches(&host, b)) {
        return 65;
    }
    50
}

/// Deduplicate sources by URL (first occurrence wins) and stable-sort by
/// descending authority score. Reapplying the function is a no-op.
pub fn dedup_and_rank_sources(sources: Vec<SourceRef>) -> Vec<SourceRef> {
    let mut seen = std::collections::HashSet::new();
    let mut out: Vec<SourceRef> = sources
        .into_iter()
        .filter(|s| seen.insert(s.url.clone()))
        .collect();
    out.sort_by_key(|s| std::cmp::Reverse(authority_score(&s.url)));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_extraction() {
        assert_eq!(host_of("https://www.sec.gov/cgi-bin/browse"), Some("www.sec.gov".into()));
        assert_eq!(host_of("http://example.com:8080/x"), Some("example.com".into()));
        assert_eq!(host_of("not a url"), None);
        assert_eq!(host_of("ftp://example.com"), None);
    }

    #[test]
    fn score_table() {
        assert_eq!(authority_score("https://www.sec.gov/edgar"), 100);
        assert_eq!(authority_score("https://www.wikidata.org/wiki/Q42"), 90);
        assert_eq!(authority_score("https://en.wikipedia.org/wiki/Rust"), 85);
        assert_eq!(authority_score("https://data.census.gov/"), 80);
        assert_eq!(authority_score("https://cs.stanford.edu/"), 75);
        assert_eq!(authority_score("https://www.bloomberg.com/news"), 74);
        assert_eq!(authority_score("https://www.reuters.com/markets"), 73);
        assert_eq!(authority_score("https://www.ft.com/content/x"), 72);
        assert_eq!(authority_score("https://www.wsj.com/articles/x"), 71);
        assert_eq!(authority_score("https://www.example.com/about"), 65);
        assert_eq!(authority_score("https://example.org/about"), 50);
        assert_eq!(authority_score("about:trusted-fact"), 0);
    }

    #[test]
    fn blog_platforms_do_not_get_www_bump() {
        assert_eq!(authority_score("https://www.medium.com/@someone/post"), 50);
        assert_eq!(authority_score("https://www.substack.com/home"), 50);
    }

    #[test]
    fn dedup_keeps_first_and_sorts_by_authority() {
        let sources = vec![
            SourceRef::new("https://example.org/a"),
            SourceRef::new("https://www.sec.gov/filing"),
            SourceRef::new("https://example.org/a"),
            SourceRef::new("https://en.wikipedia.org/wiki/X"),
        ];
        let ranked = dedup_and_rank_sources(sources);
        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].url, "https://www.sec.gov/filing");
        assert_eq!(ranked[1].url, "https://en.wikipedia.org/wiki/X");
        assert_eq!(ranked[2].url, "https://example.org/a");
    }

    #[test]
    fn ranked_sources_are_a_fixed_point() {
        let sources = vec![
            SourceRef::new("https://example.org/a"),
            SourceRef::new("https://www.sec.gov/filing"),
            SourceRef::new("https://www.reuters.com/x"),
        ];
        let once = dedup_and_rank_sources(sources);
        let twice = dedup_and_rank_sources(once.clone());
        assert_eq!(once, twice);
    }
}
