//! Publication-date extraction from HTML.
//!
//! Looks, in order of reliability: JSON-LD `datePublished`, OpenGraph
//! `article:published_time`, `<time datetime=…>`, then loose date text.

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use scraper::{Html, Selector};
use std::sync::OnceLock;

/// Best-effort publication timestamp for a page. Date-only values resolve to
/// midnight UTC.
pub fn extract_published_date(html: &str) -> Option<DateTime<Utc>> {
    let doc = Html::parse_document(html);

    if let Some(dt) = from_json_ld(&doc) {
        return Some(dt);
    }
    if let Some(dt) = from_meta_tags(&doc) {
        return Some(dt);
    }
    if let Some(dt) = from_time_elements(&doc) {
        return Some(dt);
    }
    from_loose_text(&doc)
}

fn from_json_ld(doc: &Html) -> Option<DateTime<Utc>> {
    let sel = Selector::parse("script[type=\"application/ld+json\"]").ok()?;
    for el in doc.select(&sel) {
        let raw: String = el.text().collect();
        let Ok(val) = serde_json::from_str::<serde_json::Value>(raw.trim()) else {
            continue;
        };
        if let Some(dt) = ld_date(&val) {
            return Some(dt);
        }
    }
    None
}

fn ld_date(val: &serde_json::Value) -> Option<DateTime<Utc>> {
    if let Some(graph) = val.get("@graph").and_then(|g| g.as_array()) {
        return graph.iter().find_map(ld_date);
    }
    if let Some(arr) = val.as_array() {
        return arr.iter().find_map(ld_date);
    }
    for key in ["datePublished", "dateCreated", "uploadDate"] {
        if let Some(s) = val.get(key).and_then(|v| v.as_str()) {
            if let Some(dt) = parse_date_str(s) {
                return Some(dt);
            }
        }
    }
    None
}

fn from_meta_tags(doc: &Html) -> Option<DateTime<Utc>> {
    let sel = Selector::parse("meta").ok()?;
    let keys = [
        "article:published_time",
        "og:published_time",
        "datePublished",
        "date",
        "dc.date",
        "publish-date",
    ];
    for el in doc.select(&sel) {
        let name = el
            .value()
            .attr("property")
            .or_else(|| el.value().attr("name"))
            .unwrap_or("");
        if !keys.iter().any(|k| name.eq_ignore_ascii_case(k)) {
            continue;
        }
        if let Some(content) = el.value().attr("content") {
            if let Some(dt) = parse_date_str(content) {
                return Some(dt);
            }
        }
    }
    None
}

fn from_time_elements(doc: &Html) -> Option<DateTime<Utc>> {
    let sel = Selector::parse("time[datetime]").ok()?;
    for el in doc.select(&sel) {
        if let Some(raw) = el.value().attr("datetime") {
            if let Some(dt) = parse_date_str(raw) {
                return Some(dt);
            }
        }
    }
    None
}

fn from_loose_text(doc: &Html) -> Option<DateTime<Utc>> {
    let text: String = doc.root_element().text().take(400).collect();
    find_date_in_text(&text)
}

/// First recognisable date in free text: `YYYY-MM-DD` or `Month D, YYYY`.
pub fn find_date_in_text(text: &str) -> Option<DateTime<Utc>> {
    static ISO: OnceLock<Regex> = OnceLock::new();
    static LONG: OnceLock<Regex> = OnceLock::new();
    let iso = ISO.get_or_init(|| Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").unwrap());
    let long = LONG.get_or_init(|| {
        Regex::new(
            r"\b(January|February|March|April|May|June|July|August|September|October|November|December)\s+(\d{1,2}),?\s+(\d{4})\b",
        )
        .unwrap()
    });

    if let Some(caps) = iso.captures(text) {
        let date = NaiveDate::from_ymd_opt(
            caps[1].parse().ok()?,
            caps[2].parse().ok()?,
            caps[3].parse().ok()?,
        )?;
        return Some(midnight_utc(date));
    }

    if let Some(caps) = long.captures(text) {
        let month = match &caps[1] {
            "January" => 1,
            "February" => 2,
            "March" => 3,
            "April" => 4,
            "May" => 5,
            "June" => 6,
            "July" => 7,
            "August" => 8,
            "September" => 9,
            "October" => 10,
            "November" => 11,
            "December" => 12,
            _ => return None,
        };
        let date = NaiveDate::from_ymd_opt(
            caps[3].parse().ok()?,
            month,
            caps[2].parse().ok()?,
        )?;
        return Some(midnight_utc(date));
    }

    None
}

fn parse_date_str(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    // RFC3339 without the timezone suffix.
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(midnight_utc(date));
    }
    find_date_in_text(raw)
}

fn midnight_utc(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .unwrap_or_default()
}
