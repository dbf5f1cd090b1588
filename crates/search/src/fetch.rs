//! Page fetching and HTML to plain-text reduction.
//!
//! Fetches fan out in parallel with a per-request timeout. Extraction feeds
//! model context, so it optimises for clean running prose under a hard
//! character budget: pick the densest content region, walk it once, and
//! normalise whitespace as words are emitted.

use std::time::Duration;

use scraper::{ElementRef, Html, Node, Selector};

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Cap on raw HTML decoded per page before parsing.
const MAX_DOWNLOAD_BYTES: usize = 256_000;

/// A focused region must carry at least this much text to beat `<body>`.
const MIN_REGION_CHARS: usize = 120;

/// Subtrees that never contribute readable page text.
const SKIP_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "svg", "iframe", "form", "nav", "header",
    "footer", "aside", "button", "select", "option",
];

/// Elements that start a new line of output. Table cells are absent on
/// purpose: cells on one row join with the sink's ordinary word spacing.
const BREAK_TAGS: &[&str] = &[
    "p", "div", "section", "article", "main", "br", "li", "tr", "table", "h1", "h2",
    "h3", "h4", "h5", "h6", "blockquote", "pre", "figcaption", "dt", "dd",
];

/// Fetch up to `max_pages` URLs in parallel and return `(url, Some(html))`
/// for each page that yielded an HTML body within `timeout`. Failed fetches
/// return `(url, None)` so callers can count misses.
pub async fn fetch_pages(
    urls: &[String],
    max_pages: usize,
    timeout: Duration,
) -> Vec<(String, Option<String>)> {
    let client = match reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
    {
        Ok(c) => c,
        Err(_) => return urls.iter().map(|u| (u.clone(), None)).collect(),
    };

    let fetches: Vec<_> = urls
        .iter()
        .take(max_pages)
        .map(|url| {
            let client = client.clone();
            let url = url.clone();
            tokio::spawn(async move {
                let body = fetch_html(&client, &url).await;
                (url, body)
            })
        })
        .collect();

    let mut results = Vec::with_capacity(fetches.len());
    for handle in fetches {
        match handle.await {
            Ok(pair) => results.push(pair),
            Err(e) => tracing::debug!(error = %e, "page fetch task failed"),
        }
    }
    results
}

async fn fetch_html(client: &reqwest::Client, url: &str) -> Option<String> {
    let resp = client
        .get(url)
        .header("Accept", "text/html")
        .send()
        .await
        .ok()?;
    if !resp.status().is_success() {
        return None;
    }
    let text_like = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map_or(false, |ct| ct.contains("text/html") || ct.contains("text/plain"));
    if !text_like {
        return None;
    }
    // Decode at most the cap; a cut that lands inside a multi-byte char just
    // becomes a replacement char at the tail, which extraction then drops
    // with the rest of the truncated markup.
    let bytes = resp.bytes().await.ok()?;
    let cut = bytes.len().min(MAX_DOWNLOAD_BYTES);
    Some(String::from_utf8_lossy(&bytes[..cut]).into_owned())
}

/// Reduce a page to readable plain text, at most `max_chars` characters.
pub fn extract_page_text(html: &str, max_chars: usize) -> String {
    let doc = Html::parse_document(html);
    let region = densest_region(&doc).unwrap_or_else(|| doc.root_element());
    region_text(region, max_chars)
}

/// The candidate content region with the most text, provided it clears the
/// minimum; otherwise `<body>`.
fn densest_region(doc: &Html) -> Option<ElementRef<'_>> {
    let mut best: Option<(usize, ElementRef<'_>)> = None;
    for sel_str in ["article", "main", "[role=\"main\"]"] {
        let Ok(sel) = Selector::parse(sel_str) else {
            continue;
        };
        for el in doc.select(&sel) {
            let score: usize = el.text().map(|t| t.trim().len()).sum();
            if score >= MIN_REGION_CHARS && best.as_ref().map_or(true, |(s, _)| score > *s) {
                best = Some((score, el));
            }
        }
    }
    if let Some((_, el)) = best {
        return Some(el);
    }
    Selector::parse("body")
        .ok()
        .and_then(|sel| doc.select(&sel).next())
}

/// Single-pass depth-first walk over a region with an explicit stack.
/// Skipped subtrees are never pushed; whitespace is normalised as words are
/// appended, so no second pass is needed.
fn region_text(region: ElementRef<'_>, max_chars: usize) -> String {
    let mut sink = TextSink::new(max_chars);
    let mut stack: Vec<_> = region.children().rev().collect();

    while let Some(node) = stack.pop() {
        match node.value() {
            Node::Text(text) => {
                for word in text.split_whitespace() {
                    if !sink.push_word(word) {
                        return sink.finish();
                    }
                }
            }
            Node::Element(el) => {
                let tag = el.name();
                if SKIP_TAGS.contains(&tag) {
                    continue;
                }
                if BREAK_TAGS.contains(&tag) {
                    sink.push_break();
                }
                for child in node.children().rev() {
                    stack.push(child);
                }
            }
            _ => {}
        }
    }
    sink.finish()
}

/// Accumulates words under a character budget: single spaces between words,
/// single newlines between blocks, an ellipsis when the budget cuts a run of
/// text short.
struct TextSink {
    out: String,
    chars: usize,
    limit: usize,
    at_line_start: bool,
    clipped: bool,
}

impl TextSink {
    fn new(limit: usize) -> Self {
        Self {
            out: String::with_capacity(limit.min(MAX_DOWNLOAD_BYTES) + 16),
            chars: 0,
            limit,
            at_line_start: true,
            clipped: false,
        }
    }

    /// Append one word. Returns false once the budget is exhausted.
    fn push_word(&mut self, word: &str) -> bool {
        if self.chars >= self.limit {
            self.clipped = true;
            return false;
        }
        if !self.at_line_start {
            self.out.push(' ');
            self.chars += 1;
        }
        self.at_line_start = false;
        for c in word.chars() {
            if self.chars >= self.limit {
                self.clipped = true;
                return false;
            }
            self.out.push(c);
            self.chars += 1;
        }
        true
    }

    /// Start a new output line unless already at one.
    fn push_break(&mut self) {
        if !self.at_line_start {
            self.out.push('\n');
            self.chars += 1;
            self.at_line_start = true;
        }
    }

    fn finish(mut self) -> String {
        while self.out.ends_with(['\n', ' ']) {
            self.out.pop();
        }
        if self.clipped {
            // Drop a possibly half-emitted final word before marking the cut.
            if let Some(idx) = self.out.rfind(char::is_whitespace) {
                self.out.truncate(idx);
            }
            self.out.push('…');
        }
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_script_and_style() {
        let html = "<html><body><script>alert('x')</script>\
                    <style>.a{color:red}</style><p>Visible content here.</p></body></html>";
        let text = extract_page_text(html, 8000);
        assert!(text.contains("Visible content here."));
        assert!(!text.contains("alert"));
        assert!(!text.contains("color:red"));
    }

    #[test]
    fn prefers_dense_article_region() {
        let long_article = "Article body text. ".repeat(10);
        let html = format!(
            "<html><body><nav>Nav junk</nav><article><p>{long_article}</p></article>\
             <footer>Footer junk</footer></body></html>"
        );
        let text = extract_page_text(&html, 8000);
        assert!(text.contains("Article body text."));
        assert!(!text.contains("Nav junk"));
        assert!(!text.contains("Footer junk"));
    }

    #[test]
    fn thin_article_falls_back_to_body() {
        let html = "<html><body><article>tiny</article>\
                    <p>The body has the real substance of this page, repeated enough \
                    to matter for extraction purposes.</p></body></html>";
        let text = extract_page_text(html, 8000);
        assert!(text.contains("real substance"));
    }

    #[test]
    fn normalises_whitespace_inline() {
        let html = "<html><body><p>a    b\n\n\n\n c</p><p>next</p></body></html>";
        let text = extract_page_text(html, 8000);
        assert_eq!(text, "a b c\nnext");
    }

    #[test]
    fn table_cells_are_space_separated() {
        let html = "<html><body><table><tr><td>Name</td><td>Ada</td></tr>\
                    <tr><td>Role</td><td>CEO</td></tr></table></body></html>";
        let text = extract_page_text(html, 8000);
        assert!(text.contains("Name Ada"));
        assert!(text.contains("Role CEO"));
    }

    #[test]
    fn honours_char_budget_with_ellipsis() {
        let body = "word ".repeat(5000);
        let html = format!("<html><body><p>{body}</p></body></html>");
        let text = extract_page_text(&html, 8000);
        let chars = text.chars().count();
        assert!(chars <= 8001, "char count was {chars}");
        assert!(text.ends_with('…'));
    }

    #[test]
    fn multibyte_text_never_panics_at_the_cut() {
        let body = "héllo wörld ünïcode ".repeat(50);
        let html = format!("<html><body><p>{body}</p></body></html>");
        for budget in [1, 7, 20, 333] {
            let text = extract_page_text(&html, budget);
            assert!(text.chars().count() <= budget + 1);
        }
    }

    #[test]
    fn skips_line_break_spam() {
        let html = "<html><body><div><div><div>deep</div></div></div>\
                    <div>next</div></body></html>";
        let text = extract_page_text(html, 8000);
        assert_eq!(text, "deep\nnext");
    }

    #[tokio::test]
    async fn fetch_pages_handles_unreachable_hosts() {
        let urls = vec!["http://127.0.0.1:1/nothing".to_string()];
        let results = fetch_pages(&urls, 8, Duration::from_millis(300)).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].1.is_none());
    }
}
