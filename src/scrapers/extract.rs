//! Shared title/body/date extraction used by both fetch tiers.
//!
//! Body text comes from the per-host selector rule when one exists and yields
//! text, otherwise from a generic boilerplate-stripping heuristic that picks
//! the container holding the most text of its own, whether in `<p>` children
//! or broken up with `<br>`. Title and publish date
//! come from article metadata (Open Graph, JSON-LD, `<time>`, `<h1>`,
//! `<title>`) independently of the body.

use crate::config::Settings;
use crate::error::ExtractError;
use crate::models::ExtractedContent;
use crate::utils::{collapse_whitespace, parse_published};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Node, Selector};

const SKIPPED_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "iframe", "svg", "nav", "header", "footer",
    "aside", "form", "button", "figcaption",
];

static CONTAINER_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("article, main, section, div, [itemprop=articleBody]").unwrap()
});
/// Elements that end a container's own text: nested containers and headings.
const OWN_TEXT_BOUNDARY: &[&str] = &[
    "article", "main", "section", "div", "h1", "h2", "h3", "table", "ul", "ol",
];

static P_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("p").unwrap());

static TITLE_SELECTORS: Lazy<Vec<(Selector, Option<&'static str>)>> = Lazy::new(|| {
    vec![
        (Selector::parse(r#"meta[property="og:title"]"#).unwrap(), Some("content")),
        (Selector::parse(r#"meta[name="twitter:title"]"#).unwrap(), Some("content")),
        (Selector::parse(r#"meta[name="title"]"#).unwrap(), Some("content")),
        (Selector::parse("h1").unwrap(), None),
        (Selector::parse("title").unwrap(), None),
    ]
});

static DATE_SELECTORS: Lazy<Vec<(Selector, &'static str)>> = Lazy::new(|| {
    vec![
        (Selector::parse(r#"meta[property="article:published_time"]"#).unwrap(), "content"),
        (Selector::parse(r#"meta[name="article:published_time"]"#).unwrap(), "content"),
        (Selector::parse(r#"meta[itemprop="datePublished"]"#).unwrap(), "content"),
        (Selector::parse(r#"meta[name="pubdate"]"#).unwrap(), "content"),
        (Selector::parse(r#"meta[name="date"]"#).unwrap(), "content"),
        (Selector::parse(r#"meta[property="og:regDate"]"#).unwrap(), "content"),
        (Selector::parse("time[datetime]").unwrap(), "datetime"),
    ]
});

static JSON_LD_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"script[type="application/ld+json"]"#).unwrap());

/// Extract an article from raw HTML.
///
/// # Errors
///
/// - [`ExtractError::TooShort`] when the body has fewer than
///   `extraction.min_body_chars` characters
/// - [`ExtractError::MissingTitle`] when no title can be recovered
pub fn parse_article(
    html: &str,
    source_host: &str,
    settings: &Settings,
) -> Result<ExtractedContent, ExtractError> {
    let document = Html::parse_document(html);

    let mut body = settings
        .sources
        .body_selectors
        .get(source_host)
        .and_then(|rule| Selector::parse(rule).ok())
        .and_then(|selector| document.select(&selector).next())
        .map(visible_text)
        .unwrap_or_default();
    if body.is_empty() {
        body = generic_body(&document);
    }

    let chars = body.chars().count();
    let min = settings.extraction.min_body_chars;
    if chars < min {
        return Err(ExtractError::TooShort { chars, min });
    }

    let title = extract_title(&document).ok_or(ExtractError::MissingTitle)?;
    let published_at = extract_published(&document);

    Ok(ExtractedContent {
        title,
        body,
        published_at,
    })
}

/// Text of an element, skipping script/style/chrome subtrees, with
/// whitespace collapsed.
fn visible_text(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    collect_text(element, &mut out);
    collapse_whitespace(&out)
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) if !SKIPPED_TAGS.contains(&el.name()) => {
                let block = matches!(el.name(), "p" | "br" | "div" | "li" | "h2" | "h3" | "tr");
                if let Some(child_el) = ElementRef::wrap(child) {
                    if block {
                        out.push(' ');
                    }
                    collect_text(child_el, out);
                    if block {
                        out.push(' ');
                    }
                }
            }
            _ => {}
        }
    }
}

fn inside_skipped(element: ElementRef<'_>) -> bool {
    element.ancestors().any(|a| {
        a.value()
            .as_element()
            .is_some_and(|el| SKIPPED_TAGS.contains(&el.name()))
    })
}

/// Generic body heuristic: the container whose own text (outside links and
/// nested containers) is longest wins; failing that, every paragraph outside
/// page chrome.
fn generic_body(document: &Html) -> String {
    let best = document
        .select(&CONTAINER_SELECTOR)
        .filter(|el| !inside_skipped(*el))
        .map(|el| {
            let mut own = OwnText::default();
            own.collect(el, false);
            own
        })
        .filter(|own| own.score() > 0)
        .fold(None::<OwnText>, |best, cand| match best {
            Some(b) if b.score() >= cand.score() => Some(b),
            _ => Some(cand),
        });

    if let Some(own) = best {
        return own.lines();
    }

    document
        .select(&P_SELECTOR)
        .filter(|el| !inside_skipped(*el))
        .map(visible_text)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Text a container holds itself, with `<p>`/`<br>` breaks kept as newlines.
/// Nested containers are scored on their own and are not descended into.
#[derive(Debug, Default)]
struct OwnText {
    text: String,
    chars: usize,
    link_chars: usize,
}

impl OwnText {
    fn collect(&mut self, element: ElementRef<'_>, in_link: bool) {
        for child in element.children() {
            match child.value() {
                Node::Text(text) => {
                    let n = text.trim().chars().count();
                    self.chars += n;
                    if in_link {
                        self.link_chars += n;
                    }
                    self.text.push_str(text);
                }
                Node::Element(el) => {
                    let name = el.name();
                    if SKIPPED_TAGS.contains(&name) || OWN_TEXT_BOUNDARY.contains(&name) {
                        continue;
                    }
                    let Some(child_el) = ElementRef::wrap(child) else {
                        continue;
                    };
                    match name {
                        "br" => self.text.push('\n'),
                        "p" | "blockquote" => {
                            self.text.push('\n');
                            self.collect(child_el, in_link);
                            self.text.push('\n');
                        }
                        "a" => self.collect(child_el, true),
                        _ => self.collect(child_el, in_link),
                    }
                }
                _ => {}
            }
        }
    }

    /// Characters of non-link text.
    fn score(&self) -> usize {
        self.chars - self.link_chars
    }

    fn lines(&self) -> String {
        self.text
            .lines()
            .map(collapse_whitespace)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn extract_title(document: &Html) -> Option<String> {
    TITLE_SELECTORS.iter().find_map(|(selector, attr)| {
        document.select(selector).find_map(|el| {
            let raw = match attr {
                Some(attr) => el.value().attr(attr).map(str::to_string),
                None => Some(el.text().collect::<String>()),
            }?;
            let title = collapse_whitespace(&raw);
            (!title.is_empty()).then_some(title)
        })
    })
}

fn extract_published(document: &Html) -> Option<DateTime<Utc>> {
    DATE_SELECTORS
        .iter()
        .find_map(|(selector, attr)| {
            document
                .select(selector)
                .filter_map(|el| el.value().attr(attr))
                .find_map(parse_published)
        })
        .or_else(|| {
            document
                .select(&JSON_LD_SELECTOR)
                .filter_map(|el| {
                    serde_json::from_str::<serde_json::Value>(&el.text().collect::<String>()).ok()
                })
                .find_map(|json| json_ld_date(&json))
        })
}

/// `datePublished` from a JSON-LD object, array or `@graph`.
fn json_ld_date(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::Array(items) => items.iter().find_map(json_ld_date),
        serde_json::Value::Object(map) => map
            .get("datePublished")
            .and_then(|d| d.as_str())
            .and_then(parse_published)
            .or_else(|| map.get("@graph").and_then(json_ld_date)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    fn settings_with_rule(host: &str, selector: &str) -> Settings {
        let mut settings = Settings::default();
        settings
            .sources
            .body_selectors
            .insert(host.to_string(), selector.to_string());
        settings
    }

    fn long_text(word: &str) -> String {
        std::iter::repeat_n(word, 40).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn test_site_rule_body() {
        let html = format!(
            r#"<html><head><meta property="og:title" content="Rule Title"></head><body>
            <nav>menu menu menu</nav>
            <section class="article-body"><p>{}</p><script>var x = 1;</script></section>
            <div><p>{}</p><p>{}</p></div>
            </body></html>"#,
            long_text("rule"),
            long_text("other"),
            long_text("other")
        );
        let settings = settings_with_rule("chosun.com", "section.article-body");
        let article = parse_article(&html, "chosun.com", &settings).unwrap();
        assert_eq!(article.title, "Rule Title");
        assert!(article.body.starts_with("rule rule"));
        assert!(!article.body.contains("other"));
        assert!(!article.body.contains("var x"));
    }

    #[test]
    fn test_site_rule_miss_falls_back_to_generic() {
        let html = format!(
            "<html><head><title>Fallback</title></head><body><div id='x'><p>{}</p></div></body></html>",
            long_text("generic")
        );
        let settings = settings_with_rule("chosun.com", "section.article-body");
        let article = parse_article(&html, "chosun.com", &settings).unwrap();
        assert!(article.body.contains("generic"));
        assert_eq!(article.title, "Fallback");
    }

    #[test]
    fn test_generic_prefers_densest_container_and_skips_chrome() {
        let html = format!(
            r#"<html><body>
            <footer><p>{}</p><p>{}</p><p>{}</p></footer>
            <div class="teaser"><p>short teaser</p></div>
            <article><h1>Head</h1><p>{}</p><p>{}</p></article>
            </body></html>"#,
            long_text("footer"),
            long_text("footer"),
            long_text("footer"),
            long_text("story"),
            long_text("story")
        );
        let article = parse_article(&html, "unknown.com", &Settings::default()).unwrap();
        assert!(article.body.contains("story"));
        assert!(!article.body.contains("footer"));
        assert!(!article.body.contains("teaser"));
        assert_eq!(article.title, "Head");
    }

    #[test]
    fn test_generic_recovers_br_separated_body() {
        let sentence = "머니투데이 취재에 따르면 회사는 올해 하반기 신입사원 공채 규모를 작년보다 크게 늘리기로 했다.";
        let body = std::iter::repeat_n(sentence, 5).collect::<Vec<_>>().join("<br><br>");
        let html = format!(
            r#"<html><head><title>공채 확대</title></head><body>
            <div id="textBody">{body}</div>
            <div class="related"><p>관련기사</p><ul><li><a href="/x">다른 기사</a></li></ul></div>
            </body></html>"#
        );
        let article = parse_article(&html, "mt.co.kr", &Settings::default()).unwrap();
        assert_eq!(article.body.lines().count(), 5);
        assert!(article.body.lines().all(|line| line == sentence));
        assert!(!article.body.contains("관련기사"));
    }

    #[test]
    fn test_generic_discounts_link_lists() {
        let links = (0..30)
            .map(|i| format!(r#"<a href="/n/{i}">많이 본 뉴스 제목 {i}</a><br>"#))
            .collect::<String>();
        let html = format!(
            r#"<html><head><title>T</title></head><body>
            <div class="popular">{links}</div>
            <div class="story"><p>{}</p></div>
            </body></html>"#,
            long_text("story")
        );
        let article = parse_article(&html, "a.com", &Settings::default()).unwrap();
        assert!(article.body.starts_with("story"));
        assert!(!article.body.contains("많이 본"));
    }

    #[test]
    fn test_too_short() {
        let html = "<html><head><title>T</title></head><body><p>tiny</p></body></html>";
        let err = parse_article(html, "a.com", &Settings::default()).unwrap_err();
        assert_eq!(err, ExtractError::TooShort { chars: 4, min: 100 });
    }

    #[test]
    fn test_missing_title() {
        let html = format!("<html><body><div><p>{}</p></div></body></html>", long_text("body"));
        let err = parse_article(&html, "a.com", &Settings::default()).unwrap_err();
        assert_eq!(err, ExtractError::MissingTitle);
    }

    #[test]
    fn test_published_from_meta() {
        let html = format!(
            r#"<html><head><title>T</title>
            <meta property="article:published_time" content="2024-05-06T09:30:00+09:00">
            </head><body><div><p>{}</p></div></body></html>"#,
            long_text("body")
        );
        let article = parse_article(&html, "a.com", &Settings::default()).unwrap();
        assert_eq!(article.published_at.unwrap().day(), 6);
    }

    #[test]
    fn test_published_from_json_ld_graph() {
        let html = format!(
            r#"<html><head><title>T</title>
            <script type="application/ld+json">{{"@graph":[{{"@type":"NewsArticle","datePublished":"2023-12-31T23:00:00Z"}}]}}</script>
            </head><body><div><p>{}</p></div></body></html>"#,
            long_text("body")
        );
        let article = parse_article(&html, "a.com", &Settings::default()).unwrap();
        assert_eq!(article.published_at.unwrap().year(), 2023);
    }

    #[test]
    fn test_no_date_is_none() {
        let html = format!(
            "<html><head><title>T</title></head><body><div><p>{}</p></div></body></html>",
            long_text("body")
        );
        let article = parse_article(&html, "a.com", &Settings::default()).unwrap();
        assert_eq!(article.published_at, None);
    }
}
