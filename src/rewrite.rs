//! Chapter markup rewriting.
//!
//! Fetched chapters reference images, stylesheet assets and sibling chapters
//! relative to their own location. Once the body is lifted into the viewer
//! those references would resolve against the content root instead, so every
//! relative reference is prefixed with the chapter's base directory and
//! relative anchors are marked as internal links.

use std::sync::LazyLock;

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use regex::{Captures, Regex};

use crate::error::LoadError;

/// Attribute set on anchors whose clicks become in-app navigation.
pub const INTERNAL_LINK_ATTR: &str = "data-internal-link";

static STYLE_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"url\(\s*(['"]?)([^'")]+)(['"]?)\s*\)"#).unwrap());

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Elements removed together with their content when sanitizing.
const STRIPPED_ELEMENTS: &[&str] = &[
    "script", "iframe", "frame", "frameset", "object", "embed", "applet", "base",
];

const URL_ATTRIBUTES: &[&str] = &["href", "src", "action", "formaction", "xlink:href"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewriteOptions {
    /// Strip scripts, embedded frames and event handlers before display.
    pub sanitize: bool,
}

impl Default for RewriteOptions {
    fn default() -> Self {
        Self { sanitize: true }
    }
}

/// Body content of a chapter with references rewritten.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewrittenDocument {
    /// Directory every relative reference was resolved against, ending in `/`.
    pub base: String,
    /// Inner markup of `<body>`.
    pub body: String,
    /// Rewritten `href`s of anchors marked as internal, in document order.
    pub internal_links: Vec<String>,
}

/// Directory part of a content path, always ending in `/`.
///
/// `"/OEBPS/Text/ch1.xhtml"` becomes `"/OEBPS/Text/"`; a bare file name
/// becomes `"/"`.
pub fn base_dir(content_path: &str) -> String {
    let mut parts: Vec<&str> = strip_fragment(content_path).split('/').collect();
    parts.pop();
    format!("{}/", parts.join("/"))
}

/// Path without any `#fragment` or `?query` suffix.
pub fn strip_fragment(path: &str) -> &str {
    path.split(['#', '?']).next().unwrap_or(path)
}

/// Root-relative (`/x`, `//host/x`) or scheme-prefixed (`http:`, `data:`, ...).
pub fn is_absolute(reference: &str) -> bool {
    reference.starts_with('/') || has_scheme(reference)
}

fn has_scheme(reference: &str) -> bool {
    let Some((scheme, _)) = reference.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Anchors pointing at other documents relative to this one.
fn is_relative_document_link(href: &str) -> bool {
    !href.is_empty() && !href.starts_with('#') && !is_absolute(href)
}

/// Prefix every relative `url(...)` in an inline style with `base`.
pub fn rewrite_style_urls(style: &str, base: &str) -> String {
    STYLE_URL_RE
        .replace_all(style, |caps: &Captures| {
            let url = caps[2].trim();
            if is_absolute(url) {
                caps[0].to_string()
            } else {
                format!("url({}{}{}{})", &caps[1], base, url, &caps[3])
            }
        })
        .into_owned()
}

fn is_dangerous_url(value: &str) -> bool {
    let compact: String = value
        .chars()
        .filter(|c| !c.is_ascii_whitespace() && !c.is_control())
        .collect::<String>()
        .to_ascii_lowercase();
    compact.starts_with("javascript:") || compact.starts_with("vbscript:")
}

fn is_safe_attribute(key: &str, value: &str) -> bool {
    let key = key.to_ascii_lowercase();
    if key.starts_with("on") || key == "srcdoc" {
        return false;
    }
    !(URL_ATTRIBUTES.contains(&key.as_str()) && is_dangerous_url(value))
}

/// Start tag after attribute rewriting.
struct Element {
    /// Name as written in the source.
    name: String,
    /// Lower-cased local name used for matching.
    tag: String,
    attrs: Vec<(String, String)>,
}

impl Element {
    fn attr_mut(&mut self, key: &str) -> Option<&mut String> {
        self.attrs
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }

    fn set_attr(&mut self, key: &str, value: &str) {
        match self.attr_mut(key) {
            Some(existing) => *existing = value.to_string(),
            None => self.attrs.push((key.to_string(), value.to_string())),
        }
    }

    fn prefix_resource(&mut self, key: &str, base: &str) {
        if let Some(value) = self.attr_mut(key) {
            if !value.is_empty() && !is_absolute(value) {
                *value = format!("{}{}", base, value);
            }
        }
    }

    fn to_markup(&self, self_closing: bool) -> String {
        let mut markup = format!("<{}", self.name);
        for (key, value) in &self.attrs {
            markup.push(' ');
            markup.push_str(key);
            markup.push_str("=\"");
            markup.push_str(&escape(value.as_str()));
            markup.push('"');
        }
        markup.push_str(if self_closing { "/>" } else { ">" });
        markup
    }
}

fn local_tag(raw: &[u8]) -> String {
    let name = String::from_utf8_lossy(raw);
    let local = name.rsplit(':').next().unwrap_or(&name);
    local.to_ascii_lowercase()
}

/// A bare `<` in text reaches the reader as a start tag with no usable name.
fn is_tag_name(tag: &str) -> bool {
    tag.starts_with(|c: char| c.is_ascii_alphabetic())
}

/// Re-emit a misread start tag as the text it was.
fn stray_lt(start: &BytesStart<'_>, empty: bool) -> String {
    let raw = String::from_utf8_lossy(start);
    let close = if empty { "/&gt;" } else { "&gt;" };
    format!("&lt;{}{}", escape(raw.as_ref()), close)
}

/// Element subtree being dropped (`<head>` or a sanitized element).
struct Skip {
    tag: String,
    depth: usize,
}

/// Collects output, routing it to the body buffer once `<body>` is seen.
#[derive(Default)]
struct Output {
    body: String,
    loose: String,
    in_body: bool,
    body_seen: bool,
}

impl Output {
    fn push(&mut self, markup: &str) {
        if self.in_body {
            self.body.push_str(markup);
        } else if !self.body_seen {
            self.loose.push_str(markup);
        }
    }

    fn enter_body(&mut self) {
        self.in_body = true;
        self.body_seen = true;
    }

    fn leave_body(&mut self) {
        self.in_body = false;
    }

    /// Body content, or the whole fragment when the document had no `<body>`.
    fn finish(self) -> String {
        if self.body_seen {
            self.body
        } else {
            self.loose
        }
    }
}

/// Rewrite a fetched chapter located at `content_path`.
///
/// Images, inline-style `url(...)` references and anchors that are relative
/// get the chapter's base directory prefixed. Rewritten anchors are marked
/// with [`INTERNAL_LINK_ATTR`]. Absolute and fragment-only references are
/// left untouched.
pub fn rewrite_document(
    html: &str,
    content_path: &str,
    options: &RewriteOptions,
) -> Result<RewrittenDocument, LoadError> {
    let base = base_dir(content_path);

    let mut reader = Reader::from_str(html);
    let config = reader.config_mut();
    config.trim_text(false);
    config.check_end_names = false;
    config.allow_unmatched_ends = true;
    config.allow_dangling_amp = true;

    let mut out = Output::default();
    let mut skip: Option<Skip> = None;
    let mut internal_links: Vec<String> = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let tag = local_tag(e.name().as_ref());
                if let Some(s) = skip.as_mut() {
                    if s.tag == tag {
                        s.depth += 1;
                    }
                    continue;
                }
                if !is_tag_name(&tag) {
                    out.push(&stray_lt(&e, false));
                    continue;
                }
                match tag.as_str() {
                    "html" => continue,
                    "body" => {
                        if !out.in_body {
                            out.enter_body();
                        }
                        continue;
                    }
                    "head" if !out.in_body => {
                        skip = Some(Skip { tag, depth: 1 });
                        continue;
                    }
                    _ => {}
                }
                let void = VOID_ELEMENTS.contains(&tag.as_str());
                if options.sanitize && STRIPPED_ELEMENTS.contains(&tag.as_str()) {
                    log::debug!("Stripping <{}> from {}", tag, content_path);
                    if !void {
                        skip = Some(Skip { tag, depth: 1 });
                    }
                    continue;
                }
                let element = rewrite_element(&e, tag, &base, options, &mut internal_links)?;
                out.push(&element.to_markup(void));
            }
            Event::Empty(e) => {
                if skip.is_some() {
                    continue;
                }
                let tag = local_tag(e.name().as_ref());
                if !is_tag_name(&tag) {
                    out.push(&stray_lt(&e, true));
                    continue;
                }
                match tag.as_str() {
                    "html" | "head" => continue,
                    "body" => {
                        out.enter_body();
                        out.leave_body();
                        continue;
                    }
                    _ => {}
                }
                if options.sanitize && STRIPPED_ELEMENTS.contains(&tag.as_str()) {
                    log::debug!("Stripping <{}/> from {}", tag, content_path);
                    continue;
                }
                let element = rewrite_element(&e, tag, &base, options, &mut internal_links)?;
                out.push(&element.to_markup(true));
            }
            Event::End(e) => {
                let tag = local_tag(e.name().as_ref());
                if let Some(s) = skip.as_mut() {
                    if s.tag == tag {
                        s.depth -= 1;
                        if s.depth == 0 {
                            skip = None;
                        }
                    }
                    continue;
                }
                match tag.as_str() {
                    "html" | "head" => {}
                    "body" => out.leave_body(),
                    _ if VOID_ELEMENTS.contains(&tag.as_str()) => {}
                    _ => {
                        let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                        out.push(&format!("</{}>", name));
                    }
                }
            }
            Event::Text(e) => {
                if skip.is_none() {
                    out.push(&String::from_utf8_lossy(&e));
                }
            }
            Event::CData(e) => {
                if skip.is_none() {
                    let text = String::from_utf8_lossy(&e);
                    out.push(&escape(text.as_ref()));
                }
            }
            Event::GeneralRef(e) => {
                if skip.is_none() {
                    out.push(&format!("&{};", String::from_utf8_lossy(&e)));
                }
            }
            Event::Eof => break,
            // Comments, declarations, doctypes and processing instructions
            _ => {}
        }
    }

    Ok(RewrittenDocument {
        base,
        body: out.finish(),
        internal_links,
    })
}

fn rewrite_element(
    start: &BytesStart<'_>,
    tag: String,
    base: &str,
    options: &RewriteOptions,
    internal_links: &mut Vec<String>,
) -> Result<Element, LoadError> {
    let mut attrs = Vec::new();
    let mut attributes = start.html_attributes();
    attributes.with_checks(false);
    for attr in attributes {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_or_else(
            |_| String::from_utf8_lossy(&attr.value).into_owned(),
            |v| v.into_owned(),
        );
        if options.sanitize && !is_safe_attribute(&key, &value) {
            log::debug!("Dropping attribute {}={:?} on <{}>", key, value, tag);
            continue;
        }
        attrs.push((key, value));
    }

    let mut element = Element {
        name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
        tag,
        attrs,
    };

    match element.tag.as_str() {
        "img" => element.prefix_resource("src", base),
        "image" => {
            element.prefix_resource("href", base);
            element.prefix_resource("xlink:href", base);
        }
        "a" => {
            let mut rewritten = None;
            if let Some(href) = element.attr_mut("href") {
                if is_relative_document_link(href) {
                    *href = format!("{}{}", base, href);
                    rewritten = Some(href.clone());
                }
            }
            if let Some(href) = rewritten {
                element.set_attr(INTERNAL_LINK_ATTR, "true");
                if !internal_links.contains(&href) {
                    internal_links.push(href);
                }
            }
        }
        _ => {}
    }

    if let Some(style) = element.attr_mut("style") {
        if style.contains("url(") {
            *style = rewrite_style_urls(style, base);
        }
    }

    Ok(element)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn rewrite(html: &str, path: &str) -> RewrittenDocument {
        rewrite_document(html, path, &RewriteOptions::default()).unwrap()
    }

    #[test]
    fn test_base_dir() {
        assert_eq!(base_dir("/OEBPS/cg_cirugia-1.xhtml"), "/OEBPS/");
        assert_eq!(base_dir("/OEBPS/Text/ch1.xhtml"), "/OEBPS/Text/");
        assert_eq!(base_dir("ch1.xhtml"), "/");
        assert_eq!(base_dir("/ch1.xhtml"), "/");
        assert_eq!(base_dir("/OEBPS/ch2.xhtml#sec/1"), "/OEBPS/");
        assert_eq!(base_dir("/OEBPS/ch2.xhtml?v=2"), "/OEBPS/");
    }

    #[test]
    fn test_is_absolute() {
        assert!(is_absolute("/OEBPS/img.png"));
        assert!(is_absolute("//cdn.example.com/img.png"));
        assert!(is_absolute("http://example.com/a.png"));
        assert!(is_absolute("https://example.com/a.png"));
        assert!(is_absolute("data:image/png;base64,AAAA"));
        assert!(is_absolute("mailto:someone@example.com"));

        assert!(!is_absolute("images/a.png"));
        assert!(!is_absolute("../images/a.png"));
        assert!(!is_absolute("httpdocs/a.png"));
        assert!(!is_absolute("dir/a:b.png"));
        assert!(!is_absolute("1http:x"));
    }

    #[test]
    fn test_style_urls_preserve_quoting() {
        let base = "/OEBPS/";
        assert_eq!(
            rewrite_style_urls("background: url(img/bg.png)", base),
            "background: url(/OEBPS/img/bg.png)"
        );
        assert_eq!(
            rewrite_style_urls("background: url('img/bg.png')", base),
            "background: url('/OEBPS/img/bg.png')"
        );
        assert_eq!(
            rewrite_style_urls(r#"background: url("img/bg.png")"#, base),
            r#"background: url("/OEBPS/img/bg.png")"#
        );
    }

    #[test]
    fn test_style_urls_leave_absolute_untouched() {
        let style = "background: url('http://x.org/a.png'), url(/OEBPS/b.png), url(c.png)";
        assert_eq!(
            rewrite_style_urls(style, "/OEBPS/Text/"),
            "background: url('http://x.org/a.png'), url(/OEBPS/b.png), url(/OEBPS/Text/c.png)"
        );
    }

    #[test]
    fn test_rewrite_images_and_links() {
        let html = r#"<?xml version="1.0" encoding="utf-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml">
<head><title>Capítulo 1</title><link rel="stylesheet" href="style.css"/></head>
<body><p><img src="images/fig1.png" alt="Fig 1"/><a href="ch2.xhtml">Next</a></p></body>
</html>"#;
        let doc = rewrite(html, "/OEBPS/ch1.xhtml");

        assert_eq!(doc.base, "/OEBPS/");
        assert_eq!(
            doc.body,
            r#"<p><img src="/OEBPS/images/fig1.png" alt="Fig 1"/><a href="/OEBPS/ch2.xhtml" data-internal-link="true">Next</a></p>"#
        );
        assert_eq!(doc.internal_links, vec!["/OEBPS/ch2.xhtml"]);
    }

    #[test]
    fn test_absolute_and_fragment_references_untouched() {
        let html = concat!(
            r#"<body>"#,
            r#"<img src="http://example.com/a.png"/>"#,
            r#"<img src="/OEBPS/b.png"/>"#,
            r##"<a href="#note1">1</a>"##,
            r#"<a href="https://example.com">site</a>"#,
            r#"<a href="/OEBPS/ch3.xhtml">abs</a>"#,
            r#"<a id="anchor">no href</a>"#,
            r#"</body>"#
        );
        let doc = rewrite(html, "/OEBPS/Text/ch1.xhtml");

        assert_eq!(doc.body, html.trim_start_matches("<body>").trim_end_matches("</body>"));
        assert!(doc.internal_links.is_empty());
    }

    #[test]
    fn test_relative_link_with_fragment() {
        let doc = rewrite(
            r#"<body><a href="../Text/ch2.xhtml#sec2">see</a></body>"#,
            "/OEBPS/Text/ch1.xhtml",
        );
        assert_eq!(doc.internal_links, vec!["/OEBPS/Text/../Text/ch2.xhtml#sec2"]);
        assert!(doc.body.contains(r#"data-internal-link="true""#));
    }

    #[test]
    fn test_inline_style_rewritten() {
        let doc = rewrite(
            r#"<body><div style="background-image: url('img/bg.jpg')">x</div></body>"#,
            "/OEBPS/ch1.xhtml",
        );
        assert_eq!(
            doc.body,
            r#"<div style="background-image: url(&apos;/OEBPS/img/bg.jpg&apos;)">x</div>"#
        );
    }

    #[test]
    fn test_svg_cover_image() {
        let doc = rewrite(
            r#"<body><svg xmlns:xlink="http://www.w3.org/1999/xlink"><image xlink:href="cover.jpg"/></svg></body>"#,
            "/OEBPS/cover.xhtml",
        );
        assert!(doc.body.contains(r#"xlink:href="/OEBPS/cover.jpg""#));
    }

    #[test]
    fn test_fragment_without_body() {
        let doc = rewrite(r#"<h1>Title</h1><p>Text &amp; more</p>"#, "/OEBPS/a.xhtml");
        assert_eq!(doc.body, "<h1>Title</h1><p>Text &amp; more</p>");
    }

    #[test]
    fn test_html_void_elements_without_slash() {
        let doc = rewrite(
            r#"<html><body><p>a<br>b</p><img src="x.png"><hr></body></html>"#,
            "/OEBPS/a.xhtml",
        );
        assert_eq!(doc.body, r#"<p>a<br/>b</p><img src="/OEBPS/x.png"/><hr/>"#);
    }

    #[test]
    fn test_sanitize_strips_scripts_and_handlers() {
        let html = concat!(
            r#"<body>"#,
            r#"<script>alert(1)</script>"#,
            r#"<p onclick="steal()">ok</p>"#,
            r#"<a href="javascript:alert(1)">bad</a>"#,
            r#"<a href=" JaVa&#x09;script:alert(1)">worse</a>"#,
            r#"<iframe src="x.html"><p>inner</p></iframe>"#,
            r#"<embed src="x.swf">"#,
            r#"</body>"#
        );
        let doc = rewrite(html, "/OEBPS/a.xhtml");
        assert_eq!(doc.body, "<p>ok</p><a>bad</a><a>worse</a>");
    }

    #[test]
    fn test_trusted_content_keeps_scripts() {
        let html = r#"<body><script>init()</script><p onclick="f()">ok</p></body>"#;
        let doc = rewrite_document(html, "/OEBPS/a.xhtml", &RewriteOptions { sanitize: false }).unwrap();
        assert_eq!(doc.body, r#"<script>init()</script><p onclick="f()">ok</p>"#);
    }

    #[test]
    fn test_bare_ampersand_in_text() {
        let doc = rewrite(
            r#"<html><body><p>Tom & Jerry</p><img src="a.png"/></body></html>"#,
            "/OEBPS/ch1.xhtml",
        );
        assert_eq!(doc.body, r#"<p>Tom & Jerry</p><img src="/OEBPS/a.png"/>"#);

        let resolve = |path: &str| path.to_string();
        let page = crate::markdown::to_markdown("<p>Tom & Jerry</p>", &resolve).unwrap();
        assert_eq!(page.markdown, "Tom \\& Jerry\n");
    }

    #[test]
    fn test_bare_less_than_kept_as_text() {
        let doc = rewrite("<body><p>if a < b</p></body>", "/OEBPS/ch1.xhtml");
        assert_eq!(doc.body, "<p>if a &lt; b&lt;/p&gt;");

        let resolve = |path: &str| path.to_string();
        let page = crate::markdown::to_markdown(&doc.body, &resolve).unwrap();
        assert!(page.markdown.starts_with("if a \\< b"));
    }

    #[test]
    fn test_duplicate_links_listed_once() {
        let doc = rewrite(
            r#"<body><a href="b.xhtml">1</a><a href="b.xhtml">2</a><a href="c.xhtml">3</a></body>"#,
            "/OEBPS/a.xhtml",
        );
        assert_eq!(doc.internal_links, vec!["/OEBPS/b.xhtml", "/OEBPS/c.xhtml"]);
    }
}
