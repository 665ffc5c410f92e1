//! Rewritten chapter markup to CommonMark.
//!
//! The viewer renders chapters with the markdown widget, so the body markup is
//! flattened into headings, paragraphs, lists, quotes, code, links and images.
//! Internal and fragment-only links become link hooks; root-relative images
//! and links are resolved to URIs the widget can load.

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::error::LoadError;
use crate::rewrite::INTERNAL_LINK_ATTR;

/// Chapter ready for the markdown widget.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedPage {
    pub markdown: String,
    /// Link destinations that must be intercepted instead of opened.
    pub link_hooks: Vec<String>,
    /// Text of the first `<h1>`, if any.
    pub title: Option<String>,
}

const SKIPPED: &[&str] = &["head", "script", "style", "title", "noscript", "template"];

const BLOCKS: &[&str] = &[
    "p", "div", "section", "article", "header", "footer", "aside", "nav", "figure", "figcaption",
    "main", "dl", "dt", "dd", "center", "address", "details", "summary", "caption", "table",
    "thead", "tbody", "tfoot",
];

enum Container {
    Quote,
    Item(usize),
}

struct List {
    ordered: bool,
    next: u64,
}

struct MarkdownWriter<'a> {
    out: String,
    resolve: &'a dyn Fn(&str) -> String,
    containers: Vec<Container>,
    lists: Vec<List>,
    /// Open anchors; `None` for anchors rendered as plain text.
    links: Vec<Option<String>>,
    link_hooks: Vec<String>,
    /// Emphasis markers waiting for the first non-blank character.
    pending_markers: String,
    at_line_start: bool,
    block_pending: bool,
    /// Just entered a quote or list item; the next block needs no separator.
    container_fresh: bool,
    pending_break: bool,
    pre_depth: usize,
    code_depth: usize,
    heading: Option<u8>,
    title_buf: Option<String>,
    title: Option<String>,
    row_cells: Vec<usize>,
}

impl<'a> MarkdownWriter<'a> {
    fn new(resolve: &'a dyn Fn(&str) -> String) -> Self {
        Self {
            out: String::new(),
            resolve,
            containers: Vec::new(),
            lists: Vec::new(),
            links: Vec::new(),
            link_hooks: Vec::new(),
            pending_markers: String::new(),
            at_line_start: true,
            block_pending: false,
            container_fresh: false,
            pending_break: false,
            pre_depth: 0,
            code_depth: 0,
            heading: None,
            title_buf: None,
            title: None,
            row_cells: Vec::new(),
        }
    }

    fn prefix(&self) -> String {
        self.containers
            .iter()
            .map(|c| match c {
                Container::Quote => "> ".to_string(),
                Container::Item(width) => " ".repeat(*width),
            })
            .collect()
    }

    fn newline(&mut self) {
        self.out.push('\n');
        self.at_line_start = true;
    }

    fn write_raw(&mut self, s: &str) {
        if self.at_line_start {
            let prefix = self.prefix();
            self.out.push_str(&prefix);
            self.at_line_start = false;
        }
        self.out.push_str(s);
    }

    /// Blank line between blocks, carrying the container prefix.
    fn separate(&mut self) {
        self.pending_break = false;
        if self.out.is_empty() {
            return;
        }
        if !self.at_line_start {
            self.newline();
        }
        let prefix = self.prefix();
        self.out.push_str(prefix.trim_end());
        self.newline();
    }

    fn start_block(&mut self) {
        self.block_pending = false;
        if self.container_fresh {
            self.container_fresh = false;
            return;
        }
        self.separate();
    }

    fn end_block(&mut self) {
        self.block_pending = true;
        self.pending_break = false;
    }

    fn inline(&mut self, s: &str) {
        if self.block_pending {
            self.start_block();
        }
        if self.pending_break {
            self.pending_break = false;
            self.write_raw("\\");
            self.newline();
        }
        self.container_fresh = false;
        if !self.pending_markers.is_empty() {
            let markers = std::mem::take(&mut self.pending_markers);
            self.write_raw(&markers);
        }
        self.write_raw(s);
    }

    fn text(&mut self, raw: &str) {
        if let Some(buf) = self.title_buf.as_mut() {
            buf.push_str(raw);
        }

        if self.pre_depth > 0 {
            for (i, line) in raw.split('\n').enumerate() {
                if i > 0 {
                    self.newline();
                }
                if !line.is_empty() {
                    self.write_raw(line);
                }
            }
            return;
        }

        let collapsed = collapse_whitespace(raw);
        let trimmed = collapsed.trim_start();
        let mid_line = !self.at_line_start
            && !self.block_pending
            && !self.container_fresh
            && !self.out.ends_with([' ', '\n'])
            && !self.pending_break;

        if trimmed.is_empty() {
            if mid_line && !collapsed.is_empty() {
                self.write_raw(" ");
            }
            return;
        }

        if mid_line && collapsed.starts_with(' ') {
            self.write_raw(" ");
        }
        let line_start = self.at_line_start
            || self.block_pending
            || self.container_fresh
            || self.pending_break
            || self.out.ends_with('\n');
        let escaped = if self.code_depth > 0 {
            trimmed.to_string()
        } else {
            escape_text(trimmed, line_start)
        };
        self.inline(&escaped);
    }

    fn open_marker(&mut self, marker: &str) {
        if self.pre_depth == 0 {
            self.pending_markers.push_str(marker);
        }
    }

    fn close_marker(&mut self, marker: &str) {
        if self.pre_depth > 0 {
            return;
        }
        if self.pending_markers.ends_with(marker) {
            // Nothing was written inside; drop the pair
            let len = self.pending_markers.len() - marker.len();
            self.pending_markers.truncate(len);
            return;
        }
        if self.out.ends_with(' ') {
            self.out.pop();
            self.out.push_str(marker);
            self.out.push(' ');
        } else {
            self.out.push_str(marker);
        }
    }

    fn line_break(&mut self) {
        if self.pre_depth > 0 {
            self.newline();
        } else if self.heading.is_some() {
            self.text(" ");
        } else if !self.block_pending && !self.at_line_start {
            self.pending_break = true;
        }
    }

    fn start_element(&mut self, tag: &str, e: &BytesStart<'_>) {
        match tag {
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let level = tag.as_bytes()[1] - b'0';
                self.start_block();
                self.write_raw(&format!("{} ", "#".repeat(level as usize)));
                self.heading = Some(level);
                if level == 1 && self.title.is_none() {
                    self.title_buf = Some(String::new());
                }
            }
            "blockquote" => {
                self.start_block();
                self.containers.push(Container::Quote);
                self.container_fresh = true;
            }
            "ul" | "ol" => {
                let next = attribute(e, "start")
                    .and_then(|s| s.trim().parse().ok())
                    .unwrap_or(1);
                self.lists.push(List {
                    ordered: tag == "ol",
                    next,
                });
                if !self.container_fresh {
                    self.end_block();
                }
            }
            "li" => self.start_item(),
            "pre" => {
                self.start_block();
                self.write_raw("```");
                self.newline();
                self.pre_depth += 1;
            }
            "code" | "kbd" | "samp" | "tt" => {
                if self.pre_depth == 0 {
                    self.open_marker("`");
                    self.code_depth += 1;
                }
            }
            "em" | "i" | "cite" | "var" | "dfn" => self.open_marker("*"),
            "strong" | "b" => self.open_marker("**"),
            "s" | "strike" | "del" => self.open_marker("~~"),
            "a" => self.start_link(e),
            "tr" => {
                self.end_block();
                self.row_cells.push(0);
            }
            "td" | "th" => {
                if let Some(cells) = self.row_cells.last_mut() {
                    let first = *cells == 0;
                    *cells += 1;
                    if !first {
                        self.inline(" | ");
                    }
                }
            }
            _ if BLOCKS.contains(&tag) => self.end_block(),
            _ => {}
        }
    }

    fn end_element(&mut self, tag: &str) {
        match tag {
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                self.heading = None;
                if let Some(buf) = self.title_buf.take() {
                    let title = collapse_whitespace(&buf).trim().to_string();
                    if !title.is_empty() {
                        self.title = Some(title);
                    }
                }
                self.pending_markers.clear();
                self.end_block();
            }
            "blockquote" => {
                if matches!(self.containers.last(), Some(Container::Quote)) {
                    self.containers.pop();
                }
                self.container_fresh = false;
                self.end_block();
            }
            "ul" | "ol" => {
                self.lists.pop();
                self.end_block();
            }
            "li" => {
                if matches!(self.containers.last(), Some(Container::Item(_))) {
                    self.containers.pop();
                }
                self.container_fresh = false;
                self.block_pending = false;
                self.pending_break = false;
                if !self.at_line_start {
                    self.newline();
                }
            }
            "pre" => {
                if self.pre_depth > 0 {
                    self.pre_depth -= 1;
                    if !self.at_line_start {
                        self.newline();
                    }
                    self.write_raw("```");
                    self.end_block();
                }
            }
            "code" | "kbd" | "samp" | "tt" => {
                if self.pre_depth == 0 && self.code_depth > 0 {
                    self.code_depth -= 1;
                    self.close_marker("`");
                }
            }
            "em" | "i" | "cite" | "var" | "dfn" => self.close_marker("*"),
            "strong" | "b" => self.close_marker("**"),
            "s" | "strike" | "del" => self.close_marker("~~"),
            "a" => self.end_link(),
            "tr" => {
                self.row_cells.pop();
                self.end_block();
            }
            _ if BLOCKS.contains(&tag) => self.end_block(),
            _ => {}
        }
    }

    fn start_item(&mut self) {
        if self.block_pending && !self.container_fresh {
            self.separate();
        } else if !self.at_line_start {
            self.newline();
        }
        self.block_pending = false;
        self.pending_break = false;
        self.container_fresh = false;

        let marker = match self.lists.last_mut() {
            Some(list) if list.ordered => {
                let marker = format!("{}. ", list.next);
                list.next += 1;
                marker
            }
            _ => "- ".to_string(),
        };
        self.write_raw(&marker);
        self.containers.push(Container::Item(marker.len()));
        self.container_fresh = true;
    }

    fn start_link(&mut self, e: &BytesStart<'_>) {
        let Some(href) = attribute(e, "href").filter(|h| !h.is_empty()) else {
            self.links.push(None);
            return;
        };
        if self.pre_depth > 0 {
            self.links.push(None);
            return;
        }

        let internal = attribute(e, INTERNAL_LINK_ATTR).as_deref() == Some("true");
        let dest = if internal || href.starts_with('#') {
            let dest = link_destination(&href);
            if !self.link_hooks.contains(&dest) {
                self.link_hooks.push(dest.clone());
            }
            dest
        } else if is_root_relative(&href) {
            link_destination(&(self.resolve)(&href))
        } else {
            link_destination(&href)
        };

        self.inline("[");
        self.links.push(Some(dest));
    }

    fn end_link(&mut self) {
        if let Some(Some(dest)) = self.links.pop() {
            self.pending_markers.clear();
            self.write_raw(&format!("](<{}>)", dest));
        }
    }

    fn image(&mut self, e: &BytesStart<'_>, tag: &str) {
        if self.pre_depth > 0 {
            return;
        }
        let src = if tag == "image" {
            attribute(e, "href").or_else(|| attribute(e, "xlink:href"))
        } else {
            attribute(e, "src")
        };
        let Some(src) = src.filter(|s| !s.is_empty()) else {
            return;
        };
        let uri = if is_root_relative(&src) {
            (self.resolve)(&src)
        } else {
            src
        };
        let alt = attribute(e, "alt").unwrap_or_default();
        let alt = escape_text(&collapse_whitespace(&alt), false);
        self.inline(&format!("![{}](<{}>)", alt, link_destination(&uri)));
    }

    fn rule(&mut self) {
        self.start_block();
        self.write_raw("---");
        self.end_block();
    }

    fn finish(self) -> RenderedPage {
        let mut markdown = self.out.trim_end().to_string();
        if !markdown.is_empty() {
            markdown.push('\n');
        }
        RenderedPage {
            markdown,
            link_hooks: self.link_hooks,
            title: self.title,
        }
    }
}

fn is_root_relative(reference: &str) -> bool {
    reference.starts_with('/') && !reference.starts_with("//")
}

/// Destination usable inside `<...>`.
fn link_destination(dest: &str) -> String {
    dest.replace('<', "%3C").replace('>', "%3E")
}

fn attribute(e: &BytesStart<'_>, key: &str) -> Option<String> {
    let mut attributes = e.html_attributes();
    attributes.with_checks(false);
    attributes
        .flatten()
        .find(|attr| attr.key.as_ref().eq_ignore_ascii_case(key.as_bytes()))
        .map(|attr| {
            attr.unescape_value().map_or_else(
                |_| String::from_utf8_lossy(&attr.value).into_owned(),
                |v| v.into_owned(),
            )
        })
}

fn local_tag(raw: &[u8]) -> String {
    let name = String::from_utf8_lossy(raw);
    let local = name.rsplit(':').next().unwrap_or(&name);
    local.to_ascii_lowercase()
}

/// Collapse runs of ASCII whitespace into single spaces; keeps non-breaking spaces.
fn collapse_whitespace(text: &str) -> String {
    let mut collapsed = String::with_capacity(text.len());
    let mut last_was_space = false;
    for c in text.chars() {
        if c.is_ascii_whitespace() {
            if !last_was_space {
                collapsed.push(' ');
            }
            last_was_space = true;
        } else {
            collapsed.push(c);
            last_was_space = false;
        }
    }
    collapsed
}

/// Backslash-escape characters CommonMark would interpret.
fn escape_text(text: &str, line_start: bool) -> String {
    let mut escaped = String::with_capacity(text.len() + 8);
    let mut chars = text.char_indices().peekable();

    if line_start {
        // Leading "-", "+", "=" or "1." would start a list, rule or heading
        if let Some(&(_, first)) = chars.peek() {
            if matches!(first, '-' | '+' | '=') {
                escaped.push('\\');
            }
        }
        let digits = text.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits > 0 && matches!(text[digits..].chars().next(), Some('.' | ')')) {
            escaped.push_str(&text[..digits]);
            escaped.push('\\');
            for _ in 0..digits {
                chars.next();
            }
        }
    }

    for (_, c) in chars {
        if matches!(
            c,
            '\\' | '`' | '*' | '_' | '[' | ']' | '<' | '>' | '#' | '!' | '|' | '&' | '~'
        ) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Resolve an entity reference name (without `&` and `;`).
fn decode_entity(name: &str) -> String {
    if let Ok(decoded) = quick_xml::escape::unescape(&format!("&{};", name)) {
        return decoded.into_owned();
    }
    let c = match name {
        "nbsp" => '\u{a0}',
        "shy" => '\u{ad}',
        "mdash" => '—',
        "ndash" => '–',
        "hellip" => '…',
        "lsquo" => '‘',
        "rsquo" => '’',
        "ldquo" => '“',
        "rdquo" => '”',
        "laquo" => '«',
        "raquo" => '»',
        "copy" => '©',
        "reg" => '®',
        "deg" => '°',
        "middot" => '·',
        "times" => '×',
        "iexcl" => '¡',
        "iquest" => '¿',
        _ => return format!("&{};", name),
    };
    c.to_string()
}

/// Convert rewritten body markup to CommonMark.
///
/// `resolve` turns a root-relative content path into a URI the renderer can
/// load (see [`crate::source::ContentSource::resource_uri`]).
pub fn to_markdown(body: &str, resolve: &dyn Fn(&str) -> String) -> Result<RenderedPage, LoadError> {
    let mut reader = Reader::from_str(body);
    let config = reader.config_mut();
    config.trim_text(false);
    config.check_end_names = false;
    config.allow_unmatched_ends = true;
    config.allow_dangling_amp = true;

    let mut writer = MarkdownWriter::new(resolve);
    let mut skip: Option<(String, usize)> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let tag = local_tag(e.name().as_ref());
                if let Some((skipped, depth)) = skip.as_mut() {
                    if *skipped == tag {
                        *depth += 1;
                    }
                    continue;
                }
                if SKIPPED.contains(&tag.as_str()) {
                    skip = Some((tag, 1));
                    continue;
                }
                match tag.as_str() {
                    "img" | "image" => writer.image(&e, &tag),
                    "br" => writer.line_break(),
                    "hr" => writer.rule(),
                    _ => writer.start_element(&tag, &e),
                }
            }
            Event::Empty(e) => {
                if skip.is_some() {
                    continue;
                }
                let tag = local_tag(e.name().as_ref());
                match tag.as_str() {
                    "img" | "image" => writer.image(&e, &tag),
                    "br" => writer.line_break(),
                    "hr" => writer.rule(),
                    "a" => {
                        writer.start_element(&tag, &e);
                        writer.end_element(&tag);
                    }
                    _ => {}
                }
            }
            Event::End(e) => {
                let tag = local_tag(e.name().as_ref());
                if let Some((skipped, depth)) = skip.as_mut() {
                    if *skipped == tag {
                        *depth -= 1;
                        if *depth == 0 {
                            skip = None;
                        }
                    }
                    continue;
                }
                writer.end_element(&tag);
            }
            Event::Text(e) => {
                if skip.is_none() {
                    writer.text(&String::from_utf8_lossy(&e));
                }
            }
            Event::CData(e) => {
                if skip.is_none() {
                    writer.text(&String::from_utf8_lossy(&e));
                }
            }
            Event::GeneralRef(e) => {
                if skip.is_none() {
                    let decoded = decode_entity(&String::from_utf8_lossy(&e));
                    writer.text(&decoded);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(writer.finish())
}
