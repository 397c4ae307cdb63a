//! Cursor → page selector mapping.
//!
//! Both scanners are tolerant: unbalanced input still yields the best
//! enclosing rule or element instead of an error.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use rustc_hash::FxHashMap;

// ============================================================================
// CSS
// ============================================================================

struct OpenBlock {
    prelude: Range<usize>,
}

/// Selector of the innermost style rule containing `offset`.
///
/// At-rule blocks (`@media`, `@supports`) are transparent: a rule inside
/// them is found, the at-rule itself never is. Selector lists come back
/// comma-joined with whitespace collapsed.
pub fn selector_at(css: &str, offset: usize) -> Option<String> {
    let bytes = css.as_bytes();
    let mut stack: Vec<OpenBlock> = Vec::new();
    let mut prelude_start = 0;
    let mut best: Option<(Range<usize>, Range<usize>)> = None;

    let mut consider = |prelude: Range<usize>, end: usize| {
        let text = &css[prelude.clone()];
        let trimmed = text.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('@') {
            return;
        }
        let start = prelude.start + (text.len() - trimmed.len());
        let span = start..end;
        if !span.contains(&offset) {
            return;
        }
        if best.as_ref().is_none_or(|(b, _)| span.len() < b.len()) {
            best = Some((span, prelude));
        }
    };

    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let end = css[i + 2..].find("*/").map_or(bytes.len(), |p| i + 2 + p + 2);
                // Leading comments are not part of the selector
                if css[prelude_start..i].trim().is_empty() {
                    prelude_start = end;
                }
                i = end;
                continue;
            }
            quote @ (b'"' | b'\'') => {
                i = skip_string(bytes, i, quote);
                continue;
            }
            b'{' => {
                stack.push(OpenBlock {
                    prelude: prelude_start..i,
                });
                prelude_start = i + 1;
            }
            b'}' => {
                if let Some(open) = stack.pop() {
                    consider(open.prelude, i + 1);
                }
                prelude_start = i + 1;
            }
            b';' => prelude_start = i + 1,
            _ => {}
        }
        i += 1;
    }
    // Unterminated blocks run to the end of the text
    while let Some(open) = stack.pop() {
        consider(open.prelude, bytes.len() + 1);
    }

    let (_, prelude) = best?;
    let selector = css[prelude]
        .split(',')
        .map(|part| part.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(",");
    (!selector.is_empty()).then_some(selector)
}

fn skip_string(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b if b == quote => return i + 1,
            b'\n' => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

// ============================================================================
// HTML
// ============================================================================

/// Innermost element under the cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHit {
    /// Path selector, e.g. `#main > p:nth-of-type(2)`
    pub selector: String,
    /// Byte range from the start tag to the end of the end tag
    pub range: Range<usize>,
}

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Elements whose content is raw text, never markup.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

static TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<!--.*?-->|<(/?)([A-Za-z][A-Za-z0-9-]*)((?:[^>"']|"[^"]*"|'[^']*')*)>"#)
        .unwrap()
});

static ID_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:^|\s)id\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#).unwrap()
});

static CSS_IDENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$").unwrap());

struct OpenElement {
    tag: String,
    start: usize,
    path: Vec<String>,
    child_counts: FxHashMap<String, usize>,
}

/// Element whose markup contains `offset`, with a selector the page can
/// resolve.
pub fn element_at(html: &str, offset: usize) -> Option<ElementHit> {
    let mut stack: Vec<OpenElement> = Vec::new();
    let mut top_counts: FxHashMap<String, usize> = FxHashMap::default();
    let mut best: Option<ElementHit> = None;

    let mut consider = |path: &[String], range: Range<usize>| {
        if !range.contains(&offset) {
            return;
        }
        if best.as_ref().is_none_or(|b| range.len() < b.range.len()) {
            best = Some(ElementHit {
                selector: path.join(" > "),
                range,
            });
        }
    };

    let mut pos = 0;
    while let Some(caps) = TAG.captures_at(html, pos) {
        let whole = caps.get(0)?;
        pos = whole.end();
        let Some(name) = caps.get(2) else {
            continue; // comment
        };
        let tag = name.as_str().to_ascii_lowercase();
        let closing = !caps[1].is_empty();

        if closing {
            // Pop to the matching start tag; stray end tags are ignored
            let Some(depth) = stack.iter().rposition(|open| open.tag == tag) else {
                continue;
            };
            while stack.len() > depth {
                let Some(open) = stack.pop() else { break };
                consider(&open.path, open.start..whole.end());
            }
            continue;
        }

        let attrs = caps.get(3).map_or("", |m| m.as_str());
        let counts = match stack.last_mut() {
            Some(parent) => &mut parent.child_counts,
            None => &mut top_counts,
        };
        let nth = counts.entry(tag.clone()).or_insert(0);
        *nth += 1;
        let nth = *nth;

        let mut path = stack.last().map(|p| p.path.clone()).unwrap_or_default();
        match element_id(attrs) {
            Some(id) => path = vec![format!("#{id}")],
            None if matches!(tag.as_str(), "html" | "head" | "body") => path.push(tag.clone()),
            None => path.push(format!("{tag}:nth-of-type({nth})")),
        }

        if VOID_ELEMENTS.contains(&tag.as_str()) || attrs.trim_end().ends_with('/') {
            consider(&path, whole.start()..whole.end());
            continue;
        }

        if RAW_TEXT_ELEMENTS.contains(&tag.as_str()) {
            let end = find_end_tag(html, whole.end(), &tag);
            consider(&path, whole.start()..end);
            pos = end;
            continue;
        }

        stack.push(OpenElement {
            tag,
            start: whole.start(),
            path,
            child_counts: FxHashMap::default(),
        });
    }

    // Unclosed elements run to the end of the text
    while let Some(open) = stack.pop() {
        consider(&open.path, open.start..html.len() + 1);
    }
    best
}

fn element_id(attrs: &str) -> Option<String> {
    let caps = ID_ATTR.captures(attrs)?;
    let id = caps.get(1).or(caps.get(2)).or(caps.get(3))?.as_str();
    CSS_IDENT.is_match(id).then(|| id.to_string())
}

/// End offset of `</tag>` at or after `from`, or the end of the text.
fn find_end_tag(html: &str, from: usize, tag: &str) -> usize {
    let needle = format!("</{tag}");
    let lower = html[from..].to_ascii_lowercase();
    match lower.find(&needle) {
        Some(rel) => {
            let close_start = from + rel;
            html[close_start..]
                .find('>')
                .map_or(html.len(), |gt| close_start + gt + 1)
        }
        None => html.len(),
    }
}
