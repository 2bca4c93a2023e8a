//! Link-level wikitext scanning.
//!
//! This is not a wikitext parser. It finds `[[...]]` constructs that render
//! as links in body text and records their byte spans, skipping transclusions,
//! references, comments and other regions whose links never reach the page
//! body as editable links.

use std::ops::Range;

use tracing::debug;

use crate::registry::{Occurrence, Span};

const IGNORED_ELEMENTS: &[&str] = &[
    "ref",
    "nowiki",
    "pre",
    "math",
    "syntaxhighlight",
    "source",
    "gallery",
];

const NON_BODY_PREFIXES: &[&str] = &["File", "Image", "Media", "Category"];

/// One `[[...]]` construct found in body text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConstruct<'a> {
    pub span: Span,
    pub raw: &'a str,
    pub leading_colon: bool,
    /// Target as written, without the leading colon and surrounding whitespace.
    pub target_text: &'a str,
    /// Normalized title, fragment removed.
    pub target_title: String,
    pub display: Option<&'a str>,
}

impl LinkConstruct<'_> {
    pub fn surface_text(&self) -> &str {
        self.display.unwrap_or(self.target_text)
    }

    pub fn is_piped(&self) -> bool {
        self.display.is_some()
    }
}

/// Extract every link whose normalized target satisfies `is_dab`, numbering
/// them from 0 in document order.
pub fn extract_occurrences<F>(markup: &str, is_dab: F) -> Vec<Occurrence>
where
    F: Fn(&str) -> bool,
{
    scan_links(markup)
        .into_iter()
        .filter(|link| is_dab(&link.target_title))
        .enumerate()
        .map(|(index, link)| Occurrence {
            id: index,
            target_title: link.target_title.clone(),
            surface_text: link.surface_text().to_string(),
            piped: link.is_piped(),
            leading_colon: link.leading_colon,
            span: link.span,
            raw: link.raw.to_string(),
            candidates: Vec::new(),
        })
        .collect()
}

/// Every well-formed body link in document order.
pub fn scan_links(markup: &str) -> Vec<LinkConstruct<'_>> {
    let bytes = markup.as_bytes();
    let mut out = Vec::new();
    let mut cursor = 0usize;

    while cursor < bytes.len() {
        if bytes[cursor..].starts_with(b"<!--") {
            cursor = find_from(bytes, cursor + 4, b"-->")
                .map(|end| end + 3)
                .unwrap_or(bytes.len());
            continue;
        }
        if bytes[cursor..].starts_with(b"{{") {
            cursor = skip_transclusion(bytes, cursor);
            continue;
        }
        if bytes[cursor] == b'<'
            && let Some(name) = IGNORED_ELEMENTS
                .iter()
                .find(|name| is_tag_open(bytes, cursor, name))
        {
            cursor = skip_element(bytes, cursor, name);
            continue;
        }
        if bytes[cursor..].starts_with(b"[[") {
            match find_link_end(bytes, cursor) {
                LinkEnd::Closed(inner_end) => {
                    let span = cursor..inner_end + 2;
                    if let Some(link) = parse_link(markup, span.clone()) {
                        out.push(link);
                    } else {
                        debug!(start = span.start, "skipping malformed link");
                    }
                    cursor = span.end;
                }
                LinkEnd::Nested(nested_start) => cursor = nested_start,
                LinkEnd::Unterminated => {
                    debug!(start = cursor, "skipping unterminated link");
                    cursor += 2;
                }
            }
            continue;
        }
        cursor += 1;
    }

    out
}

/// Normalize a page title the way MediaWiki compares main-namespace titles:
/// underscores become spaces, whitespace collapses and the first letter is
/// uppercased.
pub fn normalize_title(value: &str) -> String {
    let spaced = normalize_spaces(&value.replace('_', " "));
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

enum LinkEnd {
    Closed(usize),
    Nested(usize),
    Unterminated,
}

fn find_link_end(bytes: &[u8], start: usize) -> LinkEnd {
    let mut index = start + 2;
    while index < bytes.len() {
        if bytes[index..].starts_with(b"]]") {
            return LinkEnd::Closed(index);
        }
        if bytes[index..].starts_with(b"[[") {
            return LinkEnd::Nested(index);
        }
        if bytes[index] == b'\n' {
            return LinkEnd::Unterminated;
        }
        index += 1;
    }
    LinkEnd::Unterminated
}

fn parse_link(markup: &str, span: Range<usize>) -> Option<LinkConstruct<'_>> {
    let raw = &markup[span.clone()];
    let inner = &raw[2..raw.len() - 2];
    let (target_part, display) = match inner.split_once('|') {
        Some((target, display)) => (target, Some(display)),
        None => (inner, None),
    };
    if display.is_some_and(|text| text.trim().is_empty()) {
        return None;
    }

    let mut target_text = target_part.trim();
    let mut leading_colon = false;
    if let Some(stripped) = target_text.strip_prefix(':') {
        leading_colon = true;
        target_text = stripped.trim_start();
    }
    if target_text.is_empty()
        || target_text.contains(['<', '>', '[', ']', '{', '}'])
        || is_external(target_text)
    {
        return None;
    }
    if !leading_colon && has_non_body_prefix(target_text) {
        return None;
    }

    let without_fragment = match target_text.split_once('#') {
        Some((title, _)) => title,
        None => target_text,
    };
    let target_title = normalize_title(without_fragment);
    if target_title.is_empty() {
        return None;
    }

    Some(LinkConstruct {
        span: Span {
            start: span.start,
            end: span.end,
        },
        raw,
        leading_colon,
        target_text,
        target_title,
        display,
    })
}

fn is_external(target: &str) -> bool {
    target.starts_with("http://") || target.starts_with("https://") || target.starts_with("//")
}

fn has_non_body_prefix(target: &str) -> bool {
    let Some((prefix, _)) = target.split_once(':') else {
        return false;
    };
    let prefix = prefix.trim();
    NON_BODY_PREFIXES
        .iter()
        .any(|known| known.eq_ignore_ascii_case(prefix))
}

fn skip_transclusion(bytes: &[u8], start: usize) -> usize {
    let mut depth = 0usize;
    let mut index = start;
    while index + 1 < bytes.len() {
        if bytes[index..].starts_with(b"{{") {
            depth += 1;
            index += 2;
            continue;
        }
        if bytes[index..].starts_with(b"}}") {
            depth -= 1;
            index += 2;
            if depth == 0 {
                return index;
            }
            continue;
        }
        index += 1;
    }
    bytes.len()
}

fn is_tag_open(bytes: &[u8], at: usize, name: &str) -> bool {
    let name = name.as_bytes();
    let after = at + 1 + name.len();
    if after >= bytes.len() || bytes[at] != b'<' {
        return false;
    }
    bytes[at + 1..after].eq_ignore_ascii_case(name)
        && matches!(bytes[after], b'>' | b'/' | b' ' | b'\t' | b'\n')
}

fn skip_element(bytes: &[u8], at: usize, name: &str) -> usize {
    let Some(open_end) = find_from(bytes, at, b">") else {
        return bytes.len();
    };
    if bytes[open_end - 1] == b'/' {
        return open_end + 1;
    }
    let closing = format!("</{name}");
    let Some(close_start) = find_from_ignore_case(bytes, open_end + 1, closing.as_bytes()) else {
        return bytes.len();
    };
    find_from(bytes, close_start, b">")
        .map(|end| end + 1)
        .unwrap_or(bytes.len())
}

fn find_from(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from >= bytes.len() {
        return None;
    }
    bytes[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|offset| from + offset)
}

fn find_from_ignore_case(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from >= bytes.len() {
        return None;
    }
    bytes[from..]
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle))
        .map(|offset| from + offset)
}

fn normalize_spaces(value: &str) -> String {
    let mut output = String::with_capacity(value.len());
    let mut previous_was_space = false;

    for ch in value.chars() {
        if ch.is_whitespace() {
            if !previous_was_space {
                output.push(' ');
                previous_was_space = true;
            }
        } else {
            output.push(ch);
            previous_was_space = false;
        }
    }

    output.trim().to_string()
}
