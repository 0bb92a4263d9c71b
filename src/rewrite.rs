//! Reference scanning and rewriting.
//!
//! References are found with regular expressions rather than a markup
//! parser: quoted `href`/`src` attribute values in content documents and
//! `url(...)` tokens in stylesheets. That way partial or malformed markup
//! is handled exactly like well-formed markup, and every byte that isn't a
//! rewritten reference is left untouched.

use std::borrow::Cow;

use lazy_static::lazy_static;
use regex::{Captures, Regex};

use crate::bookpath::{self, Reference};
use crate::conflict::RenameMap;
use crate::sink::LogSink;

lazy_static! {
    /// `href="..."` or `src='...'`, the value in group 2 or 3 depending on the quote.
    static ref ATTR_RE: Regex =
        Regex::new(r#"(href|src)\s*=\s*(?:"([^"\n]*)"|'([^'\n]*)')"#).unwrap();
    /// `url(...)`, quoted value in group 1 or 2, bare value in group 3.
    static ref URL_RE: Regex =
        Regex::new(r#"url\((?:"([^")]*)"|'([^')]*)'|([^)]*))\)"#).unwrap();
}

/// Returns the new href for `value` if it points to a renamed bookpath.
fn retarget(value: &str, dir: &str, renames: &RenameMap) -> Option<String> {
    match bookpath::resolve(value, dir) {
        Reference::Local { bookpath, suffix } => renames.get(&bookpath).map(|renamed| {
            format!(
                "{}{}",
                bookpath::encode_href(&bookpath::relative(renamed, dir)),
                suffix
            )
        }),
        _ => None,
    }
}

fn decode_text<'a>(content: &'a [u8], bookpath: &str, sink: &dyn LogSink) -> Option<&'a str> {
    match std::str::from_utf8(content) {
        Ok(text) => Some(text),
        Err(e) => {
            sink.warn(format_args!("{} is not utf-8 ({}), copied unchanged", bookpath, e));
            None
        }
    }
}

fn into_bytes<'a>(original: &'a [u8], replaced: Cow<'_, str>, changed: bool) -> Cow<'a, [u8]> {
    match replaced {
        Cow::Owned(text) if changed => Cow::Owned(text.into_bytes()),
        _ => Cow::Borrowed(original),
    }
}

/// Rewrites the `href`/`src` values of a content document stored at
/// `doc_bookpath` that point to a renamed bookpath.
///
/// The new value is relative to the document's directory, percent-encoded,
/// and keeps the original query and fragment. Everything else stays
/// byte-identical, and a document that is not utf-8 is returned unchanged.
pub fn rewrite_content<'a>(
    content: &'a [u8],
    doc_bookpath: &str,
    renames: &RenameMap,
    sink: &dyn LogSink,
) -> Cow<'a, [u8]> {
    if renames.is_empty() {
        return Cow::Borrowed(content);
    }
    let Some(text) = decode_text(content, doc_bookpath, sink) else {
        return Cow::Borrowed(content);
    };
    let dir = bookpath::dirname(doc_bookpath);

    let mut changed = false;
    let replaced = ATTR_RE.replace_all(text, |caps: &Captures| {
        let (value, quote) = match (caps.get(2), caps.get(3)) {
            (Some(v), _) => (v.as_str(), '"'),
            (None, Some(v)) => (v.as_str(), '\''),
            (None, None) => return caps[0].to_string(),
        };
        match retarget(value, dir, renames) {
            Some(href) => {
                changed = true;
                format!("{}={}{}{}", &caps[1], quote, href, quote)
            }
            None => caps[0].to_string(),
        }
    });
    into_bytes(content, replaced, changed)
}

/// Rewrites the `url(...)` tokens of a stylesheet stored at `css_bookpath`
/// that point to a renamed bookpath. `data:` uris are never touched.
pub fn rewrite_stylesheet<'a>(
    content: &'a [u8],
    css_bookpath: &str,
    renames: &RenameMap,
    sink: &dyn LogSink,
) -> Cow<'a, [u8]> {
    if renames.is_empty() {
        return Cow::Borrowed(content);
    }
    let Some(text) = decode_text(content, css_bookpath, sink) else {
        return Cow::Borrowed(content);
    };
    let dir = bookpath::dirname(css_bookpath);

    let mut changed = false;
    let replaced = URL_RE.replace_all(text, |caps: &Captures| {
        let (value, quote) = match (caps.get(1), caps.get(2), caps.get(3)) {
            (Some(v), _, _) => (v.as_str(), "\""),
            (None, Some(v), _) => (v.as_str(), "'"),
            (None, None, Some(v)) => (v.as_str(), ""),
            _ => return caps[0].to_string(),
        };
        match retarget(value, dir, renames) {
            Some(href) => {
                changed = true;
                format!("url({}{}{})", quote, href, quote)
            }
            None => caps[0].to_string(),
        }
    });
    into_bytes(content, replaced, changed)
}

/// Bookpaths referenced by the `href`/`src` attributes of a content
/// document living in `dir`. External and same-document links are skipped.
pub fn content_references(text: &str, dir: &str) -> Vec<String> {
    ATTR_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(2).or_else(|| caps.get(3)))
        .filter_map(|value| bookpath::resolve_bookpath(value.as_str(), dir))
        .collect()
}

/// Bookpaths referenced by the `url(...)` tokens of a stylesheet living in
/// `dir`.
pub fn stylesheet_references(text: &str, dir: &str) -> Vec<String> {
    URL_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)))
        .filter_map(|value| bookpath::resolve_bookpath(value.as_str(), dir))
        .collect()
}
