//! Bookpath handling.
//!
//! A bookpath is the canonical, slash separated path of a file inside the
//! epub archive, relative to the archive root, without `.`/`..` segments
//! and percent-decoded. Every other module joins on bookpaths, so hrefs
//! found in the OPF, the toc or the content documents go through
//! [`resolve`] before they are compared with anything.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Characters left untouched when an href is written back into a document.
const HREF: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/')
    .remove(b':')
    .remove(b'@')
    .remove(b'!')
    .remove(b'$')
    .remove(b'&')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b'+')
    .remove(b',')
    .remove(b';')
    .remove(b'=');

/// A reference found in a document, classified against the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference<'a> {
    /// `http://`, `https://` or `data:` uri, never resolved nor rewritten.
    External(&'a str),
    /// Points inside the same document (`#id`) or is empty.
    SameDocument,
    /// A file of the archive.
    Local {
        /// Resolved bookpath.
        bookpath: String,
        /// Query and fragment as written in the reference, `?` and `#` included.
        suffix: &'a str,
    },
}

/// Returns true for references that must never be resolved.
pub fn is_external(reference: &str) -> bool {
    let lower = reference.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("data:")
}

/// Splits `reference` into the path part and its `?query#fragment` suffix.
///
/// ```
/// use epub_splice::bookpath::split_suffix;
/// assert_eq!(("a/b.xhtml", "#c"), split_suffix("a/b.xhtml#c"));
/// assert_eq!(("b.css", "?v=1#x"), split_suffix("b.css?v=1#x"));
/// assert_eq!(("b.css", ""), split_suffix("b.css"));
/// ```
pub fn split_suffix(reference: &str) -> (&str, &str) {
    let end = reference.find(['?', '#']).unwrap_or(reference.len());
    reference.split_at(end)
}

/// Strips the fragment, returning the reference without it and the
/// fragment itself (without `#`).
pub fn split_fragment(reference: &str) -> (&str, Option<&str>) {
    match reference.split_once('#') {
        Some((path, fragment)) => (path, Some(fragment)),
        None => (reference, None),
    }
}

/// Percent-decodes `value`, replacing invalid utf-8 sequences.
pub fn decode(value: &str) -> String {
    percent_decode_str(value).decode_utf8_lossy().into_owned()
}

/// Percent-encodes a relative path so it can be written into an href.
pub fn encode_href(path: &str) -> String {
    utf8_percent_encode(path, HREF).to_string()
}

/// Directory part of a bookpath, `""` for files at the archive root.
pub fn dirname(bookpath: &str) -> &str {
    bookpath.rfind('/').map_or("", |i| &bookpath[..i])
}

/// File name part of a bookpath.
pub fn basename(bookpath: &str) -> &str {
    bookpath.rfind('/').map_or(bookpath, |i| &bookpath[i + 1..])
}

/// File name without its last extension.
pub fn file_stem(bookpath: &str) -> &str {
    let name = basename(bookpath);
    match name.rfind('.') {
        Some(0) | None => name,
        Some(i) => &name[..i],
    }
}

/// Removes empty and `.` segments and applies `..`.
///
/// `..` segments that would climb above the archive root are dropped.
pub fn normalize(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    segments.join("/")
}

/// Joins an already decoded relative path to `base_dir`.
///
/// A leading slash makes the path relative to the archive root.
pub fn join(base_dir: &str, relative: &str) -> String {
    if let Some(rooted) = relative.strip_prefix('/') {
        return normalize(rooted);
    }
    if base_dir.is_empty() {
        normalize(relative)
    } else {
        normalize(&format!("{}/{}", base_dir, relative))
    }
}

/// Resolves `reference`, as written in a document living in `base_dir`.
///
/// ```
/// use epub_splice::bookpath::{resolve, Reference};
///
/// let r = resolve("../Images/a%20b.png#frag", "OEBPS/Text");
/// assert_eq!(
///     Reference::Local { bookpath: "OEBPS/Images/a b.png".into(), suffix: "#frag" },
///     r
/// );
/// assert_eq!(Reference::External("https://x.org"), resolve("https://x.org", "OEBPS"));
/// assert_eq!(Reference::SameDocument, resolve("#note", "OEBPS"));
/// ```
pub fn resolve<'a>(reference: &'a str, base_dir: &str) -> Reference<'a> {
    if is_external(reference) {
        return Reference::External(reference);
    }
    let (path, suffix) = split_suffix(reference);
    if path.is_empty() {
        return Reference::SameDocument;
    }
    Reference::Local {
        bookpath: join(base_dir, &decode(path)),
        suffix,
    }
}

/// Shortcut for [`resolve`] returning only the bookpath of local references.
pub fn resolve_bookpath(reference: &str, base_dir: &str) -> Option<String> {
    match resolve(reference, base_dir) {
        Reference::Local { bookpath, .. } => Some(bookpath),
        _ => None,
    }
}

/// Relative path from directory `from_dir` to bookpath `target`, both
/// archive-root relative.
///
/// ```
/// use epub_splice::bookpath::relative;
/// assert_eq!("../Images/c.png", relative("OEBPS/Images/c.png", "OEBPS/Text"));
/// assert_eq!("Text/a.xhtml", relative("OEBPS/Text/a.xhtml", "OEBPS"));
/// assert_eq!("a.xhtml", relative("a.xhtml", ""));
/// ```
pub fn relative(target: &str, from_dir: &str) -> String {
    let target: Vec<&str> = target.split('/').filter(|s| !s.is_empty()).collect();
    let from: Vec<&str> = from_dir.split('/').filter(|s| !s.is_empty()).collect();

    // the last target segment is the file name, never shared with a dir
    let common = target
        .iter()
        .take(target.len().saturating_sub(1))
        .zip(from.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<&str> = vec![".."; from.len() - common];
    parts.extend_from_slice(&target[common..]);
    parts.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_drops_dots() {
        assert_eq!("a/c", normalize("a/./b/../c"));
        assert_eq!("c", normalize("../../c"));
        assert_eq!("a/b", normalize("/a//b/"));
    }

    #[test]
    fn join_with_root_dir() {
        assert_eq!("ch1.xhtml", join("", "ch1.xhtml"));
        assert_eq!("OEBPS/ch1.xhtml", join("OEBPS", "./ch1.xhtml"));
        assert_eq!("Images/x.png", join("OEBPS/Text", "/Images/x.png"));
    }

    #[test]
    fn resolve_decodes_after_stripping() {
        match resolve("My%20File.xhtml?x=1#sec%201", "OEBPS") {
            Reference::Local { bookpath, suffix } => {
                assert_eq!("OEBPS/My File.xhtml", bookpath);
                assert_eq!("?x=1#sec%201", suffix);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn data_uris_are_external() {
        assert!(is_external("data:image/png;base64,AAAA"));
        assert!(is_external("HTTP://example.com"));
        assert!(!is_external("Images/http.png"));
    }

    #[test]
    fn relative_round_trips_through_join() {
        let cases = [
            ("OEBPS/Images/vol2_c.png", "OEBPS/Text"),
            ("OEBPS/Text/vol2_a.xhtml", "OEBPS/Text"),
            ("top.css", "OEBPS/Text/deep"),
            ("OEBPS/x.xhtml", ""),
        ];
        for (target, dir) in cases {
            let rel = relative(target, dir);
            assert_eq!(target, join(dir, &rel), "{} from {}", target, dir);
        }
    }

    #[test]
    fn encode_keeps_path_separators() {
        assert_eq!("../Images/a%20b%25.png", encode_href("../Images/a b%.png"));
        assert_eq!("vol2_%E7%AB%A0.xhtml", encode_href("vol2_章.xhtml"));
    }

    #[test]
    fn stem_and_names() {
        assert_eq!("OEBPS/Text", dirname("OEBPS/Text/a.xhtml"));
        assert_eq!("", dirname("a.xhtml"));
        assert_eq!("a.xhtml", basename("OEBPS/Text/a.xhtml"));
        assert_eq!("book", file_stem("dir/book.epub"));
        assert_eq!(".hidden", file_stem(".hidden"));
    }
}
