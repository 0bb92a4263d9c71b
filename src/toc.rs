//! Table of contents resolution.
//!
//! The toc is read from the EPUB3 navigation document when there is one,
//! from the NCX named by the spine otherwise, and as a last resort built
//! from the spine itself, one level 1 entry per content document.

use std::io::{Read, Seek};

use serde::Serialize;

use crate::bookpath;
use crate::doc::{DocError, ManifestEntry, SourcePackage};
use crate::sink::LogSink;
use crate::xmlutils::{ChildNodeRef, XMLError, XMLNode, XMLReader};

/// Entry of a flattened table of contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TocEntry {
    pub title: String,
    /// Nesting depth, 1 for top level entries.
    pub level: usize,
    /// Bookpath of the target, empty for headings without a target.
    pub href: String,
    /// Fragment of the original link, without `#`.
    #[serde(skip)]
    pub fragment: Option<String>,
}

impl TocEntry {
    pub fn new(title: impl Into<String>, level: usize, href: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            level,
            href: href.into(),
            fragment: None,
        }
    }

    /// Builds an entry from a link found in a toc document living in `dir`.
    ///
    /// Returns [`None`] when there's neither a title nor a target.
    fn from_link(title: &str, link: Option<&str>, level: usize, dir: &str) -> Option<Self> {
        let (href, fragment) = match link.map(str::trim).filter(|l| !l.is_empty()) {
            None => (String::new(), None),
            Some(link) if bookpath::is_external(link) => (link.to_string(), None),
            Some(link) => {
                let (path, fragment) = bookpath::split_fragment(link);
                let (path, _) = bookpath::split_suffix(path);
                let href = if path.is_empty() {
                    String::new()
                } else {
                    bookpath::join(dir, &bookpath::decode(path))
                };
                (href, fragment.filter(|f| !f.is_empty()).map(String::from))
            }
        };

        let title = match title.trim() {
            "" => bookpath::basename(&href).to_string(),
            t => t.to_string(),
        };
        if title.is_empty() {
            return None;
        }

        Some(Self {
            title,
            level,
            href,
            fragment,
        })
    }
}

/// Where a [`Toc`] was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TocSource {
    /// EPUB3 navigation document at this bookpath.
    Nav(String),
    /// EPUB2 NCX at this bookpath.
    Ncx(String),
    /// Built from the spine.
    Spine,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toc {
    pub source: TocSource,
    pub entries: Vec<TocEntry>,
}

/// Reads the table of contents of `package`.
///
/// A nav or NCX listed in the manifest but missing from the archive is
/// skipped with a warning; one that is present but malformed is an error.
pub fn resolve_toc<R: Read + Seek>(
    package: &mut SourcePackage<R>,
    sink: &dyn LogSink,
) -> Result<Toc, DocError> {
    if let Some(nav) = package.nav_item().cloned() {
        if let Some(content) = read_toc_document(package, &nav, sink) {
            let entries = parse_nav(&content, bookpath::dirname(&nav.bookpath))?;
            if !entries.is_empty() {
                sink.debug(format_args!("toc read from nav {}", nav.bookpath));
                return Ok(Toc {
                    source: TocSource::Nav(nav.bookpath),
                    entries,
                });
            }
        }
    }

    if let Some(ncx) = package.ncx_item().cloned() {
        if let Some(content) = read_toc_document(package, &ncx, sink) {
            let entries = parse_ncx(&content, bookpath::dirname(&ncx.bookpath))?;
            if !entries.is_empty() {
                sink.debug(format_args!("toc read from ncx {}", ncx.bookpath));
                return Ok(Toc {
                    source: TocSource::Ncx(ncx.bookpath),
                    entries,
                });
            }
        }
    }

    sink.debug(format_args!("no usable nav or ncx, using the spine as toc"));
    Ok(Toc {
        source: TocSource::Spine,
        entries: spine_entries(package),
    })
}

fn read_toc_document<R: Read + Seek>(
    package: &mut SourcePackage<R>,
    item: &ManifestEntry,
    sink: &dyn LogSink,
) -> Option<Vec<u8>> {
    match package.read(&item.bookpath) {
        Ok(content) => Some(content),
        Err(e) => {
            sink.warn(format_args!("toc document {} unreadable: {}", item.bookpath, e));
            None
        }
    }
}

/// One level 1 entry per spine content document, titled by file name.
pub fn spine_entries<R: Read + Seek>(package: &SourcePackage<R>) -> Vec<TocEntry> {
    package
        .spine_documents()
        .into_iter()
        .map(|(_, item)| TocEntry::new(bookpath::basename(&item.bookpath), 1, item.bookpath.clone()))
        .collect()
}

/// Parses the `<nav epub:type="toc">` list of a navigation document.
pub fn parse_nav(content: &[u8], nav_dir: &str) -> Result<Vec<TocEntry>, XMLError> {
    let root = XMLReader::parse(content)?;
    let mut entries = vec![];

    let nav = find_toc_nav(&root.borrow());
    if let Some(nav) = nav {
        for ol in nav.borrow().children_named("ol") {
            walk_nav_list(&ol.borrow(), 1, nav_dir, &mut entries);
        }
    }
    Ok(entries)
}

fn find_toc_nav(parent: &XMLNode) -> Option<ChildNodeRef> {
    for child in &parent.children {
        let node = child.borrow();
        if node.is("nav")
            && node
                .get_attr("type")
                .is_some_and(|t| t.split_whitespace().any(|t| t == "toc"))
        {
            return Some(child.clone());
        }
        if let Some(found) = find_toc_nav(&node) {
            return Some(found);
        }
    }
    None
}

fn walk_nav_list(ol: &XMLNode, level: usize, dir: &str, entries: &mut Vec<TocEntry>) {
    for li in ol.children_named("li") {
        for child in &li.borrow().children {
            let node = child.borrow();
            match node.name.local_name.as_str() {
                "a" => {
                    let href = node.get_attr("href");
                    entries.extend(TocEntry::from_link(&node.inner_text, href.as_deref(), level, dir));
                }
                "span" => {
                    entries.extend(TocEntry::from_link(&node.inner_text, None, level, dir));
                }
                "ol" => walk_nav_list(&node, level + 1, dir, entries),
                _ => {}
            }
        }
    }
}

/// Parses the `navMap` of an NCX document.
pub fn parse_ncx(content: &[u8], ncx_dir: &str) -> Result<Vec<TocEntry>, XMLError> {
    let root = XMLReader::parse(content)?;
    let mut entries = vec![];

    let navmap = root.borrow().find("navMap");
    if let Some(navmap) = navmap {
        walk_navpoints(&navmap.borrow(), 1, ncx_dir, &mut entries);
    }
    Ok(entries)
}

/// Recursively extract all navpoints from a node.
fn walk_navpoints(parent: &XMLNode, level: usize, dir: &str, entries: &mut Vec<TocEntry>) {
    for nav in parent.children_named("navPoint") {
        let item = nav.borrow();
        let label = item
            .children_named("navLabel")
            .next()
            .and_then(|l| l.borrow().children_named("text").next().map(|t| t.borrow().inner_text.clone()))
            .unwrap_or_default();
        let src = item
            .children_named("content")
            .next()
            .and_then(|c| c.borrow().get_attr("src"));

        entries.extend(TocEntry::from_link(&label, src.as_deref(), level, dir));
        walk_navpoints(&item, level + 1, dir, entries);
    }
}

/// A toc entry with the entries nested below it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocNode {
    pub entry: TocEntry,
    pub children: Vec<TocNode>,
}

/// Rebuilds the tree of a flattened toc.
///
/// Each entry becomes a child of the closest previous entry with a lower
/// level, so level jumps (1 → 3) nest one step at a time.
pub fn nest(entries: &[TocEntry]) -> Vec<TocNode> {
    let mut roots = vec![];
    for entry in entries {
        insert_node(&mut roots, entry.clone());
    }
    roots
}

fn insert_node(siblings: &mut Vec<TocNode>, entry: TocEntry) {
    match siblings.last_mut() {
        Some(last) if last.entry.level < entry.level => insert_node(&mut last.children, entry),
        _ => siblings.push(TocNode {
            entry,
            children: vec![],
        }),
    }
}

/// Depth of the deepest node, 0 for an empty forest.
pub fn depth(nodes: &[TocNode]) -> usize {
    nodes.iter().map(|n| 1 + depth(&n.children)).max().unwrap_or(0)
}
