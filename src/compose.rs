//! Building blocks of an output package.
//!
//! Manifest and spine items, package-unique id allocation, and the
//! generated documents: OPF, nav, NCX and container descriptor. Documents
//! are assembled as [`XMLElement`] trees and serialized through
//! [`write_document`], which refuses trees with undeclared prefixes.

use std::collections::{BTreeMap, HashSet};

use crate::bookpath;
use crate::doc::MEDIA_TYPE_NCX;
use crate::toc::{self, TocEntry, TocNode};
use crate::xmlutils::{
    self, write_document, XMLElement, XMLError, XMLNode, NS_CONTAINER, NS_DC, NS_EPUB, NS_NCX,
    NS_OPF, NS_XHTML,
};

pub const MIMETYPE: &str = "application/epub+zip";
pub const CONTAINER_PATH: &str = crate::archive::CONTAINER_PATH;
pub const OPF_MEDIA_TYPE: &str = "application/oebps-package+xml";

/// Item of a generated manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestItem {
    pub id: String,
    /// Decoded path relative to the OPF directory, encoded when written.
    pub href: String,
    pub media_type: String,
    pub properties: Vec<String>,
}

/// Itemref of a generated spine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpineItem {
    pub idref: String,
    pub linear: Option<String>,
    pub properties: Option<String>,
}

/// A package ready to be written, held in memory.
#[derive(Debug, Clone, Default)]
pub struct OutputPackage {
    pub container: String,
    pub opf_path: String,
    pub opf: String,
    pub toc_path: String,
    pub toc: String,
    /// `(bookpath, content)` of every other file, in writing order.
    pub files: Vec<(String, Vec<u8>)>,
}

/// Hands out ids that are unique within one package.
#[derive(Debug, Default)]
pub struct IdAllocator {
    used: HashSet<String>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `id` as taken, for ids of generated items.
    pub fn reserve(&mut self, id: &str) {
        self.used.insert(id.to_string());
    }

    /// Returns `id` itself when free, `vol{volume}_{id}` otherwise, and
    /// then `vol{volume}_{id}_{n}` with the first free `n`.
    pub fn allocate(&mut self, id: &str, volume: usize) -> String {
        let mut candidate = id.to_string();
        if self.used.contains(&candidate) {
            candidate = format!("vol{}_{}", volume, id);
        }
        let mut n = 1;
        while self.used.contains(&candidate) {
            candidate = format!("vol{}_{}_{}", volume, id, n);
            n += 1;
        }
        self.used.insert(candidate.clone());
        candidate
    }
}

/// Drops the `nav` token, a fresh navigation document is always generated.
pub fn without_nav(properties: &[String]) -> Vec<String> {
    properties
        .iter()
        .filter(|p| p.as_str() != "nav")
        .cloned()
        .collect()
}

/// True for versions whose toc is a navigation document.
pub fn is_epub3(version: &str) -> bool {
    version.trim_start().starts_with('3')
}

/// Text of the first `dc:identifier` of a metadata element.
pub fn identifier_text(metadata: Option<&XMLNode>) -> Option<String> {
    let metadata = metadata?;
    metadata
        .children_named("identifier")
        .map(|i| i.borrow().inner_text.trim().to_string())
        .find(|t| !t.is_empty())
}

/// Input of [`build_opf`].
#[derive(Debug, Clone)]
pub struct PackageDocument<'a> {
    pub version: &'a str,
    /// Source metadata copied into the output, [`None`] for defaults.
    pub metadata: Option<&'a XMLNode>,
    pub unique_identifier: Option<&'a str>,
    /// Identifier id used when the source one can't be kept.
    pub fallback_id: &'a str,
    pub fallback_title: &'a str,
    pub manifest: &'a [ManifestItem],
    pub spine: &'a [SpineItem],
    /// NCX id for the spine `toc` attribute.
    pub spine_toc: Option<&'a str>,
}

impl PackageDocument<'_> {
    fn metadata_element(&self) -> XMLElement {
        let mut el = XMLElement::new("metadata");
        let epub3 = is_epub3(self.version);

        match self.metadata {
            Some(node) => {
                let mut namespaces = BTreeMap::new();
                xmlutils::used_namespaces(node, &mut namespaces);
                for (prefix, uri) in namespaces.iter().filter(|(p, _)| *p != "dc" && *p != "opf") {
                    el = el.ns(prefix, uri);
                }

                let kept_uid = self.unique_identifier.filter(|uid| {
                    node.children_named("identifier")
                        .any(|i| i.borrow().get_attr("id").as_deref() == Some(*uid))
                });
                let mut has_uid = kept_uid.is_some();

                for child in &node.children {
                    let child = child.borrow();
                    let modified = child.is("meta")
                        && child.get_attr("property").as_deref() == Some("dcterms:modified");
                    if epub3 && modified {
                        continue;
                    }
                    let mut copy = XMLElement::from_node(&child);
                    if !has_uid && child.is("identifier") {
                        copy.set_attr("id", self.fallback_id);
                        has_uid = true;
                    }
                    el.push(copy);
                }
                if !has_uid {
                    el.push(
                        XMLElement::new("dc:identifier")
                            .attr("id", self.fallback_id)
                            .text(self.fallback_id),
                    );
                }
            }
            None => {
                el.push(
                    XMLElement::new("dc:identifier")
                        .attr("id", self.fallback_id)
                        .text(self.fallback_id),
                );
                el.push(XMLElement::new("dc:title").text(self.fallback_title));
                el.push(XMLElement::new("dc:language").text("en"));
            }
        }

        if epub3 {
            let now = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
            el.push(
                XMLElement::new("meta")
                    .attr("property", "dcterms:modified")
                    .text(now),
            );
        }
        el
    }

    fn unique_identifier_attr(&self) -> &str {
        match (self.metadata, self.unique_identifier) {
            (Some(node), Some(uid))
                if node
                    .children_named("identifier")
                    .any(|i| i.borrow().get_attr("id").as_deref() == Some(uid)) =>
            {
                uid
            }
            _ => self.fallback_id,
        }
    }
}

/// Serializes a package document.
pub fn build_opf(doc: &PackageDocument<'_>) -> Result<String, XMLError> {
    let mut manifest = XMLElement::new("manifest");
    for item in doc.manifest {
        let mut el = XMLElement::new("item")
            .attr("id", item.id.as_str())
            .attr("href", bookpath::encode_href(&item.href))
            .attr("media-type", item.media_type.as_str());
        if !item.properties.is_empty() {
            el.set_attr("properties", item.properties.join(" "));
        }
        manifest.push(el);
    }

    let mut spine = XMLElement::new("spine");
    if let Some(toc) = doc.spine_toc {
        spine.set_attr("toc", toc);
    }
    for item in doc.spine {
        let mut el = XMLElement::new("itemref").attr("idref", item.idref.as_str());
        if let Some(linear) = &item.linear {
            el.set_attr("linear", linear.as_str());
        }
        if let Some(properties) = &item.properties {
            el.set_attr("properties", properties.as_str());
        }
        spine.push(el);
    }

    let package = XMLElement::new("package")
        .default_ns(NS_OPF)
        .ns("dc", NS_DC)
        .ns("opf", NS_OPF)
        .attr("version", doc.version)
        .attr("unique-identifier", doc.unique_identifier_attr())
        .child(doc.metadata_element())
        .child(manifest)
        .child(spine);

    write_document(&package, &[("", NS_OPF), ("dc", NS_DC)])
}

/// Href of a toc entry as seen from a toc document living in `dir`.
fn entry_link(entry: &TocEntry, dir: &str) -> String {
    if bookpath::is_external(&entry.href) {
        return entry.href.clone();
    }
    let mut link = bookpath::encode_href(&bookpath::relative(&entry.href, dir));
    if let Some(fragment) = &entry.fragment {
        link.push('#');
        link.push_str(fragment);
    }
    link
}

fn nav_list(nodes: &[TocNode], dir: &str) -> XMLElement {
    let mut ol = XMLElement::new("ol");
    for node in nodes {
        let label = if node.entry.href.is_empty() {
            XMLElement::new("span").text(node.entry.title.as_str())
        } else {
            XMLElement::new("a")
                .attr("href", entry_link(&node.entry, dir))
                .text(node.entry.title.as_str())
        };
        let mut li = XMLElement::new("li").child(label);
        if !node.children.is_empty() {
            li.push(nav_list(&node.children, dir));
        }
        ol.push(li);
    }
    ol
}

/// Serializes an EPUB3 navigation document stored at `nav_bookpath`.
pub fn build_nav(nodes: &[TocNode], nav_bookpath: &str) -> Result<String, XMLError> {
    let dir = bookpath::dirname(nav_bookpath);
    let html = XMLElement::new("html")
        .default_ns(NS_XHTML)
        .ns("epub", NS_EPUB)
        .child(XMLElement::new("head").child(XMLElement::new("title").text("Table of Contents")))
        .child(
            XMLElement::new("body").child(
                XMLElement::new("nav")
                    .attr("epub:type", "toc")
                    .attr("id", "toc")
                    .child(XMLElement::new("h1").text("Table of Contents"))
                    .child(nav_list(nodes, dir)),
            ),
        );

    write_document(&html, &[("", NS_XHTML), ("epub", NS_EPUB)])
}

/// First entry with a target in the subtree of `node`, `node` included.
fn first_target(node: &TocNode) -> Option<&TocEntry> {
    if !node.entry.href.is_empty() {
        return Some(&node.entry);
    }
    node.children.iter().find_map(first_target)
}

fn navpoints(nodes: &[TocNode], dir: &str, counter: &mut usize) -> Vec<XMLElement> {
    let mut points = vec![];
    for node in nodes {
        // navPoints need a target: headings borrow the first one below them
        let Some(target) = first_target(node) else {
            continue;
        };
        *counter += 1;
        let mut point = XMLElement::new("navPoint")
            .attr("id", format!("navPoint-{}", counter))
            .attr("playOrder", counter.to_string())
            .child(XMLElement::new("navLabel").child(XMLElement::new("text").text(node.entry.title.as_str())))
            .child(XMLElement::new("content").attr("src", entry_link(target, dir)));
        for child in navpoints(&node.children, dir, counter) {
            point.push(child);
        }
        points.push(point);
    }
    points
}

/// Serializes an EPUB2 NCX stored at `ncx_bookpath`.
pub fn build_ncx(
    nodes: &[TocNode],
    ncx_bookpath: &str,
    uid: &str,
    title: &str,
) -> Result<String, XMLError> {
    let dir = bookpath::dirname(ncx_bookpath);
    let mut counter = 0;
    let mut navmap = XMLElement::new("navMap");
    for point in navpoints(nodes, dir, &mut counter) {
        navmap.push(point);
    }

    let meta = |name: &str, content: String| {
        XMLElement::new("meta")
            .attr("name", name)
            .attr("content", content)
    };
    let ncx = XMLElement::new("ncx")
        .default_ns(NS_NCX)
        .attr("version", "2005-1")
        .child(
            XMLElement::new("head")
                .child(meta("dtb:uid", uid.to_string()))
                .child(meta("dtb:depth", toc::depth(nodes).max(1).to_string()))
                .child(meta("dtb:totalPageCount", "0".into()))
                .child(meta("dtb:maxPageNumber", "0".into())),
        )
        .child(XMLElement::new("docTitle").child(XMLElement::new("text").text(title)))
        .child(navmap);

    write_document(&ncx, &[("", NS_NCX)])
}

/// Serializes the container descriptor pointing to `opf_path`.
pub fn build_container(opf_path: &str) -> Result<String, XMLError> {
    let container = XMLElement::new("container")
        .default_ns(NS_CONTAINER)
        .attr("version", "1.0")
        .child(
            XMLElement::new("rootfiles").child(
                XMLElement::new("rootfile")
                    .attr("full-path", opf_path)
                    .attr("media-type", OPF_MEDIA_TYPE),
            ),
        );
    write_document(&container, &[("", NS_CONTAINER)])
}

/// The generated toc document of an output package.
pub struct TocDocument {
    pub item: ManifestItem,
    pub bookpath: String,
    pub content: String,
    /// Value of the spine `toc` attribute.
    pub spine_toc: Option<String>,
}

/// Builds the nav (EPUB3) or NCX (EPUB2) for `version`, stored under
/// `opf_dir` as `nav_name` or `ncx_name`.
#[allow(clippy::too_many_arguments)]
pub fn build_toc_document(
    version: &str,
    nodes: &[TocNode],
    opf_dir: &str,
    (nav_id, nav_name): (&str, &str),
    (ncx_id, ncx_name): (&str, &str),
    uid: &str,
    title: &str,
) -> Result<TocDocument, XMLError> {
    if is_epub3(version) {
        let bookpath = bookpath::join(opf_dir, nav_name);
        Ok(TocDocument {
            content: build_nav(nodes, &bookpath)?,
            item: ManifestItem {
                id: nav_id.into(),
                href: bookpath::relative(&bookpath, opf_dir),
                media_type: crate::doc::MEDIA_TYPE_XHTML.into(),
                properties: vec!["nav".into()],
            },
            bookpath,
            spine_toc: None,
        })
    } else {
        let bookpath = bookpath::join(opf_dir, ncx_name);
        Ok(TocDocument {
            content: build_ncx(nodes, &bookpath, uid, title)?,
            item: ManifestItem {
                id: ncx_id.into(),
                href: bookpath::relative(&bookpath, opf_dir),
                media_type: MEDIA_TYPE_NCX.into(),
                properties: vec![],
            },
            bookpath,
            spine_toc: Some(ncx_id.into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xmlutils::XMLReader;

    #[test]
    fn ids_get_volume_prefix_then_counter() {
        let mut ids = IdAllocator::new();
        ids.reserve("merged-nav");
        assert_eq!("ch1", ids.allocate("ch1", 1));
        assert_eq!("vol2_ch1", ids.allocate("ch1", 2));
        assert_eq!("vol2_ch1_1", ids.allocate("ch1", 2));
        assert_eq!("vol3_merged-nav", ids.allocate("merged-nav", 3));
    }

    #[test]
    fn nav_token_is_removed_only() {
        let props = vec!["nav".to_string(), "scripted".to_string(), "navigation".to_string()];
        assert_eq!(vec!["scripted".to_string(), "navigation".to_string()], without_nav(&props));
    }

    #[test]
    fn opf_keeps_metadata_and_replaces_modified() {
        let source = r#"<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="bookid">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="bookid">urn:isbn:1</dc:identifier>
    <dc:title>Title &amp; More</dc:title>
    <dc:language>fr</dc:language>
    <meta property="dcterms:modified">2001-01-01T00:00:00Z</meta>
    <meta name="cover" content="cover-img"/>
  </metadata>
</package>"#;
        let root = XMLReader::parse(source.as_bytes()).unwrap();
        let metadata = root.borrow().find("metadata").unwrap();
        let metadata = metadata.borrow();

        let manifest = vec![ManifestItem {
            id: "c1".into(),
            href: "Text/chap 1.xhtml".into(),
            media_type: "application/xhtml+xml".into(),
            properties: vec![],
        }];
        let spine = vec![SpineItem {
            idref: "c1".into(),
            linear: Some("no".into()),
            properties: None,
        }];
        let opf = build_opf(&PackageDocument {
            version: "3.0",
            metadata: Some(&*metadata),
            unique_identifier: Some("bookid"),
            fallback_id: "merged-id",
            fallback_title: "Merged",
            manifest: &manifest,
            spine: &spine,
            spine_toc: None,
        })
        .unwrap();

        assert!(opf.contains(r#"unique-identifier="bookid""#));
        assert!(opf.contains("Title &amp; More"));
        assert!(opf.contains(r#"<meta name="cover" content="cover-img""#));
        assert!(!opf.contains("2001-01-01"));
        assert!(opf.contains(r#"property="dcterms:modified""#));
        assert!(opf.contains(r#"href="Text/chap%201.xhtml""#));
        assert!(opf.contains(r#"linear="no""#));
        // parses back
        XMLReader::parse(opf.as_bytes()).unwrap();
    }

    #[test]
    fn opf_without_metadata_gets_defaults() {
        let opf = build_opf(&PackageDocument {
            version: "2.0",
            metadata: None,
            unique_identifier: None,
            fallback_id: "split-id",
            fallback_title: "Split EPUB",
            manifest: &[],
            spine: &[],
            spine_toc: Some("split-ncx"),
        })
        .unwrap();
        assert!(opf.contains(r#"unique-identifier="split-id""#));
        assert!(opf.contains("<dc:language>en</dc:language>"));
        assert!(opf.contains(r#"<spine toc="split-ncx""#));
        assert!(!opf.contains("dcterms:modified"));
    }

    #[test]
    fn ncx_headings_borrow_first_target() {
        let nodes = toc::nest(&[
            TocEntry::new("Part", 1, ""),
            TocEntry::new("One", 2, "OEBPS/Text/1.xhtml"),
            TocEntry::new("Lonely heading", 1, ""),
        ]);
        let ncx = build_ncx(&nodes, "OEBPS/toc.ncx", "uid", "Book").unwrap();
        let entries = toc::parse_ncx(ncx.as_bytes(), "OEBPS").unwrap();
        assert_eq!(
            vec![
                TocEntry::new("Part", 1, "OEBPS/Text/1.xhtml"),
                TocEntry::new("One", 2, "OEBPS/Text/1.xhtml"),
            ],
            entries
        );
        assert!(ncx.contains(r#"<meta name="dtb:depth" content="2""#));
    }

    #[test]
    fn nav_round_trips_through_the_parser() {
        let mut linked = TocEntry::new("Sec", 2, "OEBPS/Text/a b.xhtml");
        linked.fragment = Some("s1".into());
        let entries = vec![TocEntry::new("Vol", 1, ""), linked];
        let nav = build_nav(&toc::nest(&entries), "OEBPS/nav.xhtml").unwrap();
        assert!(nav.contains(r#"href="Text/a%20b.xhtml#s1""#));
        assert_eq!(entries, toc::parse_nav(nav.as_bytes(), "OEBPS").unwrap());
    }
}
