//! Reads a source epub package.
//!
//! Locates the OPF through the container descriptor and parses its
//! version, metadata, manifest and spine. Manifest hrefs are kept as
//! written and also resolved to bookpaths, the join key used by every
//! other module.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use crate::archive::{ArchiveError, EpubArchive};
use crate::bookpath;
use crate::error::Error;
use crate::xmlutils::{self, ChildNodeRef, XMLError};

pub const MEDIA_TYPE_XHTML: &str = "application/xhtml+xml";
pub const MEDIA_TYPE_NCX: &str = "application/x-dtbncx+xml";
pub const MEDIA_TYPE_CSS: &str = "text/css";

#[derive(Debug, thiserror::Error)]
pub enum DocError {
    #[error("Archive Error: {0}")]
    ArchiveError(#[from] ArchiveError),
    #[error("XML Error: {0}")]
    XmlError(#[from] XMLError),
    #[error("I/O Error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("No OPF package document found")]
    MissingOpf,
    #[error("Invalid EPub: {0}")]
    InvalidEpub(String),
}

/// One `<item>` of the OPF manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub id: String,
    /// The href as written in the OPF.
    pub href: String,
    /// Archive-root relative path of the item.
    pub bookpath: String,
    pub media_type: String,
    pub properties: Vec<String>,
}

impl ManifestEntry {
    pub fn has_property(&self, property: &str) -> bool {
        self.properties.iter().any(|p| p == property)
    }

    /// Content documents: xhtml media-type, or an `.xhtml`/`.html` file.
    pub fn is_xhtml(&self) -> bool {
        let lower = self.bookpath.to_lowercase();
        self.media_type == MEDIA_TYPE_XHTML || lower.ends_with(".xhtml") || lower.ends_with(".html")
    }

    pub fn is_css(&self) -> bool {
        self.media_type == MEDIA_TYPE_CSS || self.bookpath.to_lowercase().ends_with(".css")
    }

    pub fn is_ncx(&self) -> bool {
        self.media_type == MEDIA_TYPE_NCX
    }

    pub fn is_nav(&self) -> bool {
        self.has_property("nav")
    }
}

/// One `<itemref>` of the OPF spine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpineEntry {
    pub idref: String,
    pub linear: Option<String>,
    pub properties: Option<String>,
}

/// Struct to access a source epub package
pub struct SourcePackage<R: Read + Seek> {
    /// the zip archive
    archive: EpubArchive<R>,

    /// OPF full path
    pub opf_path: String,

    /// OPF directory, `""` when the OPF lives at the archive root
    pub opf_dir: String,

    /// `version` attribute of the package, `"3.0"` if missing
    pub version: String,

    /// `unique-identifier` attribute of the package
    pub unique_identifier: Option<String>,

    /// The `<metadata>` element, kept to regenerate it verbatim
    pub metadata: Option<ChildNodeRef>,

    /// manifest items in document order
    pub manifest: Vec<ManifestEntry>,

    /// spine items in reading order
    pub spine: Vec<SpineEntry>,

    /// `toc` attribute of the spine, the NCX id
    pub toc_id: Option<String>,

    /// bookpaths of every manifest item
    pub bookpaths: BTreeSet<String>,
}

impl SourcePackage<BufReader<File>> {
    /// Opens the epub file in `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive is broken, if the file doesn't
    /// exists, or if no OPF can be found or parsed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DocError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut doc = Self::from_reader(BufReader::new(file))?;
        doc.archive.path = path.to_path_buf();
        Ok(doc)
    }
}

impl<R: Read + Seek> SourcePackage<R> {
    /// Opens the epub contained in `reader`.
    ///
    /// # Errors
    ///
    /// Returns an error if the epub is broken.
    pub fn from_reader(reader: R) -> Result<Self, DocError> {
        let mut archive = EpubArchive::from_reader(reader)?;
        let opf_path = locate_opf(&mut archive)?;
        let opf_dir = bookpath::dirname(&opf_path).to_string();

        let mut doc = Self {
            archive,
            opf_path,
            opf_dir,
            version: String::from("3.0"),
            unique_identifier: None,
            metadata: None,
            manifest: vec![],
            spine: vec![],
            toc_id: None,
            bookpaths: BTreeSet::new(),
        };
        doc.fill_package()?;
        Ok(doc)
    }

    /// Path the package was opened from, empty for readers.
    pub fn path(&self) -> &Path {
        &self.archive.path
    }

    /// Every entry of the archive, in archive order.
    pub fn files(&self) -> &[String] {
        &self.archive.files
    }

    /// Returns the manifest item with this id.
    pub fn item(&self, id: &str) -> Option<&ManifestEntry> {
        self.manifest.iter().find(|i| i.id == id)
    }

    /// Returns the manifest item stored at this bookpath.
    pub fn item_by_bookpath(&self, bookpath: &str) -> Option<&ManifestEntry> {
        self.manifest.iter().find(|i| i.bookpath == bookpath)
    }

    /// The EPUB3 navigation document item.
    pub fn nav_item(&self) -> Option<&ManifestEntry> {
        self.manifest.iter().find(|i| i.is_nav())
    }

    /// The EPUB2 NCX item named by the spine `toc` attribute.
    pub fn ncx_item(&self) -> Option<&ManifestEntry> {
        self.toc_id.as_deref().and_then(|id| self.item(id))
    }

    /// Content documents referenced by the spine, in reading order, each
    /// listed once.
    pub fn spine_documents(&self) -> Vec<(&SpineEntry, &ManifestEntry)> {
        let mut seen = BTreeSet::new();
        self.spine
            .iter()
            .filter_map(|s| self.item(&s.idref).map(|i| (s, i)))
            .filter(|(_, i)| i.is_xhtml() && seen.insert(i.bookpath.as_str()))
            .collect()
    }

    /// First non empty `dc:title` of the metadata.
    pub fn title(&self) -> Option<String> {
        let metadata = self.metadata.as_ref()?;
        let metadata = metadata.borrow();
        let title = metadata
            .children_named("title")
            .map(|t| t.borrow().inner_text.trim().to_string())
            .find(|t| !t.is_empty());
        title
    }

    /// Returns the content of the file at `bookpath`.
    ///
    /// # Errors
    ///
    /// Returns an error if the path doesn't exist in the archive.
    pub fn read(&mut self, bookpath: &str) -> Result<Vec<u8>, ArchiveError> {
        self.archive.get_entry(bookpath)
    }

    /// Returns the content of the file at `bookpath` as String.
    ///
    /// # Errors
    ///
    /// Returns an error if the path doesn't exist in the archive or if
    /// it's not utf-8.
    pub fn read_str(&mut self, bookpath: &str) -> Result<String, ArchiveError> {
        self.archive.get_entry_as_str(bookpath)
    }

    fn fill_package(&mut self) -> Result<(), DocError> {
        let content = self.archive.get_entry(&self.opf_path)?;
        let root = xmlutils::XMLReader::parse(content.as_slice())?;
        let root = root.borrow();
        if !root.is("package") {
            return Err(DocError::InvalidEpub(format!(
                "root element of {} is <{}>",
                self.opf_path, root.name.local_name
            )));
        }

        if let Some(version) = root.get_attr("version") {
            self.version = version.trim().to_string();
        }
        self.unique_identifier = root.get_attr("unique-identifier");
        self.metadata = root.children_named("metadata").next().cloned();

        let manifest = root
            .children_named("manifest")
            .next()
            .ok_or_else(|| DocError::InvalidEpub("OPF without manifest".into()))?;
        for r in manifest.borrow().children_named("item") {
            let item = r.borrow();
            let _ = self.insert_resource(&item);
        }

        let spine = root
            .children_named("spine")
            .next()
            .ok_or_else(|| DocError::InvalidEpub("OPF without spine".into()))?;
        let spine = spine.borrow();
        self.toc_id = spine.get_attr("toc").filter(|t| !t.is_empty());
        for r in spine.children_named("itemref") {
            let item = r.borrow();
            let _ = self.insert_spine(&item);
        }

        Ok(())
    }

    fn insert_resource(&mut self, item: &xmlutils::XMLNode) -> Result<(), XMLError> {
        let id = item
            .get_attr("id")
            .filter(|id| !id.is_empty())
            .ok_or_else(|| XMLError::AttrNotFound("id".into()))?;
        let href = item
            .get_attr("href")
            .filter(|href| !href.is_empty())
            .ok_or_else(|| XMLError::AttrNotFound("href".into()))?;
        if self.item(&id).is_some() {
            return Ok(());
        }

        let (path, _) = bookpath::split_suffix(&href);
        let bookpath = bookpath::join(&self.opf_dir, &bookpath::decode(path));
        let properties = item
            .get_attr("properties")
            .map(|p| p.split_whitespace().map(String::from).collect())
            .unwrap_or_default();

        self.bookpaths.insert(bookpath.clone());
        self.manifest.push(ManifestEntry {
            id,
            href,
            bookpath,
            media_type: item.get_attr("media-type").unwrap_or_default(),
            properties,
        });
        Ok(())
    }

    fn insert_spine(&mut self, item: &xmlutils::XMLNode) -> Result<(), XMLError> {
        let idref = item
            .get_attr("idref")
            .filter(|id| !id.is_empty())
            .ok_or_else(|| XMLError::AttrNotFound("idref".into()))?;
        self.spine.push(SpineEntry {
            idref,
            linear: item.get_attr("linear").filter(|l| !l.is_empty()),
            properties: item.get_attr("properties").filter(|p| !p.is_empty()),
        });
        Ok(())
    }
}

/// Opens an input file of the merge, split or inspection pipelines.
///
/// A missing file or one that is not a zip archive is a validation error,
/// any other problem a format error.
///
/// # Errors
///
/// Returns an error if the file can't be opened as a package.
pub fn open_input(path: &Path) -> crate::Result<SourcePackage<BufReader<File>>> {
    if !path.is_file() {
        return Err(Error::Validation(format!("file not found: {}", path.display())));
    }
    SourcePackage::open(path).map_err(|e| match e {
        DocError::ArchiveError(ArchiveError::Zip(z)) => Error::Validation(format!(
            "{} is not a valid epub archive: {}",
            path.display(),
            z
        )),
        e => Error::Format(e),
    })
}

/// Finds the OPF path: the container descriptor's rootfile when it points
/// to an existing entry, otherwise the first `.opf` entry of the archive.
pub(crate) fn locate_opf<R: Read + Seek>(archive: &mut EpubArchive<R>) -> Result<String, DocError> {
    if let Ok(container) = archive.get_container_file() {
        if let Ok(root_file) = get_root_file(&container) {
            if archive.contains(&root_file) {
                return Ok(root_file);
            }
        }
    }

    archive
        .files
        .iter()
        .find(|f| f.to_lowercase().ends_with(".opf"))
        .cloned()
        .ok_or(DocError::MissingOpf)
}

fn get_root_file(container: &[u8]) -> Result<String, DocError> {
    let root = xmlutils::XMLReader::parse(container)?;
    let el = root.borrow();
    let element = el
        .find("rootfile")
        .ok_or_else(|| XMLError::ElementNotFound("rootfile".into()))?;
    let el2 = element.borrow();

    let attr = el2
        .get_attr("full-path")
        .ok_or_else(|| XMLError::AttrNotFound("full-path".into()))?;

    Ok(attr)
}
