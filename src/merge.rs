//! Merges several epub packages into one.
//!
//! Every source is opened and parsed before anything is written. Bookpaths
//! shared by several sources are renamed in the later ones, references to
//! renamed files are rewritten, and a new OPF and toc are generated for the
//! concatenated spines.

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};

use crate::bookpath;
use crate::compose::{self, IdAllocator, ManifestItem, OutputPackage, PackageDocument, SpineItem};
use crate::conflict::{self, RenameMap};
use crate::doc::{self, SourcePackage};
use crate::error::{Error, Result};
use crate::rewrite;
use crate::sink::LogSink;
use crate::toc::{self, TocEntry, TocNode};
use crate::writer;

pub const MERGED_OPF_PATH: &str = "OEBPS/content.opf";
pub const MERGED_NAV_NAME: &str = "nav.xhtml";
pub const MERGED_NCX_NAME: &str = "toc.ncx";
pub const MERGED_NAV_ID: &str = "merged-nav";
pub const MERGED_NCX_ID: &str = "merged-ncx";
const MERGED_UID: &str = "merged-id";

#[derive(Debug, Clone)]
pub struct MergeOptions {
    /// Directory the merged file is written to, created if needed.
    pub output_dir: PathBuf,
}

/// Merges the epub files in `inputs`, in that order, and returns the path
/// of the merged file, `merged_{first input stem}.epub`.
///
/// # Errors
///
/// Fails without writing anything when there are fewer than two inputs,
/// when an input is missing or isn't an epub, or when a package can't be
/// understood.
pub fn merge<P: AsRef<Path>>(
    inputs: &[P],
    options: &MergeOptions,
    sink: &dyn LogSink,
) -> Result<PathBuf> {
    if inputs.len() < 2 {
        return Err(Error::Validation(format!(
            "merging needs at least 2 files, got {}",
            inputs.len()
        )));
    }

    let mut sources = Vec::with_capacity(inputs.len());
    let mut titles = Vec::with_capacity(inputs.len());
    for input in inputs {
        let path = input.as_ref();
        sink.info(format_args!("reading {}", path.display()));
        sources.push(doc::open_input(path)?);
        titles.push(input_stem(path));
    }

    let package = merge_packages(&mut sources, &titles, sink)?;
    drop(sources);

    let output = options
        .output_dir
        .join(format!("merged_{}.epub", titles[0]));
    fs::create_dir_all(&options.output_dir)?;
    writer::save(&package, &output, sink)?;
    sink.info(format_args!("merged {} files into {}", inputs.len(), output.display()));
    Ok(output)
}

pub(crate) fn input_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| String::from("book"))
}

/// Output version: the shared one, `3.0` when sources disagree.
pub fn merged_version<'a, I: IntoIterator<Item = &'a str>>(versions: I) -> String {
    let mut versions = versions.into_iter();
    let Some(first) = versions.next() else {
        return String::from("3.0");
    };
    if versions.all(|v| v == first) {
        first.to_string()
    } else {
        String::from("3.0")
    }
}

/// Builds the merged package of `sources` in memory.
///
/// `titles` holds the heading of each source in the merged toc.
///
/// # Errors
///
/// Returns an error if a source toc is malformed or a generated document
/// fails its checks.
pub fn merge_packages<R: Read + Seek>(
    sources: &mut [SourcePackage<R>],
    titles: &[String],
    sink: &dyn LogSink,
) -> Result<OutputPackage> {
    let mut tocs = Vec::with_capacity(sources.len());
    for source in sources.iter_mut() {
        tocs.push(toc::resolve_toc(source, sink)?);
    }

    let bookpaths: Vec<_> = sources.iter().map(|s| s.bookpaths.clone()).collect();
    let renames = conflict::detect_conflicts(&bookpaths);
    for (index, map) in renames.iter().enumerate().filter(|(_, m)| !m.is_empty()) {
        sink.info(format_args!(
            "{} conflicting files of book {} renamed with prefix vol{}_",
            map.len(),
            index + 1,
            index + 1
        ));
    }

    let version = merged_version(sources.iter().map(|s| s.version.as_str()));
    let opf_dir = bookpath::dirname(MERGED_OPF_PATH);

    let mut ids = IdAllocator::new();
    ids.reserve(MERGED_NAV_ID);
    ids.reserve(MERGED_NCX_ID);

    let mut manifest = vec![];
    let mut spine = vec![];
    let mut files = vec![];
    let mut toc_nodes = vec![];

    for (index, source) in sources.iter_mut().enumerate() {
        let volume = index + 1;
        let map = &renames[index];
        let mut id_remap: HashMap<String, String> = HashMap::new();

        for item in source.manifest.clone() {
            if item.is_ncx() || item.is_nav() {
                continue;
            }
            let content = match source.read(&item.bookpath) {
                Ok(content) => content,
                Err(e) => {
                    sink.warn(format_args!("{} skipped: {}", item.bookpath, e));
                    continue;
                }
            };
            let target = map.get(&item.bookpath).unwrap_or(&item.bookpath).clone();

            let content = if item.is_xhtml() {
                rewrite::rewrite_content(&content, &item.bookpath, map, sink).into_owned()
            } else if item.is_css() {
                rewrite::rewrite_stylesheet(&content, &item.bookpath, map, sink).into_owned()
            } else {
                content
            };

            let id = ids.allocate(&item.id, volume);
            id_remap.insert(item.id.clone(), id.clone());
            manifest.push(ManifestItem {
                id,
                href: bookpath::relative(&target, opf_dir),
                media_type: item.media_type.clone(),
                properties: compose::without_nav(&item.properties),
            });
            files.push((target, content));
        }

        for entry in &source.spine {
            match id_remap.get(&entry.idref) {
                Some(idref) => spine.push(SpineItem {
                    idref: idref.clone(),
                    linear: entry.linear.clone(),
                    properties: entry.properties.clone(),
                }),
                None => sink.debug(format_args!(
                    "spine idref {} of book {} has no content, dropped",
                    entry.idref, volume
                )),
            }
        }

        toc_nodes.push(volume_node(&titles[index], &tocs[index].entries, map));
    }

    let first = &sources[0];
    let metadata = first.metadata.as_ref().map(|m| m.borrow());
    let uid = compose::identifier_text(metadata.as_deref()).unwrap_or_else(|| MERGED_UID.into());
    let title = first.title().unwrap_or_else(|| titles[0].clone());

    let toc_doc = compose::build_toc_document(
        &version,
        &toc_nodes,
        opf_dir,
        (MERGED_NAV_ID, MERGED_NAV_NAME),
        (MERGED_NCX_ID, MERGED_NCX_NAME),
        &uid,
        &title,
    )?;
    manifest.push(toc_doc.item.clone());

    let opf = compose::build_opf(&PackageDocument {
        version: &version,
        metadata: metadata.as_deref(),
        unique_identifier: first.unique_identifier.as_deref(),
        fallback_id: MERGED_UID,
        fallback_title: "Merged EPUB",
        manifest: &manifest,
        spine: &spine,
        spine_toc: toc_doc.spine_toc.as_deref(),
    })?;

    Ok(OutputPackage {
        container: compose::build_container(MERGED_OPF_PATH)?,
        opf_path: MERGED_OPF_PATH.into(),
        opf,
        toc_path: toc_doc.bookpath,
        toc: toc_doc.content,
        files,
    })
}

/// Toc heading of one source holding its entries one level down.
fn volume_node(title: &str, entries: &[TocEntry], renames: &RenameMap) -> TocNode {
    let entries: Vec<TocEntry> = entries
        .iter()
        .map(|e| {
            let mut entry = e.clone();
            if let Some(renamed) = renames.get(&e.href) {
                entry.href = renamed.clone();
            }
            entry
        })
        .collect();
    TocNode {
        entry: TocEntry::new(title, 1, ""),
        children: toc::nest(&entries),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_versions_become_3() {
        assert_eq!("3.0", merged_version(["2.0", "3.0"]));
        assert_eq!("3.0", merged_version(["3.0", "2.0", "2.0"]));
        assert_eq!("2.0", merged_version(["2.0", "2.0"]));
        assert_eq!("3.1", merged_version(["3.1", "3.1", "3.1"]));
    }

    #[test]
    fn volume_node_applies_renames() {
        let renames: RenameMap = [("OEBPS/a.xhtml".to_string(), "OEBPS/vol2_a.xhtml".to_string())].into();
        let entries = vec![
            TocEntry::new("A", 1, "OEBPS/a.xhtml"),
            TocEntry::new("A.1", 2, "OEBPS/a.xhtml"),
            TocEntry::new("B", 1, "OEBPS/b.xhtml"),
        ];
        let node = volume_node("book2", &entries, &renames);
        assert_eq!("book2", node.entry.title);
        assert_eq!(2, node.children.len());
        assert_eq!("OEBPS/vol2_a.xhtml", node.children[0].entry.href);
        assert_eq!("OEBPS/vol2_a.xhtml", node.children[0].children[0].entry.href);
        assert_eq!("OEBPS/b.xhtml", node.children[1].entry.href);
    }
}
