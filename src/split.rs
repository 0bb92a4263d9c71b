//! Splits an epub package into several ones at toc entries.
//!
//! A split point is an index into the flattened toc returned by
//! [`list_split_targets`]. Each point starts a segment running until the
//! next point, or the end of the spine for the last one. Segments keep the
//! original OPF location and version, so hrefs inside the copied documents
//! never change.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io::{Read, Seek};
use std::num::ParseIntError;
use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::bookpath;
use crate::compose::{self, ManifestItem, OutputPackage, PackageDocument, SpineItem};
use crate::doc::{self, ManifestEntry, SourcePackage};
use crate::error::{Error, Result};
use crate::merge::input_stem;
use crate::rewrite;
use crate::sink::LogSink;
use crate::toc::{self, TocEntry, TocSource};
use crate::writer;

pub const SPLIT_NAV_NAME: &str = "nav_split.xhtml";
pub const SPLIT_NCX_NAME: &str = "toc_split.ncx";
pub const SPLIT_NAV_ID: &str = "split-nav";
pub const SPLIT_NCX_ID: &str = "split-ncx";
const SPLIT_UID: &str = "split-id";

#[derive(Debug, Clone)]
pub struct SplitOptions {
    /// Directory the segments are written to, created if needed.
    pub output_dir: PathBuf,
    /// Toc indices starting a segment.
    pub points: Vec<usize>,
}

/// Parses a comma separated list of toc indices, like `0,3,7`.
///
/// Only the integers are checked here, ranges are checked when splitting.
///
/// ```
/// use epub_splice::split::parse_split_points;
/// assert_eq!(vec![0, 3, 7], parse_split_points("0, 3,7").unwrap());
/// assert!(parse_split_points("1,x").is_err());
/// ```
///
/// # Errors
///
/// Returns an error if a token is not a non-negative integer.
pub fn parse_split_points(points: &str) -> std::result::Result<Vec<usize>, ParseIntError> {
    points.split(',').map(|p| p.trim().parse()).collect()
}

/// File name of segment `seq` (1-based) out of `total`.
///
/// Numbers are zero padded to two digits, or more when `total` needs them.
///
/// ```
/// use epub_splice::split::segment_file_name;
/// assert_eq!("book_03.epub", segment_file_name("book", 3, 3));
/// assert_eq!("book_007.epub", segment_file_name("book", 7, 120));
/// ```
pub fn segment_file_name(basename: &str, seq: usize, total: usize) -> String {
    let width = total.to_string().len().max(2);
    format!("{}_{:0width$}.epub", basename, seq, width = width)
}

/// The toc entries usable as split points, in order.
///
/// # Errors
///
/// Returns an error if the file can't be opened or its toc is malformed.
pub fn list_split_targets<P: AsRef<Path>>(path: P, sink: &dyn LogSink) -> Result<Vec<TocEntry>> {
    let mut source = doc::open_input(path.as_ref())?;
    Ok(toc::resolve_toc(&mut source, sink)?.entries)
}

/// [`list_split_targets`] as a JSON array of `{title, level, href}`.
///
/// # Errors
///
/// Returns an error if the targets can't be listed.
pub fn list_split_targets_json<P: AsRef<Path>>(path: P, sink: &dyn LogSink) -> Result<String> {
    let targets = list_split_targets(path, sink)?;
    serde_json::to_string_pretty(&targets)
        .map_err(|e| Error::Validation(format!("can't serialize split targets: {}", e)))
}

/// Splits the epub at `input` and returns the paths of the written
/// segments, `{input stem}_{NN}.epub`.
///
/// Every segment is built before the first one is written. If writing a
/// segment fails, the segments already written by this call are removed.
///
/// # Errors
///
/// Fails without writing anything when the input is missing or isn't an
/// epub, when a split point is out of range, or when the package can't be
/// understood.
pub fn split<P: AsRef<Path>>(
    input: P,
    options: &SplitOptions,
    sink: &dyn LogSink,
) -> Result<Vec<PathBuf>> {
    let input = input.as_ref();
    sink.info(format_args!("reading {}", input.display()));
    let mut source = doc::open_input(input)?;
    let segments = split_package(&mut source, &options.points, sink)?;
    drop(source);

    let stem = input_stem(input);
    fs::create_dir_all(&options.output_dir)?;

    let mut written = vec![];
    for segment in &segments {
        let path = options
            .output_dir
            .join(segment_file_name(&stem, segment.seq, segment.total));
        if let Err(e) = writer::save(&segment.package, &path, sink) {
            for done in &written {
                let _ = fs::remove_file(done);
            }
            return Err(e.into());
        }
        sink.info(format_args!(
            "segment {} written to {} ({} documents)",
            segment.seq,
            path.display(),
            segment.documents.len()
        ));
        written.push(path);
    }
    Ok(written)
}

/// One output package of a split.
#[derive(Debug, Clone)]
pub struct Segment {
    /// 1-based position among the requested segments.
    pub seq: usize,
    /// Number of requested segments, skipped ones included.
    pub total: usize,
    /// Bookpaths of the content documents, in reading order.
    pub documents: Vec<String>,
    pub package: OutputPackage,
}

/// Index in `spine` of the document each toc entry points to.
pub fn target_indices(entries: &[TocEntry], spine: &[String]) -> Vec<Option<usize>> {
    entries
        .iter()
        .map(|e| spine.iter().position(|s| *s == e.href))
        .collect()
}

/// Spine index of entry `index`, or of the first entry after it that
/// points into the spine.
fn anchor(targets: &[Option<usize>], index: usize) -> Option<usize> {
    targets.get(index..)?.iter().find_map(|t| *t)
}

/// Sorted distinct split points, checked against the toc length.
///
/// # Errors
///
/// Returns a validation error for points outside the toc.
pub fn check_points(points: &[usize], toc_len: usize) -> Result<Vec<usize>> {
    if points.is_empty() {
        return Err(Error::Validation("no split points given".into()));
    }
    if let Some(bad) = points.iter().find(|p| **p >= toc_len) {
        return Err(Error::Validation(format!(
            "split point {} out of range, the toc has {} entries",
            bad, toc_len
        )));
    }
    let sorted: BTreeSet<usize> = points.iter().copied().collect();
    Ok(sorted.into_iter().collect())
}

/// Spine range of each segment.
///
/// A point without any spine anchor at or after it starts at the beginning
/// of the spine, and a following point without one ends its segment at the
/// end of the spine. Content before the first point belongs to no segment.
pub fn segment_ranges(points: &[usize], targets: &[Option<usize>], spine_len: usize) -> Vec<Range<usize>> {
    points
        .iter()
        .enumerate()
        .map(|(i, point)| {
            let start = anchor(targets, *point).unwrap_or(0);
            let end = points
                .get(i + 1)
                .map_or(spine_len, |next| anchor(targets, *next).unwrap_or(spine_len));
            start..end.max(start)
        })
        .collect()
}

/// Splits `source` in memory at the toc indices `points`.
///
/// Segments whose range holds no document not already taken by an earlier
/// segment are skipped with a warning.
///
/// # Errors
///
/// Returns a validation error for out of range points, and an error if the
/// toc is malformed or a generated document fails its checks.
pub fn split_package<R: Read + Seek>(
    source: &mut SourcePackage<R>,
    points: &[usize],
    sink: &dyn LogSink,
) -> Result<Vec<Segment>> {
    let toc = toc::resolve_toc(source, sink)?;
    let points = check_points(points, toc.entries.len())?;

    let spine: Vec<String> = source
        .spine_documents()
        .into_iter()
        .map(|(_, item)| item.bookpath.clone())
        .collect();
    let targets = target_indices(&toc.entries, &spine);
    let ranges = segment_ranges(&points, &targets, spine.len());
    if let Some(first) = ranges.first().filter(|r| r.start > 0) {
        sink.info(format_args!(
            "{} documents before the first split point are not part of any segment",
            first.start
        ));
    }

    let mut skip: HashSet<String> = source
        .manifest
        .iter()
        .filter(|i| i.is_nav() || i.is_ncx())
        .map(|i| i.bookpath.clone())
        .collect();
    match &toc.source {
        TocSource::Nav(path) | TocSource::Ncx(path) => {
            skip.insert(path.clone());
        }
        TocSource::Spine => {}
    }

    let total = ranges.len();
    let mut claimed: HashSet<&str> = HashSet::new();
    let mut plans = vec![];
    for (i, range) in ranges.into_iter().enumerate() {
        let documents: Vec<String> = spine[range]
            .iter()
            .filter(|bp| claimed.insert(bp.as_str()))
            .cloned()
            .collect();
        if documents.is_empty() {
            sink.warn(format_args!("segment {} has no content documents, skipped", i + 1));
            continue;
        }
        plans.push((i + 1, documents));
    }

    let spine_set: HashSet<&str> = spine.iter().map(String::as_str).collect();
    let mut segments = vec![];
    for (seq, documents) in plans {
        let resources = collect_resources(source, &documents, &spine_set, &skip, sink);
        let entries = segment_entries(&toc.entries, &documents);
        let package = build_segment(source, &documents, &resources, &entries, sink)?;
        segments.push(Segment {
            seq,
            total,
            documents,
            package,
        });
    }
    Ok(segments)
}

/// Resources reachable from `documents`: files they reference, then files
/// referenced by those stylesheets and non-spine documents, and so on.
///
/// Spine documents and the files in `skip` are never collected.
fn collect_resources<R: Read + Seek>(
    source: &mut SourcePackage<R>,
    documents: &[String],
    spine: &HashSet<&str>,
    skip: &HashSet<String>,
    sink: &dyn LogSink,
) -> BTreeSet<String> {
    let mut found = BTreeSet::new();
    let mut pending: Vec<String> = documents.to_vec();

    while let Some(current) = pending.pop() {
        let Some(item) = source.item_by_bookpath(&current).cloned() else {
            continue;
        };
        let text = match source.read_str(&current) {
            Ok(text) => text,
            Err(e) => {
                sink.warn(format_args!("{} not scanned: {}", current, e));
                continue;
            }
        };
        let dir = bookpath::dirname(&current);
        let references = if item.is_css() {
            rewrite::stylesheet_references(&text, dir)
        } else {
            rewrite::content_references(&text, dir)
        };

        for reference in references {
            if spine.contains(reference.as_str()) || skip.contains(&reference) {
                continue;
            }
            let Some(target) = source.item_by_bookpath(&reference) else {
                sink.debug(format_args!("{} references {}, not in the manifest", current, reference));
                continue;
            };
            let scan = target.is_css() || target.is_xhtml();
            if found.insert(reference.clone()) && scan {
                pending.push(reference);
            }
        }
    }
    found
}

/// Toc entries of a segment: those pointing to one of its documents, and
/// headings whose next entry with a target does.
fn segment_entries(entries: &[TocEntry], documents: &[String]) -> Vec<TocEntry> {
    let inside = |href: &str| documents.iter().any(|d| d == href);
    entries
        .iter()
        .enumerate()
        .filter(|(i, entry)| {
            if entry.href.is_empty() {
                entries[i + 1..]
                    .iter()
                    .find(|next| !next.href.is_empty())
                    .is_some_and(|next| inside(next.href.as_str()))
            } else {
                inside(entry.href.as_str())
            }
        })
        .map(|(_, entry)| entry.clone())
        .collect()
}

fn manifest_item(entry: &ManifestEntry, opf_dir: &str) -> ManifestItem {
    ManifestItem {
        id: entry.id.clone(),
        href: bookpath::relative(&entry.bookpath, opf_dir),
        media_type: entry.media_type.clone(),
        properties: compose::without_nav(&entry.properties),
    }
}

fn build_segment<R: Read + Seek>(
    source: &mut SourcePackage<R>,
    documents: &[String],
    resources: &BTreeSet<String>,
    entries: &[TocEntry],
    sink: &dyn LogSink,
) -> Result<OutputPackage> {
    let opf_dir = source.opf_dir.clone();
    let mut manifest = vec![];
    let mut spine = vec![];
    let mut files = vec![];

    for bookpath in documents.iter().chain(resources) {
        let Some(item) = source.item_by_bookpath(bookpath).cloned() else {
            continue;
        };
        let content = match source.read(bookpath) {
            Ok(content) => content,
            Err(e) => {
                sink.warn(format_args!("{} skipped: {}", bookpath, e));
                continue;
            }
        };
        if documents.contains(bookpath) {
            let itemref = source
                .spine
                .iter()
                .find(|s| s.idref == item.id)
                .map_or_else(
                    || SpineItem {
                        idref: item.id.clone(),
                        linear: None,
                        properties: None,
                    },
                    |s| SpineItem {
                        idref: s.idref.clone(),
                        linear: s.linear.clone(),
                        properties: s.properties.clone(),
                    },
                );
            spine.push(itemref);
        }
        manifest.push(manifest_item(&item, &opf_dir));
        files.push((bookpath.clone(), content));
    }

    let metadata = source.metadata.as_ref().map(|m| m.borrow());
    let uid = compose::identifier_text(metadata.as_deref()).unwrap_or_else(|| SPLIT_UID.into());
    let title = source
        .title()
        .unwrap_or_else(|| input_stem(source.path()));

    let toc_doc = compose::build_toc_document(
        &source.version,
        &toc::nest(entries),
        &opf_dir,
        (SPLIT_NAV_ID, SPLIT_NAV_NAME),
        (SPLIT_NCX_ID, SPLIT_NCX_NAME),
        &uid,
        &title,
    )?;
    manifest.push(toc_doc.item.clone());

    let opf = compose::build_opf(&PackageDocument {
        version: &source.version,
        metadata: metadata.as_deref(),
        unique_identifier: source.unique_identifier.as_deref(),
        fallback_id: SPLIT_UID,
        fallback_title: "Split EPUB",
        manifest: &manifest,
        spine: &spine,
        spine_toc: toc_doc.spine_toc.as_deref(),
    })?;

    Ok(OutputPackage {
        container: compose::build_container(&source.opf_path)?,
        opf_path: source.opf_path.clone(),
        opf,
        toc_path: toc_doc.bookpath,
        toc: toc_doc.content,
        files,
    })
}
