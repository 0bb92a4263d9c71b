//! Writes an [`OutputPackage`] as an epub archive.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufWriter, Seek, Write};
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::archive::ArchiveError;
use crate::compose::{OutputPackage, CONTAINER_PATH, MIMETYPE};
use crate::sink::LogSink;

/// Writes `package` into `writer` and returns it once the archive is
/// finished.
///
/// `mimetype` comes first and uncompressed, then the container, the OPF,
/// the toc document and the other files in order. A path is only written
/// once: later duplicates are skipped.
///
/// # Errors
///
/// Returns an error if writing to `writer` fails.
pub fn write_package<W: Write + Seek>(
    package: &OutputPackage,
    writer: W,
    sink: &dyn LogSink,
) -> Result<W, ArchiveError> {
    let mut zip = ZipWriter::new(writer);

    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file("mimetype", stored)?;
    zip.write_all(MIMETYPE.as_bytes())?;

    let mut written: HashSet<&str> = HashSet::new();
    written.insert("mimetype");
    let generated = [
        (CONTAINER_PATH, package.container.as_bytes()),
        (package.opf_path.as_str(), package.opf.as_bytes()),
        (package.toc_path.as_str(), package.toc.as_bytes()),
    ];
    let files = package.files.iter().map(|(p, c)| (p.as_str(), c.as_slice()));

    for (path, content) in generated.into_iter().chain(files) {
        if !written.insert(path) {
            sink.debug(format_args!("{} already written, skipped", path));
            continue;
        }
        zip.start_file(path, deflated)?;
        zip.write_all(content)?;
    }

    Ok(zip.finish()?)
}

/// Temporary path the archive is written to before being moved to `path`.
fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

/// Writes `package` to the file at `path`.
///
/// The archive is written next to `path` and renamed once complete, so
/// `path` never holds a truncated archive.
///
/// # Errors
///
/// Returns an error if the file can't be created or written.
pub fn save<P: AsRef<Path>>(
    package: &OutputPackage,
    path: P,
    sink: &dyn LogSink,
) -> Result<(), ArchiveError> {
    let path = path.as_ref();
    let part = part_path(path);

    let result = File::create(&part)
        .map_err(ArchiveError::from)
        .and_then(|file| write_package(package, BufWriter::new(file), sink))
        .and_then(|mut out| out.flush().map_err(ArchiveError::from))
        .and_then(|()| fs::rename(&part, path).map_err(ArchiveError::from));

    if result.is_err() {
        let _ = fs::remove_file(&part);
    }
    result
}
