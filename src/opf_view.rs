//! Shows the package document and the entry list of an epub.

use std::fmt;
use std::path::Path;

use crate::archive::{ArchiveError, EpubArchive};
use crate::doc::{self, DocError};
use crate::error::{Error, Result};
use crate::sink::LogSink;
use crate::xmlutils;

/// OPF of an epub, ready to be displayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpfView {
    pub opf_path: String,
    /// The OPF re-indented, or as stored when it can't be parsed.
    pub opf: String,
    /// Entries of the archive, in archive order.
    pub files: Vec<String>,
}

impl fmt::Display for OpfView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== OPF Content ===")?;
        writeln!(f, "{}", self.opf.trim_end())?;
        writeln!(f, "=== File List ===")?;
        for file in &self.files {
            writeln!(f, "{}", file)?;
        }
        Ok(())
    }
}

/// Reads the OPF of the epub at `path`.
///
/// The OPF doesn't need to be valid: when it can't be re-indented it is
/// returned as stored, with a warning.
///
/// # Errors
///
/// Returns an error if the file is missing, isn't a zip archive, or holds
/// no OPF.
pub fn view_opf<P: AsRef<Path>>(path: P, sink: &dyn LogSink) -> Result<OpfView> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(Error::Validation(format!("file not found: {}", path.display())));
    }
    let mut archive = EpubArchive::new(path).map_err(|e| match e {
        ArchiveError::Zip(z) => Error::Validation(format!(
            "{} is not a valid epub archive: {}",
            path.display(),
            z
        )),
        e => Error::Archive(e),
    })?;

    let opf_path = doc::locate_opf(&mut archive)?;
    let raw = archive.get_entry(&opf_path).map_err(DocError::from)?;
    let opf = match xmlutils::reindent(&raw) {
        Ok(opf) => opf,
        Err(e) => {
            sink.warn(format_args!("{} can't be formatted: {}", opf_path, e));
            String::from_utf8_lossy(&raw).into_owned()
        }
    };

    Ok(OpfView {
        opf_path,
        opf,
        files: archive.files.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_sections() {
        let view = OpfView {
            opf_path: "content.opf".into(),
            opf: "<package/>\n".into(),
            files: vec!["mimetype".into(), "content.opf".into()],
        };
        assert_eq!(
            "=== OPF Content ===\n<package/>\n=== File List ===\nmimetype\ncontent.opf\n",
            view.to_string()
        );
    }
}
