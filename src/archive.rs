//! Manages the zip component part of a source epub.
//!
//! Provides easy methods to list the archive entries and to read them as
//! bytes or as strings.

use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::{Path, PathBuf};

/// Path of the OCF container descriptor.
pub const CONTAINER_PATH: &str = "META-INF/container.xml";

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("I/O Error: {0}")]
    IO(#[from] std::io::Error),
    #[error("Zip Error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("Entry not found in archive: {0}")]
    NotFound(String),
    #[error("Invalid UTF-8 in {0}")]
    Utf8(String),
}

/// Epub archive struct. Here it's stored the file path and the list of
/// files in the zip archive.
pub struct EpubArchive<R: Read + Seek> {
    zip: zip::ZipArchive<R>,
    pub path: PathBuf,
    pub files: Vec<String>,
}

impl EpubArchive<BufReader<File>> {
    /// Opens the epub file in `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the zip is broken or if the file doesn't
    /// exists.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, ArchiveError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut archive = Self::from_reader(BufReader::new(file))?;
        archive.path = path.to_path_buf();
        Ok(archive)
    }
}

impl<R: Read + Seek> EpubArchive<R> {
    /// Opens the epub contained in `reader`.
    ///
    /// # Errors
    ///
    /// Returns an error if the zip is broken.
    pub fn from_reader(reader: R) -> Result<Self, ArchiveError> {
        let mut zip = zip::ZipArchive::new(reader)?;
        let mut files = vec![];

        for i in 0..zip.len() {
            let file = zip.by_index_raw(i)?;
            files.push(String::from(file.name()));
        }

        Ok(Self {
            zip,
            path: PathBuf::new(),
            files,
        })
    }

    /// True if `name` is an entry of the archive.
    pub fn contains(&self, name: &str) -> bool {
        self.files.iter().any(|f| f == name)
    }

    /// Returns the content of the file by the `name` as `Vec<u8>`.
    ///
    /// If the name is not found as is, it's looked up again percent-decoded.
    ///
    /// # Errors
    ///
    /// Returns an error if the name doesn't exists in the zip archive.
    pub fn get_entry(&mut self, name: &str) -> Result<Vec<u8>, ArchiveError> {
        let mut entry: Vec<u8> = vec![];
        match self.zip.by_name(name) {
            Ok(mut zipfile) => {
                zipfile.read_to_end(&mut entry)?;
                return Ok(entry);
            }
            Err(zip::result::ZipError::FileNotFound) => {}
            Err(e) => return Err(e.into()),
        };

        let decoded = crate::bookpath::decode(name);
        match self.zip.by_name(&decoded) {
            Ok(mut zipfile) => {
                zipfile.read_to_end(&mut entry)?;
                Ok(entry)
            }
            Err(zip::result::ZipError::FileNotFound) => Err(ArchiveError::NotFound(name.into())),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns the content of the file by the `name` as `String`.
    ///
    /// # Errors
    ///
    /// Returns an error if the name doesn't exists in the zip archive or
    /// if the content is not valid utf-8.
    pub fn get_entry_as_str(&mut self, name: &str) -> Result<String, ArchiveError> {
        let content = self.get_entry(name)?;
        String::from_utf8(content).map_err(|_| ArchiveError::Utf8(name.into()))
    }

    /// Returns the content of container file "META-INF/container.xml".
    ///
    /// # Errors
    ///
    /// Returns an error if the epub doesn't have the container file.
    pub fn get_container_file(&mut self) -> Result<Vec<u8>, ArchiveError> {
        self.get_entry(CONTAINER_PATH)
    }
}
