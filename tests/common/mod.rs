#![allow(dead_code)]

use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TocKind {
    Nav,
    Ncx,
    None,
}

/// Builds small epub files for tests.
#[derive(Debug, Clone)]
pub struct BookBuilder {
    version: Option<String>,
    opf_dir: String,
    toc: TocKind,
    title: String,
    container: bool,
    opf_override: Option<String>,
    /// (id, href relative to the OPF dir, body)
    chapters: Vec<(String, String, String)>,
    /// (level, title, href relative to the OPF dir, empty for headings)
    toc_entries: Vec<(usize, String, String)>,
    /// (id, href relative to the OPF dir, media type, content)
    resources: Vec<(String, String, String, Vec<u8>)>,
    /// bookpaths listed in the manifest but not stored
    omitted: Vec<String>,
}

impl BookBuilder {
    pub fn new(version: &str) -> Self {
        Self {
            version: Some(version.to_string()),
            opf_dir: "OEBPS".into(),
            toc: if version.starts_with('3') { TocKind::Nav } else { TocKind::Ncx },
            title: "Book".into(),
            container: true,
            opf_override: None,
            chapters: vec![],
            toc_entries: vec![],
            resources: vec![],
            omitted: vec![],
        }
    }

    pub fn without_version(mut self) -> Self {
        self.version = None;
        self
    }

    pub fn opf_dir(mut self, dir: &str) -> Self {
        self.opf_dir = dir.into();
        self
    }

    pub fn toc(mut self, kind: TocKind) -> Self {
        self.toc = kind;
        self
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = title.into();
        self
    }

    pub fn without_container(mut self) -> Self {
        self.container = false;
        self
    }

    pub fn raw_opf(mut self, opf: &str) -> Self {
        self.opf_override = Some(opf.into());
        self
    }

    pub fn chapter(mut self, id: &str, href: &str, body: &str) -> Self {
        self.chapters.push((id.into(), href.into(), body.into()));
        self
    }

    pub fn entry(mut self, level: usize, title: &str, href: &str) -> Self {
        self.toc_entries.push((level, title.into(), href.into()));
        self
    }

    /// `n` chapters `Text/ch{i}.xhtml`, each with a level 1 toc entry.
    pub fn chapters(mut self, n: usize) -> Self {
        for i in 1..=n {
            let href = format!("Text/ch{}.xhtml", i);
            self = self
                .chapter(&format!("ch{}", i), &href, &format!("<h1>Chapter {}</h1>", i))
                .entry(1, &format!("Chapter {}", i), &href);
        }
        self
    }

    pub fn resource(mut self, id: &str, href: &str, media_type: &str, content: &[u8]) -> Self {
        self.resources
            .push((id.into(), href.into(), media_type.into(), content.to_vec()));
        self
    }

    pub fn omit(mut self, bookpath: &str) -> Self {
        self.omitted.push(bookpath.into());
        self
    }

    fn bookpath(&self, href: &str) -> String {
        if self.opf_dir.is_empty() {
            href.to_string()
        } else {
            format!("{}/{}", self.opf_dir, href)
        }
    }

    pub fn opf_path(&self) -> String {
        self.bookpath("content.opf")
    }

    fn opf(&self) -> String {
        let mut manifest = String::new();
        for (id, href, _) in &self.chapters {
            manifest.push_str(&format!(
                r#"<item id="{}" href="{}" media-type="application/xhtml+xml"/>"#,
                id,
                href.replace(' ', "%20")
            ));
        }
        for (id, href, media_type, _) in &self.resources {
            manifest.push_str(&format!(
                r#"<item id="{}" href="{}" media-type="{}"/>"#,
                id,
                href.replace(' ', "%20"),
                media_type
            ));
        }
        match self.toc {
            TocKind::Nav => manifest.push_str(
                r#"<item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>"#,
            ),
            TocKind::Ncx => manifest.push_str(
                r#"<item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>"#,
            ),
            TocKind::None => {}
        }

        let mut spine = String::new();
        for (id, _, _) in &self.chapters {
            spine.push_str(&format!(r#"<itemref idref="{}"/>"#, id));
        }
        let toc_attr = if self.toc == TocKind::Ncx { r#" toc="ncx""# } else { "" };
        let version = self
            .version
            .as_ref()
            .map(|v| format!(r#" version="{}""#, v))
            .unwrap_or_default();

        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<package xmlns="http://www.idpf.org/2007/opf"{} unique-identifier="bookid">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:opf="http://www.idpf.org/2007/opf">
    <dc:identifier id="bookid">urn:book:{}</dc:identifier>
    <dc:title>{}</dc:title>
    <dc:language>en</dc:language>
    <dc:creator opf:role="aut">Someone</dc:creator>
  </metadata>
  <manifest>{}</manifest>
  <spine{}>{}</spine>
</package>"#,
            version, self.title, self.title, manifest, toc_attr, spine
        )
    }

    fn nav_list(entries: &[(usize, String, String)]) -> String {
        let mut out = String::from("<ol>");
        let mut i = 0;
        while i < entries.len() {
            let (level, title, href) = &entries[i];
            let end = entries[i + 1..]
                .iter()
                .position(|(l, _, _)| l <= level)
                .map_or(entries.len(), |p| i + 1 + p);
            out.push_str("<li>");
            if href.is_empty() {
                out.push_str(&format!("<span>{}</span>", title));
            } else {
                out.push_str(&format!(r#"<a href="{}">{}</a>"#, href, title));
            }
            if end > i + 1 {
                out.push_str(&Self::nav_list(&entries[i + 1..end]));
            }
            out.push_str("</li>");
            i = end;
        }
        out.push_str("</ol>");
        out
    }

    fn nav(&self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head><title>Contents</title></head>
<body><nav epub:type="toc" id="toc"><h1>Contents</h1>{}</nav></body>
</html>"#,
            Self::nav_list(&self.toc_entries)
        )
    }

    fn navpoints(entries: &[(usize, String, String)], counter: &mut usize) -> String {
        let mut out = String::new();
        let mut i = 0;
        while i < entries.len() {
            let (level, title, href) = &entries[i];
            let end = entries[i + 1..]
                .iter()
                .position(|(l, _, _)| l <= level)
                .map_or(entries.len(), |p| i + 1 + p);
            *counter += 1;
            out.push_str(&format!(
                r#"<navPoint id="np{0}" playOrder="{0}"><navLabel><text>{1}</text></navLabel><content src="{2}"/>"#,
                counter, title, href
            ));
            out.push_str(&Self::navpoints(&entries[i + 1..end], counter));
            out.push_str("</navPoint>");
            i = end;
        }
        out
    }

    fn ncx(&self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
<head><meta name="dtb:uid" content="urn:book:{}"/></head>
<docTitle><text>{}</text></docTitle>
<navMap>{}</navMap>
</ncx>"#,
            self.title,
            self.title,
            Self::navpoints(&self.toc_entries, &mut 0)
        )
    }

    fn xhtml(title: &str, body: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<html xmlns="http://www.w3.org/1999/xhtml">
<head><title>{}</title></head>
<body>{}</body>
</html>"#,
            title, body
        )
    }

    /// The epub file as bytes.
    pub fn build(&self) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        let mut entries: Vec<(String, Vec<u8>)> = vec![];
        if self.container {
            entries.push((
                "META-INF/container.xml".into(),
                format!(
                    r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles><rootfile full-path="{}" media-type="application/oebps-package+xml"/></rootfiles>
</container>"#,
                    self.opf_path()
                )
                .into_bytes(),
            ));
        }
        let opf = self.opf_override.clone().unwrap_or_else(|| self.opf());
        entries.push((self.opf_path(), opf.into_bytes()));
        match self.toc {
            TocKind::Nav => entries.push((self.bookpath("nav.xhtml"), self.nav().into_bytes())),
            TocKind::Ncx => entries.push((self.bookpath("toc.ncx"), self.ncx().into_bytes())),
            TocKind::None => {}
        }
        for (id, href, body) in &self.chapters {
            entries.push((self.bookpath(href), Self::xhtml(id, body).into_bytes()));
        }
        for (_, href, _, content) in &self.resources {
            entries.push((self.bookpath(href), content.clone()));
        }

        zip.start_file("mimetype", stored).unwrap();
        zip.write_all(b"application/epub+zip").unwrap();
        for (path, content) in entries {
            if self.omitted.contains(&path) {
                continue;
            }
            zip.start_file(path, deflated).unwrap();
            zip.write_all(&content).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    /// Writes the epub as `dir/name` and returns its path.
    pub fn write(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, self.build()).unwrap();
        path
    }
}

/// Entry names of the zip at `path`, in archive order.
pub fn entry_names(path: &Path) -> Vec<String> {
    let file = std::fs::File::open(path).unwrap();
    let mut zip = ZipArchive::new(file).unwrap();
    (0..zip.len())
        .map(|i| zip.by_index(i).unwrap().name().to_string())
        .collect()
}

pub fn read_entry(path: &Path, name: &str) -> String {
    let file = std::fs::File::open(path).unwrap();
    let mut zip = ZipArchive::new(file).unwrap();
    let mut content = String::new();
    zip.by_name(name).unwrap().read_to_string(&mut content).unwrap();
    content
}

/// Files of `dir`, sorted by name.
pub fn dir_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|rd| {
            rd.map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}
