mod common;

use common::BookBuilder;
use epub_splice::opf_view::view_opf;
use epub_splice::sink::MemorySink;
use epub_splice::Error;
use log::Level;

#[test]
fn view_formats_the_opf() {
    let dir = tempfile::tempdir().unwrap();
    let path = BookBuilder::new("3.0").chapters(1).write(dir.path(), "book.epub");
    let sink = MemorySink::new();

    let view = view_opf(&path, &sink).unwrap();
    assert_eq!("OEBPS/content.opf", view.opf_path);
    assert!(view.opf.contains("<dc:title>Book</dc:title>"));
    assert!(view.opf.contains("\n  <manifest>"));
    assert_eq!(
        vec![
            "mimetype",
            "META-INF/container.xml",
            "OEBPS/content.opf",
            "OEBPS/nav.xhtml",
            "OEBPS/Text/ch1.xhtml",
        ],
        view.files
    );
    assert!(sink.records().is_empty());

    let text = view.to_string();
    assert!(text.starts_with("=== OPF Content ===\n"));
    assert!(text.ends_with("=== File List ===\nmimetype\nMETA-INF/container.xml\nOEBPS/content.opf\nOEBPS/nav.xhtml\nOEBPS/Text/ch1.xhtml\n"));
}

#[test]
fn view_malformed_opf_as_stored() {
    let dir = tempfile::tempdir().unwrap();
    let path = BookBuilder::new("3.0")
        .raw_opf("<package><manifest>")
        .write(dir.path(), "book.epub");
    let sink = MemorySink::new();

    let view = view_opf(&path, &sink).unwrap();
    assert_eq!("<package><manifest>", view.opf);
    assert_eq!(1, sink.messages(Level::Warn).len());
}

#[test]
fn view_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let result = view_opf(dir.path().join("none.epub"), &MemorySink::new());
    assert!(matches!(result, Err(Error::Validation(_))));
}
