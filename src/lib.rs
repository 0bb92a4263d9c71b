#![warn(clippy::pedantic, clippy::nursery)]
#![allow(
    clippy::module_name_repetitions,
    clippy::let_underscore_drop,

    // for MSRV
    clippy::unnested_or_patterns,
    clippy::uninlined_format_args,
    clippy::missing_const_for_fn,
)]

//! EPUB splice
//! lib to merge several epub files into one, or split one at its table of
//! contents
//!
//! # Examples
//!
//! ## Merging
//!
//! Books are merged in the given order. Files with the same path in more
//! than one book are renamed in the later books, and every reference to a
//! renamed file is rewritten.
//!
//! ```no_run
//! use epub_splice::merge::{merge, MergeOptions};
//! use epub_splice::sink::LogFacade;
//!
//! let options = MergeOptions { output_dir: "out".into() };
//! let merged = merge(&["vol1.epub", "vol2.epub"], &options, &LogFacade).unwrap();
//! assert!(merged.ends_with("merged_vol1.epub"));
//! ```
//!
//! ## Listing split points
//!
//! Split points are indices into the flattened table of contents.
//!
//! ```no_run
//! use epub_splice::split::list_split_targets;
//! use epub_splice::sink::LogFacade;
//!
//! for (i, target) in list_split_targets("book.epub", &LogFacade).unwrap().iter().enumerate() {
//!     println!("{} {} {}", i, "  ".repeat(target.level - 1), target.title);
//! }
//! ```
//!
//! ## Splitting
//!
//! ```no_run
//! use epub_splice::split::{parse_split_points, split, SplitOptions};
//! use epub_splice::sink::LogFacade;
//!
//! let options = SplitOptions {
//!     output_dir: "out".into(),
//!     points: parse_split_points("0,3,7").unwrap(),
//! };
//! let written = split("book.epub", &options, &LogFacade).unwrap();
//! // out/book_01.epub, out/book_02.epub, out/book_03.epub
//! assert_eq!(3, written.len());
//! ```
//!
//! ## Logging
//!
//! Every operation reports through a [`LogSink`](sink::LogSink). Use
//! [`LogFacade`](sink::LogFacade) to go through the `log` crate, or
//! [`MemorySink`](sink::MemorySink) to inspect what happened:
//!
//! ```no_run
//! use epub_splice::opf_view::view_opf;
//! use epub_splice::sink::MemorySink;
//!
//! let sink = MemorySink::new();
//! let view = view_opf("book.epub", &sink).unwrap();
//! println!("{}", view);
//! for (level, message) in sink.records() {
//!     eprintln!("{}: {}", level, message);
//! }
//! ```

mod xmlutils;

pub mod archive;
pub mod bookpath;
pub mod compose;
pub mod conflict;
pub mod doc;
pub mod error;
pub mod merge;
pub mod opf_view;
pub mod rewrite;
pub mod sink;
pub mod split;
pub mod toc;
pub mod writer;

pub use error::{Error, Result};
pub use xmlutils::{XMLElement, XMLError, XMLNode};
