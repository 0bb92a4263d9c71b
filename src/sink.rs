//! Logging sinks.
//!
//! Every pipeline takes a `&dyn LogSink` instead of writing to a global
//! logger, so callers decide where diagnostics go: the `log` facade, a
//! vector for inspection in tests, or a local file next to the facade.

use std::cell::RefCell;
use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use log::Level;

pub trait LogSink {
    fn log(&self, level: Level, args: fmt::Arguments<'_>);

    fn error(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Error, args);
    }

    fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Warn, args);
    }

    fn info(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Info, args);
    }

    fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Debug, args);
    }
}

/// Forwards every record to the `log` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFacade;

impl LogSink for LogFacade {
    fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        log::log!(target: "epub_splice", level, "{}", args);
    }
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: RefCell<Vec<(Level, String)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<(Level, String)> {
        self.records.borrow().clone()
    }

    /// Messages logged at exactly `level`.
    pub fn messages(&self, level: Level) -> Vec<String> {
        self.records
            .borrow()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

impl LogSink for MemorySink {
    fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        self.records.borrow_mut().push((level, args.to_string()));
    }
}

/// Writes every record to a file, then hands it to `inner`.
///
/// The file starts with a `time: ...` line holding the local time it was
/// created at.
pub struct FileSink<S: LogSink> {
    inner: S,
    file: RefCell<File>,
}

impl<S: LogSink> FileSink<S> {
    pub fn create<P: AsRef<Path>>(path: P, inner: S) -> io::Result<Self> {
        let mut file = File::create(path)?;
        writeln!(file, "time: {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"))?;
        file.flush()?;
        Ok(Self {
            inner,
            file: RefCell::new(file),
        })
    }
}

impl<S: LogSink> LogSink for FileSink<S> {
    fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        {
            let mut file = self.file.borrow_mut();
            let _ = writeln!(file, "{}: {}", level, args).and_then(|_| file.flush());
        }
        self.inner.log(level, args);
    }
}
