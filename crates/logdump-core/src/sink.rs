//! Append-only line output backed by a file.
//!
//! Data is pushed to stable storage every time more than `sync_threshold`
//! bytes have been written since the last sync. A sink that is closed without
//! a single byte written removes its file, so runs that produced nothing
//! leave nothing behind.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    os::unix::fs::OpenOptionsExt,
    path::{Path, PathBuf},
};

use thiserror::Error;

/// Default number of bytes written between two `fdatasync` calls.
pub const SYNC_THRESHOLD_DEFAULT: usize = 4096;

const FILE_MODE: u32 = 0o644;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("opening '{}' failed", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("'{}' is not open", .0.display())]
    NotOpen(PathBuf),
    #[error("writing to '{}' failed", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub struct LogSink {
    path: PathBuf,
    file: Option<File>,
    /// Bytes written since the last sync.
    pending: usize,
    sync_threshold: usize,
    is_filter: bool,
}

impl LogSink {
    /// Bind a sink to `<dir>/<name>.txt`. Nothing is created on disk until [`LogSink::open`].
    pub fn new<P: AsRef<Path>>(dir: P, name: &str, is_filter: bool) -> Self {
        Self::with_path(dir.as_ref().join(format!("{name}.txt")), is_filter)
    }

    pub fn with_path(path: PathBuf, is_filter: bool) -> Self {
        Self {
            path,
            file: None,
            pending: 0,
            sync_threshold: SYNC_THRESHOLD_DEFAULT,
            is_filter,
        }
    }

    pub fn sync_threshold(mut self, bytes: usize) -> Self {
        self.sync_threshold = bytes;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Create (or truncate) the backing file. Calling it on an open sink does nothing.
    pub fn open(&mut self) -> Result<(), SinkError> {
        if self.file.is_some() {
            return Ok(());
        }
        log::info!(
            "Opening '{}'{}",
            self.path.display(),
            if self.is_filter { " (filter)" } else { "" }
        );
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .mode(FILE_MODE)
            .open(&self.path)
            .map_err(|source| SinkError::Open {
                path: self.path.clone(),
                source,
            })?;
        self.file = Some(file);
        self.pending = 0;
        Ok(())
    }

    /// Append `line` and a trailing newline.
    pub fn write(&mut self, line: &str) -> Result<(), SinkError> {
        let Some(file) = self.file.as_mut() else {
            return Err(SinkError::NotOpen(self.path.clone()));
        };
        let write_err = |source| SinkError::Write {
            path: self.path.clone(),
            source,
        };

        file.write_all(line.as_bytes()).map_err(write_err)?;
        file.write_all(b"\n").map_err(write_err)?;
        self.pending += line.len() + 1;

        if self.pending > self.sync_threshold {
            file.sync_data().map_err(write_err)?;
            self.pending = 0;
        }
        Ok(())
    }

    /// Release the file, removing it when nothing was ever written.
    pub fn close(&mut self) {
        let Some(file) = self.file.take() else {
            return;
        };
        let empty = file.metadata().map(|meta| meta.len() == 0).unwrap_or(false);
        drop(file);

        if empty {
            log::debug!("Deleting '{}' because it is empty", self.path.display());
            match fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => log::warn!("Cannot remove '{}': {}", self.path.display(), err),
            }
        }
    }
}

impl Drop for LogSink {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TempDir;

    #[test]
    fn empty_sink_leaves_no_file() {
        let dir = TempDir::new("sink-empty").unwrap();
        let path = {
            let mut sink = LogSink::new(&dir, "dmesg", false);
            sink.open().unwrap();
            assert!(sink.path().exists());
            sink.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn never_opened_sink_closes_quietly() {
        let dir = TempDir::new("sink-unopened").unwrap();
        let mut sink = LogSink::new(&dir, "logcat", false);
        sink.close();
        assert!(!dir.join("logcat.txt").exists());
    }

    #[test]
    fn lines_are_newline_terminated_in_order() {
        let dir = TempDir::new("sink-lines").unwrap();
        {
            let mut sink = LogSink::new(&dir, "avc.logcat", true).sync_threshold(8);
            sink.open().unwrap();
            for line in ["first", "second line", "", "third"] {
                sink.write(line).unwrap();
            }
        }
        let content = fs::read_to_string(dir.join("avc.logcat.txt")).unwrap();
        assert_eq!(content, "first\nsecond line\n\nthird\n");
    }

    #[test]
    fn open_truncates_stale_content() {
        let dir = TempDir::new("sink-truncate").unwrap();
        fs::write(dir.join("logcat.txt"), "stale data from a previous boot\n").unwrap();

        let mut sink = LogSink::new(&dir, "logcat", false);
        sink.open().unwrap();
        sink.write("fresh").unwrap();
        sink.close();

        assert_eq!(
            fs::read_to_string(dir.join("logcat.txt")).unwrap(),
            "fresh\n"
        );
    }

    #[test]
    fn double_open_keeps_written_data() {
        let dir = TempDir::new("sink-reopen").unwrap();
        let mut sink = LogSink::new(&dir, "dmesg", false);
        sink.open().unwrap();
        sink.write("kept").unwrap();
        sink.open().unwrap();
        sink.close();
        assert_eq!(fs::read_to_string(dir.join("dmesg.txt")).unwrap(), "kept\n");
    }

    #[test]
    fn write_before_open_fails() {
        let dir = TempDir::new("sink-not-open").unwrap();
        let mut sink = LogSink::new(&dir, "dmesg", false);
        match sink.write("line") {
            Err(SinkError::NotOpen(path)) => assert_eq!(path, dir.join("dmesg.txt")),
            other => panic!("expected NotOpen, got {other:?}"),
        }
    }

    #[test]
    fn open_in_missing_directory_fails() {
        let dir = TempDir::new("sink-missing-dir").unwrap();
        let mut sink = LogSink::new(dir.join("does-not-exist"), "dmesg", false);
        assert!(matches!(sink.open(), Err(SinkError::Open { .. })));
        assert!(!sink.is_open());
    }
}
