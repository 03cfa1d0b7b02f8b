//! Helpers shared by the unit tests of this workspace.

use std::{
    collections::VecDeque,
    env,
    fs::{self, create_dir},
    io::{self, Read},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use uuid::Uuid;

use crate::tailer::LogSource;

/// A temporary directory which is removed on `drop`.
pub struct TempDir {
    dir_path: PathBuf,
}

impl TempDir {
    pub fn new(prefix: &str) -> io::Result<Self> {
        let dir_path = env::temp_dir().join(format!("{prefix}-{}", Uuid::new_v4()));
        create_dir(dir_path.as_path())?;
        Ok(Self { dir_path })
    }

    pub fn path(&self) -> &Path {
        &self.dir_path
    }

    pub fn join<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        self.dir_path.join(path)
    }
}

impl AsRef<Path> for TempDir {
    fn as_ref(&self) -> &Path {
        self.dir_path.as_path()
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        if self.dir_path.exists() {
            let _ = fs::remove_dir_all(&self.dir_path);
        }
    }
}

/// A [`LogSource`] replaying canned chunks of bytes.
///
/// Each chunk is returned by exactly one `read` call, which lets tests
/// control how lines are split across reads. Once every chunk has been
/// consumed the run flag handed to [`ScriptedSource::stop_when_drained`]
/// is cleared.
#[derive(Clone, Default)]
pub struct ScriptedSource {
    chunks: Vec<Vec<u8>>,
    fail_open: bool,
    running: Option<Arc<AtomicBool>>,
    closed: Arc<AtomicBool>,
    reads: Arc<AtomicUsize>,
}

impl ScriptedSource {
    pub fn new<I, T>(chunks: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Vec<u8>>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_open: true,
            ..Default::default()
        }
    }

    pub fn stop_when_drained(mut self, running: Arc<AtomicBool>) -> Self {
        self.running = Some(running);
        self
    }

    /// Shared flag set once the tailer handed the reader back.
    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        self.closed.clone()
    }

    /// Shared counter of `read` calls served.
    pub fn read_counter(&self) -> Arc<AtomicUsize> {
        self.reads.clone()
    }
}

pub struct ScriptedReader {
    chunks: VecDeque<Vec<u8>>,
    running: Option<Arc<AtomicBool>>,
    reads: Arc<AtomicUsize>,
}

impl Read for ScriptedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        match self.chunks.pop_front() {
            Some(mut chunk) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    self.chunks.push_front(chunk.split_off(n));
                }
                if self.chunks.is_empty() {
                    if let Some(running) = &self.running {
                        running.store(false, Ordering::SeqCst);
                    }
                }
                Ok(n)
            }
            None => {
                if let Some(running) = &self.running {
                    running.store(false, Ordering::SeqCst);
                }
                Ok(0)
            }
        }
    }
}

impl LogSource for ScriptedSource {
    type Handle = ScriptedReader;

    fn open(&mut self) -> io::Result<Self::Handle> {
        if self.fail_open {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "scripted source unavailable",
            ));
        }
        Ok(ScriptedReader {
            chunks: self.chunks.drain(..).collect(),
            running: self.running.clone(),
            reads: self.reads.clone(),
        })
    }

    fn close(&mut self, _handle: Self::Handle) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
