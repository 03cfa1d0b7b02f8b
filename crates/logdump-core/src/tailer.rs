//! Continuous draining of a log stream into sinks.

use std::{
    io::{self, Read},
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::Duration,
};

use bytes::BytesMut;
use thiserror::Error;

use crate::{
    filter::LogFilter,
    sink::{LogSink, SYNC_THRESHOLD_DEFAULT, SinkError},
};

/// Size of a single read from the source.
const READ_CHUNK: usize = 512;
/// Longest line kept in one piece. Longer lines are cut at this length and
/// written as several lines.
pub const MAX_LINE_LEN: usize = 4096;
/// Pause after a read that produced nothing, so an exhausted source is not spun on.
const IDLE_BACKOFF: Duration = Duration::from_millis(50);

/// A stream of log lines, e.g. the kernel ring buffer or a `logcat` pipe.
pub trait LogSource: Send {
    type Handle: Read + Send;

    fn open(&mut self) -> io::Result<Self::Handle>;

    /// Release a handle obtained from [`LogSource::open`].
    fn close(&mut self, handle: Self::Handle);
}

#[derive(Error, Debug)]
pub enum TailerError {
    #[error("[{name}] opening source failed")]
    OpenSource {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("[{name}] opening output failed")]
    OpenSink {
        name: String,
        #[source]
        source: SinkError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailerState {
    Created,
    Running,
    Stopped,
}

struct Attachment {
    filter: Box<dyn LogFilter>,
    sink: LogSink,
}

pub struct StreamTailer<S: LogSource> {
    name: String,
    source: S,
    sink: LogSink,
    filters: Vec<Attachment>,
    sync_threshold: usize,
    state: TailerState,
}

impl<S: LogSource> StreamTailer<S> {
    /// Output goes to `<log_dir>/<name>.txt`.
    pub fn new<P: AsRef<Path>>(name: &str, source: S, log_dir: P) -> Self {
        log::debug!("Logger context '{name}' created");
        Self {
            name: name.to_string(),
            source,
            sink: LogSink::new(log_dir, name, false),
            filters: Vec::new(),
            sync_threshold: SYNC_THRESHOLD_DEFAULT,
            state: TailerState::Created,
        }
    }

    /// Sync threshold for this tailer's sink and every filter sink attached afterwards.
    pub fn sync_threshold(mut self, bytes: usize) -> Self {
        self.sync_threshold = bytes;
        self.sink = LogSink::with_path(self.sink.path().to_path_buf(), false).sync_threshold(bytes);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> TailerState {
        self.state
    }

    pub fn output_path(&self) -> &Path {
        self.sink.path()
    }

    /// Matching lines go to `<log_dir>/<filter>.<stream>.txt`.
    pub fn attach_filter<P: AsRef<Path>>(&mut self, log_dir: P, filter: Box<dyn LogFilter>) {
        log::debug!(
            "Registered filter '{}' to '{}' logger",
            filter.name(),
            self.name
        );
        let sink_name = format!("{}.{}", filter.name(), self.name);
        let sink = LogSink::new(log_dir, &sink_name, true).sync_threshold(self.sync_threshold);
        self.filters.push(Attachment { filter, sink });
    }

    pub fn filter_outputs(&self) -> Vec<PathBuf> {
        self.filters
            .iter()
            .map(|attachment| attachment.sink.path().to_path_buf())
            .collect()
    }

    /// Drain the source until `running` is cleared.
    ///
    /// The flag is checked before every read: a read blocked on a quiet
    /// source only returns once new data arrives.
    pub fn run(&mut self, running: &AtomicBool) -> Result<(), TailerError> {
        let result = self.run_inner(running);
        self.state = TailerState::Stopped;
        result
    }

    fn run_inner(&mut self, running: &AtomicBool) -> Result<(), TailerError> {
        let mut handle = self
            .source
            .open()
            .map_err(|source| TailerError::OpenSource {
                name: self.name.clone(),
                source,
            })?;

        if let Err(source) = self.sink.open() {
            self.source.close(handle);
            return Err(TailerError::OpenSink {
                name: self.name.clone(),
                source,
            });
        }

        let name = &self.name;
        self.filters.retain_mut(|attachment| match attachment.sink.open() {
            Ok(()) => true,
            Err(err) => {
                log::warn!(
                    "[{name}] dropping filter '{}': {err}",
                    attachment.filter.name()
                );
                false
            }
        });

        self.state = TailerState::Running;
        log::info!("[{}] logging to '{}'", self.name, self.sink.path().display());

        let mut chunk = [0u8; READ_CHUNK];
        let mut buf = BytesMut::with_capacity(MAX_LINE_LEN);
        while running.load(Ordering::SeqCst) {
            let n = match handle.read(&mut chunk) {
                Ok(0) => {
                    thread::sleep(IDLE_BACKOFF);
                    continue;
                }
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    log::trace!("[{}] read failed: {err}", self.name);
                    thread::sleep(IDLE_BACKOFF);
                    continue;
                }
            };

            for segment in chunk[..n].split_inclusive(|&c| c == b'\n') {
                let (bytes, complete) = match segment.strip_suffix(b"\n") {
                    Some(line) => (line, true),
                    None => (segment, false),
                };
                buf.extend_from_slice(bytes);
                while buf.len() > MAX_LINE_LEN {
                    let head = buf.split_to(MAX_LINE_LEN);
                    self.process_line(&String::from_utf8_lossy(&head));
                }
                if complete {
                    self.process_line(&String::from_utf8_lossy(&buf));
                    buf.clear();
                }
            }
        }

        if !buf.is_empty() {
            self.process_line(&String::from_utf8_lossy(&buf));
        }

        log::info!("[{}] stopping", self.name);
        self.source.close(handle);
        self.sink.close();
        for attachment in &mut self.filters {
            attachment.sink.close();
        }
        Ok(())
    }

    fn process_line(&mut self, line: &str) {
        let line = line.strip_suffix('\r').unwrap_or(line);
        for Attachment { filter, sink } in &mut self.filters {
            if filter.filter(line) {
                if let Err(err) = sink.write(line) {
                    log::warn!("[{}] {err}", self.name);
                }
            }
        }
        if let Err(err) = self.sink.write(line) {
            log::warn!("[{}] {err}", self.name);
        }
    }
}
