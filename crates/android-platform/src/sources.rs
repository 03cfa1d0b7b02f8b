//! The raw log streams drained by the collector.

use std::{
    fs::File,
    io::{self, Read},
    path::PathBuf,
    process::{Child, ChildStdout, Command, Stdio},
};

use logdump_core::tailer::LogSource;

pub const KMSG_PATH: &str = "/proc/kmsg";
pub const LOGCAT_PATH: &str = "/system/bin/logcat";

/// Kernel ring buffer. Reading `/proc/kmsg` consumes the messages and
/// blocks while the buffer is empty.
#[derive(Debug, Clone)]
pub struct KmsgSource {
    path: PathBuf,
}

impl KmsgSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

impl Default for KmsgSource {
    fn default() -> Self {
        Self::new(KMSG_PATH)
    }
}

impl LogSource for KmsgSource {
    type Handle = File;

    fn open(&mut self) -> io::Result<Self::Handle> {
        File::open(&self.path)
    }

    fn close(&mut self, handle: Self::Handle) {
        drop(handle);
    }
}

/// Output of a `logcat` child process.
#[derive(Debug, Clone)]
pub struct LogcatSource {
    logcat: PathBuf,
    buffer: Option<String>,
}

impl LogcatSource {
    pub fn new<P: Into<PathBuf>>(logcat: P) -> Self {
        Self {
            logcat: logcat.into(),
            buffer: None,
        }
    }

    /// Read from the given log buffers (`-b`), e.g. `all` or `main,kernel`.
    /// An empty value keeps logcat's default buffers, and so does a value
    /// logcat rejects.
    pub fn buffer<S: Into<String>>(mut self, buffer: S) -> Self {
        let buffer = buffer.into().trim().to_string();
        self.buffer = (!buffer.is_empty()).then_some(buffer);
        self
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.logcat);
        if let Some(buffer) = &self.buffer {
            command.arg("-b").arg(buffer);
        }
        command
    }

    /// Run when logcat fails with the requested buffers.
    fn fallback(&self) -> Option<Command> {
        self.buffer.as_ref().map(|_| Command::new(&self.logcat))
    }
}

impl Default for LogcatSource {
    fn default() -> Self {
        Self::new(LOGCAT_PATH)
    }
}

fn spawn(mut command: Command) -> io::Result<(Child, ChildStdout)> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("logcat stdout not captured"))?;
    Ok((child, stdout))
}

pub struct LogcatHandle {
    child: Child,
    stdout: ChildStdout,
    fallback: Option<Command>,
}

impl Read for LogcatHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.stdout.read(buf)?;
        if n > 0 {
            return Ok(n);
        }
        if let Some(fallback) = self.fallback.take() {
            let status = self.child.wait()?;
            if !status.success() {
                log::warn!("logcat exited with {status}, retrying with the default buffers");
                (self.child, self.stdout) = spawn(fallback)?;
                return self.stdout.read(buf);
            }
        }
        Ok(0)
    }
}

impl LogSource for LogcatSource {
    type Handle = LogcatHandle;

    fn open(&mut self) -> io::Result<Self::Handle> {
        let (child, stdout) = spawn(self.command())?;
        Ok(LogcatHandle {
            child,
            stdout,
            fallback: self.fallback(),
        })
    }

    fn close(&mut self, handle: Self::Handle) {
        let LogcatHandle {
            mut child, stdout, ..
        } = handle;
        drop(stdout);
        if let Err(err) = child.kill() {
            log::debug!("Killing logcat failed: {err}");
        }
        match child.wait() {
            Ok(status) => log::debug!("logcat exited with {status}"),
            Err(err) => log::warn!("Waiting for logcat failed: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        fs,
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
    };

    use logdump_core::{tailer::StreamTailer, test_utils::TempDir};

    use super::*;

    #[test]
    fn kmsg_reads_file() {
        let dir = TempDir::new("kmsg-source").unwrap();
        let path = dir.join("kmsg");
        fs::write(&path, "<6>[    0.000000] Booting Linux\n").unwrap();

        let mut source = KmsgSource::new(&path);
        let mut handle = source.open().unwrap();
        let mut content = String::new();
        handle.read_to_string(&mut content).unwrap();
        source.close(handle);

        assert_eq!(content, "<6>[    0.000000] Booting Linux\n");
    }

    #[test]
    fn missing_kmsg_fails_to_open() {
        let dir = TempDir::new("kmsg-missing").unwrap();
        assert!(KmsgSource::new(dir.join("kmsg")).open().is_err());
    }

    #[test]
    fn logcat_command_line() {
        let source = LogcatSource::new("/system/bin/logcat");
        assert_eq!(source.command().get_program(), "/system/bin/logcat");
        assert_eq!(source.command().get_args().count(), 0);
        assert!(source.fallback().is_none());

        // The value is a single argument, never interpreted by a shell.
        let source = LogcatSource::new("/system/bin/logcat").buffer("all; reboot");
        let command = source.command();
        let args: Vec<_> = command.get_args().collect();
        assert_eq!(command.get_program(), "/system/bin/logcat");
        assert_eq!(args, ["-b", "all; reboot"]);
        assert_eq!(source.fallback().unwrap().get_args().count(), 0);

        let source = LogcatSource::new("/system/bin/logcat").buffer("  ");
        assert_eq!(source.command().get_args().count(), 0);
    }

    #[test]
    fn rejected_buffer_falls_back_to_defaults() {
        // `ls` fails on the missing path given after `-b`, and lists the
        // package directory without arguments.
        let mut source = LogcatSource::new("ls").buffer("no-such-buffer");
        let mut handle = source.open().unwrap();
        let mut content = String::new();
        handle.read_to_string(&mut content).unwrap();
        source.close(handle);

        assert!(content.lines().any(|line| line == "Cargo.toml"));
    }

    #[test]
    fn child_process_is_tailed_and_killed() {
        let dir = TempDir::new("logcat-source").unwrap();

        // `yes` never exits on its own, like logcat.
        let running = Arc::new(AtomicBool::new(true));
        let mut tailer = StreamTailer::new("logcat", LogcatSource::new("yes"), &dir);
        let handle = {
            let running = running.clone();
            std::thread::spawn(move || tailer.run(&running))
        };

        let output = dir.join("logcat.txt");
        while fs::read_to_string(&output).map(|s| s.lines().count()).unwrap_or(0) < 2 {
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        running.store(false, Ordering::SeqCst);
        handle.join().unwrap().unwrap();

        let content = fs::read_to_string(&output).unwrap();
        assert!(content.ends_with('\n'));
        assert!(content.lines().all(|line| line == "y"));
    }
}
