use crate::command::{
    InheritedStderr, InheritedStdin, InheritedStdout, StageIo, Stdin, Stdout, Wiring,
};
use crate::error::ShellError;
use std::io::{self, Cursor, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};

/// Growable byte buffer shared between a writer and whoever reads the result.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        // A writer that panicked mid-write leaves valid bytes behind.
        self.bytes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn contents(&self) -> Vec<u8> {
        self.lock().clone()
    }

    /// Contents decoded as UTF-8, invalid sequences replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.lock()).into_owned()
    }

    pub fn writer(&self) -> MemWriter {
        MemWriter {
            buf: self.clone(),
        }
    }
}

/// Memory-backed reader. Clones share the read position.
#[derive(Debug, Clone)]
pub struct MemReader {
    cursor: Arc<Mutex<Cursor<Vec<u8>>>>,
}

impl MemReader {
    /// Create a MemReader that will read from the provided buffer.
    pub fn new(buf: Vec<u8>) -> Self {
        Self {
            cursor: Arc::new(Mutex::new(Cursor::new(buf))),
        }
    }
}

impl Read for MemReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        self.cursor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .read(out)
    }
}

impl Stdin for MemReader {
    fn wiring(self: Box<Self>) -> Wiring<Box<dyn Read + Send>> {
        Wiring::Relay(self)
    }
}

/// Memory-backed writer appending to a [`SharedBuffer`].
#[derive(Debug, Clone)]
pub struct MemWriter {
    buf: SharedBuffer,
}

impl Write for MemWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.lock().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Stdout for MemWriter {
    fn wiring(self: Box<Self>) -> Wiring<Box<dyn Write + Send>> {
        Wiring::Relay(self)
    }
}

/// Where a session reads input and sends output.
///
/// `Inherit` is the real terminal or whatever the shell's own descriptors
/// point at. `Captured` keeps everything in memory, which is how batch runs
/// and tests observe the shell.
#[derive(Debug, Clone)]
pub enum SessionStreams {
    Inherit,
    Captured {
        stdin: MemReader,
        stdout: SharedBuffer,
        stderr: SharedBuffer,
    },
}

impl SessionStreams {
    /// Captured streams with empty input.
    pub fn captured() -> Self {
        Self::captured_with_input(Vec::new())
    }

    pub fn captured_with_input(input: Vec<u8>) -> Self {
        SessionStreams::Captured {
            stdin: MemReader::new(input),
            stdout: SharedBuffer::new(),
            stderr: SharedBuffer::new(),
        }
    }

    pub fn stdin(&self) -> Box<dyn Stdin> {
        match self {
            SessionStreams::Inherit => Box::new(InheritedStdin(io::stdin())),
            SessionStreams::Captured { stdin, .. } => Box::new(stdin.clone()),
        }
    }

    pub fn stdout(&self) -> Box<dyn Stdout> {
        match self {
            SessionStreams::Inherit => Box::new(InheritedStdout(io::stdout())),
            SessionStreams::Captured { stdout, .. } => Box::new(stdout.writer()),
        }
    }

    pub fn stderr(&self) -> Box<dyn Stdout> {
        match self {
            SessionStreams::Inherit => Box::new(InheritedStderr(io::stderr())),
            SessionStreams::Captured { stderr, .. } => Box::new(stderr.writer()),
        }
    }

    pub fn stage_io(&self) -> StageIo {
        StageIo::new(self.stdin(), self.stdout(), self.stderr())
    }

    /// Captured standard output, `None` when inherited.
    pub fn captured_stdout(&self) -> Option<&SharedBuffer> {
        match self {
            SessionStreams::Inherit => None,
            SessionStreams::Captured { stdout, .. } => Some(stdout),
        }
    }

    /// Captured standard error, `None` when inherited.
    pub fn captured_stderr(&self) -> Option<&SharedBuffer> {
        match self {
            SessionStreams::Inherit => None,
            SessionStreams::Captured { stderr, .. } => Some(stderr),
        }
    }

    /// Print `err` on the stream it belongs to.
    pub fn report(&self, err: &ShellError) {
        let mut target = if err.reports_to_stdout() {
            self.stdout()
        } else {
            self.stderr()
        };
        if let Err(write_err) = writeln!(target, "{err}").and_then(|_| target.flush()) {
            log::warn!("failed to report {err:?}: {write_err}");
        }
    }
}
