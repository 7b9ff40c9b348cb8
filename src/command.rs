use crate::builtin::Builtin;
use crate::context::ExecutionContext;
use crate::error::ShellError;
use crate::external::ExternalCommand;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
pub type ExitCode = i32;

/// One stage of a pipeline after name resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// `None` for an empty segment, which makes the whole line a no-op.
    pub name: Option<String>,
    pub args: Vec<String>,
    pub resolved_path: Option<PathBuf>,
    pub is_builtin: bool,
    pub is_runnable: bool,
    /// Working directory for the stage, captured when the line was parsed.
    pub workspace: PathBuf,
}

impl CommandSpec {
    pub fn empty(workspace: &Path) -> Self {
        Self {
            name: None,
            args: Vec::new(),
            resolved_path: None,
            is_builtin: false,
            is_runnable: false,
            workspace: workspace.to_path_buf(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Name used in diagnostics.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }
}

/// How a stream can be handed to a child process.
pub enum Wiring<T> {
    /// An OS handle the child can use directly.
    Native(Stdio),
    /// An in-process stream; bytes have to be relayed by a thread.
    Relay(T),
}

/// Abstraction over a readable input stream that knows how it is wired into
/// a spawned process.
pub trait Stdin: Read + Send {
    fn wiring(self: Box<Self>) -> Wiring<Box<dyn Read + Send>>;
}

/// Abstraction over a writable output stream that knows how it is wired into
/// a spawned process. Used for both standard output and standard error.
pub trait Stdout: Write + Send {
    fn wiring(self: Box<Self>) -> Wiring<Box<dyn Write + Send>>;
}

/// The process's own standard input.
pub struct InheritedStdin(pub io::Stdin);

impl Read for InheritedStdin {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl Stdin for InheritedStdin {
    fn wiring(self: Box<Self>) -> Wiring<Box<dyn Read + Send>> {
        Wiring::Native(Stdio::inherit())
    }
}

/// The process's own standard output.
pub struct InheritedStdout(pub io::Stdout);

impl Write for InheritedStdout {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl Stdout for InheritedStdout {
    fn wiring(mut self: Box<Self>) -> Wiring<Box<dyn Write + Send>> {
        // Anything a builtin buffered must land before the child writes.
        let _ = self.0.flush();
        Wiring::Native(Stdio::inherit())
    }
}

/// The process's own standard error.
pub struct InheritedStderr(pub io::Stderr);

impl Write for InheritedStderr {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl Stdout for InheritedStderr {
    fn wiring(self: Box<Self>) -> Wiring<Box<dyn Write + Send>> {
        Wiring::Native(Stdio::inherit())
    }
}

impl Stdin for File {
    fn wiring(self: Box<Self>) -> Wiring<Box<dyn Read + Send>> {
        Wiring::Native(Stdio::from(*self))
    }
}

impl Stdout for File {
    fn wiring(self: Box<Self>) -> Wiring<Box<dyn Write + Send>> {
        Wiring::Native(Stdio::from(*self))
    }
}

impl Stdin for os_pipe::PipeReader {
    fn wiring(self: Box<Self>) -> Wiring<Box<dyn Read + Send>> {
        Wiring::Native(Stdio::from(*self))
    }
}

impl Stdout for os_pipe::PipeWriter {
    fn wiring(self: Box<Self>) -> Wiring<Box<dyn Write + Send>> {
        Wiring::Native(Stdio::from(*self))
    }
}

/// Standard streams of one pipeline stage.
pub struct StageIo {
    pub stdin: Box<dyn Stdin>,
    pub stdout: Box<dyn Stdout>,
    pub stderr: Box<dyn Stdout>,
}

impl StageIo {
    pub fn new(stdin: Box<dyn Stdin>, stdout: Box<dyn Stdout>, stderr: Box<dyn Stdout>) -> Self {
        Self {
            stdin,
            stdout,
            stderr,
        }
    }

    /// The process's standard streams.
    pub fn inherit() -> Self {
        Self::new(
            Box::new(InheritedStdin(io::stdin())),
            Box::new(InheritedStdout(io::stdout())),
            Box::new(InheritedStderr(io::stderr())),
        )
    }
}

/// Anything the shell can run: a builtin handler or an external program.
///
/// Both kinds take the same injected streams, so the executor can place them
/// anywhere in a pipeline.
pub trait Runnable {
    /// Run to completion with the given streams. Streams are dropped, and
    /// therefore closed, before this returns.
    fn run_with_streams(
        &self,
        spec: &CommandSpec,
        io: StageIo,
        context: &mut ExecutionContext,
    ) -> Result<ExitCode, ShellError>;

    /// Run bound to the process's standard streams.
    fn run(
        &self,
        spec: &CommandSpec,
        context: &mut ExecutionContext,
    ) -> Result<ExitCode, ShellError> {
        self.run_with_streams(spec, StageIo::inherit(), context)
    }
}

/// The runner picked for a resolved [`CommandSpec`].
pub enum Runner {
    Builtin(Builtin),
    External(ExternalCommand),
}

impl Runner {
    pub fn for_spec(spec: &CommandSpec) -> Result<Self, ShellError> {
        let not_found = || ShellError::CommandNotFound {
            name: spec.display_name().to_string(),
        };
        if !spec.is_runnable {
            return Err(not_found());
        }
        if spec.is_builtin {
            spec.name
                .as_deref()
                .and_then(Builtin::from_name)
                .map(Runner::Builtin)
                .ok_or_else(not_found)
        } else {
            Ok(Runner::External(ExternalCommand))
        }
    }
}

impl Runnable for Runner {
    fn run_with_streams(
        &self,
        spec: &CommandSpec,
        io: StageIo,
        context: &mut ExecutionContext,
    ) -> Result<ExitCode, ShellError> {
        match self {
            Runner::Builtin(builtin) => builtin.run_with_streams(spec, io, context),
            Runner::External(external) => external.run_with_streams(spec, io, context),
        }
    }
}
