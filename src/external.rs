use crate::command::{CommandSpec, ExitCode, Runnable, StageIo, Wiring};
use crate::context::ExecutionContext;
use crate::error::ShellError;
use std::io::{self, Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};

/// Command that is not a builtin.
///
/// The program is the resolved executable path; `argv[0]` is the name the
/// user typed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExternalCommand;

impl ExternalCommand {
    /// Start the program without waiting for it.
    ///
    /// Native streams are handed to the child directly. In-memory streams are
    /// connected through pipes with one relay thread each.
    pub fn spawn(
        &self,
        spec: &CommandSpec,
        io: StageIo,
        context: &ExecutionContext,
    ) -> Result<RunningProcess, ShellError> {
        let name = spec.display_name().to_string();
        let Some(program) = spec.resolved_path.as_ref() else {
            return Err(ShellError::CommandNotFound { name });
        };

        let StageIo {
            stdin,
            stdout,
            stderr,
        } = io;
        let (stdin, stdin_relay) = match stdin.wiring() {
            Wiring::Native(stdio) => (stdio, None),
            Wiring::Relay(reader) => (Stdio::piped(), Some(reader)),
        };
        let (stdout, stdout_relay) = split_output(stdout.wiring());
        let (stderr, stderr_relay) = split_output(stderr.wiring());

        // The command owns the parent's copies of the stream handles; they
        // are closed as soon as it goes out of scope.
        let mut child = {
            let mut command = Command::new(program);
            command
                .args(&spec.args)
                .env_clear()
                .envs(context.vars())
                .env("PWD", &spec.workspace)
                .current_dir(&spec.workspace)
                .stdin(stdin)
                .stdout(stdout)
                .stderr(stderr);
            #[cfg(unix)]
            {
                use std::os::unix::process::CommandExt;
                command.arg0(&name);
            }
            command.spawn().map_err(|source| ShellError::Spawn {
                name: name.clone(),
                source,
            })?
        };
        log::debug!("spawned {name} as pid {}", child.id());

        let mut relays = Vec::new();
        if let (Some(mut reader), Some(mut pipe)) = (stdin_relay, child.stdin.take()) {
            relays.push(thread::spawn(move || {
                // The child may exit without reading everything.
                let _ = io::copy(&mut reader, &mut pipe);
            }));
        }
        if let (Some(writer), Some(pipe)) = (stdout_relay, child.stdout.take()) {
            relays.push(relay_output(pipe, writer));
        }
        if let (Some(writer), Some(pipe)) = (stderr_relay, child.stderr.take()) {
            relays.push(relay_output(pipe, writer));
        }

        Ok(RunningProcess {
            name,
            child,
            relays,
        })
    }
}

fn split_output(wiring: Wiring<Box<dyn Write + Send>>) -> (Stdio, Option<Box<dyn Write + Send>>) {
    match wiring {
        Wiring::Native(stdio) => (stdio, None),
        Wiring::Relay(writer) => (Stdio::piped(), Some(writer)),
    }
}

fn relay_output(
    mut pipe: impl Read + Send + 'static,
    mut writer: Box<dyn Write + Send>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        if let Err(err) = io::copy(&mut pipe, &mut writer).and_then(|_| writer.flush()) {
            log::debug!("output relay stopped: {err}");
        }
    })
}

impl Runnable for ExternalCommand {
    fn run_with_streams(
        &self,
        spec: &CommandSpec,
        io: StageIo,
        context: &mut ExecutionContext,
    ) -> Result<ExitCode, ShellError> {
        self.spawn(spec, io, context)?.wait()
    }
}

/// A spawned child together with the threads relaying its in-memory streams.
///
/// Dropping a process that is still running kills and reaps it.
pub struct RunningProcess {
    name: String,
    child: Child,
    relays: Vec<JoinHandle<()>>,
}

impl RunningProcess {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the child to exit, then for its relays to drain.
    pub fn wait(&mut self) -> Result<ExitCode, ShellError> {
        let status = self.child.wait().map_err(|err| ShellError::Wait {
            name: self.name.clone(),
            reason: err.to_string(),
        })?;
        for relay in self.relays.drain(..) {
            if relay.join().is_err() {
                log::warn!("{}: stream relay panicked", self.name);
            }
        }
        let code = exit_code(status);
        log::debug!("{} exited with {code}", self.name);
        Ok(code)
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Kill the child if it has not exited yet. Reaping is left to `wait`.
    pub fn terminate(&mut self) {
        if self.is_running() {
            log::debug!("terminating {} (pid {})", self.name, self.child.id());
            if let Err(err) = self.child.kill() {
                log::debug!("failed to kill {}: {err}", self.name);
            }
        }
    }
}

impl Drop for RunningProcess {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

fn exit_code(status: ExitStatus) -> ExitCode {
    match status.code() {
        Some(code) => code,
        None => terminated_by_signal(status),
    }
}

#[cfg(unix)]
fn terminated_by_signal(exit_status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    if let Some(signal) = ExitStatusExt::signal(&exit_status) {
        128 + signal
    } else if ExitStatusExt::core_dumped(&exit_status) {
        255
    } else {
        -1
    }
}

#[cfg(not(unix))]
fn terminated_by_signal(_exit_status: ExitStatus) -> i32 {
    -1
}
