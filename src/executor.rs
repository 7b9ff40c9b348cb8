//! Runs a parsed [`Pipeline`].
//!
//! Strategies:
//! - a single stage runs in place. Builtins see the live context and the
//!   caller blocks until an external exits;
//! - when every stage is external, the children are chained with OS pipes
//!   and the shell only waits;
//! - otherwise every builtin stage gets its own worker thread and a detached
//!   context, and externals are spawned as in the previous case.
//!
//! Multi-stage teardown always waits for the last stage first, then kills
//! upstream children that are still running and reaps everything.

use crate::builtin::Builtin;
use crate::command::{CommandSpec, ExitCode, Runnable, Runner, StageIo, Stdin, Stdout};
use crate::context::ExecutionContext;
use crate::error::ShellError;
use crate::external::{ExternalCommand, RunningProcess};
use crate::io_adapters::{SessionStreams, SharedBuffer};
use crate::lexer;
use crate::parser::{Pipeline, RedirectMode, RedirectStream, RedirectionSpec};
use crate::resolver;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::thread::{self, JoinHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    Single,
    AllExternal,
    Mixed,
}

fn select_strategy(stages: &[CommandSpec]) -> Strategy {
    if stages.len() == 1 {
        Strategy::Single
    } else if stages.iter().all(|stage| !stage.is_builtin) {
        Strategy::AllExternal
    } else {
        Strategy::Mixed
    }
}

/// Execute `pipeline` and return the status of its last stage.
///
/// Errors abort only this pipeline; upstream stage failures are reported on
/// `session` directly and do not change the result.
pub fn execute(
    pipeline: Pipeline,
    context: &mut ExecutionContext,
    session: &SessionStreams,
) -> Result<ExitCode, ShellError> {
    if pipeline.is_noop() {
        return Ok(0);
    }
    let Pipeline {
        stages,
        redirection,
    } = pipeline;
    ensure_runnable(&stages)?;

    let Some(redirection) = redirection else {
        return run_stages(stages, session.stdout(), session.stderr(), context, session);
    };

    let target = resolver::resolve(context, &redirection.target);
    if target.is_runnable {
        return run_into_command(stages, redirection.stream, target, context, session);
    }

    let name = stages
        .last()
        .map(|stage| stage.display_name().to_string())
        .unwrap_or_default();
    let file = open_redirection(&redirection, &name, context)?;
    let (stdout, stderr): (Box<dyn Stdout>, Box<dyn Stdout>) = match redirection.stream {
        RedirectStream::Stdout => (Box::new(file), session.stderr()),
        RedirectStream::Stderr => (session.stdout(), Box::new(file)),
    };
    run_stages(stages, stdout, stderr, context, session)
}

fn ensure_runnable(stages: &[CommandSpec]) -> Result<(), ShellError> {
    match stages.iter().find(|stage| !stage.is_runnable) {
        Some(stage) => Err(ShellError::CommandNotFound {
            name: stage.display_name().to_string(),
        }),
        None => Ok(()),
    }
}

fn open_redirection(
    redirection: &RedirectionSpec,
    name: &str,
    context: &ExecutionContext,
) -> Result<File, ShellError> {
    let path = context.resolve_path(Path::new(&redirection.target));
    let mut options = OpenOptions::new();
    options.create(true);
    match redirection.mode {
        RedirectMode::Truncate => options.write(true).truncate(true),
        RedirectMode::Append => options.append(true),
    };
    options.open(&path).map_err(|source| ShellError::Redirection {
        name: name.to_string(),
        path,
        source,
    })
}

/// `left > cmd`: capture the left side's selected stream, then run `cmd`
/// with the captured words as its arguments.
fn run_into_command(
    stages: Vec<CommandSpec>,
    stream: RedirectStream,
    mut target: CommandSpec,
    context: &mut ExecutionContext,
    session: &SessionStreams,
) -> Result<ExitCode, ShellError> {
    let capture = SharedBuffer::new();
    let (stdout, stderr): (Box<dyn Stdout>, Box<dyn Stdout>) = match stream {
        RedirectStream::Stdout => (Box::new(capture.writer()), session.stderr()),
        RedirectStream::Stderr => (session.stdout(), Box::new(capture.writer())),
    };
    let status = run_stages(stages, stdout, stderr, context, session)?;
    log::debug!(
        "left side exited with {status}, feeding {} byte(s) to {}",
        capture.contents().len(),
        target.display_name()
    );

    target.args = lexer::words(&capture.text());
    run_stages(vec![target], session.stdout(), session.stderr(), context, session)
}

/// Run `stages` with the last one writing to `stdout` and `stderr`.
fn run_stages(
    stages: Vec<CommandSpec>,
    stdout: Box<dyn Stdout>,
    stderr: Box<dyn Stdout>,
    context: &mut ExecutionContext,
    session: &SessionStreams,
) -> Result<ExitCode, ShellError> {
    let strategy = select_strategy(&stages);
    log::debug!("running {} stage(s) with {strategy:?}", stages.len());

    match strategy {
        Strategy::Single => {
            let mut stages = stages;
            let Some(spec) = stages.pop() else {
                return Ok(0);
            };
            let io = StageIo::new(session.stdin(), stdout, stderr);
            Runner::for_spec(&spec)?.run_with_streams(&spec, io, context)
        }
        Strategy::AllExternal => run_external_pipeline(stages, stdout, stderr, context, session),
        Strategy::Mixed => run_mixed_pipeline(stages, stdout, stderr, context, session),
    }
}

/// Streams for every stage: one OS pipe per boundary, upstream stderr on
/// the session, the last stage on the given outputs.
fn wire_stages(
    stages: &[CommandSpec],
    stdout: Box<dyn Stdout>,
    stderr: Box<dyn Stdout>,
    session: &SessionStreams,
) -> Result<Vec<StageIo>, ShellError> {
    let mut wiring = Vec::with_capacity(stages.len());
    let mut stdin: Box<dyn Stdin> = session.stdin();
    for stage in &stages[..stages.len().saturating_sub(1)] {
        let (reader, writer) = os_pipe::pipe().map_err(|source| ShellError::Pipe {
            name: stage.display_name().to_string(),
            source,
        })?;
        wiring.push(StageIo::new(stdin, Box::new(writer), session.stderr()));
        stdin = Box::new(reader);
    }
    wiring.push(StageIo::new(stdin, stdout, stderr));
    Ok(wiring)
}

fn run_external_pipeline(
    stages: Vec<CommandSpec>,
    stdout: Box<dyn Stdout>,
    stderr: Box<dyn Stdout>,
    context: &ExecutionContext,
    session: &SessionStreams,
) -> Result<ExitCode, ShellError> {
    let wiring = wire_stages(&stages, stdout, stderr, session)?;
    let mut handles = Vec::with_capacity(stages.len());
    let mut pending = stages.iter().zip(wiring);
    while let Some((spec, io)) = pending.next() {
        match ExternalCommand.spawn(spec, io, context) {
            Ok(process) => handles.push(StageHandle::Process(process)),
            Err(err) => {
                // Close the pipe ends of stages that never started.
                drop(pending);
                abandon(handles, session);
                return Err(err);
            }
        }
    }
    finish(handles, session)
}

fn run_mixed_pipeline(
    stages: Vec<CommandSpec>,
    stdout: Box<dyn Stdout>,
    stderr: Box<dyn Stdout>,
    context: &ExecutionContext,
    session: &SessionStreams,
) -> Result<ExitCode, ShellError> {
    let wiring = wire_stages(&stages, stdout, stderr, session)?;
    let mut handles = Vec::with_capacity(stages.len());
    let mut pending = stages.into_iter().zip(wiring).enumerate();
    while let Some((index, (spec, io))) = pending.next() {
        match launch(index, spec, io, context) {
            Ok(handle) => handles.push(handle),
            Err(err) => {
                drop(pending);
                abandon(handles, session);
                return Err(err);
            }
        }
    }
    finish(handles, session)
}

fn launch(
    index: usize,
    spec: CommandSpec,
    io: StageIo,
    context: &ExecutionContext,
) -> Result<StageHandle, ShellError> {
    let name = spec.display_name().to_string();
    if !spec.is_builtin {
        return ExternalCommand.spawn(&spec, io, context).map(StageHandle::Process);
    }

    let builtin = Builtin::from_name(&name).ok_or_else(|| ShellError::CommandNotFound {
        name: name.clone(),
    })?;
    let mut stage_context = context.detached();
    let worker = thread::Builder::new()
        .name(format!("stage-{index}-{name}"))
        .spawn(move || builtin.run_with_streams(&spec, io, &mut stage_context))
        .map_err(|source| ShellError::Spawn {
            name: name.clone(),
            source,
        })?;
    Ok(StageHandle::Worker { name, worker })
}

/// A running pipeline stage.
enum StageHandle {
    Worker {
        name: String,
        worker: JoinHandle<Result<ExitCode, ShellError>>,
    },
    Process(RunningProcess),
}

impl StageHandle {
    fn name(&self) -> &str {
        match self {
            StageHandle::Worker { name, .. } => name,
            StageHandle::Process(process) => process.name(),
        }
    }

    /// Stop the stage if that is possible. Workers stop on their own once
    /// their pipes close.
    fn cancel(&mut self) {
        if let StageHandle::Process(process) = self {
            process.terminate();
        }
    }

    fn wait(self) -> Result<ExitCode, ShellError> {
        match self {
            StageHandle::Worker { name, worker } => {
                worker.join().unwrap_or_else(|_| {
                    Err(ShellError::Wait {
                        name,
                        reason: "stage panicked".to_string(),
                    })
                })
            }
            StageHandle::Process(mut process) => process.wait(),
        }
    }
}

/// Wait for the last stage, then tear down the rest.
fn finish(
    mut handles: Vec<StageHandle>,
    session: &SessionStreams,
) -> Result<ExitCode, ShellError> {
    let Some(last) = handles.pop() else {
        return Ok(0);
    };
    log::debug!("waiting for last stage {}", last.name());
    let status = last.wait();
    abandon(handles, session);
    status
}

/// Kill still-running stages and reap all of them, reporting their errors.
fn abandon(mut handles: Vec<StageHandle>, session: &SessionStreams) {
    for handle in handles.iter_mut() {
        handle.cancel();
    }
    for handle in handles {
        let name = handle.name().to_string();
        match handle.wait() {
            Ok(code) => log::debug!("upstream stage {name} finished with {code}"),
            Err(err) => session.report(&err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_line;
    use std::collections::HashMap;
    use std::fs;

    fn run(
        line: &str,
        ctx: &mut ExecutionContext,
        session: &SessionStreams,
    ) -> Result<ExitCode, ShellError> {
        let pipeline = parse_line(ctx, line)?;
        execute(pipeline, ctx, session)
    }

    fn stdout_of(session: &SessionStreams) -> String {
        session.captured_stdout().map(SharedBuffer::text).unwrap_or_default()
    }

    fn context_in(dir: &Path) -> ExecutionContext {
        ExecutionContext::with_vars(dir.to_path_buf(), HashMap::new())
    }

    #[test]
    fn test_strategy_selection() {
        let ctx = ExecutionContext::new();
        let stages = |line: &str| parse_line(&ctx, line).unwrap().stages;
        assert_eq!(select_strategy(&stages("echo hi")), Strategy::Single);
        assert_eq!(select_strategy(&stages("echo hi | echo there")), Strategy::Mixed);
        #[cfg(unix)]
        assert_eq!(select_strategy(&stages("cat | cat")), Strategy::AllExternal);
    }

    #[test]
    fn test_noop_line_does_nothing() {
        let session = SessionStreams::captured();
        let mut ctx = context_in(Path::new("/"));
        assert_eq!(run("   ", &mut ctx, &session).unwrap(), 0);
        assert_eq!(run("echo hi |", &mut ctx, &session).unwrap(), 0);
        assert_eq!(stdout_of(&session), "");
    }

    #[test]
    fn test_unknown_command_spawns_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionStreams::captured();
        let mut ctx = context_in(dir.path());
        let err = run("echo hi | nonexistent_cmd > out.txt", &mut ctx, &session).unwrap_err();
        assert!(matches!(
            err,
            ShellError::CommandNotFound { ref name } if name == "nonexistent_cmd"
        ));
        assert!(!dir.path().join("out.txt").exists());
        assert_eq!(stdout_of(&session), "");
    }

    #[test]
    fn test_builtin_output_redirection() {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionStreams::captured();
        let mut ctx = context_in(dir.path());

        run("echo first > out.txt", &mut ctx, &session).unwrap();
        run("echo second 1>> out.txt", &mut ctx, &session).unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("out.txt")).unwrap(), "first\nsecond\n");

        run("echo third > out.txt", &mut ctx, &session).unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("out.txt")).unwrap(), "third\n");
        assert_eq!(stdout_of(&session), "");
    }

    #[test]
    fn test_stderr_redirection_leaves_stdout_alone() {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionStreams::captured();
        let mut ctx = context_in(dir.path());

        run("echo visible 2> err.txt", &mut ctx, &session).unwrap();
        assert_eq!(stdout_of(&session), "visible\n");
        assert_eq!(fs::read_to_string(dir.path().join("err.txt")).unwrap(), "");
    }

    #[test]
    fn test_redirection_open_failure_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let session = SessionStreams::captured();
        let mut ctx = context_in(dir.path());

        let err = run("echo hi > missing/dir/out.txt", &mut ctx, &session).unwrap_err();
        match err {
            ShellError::Redirection { name, path, .. } => {
                assert_eq!(name, "echo");
                assert_eq!(path, dir.path().join("missing/dir/out.txt"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(stdout_of(&session), "");
    }

    #[test]
    fn test_builtin_pipeline_does_not_touch_live_context() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        let session = SessionStreams::captured();
        let mut ctx = context_in(dir.path());

        run("cd sub | echo done", &mut ctx, &session).unwrap();
        assert_eq!(ctx.workspace(), dir.path());
        run("exit | echo still here", &mut ctx, &session).unwrap();
        assert!(!ctx.should_exit());
        assert_eq!(stdout_of(&session), "done\nstill here\n");
    }

    #[test]
    fn test_redirect_into_builtin_command() {
        let session = SessionStreams::captured();
        let mut ctx = context_in(Path::new("/"));
        run("echo hello   'big world' > echo", &mut ctx, &session).unwrap();
        assert_eq!(stdout_of(&session), "hello big world\n");
    }

    #[test]
    fn test_redirect_into_command_replaces_args() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        let session = SessionStreams::captured();
        let mut ctx = context_in(dir.path());

        run("echo sub > cd", &mut ctx, &session).unwrap();
        assert_eq!(ctx.workspace(), dir.path().join("sub"));
        assert!(!dir.path().join("cd").exists());
    }

    #[cfg(unix)]
    mod unix {
        use super::*;

        #[test]
        fn test_builtin_into_external() {
            let session = SessionStreams::captured();
            let mut ctx = ExecutionContext::new();
            let code = run("echo hi | cat", &mut ctx, &session).unwrap();
            assert_eq!(code, 0);
            assert_eq!(stdout_of(&session), "hi\n");
        }

        #[test]
        fn test_endless_producer_into_builtin() {
            let session = SessionStreams::captured();
            let mut ctx = ExecutionContext::new();
            run("yes | echo replaced", &mut ctx, &session).unwrap();
            assert_eq!(stdout_of(&session), "replaced\n");
        }

        #[test]
        fn test_all_external_pipeline_in_workspace() {
            let dir = tempfile::tempdir().unwrap();
            fs::write(dir.path().join("data.txt"), "b\na\nc\n").unwrap();
            let session = SessionStreams::captured();
            let mut ctx = ExecutionContext::new();
            ctx.set_workspace(dir.path()).unwrap();

            let code = run("cat data.txt | sort | head -n 2", &mut ctx, &session).unwrap();
            assert_eq!(code, 0);
            assert_eq!(stdout_of(&session), "a\nb\n");
        }

        #[test]
        fn test_infinite_producer_is_torn_down() {
            let dir = tempfile::tempdir().unwrap();
            fs::write(dir.path().join("log.txt"), "1\n2\n3\n").unwrap();
            let session = SessionStreams::captured();
            let mut ctx = ExecutionContext::new();
            ctx.set_workspace(dir.path()).unwrap();

            let code = run("tail -f log.txt | head -n 2", &mut ctx, &session).unwrap();
            assert_eq!(code, 0);
            assert_eq!(stdout_of(&session), "1\n2\n");
        }

        #[test]
        fn test_external_pipeline_redirection() {
            let dir = tempfile::tempdir().unwrap();
            let session = SessionStreams::captured();
            let mut ctx = ExecutionContext::new();
            ctx.set_workspace(dir.path()).unwrap();

            run("echo one two | tr a-z A-Z >> out.txt", &mut ctx, &session).unwrap();
            run("echo three | tr a-z A-Z >> out.txt", &mut ctx, &session).unwrap();
            assert_eq!(
                fs::read_to_string(dir.path().join("out.txt")).unwrap(),
                "ONE TWO\nTHREE\n"
            );
            assert_eq!(stdout_of(&session), "");
        }

        #[test]
        fn test_external_stderr_redirection() {
            let dir = tempfile::tempdir().unwrap();
            let session = SessionStreams::captured();
            let mut ctx = ExecutionContext::new();
            ctx.set_workspace(dir.path()).unwrap();

            run("ls nonexistent_entry 2> err.txt", &mut ctx, &session).unwrap();
            let err = fs::read_to_string(dir.path().join("err.txt")).unwrap();
            assert!(err.contains("nonexistent_entry"));
            assert_eq!(session.captured_stderr().map(SharedBuffer::text).unwrap(), "");
        }

        #[test]
        fn test_status_of_last_stage() {
            let session = SessionStreams::captured();
            let mut ctx = ExecutionContext::new();
            assert_eq!(run("true | false", &mut ctx, &session).unwrap(), 1);
            assert_eq!(run("false | true", &mut ctx, &session).unwrap(), 0);
            assert_eq!(run("echo x | false", &mut ctx, &session).unwrap(), 1);
        }
    }
}
