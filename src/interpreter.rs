use crate::command::ExitCode;
use crate::context::ExecutionContext;
use crate::error::ShellError;
use crate::executor;
use crate::io_adapters::SessionStreams;
use crate::parser;
use std::io;
use std::path::Path;

/// What the read loop should do after a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// A shell session: evaluates input lines against one [`ExecutionContext`].
///
/// Example
/// ```
/// use pipeshell::{ExecutionContext, Flow, Interpreter, SessionStreams};
///
/// let session = SessionStreams::captured();
/// let mut sh = Interpreter::new(ExecutionContext::new(), session.clone());
/// assert_eq!(sh.eval_input("echo hello world"), Flow::Continue);
/// assert_eq!(session.captured_stdout().unwrap().text(), "hello world\n");
/// assert_eq!(sh.eval_input("exit"), Flow::Exit);
/// ```
pub struct Interpreter {
    context: ExecutionContext,
    session: SessionStreams,
    last_status: ExitCode,
}

impl Interpreter {
    pub fn new(context: ExecutionContext, session: SessionStreams) -> Self {
        Self {
            context,
            session,
            last_status: 0,
        }
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut ExecutionContext {
        &mut self.context
    }

    pub fn session(&self) -> &SessionStreams {
        &self.session
    }

    /// Status of the most recent pipeline.
    pub fn last_status(&self) -> ExitCode {
        self.last_status
    }

    /// Read the start-up history file. A missing file is not an error; the
    /// path is still remembered for the flush on exit.
    pub fn load_history(&mut self, file: &Path) {
        let path = self.context.resolve_path(file);
        match self.context.history_mut().load(&path) {
            Ok(()) => log::info!(
                "loaded {} history entries from {}",
                self.context.history().entries().len(),
                path.display()
            ),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                log::debug!("no history at {}", path.display())
            }
            Err(err) => log::warn!("failed to read history from {}: {err}", path.display()),
        }
    }

    /// Record, parse and run one line of input.
    pub fn eval_input(&mut self, line: &str) -> Flow {
        self.context.history_mut().record(line);

        let result = parser::parse_line(&self.context, line)
            .and_then(|pipeline| executor::execute(pipeline, &mut self.context, &self.session));
        self.last_status = match result {
            Ok(status) => status,
            Err(err) => {
                self.session.report(&err);
                failure_status(&err)
            }
        };

        if self.context.should_exit() {
            Flow::Exit
        } else {
            Flow::Continue
        }
    }

    /// End the session as `exit` would: flush pending history.
    pub fn finish(&mut self) {
        if !self.context.should_exit() {
            self.context.request_exit();
        }
    }
}

fn failure_status(err: &ShellError) -> ExitCode {
    match err {
        ShellError::CommandNotFound { .. } => 127,
        ShellError::MissingRedirectTarget => 2,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;

    fn interpreter_in(dir: &Path) -> (Interpreter, SessionStreams) {
        let session = SessionStreams::captured();
        let mut vars = HashMap::new();
        vars.insert("HOME".to_string(), dir.display().to_string());
        let ctx = ExecutionContext::with_vars(dir.to_path_buf(), vars);
        (Interpreter::new(ctx, session.clone()), session)
    }

    fn stdout(session: &SessionStreams) -> String {
        session.captured_stdout().unwrap().text()
    }

    fn stderr(session: &SessionStreams) -> String {
        session.captured_stderr().unwrap().text()
    }

    #[test]
    fn test_command_not_found_goes_to_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let (mut sh, session) = interpreter_in(dir.path());
        assert_eq!(sh.eval_input("nonexistent_cmd a b"), Flow::Continue);
        assert_eq!(stdout(&session), "nonexistent_cmd: command not found\n");
        assert_eq!(stderr(&session), "");
        assert_eq!(sh.last_status(), 127);
    }

    #[test]
    fn test_syntax_error_goes_to_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let (mut sh, session) = interpreter_in(dir.path());
        sh.eval_input("echo hi >");
        assert_eq!(stderr(&session), "syntax error near unexpected token `newline'\n");
        assert_eq!(stdout(&session), "");
    }

    #[test]
    fn test_history_records_every_line_before_running() {
        let dir = tempfile::tempdir().unwrap();
        let (mut sh, session) = interpreter_in(dir.path());
        sh.eval_input("echo one");
        sh.eval_input("   ");
        sh.eval_input("  nonexistent_cmd  ");
        sh.eval_input("history");
        assert_eq!(
            stdout(&session),
            concat!(
                "one\n",
                "nonexistent_cmd: command not found\n",
                "    1  echo one\n",
                "    2  nonexistent_cmd\n",
                "    3  history\n",
            )
        );
    }

    #[test]
    fn test_exit_flushes_loaded_history_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join(".history");
        fs::write(&file, "old\n").unwrap();

        let (mut sh, _session) = interpreter_in(dir.path());
        sh.load_history(Path::new(".history"));
        assert_eq!(sh.eval_input("echo new"), Flow::Continue);
        assert_eq!(sh.eval_input("exit"), Flow::Exit);

        assert_eq!(fs::read_to_string(&file).unwrap(), "old\necho new\nexit\n");
    }

    #[test]
    fn test_finish_flushes_like_exit() {
        let dir = tempfile::tempdir().unwrap();
        let (mut sh, _session) = interpreter_in(dir.path());
        sh.load_history(Path::new("fresh_history"));
        sh.eval_input("pwd");
        sh.finish();
        assert_eq!(
            fs::read_to_string(dir.path().join("fresh_history")).unwrap(),
            "pwd\n"
        );
    }

    #[test]
    fn test_cd_changes_following_commands() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("inner")).unwrap();
        let (mut sh, session) = interpreter_in(dir.path());
        sh.eval_input("cd inner");
        sh.eval_input("pwd");
        sh.eval_input("cd ..");
        sh.eval_input("pwd");
        assert_eq!(
            stdout(&session),
            format!("{}\n{}\n", dir.path().join("inner").display(), dir.path().display())
        );
    }
}
