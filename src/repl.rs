use crate::command::ExitCode;
use crate::completion::CommandCompleter;
use crate::context::ExecutionContext;
use crate::interpreter::{Flow, Interpreter};
use anyhow::Result;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{CompletionType, Config, Editor};
use std::io::{BufRead, Write};

/// One read attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Input(String),
    /// Ctrl-C: drop the current line and prompt again.
    Interrupted,
    Eof,
}

/// Supplies input lines to the read loop.
pub trait LineSource {
    fn read_line(&mut self, prompt: &str) -> Result<Line>;

    /// Called before each prompt with the current session state.
    fn sync(&mut self, _context: &ExecutionContext) {}

    /// Remember an accepted line for in-editor recall.
    fn add_history(&mut self, _line: &str) {}
}

/// Interactive editor with line editing and command-name completion.
pub struct EditorSource {
    editor: Editor<CommandCompleter, DefaultHistory>,
}

impl EditorSource {
    pub fn new(context: &ExecutionContext) -> Result<Self> {
        let config = Config::builder()
            .completion_type(CompletionType::List)
            .auto_add_history(false)
            .build();
        let mut editor = Editor::with_config(config)?;
        editor.set_helper(Some(CommandCompleter::new(context)));
        Ok(Self { editor })
    }
}

impl LineSource for EditorSource {
    fn read_line(&mut self, prompt: &str) -> Result<Line> {
        match self.editor.readline(prompt) {
            Ok(line) => Ok(Line::Input(line)),
            Err(ReadlineError::Interrupted) => Ok(Line::Interrupted),
            Err(ReadlineError::Eof) => Ok(Line::Eof),
            Err(err) => Err(err.into()),
        }
    }

    fn sync(&mut self, context: &ExecutionContext) {
        if let Some(helper) = self.editor.helper_mut() {
            helper.refresh(context);
        }
    }

    fn add_history(&mut self, line: &str) {
        if let Err(err) = self.editor.add_history_entry(line) {
            log::debug!("line editor rejected history entry: {err}");
        }
    }
}

/// Line-by-line reader for piped input. The prompt is still printed.
pub struct PlainSource<R, W> {
    input: R,
    prompt_out: W,
}

impl<R: BufRead, W: Write> PlainSource<R, W> {
    pub fn new(input: R, prompt_out: W) -> Self {
        Self { input, prompt_out }
    }
}

impl<R: BufRead, W: Write> LineSource for PlainSource<R, W> {
    fn read_line(&mut self, prompt: &str) -> Result<Line> {
        write!(self.prompt_out, "{prompt}")?;
        self.prompt_out.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(Line::Eof);
        }
        let trimmed = line.trim_end_matches(['\n', '\r']);
        Ok(Line::Input(trimmed.to_string()))
    }
}

/// Read and evaluate lines until `exit` or end of input.
///
/// End of input flushes pending history just like `exit`. The returned
/// status is 0 either way.
pub fn run(
    interpreter: &mut Interpreter,
    source: &mut dyn LineSource,
    prompt: &str,
) -> Result<ExitCode> {
    log::info!("session started in {}", interpreter.context().workspace().display());
    loop {
        source.sync(interpreter.context());
        let line = match source.read_line(prompt)? {
            Line::Input(line) => line,
            Line::Interrupted => continue,
            Line::Eof => {
                interpreter.finish();
                break;
            }
        };

        if !line.trim().is_empty() {
            source.add_history(&line);
        }
        if interpreter.eval_input(&line) == Flow::Exit {
            break;
        }
    }
    log::info!("session finished");
    Ok(0)
}
