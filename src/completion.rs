use crate::context::ExecutionContext;
use crate::resolver;
use rustyline::completion::{Completer, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{Context, Helper};

/// Tab completion of command names for the line editor.
///
/// Only the first word of a line is completed. The completer works on a
/// snapshot of the session context refreshed before each prompt.
pub struct CommandCompleter {
    context: ExecutionContext,
}

impl CommandCompleter {
    pub fn new(context: &ExecutionContext) -> Self {
        Self {
            context: context.detached(),
        }
    }

    /// Pick up workspace and `PATH` changes made by the last command.
    pub fn refresh(&mut self, context: &ExecutionContext) {
        self.context = context.detached();
    }

    /// Candidates for the word ending at `pos`, with the offset it starts at.
    pub fn candidates(&self, line: &str, pos: usize) -> (usize, Vec<Pair>) {
        let head = &line[..pos.min(line.len())];
        let start = head.len() - head.trim_start().len();
        let word = &head[start..];
        if word.chars().any(char::is_whitespace) {
            return (pos, Vec::new());
        }
        (start, command_matches(resolver::command_names(&self.context, word)))
    }
}

/// Turn matching names into candidates. A single match is completed with a
/// trailing space so the next argument can follow directly.
pub fn command_matches(names: Vec<String>) -> Vec<Pair> {
    let single = names.len() == 1;
    names
        .into_iter()
        .map(|name| Pair {
            replacement: if single { format!("{name} ") } else { name.clone() },
            display: name,
        })
        .collect()
}

impl Completer for CommandCompleter {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        Ok(self.candidates(line, pos))
    }
}

impl Hinter for CommandCompleter {
    type Hint = String;
}

impl Highlighter for CommandCompleter {}

impl Validator for CommandCompleter {}

impl Helper for CommandCompleter {}
