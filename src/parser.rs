//! Turns a token stream into a [`Pipeline`].
//!
//! Grammar, informally:
//!
//! ```text
//! line     := segment ('|' segment)* redirect?
//! segment  := word*
//! redirect := ('>' | '1>' | '>>' | '1>>' | '2>' | '2>>') word ...
//! ```
//!
//! A redirection ends parsing: its first word is the target and everything
//! after it, including further pipes, is dropped. The redirection therefore
//! always belongs to the last stage of the pipeline.

use crate::command::CommandSpec;
use crate::context::ExecutionContext;
use crate::error::ShellError;
use crate::lexer::{self, Token};
use crate::resolver;

/// Which stream of the redirected stage is rebound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectStream {
    Stdout,
    Stderr,
}

/// How a redirection target file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectMode {
    /// Create the file or truncate it.
    Truncate,
    /// Create the file or append to it.
    Append,
}

/// The single redirection honored on a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectionSpec {
    /// First word after the operator: a file path, or a command name for the
    /// redirect-into-command form.
    pub target: String,
    pub stream: RedirectStream,
    pub mode: RedirectMode,
}

/// Resolved stages of one input line plus its optional redirection.
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// At least one stage. A stage without a name marks a blank segment.
    pub stages: Vec<CommandSpec>,
    pub redirection: Option<RedirectionSpec>,
}

impl Pipeline {
    /// True when there is nothing to run: blank line or an empty segment.
    pub fn is_noop(&self) -> bool {
        self.stages.is_empty() || self.stages.iter().any(|stage| stage.name.is_none())
    }
}

struct PipelineBuilder {
    tokens: Vec<Token>,
    pos: usize,
}

impl PipelineBuilder {
    fn from(tokens: Vec<Token>) -> Self {
        PipelineBuilder { tokens, pos: 0 }
    }

    fn consume(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Split words into segments and pick up the first redirection.
    fn split(mut self) -> Result<(Vec<Vec<String>>, Option<RedirectionSpec>), ShellError> {
        let mut segments: Vec<Vec<String>> = vec![Vec::new()];
        let mut redirection = None;

        while let Some(token) = self.consume() {
            match token {
                Token::Word(word) => {
                    if let Some(segment) = segments.last_mut() {
                        segment.push(word);
                    }
                }
                Token::Pipe => segments.push(Vec::new()),
                operator => {
                    let Some((stream, mode)) = operator.redirection() else {
                        continue;
                    };
                    let target = match self.consume() {
                        Some(Token::Word(target)) => target,
                        _ => return Err(ShellError::MissingRedirectTarget),
                    };
                    if self.pos < self.tokens.len() {
                        log::debug!(
                            "ignoring {} token(s) after redirection target {target:?}",
                            self.tokens.len() - self.pos
                        );
                    }
                    redirection = Some(RedirectionSpec {
                        target,
                        stream,
                        mode,
                    });
                    break;
                }
            }
        }

        Ok((segments, redirection))
    }
}

/// Parse one input line into a resolved [`Pipeline`].
///
/// Arguments starting with `~` are expanded against `HOME` from `context`.
/// A blank line yields a no-op pipeline; the only error is a redirection
/// operator that is missing its target.
pub fn parse_line(context: &ExecutionContext, line: &str) -> Result<Pipeline, ShellError> {
    let (segments, redirection) = PipelineBuilder::from(lexer::tokenize(line)).split()?;
    let home = context.var("HOME");

    let stages = segments
        .into_iter()
        .map(|words| {
            let mut words = words.into_iter();
            match words.next() {
                Some(name) => {
                    let args = words
                        .map(|arg| expand_tilde(&arg, home.as_deref()))
                        .collect();
                    resolver::resolve(context, &name).with_args(args)
                }
                None => CommandSpec::empty(context.workspace()),
            }
        })
        .collect();

    let pipeline = Pipeline {
        stages,
        redirection,
    };
    log::debug!("parsed {line:?} into {pipeline:?}");
    Ok(pipeline)
}

/// Expand a leading `~` (alone or followed by `/`) to `home`.
pub fn expand_tilde(word: &str, home: Option<&str>) -> String {
    match home {
        Some(home) if !home.is_empty() => {
            if word == "~" {
                home.to_string()
            } else if let Some(rest) = word.strip_prefix("~/") {
                format!("{}/{}", home.trim_end_matches('/'), rest)
            } else {
                word.to_string()
            }
        }
        _ => word.to_string(),
    }
}
