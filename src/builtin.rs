use crate::command::{CommandSpec, ExitCode, Runnable, StageIo};
use crate::context::ExecutionContext;
use crate::error::ShellError;
use crate::parser::expand_tilde;
use crate::resolver;
use anyhow::{Context, Result};
use argh::{EarlyExit, FromArgs};
use std::io::{self, Read, Write};
use std::path::Path;

/// Built-in commands known to the shell at compile time.
///
/// Most builtins are parsed with [`argh`] and all of them execute in-process
/// without spawning a child.
pub(crate) trait BuiltinCommand: Sized {
    /// Canonical name of the command, e.g. "echo" or "cd".
    const NAME: &'static str;

    /// Parse the arguments that follow the command name.
    fn parse(args: &[&str]) -> Result<Self, EarlyExit>;

    /// Executes the command using provided IO streams and context.
    ///
    /// Return value should follow shell conventions: 0 for success, non-zero for error.
    fn execute(
        self,
        stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
        context: &mut ExecutionContext,
    ) -> Result<ExitCode>;
}

fn parse_with_argh<T: FromArgs>(name: &str, args: &[&str]) -> Result<T, EarlyExit> {
    T::from_args(&[name], args)
}

/// The builtin table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Echo,
    Exit,
    Type,
    Pwd,
    Cd,
    History,
}

impl Builtin {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "echo" => Some(Builtin::Echo),
            "exit" => Some(Builtin::Exit),
            "type" => Some(Builtin::Type),
            "pwd" => Some(Builtin::Pwd),
            "cd" => Some(Builtin::Cd),
            "history" => Some(Builtin::History),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Echo => Echo::NAME,
            Builtin::Exit => Exit::NAME,
            Builtin::Type => Type::NAME,
            Builtin::Pwd => Pwd::NAME,
            Builtin::Cd => Cd::NAME,
            Builtin::History => HistoryCmd::NAME,
        }
    }
}

impl Runnable for Builtin {
    fn run_with_streams(
        &self,
        spec: &CommandSpec,
        io: StageIo,
        context: &mut ExecutionContext,
    ) -> Result<ExitCode, ShellError> {
        let args: Vec<&str> = spec.args.iter().map(String::as_str).collect();
        match self {
            Builtin::Echo => run_builtin::<Echo>(&args, io, context),
            Builtin::Exit => run_builtin::<Exit>(&args, io, context),
            Builtin::Type => run_builtin::<Type>(&args, io, context),
            Builtin::Pwd => run_builtin::<Pwd>(&args, io, context),
            Builtin::Cd => run_builtin::<Cd>(&args, io, context),
            Builtin::History => run_builtin::<HistoryCmd>(&args, io, context),
        }
    }
}

/// Status of a builtin that stopped because its reader went away.
const BROKEN_PIPE_STATUS: ExitCode = 128 + 13;

fn run_builtin<T: BuiltinCommand>(
    args: &[&str],
    io: StageIo,
    context: &mut ExecutionContext,
) -> Result<ExitCode, ShellError> {
    let StageIo {
        mut stdin,
        mut stdout,
        mut stderr,
    } = io;

    let outcome = match T::parse(args) {
        Ok(cmd) => cmd.execute(&mut stdin, &mut stdout, &mut stderr, context),
        Err(EarlyExit { output, status }) => {
            let (target, code) = match status {
                Ok(()) => (&mut stdout, 0),
                Err(()) => (&mut stderr, 1),
            };
            target
                .write_all(output.as_bytes())
                .map(|_| code)
                .map_err(anyhow::Error::from)
        }
    };
    let outcome = outcome.and_then(|code| {
        stdout.flush()?;
        stderr.flush()?;
        Ok(code)
    });

    match outcome {
        Ok(code) => Ok(code),
        Err(err) if is_broken_pipe(&err) => {
            log::debug!("{}: output closed early", T::NAME);
            Ok(BROKEN_PIPE_STATUS)
        }
        Err(err) => Err(ShellError::Builtin {
            name: T::NAME.to_string(),
            message: format!("{err:#}"),
        }),
    }
}

fn is_broken_pipe(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<io::Error>()
            .is_some_and(|io_err| io_err.kind() == io::ErrorKind::BrokenPipe)
    })
}

/// Write the arguments separated by spaces, followed by a newline unless the
/// first argument is `-n`.
///
/// Parsed by hand: every other argument, dashes included, is printed as is.
pub struct Echo {
    pub no_newline: bool,
    pub args: Vec<String>,
}

impl BuiltinCommand for Echo {
    const NAME: &'static str = "echo";

    fn parse(args: &[&str]) -> Result<Self, EarlyExit> {
        let no_newline = args.first() == Some(&"-n");
        let skip = usize::from(no_newline);
        Ok(Echo {
            no_newline,
            args: args[skip..].iter().map(|arg| arg.to_string()).collect(),
        })
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        _context: &mut ExecutionContext,
    ) -> Result<ExitCode> {
        let s = self.args.join(" ");
        if self.no_newline {
            write!(stdout, "{}", s)?;
        } else {
            writeln!(stdout, "{}", s)?;
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Exit the shell, saving pending history to the history file.
pub struct Exit {
    #[argh(positional, greedy)]
    /// ignored; the shell always exits with status 0.
    pub _status: Vec<String>,
}

impl BuiltinCommand for Exit {
    const NAME: &'static str = "exit";

    fn parse(args: &[&str]) -> Result<Self, EarlyExit> {
        parse_with_argh(Self::NAME, args)
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        _stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        context: &mut ExecutionContext,
    ) -> Result<ExitCode> {
        context.request_exit();
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Describe how each name would be interpreted as a command.
pub struct Type {
    #[argh(positional, greedy)]
    /// command names to look up.
    pub names: Vec<String>,
}

impl BuiltinCommand for Type {
    const NAME: &'static str = "type";

    fn parse(args: &[&str]) -> Result<Self, EarlyExit> {
        parse_with_argh(Self::NAME, args)
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        context: &mut ExecutionContext,
    ) -> Result<ExitCode> {
        let mut status = 0;
        for name in &self.names {
            if resolver::is_builtin(name) {
                writeln!(stdout, "{name} is a shell builtin")?;
            } else if let Some(path) = resolver::find_executable(context, name) {
                writeln!(stdout, "{name} is {}", path.display())?;
            } else {
                writeln!(stdout, "{name}: not found")?;
                status = 1;
            }
        }
        Ok(status)
    }
}

#[derive(FromArgs)]
/// Print the current working directory to standard output.
pub struct Pwd {}

impl BuiltinCommand for Pwd {
    const NAME: &'static str = "pwd";

    fn parse(args: &[&str]) -> Result<Self, EarlyExit> {
        parse_with_argh(Self::NAME, args)
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        context: &mut ExecutionContext,
    ) -> Result<ExitCode> {
        writeln!(stdout, "{}", context.workspace().display())?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Change the current working directory.
/// If no target is provided, changes to the directory specified by the HOME environment variable.
pub struct Cd {
    #[argh(positional)]
    /// directory to switch to, absolute or relative; defaults to $HOME
    pub target: Option<String>,
}

impl BuiltinCommand for Cd {
    const NAME: &'static str = "cd";

    fn parse(args: &[&str]) -> Result<Self, EarlyExit> {
        parse_with_argh(Self::NAME, args)
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        context: &mut ExecutionContext,
    ) -> Result<ExitCode> {
        let home = context.var("HOME");
        let target = match self.target.as_deref() {
            Some(t) if !t.is_empty() => expand_tilde(t, home.as_deref()),
            _ => match home.filter(|h| !h.is_empty()) {
                Some(home) => home,
                None => anyhow::bail!("HOME not set"),
            },
        };

        match context.set_workspace(Path::new(&target)) {
            Ok(()) => Ok(0),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                writeln!(stdout, "cd: {target}: No such file or directory")?;
                Ok(1)
            }
            Err(err) => Err(err).with_context(|| target.clone()),
        }
    }
}

#[derive(FromArgs)]
/// Display the command history or copy it to and from a file.
pub struct HistoryCmd {
    #[argh(option, short = 'r')]
    /// append the lines of this file to the history.
    pub read: Option<String>,

    #[argh(option, short = 'w')]
    /// write the whole history to this file.
    pub write: Option<String>,

    #[argh(option, short = 'a')]
    /// append entries not yet saved to this file.
    pub append: Option<String>,

    #[argh(positional)]
    /// how many of the most recent entries to show.
    pub count: Option<String>,
}

impl HistoryCmd {
    /// Entries to print. Anything but a positive number shows nothing.
    fn limit(&self) -> Option<usize> {
        let count = self.count.as_deref()?;
        Some(match count.parse::<i64>() {
            Ok(n) if n > 0 => usize::try_from(n).unwrap_or(usize::MAX),
            _ => 0,
        })
    }
}

impl BuiltinCommand for HistoryCmd {
    const NAME: &'static str = "history";

    fn parse(args: &[&str]) -> Result<Self, EarlyExit> {
        // A negative count would otherwise be rejected as an unknown flag.
        if let [count] = args {
            if count.starts_with('-') && count.parse::<i64>().is_ok() {
                return Ok(HistoryCmd {
                    read: None,
                    write: None,
                    append: None,
                    count: Some(count.to_string()),
                });
            }
        }
        parse_with_argh(Self::NAME, args)
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        context: &mut ExecutionContext,
    ) -> Result<ExitCode> {
        let mut touched_file = false;
        if let Some(file) = &self.read {
            let path = context.resolve_path(Path::new(file));
            context.history_mut().read_from(&path).with_context(|| file.clone())?;
            touched_file = true;
        }
        if let Some(file) = &self.write {
            let path = context.resolve_path(Path::new(file));
            context.history_mut().write_to(&path).with_context(|| file.clone())?;
            touched_file = true;
        }
        if let Some(file) = &self.append {
            let path = context.resolve_path(Path::new(file));
            context.history_mut().append_to(&path).with_context(|| file.clone())?;
            touched_file = true;
        }
        if touched_file {
            return Ok(0);
        }

        write!(stdout, "{}", context.history().format_tail(self.limit()))?;
        Ok(0)
    }
}
