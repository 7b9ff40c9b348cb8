use argh::FromArgs;
use pipeshell::repl::{self, EditorSource, PlainSource};
use pipeshell::{ExecutionContext, Interpreter, SessionStreams};
use std::io::{self, BufReader, IsTerminal};
use std::path::Path;

#[derive(FromArgs)]
/// A small interactive shell with pipes and redirections.
struct ShellArgs {
    #[argh(option)]
    /// history file read at start-up and appended to on exit; overrides $HISTFILE.
    histfile: Option<String>,

    #[argh(option, default = "String::from(\"$ \")")]
    /// text printed before each input line.
    prompt: String,

    #[argh(option, short = 'c')]
    /// run a single command line and exit with its status.
    command: Option<String>,

    #[argh(switch)]
    /// read plain lines from standard input even on a terminal.
    plain: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args: ShellArgs = argh::from_env();

    let mut interpreter = Interpreter::new(ExecutionContext::new(), SessionStreams::Inherit);

    if let Some(line) = args.command {
        interpreter.eval_input(&line);
        std::process::exit(interpreter.last_status());
    }

    let histfile = args
        .histfile
        .or_else(|| interpreter.context().var("HISTFILE"))
        .filter(|file| !file.is_empty());
    if let Some(file) = histfile {
        interpreter.load_history(Path::new(&file));
    }

    let status = if args.plain || !io::stdin().is_terminal() {
        let mut source = PlainSource::new(BufReader::new(io::stdin()), io::stdout());
        repl::run(&mut interpreter, &mut source, &args.prompt)?
    } else {
        let mut source = EditorSource::new(interpreter.context())?;
        repl::run(&mut interpreter, &mut source, &args.prompt)?
    };
    std::process::exit(status)
}
