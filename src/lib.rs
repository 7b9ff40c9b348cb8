//! A small POSIX-like shell core.
//!
//! The crate turns input lines into pipelines and runs them: the [`lexer`]
//! splits a line into words and operators, the [`parser`] groups them into
//! stages and resolves each name with the [`resolver`], and the
//! [`executor`] wires builtins and external programs together with OS
//! pipes.
//!
//! The main entry point is [`Interpreter`], which evaluates one line at a
//! time against an [`ExecutionContext`] and writes to [`SessionStreams`].
//! The [`repl`] module drives it from a terminal or from piped input.

mod builtin;
pub mod command;
pub mod completion;
pub mod context;
pub mod error;
pub mod executor;
mod external;
pub mod history;
mod interpreter;
pub mod io_adapters;
pub mod lexer;
pub mod parser;
pub mod repl;
pub mod resolver;

pub use builtin::Builtin;
pub use context::ExecutionContext;
pub use error::ShellError;
pub use external::{ExternalCommand, RunningProcess};
pub use interpreter::{Flow, Interpreter};
pub use io_adapters::SessionStreams;
