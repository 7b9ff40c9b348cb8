use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures that abort a single pipeline.
///
/// None of them end the session; the interpreter reports the message and
/// reads the next line.
#[derive(Debug, Error)]
pub enum ShellError {
    #[error("{name}: command not found")]
    CommandNotFound { name: String },

    #[error("{name}: {}", os_message(.source))]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("{name}: {}: {}", .path.display(), os_message(.source))]
    Redirection {
        name: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{name}: {reason}")]
    Wait { name: String, reason: String },

    #[error("{name}: {message}")]
    Builtin { name: String, message: String },

    #[error("{name}: failed to create pipe: {}", os_message(.source))]
    Pipe {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("syntax error near unexpected token `newline'")]
    MissingRedirectTarget,
}

impl ShellError {
    /// Whether the message belongs on standard output rather than standard
    /// error.
    pub fn reports_to_stdout(&self) -> bool {
        matches!(self, ShellError::CommandNotFound { .. })
    }
}

/// `err` as text, without the `(os error N)` suffix the standard library
/// appends to OS errors.
fn os_message(err: &io::Error) -> String {
    let text = err.to_string();
    match (err.raw_os_error(), text.rfind(" (os error ")) {
        (Some(_), Some(at)) => text[..at].to_string(),
        _ => text,
    }
}
