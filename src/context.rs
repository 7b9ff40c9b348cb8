use crate::history::History;
use std::collections::HashMap;
use std::env as stdenv;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Per-session state shared by every command the interpreter runs.
///
/// The context contains:
/// - `workspace`: the logical working directory. The shell never calls
///   `chdir`; children are started with this directory instead.
/// - `vars`: the environment handed to external commands.
/// - `history`: the command history and its backing file.
/// - `should_exit`: set by `exit`, checked by the read loop.
///
/// A *detached* copy is given to builtins that run concurrently inside a
/// pipeline. Whatever such a copy does is thrown away with it.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    workspace: PathBuf,
    vars: HashMap<String, String>,
    history: History,
    should_exit: bool,
    detached: bool,
}

impl ExecutionContext {
    /// Capture the current process environment and working directory.
    pub fn new() -> Self {
        let vars = stdenv::vars().collect();
        let cwd = stdenv::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        Self::with_vars(cwd, vars)
    }

    /// Build a context from explicit parts. `workspace` is normalized against
    /// the process working directory when relative.
    pub fn with_vars(workspace: PathBuf, vars: HashMap<String, String>) -> Self {
        let base = stdenv::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        Self {
            workspace: normalize_path(&base, &workspace),
            vars,
            history: History::new(),
            should_exit: false,
            detached: false,
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Move the workspace to `target`, resolved against the current one.
    ///
    /// Fails with `NotFound` unless the result is an existing directory; the
    /// workspace is left untouched in that case.
    pub fn set_workspace(&mut self, target: &Path) -> io::Result<()> {
        let candidate = self.resolve_path(target);
        if !candidate.is_dir() {
            return Err(io::Error::from(io::ErrorKind::NotFound));
        }
        log::debug!("workspace {} -> {}", self.workspace.display(), candidate.display());
        self.workspace = candidate;
        Ok(())
    }

    /// `path` made absolute against the workspace and normalized.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        normalize_path(&self.workspace, path)
    }

    pub fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }

    pub fn set_var(&mut self, key: impl Into<String>, val: impl Into<String>) {
        self.vars.insert(key.into(), val.into());
    }

    pub fn vars(&self) -> &HashMap<String, String> {
        &self.vars
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut History {
        &mut self.history
    }

    /// Ask the session to end after the current line.
    ///
    /// Pending history is flushed first. Both steps are skipped for a
    /// detached context.
    pub fn request_exit(&mut self) {
        if self.detached {
            log::debug!("ignoring exit from a pipeline stage");
            return;
        }
        if let Err(err) = self.history.flush_pending() {
            log::warn!("failed to flush history: {err}");
        }
        self.should_exit = true;
    }

    pub fn should_exit(&self) -> bool {
        self.should_exit
    }

    /// Snapshot for a builtin running concurrently with other stages.
    pub fn detached(&self) -> Self {
        Self {
            detached: true,
            ..self.clone()
        }
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Join `target` onto `base` (unless it is absolute) and fold `.` and `..`
/// lexically. `..` never climbs above the root.
pub fn normalize_path(base: &Path, target: &Path) -> PathBuf {
    let joined = if target.is_absolute() {
        target.to_path_buf()
    } else {
        base.join(target)
    };

    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if out.parent().is_some() {
                    out.pop();
                }
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}
