//! Maps a command name to a [`CommandSpec`].
//!
//! Lookup order:
//! - names in [`BUILTINS`] are builtins, even if an executable with the same
//!   name exists on `PATH` (its path is still recorded);
//! - an absolute path must point at an executable file;
//! - a relative path with a separator (`./run`, `bin/tool`) is taken
//!   relative to the workspace;
//! - a bare name is searched in each `PATH` entry in order. An empty entry
//!   stands for the workspace.

use crate::command::CommandSpec;
use crate::context::ExecutionContext;
use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

/// Commands implemented inside the shell.
pub const BUILTINS: [&str; 6] = ["echo", "exit", "type", "pwd", "cd", "history"];

pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

/// Resolve `name` against the builtin table and the filesystem.
pub fn resolve(context: &ExecutionContext, name: &str) -> CommandSpec {
    let is_builtin = is_builtin(name);
    let resolved_path = find_executable(context, name);
    let is_runnable = is_builtin || resolved_path.is_some();
    if !is_runnable {
        log::debug!("{name:?} did not resolve to a command");
    }
    CommandSpec {
        name: Some(name.to_string()),
        args: Vec::new(),
        resolved_path,
        is_builtin,
        is_runnable,
        workspace: context.workspace().to_path_buf(),
    }
}

/// Locate the executable `name` would run, ignoring builtins.
pub fn find_executable(context: &ExecutionContext, name: &str) -> Option<PathBuf> {
    if name.is_empty() {
        return None;
    }

    let path = Path::new(name);
    if path.is_absolute() {
        return is_executable(path).then(|| path.to_path_buf());
    }
    if path.components().count() > 1 || name.contains(std::path::MAIN_SEPARATOR) {
        let candidate = context.resolve_path(path);
        return is_executable(&candidate).then_some(candidate);
    }

    let search_paths = context.var("PATH")?;
    search_dirs(context, &search_paths)
        .into_iter()
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

/// Names of builtins and `PATH` executables starting with `prefix`, sorted
/// and without duplicates.
pub fn command_names(context: &ExecutionContext, prefix: &str) -> Vec<String> {
    let mut names: BTreeSet<String> = BUILTINS
        .iter()
        .filter(|name| name.starts_with(prefix))
        .map(|name| name.to_string())
        .collect();

    if let Some(search_paths) = context.var("PATH") {
        for dir in search_dirs(context, &search_paths) {
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let file_name = entry.file_name();
                let Some(file_name) = file_name.to_str() else {
                    continue;
                };
                if file_name.starts_with(prefix) && is_executable(&entry.path()) {
                    names.insert(file_name.to_string());
                }
            }
        }
    }

    names.into_iter().collect()
}

fn search_dirs(context: &ExecutionContext, search_paths: &str) -> Vec<PathBuf> {
    std::env::split_paths(OsStr::new(search_paths))
        .map(|dir| {
            if dir.as_os_str().is_empty() {
                context.workspace().to_path_buf()
            } else {
                context.resolve_path(&dir)
            }
        })
        .collect()
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
