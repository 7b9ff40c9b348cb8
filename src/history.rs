use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// In-memory command history with an optional backing file.
///
/// Entries up to `last_flushed` are known to be present in the backing file;
/// append mode only writes what comes after.
#[derive(Debug, Clone, Default)]
pub struct History {
    entries: Vec<String>,
    file: Option<PathBuf>,
    last_flushed: usize,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted input line. Blank lines are ignored; the rest is
    /// stored trimmed.
    pub fn record(&mut self, line: &str) {
        let line = line.trim();
        if !line.is_empty() {
            self.entries.push(line.to_string());
        }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// The file most recently used by `read_from`, `write_to` or `append_to`.
    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    pub fn last_flushed(&self) -> usize {
        self.last_flushed
    }

    /// Render the last `limit` entries (all of them for `None`) with their
    /// 1-based positions, one per line.
    pub fn format_tail(&self, limit: Option<usize>) -> String {
        let start = match limit {
            Some(limit) => self.entries.len().saturating_sub(limit),
            None => 0,
        };
        self.entries[start..]
            .iter()
            .enumerate()
            .map(|(offset, line)| format!("{:>5}  {}\n", start + offset + 1, line))
            .collect()
    }

    /// Append every non-blank line of `path` to the history.
    ///
    /// Lines read this way are not considered flushed.
    pub fn read_from(&mut self, path: &Path) -> io::Result<()> {
        self.file = Some(path.to_path_buf());
        let contents = fs::read_to_string(path)?;
        self.entries.extend(
            contents
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(str::to_string),
        );
        Ok(())
    }

    /// Load the start-up history file. Everything read counts as flushed.
    pub fn load(&mut self, path: &Path) -> io::Result<()> {
        let result = self.read_from(path);
        self.last_flushed = self.entries.len();
        result
    }

    /// Overwrite `path` with the whole history.
    pub fn write_to(&mut self, path: &Path) -> io::Result<()> {
        self.file = Some(path.to_path_buf());
        let mut contents = String::new();
        for line in &self.entries {
            contents.push_str(line);
            contents.push('\n');
        }
        fs::write(path, contents)?;
        self.last_flushed = self.entries.len();
        Ok(())
    }

    /// Append the entries recorded since the last flush to `path`.
    pub fn append_to(&mut self, path: &Path) -> io::Result<()> {
        self.file = Some(path.to_path_buf());
        let pending = &self.entries[self.last_flushed.min(self.entries.len())..];
        if !pending.is_empty() {
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            for line in pending {
                writeln!(file, "{line}")?;
            }
        }
        self.last_flushed = self.entries.len();
        Ok(())
    }

    /// Append pending entries to the configured file, if there is one.
    pub fn flush_pending(&mut self) -> io::Result<()> {
        match self.file.clone() {
            Some(path) => self.append_to(&path),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history_of(lines: &[&str]) -> History {
        let mut history = History::new();
        for line in lines {
            history.record(line);
        }
        history
    }

    #[test]
    fn test_record_trims_and_skips_blank_lines() {
        let history = history_of(&["  echo hi  ", "", "   ", "pwd"]);
        assert_eq!(history.entries(), &["echo hi".to_string(), "pwd".to_string()]);
    }

    #[test]
    fn test_format_tail() {
        let history = history_of(&["a", "b", "c"]);
        assert_eq!(history.format_tail(None), "    1  a\n    2  b\n    3  c\n");
        assert_eq!(history.format_tail(Some(2)), "    2  b\n    3  c\n");
        assert_eq!(history.format_tail(Some(0)), "");
        assert_eq!(history.format_tail(Some(10)), history.format_tail(None));
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hist");

        let mut history = history_of(&["echo one", "echo two"]);
        history.write_to(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "echo one\necho two\n");
        assert_eq!(history.last_flushed(), 2);

        let mut other = History::new();
        other.read_from(&path).unwrap();
        assert_eq!(other.entries(), history.entries());
        assert_eq!(other.last_flushed(), 0);
        assert_eq!(other.file(), Some(path.as_path()));
    }

    #[test]
    fn test_read_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hist");
        fs::write(&path, "one\n\n  \ntwo\n").unwrap();

        let mut history = History::new();
        history.read_from(&path).unwrap();
        assert_eq!(history.entries(), &["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn test_append_writes_only_new_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hist");

        let mut history = history_of(&["first"]);
        history.append_to(&path).unwrap();
        history.record("second");
        history.record("third");
        history.append_to(&path).unwrap();
        history.append_to(&path).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "first\nsecond\nthird\n");
    }

    #[test]
    fn test_load_marks_everything_flushed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hist");
        fs::write(&path, "old one\nold two\n").unwrap();

        let mut history = History::new();
        history.load(&path).unwrap();
        history.record("new");
        history.flush_pending().unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "old one\nold two\nnew\n"
        );
    }

    #[test]
    fn test_load_missing_file_keeps_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing");

        let mut history = History::new();
        assert!(history.load(&path).is_err());
        assert_eq!(history.file(), Some(path.as_path()));

        history.record("echo hi");
        history.flush_pending().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "echo hi\n");
    }

    #[test]
    fn test_flush_without_file_is_noop() {
        let mut history = history_of(&["a"]);
        history.flush_pending().unwrap();
        assert_eq!(history.last_flushed(), 0);
    }
}
