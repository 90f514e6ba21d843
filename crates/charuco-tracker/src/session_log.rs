//! Persistent operator log: `[YYYY-MM-DD HH:MM:SS] message` per line.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

/// Append-only session log. Write failures are reported through `log` and
/// never interrupt a session.
#[derive(Clone, Debug, Default)]
pub struct SessionLog {
    path: Option<PathBuf>,
}

impl SessionLog {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// A log that drops every message.
    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn log(&self, message: &str) {
        self.log_at(Local::now(), message);
    }

    pub fn log_at(&self, at: DateTime<Local>, message: &str) {
        let Some(path) = &self.path else {
            return;
        };
        let line = format_line(at, message);
        if let Err(err) = append(path, &line) {
            log::warn!("session log {}: {err}", path.display());
        }
    }
}

/// One log line, newline-terminated. Embedded line breaks are flattened so
/// every entry stays on a single line.
pub fn format_line(at: DateTime<Local>, message: &str) -> String {
    let message: String = message
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    format!("[{}] {message}\n", at.format("%Y-%m-%d %H:%M:%S"))
}

fn append(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2025, 1, 31, 23, 59, 58)
            .single()
            .expect("unambiguous")
    }

    #[test]
    fn lines_carry_a_second_resolution_timestamp() {
        assert_eq!(
            format_line(at(), "Calibration started"),
            "[2025-01-31 23:59:58] Calibration started\n"
        );
    }

    #[test]
    fn multi_line_messages_stay_on_one_line() {
        assert_eq!(
            format_line(at(), "solver failed:\nbad input"),
            "[2025-01-31 23:59:58] solver failed: bad input\n"
        );
    }

    #[test]
    fn messages_are_appended() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("data/session.log");
        let log = SessionLog::open(&path);
        log.log_at(at(), "first");
        log.log_at(at(), "second");
        SessionLog::open(&path).log_at(at(), "third");

        let text = fs::read_to_string(&path).expect("read");
        let messages: Vec<_> = text
            .lines()
            .map(|l| l.split_once("] ").expect("prefix").1)
            .collect();
        assert_eq!(messages, ["first", "second", "third"]);
    }

    #[test]
    fn unwritable_log_is_not_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = SessionLog::open(dir.path());
        log.log("goes nowhere");
        SessionLog::disabled().log("also nowhere");
    }
}
