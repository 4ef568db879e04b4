//! Append-only, human readable event log.
//!
//! Every event is one line of the form `<timestamp>: <message>`, where the
//! timestamp is RFC 3339 in local time. The file is never truncated or
//! rewritten here; rotation is left to external tooling.
//!
//! There is no locking: two processes appending to the same file at once may
//! interleave their lines.

use std::{
    fs::{File, OpenOptions},
    io::{self, BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

use log::debug;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

const SEPARATOR: &str = ": ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: OffsetDateTime,
    pub message: String,
}

impl LogEntry {
    pub fn to_line(&self) -> Result<String, time::error::Format> {
        // keep one event per line
        let message = self
            .message
            .trim_end()
            .lines()
            .map(str::trim_end)
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join(" | ");
        Ok(format!(
            "{}{SEPARATOR}{message}",
            self.timestamp.format(&Rfc3339)?
        ))
    }

    pub fn parse_line(line: &str) -> Option<Self> {
        let (timestamp, message) = line.split_once(SEPARATOR)?;
        let timestamp = OffsetDateTime::parse(timestamp, &Rfc3339).ok()?;
        Some(Self {
            timestamp,
            message: message.to_owned(),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LogWriteError {
    #[error("unable to open log file {}: {source}", path.display())]
    Open { path: PathBuf, source: io::Error },
    #[error("unable to append to log file {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error("unable to format log timestamp: {0}")]
    Timestamp(#[from] time::error::Format),
}

/// Local wall clock time, falling back to UTC when the offset is unknown.
pub fn local_now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

#[derive(Debug)]
pub struct AppendLog {
    path: PathBuf,
    file: File,
    last_timestamp: Option<OffsetDateTime>,
}

impl AppendLog {
    /// Opens `path` for appending, creating it if absent.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LogWriteError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| LogWriteError::Open {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            path,
            file,
            last_timestamp: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one line stamped with the current time.
    pub fn append(&mut self, message: &str) -> Result<LogEntry, LogWriteError> {
        // timestamps never go backwards within one log, even if the clock does
        let timestamp = match self.last_timestamp {
            Some(last) => local_now().max(last),
            None => local_now(),
        };
        let entry = LogEntry {
            timestamp,
            message: message.to_owned(),
        };

        let mut line = entry.to_line()?;
        line.push('\n');
        // single write so that an O_APPEND line lands in one piece
        self.file
            .write_all(line.as_bytes())
            .and_then(|_| self.file.flush())
            .map_err(|source| LogWriteError::Write {
                path: self.path.clone(),
                source,
            })?;

        debug!("{}: {}", self.path.display(), entry.message);
        self.last_timestamp = Some(timestamp);
        Ok(entry)
    }
}

/// Reads every parseable entry from a log file, in file order.
pub fn read_entries(path: impl AsRef<Path>) -> io::Result<Vec<LogEntry>> {
    let reader = BufReader::new(File::open(path)?);
    let mut entries = Vec::new();
    for line in reader.lines() {
        if let Some(entry) = LogEntry::parse_line(&line?) {
            entries.push(entry);
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("health.log");
        assert!(!path.exists());

        let mut log = AppendLog::open(&path).unwrap();
        log.append("CPU usage is high: 85%").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.ends_with(": CPU usage is high: 85%\n"));
    }

    #[test]
    fn appends_are_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("health.log");
        std::fs::write(&path, "existing line\n").unwrap();

        let mut log = AppendLog::open(&path).unwrap();
        for i in 0..20 {
            log.append(&format!("event {i}")).unwrap();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next(), Some("existing line"));

        let entries: Vec<_> = lines.map(|l| LogEntry::parse_line(l).unwrap()).collect();
        assert_eq!(entries.len(), 20);
        for (i, entry) in entries.iter().enumerate() {
            assert_eq!(entry.message, format!("event {i}"));
        }
        assert!(entries.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn reopen_keeps_previous_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.log");

        AppendLog::open(&path).unwrap().append("first").unwrap();
        AppendLog::open(&path).unwrap().append("second").unwrap();

        let entries = read_entries(&path).unwrap();
        let messages: Vec<_> = entries.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, ["first", "second"]);
    }

    #[test]
    fn multiline_message_stays_on_one_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.log");

        let mut log = AppendLog::open(&path).unwrap();
        log.append("Backup failed: rsync error\nconnection refused\n\n")
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.contains("rsync error | connection refused"));
    }

    #[test]
    fn parse_line_splits_at_first_separator() {
        let entry =
            LogEntry::parse_line("2026-10-18T09:30:00+02:00: Disk usage is high: 95%").unwrap();
        assert_eq!(entry.message, "Disk usage is high: 95%");
        assert_eq!(entry.timestamp.hour(), 9);
        assert_eq!(entry.timestamp.offset().whole_hours(), 2);

        assert!(LogEntry::parse_line("not a log line").is_none());
        assert!(LogEntry::parse_line("yesterday: something").is_none());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn failed_write_is_reported() {
        let mut log = AppendLog::open("/dev/full").unwrap();
        let err = log.append("Memory usage is high: 91%").unwrap_err();

        match err {
            LogWriteError::Write { path, source } => {
                assert_eq!(path, Path::new("/dev/full"));
                assert_eq!(source.raw_os_error(), Some(28)); // ENOSPC
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn open_fails_on_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = AppendLog::open(dir.path()).unwrap_err();
        assert!(matches!(err, LogWriteError::Open { .. }));
    }
}
