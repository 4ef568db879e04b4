use std::{fmt, path::PathBuf};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub mod eventlog;

pub const BACKUP_SUCCESS_PREFIX: &str = "Backup successful";
pub const BACKUP_FAILURE_PREFIX: &str = "Backup failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Cpu,
    Memory,
    Disk,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MetricKind::Cpu => "CPU",
            MetricKind::Memory => "Memory",
            MetricKind::Disk => "Disk",
        })
    }
}

/// A point-in-time utilization reading, in whole percent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricSample {
    pub kind: MetricKind,
    pub value: u8,
    pub sample_time: u64,
}

impl MetricSample {
    pub fn now(kind: MetricKind, value: u8) -> Self {
        Self {
            kind,
            value: value.min(100),
            sample_time: OffsetDateTime::now_utc().unix_timestamp().max(0) as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSample {
    pub pid: u32,
    pub command: String,
    /// Share of total physical memory, in percent.
    pub memory_share: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupOutcome {
    pub finish_time: OffsetDateTime,
    pub source: PathBuf,
    pub destination: String,
    pub status: BackupStatus,
    pub detail: String,
}

impl BackupOutcome {
    /// Text written to the backup log for this outcome.
    pub fn message(&self) -> String {
        match self.status {
            BackupStatus::Success => format!(
                "{BACKUP_SUCCESS_PREFIX}: {} -> {}",
                self.source.display(),
                self.destination
            ),
            BackupStatus::Failure => format!(
                "{BACKUP_FAILURE_PREFIX}: {} -> {}: {}",
                self.source.display(),
                self.destination,
                self.detail
            ),
        }
    }

    /// Classifies a log message previously produced by [`BackupOutcome::message`].
    pub fn status_of(message: &str) -> Option<BackupStatus> {
        if message.starts_with(BACKUP_SUCCESS_PREFIX) {
            Some(BackupStatus::Success)
        } else if message.starts_with(BACKUP_FAILURE_PREFIX) {
            Some(BackupStatus::Failure)
        } else {
            None
        }
    }
}

/// `floor(part / whole * 100)`, clamped to `0..=100`. `None` if `whole` is zero.
pub fn percent_floor(part: u64, whole: u64) -> Option<u8> {
    if whole == 0 {
        return None;
    }
    let part = part.min(whole) as u128;
    Some((part * 100 / whole as u128) as u8)
}
