use std::{io, path::Path};

use hostwatch_model::{
    BackupOutcome, BackupStatus,
    eventlog::{LogEntry, read_entries},
};
use time::{UtcOffset, macros::format_description};

/// The last `limit` backup outcomes recorded in the log at `path`, oldest first.
pub fn recent_outcomes(path: &Path, limit: usize) -> io::Result<Vec<(LogEntry, BackupStatus)>> {
    let mut outcomes = read_entries(path)?
        .into_iter()
        .filter_map(|entry| BackupOutcome::status_of(&entry.message).map(|s| (entry, s)))
        .collect::<Vec<_>>();

    let skip = outcomes.len().saturating_sub(limit);
    Ok(outcomes.split_off(skip))
}

pub fn print_history(path: &Path, limit: usize) -> anyhow::Result<()> {
    if !path.exists() {
        println!("No backups recorded in {}.", path.display());
        return Ok(());
    }

    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    for (entry, status) in recent_outcomes(path, limit)? {
        println!(
            "[{}] {} {}",
            entry
                .timestamp
                .to_offset(offset)
                .format(format_description!(
                    "[year]-[month]-[day] [hour]:[minute]:[second]"
                ))?,
            match status {
                BackupStatus::Success => "ok  ",
                BackupStatus::Failure => "FAIL",
            },
            entry.message
        );
    }

    Ok(())
}
