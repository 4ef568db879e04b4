use std::{
    ffi::OsString,
    io,
    path::PathBuf,
    process::{ExitStatus, Stdio},
    time::Duration,
};

use hostwatch_model::{
    BackupOutcome, BackupStatus,
    eventlog::{AppendLog, LogWriteError, local_now},
};
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, BufReader},
    process::{Child, Command},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Conf;

/// Archive mode, compressed, verbose.
const RSYNC_MODE: &str = "-avz";

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("unable to start {}: {source}", program.display())]
    Spawn { program: PathBuf, source: io::Error },
    #[error("unable to wait for transfer tool: {0}")]
    Wait(io::Error),
    #[error("transfer tool exited with {status}: {stderr}")]
    Exit { status: ExitStatus, stderr: String },
    #[error("transfer timed out after {}s", .0.as_secs_f32())]
    TimedOut(Duration),
    #[error("transfer interrupted by shutdown signal")]
    Interrupted,
}

#[derive(Debug, thiserror::Error)]
#[error("`{0}` must be configured to run a backup")]
pub struct MissingSetting(&'static str);

/// What gets mirrored where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupJob {
    pub source: PathBuf,
    pub destination: String,
}

impl BackupJob {
    pub fn from_conf(conf: &Conf) -> Result<Self, MissingSetting> {
        Ok(Self {
            source: conf.source.clone().ok_or(MissingSetting("source"))?,
            destination: conf
                .destination
                .clone()
                .ok_or(MissingSetting("destination"))?,
        })
    }
}

/// One invocation of an external transfer tool.
#[derive(Debug, Clone)]
pub struct Transfer {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub timeout: Duration,
}

impl Transfer {
    pub fn rsync(conf: &Conf, job: &BackupJob, dry_run: bool) -> Self {
        let mut args = vec![OsString::from(RSYNC_MODE)];
        if dry_run {
            args.push("--dry-run".into());
        }
        args.extend(conf.extra_args.iter().map(OsString::from));
        // operands only from here on, even if a path starts with '-'
        args.push("--".into());
        args.push(job.source.clone().into_os_string());
        args.push(job.destination.clone().into());

        Self {
            program: conf.rsync_path.clone(),
            args,
            timeout: Duration::from_secs(conf.timeout_secs),
        }
    }

    /// Runs the tool to completion and returns the last line it printed.
    ///
    /// Stdout is forwarded to the debug log line by line while the tool runs.
    /// The child is killed if the timeout expires or `shutdown` is cancelled
    /// first.
    pub async fn run(&self, shutdown: &CancellationToken) -> Result<String, TransferError> {
        debug!(program = %self.program.display(), args = ?self.args, "starting transfer");
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TransferError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let (status, summary, stderr) = tokio::select! {
            res = tokio::time::timeout(self.timeout, drive(child)) => match res {
                Ok(finished) => finished.map_err(TransferError::Wait)?,
                Err(_) => return Err(TransferError::TimedOut(self.timeout)),
            },
            _ = shutdown.cancelled() => return Err(TransferError::Interrupted),
        };

        if !status.success() {
            return Err(TransferError::Exit {
                status,
                stderr: if stderr.is_empty() {
                    "no error output".to_owned()
                } else {
                    stderr
                },
            });
        }

        Ok(summary)
    }
}

/// Drains both pipes concurrently, then reaps the child.
///
/// Returns the exit status, the last non-empty stdout line and the trimmed
/// stderr. Dropping this future drops `child`, which kills it.
async fn drive(mut child: Child) -> io::Result<(ExitStatus, String, String)> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let forward = async {
        let mut last = String::new();
        if let Some(stdout) = stdout {
            let mut reader = BufReader::new(stdout);
            let mut line = Vec::new();
            // file names are not always UTF-8
            while reader.read_until(b'\n', &mut line).await? != 0 {
                let text = String::from_utf8_lossy(&line);
                let text = text.trim();
                if !text.is_empty() {
                    debug!("{text}");
                    last = text.to_owned();
                }
                line.clear();
            }
        }
        Ok::<_, io::Error>(last)
    };

    let collect = async {
        let mut buf = Vec::new();
        if let Some(mut stderr) = stderr {
            stderr.read_to_end(&mut buf).await?;
        }
        Ok::<_, io::Error>(String::from_utf8_lossy(&buf).trim().to_owned())
    };

    let (summary, stderr) = tokio::try_join!(forward, collect)?;
    let status = child.wait().await?;
    Ok((status, summary, stderr))
}

/// Runs `transfer` and appends exactly one outcome line to `log`.
///
/// A failed transfer is reported through the returned outcome, not as an
/// error; only a failure to write the log is an error here.
pub async fn run_backup(
    transfer: &Transfer,
    job: &BackupJob,
    log: &mut AppendLog,
    shutdown: &CancellationToken,
) -> Result<BackupOutcome, LogWriteError> {
    let (status, detail) = match transfer.run(shutdown).await {
        Ok(summary) => (BackupStatus::Success, summary),
        Err(e) => (BackupStatus::Failure, e.to_string()),
    };

    let outcome = BackupOutcome {
        finish_time: local_now(),
        source: job.source.clone(),
        destination: job.destination.clone(),
        status,
        detail,
    };
    log.append(&outcome.message())?;

    match outcome.status {
        BackupStatus::Success => info!(summary = %outcome.detail, "backup finished"),
        BackupStatus::Failure => warn!(detail = %outcome.detail, "backup failed"),
    }

    Ok(outcome)
}

/// Maps a logged outcome onto the process result: failures exit non-zero.
pub fn ensure_success(outcome: &BackupOutcome) -> anyhow::Result<()> {
    match outcome.status {
        BackupStatus::Success => Ok(()),
        BackupStatus::Failure => Err(anyhow::anyhow!(outcome.message())),
    }
}
