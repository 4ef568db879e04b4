#![forbid(unsafe_code)]

use std::{path::PathBuf, process::ExitCode};

use argh::FromArgs;
use confique::Config;
use hostwatch_model::eventlog::AppendLog;
use simple_logger::SimpleLogger;

use crate::{evaluate::Thresholds, query::SysinfoSource};

mod evaluate;
mod health;
mod procstat;
mod query;

#[derive(FromArgs, Debug)]
#[argh(description = "Sample host resource usage once and log threshold alerts.")]
struct CheckArgs {
    #[argh(
        option,
        short = 'c',
        default = "\"hostwatch-check.toml\".to_string()",
        description = "path to config file"
    )]
    pub config_path: String,
    #[argh(switch, description = "also print the check report as JSON on stdout")]
    pub json: bool,
}

#[derive(Config, Debug)]
pub struct Conf {
    /// Event log the check appends to
    #[config(default = "/var/log/system_health.log", env = "HOSTWATCH_CHECK_LOG")]
    pub log_path: PathBuf,

    /// Mount point whose usage is sampled
    #[config(default = "/", env = "HOSTWATCH_DISK_MOUNT")]
    pub disk_mount_point: PathBuf,

    /// Number of memory-heavy processes to list
    #[config(default = 10, env = "HOSTWATCH_TOP_PROCESSES")]
    pub top_processes: usize,

    #[config(nested)]
    pub thresholds: Thresholds,
}

fn config(path: &str) -> anyhow::Result<Conf> {
    Conf::builder()
        .env()
        .file(path)
        .load()
        .map_err(|e| e.into())
}

fn main() -> anyhow::Result<ExitCode> {
    SimpleLogger::new().env().init()?;

    let args: CheckArgs = argh::from_env();
    log::debug!("Check arguments: {args:#?}");

    let conf = config(&args.config_path)?;
    log::debug!("Check config: {conf:#?}");

    // failing to write the event log is fatal
    let mut event_log = AppendLog::open(&conf.log_path)?;
    let report = health::run_check(&mut SysinfoSource::new(), &conf, &mut event_log)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    if report.is_degraded() {
        log::warn!(
            "{} metric queries failed, see {}",
            report.failures.len(),
            event_log.path().display()
        );
    }

    Ok(ExitCode::from(report.exit_status()))
}
