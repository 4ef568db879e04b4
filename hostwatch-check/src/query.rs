use std::path::Path;

use hostwatch_model::{MetricKind, ProcessSample, percent_floor};
use serde::Serialize;
use sysinfo::{Disks, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};

#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
pub enum QueryError {
    #[error("{0} usage source unavailable: {1}")]
    Unavailable(MetricKind, String),
    #[error("process table unavailable: {0}")]
    ProcessTable(String),
}

/// Point-in-time views of the host's resource usage, in whole percent.
pub trait MetricSource {
    fn sample_cpu(&mut self) -> Result<u8, QueryError>;
    fn sample_memory(&mut self) -> Result<u8, QueryError>;
    fn sample_disk(&mut self, mount_point: &Path) -> Result<u8, QueryError>;
    /// Processes holding the most resident memory, largest first.
    fn list_top_processes(&mut self, limit: usize) -> Result<Vec<ProcessSample>, QueryError>;
}

#[derive(Debug)]
pub struct SysinfoSource {
    system: System,
}

impl SysinfoSource {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl MetricSource for SysinfoSource {
    #[cfg(target_os = "linux")]
    fn sample_cpu(&mut self) -> Result<u8, QueryError> {
        let unavailable =
            |e: std::io::Error| QueryError::Unavailable(MetricKind::Cpu, e.to_string());

        let before = crate::procstat::read().map_err(unavailable)?;
        std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        let after = crate::procstat::read().map_err(unavailable)?;

        after.busy_percent_since(&before).ok_or_else(|| {
            QueryError::Unavailable(MetricKind::Cpu, "no CPU time elapsed".to_owned())
        })
    }

    #[cfg(not(target_os = "linux"))]
    fn sample_cpu(&mut self) -> Result<u8, QueryError> {
        self.system.refresh_cpu_usage();
        std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        self.system.refresh_cpu_usage();

        let usage = self.system.global_cpu_usage();
        if self.system.cpus().is_empty() || !usage.is_finite() {
            return Err(QueryError::Unavailable(
                MetricKind::Cpu,
                "no CPU usage reported".to_owned(),
            ));
        }
        Ok(usage.clamp(0.0, 100.0) as u8)
    }

    fn sample_memory(&mut self) -> Result<u8, QueryError> {
        self.system.refresh_memory();
        percent_floor(self.system.used_memory(), self.system.total_memory()).ok_or_else(|| {
            QueryError::Unavailable(
                MetricKind::Memory,
                "total memory reported as zero".to_owned(),
            )
        })
    }

    fn sample_disk(&mut self, mount_point: &Path) -> Result<u8, QueryError> {
        let disks = Disks::new_with_refreshed_list();
        let disk = disks
            .iter()
            .find(|d| d.mount_point() == mount_point)
            .ok_or_else(|| {
                QueryError::Unavailable(
                    MetricKind::Disk,
                    format!("no filesystem mounted at {}", mount_point.display()),
                )
            })?;

        let total = disk.total_space();
        let used = total.saturating_sub(disk.available_space());
        percent_floor(used, total).ok_or_else(|| {
            QueryError::Unavailable(
                MetricKind::Disk,
                format!("{} reports zero capacity", mount_point.display()),
            )
        })
    }

    fn list_top_processes(&mut self, limit: usize) -> Result<Vec<ProcessSample>, QueryError> {
        self.system.refresh_memory();
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing()
                .with_memory()
                .with_cmd(UpdateKind::OnlyIfNotSet)
                .without_tasks(),
        );

        // threads share their process's memory, list each process once
        let processes = self
            .system
            .processes()
            .iter()
            .filter(|(_, process)| process.thread_kind().is_none())
            .map(|(pid, process)| {
                let cmd = process
                    .cmd()
                    .iter()
                    .map(|arg| arg.to_string_lossy())
                    .collect::<Vec<_>>()
                    .join(" ");
                let command = if cmd.is_empty() {
                    process.name().to_string_lossy().into_owned()
                } else {
                    cmd
                };
                (pid.as_u32(), process.memory(), command)
            })
            .collect::<Vec<_>>();

        if processes.is_empty() {
            return Err(QueryError::ProcessTable("no processes visible".to_owned()));
        }

        Ok(rank_by_memory(processes, self.system.total_memory(), limit))
    }
}

/// Sorts `(pid, resident bytes, command)` by memory, largest first, and keeps
/// the first `limit`. Ties are broken by pid.
fn rank_by_memory(
    mut processes: Vec<(u32, u64, String)>,
    total_memory: u64,
    limit: usize,
) -> Vec<ProcessSample> {
    processes.sort_unstable_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    processes.truncate(limit);

    processes
        .into_iter()
        .map(|(pid, memory, command)| ProcessSample {
            pid,
            command,
            memory_share: if total_memory == 0 {
                0.0
            } else {
                (memory as f64 / total_memory as f64 * 100.0) as f32
            },
        })
        .collect()
}
