use hostwatch_model::{
    MetricKind, MetricSample, ProcessSample,
    eventlog::{AppendLog, LogWriteError},
};
use log::{info, warn};
use serde::Serialize;

use crate::{
    Conf,
    evaluate::{Alert, evaluate},
    query::{MetricSource, QueryError},
};

#[derive(Debug, Default, Serialize)]
pub struct CheckReport {
    pub samples: Vec<MetricSample>,
    pub alerts: Vec<Alert>,
    pub processes: Vec<ProcessSample>,
    pub failures: Vec<QueryError>,
}

impl CheckReport {
    /// Some metric could not be read at all.
    pub fn is_degraded(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Process exit status: alerts alone still exit 0, a failed query does not.
    pub fn exit_status(&self) -> u8 {
        if self.is_degraded() { 1 } else { 0 }
    }
}

/// Samples every metric once, evaluates it, and appends alert, process and
/// failure lines to `log`.
///
/// Each query is independent: a metric that cannot be read is logged and the
/// remaining ones are still checked. Only a failure to write the log aborts.
pub fn run_check<S: MetricSource>(
    source: &mut S,
    conf: &Conf,
    log: &mut AppendLog,
) -> Result<CheckReport, LogWriteError> {
    let mut report = CheckReport::default();

    for kind in [MetricKind::Cpu, MetricKind::Memory, MetricKind::Disk] {
        let value = match kind {
            MetricKind::Cpu => source.sample_cpu(),
            MetricKind::Memory => source.sample_memory(),
            MetricKind::Disk => source.sample_disk(&conf.disk_mount_point),
        };

        match value {
            Ok(value) => {
                let sample = MetricSample::now(kind, value);
                info!("{kind} usage: {value}%");
                if let Some(alert) = evaluate(&sample, &conf.thresholds) {
                    log.append(&alert.message())?;
                    report.alerts.push(alert);
                }
                report.samples.push(sample);
            }
            Err(e) => record_failure(&mut report, log, e)?,
        }
    }

    match source.list_top_processes(conf.top_processes) {
        Ok(processes) => {
            log.append(&format!(
                "Top {} memory-consuming processes:",
                processes.len()
            ))?;
            for p in &processes {
                log.append(&format!(
                    "pid={} mem={:.1}% cmd={}",
                    p.pid, p.memory_share, p.command
                ))?;
            }
            report.processes = processes;
        }
        Err(e) => record_failure(&mut report, log, e)?,
    }

    Ok(report)
}

fn record_failure(
    report: &mut CheckReport,
    log: &mut AppendLog,
    err: QueryError,
) -> Result<(), LogWriteError> {
    warn!("{err}");
    log.append(&format!("Unable to sample: {err}"))?;
    report.failures.push(err);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use hostwatch_model::eventlog::read_entries;

    use super::*;
    use crate::evaluate::Thresholds;

    struct FakeSource {
        cpu: Result<u8, QueryError>,
        memory: Result<u8, QueryError>,
        disk: Result<u8, QueryError>,
        processes: Result<Vec<ProcessSample>, QueryError>,
        mount_points: Vec<PathBuf>,
    }

    impl FakeSource {
        fn healthy() -> Self {
            Self {
                cpu: Ok(10),
                memory: Ok(20),
                disk: Ok(30),
                processes: Ok(Vec::new()),
                mount_points: Vec::new(),
            }
        }
    }

    impl MetricSource for FakeSource {
        fn sample_cpu(&mut self) -> Result<u8, QueryError> {
            self.cpu.clone()
        }

        fn sample_memory(&mut self) -> Result<u8, QueryError> {
            self.memory.clone()
        }

        fn sample_disk(&mut self, mount_point: &Path) -> Result<u8, QueryError> {
            self.mount_points.push(mount_point.to_path_buf());
            self.disk.clone()
        }

        fn list_top_processes(&mut self, limit: usize) -> Result<Vec<ProcessSample>, QueryError> {
            self.processes
                .clone()
                .map(|p| p.into_iter().take(limit).collect())
        }
    }

    fn conf(log_path: &Path) -> Conf {
        Conf {
            log_path: log_path.to_path_buf(),
            disk_mount_point: PathBuf::from("/srv"),
            top_processes: 10,
            thresholds: Thresholds {
                cpu: 80,
                memory: 80,
                disk: 90,
            },
        }
    }

    fn check(source: &mut FakeSource) -> (CheckReport, Vec<String>) {
        let dir = tempfile::tempdir().unwrap();
        let conf = conf(&dir.path().join("health.log"));
        let mut log = AppendLog::open(&conf.log_path).unwrap();

        let report = run_check(source, &conf, &mut log).unwrap();
        let messages = read_entries(&conf.log_path)
            .unwrap()
            .into_iter()
            .map(|e| e.message)
            .collect();
        (report, messages)
    }

    #[test]
    fn high_cpu_logs_one_alert() {
        let mut source = FakeSource {
            cpu: Ok(85),
            ..FakeSource::healthy()
        };
        let (report, messages) = check(&mut source);

        let alerts: Vec<_> = messages
            .iter()
            .filter(|m| m.contains("CPU usage is high: 85%"))
            .collect();
        assert_eq!(alerts.len(), 1);
        assert_eq!(report.alerts.len(), 1);
        assert!(!report.is_degraded());
        assert_eq!(report.exit_status(), 0);
    }

    #[test]
    fn disk_under_threshold_is_quiet() {
        let mut source = FakeSource {
            disk: Ok(50),
            ..FakeSource::healthy()
        };
        let (report, messages) = check(&mut source);

        assert!(messages.iter().all(|m| !m.contains("Disk usage is high")));
        assert!(report.alerts.is_empty());
        assert_eq!(source.mount_points, [PathBuf::from("/srv")]);
    }

    #[test]
    fn value_at_threshold_is_quiet() {
        let mut source = FakeSource {
            cpu: Ok(80),
            memory: Ok(80),
            disk: Ok(90),
            ..FakeSource::healthy()
        };
        let (report, messages) = check(&mut source);

        assert!(report.alerts.is_empty());
        assert!(messages.iter().all(|m| !m.contains("is high")));
    }

    #[test]
    fn every_exceeding_metric_alerts() {
        let mut source = FakeSource {
            cpu: Ok(99),
            memory: Ok(91),
            disk: Ok(95),
            ..FakeSource::healthy()
        };
        let (report, messages) = check(&mut source);

        assert_eq!(report.alerts.len(), 3);
        assert_eq!(
            &messages[..3],
            [
                "CPU usage is high: 99%",
                "Memory usage is high: 91%",
                "Disk usage is high: 95%",
            ]
        );
    }

    #[test]
    fn unavailable_metric_does_not_stop_others() {
        let mut source = FakeSource {
            cpu: Err(QueryError::Unavailable(
                MetricKind::Cpu,
                "/proc/stat missing".to_owned(),
            )),
            memory: Ok(95),
            ..FakeSource::healthy()
        };
        let (report, messages) = check(&mut source);

        assert!(report.is_degraded());
        assert_eq!(report.samples.len(), 2);
        assert_eq!(
            messages[0],
            "Unable to sample: CPU usage source unavailable: /proc/stat missing"
        );
        assert_eq!(messages[1], "Memory usage is high: 95%");
    }

    #[test]
    fn lists_top_processes() {
        let processes = (0..12)
            .map(|i| ProcessSample {
                pid: 100 + i,
                command: format!("worker --id {i}"),
                memory_share: 12.0 - i as f32,
            })
            .collect();
        let mut source = FakeSource {
            processes: Ok(processes),
            ..FakeSource::healthy()
        };
        let (report, messages) = check(&mut source);

        assert_eq!(report.processes.len(), 10);
        assert_eq!(messages[0], "Top 10 memory-consuming processes:");
        assert_eq!(messages[1], "pid=100 mem=12.0% cmd=worker --id 0");
        assert_eq!(messages[10], "pid=109 mem=3.0% cmd=worker --id 9");
        assert_eq!(messages.len(), 11);
    }

    #[test]
    fn process_table_failure_is_logged() {
        let mut source = FakeSource {
            processes: Err(QueryError::ProcessTable("no processes visible".to_owned())),
            ..FakeSource::healthy()
        };
        let (report, messages) = check(&mut source);

        assert!(report.is_degraded());
        assert_eq!(
            messages,
            ["Unable to sample: process table unavailable: no processes visible"]
        );
    }

    #[test]
    fn failed_query_exits_non_zero() {
        let mut source = FakeSource {
            disk: Err(QueryError::Unavailable(
                MetricKind::Disk,
                "no filesystem mounted at /srv".to_owned(),
            )),
            ..FakeSource::healthy()
        };
        let (report, _) = check(&mut source);
        assert_eq!(report.exit_status(), 1);

        let (report, _) = check(&mut FakeSource::healthy());
        assert_eq!(report.exit_status(), 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn unwritable_log_aborts_check() {
        let conf = conf(Path::new("/dev/full"));
        let mut log = AppendLog::open(&conf.log_path).unwrap();
        let mut source = FakeSource {
            cpu: Ok(85),
            ..FakeSource::healthy()
        };

        let err = run_check(&mut source, &conf, &mut log).unwrap_err();
        assert!(matches!(err, LogWriteError::Write { .. }));
    }

    #[test]
    fn report_serializes() {
        let mut source = FakeSource {
            cpu: Ok(85),
            ..FakeSource::healthy()
        };
        let (report, _) = check(&mut source);
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["samples"][0]["kind"], "cpu");
        assert_eq!(json["samples"][0]["value"], 85);
        assert_eq!(json["alerts"][0]["limit"], 80);
    }
}
