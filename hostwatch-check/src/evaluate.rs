use confique::Config;
use hostwatch_model::{MetricKind, MetricSample};
use serde::Serialize;

/// Alert limits in whole percent. A metric alerts only when strictly above
/// its limit.
#[derive(Config, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Thresholds {
    #[config(default = 80, env = "HOSTWATCH_CPU_THRESHOLD")]
    pub cpu: u8,

    #[config(default = 80, env = "HOSTWATCH_MEMORY_THRESHOLD")]
    pub memory: u8,

    #[config(default = 90, env = "HOSTWATCH_DISK_THRESHOLD")]
    pub disk: u8,
}

impl Thresholds {
    pub fn limit(&self, kind: MetricKind) -> u8 {
        match kind {
            MetricKind::Cpu => self.cpu,
            MetricKind::Memory => self.memory,
            MetricKind::Disk => self.disk,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub kind: MetricKind,
    pub value: u8,
    pub limit: u8,
}

impl Alert {
    pub fn message(&self) -> String {
        format!("{} usage is high: {}%", self.kind, self.value)
    }
}

#[inline]
pub fn exceeds(value: u8, limit: u8) -> bool {
    value > limit
}

pub fn evaluate(sample: &MetricSample, thresholds: &Thresholds) -> Option<Alert> {
    let limit = thresholds.limit(sample.kind);
    exceeds(sample.value, limit).then(|| Alert {
        kind: sample.kind,
        value: sample.value,
        limit,
    })
}
