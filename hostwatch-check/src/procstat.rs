//! Aggregate CPU time counters from `/proc/stat`.

use hostwatch_model::percent_floor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuTimes {
    pub idle: u64,
    pub total: u64,
}

impl CpuTimes {
    /// Parses the aggregate `cpu` line.
    ///
    /// Counted columns are user, nice, system, idle, iowait, irq, softirq and
    /// steal. Guest time is already included in user time.
    pub fn parse(stat: &str) -> Option<Self> {
        let line = stat.lines().find(|l| l.starts_with("cpu "))?;
        let fields = line
            .split_whitespace()
            .skip(1)
            .take(8)
            .map(|f| f.parse::<u64>().ok())
            .collect::<Option<Vec<_>>>()?;
        if fields.len() < 4 {
            return None;
        }

        Some(Self {
            idle: fields[3],
            total: fields.iter().sum(),
        })
    }

    /// `100 - idle%` over the interval since `earlier`.
    ///
    /// Only the idle column counts as idle; iowait is reported as busy, the
    /// same reading `top` gives with `100 - id`.
    pub fn busy_percent_since(&self, earlier: &CpuTimes) -> Option<u8> {
        let total = self.total.checked_sub(earlier.total)?;
        let idle = self.idle.checked_sub(earlier.idle)?;
        percent_floor(total.saturating_sub(idle), total)
    }
}

#[cfg(target_os = "linux")]
pub fn read() -> std::io::Result<CpuTimes> {
    let stat = std::fs::read_to_string("/proc/stat")?;
    CpuTimes::parse(&stat).ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "malformed cpu line in /proc/stat",
        )
    })
}
