//! Per-operation execution time statistics.

use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use tracing::info;

use crate::error::TraceError;
use crate::operation::{OperationId, NUM_OPERATIONS};

/// Header line of the CSV report.
pub const CSV_HEADER: &str = "id, first, last, n, mean(us), std(us), min(us), max(us)";

#[derive(Clone, Copy, Debug, Default)]
struct Stat {
    count: u64,
    total: Duration,
    min: Duration,
    max: Duration,
    mean_us: f64,
    m2: f64,
}

impl Stat {
    fn add(&mut self, elapsed: Duration) {
        if self.count == 0 {
            self.min = elapsed;
            self.max = elapsed;
        } else {
            self.min = self.min.min(elapsed);
            self.max = self.max.max(elapsed);
        }
        self.count += 1;
        self.total += elapsed;
        let x = micros(elapsed);
        let delta = x - self.mean_us;
        self.mean_us += delta / self.count as f64;
        self.m2 += delta * (x - self.mean_us);
    }

    fn std_us(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        (self.m2 / (self.count - 1) as f64).sqrt()
    }
}

fn micros(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1_000.0
}

/// Count, total, min, max and running variance of each operation kind.
#[derive(Clone, Debug)]
pub struct ProfileStats {
    stats: [Stat; NUM_OPERATIONS],
}

impl Default for ProfileStats {
    fn default() -> Self {
        Self {
            stats: [Stat::default(); NUM_OPERATIONS],
        }
    }
}

impl ProfileStats {
    /// Create empty statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one execution of `id` that took `elapsed`.
    pub fn record(&mut self, id: OperationId, elapsed: Duration) {
        self.stats[id.index()].add(elapsed);
    }

    /// Number of executions of `id`.
    pub fn count(&self, id: OperationId) -> u64 {
        self.stats[id.index()].count
    }

    /// Total time spent in `id`.
    pub fn total(&self, id: OperationId) -> Duration {
        self.stats[id.index()].total
    }

    /// Shortest and longest execution of `id`, if it ran at all.
    pub fn min_max(&self, id: OperationId) -> Option<(Duration, Duration)> {
        let stat = &self.stats[id.index()];
        (stat.count > 0).then_some((stat.min, stat.max))
    }

    /// Mean execution time of `id` in microseconds.
    pub fn mean_us(&self, id: OperationId) -> f64 {
        self.stats[id.index()].mean_us
    }

    /// Sample standard deviation of `id` in microseconds.
    pub fn std_us(&self, id: OperationId) -> f64 {
        self.stats[id.index()].std_us()
    }

    /// Time spent across all operations.
    pub fn total_time(&self) -> Duration {
        self.stats.iter().map(|s| s.total).sum()
    }

    /// Number of operations across all kinds.
    pub fn total_count(&self) -> u64 {
        self.stats.iter().map(|s| s.count).sum()
    }

    /// Forget everything.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// One CSV row per executed operation kind, for blocks `first..=last`.
    ///
    /// The header is included when `header` is set.
    pub fn to_csv(&self, first: u64, last: u64, header: bool) -> String {
        let mut out = String::new();
        if header {
            out.push_str(CSV_HEADER);
            out.push('\n');
        }
        for id in OperationId::ALL {
            let stat = &self.stats[id.index()];
            if stat.count == 0 {
                continue;
            }
            let _ = writeln!(
                out,
                "{},{first},{last},{},{},{},{},{}",
                id.label(),
                stat.count,
                stat.mean_us,
                stat.std_us(),
                micros(stat.min),
                micros(stat.max),
            );
        }
        out
    }

    /// Append the CSV report to `path`, writing the header if the file is new
    /// or empty.
    pub fn append_csv(&self, path: &Path, first: u64, last: u64) -> Result<(), TraceError> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let header = file.metadata()?.len() == 0;
        file.write_all(self.to_csv(first, last, header).as_bytes())?;
        Ok(())
    }

    /// Log a per-operation summary at `info` level.
    pub fn log_summary(&self) {
        for id in OperationId::ALL {
            let stat = &self.stats[id.index()];
            if stat.count == 0 {
                continue;
            }
            info!(
                op = id.label(),
                n = stat.count,
                mean_us = stat.mean_us,
                std_us = stat.std_us(),
                "operation profile"
            );
        }
        info!(
            operations = self.total_count(),
            seconds = self.total_time().as_secs_f64(),
            "total state database time"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_per_operation() {
        let mut stats = ProfileStats::new();
        for us in [10, 20, 30] {
            stats.record(OperationId::GetState, Duration::from_micros(us));
        }
        stats.record(OperationId::SetState, Duration::from_micros(5));

        assert_eq!(stats.count(OperationId::GetState), 3);
        assert_eq!(stats.total(OperationId::GetState), Duration::from_micros(60));
        assert_eq!(
            stats.min_max(OperationId::GetState),
            Some((Duration::from_micros(10), Duration::from_micros(30)))
        );
        assert!((stats.mean_us(OperationId::GetState) - 20.0).abs() < 1e-9);
        assert!((stats.std_us(OperationId::GetState) - 10.0).abs() < 1e-9);
        assert_eq!(stats.std_us(OperationId::SetState), 0.0);
        assert_eq!(stats.min_max(OperationId::Close), None);
        assert_eq!(stats.total_count(), 4);
    }

    #[test]
    fn csv_lists_only_executed_operations() {
        let mut stats = ProfileStats::new();
        stats.record(OperationId::EndBlock, Duration::from_micros(2));
        let csv = stats.to_csv(1, 9, true);
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some(CSV_HEADER));
        assert_eq!(lines.next(), Some("EndBlock,1,9,1,2,0,2,2"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn append_csv_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.csv");
        let mut stats = ProfileStats::new();
        stats.record(OperationId::Exist, Duration::from_micros(1));
        stats.append_csv(&path, 0, 0).unwrap();
        stats.append_csv(&path, 1, 1).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().filter(|l| *l == CSV_HEADER).count(), 1);
        assert_eq!(text.lines().count(), 3);
    }
}
