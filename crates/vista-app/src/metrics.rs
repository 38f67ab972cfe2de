use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::thread;

use serde::Serialize;
use sysinfo::{Disks, MINIMUM_CPU_UPDATE_INTERVAL, System};

/// Host utilization plus how long the serving model has been up.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemMetrics {
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub disk_percent: f32,
    pub uptime: String,
}

#[derive(Debug)]
pub struct MetricsCollector {
    system: Mutex<System>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn percent(used: u64, total: u64) -> f32 {
    if total == 0 {
        0.0
    } else {
        (used as f64 / total as f64 * 100.0) as f32
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    /// Samples CPU over a short interval, so this blocks briefly.
    pub fn collect(&self, uptime: String) -> SystemMetrics {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);

        system.refresh_cpu_usage();
        thread::sleep(MINIMUM_CPU_UPDATE_INTERVAL);
        system.refresh_cpu_usage();
        system.refresh_memory();

        SystemMetrics {
            cpu_percent: system.global_cpu_usage(),
            memory_percent: percent(system.used_memory(), system.total_memory()),
            disk_percent: disk_percent(Path::new("/")),
            uptime,
        }
    }
}

/// Usage of the disk holding `path` (the mount point with the longest matching prefix).
pub fn disk_percent(path: &Path) -> f32 {
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| {
            let total = disk.total_space();
            percent(total.saturating_sub(disk.available_space()), total)
        })
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, 0), 0.0);
        assert_eq!(percent(1, 4), 25.0);
    }

    #[test]
    fn test_collect_ranges() {
        let metrics = MetricsCollector::new().collect("0d 0h 0m 1s".into());
        for value in [metrics.cpu_percent, metrics.memory_percent, metrics.disk_percent] {
            assert!((0.0..=100.0).contains(&value), "{value}");
        }

        let json = serde_json::to_value(&metrics).unwrap();
        assert_eq!(json["uptime"], "0d 0h 0m 1s");
        assert!(json["cpu_percent"].is_number());
    }
}
