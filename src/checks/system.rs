use super::CheckError;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sysinfo::{CpuExt, CpuRefreshKind, DiskExt, RefreshKind, System, SystemExt};

const MIN_CPU_SAMPLE: Duration = Duration::from_millis(200);

pub struct CpuCheck {
    system: System,
    sample: Duration,
}

impl CpuCheck {
    pub fn new(sample: Duration) -> Self {
        Self {
            system: System::new_with_specifics(
                RefreshKind::new().with_cpu(CpuRefreshKind::everything()),
            ),
            sample: sample.max(MIN_CPU_SAMPLE),
        }
    }

    pub async fn run(&mut self) -> Result<f64, CheckError> {
        self.system.refresh_cpu();
        tokio::time::sleep(self.sample).await;
        self.system.refresh_cpu();

        let cpus = self.system.cpus();
        if cpus.is_empty() {
            return Err(CheckError::MetricUnavailable("список CPU пуст".to_string()));
        }
        let sum: f32 = cpus.iter().map(|c| c.cpu_usage()).sum();
        Ok((sum / cpus.len() as f32) as f64)
    }
}

pub struct MemoryCheck {
    system: System,
}

impl MemoryCheck {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    pub fn run(&mut self) -> Result<f64, CheckError> {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            return Err(CheckError::MetricUnavailable(
                "объём памяти неизвестен".to_string(),
            ));
        }
        Ok(self.system.used_memory() as f64 / total as f64 * 100.0)
    }
}

pub struct LoadCheck {
    system: System,
}

impl LoadCheck {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    pub fn run(&mut self) -> Result<f64, CheckError> {
        let load = self.system.load_average().one;
        if !load.is_finite() || load < 0.0 {
            return Err(CheckError::MetricUnavailable(
                "средняя нагрузка недоступна".to_string(),
            ));
        }
        Ok(load)
    }
}

pub struct DiskUsageCheck {
    system: System,
    path: PathBuf,
}

impl DiskUsageCheck {
    pub fn new(path: PathBuf) -> Self {
        Self {
            system: System::new(),
            path,
        }
    }

    pub fn run(&mut self) -> Result<f64, CheckError> {
        self.system.refresh_disks_list();
        self.system.refresh_disks();

        let mounts = self
            .system
            .disks()
            .iter()
            .map(|d| (d.mount_point(), d.total_space(), d.available_space()));
        usage_for_path(&self.path, mounts).ok_or_else(|| {
            CheckError::MetricUnavailable(format!(
                "не найдена файловая система для {}",
                self.path.display()
            ))
        })
    }
}

// Longest mount prefix wins.
fn usage_for_path<'a>(
    path: &Path,
    mounts: impl Iterator<Item = (&'a Path, u64, u64)>,
) -> Option<f64> {
    let (_, total, available) = mounts
        .filter(|(mount, _, _)| path.starts_with(mount))
        .max_by_key(|(mount, _, _)| mount.as_os_str().len())?;
    if total == 0 {
        return None;
    }
    let used = total.saturating_sub(available);
    Some(used as f64 / total as f64 * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_picks_longest_mount_prefix() {
        let mounts = [
            (Path::new("/"), 100_u64, 50_u64),
            (Path::new("/home"), 200, 20),
            (Path::new("/home/user/data"), 0, 0),
        ];
        let usage = usage_for_path(Path::new("/home/user"), mounts.iter().copied()).unwrap();
        assert!((usage - 90.0).abs() < 1e-9);

        let root = usage_for_path(Path::new("/var/log"), mounts.iter().copied()).unwrap();
        assert!((root - 50.0).abs() < 1e-9);
    }

    #[test]
    fn usage_without_matching_mount_is_none() {
        let mounts = [(Path::new("/data"), 100_u64, 50_u64)];
        assert!(usage_for_path(Path::new("/"), mounts.iter().copied()).is_none());

        let empty = [(Path::new("/"), 0_u64, 0_u64)];
        assert!(usage_for_path(Path::new("/"), empty.iter().copied()).is_none());
    }

    #[tokio::test]
    async fn cpu_check_reports_percentage() {
        let mut check = CpuCheck::new(Duration::from_millis(10));
        let value = check.run().await.expect("замер CPU");
        assert!((0.0..=100.0).contains(&value));
    }
}
