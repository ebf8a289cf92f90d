use super::CheckError;
use std::collections::VecDeque;
#[cfg(target_os = "linux")]
use std::fs;
#[cfg(target_os = "linux")]
use std::path::Path;
use std::time::Instant;

const SECTOR_BYTES: u64 = 512;

/// Disk throughput (read + write, bytes per second) averaged over the last
/// `capacity` runs.
///
/// The instance has to be reused between runs: the first call only records
/// the counter baseline, and the window is lost with the instance.
pub struct DiskIoCheck {
    window: VecDeque<f64>,
    capacity: usize,
    last: Option<(Instant, u64)>,
    read_counters: fn() -> Result<u64, CheckError>,
}

impl DiskIoCheck {
    pub fn new(capacity: usize) -> Self {
        Self::with_counters(capacity, read_total_bytes)
    }

    pub fn with_counters(capacity: usize, read_counters: fn() -> Result<u64, CheckError>) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            last: None,
            read_counters,
        }
    }

    pub fn run(&mut self) -> Result<f64, CheckError> {
        let total = (self.read_counters)()?;
        self.record(Instant::now(), total).ok_or(CheckError::Warmup)
    }

    fn record(&mut self, at: Instant, total_bytes: u64) -> Option<f64> {
        let (prev_at, prev_total) = self.last.replace((at, total_bytes))?;
        let elapsed = at.saturating_duration_since(prev_at).as_secs_f64().max(0.001);
        // Counters may wrap or reset after a device reappears.
        let rate = total_bytes.saturating_sub(prev_total) as f64 / elapsed;

        self.window.push_back(rate);
        while self.window.len() > self.capacity {
            self.window.pop_front();
        }
        Some(self.window.iter().sum::<f64>() / self.window.len() as f64)
    }
}

#[cfg(target_os = "linux")]
fn read_total_bytes() -> Result<u64, CheckError> {
    let text = fs::read_to_string("/proc/diskstats")?;
    Ok(parse_diskstats(&text, |name| {
        Path::new("/sys/block").join(name.replace('/', "!")).exists()
    }))
}

#[cfg(not(target_os = "linux"))]
fn read_total_bytes() -> Result<u64, CheckError> {
    Err(CheckError::MetricUnavailable(
        "счётчики дисков поддерживаются только в Linux".to_string(),
    ))
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_diskstats(text: &str, is_whole_disk: impl Fn(&str) -> bool) -> u64 {
    text.lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 10 {
                return None;
            }
            let name = fields[2];
            if name.starts_with("loop") || name.starts_with("ram") || !is_whole_disk(name) {
                return None;
            }
            let sectors_read = fields[5].parse::<u64>().ok()?;
            let sectors_written = fields[9].parse::<u64>().ok()?;
            Some(
                sectors_read
                    .saturating_add(sectors_written)
                    .saturating_mul(SECTOR_BYTES),
            )
        })
        .sum()
}
