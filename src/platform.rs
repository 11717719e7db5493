// CPU PLATFORM ACCESS
// EVERYTHING THE CONTROLLER NEEDS FROM THE KERNEL, BEHIND ONE TRAIT:
// CUMULATIVE IDLE/WALL TIME, CLOCK FREQUENCY, RUNNABLE COUNT, TOPOLOGY,
// AND THE ONLINE/OFFLINE SWITCH. THE DECISION LOOP NEVER TOUCHES SYSFS
// DIRECTLY -- HARNESSES DRIVE IT WITH A SCRIPTED IMPLEMENTATION.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};

pub const CPU_SYSFS_ROOT: &str = "/sys/devices/system/cpu";

// /proc/stat REPORTS USER_HZ TICKS; THE KERNEL ABI PINS USER_HZ AT 100.
const JIFFY_US: u64 = 10_000;

// CUMULATIVE PER-CORE TIME COUNTERS. MONOTONIC WHILE THE CORE IS ONLINE;
// AN OFFLINE CORE'S COUNTERS FREEZE (AND ITS /proc/stat LINE VANISHES).
#[derive(Clone, Copy, Default, Debug)]
pub struct CpuTimes {
    pub idle_us: u64, // idle + iowait
    pub wall_us: u64, // SUM OF ALL FIELDS
}

pub trait CpuPlatform: Send + Sync + 'static {
    // POSSIBLE CORES -- FIXED FOR THE LIFE OF THE PROCESS.
    fn core_count(&self) -> usize;
    fn cpu_times(&self, cpu: usize) -> Result<CpuTimes>;
    // CURRENT CLOCK IN KHZ; 0 WHEN UNREADABLE. accurate SELECTS THE
    // HARDWARE-READ SOURCE OVER THE GOVERNOR'S CACHED VALUE.
    fn frequency_khz(&self, cpu: usize, accurate: bool) -> u64;
    // INSTANTANEOUS SYSTEM-WIDE RUNNABLE TASK COUNT.
    fn runnable_tasks(&self) -> u64;
    fn is_online(&self, cpu: usize) -> bool;
    fn online_count(&self) -> usize;
    // REQUEST A HARDWARE TRANSITION. MAY FAIL; THE CALLER'S LOGICAL STATE
    // IS RECONCILED THROUGH DRIFT DETECTION, NOT HERE.
    fn set_online(&self, cpu: usize, online: bool) -> Result<()>;
}

// --- SYSFS / PROCFS IMPLEMENTATION ---

pub struct SysfsCpu {
    cores: usize,
}

impl SysfsCpu {
    pub fn new() -> Result<Self> {
        let raw = fs::read_to_string(format!("{}/possible", CPU_SYSFS_ROOT))
            .context("reading cpu possible mask")?;
        let cores = count_cpu_ranges(&raw);
        if cores == 0 {
            bail!("no possible cpus reported by {}/possible", CPU_SYSFS_ROOT);
        }
        Ok(Self { cores })
    }
}

impl CpuPlatform for SysfsCpu {
    fn core_count(&self) -> usize {
        self.cores
    }

    fn cpu_times(&self, cpu: usize) -> Result<CpuTimes> {
        let raw = fs::read_to_string("/proc/stat").context("reading /proc/stat")?;
        let prefix = format!("cpu{} ", cpu);
        for line in raw.lines() {
            if !line.starts_with(&prefix) {
                continue;
            }
            let fields: Vec<u64> = line
                .split_whitespace()
                .skip(1)
                .filter_map(|s| s.parse().ok())
                .collect();
            if fields.len() < 4 {
                break;
            }
            // idle + iowait
            let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
            let total: u64 = fields.iter().sum();
            return Ok(CpuTimes {
                idle_us: idle * JIFFY_US,
                wall_us: total * JIFFY_US,
            });
        }
        // OFFLINE CORES DROP OUT OF /proc/stat; REPORT FROZEN ZEROS AND LET
        // THE DELTA LOGIC RIDE IT OUT.
        Ok(CpuTimes::default())
    }

    fn frequency_khz(&self, cpu: usize, accurate: bool) -> u64 {
        let node = if accurate {
            "cpuinfo_cur_freq"
        } else {
            "scaling_cur_freq"
        };
        let path = format!("{}/cpu{}/cpufreq/{}", CPU_SYSFS_ROOT, cpu, node);
        fs::read_to_string(path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0)
    }

    fn runnable_tasks(&self) -> u64 {
        let raw = fs::read_to_string("/proc/stat").unwrap_or_default();
        for line in raw.lines() {
            if let Some(rest) = line.strip_prefix("procs_running ") {
                return rest.trim().parse().unwrap_or(0);
            }
        }
        0
    }

    fn is_online(&self, cpu: usize) -> bool {
        let path = format!("{}/cpu{}/online", CPU_SYSFS_ROOT, cpu);
        match fs::read_to_string(&path) {
            Ok(s) => s.trim() == "1",
            // THE BOOT CORE HAS NO online NODE -- PRESENT MEANS RUNNING.
            Err(_) => Path::new(&format!("{}/cpu{}", CPU_SYSFS_ROOT, cpu)).exists(),
        }
    }

    fn online_count(&self) -> usize {
        let raw = fs::read_to_string(format!("{}/online", CPU_SYSFS_ROOT)).unwrap_or_default();
        count_cpu_ranges(&raw)
    }

    fn set_online(&self, cpu: usize, online: bool) -> Result<()> {
        if cpu == 0 {
            return Ok(()); // CPU 0 CANNOT BE HOTPLUGGED
        }
        let path = format!("{}/cpu{}/online", CPU_SYSFS_ROOT, cpu);
        fs::write(&path, if online { "1" } else { "0" })
            .with_context(|| format!("setting cpu{} {}", cpu, if online { "online" } else { "offline" }))
    }
}

// PARSE "0-3" / "0,2-5" RANGE LISTS FROM THE CPU TOPOLOGY NODES.
pub fn count_cpu_ranges(raw: &str) -> usize {
    let mut count = 0usize;
    for range in raw.trim().split(',') {
        let parts: Vec<&str> = range.split('-').collect();
        match parts.len() {
            1 => {
                if parts[0].parse::<u32>().is_ok() {
                    count += 1;
                }
            }
            2 => {
                if let (Ok(lo), Ok(hi)) = (parts[0].parse::<u32>(), parts[1].parse::<u32>()) {
                    count += (hi - lo + 1) as usize;
                }
            }
            _ => {}
        }
    }
    count
}
