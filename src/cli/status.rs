// ONE-SHOT TOPOLOGY REPORT -- PER-CORE ONLINE STATE, FREQUENCY, AND LOAD
// OVER A SHORT /proc/stat DELTA. READ-ONLY; SAFE WITHOUT ROOT.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use stampede::platform::{CpuPlatform, CpuTimes, SysfsCpu};

const SAMPLE_MS: u64 = 200;

pub fn run_status() -> Result<()> {
    let platform = Arc::new(SysfsCpu::new()?);
    let cores = platform.core_count();

    let before: Vec<CpuTimes> = (0..cores)
        .map(|cpu| platform.cpu_times(cpu).unwrap_or_default())
        .collect();
    std::thread::sleep(Duration::from_millis(SAMPLE_MS));

    println!(
        "CORES: {}  ONLINE: {}  RUNNABLE: {}",
        cores,
        platform.online_count(),
        platform.runnable_tasks()
    );
    println!();
    println!("{:<6} {:<8} {:<12} {:<6}", "CPU", "STATE", "FREQ_KHZ", "LOAD%");
    println!("{}", "-".repeat(36));

    for cpu in 0..cores {
        let online = platform.is_online(cpu);
        if !online {
            println!("{:<6} {:<8} {:<12} {:<6}", cpu, "offline", "-", "-");
            continue;
        }
        let after = platform.cpu_times(cpu).unwrap_or_default();
        let wall = after.wall_us.saturating_sub(before[cpu].wall_us);
        let idle = after.idle_us.saturating_sub(before[cpu].idle_us);
        let load = if wall > idle {
            100 * (wall - idle) / wall
        } else {
            0
        };
        let freq = platform.frequency_khz(cpu, false);
        println!("{:<6} {:<8} {:<12} {:<6}", cpu, "online", freq, load);
    }

    Ok(())
}
