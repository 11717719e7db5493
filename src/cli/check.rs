// ENVIRONMENT PREFLIGHT -- VERIFY THE KERNEL AND SYSFS SURFACES STAMPEDE
// NEEDS BEFORE IT TOUCHES ANYTHING.

use std::io::Read;
use std::path::Path;

use anyhow::Result;

use stampede::platform::CPU_SYSFS_ROOT;

fn check_kernel_config() -> bool {
    let file = match std::fs::File::open("/proc/config.gz") {
        Ok(f) => f,
        Err(_) => {
            println!("  /proc/config.gz       NOT FOUND (SKIPPED)");
            return true;
        }
    };
    let mut decoder = flate2::read::GzDecoder::new(file);
    let mut config = String::new();
    if decoder.read_to_string(&mut config).is_err() {
        println!("  /proc/config.gz       UNREADABLE (SKIPPED)");
        return true;
    }
    let found = config.contains("CONFIG_HOTPLUG_CPU=y");
    if found {
        println!("  CONFIG_HOTPLUG_CPU    OK");
    } else {
        println!("  CONFIG_HOTPLUG_CPU    NOT FOUND -- cpu hotplug may not be available");
    }
    found
}

pub fn run_check() -> Result<()> {
    println!("STAMPEDE DEPENDENCY CHECK");
    println!();

    let mut ok = true;

    println!("SYSFS:");
    let nodes = [
        format!("{}/possible", CPU_SYSFS_ROOT),
        format!("{}/online", CPU_SYSFS_ROOT),
        format!("{}/cpu1/online", CPU_SYSFS_ROOT),
        format!("{}/cpu0/cpufreq/scaling_cur_freq", CPU_SYSFS_ROOT),
    ];
    for node in &nodes {
        if Path::new(node).exists() {
            println!("  {:<48}OK", node);
        } else {
            println!("  {:<48}MISSING", node);
            // A MISSING cpu1/online MEANS A SINGLE-CORE BOX OR NO HOTPLUG;
            // EITHER WAY THERE IS NOTHING FOR THE CONTROLLER TO DO
            ok = false;
        }
    }
    println!();

    println!("PROCFS:");
    let procs_running = std::fs::read_to_string("/proc/stat")
        .map(|s| s.lines().any(|l| l.starts_with("procs_running ")))
        .unwrap_or(false);
    if procs_running {
        println!("  /proc/stat procs_running                        OK");
    } else {
        println!("  /proc/stat procs_running                        MISSING");
        ok = false;
    }
    println!();

    println!("KERNEL CONFIG:");
    if !check_kernel_config() {
        ok = false;
    }
    println!();

    let euid = unsafe { libc::geteuid() };
    if euid == 0 {
        println!("  ROOT                  OK");
    } else {
        println!("  ROOT                  NOT ROOT -- online/offline writes will fail");
    }
    println!();

    if ok {
        println!("ALL CHECKS PASSED");
    } else {
        println!("SOME CHECKS FAILED");
        std::process::exit(1);
    }

    Ok(())
}
