// STAMPEDE v1.2.0 -- ADAPTIVE CPU HOTPLUG CONTROLLER
// BRINGS CORES ONLINE WHEN LOAD, FREQUENCY, AND RUN QUEUE PRESSURE DEMAND
// IT; PARKS THEM WHEN THEY GO QUIET.
//
// DECISIONS RUN IN A FIXED-PERIOD FEEDBACK LOOP; HARDWARE TRANSITIONS RUN
// ON ASYNC WORKERS SO THE LOOP NEVER WAITS ON THE KERNEL.

mod cli;

use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use stampede::engine::Controller;
use stampede::platform::{CpuPlatform, SysfsCpu, CPU_SYSFS_ROOT};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

#[derive(Parser)]
#[command(name = "stampede")]
#[command(about = "STAMPEDE -- ADAPTIVE CPU HOTPLUG CONTROLLER")]
struct Cli {
    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand)]
enum Cmd {
    // RUN THE CONTROLLER (DEFAULT)
    Run(RunArgs),
    // CHECK KERNEL + SYSFS PREREQUISITES
    Check,
    // ONE-SHOT TOPOLOGY AND LOAD REPORT
    Status,
}

#[derive(Args)]
struct RunArgs {
    // DECISION TICK PERIOD IN MICROSECONDS (10MS FLOOR)
    #[arg(long, default_value_t = 60_000)]
    sampling_rate_us: i64,

    // EVALUATE CORE-UP ONCE EVERY N TICKS [1,40]
    #[arg(long, default_value_t = 10)]
    up_rate: i64,

    // EVALUATE CORE-DOWN ONCE EVERY N TICKS [1,40]
    #[arg(long, default_value_t = 20)]
    down_rate: i64,

    // MAX CORES ONLINE AT ONCE (DEFAULT: ALL)
    #[arg(long)]
    max_cores: Option<i64>,

    // READ cpuinfo_cur_freq (HARDWARE) INSTEAD OF scaling_cur_freq (CACHED)
    #[arg(long)]
    accurate_freq: bool,

    // EXTRA TUNABLES, NAME=VALUE, REPEATABLE. E.G. --set hotplug_load_2_1=70
    #[arg(long = "set", value_name = "NAME=VALUE")]
    set: Vec<String>,

    // PRINT A TELEMETRY LINE EVERY SECOND
    #[arg(long)]
    verbose: bool,

    // DUMP THE FULL TICK LOG ON EXIT
    #[arg(long)]
    dump_log: bool,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            sampling_rate_us: 60_000,
            up_rate: 10,
            down_rate: 20,
            max_cores: None,
            accurate_freq: false,
            set: Vec::new(),
            verbose: false,
            dump_log: false,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command.unwrap_or_else(|| Cmd::Run(RunArgs::default())) {
        Cmd::Run(args) => run(args),
        Cmd::Check => cli::check::run_check(),
        Cmd::Status => cli::status::run_status(),
    }
}

fn run(args: RunArgs) -> Result<()> {
    ctrlc::set_handler(move || {
        SHUTDOWN.store(true, Ordering::Relaxed);
    })?;

    let platform = Arc::new(SysfsCpu::new()?);
    let cores = platform.core_count();
    let governor = fs::read_to_string(format!(
        "{}/cpu0/cpufreq/scaling_governor",
        CPU_SYSFS_ROOT
    ))
    .unwrap_or_default()
    .trim()
    .to_string();

    println!("STAMPEDE v1.2.0");
    println!(
        "CORES:           {} ({} ONLINE, governor: {})",
        cores,
        platform.online_count(),
        if governor.is_empty() { "unknown" } else { &governor }
    );
    println!("TICK:            {} us", args.sampling_rate_us);
    println!(
        "RATES:           UP 1/{}  DOWN 1/{}",
        args.up_rate, args.down_rate
    );
    println!(
        "MAX CORES:       {}",
        args.max_cores.unwrap_or(cores as i64)
    );
    println!("ACCURATE FREQ:   {}", args.accurate_freq);
    println!();

    let controller = Controller::new(platform.clone())?;
    controller.set_sampling_period_us(args.sampling_rate_us);
    controller.cfg.set_up_rate(args.up_rate);
    controller.cfg.set_down_rate(args.down_rate);
    if let Some(max) = args.max_cores {
        controller.cfg.set_max_cores_online(max);
    }
    controller.cfg.set_accurate_frequency_source(args.accurate_freq);

    for entry in &args.set {
        let (name, value) = entry
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("--set expects NAME=VALUE, got {:?}", entry))?;
        controller.apply_tunable(name, value)?;
    }

    controller.enable();
    println!("STAMPEDE IS ACTIVE (CTRL+C TO EXIT)");

    while !SHUTDOWN.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_secs(1));
        if args.verbose {
            println!("{}", controller.telemetry());
        }
    }

    println!("STAMPEDE IS SHUTTING DOWN");
    controller.shutdown();

    // HAND THE MACHINE BACK FULLY POPULATED
    for cpu in 1..cores {
        if let Err(e) = platform.set_online(cpu, true) {
            stampede::log_warn!("cpu{} restore failed: {:#}", cpu, e);
        }
    }

    if args.dump_log {
        controller.dump_log();
    }
    controller.summary();

    println!("STAMPEDE OUT.");
    Ok(())
}
