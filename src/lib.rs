// STAMPEDE -- ADAPTIVE CPU HOTPLUG CONTROLLER
// CORE LIBRARY: PURE DECISION STATE + SYSFS PLUMBING
//
// tuning.rs    TUNABLES + THRESHOLD MATRIX (ZERO SYSFS DEPENDENCIES, TESTABLE OFFLINE)
// rqavg.rs     RUN QUEUE SAMPLER: TIME-WEIGHTED AVERAGE, RESET-ON-READ
// engine.rs    DECISION ENGINE: TICK LOOP, PER-CORE HISTORY, DRIFT RESYNC
// executor.rs  TRANSITION EXECUTOR: ASYNC ONLINE/OFFLINE WORKERS
// platform.rs  CPU PLATFORM TRAIT + /proc AND /sys IMPLEMENTATION
// event.rs     PER-TICK TELEMETRY RING BUFFER

pub mod event;
pub mod executor;
pub mod platform;
pub mod rqavg;
pub mod tuning;

pub mod engine;

// LIGHTWEIGHT STDERR LOGGING -- ONE LINE PER EVENT, NO FRAMEWORK.

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => { eprintln!("[STAMPEDE] {}", format_args!($($arg)*)) };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => { eprintln!("[STAMPEDE:WARN] {}", format_args!($($arg)*)) };
}
