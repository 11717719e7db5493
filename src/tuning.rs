// STAMPEDE TUNING TYPES
// PURE-RUST MODULE: ZERO SYSFS DEPENDENCIES
// SHARED BETWEEN BINARY CRATE (engine.rs, main.rs) AND LIB CRATE (tests)
//
// EVERY KNOB IS A FIELD ATOMIC -- READERS (THE TICK LOOP) NEVER TAKE A LOCK,
// WRITERS (THE CONFIG SURFACE) CLAMP AND COMPARE-BEFORE-STORE SO A WRITE OF
// THE CURRENT VALUE IS A NO-OP.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::OnceLock;

use regex::Regex;

// --- CONTROLLER DEFAULTS AND BOUNDS ---

pub const DEFAULT_SAMPLING_PERIOD_US: u64 = 60_000;
pub const MIN_SAMPLING_PERIOD_US: u64 = 10_000; // HARD FLOOR
pub const DEFAULT_UP_RATE: u64 = 10;
pub const DEFAULT_DOWN_RATE: u64 = 20;
pub const MAX_HOTPLUG_RATE: u64 = 40;

// RUN QUEUE SAMPLER PERIOD -- INDEPENDENT OF THE TICK PERIOD
pub const RQ_SAMPLE_PERIOD_MS: u64 = 10;

// --- DEFAULT THRESHOLD TABLE (PER-CORE-COUNT ROWS) ---

pub const DEFAULT_UP_LOAD: i64 = 65;
pub const DEFAULT_DOWN_LOAD: i64 = 30;
pub const DEFAULT_UP_FREQ_KHZ: i64 = 702_000;
pub const DEFAULT_DOWN_FREQ_KHZ: i64 = 486_000;
pub const DEFAULT_RQ_LOW: i64 = 200; // RUNNABLE TASKS x100
pub const DEFAULT_RQ_HIGH: i64 = 300;

// --- CONTROLLER CONFIG ---

// PROCESS-WIDE TUNABLES. MUTATED ONLY THROUGH THE VALIDATED SETTERS BELOW;
// OUT-OF-RANGE INPUT IS CLAMPED, NEVER REJECTED. EACH SETTER RETURNS WHETHER
// THE STORED VALUE ACTUALLY CHANGED.
pub struct ControllerConfig {
    sampling_period_us: AtomicU64,
    enabled: AtomicBool,
    up_rate: AtomicU64,
    down_rate: AtomicU64,
    max_cores_online: AtomicUsize,
    accurate_frequency_source: AtomicBool,
    core_count: usize,
}

impl ControllerConfig {
    pub fn new(core_count: usize) -> Self {
        Self {
            sampling_period_us: AtomicU64::new(DEFAULT_SAMPLING_PERIOD_US),
            enabled: AtomicBool::new(false),
            up_rate: AtomicU64::new(DEFAULT_UP_RATE),
            down_rate: AtomicU64::new(DEFAULT_DOWN_RATE),
            max_cores_online: AtomicUsize::new(core_count),
            accurate_frequency_source: AtomicBool::new(false),
            core_count,
        }
    }

    pub fn core_count(&self) -> usize {
        self.core_count
    }

    pub fn sampling_period_us(&self) -> u64 {
        self.sampling_period_us.load(Ordering::Relaxed)
    }

    pub fn set_sampling_period_us(&self, input: i64) -> bool {
        let v = (input.max(0) as u64).max(MIN_SAMPLING_PERIOD_US);
        self.sampling_period_us.swap(v, Ordering::Relaxed) != v
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, v: bool) -> bool {
        self.enabled.swap(v, Ordering::Relaxed) != v
    }

    pub fn up_rate(&self) -> u64 {
        self.up_rate.load(Ordering::Relaxed)
    }

    pub fn set_up_rate(&self, input: i64) -> bool {
        let v = clamp_rate(input);
        self.up_rate.swap(v, Ordering::Relaxed) != v
    }

    pub fn down_rate(&self) -> u64 {
        self.down_rate.load(Ordering::Relaxed)
    }

    pub fn set_down_rate(&self, input: i64) -> bool {
        let v = clamp_rate(input);
        self.down_rate.swap(v, Ordering::Relaxed) != v
    }

    pub fn max_cores_online(&self) -> usize {
        self.max_cores_online.load(Ordering::Relaxed)
    }

    pub fn set_max_cores_online(&self, input: i64) -> bool {
        let v = (input.max(1) as usize).min(self.core_count);
        self.max_cores_online.swap(v, Ordering::Relaxed) != v
    }

    pub fn accurate_frequency_source(&self) -> bool {
        self.accurate_frequency_source.load(Ordering::Relaxed)
    }

    pub fn set_accurate_frequency_source(&self, v: bool) -> bool {
        self.accurate_frequency_source.swap(v, Ordering::Relaxed) != v
    }
}

fn clamp_rate(input: i64) -> u64 {
    (input.max(1) as u64).min(MAX_HOTPLUG_RATE)
}

// --- THRESHOLD MATRIX ---

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Direction {
    Down = 0,
    Up = 1,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Metric {
    Freq,
    Load,
    Rq,
}

// ONE ROW'S WORTH OF THRESHOLDS FOR ONE DIRECTION.
#[derive(Clone, Copy, Debug)]
pub struct Thresholds {
    pub load: i64,
    pub freq: u64,
    pub rq: u64,
}

struct MatrixRow {
    load: [AtomicI64; 2],
    freq: [AtomicI64; 2],
    rq: [AtomicI64; 2],
}

// PER-CORE-COUNT UP/DOWN THRESHOLD TABLE. ROW n (1-BASED) HOLDS THE
// THRESHOLDS THAT APPLY WHILE n CORES ARE ONLINE. ROW 1 HAS NO DOWN ENTRY
// (THE LAST CORE NEVER LEAVES) AND ROW core_count HAS NO UP ENTRY (NOTHING
// LEFT TO ESCALATE TO); THOSE CELLS SIT AT ZERO AND ARE NEVER CONSULTED.
pub struct ThresholdMatrix {
    rows: Vec<MatrixRow>,
}

impl ThresholdMatrix {
    pub fn new(core_count: usize) -> Self {
        let last = core_count.saturating_sub(1);
        let rows = (0..core_count)
            .map(|i| {
                let up_valid = i < last;
                let down_valid = i > 0;
                // RUN QUEUE THRESHOLDS STEP UP NEAR THE TOP OF THE TABLE
                let up_rq = if up_valid && core_count >= 3 && i == last - 1 {
                    DEFAULT_RQ_HIGH
                } else {
                    DEFAULT_RQ_LOW
                };
                let down_rq = if i == last && core_count >= 2 {
                    DEFAULT_RQ_HIGH
                } else {
                    DEFAULT_RQ_LOW
                };
                MatrixRow {
                    load: [
                        AtomicI64::new(if down_valid { DEFAULT_DOWN_LOAD } else { 0 }),
                        AtomicI64::new(if up_valid { DEFAULT_UP_LOAD } else { 0 }),
                    ],
                    freq: [
                        AtomicI64::new(if down_valid { DEFAULT_DOWN_FREQ_KHZ } else { 0 }),
                        AtomicI64::new(if up_valid { DEFAULT_UP_FREQ_KHZ } else { 0 }),
                    ],
                    rq: [
                        AtomicI64::new(if down_valid { down_rq } else { 0 }),
                        AtomicI64::new(if up_valid { up_rq } else { 0 }),
                    ],
                }
            })
            .collect();
        Self { rows }
    }

    pub fn core_count(&self) -> usize {
        self.rows.len()
    }

    // THRESHOLDS FOR THE GIVEN ONLINE-CORE COUNT. COUNT IS CLAMPED INTO
    // [1, core_count] -- AN EMPTY OR OVERFULL TOPOLOGY READS THE EDGE ROW.
    pub fn get(&self, online_count: usize, dir: Direction) -> Thresholds {
        let row = online_count.clamp(1, self.rows.len()) - 1;
        let d = dir as usize;
        Thresholds {
            load: self.rows[row].load[d].load(Ordering::Relaxed),
            freq: self.rows[row].freq[d].load(Ordering::Relaxed).max(0) as u64,
            rq: self.rows[row].rq[d].load(Ordering::Relaxed).max(0) as u64,
        }
    }

    // RAW CELL ACCESS FOR THE CONFIG SURFACE. num_cores IS THE 1-BASED ROW.
    pub fn read(&self, num_cores: usize, dir: Direction, metric: Metric) -> Option<i64> {
        let row = self.rows.get(num_cores.checked_sub(1)?)?;
        Some(self.cell(row, dir, metric).load(Ordering::Relaxed))
    }

    // A WRITE OF THE IDENTICAL VALUE SUCCEEDS WITHOUT SIDE EFFECTS.
    pub fn set(&self, num_cores: usize, dir: Direction, metric: Metric, value: i64) -> bool {
        let row = match num_cores.checked_sub(1).and_then(|i| self.rows.get(i)) {
            Some(r) => r,
            None => return false,
        };
        self.cell(row, dir, metric).swap(value, Ordering::Relaxed) != value
    }

    fn cell<'a>(&self, row: &'a MatrixRow, dir: Direction, metric: Metric) -> &'a AtomicI64 {
        let d = dir as usize;
        match metric {
            Metric::Freq => &row.freq[d],
            Metric::Load => &row.load[d],
            Metric::Rq => &row.rq[d],
        }
    }
}

// --- TUNABLE NAMESPACE ---

// FLAT NAME SPACE FOR THE CONFIG SURFACE. NAMES MATCH THE SYSFS ATTRIBUTES
// THE DRIVER HAS ALWAYS EXPOSED: hotplug_freq_<n>_<0|1> IS THE FREQUENCY
// CELL FOR AN n-CORE TOPOLOGY, 0 = DOWN, 1 = UP.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Tunable {
    SamplingRate,
    Enable,
    UpRate,
    DownRate,
    MaxCoresLimit,
    AccurateCpuFreq,
    Matrix {
        metric: Metric,
        num_cores: usize,
        dir: Direction,
    },
}

static MATRIX_NAME: OnceLock<Regex> = OnceLock::new();

fn matrix_name_re() -> &'static Regex {
    MATRIX_NAME.get_or_init(|| {
        Regex::new(r"^hotplug_(freq|load|rq)_([0-9]+)_([01])$").unwrap()
    })
}

// RESOLVE A TUNABLE NAME. RETURNS None FOR UNKNOWN NAMES AND FOR MATRIX
// CELLS THAT DO NOT EXIST ON THIS TOPOLOGY (ROW 1 DOWN, ROW core_count UP,
// ROWS BEYOND core_count) -- THE SAME SET OF ATTRIBUTES THE DRIVER REGISTERS.
pub fn parse_tunable(name: &str, core_count: usize) -> Option<Tunable> {
    match name {
        "hotplug_sampling_rate" => return Some(Tunable::SamplingRate),
        "hotplug_enable" => return Some(Tunable::Enable),
        "cpu_up_rate" => return Some(Tunable::UpRate),
        "cpu_down_rate" => return Some(Tunable::DownRate),
        "maxcoreslimit" => return Some(Tunable::MaxCoresLimit),
        "accuratecpufreq" => return Some(Tunable::AccurateCpuFreq),
        _ => {}
    }

    let caps = matrix_name_re().captures(name)?;
    let metric = match &caps[1] {
        "freq" => Metric::Freq,
        "load" => Metric::Load,
        _ => Metric::Rq,
    };
    let num_cores: usize = caps[2].parse().ok()?;
    let dir = if &caps[3] == "1" {
        Direction::Up
    } else {
        Direction::Down
    };

    if num_cores < 1 || num_cores > core_count {
        return None;
    }
    if num_cores == 1 && dir == Direction::Down {
        return None;
    }
    if num_cores == core_count && dir == Direction::Up {
        return None;
    }
    Some(Tunable::Matrix {
        metric,
        num_cores,
        dir,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_defaults_four_cores() {
        let m = ThresholdMatrix::new(4);
        // UP ROWS 1..3
        assert_eq!(m.read(1, Direction::Up, Metric::Load), Some(65));
        assert_eq!(m.read(1, Direction::Up, Metric::Freq), Some(702_000));
        assert_eq!(m.read(1, Direction::Up, Metric::Rq), Some(200));
        assert_eq!(m.read(2, Direction::Up, Metric::Rq), Some(200));
        assert_eq!(m.read(3, Direction::Up, Metric::Rq), Some(300));
        // DOWN ROWS 2..4
        assert_eq!(m.read(2, Direction::Down, Metric::Load), Some(30));
        assert_eq!(m.read(2, Direction::Down, Metric::Freq), Some(486_000));
        assert_eq!(m.read(2, Direction::Down, Metric::Rq), Some(200));
        assert_eq!(m.read(3, Direction::Down, Metric::Rq), Some(200));
        assert_eq!(m.read(4, Direction::Down, Metric::Rq), Some(300));
        // UNUSED CELLS SIT AT ZERO
        assert_eq!(m.read(1, Direction::Down, Metric::Load), Some(0));
        assert_eq!(m.read(4, Direction::Up, Metric::Load), Some(0));
    }

    #[test]
    fn matrix_get_clamps_count() {
        let m = ThresholdMatrix::new(4);
        // COUNT 0 READS ROW 1, COUNT 9 READS ROW 4
        assert_eq!(m.get(0, Direction::Up).load, 65);
        assert_eq!(m.get(9, Direction::Down).load, 30);
    }

    #[test]
    fn matrix_set_reports_change() {
        let m = ThresholdMatrix::new(4);
        assert!(m.set(2, Direction::Up, Metric::Load, 70));
        assert!(!m.set(2, Direction::Up, Metric::Load, 70)); // NO-OP WRITE
        assert_eq!(m.read(2, Direction::Up, Metric::Load), Some(70));
        assert!(!m.set(9, Direction::Up, Metric::Load, 70)); // NO SUCH ROW
    }

    #[test]
    fn parse_tunable_scalar_names() {
        assert_eq!(
            parse_tunable("hotplug_sampling_rate", 4),
            Some(Tunable::SamplingRate)
        );
        assert_eq!(parse_tunable("hotplug_enable", 4), Some(Tunable::Enable));
        assert_eq!(parse_tunable("cpu_up_rate", 4), Some(Tunable::UpRate));
        assert_eq!(parse_tunable("cpu_down_rate", 4), Some(Tunable::DownRate));
        assert_eq!(
            parse_tunable("maxcoreslimit", 4),
            Some(Tunable::MaxCoresLimit)
        );
        assert_eq!(
            parse_tunable("accuratecpufreq", 4),
            Some(Tunable::AccurateCpuFreq)
        );
        assert_eq!(parse_tunable("nonsense", 4), None);
    }

    #[test]
    fn parse_tunable_matrix_names() {
        assert_eq!(
            parse_tunable("hotplug_freq_2_1", 4),
            Some(Tunable::Matrix {
                metric: Metric::Freq,
                num_cores: 2,
                dir: Direction::Up,
            })
        );
        assert_eq!(
            parse_tunable("hotplug_rq_4_0", 4),
            Some(Tunable::Matrix {
                metric: Metric::Rq,
                num_cores: 4,
                dir: Direction::Down,
            })
        );
        // CELLS THE DRIVER NEVER REGISTERS
        assert_eq!(parse_tunable("hotplug_load_1_0", 4), None);
        assert_eq!(parse_tunable("hotplug_load_4_1", 4), None);
        assert_eq!(parse_tunable("hotplug_load_5_0", 4), None);
        assert_eq!(parse_tunable("hotplug_load_0_1", 4), None);
    }
}
