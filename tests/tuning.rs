// STAMPEDE TUNING TESTS
// CLAMPING, IDEMPOTENCE, AND THRESHOLD TABLE ACCESS.
//
// ALL TESTS USE PURE TYPES FROM stampede::tuning. ZERO SYSFS DEPENDENCIES.

use stampede::tuning::{
    parse_tunable, ControllerConfig, Direction, Metric, ThresholdMatrix, Tunable,
    DEFAULT_DOWN_RATE, DEFAULT_SAMPLING_PERIOD_US, DEFAULT_UP_RATE, MAX_HOTPLUG_RATE,
    MIN_SAMPLING_PERIOD_US,
};

// === CONTROLLER CONFIG DEFAULTS ===

#[test]
fn config_defaults() {
    let cfg = ControllerConfig::new(4);
    assert_eq!(cfg.sampling_period_us(), DEFAULT_SAMPLING_PERIOD_US);
    assert_eq!(cfg.up_rate(), DEFAULT_UP_RATE);
    assert_eq!(cfg.down_rate(), DEFAULT_DOWN_RATE);
    assert_eq!(cfg.max_cores_online(), 4);
    assert!(!cfg.enabled());
    assert!(!cfg.accurate_frequency_source());
}

// === CLAMPING ===

#[test]
fn sampling_period_clamps_to_floor() {
    let cfg = ControllerConfig::new(4);
    cfg.set_sampling_period_us(1);
    assert_eq!(cfg.sampling_period_us(), MIN_SAMPLING_PERIOD_US);
    cfg.set_sampling_period_us(-50);
    assert_eq!(cfg.sampling_period_us(), MIN_SAMPLING_PERIOD_US);
    cfg.set_sampling_period_us(250_000);
    assert_eq!(cfg.sampling_period_us(), 250_000);
}

#[test]
fn rates_clamp_to_bounds() {
    let cfg = ControllerConfig::new(4);
    cfg.set_up_rate(0);
    assert_eq!(cfg.up_rate(), 1);
    cfg.set_up_rate(999);
    assert_eq!(cfg.up_rate(), MAX_HOTPLUG_RATE);
    cfg.set_down_rate(-3);
    assert_eq!(cfg.down_rate(), 1);
    cfg.set_down_rate(25);
    assert_eq!(cfg.down_rate(), 25);
}

#[test]
fn max_cores_clamps_to_topology() {
    let cfg = ControllerConfig::new(4);
    cfg.set_max_cores_online(0);
    assert_eq!(cfg.max_cores_online(), 1);
    cfg.set_max_cores_online(99);
    assert_eq!(cfg.max_cores_online(), 4);
    cfg.set_max_cores_online(2);
    assert_eq!(cfg.max_cores_online(), 2);
}

// === IDEMPOTENCE ===

#[test]
fn setters_report_no_change_on_equal_value() {
    let cfg = ControllerConfig::new(4);
    assert!(cfg.set_up_rate(5));
    assert!(!cfg.set_up_rate(5));
    assert!(cfg.set_sampling_period_us(100_000));
    assert!(!cfg.set_sampling_period_us(100_000));
    // CLAMPED INPUT THAT LANDS ON THE CURRENT VALUE IS ALSO A NO-OP
    cfg.set_down_rate(40);
    assert!(!cfg.set_down_rate(500));
    assert!(cfg.set_enabled(true));
    assert!(!cfg.set_enabled(true));
    assert!(cfg.set_max_cores_online(3));
    assert!(!cfg.set_max_cores_online(3));
}

// === THRESHOLD MATRIX ===

#[test]
fn matrix_direction_indexing() {
    let m = ThresholdMatrix::new(4);
    let up = m.get(2, Direction::Up);
    let down = m.get(2, Direction::Down);
    assert!(up.load > down.load);
    assert!(up.freq > down.freq);
}

#[test]
fn matrix_edge_rows_have_one_direction() {
    let m = ThresholdMatrix::new(4);
    // ROW 1: NO DOWN ENTRY; ROW 4: NO UP ENTRY. THE CELLS READ AS ZERO
    // RATHER THAN ERRORING.
    let row1_down = m.get(1, Direction::Down);
    assert_eq!((row1_down.load, row1_down.freq, row1_down.rq), (0, 0, 0));
    let row4_up = m.get(4, Direction::Up);
    assert_eq!((row4_up.load, row4_up.freq, row4_up.rq), (0, 0, 0));
}

#[test]
fn matrix_writes_are_visible_to_lookup() {
    let m = ThresholdMatrix::new(4);
    assert!(m.set(3, Direction::Up, Metric::Rq, 500));
    assert_eq!(m.get(3, Direction::Up).rq, 500);
    // IDENTICAL WRITE SUCCEEDS WITHOUT SIDE EFFECTS
    assert!(!m.set(3, Direction::Up, Metric::Rq, 500));
    assert_eq!(m.get(3, Direction::Up).rq, 500);
}

// === TUNABLE NAMESPACE ===

#[test]
fn tunable_names_cover_the_attribute_set() {
    // EVERY SCALAR PLUS EVERY REGISTERED MATRIX CELL RESOLVES; 4-CORE
    // TOPOLOGY REGISTERS ROWS 1..3 UP AND 2..4 DOWN PER METRIC
    for name in [
        "hotplug_sampling_rate",
        "hotplug_enable",
        "cpu_up_rate",
        "cpu_down_rate",
        "maxcoreslimit",
        "accuratecpufreq",
    ] {
        assert!(parse_tunable(name, 4).is_some(), "missing {}", name);
    }
    for metric in ["freq", "load", "rq"] {
        for row in 1..=3 {
            let name = format!("hotplug_{}_{}_1", metric, row);
            assert!(parse_tunable(&name, 4).is_some(), "missing {}", name);
        }
        for row in 2..=4 {
            let name = format!("hotplug_{}_{}_0", metric, row);
            assert!(parse_tunable(&name, 4).is_some(), "missing {}", name);
        }
    }
}

#[test]
fn tunable_matrix_cell_resolution() {
    assert_eq!(
        parse_tunable("hotplug_rq_3_0", 4),
        Some(Tunable::Matrix {
            metric: Metric::Rq,
            num_cores: 3,
            dir: Direction::Down,
        })
    );
    // A TWO-CORE TOPOLOGY REGISTERS ONLY ROW 1 UP AND ROW 2 DOWN
    assert!(parse_tunable("hotplug_freq_1_1", 2).is_some());
    assert!(parse_tunable("hotplug_freq_2_0", 2).is_some());
    assert!(parse_tunable("hotplug_freq_2_1", 2).is_none());
    assert!(parse_tunable("hotplug_freq_3_0", 2).is_none());
}
