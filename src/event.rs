// STAMPEDE TICK LOG
// RECORDS ONE SNAPSHOT PER DECISION TICK.
// PRE-ALLOCATED RING BUFFER. NO HEAP ALLOCATION DURING MONITORING.
// WRAPS AROUND AT CAPACITY -- OLDEST ENTRIES OVERWRITTEN.

const MAX_SNAPSHOTS: usize = 8192;

#[derive(Clone, Copy)]
pub struct Snapshot {
    pub ts_ns: u64,
    pub tick: u64,
    pub online: u32, // RECORDED ONLINE CORES AT END OF TICK
    pub rq_avg: u64,
    pub up_cpu: i32,   // -1 = NO CORE BROUGHT ONLINE THIS TICK
    pub down_cpu: i32, // -1 = NO CORE TAKEN OFFLINE THIS TICK
    pub drift: bool,
}

pub struct TickLog {
    snapshots: Vec<Snapshot>,
    head: usize,
    len: usize,
}

impl TickLog {
    pub fn new() -> Self {
        Self {
            snapshots: vec![
                Snapshot {
                    ts_ns: 0,
                    tick: 0,
                    online: 0,
                    rq_avg: 0,
                    up_cpu: -1,
                    down_cpu: -1,
                    drift: false,
                };
                MAX_SNAPSHOTS
            ],
            head: 0,
            len: 0,
        }
    }

    // RECORD ONE TICK. OVERWRITES THE OLDEST ENTRY WHEN FULL.
    pub fn snapshot(
        &mut self,
        tick: u64,
        online: u32,
        rq_avg: u64,
        up_cpu: i32,
        down_cpu: i32,
        drift: bool,
    ) {
        self.snapshots[self.head] = Snapshot {
            ts_ns: now_ns(),
            tick,
            online,
            rq_avg,
            up_cpu,
            down_cpu,
            drift,
        };
        self.head = (self.head + 1) % MAX_SNAPSHOTS;
        if self.len < MAX_SNAPSHOTS {
            self.len += 1;
        }
    }

    // ITERATE SNAPSHOTS IN CHRONOLOGICAL ORDER
    fn iter_chronological(&self) -> impl Iterator<Item = &Snapshot> {
        let start = if self.len < MAX_SNAPSHOTS { 0 } else { self.head };
        (0..self.len).map(move |i| &self.snapshots[(start + i) % MAX_SNAPSHOTS])
    }

    // DUMP THE TIME SERIES AFTER EXECUTION
    pub fn dump(&self) {
        if self.len == 0 {
            return;
        }

        let mut iter = self.iter_chronological();
        let first = iter.next().unwrap();
        let base_ts = first.ts_ns;

        println!(
            "\n{:<10} {:<8} {:<8} {:<8} {:<6} {:<6} {:<6}",
            "TIME_S", "TICK", "ONLINE", "RQ_AVG", "UP", "DOWN", "DRIFT"
        );
        println!("{}", "-".repeat(56));

        print_row(first, 0.0);
        for s in iter {
            let elapsed_s = (s.ts_ns - base_ts) as f64 / 1_000_000_000.0;
            print_row(s, elapsed_s);
        }

        if self.len == MAX_SNAPSHOTS {
            println!(
                "\n(RING BUFFER WRAPPED -- SHOWING MOST RECENT {} TICKS)",
                MAX_SNAPSHOTS
            );
        }
        println!("TOTAL TICKS LOGGED: {}", self.len);
    }

    // SUMMARY STATISTICS
    pub fn summary(&self) {
        if self.len < 2 {
            return;
        }

        let snapshots: Vec<&Snapshot> = self.iter_chronological().collect();

        let ups = snapshots.iter().filter(|s| s.up_cpu >= 0).count();
        let downs = snapshots.iter().filter(|s| s.down_cpu >= 0).count();
        let drifts = snapshots.iter().filter(|s| s.drift).count();
        let online_sum: u64 = snapshots.iter().map(|s| s.online as u64).sum();
        let rq_sum: u64 = snapshots.iter().map(|s| s.rq_avg).sum();

        let elapsed_ns = snapshots.last().unwrap().ts_ns - snapshots.first().unwrap().ts_ns;
        let elapsed_s = elapsed_ns as f64 / 1_000_000_000.0;

        println!("\n{}", "=".repeat(50));
        println!("STAMPEDE SUMMARY");
        println!("{}", "=".repeat(50));
        println!("  TICKS:          {}", self.len);
        println!("  CORES ONLINED:  {}", ups);
        println!("  CORES OFFLINED: {}", downs);
        println!("  DRIFT TICKS:    {}", drifts);
        println!(
            "  AVG ONLINE:     {:.2}",
            online_sum as f64 / self.len as f64
        );
        println!(
            "  AVG RQ (x100):  {:.0}",
            rq_sum as f64 / self.len as f64
        );
        println!("  ELAPSED:        {:.1}s", elapsed_s);
    }
}

impl Default for TickLog {
    fn default() -> Self {
        Self::new()
    }
}

fn print_row(s: &Snapshot, elapsed_s: f64) {
    println!(
        "{:<10.1} {:<8} {:<8} {:<8} {:<6} {:<6} {:<6}",
        elapsed_s,
        s.tick,
        s.online,
        s.rq_avg,
        fmt_cpu(s.up_cpu),
        fmt_cpu(s.down_cpu),
        if s.drift { "YES" } else { "-" },
    );
}

fn fmt_cpu(cpu: i32) -> String {
    if cpu >= 0 {
        cpu.to_string()
    } else {
        "-".to_string()
    }
}

fn now_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    (ts.tv_sec as u64) * 1_000_000_000 + (ts.tv_nsec as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_records() {
        let mut log = TickLog::new();
        assert_eq!(log.len, 0);

        log.snapshot(1, 2, 300, 2, -1, false);
        assert_eq!(log.len, 1);
        assert_eq!(log.snapshots[0].tick, 1);
        assert_eq!(log.snapshots[0].online, 2);
        assert_eq!(log.snapshots[0].rq_avg, 300);
        assert_eq!(log.snapshots[0].up_cpu, 2);
        assert_eq!(log.snapshots[0].down_cpu, -1);
        assert!(log.snapshots[0].ts_ns > 0);
    }

    #[test]
    fn ring_buffer_wraps() {
        let mut log = TickLog::new();

        // FILL TO CAPACITY
        for i in 0..MAX_SNAPSHOTS {
            log.snapshot(i as u64, 0, 0, -1, -1, false);
        }
        assert_eq!(log.len, MAX_SNAPSHOTS);
        assert_eq!(log.head, 0); // WRAPPED BACK TO START

        // WRITE ONE MORE -- OVERWRITES OLDEST
        log.snapshot(9999, 0, 0, -1, -1, false);
        assert_eq!(log.len, MAX_SNAPSHOTS);
        assert_eq!(log.head, 1);
        assert_eq!(log.snapshots[0].tick, 9999);

        // CHRONOLOGICAL ITERATION STARTS FROM OLDEST (INDEX 1)
        let ordered: Vec<u64> = log.iter_chronological().map(|s| s.tick).collect();
        assert_eq!(ordered[0], 1); // OLDEST SURVIVING ENTRY
        assert_eq!(*ordered.last().unwrap(), 9999); // NEWEST
        assert_eq!(ordered.len(), MAX_SNAPSHOTS);
    }

    #[test]
    fn summary_no_panic_empty() {
        let log = TickLog::new();
        log.summary(); // SHOULD NOT PANIC WITH 0 SNAPSHOTS
    }

    #[test]
    fn dump_no_panic() {
        let mut log = TickLog::new();
        log.snapshot(1, 2, 300, 2, -1, false);
        log.snapshot(2, 3, 150, -1, 2, true);
        log.dump(); // SHOULD NOT PANIC
    }
}
