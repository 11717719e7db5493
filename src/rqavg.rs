// RUN QUEUE AVERAGE
// TIME-WEIGHTED MOVING AVERAGE OF THE SYSTEM-WIDE RUNNABLE TASK COUNT.
//
// THE SAMPLER RUNS ON ITS OWN SHORT-PERIOD THREAD, FULLY DECOUPLED FROM THE
// DECISION TICK. THE TICK READS AND RESETS THE AVERAGE, SO EVERY TICK SEES
// ONLY THE PRESSURE ACCUMULATED SINCE THE PREVIOUS ONE. ONE MUTEX GUARDS
// ALL THREE FIELDS; IT IS HELD ONLY INSIDE feed() AND read_and_reset().

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::platform::CpuPlatform;
use crate::tuning::RQ_SAMPLE_PERIOD_MS;

#[derive(Default)]
struct RunQueueSample {
    average: u64, // RUNNABLE COUNT x100, TIME-WEIGHTED
    last_update_ms: u64,
    accumulated_ms: u64,
}

impl RunQueueSample {
    // FOLD ONE INSTANTANEOUS READING INTO THE AVERAGE, WEIGHTED BY THE TIME
    // ELAPSED SINCE THE LAST SAMPLE. A READ ZEROES THE AVERAGE, AND THE
    // FIRST SAMPLE AFTER THAT RESTARTS THE ACCUMULATION WINDOW.
    fn fold(&mut self, instant: u64, now_ms: u64) {
        if self.average == 0 {
            self.accumulated_ms = 0;
        }
        let dt = now_ms.saturating_sub(self.last_update_ms);
        let window = self.accumulated_ms + dt;
        self.average = if window == 0 {
            instant
        } else {
            (instant * dt + self.average * self.accumulated_ms) / window
        };
        self.accumulated_ms = window;
        self.last_update_ms = now_ms;
    }

    fn arm(&mut self, now_ms: u64) {
        self.average = 0;
        self.accumulated_ms = 0;
        self.last_update_ms = now_ms;
    }
}

pub struct RunQueueSampler {
    sample: Arc<Mutex<RunQueueSample>>,
    running: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
    epoch: Instant,
}

impl RunQueueSampler {
    pub fn new() -> Self {
        Self {
            sample: Arc::new(Mutex::new(RunQueueSample::default())),
            running: Arc::new(AtomicBool::new(false)),
            thread: Mutex::new(None),
            epoch: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    // FOLD ONE READING. THE SAMPLING THREAD CALLS THIS EVERY PERIOD; IT IS
    // ALSO THE SEAM HARNESSES USE TO DRIVE THE AVERAGE BY HAND.
    pub fn feed(&self, instant: u64, now_ms: u64) {
        self.sample.lock().unwrap().fold(instant, now_ms);
    }

    // RETURN THE ACCUMULATED AVERAGE AND ZERO IT.
    pub fn read_and_reset(&self) -> u64 {
        let mut s = self.sample.lock().unwrap();
        let avg = s.average;
        s.average = 0;
        avg
    }

    // ZERO THE ACCUMULATORS, STAMP THE BASELINE, AND START SAMPLING.
    pub fn start<P: CpuPlatform>(&self, platform: Arc<P>) {
        self.sample.lock().unwrap().arm(self.now_ms());
        self.running.store(true, Ordering::Relaxed);

        let running = self.running.clone();
        let sample = self.sample.clone();
        let epoch = self.epoch;
        let handle = std::thread::spawn(move || {
            while running.load(Ordering::Relaxed) {
                std::thread::sleep(Duration::from_millis(RQ_SAMPLE_PERIOD_MS));
                if !running.load(Ordering::Relaxed) {
                    break;
                }
                let instant = platform.runnable_tasks() * 100;
                let now_ms = epoch.elapsed().as_millis() as u64;
                sample.lock().unwrap().fold(instant, now_ms);
            }
        });
        *self.thread.lock().unwrap() = Some(handle);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Default for RunQueueSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weighted_average_two_samples() {
        // ARMED AT t=0; SAMPLES AT +10MS AND +20MS
        let mut s = RunQueueSample::default();
        s.arm(0);
        s.fold(200, 10);
        assert_eq!(s.average, 200); // (200*10 + 0*0) / 10
        s.fold(400, 20);
        assert_eq!(s.average, 300); // (400*10 + 200*10) / 20
    }

    #[test]
    fn read_resets_and_next_sample_restarts_window() {
        let sampler = RunQueueSampler::new();
        sampler.feed(200, 10);
        sampler.feed(400, 20);
        assert_eq!(sampler.read_and_reset(), 300);
        // NO NEW SAMPLES -> ZERO
        assert_eq!(sampler.read_and_reset(), 0);
        // NEXT SAMPLE STANDS ALONE REGARDLESS OF THE OLD WINDOW
        sampler.feed(500, 30);
        assert_eq!(sampler.read_and_reset(), 500);
    }

    #[test]
    fn zero_elapsed_time_keeps_running_average() {
        let mut s = RunQueueSample::default();
        s.arm(0);
        s.fold(200, 10);
        // SAME TIMESTAMP: dt = 0, AVERAGE UNCHANGED
        s.fold(900, 10);
        assert_eq!(s.average, 200);
    }

    #[test]
    fn constant_input_is_fixed_point() {
        let mut s = RunQueueSample::default();
        s.arm(0);
        for t in 1..=50 {
            s.fold(300, t * 10);
        }
        assert_eq!(s.average, 300);
    }
}
