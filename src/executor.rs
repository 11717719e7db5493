// TRANSITION EXECUTOR
// THE DECISION ENGINE ONLY FLIPS LOGICAL FLAGS; THE HARDWARE ONLINE/OFFLINE
// CALLS RUN HERE, ON TWO DEDICATED WORKERS, SO A SLOW TRANSITION NEVER
// BLOCKS THE NEXT SAMPLING TICK. REQUESTS CARRY ONLY THE CORE INDEX AND
// DESIRED STATE -- NO REFERENCES INTO ENGINE STATE.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::log_warn;
use crate::platform::CpuPlatform;

enum Msg {
    Cpu(usize),
    Shutdown,
}

// OUTSTANDING-REQUEST BARRIER: disable() MUST NOT RETURN WHILE A TRANSITION
// IS STILL IN FLIGHT.
struct Inflight {
    pending: Mutex<usize>,
    idle: Condvar,
}

pub struct TransitionExecutor {
    online_tx: Sender<Msg>,
    offline_tx: Sender<Msg>,
    inflight: Arc<Inflight>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TransitionExecutor {
    // SPAWN BOTH WORKERS. rearm_single FIRES AFTER AN OFFLINE OPERATION
    // LEAVES EXACTLY ONE CORE RUNNING -- THE CONTROLLER WIRES IT TO RESTORE
    // CORE 0'S UP ELIGIBILITY.
    pub fn spawn<P: CpuPlatform>(
        platform: Arc<P>,
        rearm_single: Arc<dyn Fn() + Send + Sync>,
    ) -> Self {
        let inflight = Arc::new(Inflight {
            pending: Mutex::new(0),
            idle: Condvar::new(),
        });

        let (online_tx, online_rx) = channel();
        let (offline_tx, offline_rx) = channel();

        let mut workers = Vec::with_capacity(2);
        {
            let platform = platform.clone();
            let inflight = inflight.clone();
            workers.push(std::thread::spawn(move || {
                online_worker(online_rx, platform, inflight);
            }));
        }
        {
            let inflight = inflight.clone();
            workers.push(std::thread::spawn(move || {
                offline_worker(offline_rx, platform, inflight, rearm_single);
            }));
        }

        Self {
            online_tx,
            offline_tx,
            inflight,
            workers: Mutex::new(workers),
        }
    }

    pub fn request_online(&self, cpu: usize) {
        self.submit(&self.online_tx, cpu);
    }

    pub fn request_offline(&self, cpu: usize) {
        self.submit(&self.offline_tx, cpu);
    }

    fn submit(&self, tx: &Sender<Msg>, cpu: usize) {
        *self.inflight.pending.lock().unwrap() += 1;
        if tx.send(Msg::Cpu(cpu)).is_err() {
            // WORKER GONE (SHUTDOWN RACE) -- DO NOT WEDGE drain()
            self.finish_one();
            log_warn!("transition worker unavailable, cpu{} request dropped", cpu);
        }
    }

    fn finish_one(&self) {
        let mut pending = self.inflight.pending.lock().unwrap();
        *pending -= 1;
        if *pending == 0 {
            self.inflight.idle.notify_all();
        }
    }

    // BLOCK UNTIL EVERY SUBMITTED REQUEST HAS BEEN EXECUTED.
    pub fn drain(&self) {
        let mut pending = self.inflight.pending.lock().unwrap();
        while *pending > 0 {
            pending = self.inflight.idle.wait(pending).unwrap();
        }
    }

    pub fn shutdown(&self) {
        let _ = self.online_tx.send(Msg::Shutdown);
        let _ = self.offline_tx.send(Msg::Shutdown);
        for handle in self.workers.lock().unwrap().drain(..) {
            let _ = handle.join();
        }
    }
}

fn online_worker<P: CpuPlatform>(rx: Receiver<Msg>, platform: Arc<P>, inflight: Arc<Inflight>) {
    for msg in rx.iter() {
        let cpu = match msg {
            Msg::Cpu(cpu) => cpu,
            Msg::Shutdown => break,
        };
        if let Err(e) = platform.set_online(cpu, true) {
            // LOGICAL FLAG STAYS AS REQUESTED; DRIFT DETECTION RECONCILES
            log_warn!("cpu{} online failed: {:#}", cpu, e);
        }
        finish(&inflight);
    }
}

fn offline_worker<P: CpuPlatform>(
    rx: Receiver<Msg>,
    platform: Arc<P>,
    inflight: Arc<Inflight>,
    rearm_single: Arc<dyn Fn() + Send + Sync>,
) {
    for msg in rx.iter() {
        let cpu = match msg {
            Msg::Cpu(cpu) => cpu,
            Msg::Shutdown => break,
        };
        if cpu == 0 {
            // CORE 0 NEVER GOES DOWN
            finish(&inflight);
            continue;
        }
        if let Err(e) = platform.set_online(cpu, false) {
            log_warn!("cpu{} offline failed: {:#}", cpu, e);
        }
        if platform.online_count() == 1 {
            rearm_single();
        }
        finish(&inflight);
    }
}

fn finish(inflight: &Inflight) {
    let mut pending = inflight.pending.lock().unwrap();
    *pending -= 1;
    if *pending == 0 {
        inflight.idle.notify_all();
    }
}
