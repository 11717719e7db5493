// DECISION ENGINE
// PERIODIC FEEDBACK LOOP: READ THE RUN QUEUE AVERAGE, SAMPLE PER-CORE
// IDLE/WALL DELTAS, CONSULT THE THRESHOLD MATRIX, AND COMMIT AT MOST ONE
// CORE UP AND ONE CORE DOWN PER TICK. HARDWARE TRANSITIONS GO TO THE
// EXECUTOR -- THE TICK NEVER BLOCKS ON THEM.
//
// ONE MUTEX GUARDS THE CORE TABLE, THE TICK COUNTER, AND THE
// ENABLED/DISABLED TRANSITION. IT IS HELD FOR THE LENGTH OF A TICK AND
// NOTHING LONGER. THE TICK TIMER IS A DEADLINE UNDER THE SAME MUTEX PLUS A
// CONDVAR, SO SHRINKING THE SAMPLING PERIOD OR DISABLING PREEMPTS THE
// APPOINTED TICK INSTEAD OF WAITING IT OUT.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Result};

use crate::event::TickLog;
use crate::executor::TransitionExecutor;
use crate::{log_info, log_warn};
use crate::platform::{CpuPlatform, CpuTimes};
use crate::rqavg::RunQueueSampler;
use crate::tuning::{parse_tunable, ControllerConfig, Direction, ThresholdMatrix, Tunable};

// PER-CORE HISTORY. LIVES FOR THE LIFE OF THE PROCESS, RESEEDED ON ENABLE.
#[derive(Clone, Default)]
struct CoreState {
    prev_wall_us: u64,
    prev_idle_us: u64,
    // CONTROLLER'S VIEW OF THE CORE. MAY LAG HARDWARE TRUTH WHILE A
    // TRANSITION IS IN FLIGHT OR AN OUTSIDE ACTOR IS HOTPLUGGING; THE
    // DRIFT PATH RESYNCS IT.
    online: bool,
    // FALSE WHILE THIS CORE'S LAST UP-TRIGGER IS STILL BEING SERVED
    eligible_for_up: bool,
    // WHICH CORE'S LOAD BROUGHT THIS ONE ONLINE; RESTORES THAT CORE'S
    // ELIGIBILITY ONCE THIS ONE GOES BACK OFFLINE
    brought_up_by: Option<usize>,
}

// READ-ONLY VIEW FOR INTROSPECTION AND HARNESSES.
#[derive(Clone, Copy, Debug)]
pub struct CoreView {
    pub online: bool,
    pub eligible_for_up: bool,
    pub brought_up_by: Option<usize>,
}

#[derive(Clone, Copy, Default)]
struct TickSample {
    wall_us: u64,
    idle_us: u64,
    online: bool,
}

struct EngineState {
    cores: Vec<CoreState>,
    scratch: Vec<TickSample>,
    ticks: u64,
    ups: u64,
    downs: u64,
    drifts: u64,
    enabled: bool,
    // NEXT APPOINTED TICK; None WHILE DISABLED
    deadline: Option<Instant>,
    shutdown: bool,
}

pub struct Controller<P: CpuPlatform> {
    pub cfg: ControllerConfig,
    pub matrix: ThresholdMatrix,
    platform: Arc<P>,
    sampler: RunQueueSampler,
    state: Arc<Mutex<EngineState>>,
    tick_cv: Condvar,
    executor: TransitionExecutor,
    log: Mutex<TickLog>,
    tick_thread: Mutex<Option<JoinHandle<()>>>,
}

impl<P: CpuPlatform> Controller<P> {
    pub fn new(platform: Arc<P>) -> Result<Arc<Self>> {
        let n = platform.core_count();
        if n == 0 {
            bail!("controller needs at least one core");
        }

        let state = Arc::new(Mutex::new(EngineState {
            cores: vec![CoreState::default(); n],
            scratch: vec![TickSample::default(); n],
            ticks: 0,
            ups: 0,
            downs: 0,
            drifts: 0,
            enabled: false,
            deadline: None,
            shutdown: false,
        }));

        let rearm_state = state.clone();
        let executor = TransitionExecutor::spawn(
            platform.clone(),
            Arc::new(move || {
                // LAST CORE STANDING MUST ALWAYS BE RECONSIDERED FOR UP
                rearm_state.lock().unwrap().cores[0].eligible_for_up = true;
            }),
        );

        let controller = Arc::new(Self {
            cfg: ControllerConfig::new(n),
            matrix: ThresholdMatrix::new(n),
            platform,
            sampler: RunQueueSampler::new(),
            state,
            tick_cv: Condvar::new(),
            executor,
            log: Mutex::new(TickLog::new()),
            tick_thread: Mutex::new(None),
        });

        let runner = controller.clone();
        let handle = std::thread::spawn(move || runner.tick_loop());
        *controller.tick_thread.lock().unwrap() = Some(handle);
        Ok(controller)
    }

    // --- LIFECYCLE ---

    // DISABLED -> RUNNING. SEEDS EVERY CORE FROM HARDWARE TRUTH, STARTS THE
    // RUN QUEUE SAMPLER, APPOINTS THE FIRST TICK.
    pub fn enable(&self) {
        let mut st = self.state.lock().unwrap();
        if st.enabled {
            return;
        }
        st.ticks = 0;
        for cpu in 0..st.cores.len() {
            let times = self.platform.cpu_times(cpu).unwrap_or_default();
            let online = self.platform.is_online(cpu);
            let core = &mut st.cores[cpu];
            core.prev_wall_us = times.wall_us;
            core.prev_idle_us = times.idle_us;
            core.online = online;
            core.eligible_for_up = true;
            core.brought_up_by = None;
        }
        st.enabled = true;
        self.cfg.set_enabled(true);
        self.sampler.start(self.platform.clone());
        st.deadline = Some(Instant::now() + Duration::from_micros(self.cfg.sampling_period_us()));
        let online = st.cores.iter().filter(|c| c.online).count();
        drop(st);
        self.tick_cv.notify_all();
        log_info!(
            "controller enabled: {}/{} cores online, tick every {} us",
            online,
            self.cfg.core_count(),
            self.cfg.sampling_period_us()
        );
    }

    // RUNNING -> DISABLED. CANCELS THE PENDING TICK, STOPS THE SAMPLER,
    // PARKS EVERY CORE ABOVE 0 (BEST EFFORT), AND DRAINS THE EXECUTOR SO
    // NO TRANSITION CAN LAND AFTER THIS RETURNS.
    pub fn disable(&self) {
        {
            let mut st = self.state.lock().unwrap();
            if !st.enabled {
                return;
            }
            st.enabled = false;
            st.deadline = None;
            self.cfg.set_enabled(false);
        }
        self.tick_cv.notify_all();
        self.sampler.stop();
        for cpu in 1..self.platform.core_count() {
            if self.platform.is_online(cpu) {
                self.executor.request_offline(cpu);
            }
        }
        self.executor.drain();
        log_info!("controller disabled: secondary cores parked");
    }

    // FULL STOP FOR PROCESS EXIT: DISABLE, THEN TEAR DOWN THE TICK AND
    // EXECUTOR THREADS.
    pub fn shutdown(&self) {
        self.disable();
        {
            let mut st = self.state.lock().unwrap();
            st.shutdown = true;
        }
        self.tick_cv.notify_all();
        if let Some(handle) = self.tick_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.executor.shutdown();
    }

    // --- CONFIG SURFACE ---

    // A SHORTER PERIOD TAKES EFFECT BEFORE THE ALREADY-APPOINTED TICK;
    // A LONGER ONE IS PICKED UP AT THE NEXT NATURAL RESCHEDULE.
    pub fn set_sampling_period_us(&self, input: i64) {
        if !self.cfg.set_sampling_period_us(input) {
            return;
        }
        let mut st = self.state.lock().unwrap();
        if let Some(appointed) = st.deadline {
            let next = Instant::now() + Duration::from_micros(self.cfg.sampling_period_us());
            if next < appointed {
                st.deadline = Some(next);
                drop(st);
                self.tick_cv.notify_all();
            }
        }
    }

    // SET A NAMED TUNABLE. UNPARSEABLE INPUT IS AN ERROR AND CHANGES
    // NOTHING; OUT-OF-RANGE NUMBERS ARE CLAMPED BY THE SETTERS.
    pub fn apply_tunable(&self, name: &str, value: &str) -> Result<()> {
        let tunable = parse_tunable(name, self.cfg.core_count())
            .ok_or_else(|| anyhow!("unknown tunable: {}", name))?;
        let input: i64 = value
            .trim()
            .parse()
            .map_err(|_| anyhow!("invalid value for {}: {:?}", name, value))?;
        match tunable {
            Tunable::SamplingRate => self.set_sampling_period_us(input),
            Tunable::Enable => {
                if input > 0 {
                    self.enable();
                } else {
                    self.disable();
                }
            }
            Tunable::UpRate => {
                self.cfg.set_up_rate(input);
            }
            Tunable::DownRate => {
                self.cfg.set_down_rate(input);
            }
            Tunable::MaxCoresLimit => {
                self.cfg.set_max_cores_online(input);
            }
            Tunable::AccurateCpuFreq => {
                self.cfg.set_accurate_frequency_source(input > 0);
            }
            Tunable::Matrix {
                metric,
                num_cores,
                dir,
            } => {
                self.matrix.set(num_cores, dir, metric, input);
            }
        }
        Ok(())
    }

    pub fn read_tunable(&self, name: &str) -> Option<String> {
        let tunable = parse_tunable(name, self.cfg.core_count())?;
        let value = match tunable {
            Tunable::SamplingRate => self.cfg.sampling_period_us() as i64,
            Tunable::Enable => self.cfg.enabled() as i64,
            Tunable::UpRate => self.cfg.up_rate() as i64,
            Tunable::DownRate => self.cfg.down_rate() as i64,
            Tunable::MaxCoresLimit => self.cfg.max_cores_online() as i64,
            Tunable::AccurateCpuFreq => self.cfg.accurate_frequency_source() as i64,
            Tunable::Matrix {
                metric,
                num_cores,
                dir,
            } => self.matrix.read(num_cores, dir, metric)?,
        };
        Some(value.to_string())
    }

    // --- INTROSPECTION ---

    pub fn cores(&self) -> Vec<CoreView> {
        self.state
            .lock()
            .unwrap()
            .cores
            .iter()
            .map(|c| CoreView {
                online: c.online,
                eligible_for_up: c.eligible_for_up,
                brought_up_by: c.brought_up_by,
            })
            .collect()
    }

    pub fn sampler(&self) -> &RunQueueSampler {
        &self.sampler
    }

    pub fn telemetry(&self) -> String {
        let st = self.state.lock().unwrap();
        let online = st.cores.iter().filter(|c| c.online).count();
        let map: String = st
            .cores
            .iter()
            .map(|c| if c.online { '#' } else { '.' })
            .collect();
        format!(
            "tick: {:<4} online: {}/{} [{}] ups: {} downs: {} drift: {}",
            st.ticks,
            online,
            st.cores.len(),
            map,
            st.ups,
            st.downs,
            st.drifts
        )
    }

    pub fn dump_log(&self) {
        self.log.lock().unwrap().dump();
    }

    pub fn summary(&self) {
        self.log.lock().unwrap().summary();
    }

    // RUN ONE DECISION TICK IMMEDIATELY, BYPASSING THE TIMER.
    pub fn tick_now(&self) {
        let mut st = self.state.lock().unwrap();
        if st.enabled {
            self.tick(&mut st);
        }
    }

    // BLOCK UNTIL ALL REQUESTED TRANSITIONS HAVE EXECUTED.
    pub fn drain_transitions(&self) {
        self.executor.drain();
    }

    // --- THE TICK ---

    fn tick_loop(self: Arc<Self>) {
        let mut st = self.state.lock().unwrap();
        loop {
            if st.shutdown {
                break;
            }
            let deadline = match st.deadline {
                Some(d) => d,
                None => {
                    st = self.tick_cv.wait(st).unwrap();
                    continue;
                }
            };
            let now = Instant::now();
            if now < deadline {
                // WAIT OUT THE APPOINTMENT; A NOTIFY MEANS IT MOVED OR WAS
                // CANCELLED, SO GO BACK AND RE-READ IT
                let (guard, _timeout) = self.tick_cv.wait_timeout(st, deadline - now).unwrap();
                st = guard;
                continue;
            }
            self.tick(&mut st);
            st.deadline = if st.enabled {
                Some(Instant::now() + Duration::from_micros(self.cfg.sampling_period_us()))
            } else {
                None
            };
        }
    }

    fn tick(&self, st: &mut EngineState) {
        let n = st.cores.len();
        let up_rate = self.cfg.up_rate();
        let down_rate = self.cfg.down_rate();
        let upmax = self.cfg.max_cores_online();
        // FLOOR IMPLIED BY THE CAP: WITH THE CAP AT FULL TOPOLOGY ONLY
        // CORE 0 IS PROTECTED, OTHERWISE EVERY CORE BELOW THE CAP IS
        let downmax = if upmax == n { 0 } else { upmax - 1 };
        let accurate = self.cfg.accurate_frequency_source();

        st.ticks += 1;
        let check_up = st.ticks % up_rate == 0;
        let check_down = st.ticks % down_rate == 0;
        let rq_avg = self.sampler.read_and_reset();

        // PASS 1: REFRESH BASELINES, CAPTURE HARDWARE TRUTH, SPOT DRIFT.
        // BASELINES ADVANCE EVEN ON A DRIFT TICK -- STALE ONES WOULD POISON
        // THE NEXT LOAD COMPUTATION TOO.
        let mut drift = false;
        for cpu in 0..n {
            let times = match self.platform.cpu_times(cpu) {
                Ok(t) => t,
                Err(e) => {
                    log_warn!("cpu{} time read failed: {:#}", cpu, e);
                    CpuTimes::default()
                }
            };
            let online = self.platform.is_online(cpu);
            let core = &mut st.cores[cpu];
            let wall_us = times.wall_us.saturating_sub(core.prev_wall_us);
            let idle_us = times.idle_us.saturating_sub(core.prev_idle_us);
            core.prev_wall_us = times.wall_us;
            core.prev_idle_us = times.idle_us;
            if core.online != online {
                drift = true;
            }
            st.scratch[cpu] = TickSample {
                wall_us,
                idle_us,
                online,
            };
        }

        let mut up_pick: i32 = -1;
        let mut down_pick: i32 = -1;

        if drift {
            // SOMETHING ELSE IS HOTPLUGGING (OR OUR OWN TRANSITION HASN'T
            // LANDED YET). LOAD FIGURES AGAINST STALE BASELINES ARE
            // MEANINGLESS -- DECIDE NOTHING, RESYNC EVERYTHING.
            st.drifts += 1;
            for cpu in 0..n {
                let online = st.scratch[cpu].online;
                let core = &mut st.cores[cpu];
                core.online = online;
                core.eligible_for_up = true;
                core.brought_up_by = None;
            }
        } else {
            let mut up_slots = 1u32;
            let mut down_slots = 1u32;
            let mut trigger: Option<usize> = None;
            let mut up_target: Option<usize> = None;

            for cpu in 0..n {
                let sample = st.scratch[cpu];
                if !sample.online {
                    // OFFLINE CORE: RE-ARM ITSELF, AND RESTORE WHOEVER
                    // TRIGGERED ITS LAST TRIP ONLINE
                    st.cores[cpu].eligible_for_up = true;
                    if let Some(by) = st.cores[cpu].brought_up_by.take() {
                        st.cores[by].eligible_for_up = true;
                    }
                    if up_target.is_none() {
                        up_target = Some(cpu);
                    }
                    continue;
                }

                // TOO LITTLE WALL TIME -> LOAD UNDEFINED, CORE SITS THIS
                // TICK OUT OF EVERY THRESHOLD COMPARISON
                let (load, freq) = if sample.wall_us >= sample.idle_us {
                    let load = if sample.wall_us > sample.idle_us {
                        (100 * (sample.wall_us - sample.idle_us) / sample.wall_us) as i64
                    } else {
                        0
                    };
                    (load, self.platform.frequency_khz(cpu, accurate))
                } else {
                    (-1, 0)
                };

                let online_now = st.cores.iter().filter(|c| c.online).count();

                if check_up
                    && cpu + 1 < upmax
                    && online_now < n
                    && st.cores[cpu].eligible_for_up
                    && up_slots > 0
                    && load >= 0
                {
                    let t = self.matrix.get(online_now, Direction::Up);
                    if load >= t.load && freq >= t.freq && rq_avg > t.rq {
                        up_slots -= 1;
                        st.cores[cpu].eligible_for_up = false;
                        trigger = Some(cpu);
                    }
                }

                if check_down && cpu > downmax && down_slots > 0 && load >= 0 {
                    let t = self.matrix.get(online_now, Direction::Down);
                    if (online_now > 1 && load < t.load) || (freq <= t.freq && rq_avg <= t.rq) {
                        // FLIP THE RECORD NOW SO LATER CORES IN THIS PASS
                        // SEE THE SMALLER TOPOLOGY
                        st.cores[cpu].online = false;
                        down_slots -= 1;
                        down_pick = cpu as i32;
                    }
                }
            }

            // A TRIGGER WITHOUT AN OFFLINE CORE TO WAKE IS A NO-OP; THE CAP
            // IS RE-CHECKED AGAINST THE RECORDED TOPOLOGY SO A NON-CONTIGUOUS
            // ONLINE SET CANNOT OVERSHOOT IT
            if let Some(trigger_cpu) = trigger {
                let online_now = st.cores.iter().filter(|c| c.online).count();
                if online_now < upmax {
                    if let Some(target) = up_target {
                        st.cores[target].online = true;
                        st.cores[target].brought_up_by = Some(trigger_cpu);
                        up_pick = target as i32;
                    }
                }
            }

            if down_pick >= 0 {
                st.downs += 1;
                self.executor.request_offline(down_pick as usize);
            }
            if up_pick >= 0 {
                st.ups += 1;
                self.executor.request_online(up_pick as usize);
            }
        }

        if st.ticks >= up_rate.max(down_rate) {
            st.ticks = 0;
        }
        if self.platform.online_count() == 1 {
            st.cores[0].eligible_for_up = true;
        }

        let online = st.cores.iter().filter(|c| c.online).count() as u32;
        self.log
            .lock()
            .unwrap()
            .snapshot(st.ticks, online, rq_avg, up_pick, down_pick, drift);
    }
}
