//! The adaptive scheduler.
//!
//! Owns every stage, assigns CPU cores, and runs the control loop: replicas
//! of clonable stages publish packets-per-tick on a shared report channel;
//! every check period the scheduler sums the reports, consults the per-kind
//! clone predicate (generators: observed rate below target; queue-fed
//! stages: input ring above the 80%-full threshold), and clones onto a free
//! core or retires the newest replica. A sole idle replica is paused with a
//! nanosecond idle sleep instead of retired.
//!
//! Core allocation: core 0 runs the control loop (and the stop drain,
//! unless `stop_on_dedicated_core` reserves another core for it); every
//! stage instance is pinned to its own core from the free list. Startup
//! fails when the unclonable stages alone exhaust the list.

pub mod replica;
pub mod stats;
pub(crate) mod worker;

use std::panic::{self, AssertUnwindSafe};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::graph::callbacks::UserContext;
use crate::graph::stage::{StageDesc, StageSpec};
use crate::port::PortDriver;
use crate::ring::Ring;
use crate::stop::StopRing;

use replica::{CloneExec, ReplicaEnv};
use stats::{SchedulerStats, StageSnapshot};
use worker::WorkerEnv;

/// Capacity of the per-stage report channel shared by all replicas.
const REPORT_CHANNEL_CAP: usize = 50;

/// Consecutive quiet check windows before a retire/pause decision.
const RETIRE_HYSTERESIS_WINDOWS: u32 = 2;

/// Idle sleep handed to a sole replica instead of retiring it.
const IDLE_PAUSE_NS: i32 = 50_000;

/// Everything the builder hands over at `start`.
pub(crate) struct GraphParts {
    pub config: Config,
    pub driver: Arc<dyn PortDriver>,
    pub rings: Vec<Arc<Ring>>,
    pub stages: Vec<StageDesc>,
    pub stop: Arc<StopRing>,
    pub stats: Arc<SchedulerStats>,
    pub shutdown: Arc<AtomicBool>,
}

/// Spawn the graph and run the control loop until shutdown.
pub(crate) fn run_system(parts: GraphParts) -> Result<()> {
    let mut scheduler = Scheduler::new(parts);
    if let Err(e) = scheduler.spawn_all() {
        scheduler.stop_all();
        return Err(e);
    }
    scheduler.run()
}

struct StageThread {
    stop_tx: Sender<i32>,
    join: JoinHandle<()>,
}

struct UnclonableRunner {
    name: String,
    core: usize,
    input: Option<Arc<Ring>>,
    thread: StageThread,
}

struct ReplicaHandle {
    core: usize,
    thread: StageThread,
}

struct ClonableRunner {
    name: String,
    exec: Arc<CloneExec>,
    ctx_proto: Option<Box<dyn UserContext>>,
    report_tx: Sender<u64>,
    report_rx: Receiver<u64>,
    replicas: Vec<ReplicaHandle>,
    low_windows: u32,
    paused: bool,
    last_rate_pps: u64,
}

impl ClonableRunner {
    fn set_pause(&self, pause_ns: i32) {
        for replica in &self.replicas {
            let _ = replica.thread.stop_tx.try_send(pause_ns);
        }
    }
}

struct Scheduler {
    config: Config,
    driver: Arc<dyn PortDriver>,
    rings: Vec<Arc<Ring>>,
    pending: Vec<StageDesc>,
    stop: Arc<StopRing>,
    stats: Arc<SchedulerStats>,
    shutdown: Arc<AtomicBool>,
    scheduler_core: usize,
    free_cores: Vec<usize>,
    unclonable: Vec<UnclonableRunner>,
    clonable: Vec<ClonableRunner>,
    drain: Option<StageThread>,
}

impl Scheduler {
    fn new(parts: GraphParts) -> Scheduler {
        let cores: Vec<usize> = (0..parts.config.cores()).collect();
        let scheduler_core = cores[0];
        let mut free_cores = cores[1..].to_vec();
        // pop() hands out the lowest-numbered core first
        free_cores.reverse();
        Scheduler {
            config: parts.config,
            driver: parts.driver,
            rings: parts.rings,
            pending: parts.stages,
            stop: parts.stop,
            stats: parts.stats,
            shutdown: parts.shutdown,
            scheduler_core,
            free_cores,
            unclonable: Vec::new(),
            clonable: Vec::new(),
            drain: None,
        }
    }

    fn ring(&self, id: usize) -> Arc<Ring> {
        self.rings[id].clone()
    }

    fn take_core(&mut self, stage: &str) -> Result<usize> {
        self.free_cores
            .pop()
            .ok_or_else(|| Error::OutOfCores(stage.to_string()))
    }

    fn worker_env(&self) -> WorkerEnv {
        WorkerEnv {
            burst_size: self.config.burst_size,
            stop: self.stop.clone(),
            stats: self.stats.clone(),
        }
    }

    fn replica_env(&self) -> ReplicaEnv {
        ReplicaEnv {
            burst_size: self.config.burst_size,
            tick_period: Duration::from_millis(self.config.schedule_period_ms),
            stop: self.stop.clone(),
            stats: self.stats.clone(),
        }
    }

    fn spawn_all(&mut self) -> Result<()> {
        // The drain comes up first so shed buffers recycle from the start.
        let drain_core = if self.config.stop_on_dedicated_core {
            self.take_core("stop-drain")?
        } else {
            self.scheduler_core
        };
        let stop = self.stop.clone();
        let burst_size = self.config.burst_size;
        self.drain = Some(spawn_stage("stop-drain".to_string(), drain_core, move |rx| {
            worker::stop_drain_loop(stop, burst_size, rx)
        })?);

        // Unclonable stages claim their cores first; clonable stages then
        // start with a single replica each.
        let (clonable, unclonable): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.pending).into_iter().partition(|d| d.clonable);
        for desc in unclonable {
            self.spawn_unclonable(desc)?;
        }
        for desc in clonable {
            self.spawn_clonable(desc)?;
        }
        Ok(())
    }

    fn spawn_unclonable(&mut self, desc: StageDesc) -> Result<()> {
        let StageDesc { id, name, spec, .. } = desc;
        let core = self.take_core(&name)?;
        let env = self.worker_env();
        let (input, thread) = match spec {
            StageSpec::Receive { port, queue, out } => {
                let driver = self.driver.clone();
                let out = self.ring(out);
                let thread = spawn_stage(name.clone(), core, move |rx| {
                    worker::receive_loop(driver, port, queue, out, env, rx)
                })?;
                (None, thread)
            }
            StageSpec::GenerateOne { f, out, pool } => {
                let out = self.ring(out);
                let thread = spawn_stage(name.clone(), core, move |rx| {
                    worker::generate_one_loop(f, out, pool, env, rx)
                })?;
                (None, thread)
            }
            StageSpec::Partition {
                input,
                out_first,
                out_second,
                n,
                m,
            } => {
                let input_ring = self.ring(input);
                let out_first = self.ring(out_first);
                let out_second = self.ring(out_second);
                let stage_input = input_ring.clone();
                let thread = spawn_stage(name.clone(), core, move |rx| {
                    worker::partition_loop(stage_input, out_first, out_second, n, m, env, rx)
                })?;
                (Some(input_ring), thread)
            }
            StageSpec::Send { port, queue, input } => {
                let driver = self.driver.clone();
                let input_ring = self.ring(input);
                let stage_input = input_ring.clone();
                let thread = spawn_stage(name.clone(), core, move |rx| {
                    worker::send_loop(driver, port, queue, stage_input, env, rx)
                })?;
                (Some(input_ring), thread)
            }
            StageSpec::Write { path, input, clock } => {
                let input_ring = self.ring(input);
                let stage_input = input_ring.clone();
                let thread = spawn_stage(name.clone(), core, move |rx| {
                    worker::write_loop(&path, stage_input, clock, env, rx)
                })?;
                (Some(input_ring), thread)
            }
            StageSpec::Read {
                path,
                repcount,
                out,
                pool,
            } => {
                let out = self.ring(out);
                let thread = spawn_stage(name.clone(), core, move |rx| {
                    worker::read_loop(&path, repcount, out, pool, env, rx)
                })?;
                (None, thread)
            }
            StageSpec::GeneratePerf { .. }
            | StageSpec::Handle { .. }
            | StageSpec::Separate { .. }
            | StageSpec::Split { .. } => {
                unreachable!("stage '{name}' is clonable")
            }
        };
        debug!(stage = %name, id, core, "started stage");
        self.unclonable.push(UnclonableRunner {
            name,
            core,
            input,
            thread,
        });
        Ok(())
    }

    fn spawn_clonable(&mut self, desc: StageDesc) -> Result<()> {
        let StageDesc { id, name, spec, .. } = desc;
        let (exec, ctx_proto) = match spec {
            StageSpec::GeneratePerf {
                cb,
                target_pps,
                out,
                pool,
                ctx,
            } => (
                CloneExec::Generate {
                    cb,
                    target_pps,
                    out: self.ring(out),
                    pool,
                },
                ctx,
            ),
            StageSpec::Handle {
                work,
                input,
                out,
                ctx,
            } => (
                CloneExec::Handle {
                    work,
                    input: self.ring(input),
                    out: self.ring(out),
                },
                ctx,
            ),
            StageSpec::Separate {
                cb,
                input,
                out_true,
                out_false,
                ctx,
            } => (
                CloneExec::Separate {
                    cb,
                    input: self.ring(input),
                    out_true: self.ring(out_true),
                    out_false: self.ring(out_false),
                },
                ctx,
            ),
            StageSpec::Split { f, input, outs, ctx } => (
                CloneExec::Split {
                    f,
                    input: self.ring(input),
                    outs: outs.into_iter().map(|r| self.ring(r)).collect(),
                },
                ctx,
            ),
            _ => unreachable!("stage '{name}' is unclonable"),
        };
        let (report_tx, report_rx) = bounded(REPORT_CHANNEL_CAP);
        let mut runner = ClonableRunner {
            name,
            exec: Arc::new(exec),
            ctx_proto,
            report_tx,
            report_rx,
            replicas: Vec::new(),
            low_windows: 0,
            paused: false,
            last_rate_pps: 0,
        };
        let core = self.take_core(&runner.name)?;
        let replica = spawn_replica(&runner, core, &self.replica_env())?;
        debug!(stage = %runner.name, id, core, "started stage");
        runner.replicas.push(replica);
        self.clonable.push(runner);
        Ok(())
    }

    fn run(mut self) -> Result<()> {
        pin_to_core(self.scheduler_core);
        let schedule_period = Duration::from_millis(self.config.schedule_period_ms);
        let check_period = Duration::from_millis(self.config.check_period_ms);
        let debug_period = Duration::from_millis(self.config.debug_period_ms);
        let mut last_check = Instant::now();
        let mut last_debug = Instant::now();
        info!(
            free_cores = self.free_cores.len(),
            disable_scheduler = self.config.disable_scheduler,
            "scheduler control loop running"
        );
        while !self.shutdown.load(Ordering::Acquire) {
            thread::sleep(schedule_period);
            let now = Instant::now();
            if now.duration_since(last_debug) >= debug_period {
                self.report_stats();
                last_debug = now;
            }
            if now.duration_since(last_check) >= check_period {
                self.control(now.duration_since(last_check));
                last_check = now;
            }
        }
        info!("shutdown requested; stopping stages");
        self.stop_all();
        Ok(())
    }

    /// One control pass over every clonable stage: sum the replica reports
    /// from the elapsed window, then clone, retire, or pause.
    fn control(&mut self, window: Duration) {
        let max_outstanding = self.config.max_outstanding_for_clone();
        let act = !self.config.disable_scheduler;
        let persistent = self.config.persistent_clones;
        let secs = window.as_secs_f64().max(1e-9);
        let env = self.replica_env();
        let Scheduler {
            clonable,
            free_cores,
            ..
        } = self;
        for runner in clonable.iter_mut() {
            let mut observed: u64 = 0;
            while let Ok(count) = runner.report_rx.try_recv() {
                observed += count;
            }
            let pps = (observed as f64 / secs) as u64;
            runner.last_rate_pps = pps;
            if !act {
                continue;
            }
            if runner.exec.wants_clone(pps, max_outstanding) {
                runner.low_windows = 0;
                if runner.paused {
                    runner.set_pause(0);
                    runner.paused = false;
                }
                if let Some(core) = free_cores.pop() {
                    match spawn_replica(runner, core, &env) {
                        Ok(replica) => {
                            debug!(
                                stage = %runner.name,
                                core,
                                replicas = runner.replicas.len() + 1,
                                "cloned stage"
                            );
                            runner.replicas.push(replica);
                        }
                        Err(e) => {
                            error!(stage = %runner.name, error = %e, "failed to clone stage");
                            free_cores.push(core);
                        }
                    }
                }
            } else {
                runner.low_windows += 1;
                if runner.low_windows >= RETIRE_HYSTERESIS_WINDOWS {
                    runner.low_windows = 0;
                    if runner.replicas.len() > 1 && !persistent {
                        if let Some(replica) = runner.replicas.pop() {
                            let _ = replica.thread.stop_tx.send(-1);
                            let _ = replica.thread.join.join();
                            free_cores.push(replica.core);
                            debug!(
                                stage = %runner.name,
                                replicas = runner.replicas.len(),
                                "retired stage replica"
                            );
                        }
                    } else if !runner.paused && pps == 0 {
                        runner.set_pause(IDLE_PAUSE_NS);
                        runner.paused = true;
                        debug!(stage = %runner.name, pause_ns = IDLE_PAUSE_NS, "paused idle stage");
                    }
                }
            }
        }
    }

    fn report_stats(&self) {
        let mut snapshots = Vec::with_capacity(self.unclonable.len() + self.clonable.len());
        for runner in &self.unclonable {
            snapshots.push(StageSnapshot {
                name: runner.name.clone(),
                replicas: 1,
                input_occupancy: runner.input.as_ref().map(|r| r.count()),
                rate_pps: 0,
            });
        }
        for runner in &self.clonable {
            snapshots.push(StageSnapshot {
                name: runner.name.clone(),
                replicas: runner.replicas.len(),
                input_occupancy: runner.exec.input_ring().map(|r| r.count()),
                rate_pps: runner.last_rate_pps,
            });
        }
        debug!(
            dropped = self.stats.dropped(),
            freed = self.stats.freed(),
            stop_ring = self.stop.ring().count(),
            "scheduler statistics"
        );
        for snapshot in &snapshots {
            debug!(
                stage = %snapshot.name,
                replicas = snapshot.replicas,
                occupancy = ?snapshot.input_occupancy,
                pps = snapshot.rate_pps,
                "stage statistics"
            );
        }
        self.stats.publish(snapshots);
    }

    /// Deliver stop = -1 to every stage thread and join them, drain last.
    fn stop_all(&mut self) {
        for runner in &mut self.clonable {
            for replica in runner.replicas.drain(..) {
                let _ = replica.thread.stop_tx.send(-1);
                let _ = replica.thread.join.join();
            }
        }
        for runner in self.unclonable.drain(..) {
            let _ = runner.thread.stop_tx.send(-1);
            let _ = runner.thread.join.join();
            debug!(stage = %runner.name, core = runner.core, "stopped stage");
        }
        if let Some(drain) = self.drain.take() {
            let _ = drain.stop_tx.send(-1);
            let _ = drain.join.join();
        }
    }
}

fn spawn_replica(runner: &ClonableRunner, core: usize, env: &ReplicaEnv) -> Result<ReplicaHandle> {
    let exec = runner.exec.clone();
    let ctx = runner.ctx_proto.as_ref().map(|c| c.clone_box());
    let report_tx = runner.report_tx.clone();
    let env = env.clone();
    let name = format!("{}/{}", runner.name, runner.replicas.len());
    let thread = spawn_stage(name, core, move |stop_rx| {
        replica::run_clonable(&exec, ctx, stop_rx, report_tx, &env)
    })?;
    Ok(ReplicaHandle { core, thread })
}

/// Spawn a pinned stage thread. Errors and panics escaping the stage body
/// are fatal to the whole process; nothing crosses a stage boundary.
fn spawn_stage<F>(name: String, core: usize, body: F) -> Result<StageThread>
where
    F: FnOnce(Receiver<i32>) -> Result<()> + Send + 'static,
{
    let (stop_tx, stop_rx) = bounded::<i32>(4);
    let thread_name = name.clone();
    let join = thread::Builder::new().name(name).spawn(move || {
        pin_to_core(core);
        match panic::catch_unwind(AssertUnwindSafe(|| body(stop_rx))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(stage = %thread_name, error = %e, "stage failed; terminating process");
                process::exit(1);
            }
            Err(_) => {
                error!(stage = %thread_name, "stage panicked; terminating process");
                process::exit(101);
            }
        }
    })?;
    Ok(StageThread { stop_tx, join })
}

fn pin_to_core(core: usize) {
    if !core_affinity::set_for_current(core_affinity::CoreId { id: core }) {
        warn!(core, "could not pin thread to core");
    }
}
