// Clonable stage replicas.
//
// Every replica is one pinned thread running a select loop over three
// events: a stop-channel message (-1 terminates, other values set the idle
// pause in nanoseconds), the sampling tick (publish packets-since-last-tick
// on the shared report channel), and otherwise one burst of work.

use std::sync::Arc;
use std::time::Duration;

use arrayvec::ArrayVec;
use crossbeam_channel::{select, Receiver, Sender};

use crate::error::Result;
use crate::graph::callbacks::{GenerateCallback, SeparateCallback, SplitFn, UserContext};
use crate::graph::callbacks::{HandleFn, VectorHandleFn};
use crate::mbuf::Mbuf;
use crate::mempool::Mempool;
use crate::ring::{Burst, Ring, MAX_BURST_SIZE};
use crate::scheduler::stats::SchedulerStats;
use crate::stop::{safe_enqueue, StopRing};

/// Work shape of a handle stage once the builder has split off the filter
/// variants (those become separators at construction).
#[derive(Clone, Copy)]
pub(crate) enum HandleWork {
    Scalar(HandleFn),
    Vector(VectorHandleFn),
}

/// Execution data shared by all replicas of one clonable stage.
pub(crate) enum CloneExec {
    Generate {
        cb: GenerateCallback,
        target_pps: u64,
        out: Arc<Ring>,
        pool: Arc<Mempool>,
    },
    Handle {
        work: HandleWork,
        input: Arc<Ring>,
        out: Arc<Ring>,
    },
    Separate {
        cb: SeparateCallback,
        input: Arc<Ring>,
        out_true: Arc<Ring>,
        out_false: Arc<Ring>,
    },
    Split {
        f: SplitFn,
        input: Arc<Ring>,
        outs: Vec<Arc<Ring>>,
    },
}

impl CloneExec {
    /// The input ring whose occupancy drives the clone predicate; `None` for
    /// generators, which are driven by their target rate instead.
    pub(crate) fn input_ring(&self) -> Option<&Arc<Ring>> {
        match self {
            CloneExec::Generate { .. } => None,
            CloneExec::Handle { input, .. }
            | CloneExec::Separate { input, .. }
            | CloneExec::Split { input, .. } => Some(input),
        }
    }

    /// Whether the scheduler should try to add a replica given the rate
    /// observed over the last check window.
    pub(crate) fn wants_clone(&self, observed_pps: u64, max_outstanding: usize) -> bool {
        match self {
            CloneExec::Generate { target_pps, .. } => observed_pps < *target_pps,
            _ => self
                .input_ring()
                .is_some_and(|ring| ring.count() > max_outstanding),
        }
    }
}

/// Per-replica environment, cloned into every spawned replica thread.
#[derive(Clone)]
pub(crate) struct ReplicaEnv {
    pub burst_size: usize,
    pub tick_period: Duration,
    pub stop: Arc<StopRing>,
    pub stats: Arc<SchedulerStats>,
}

/// Drive one replica until its stop channel says -1.
pub(crate) fn run_clonable(
    exec: &CloneExec,
    ctx: Option<Box<dyn UserContext>>,
    stop_rx: Receiver<i32>,
    report_tx: Sender<u64>,
    env: &ReplicaEnv,
) -> Result<()> {
    match exec {
        CloneExec::Generate { cb, out, pool, .. } => {
            generate_loop(*cb, out, pool, ctx, stop_rx, report_tx, env)
        }
        CloneExec::Handle { work, input, out } => {
            handle_loop(*work, input, out, ctx, stop_rx, report_tx, env)
        }
        CloneExec::Separate {
            cb,
            input,
            out_true,
            out_false,
        } => separate_loop(*cb, input, out_true, out_false, ctx, stop_rx, report_tx, env),
        CloneExec::Split { f, input, outs } => {
            split_loop(*f, input, outs, ctx, stop_rx, report_tx, env)
        }
    }
}

/// Sleep out the idle pause, or spin when busy polling is in effect.
#[inline]
fn idle(pause_ns: u64) {
    if pause_ns > 0 {
        std::thread::sleep(Duration::from_nanos(pause_ns));
    } else {
        std::hint::spin_loop();
    }
}

fn generate_loop(
    cb: GenerateCallback,
    out: &Ring,
    pool: &Mempool,
    mut ctx: Option<Box<dyn UserContext>>,
    stop_rx: Receiver<i32>,
    report_tx: Sender<u64>,
    env: &ReplicaEnv,
) -> Result<()> {
    let tick = crossbeam_channel::tick(env.tick_period);
    let mut bufs = Burst::new();
    let mut counter: u64 = 0;
    loop {
        select! {
            recv(stop_rx) -> msg => match msg {
                Ok(-1) | Err(_) => return Ok(()),
                Ok(_) => {}
            },
            recv(tick) -> _ => {
                let _ = report_tx.try_send(counter);
                counter = 0;
            },
            default => {
                bufs.clear();
                pool.allocate_bulk(&mut bufs, env.burst_size)?;
                match cb {
                    GenerateCallback::Scalar(f) => {
                        for &b in &bufs {
                            f(unsafe { b.as_mut() }, ctx.as_deref_mut());
                        }
                    }
                    GenerateCallback::Vector(f) => {
                        let mut pkts: ArrayVec<&mut Mbuf, MAX_BURST_SIZE> =
                            bufs.iter().map(|&b| unsafe { b.as_mut() }).collect();
                        f(&mut pkts, ctx.as_deref_mut());
                    }
                }
                safe_enqueue(out, &env.stop, &env.stats, &bufs);
                counter += bufs.len() as u64;
            }
        }
    }
}

fn handle_loop(
    work: HandleWork,
    input: &Ring,
    out: &Ring,
    mut ctx: Option<Box<dyn UserContext>>,
    stop_rx: Receiver<i32>,
    report_tx: Sender<u64>,
    env: &ReplicaEnv,
) -> Result<()> {
    let tick = crossbeam_channel::tick(env.tick_period);
    let mut bufs = Burst::new();
    let mut counter: u64 = 0;
    let mut pause_ns: u64 = 0;
    loop {
        select! {
            recv(stop_rx) -> msg => match msg {
                Ok(-1) | Err(_) => return Ok(()),
                Ok(v) => pause_ns = v.max(0) as u64,
            },
            recv(tick) -> _ => {
                let _ = report_tx.try_send(counter);
                counter = 0;
            },
            default => {
                bufs.clear();
                let n = input.dequeue_burst(&mut bufs, env.burst_size);
                if n == 0 {
                    idle(pause_ns);
                    continue;
                }
                match work {
                    HandleWork::Scalar(f) => {
                        for &b in &bufs {
                            f(unsafe { b.as_mut() }, ctx.as_deref_mut());
                        }
                    }
                    HandleWork::Vector(f) => {
                        let mut pkts: ArrayVec<&mut Mbuf, MAX_BURST_SIZE> =
                            bufs.iter().map(|&b| unsafe { b.as_mut() }).collect();
                        f(&mut pkts, ctx.as_deref_mut());
                    }
                }
                // Handles pass through unchanged; the callback never frees.
                safe_enqueue(out, &env.stop, &env.stats, &bufs);
                counter += n as u64;
            }
        }
    }
}

fn separate_loop(
    cb: SeparateCallback,
    input: &Ring,
    out_true: &Ring,
    out_false: &Ring,
    mut ctx: Option<Box<dyn UserContext>>,
    stop_rx: Receiver<i32>,
    report_tx: Sender<u64>,
    env: &ReplicaEnv,
) -> Result<()> {
    let tick = crossbeam_channel::tick(env.tick_period);
    let mut bufs = Burst::new();
    let mut kept = Burst::new();
    let mut separated = Burst::new();
    let mut mask = [false; MAX_BURST_SIZE];
    let mut counter: u64 = 0;
    let mut pause_ns: u64 = 0;
    loop {
        select! {
            recv(stop_rx) -> msg => match msg {
                Ok(-1) | Err(_) => return Ok(()),
                Ok(v) => pause_ns = v.max(0) as u64,
            },
            recv(tick) -> _ => {
                let _ = report_tx.try_send(counter);
                counter = 0;
            },
            default => {
                bufs.clear();
                let n = input.dequeue_burst(&mut bufs, env.burst_size);
                if n == 0 {
                    idle(pause_ns);
                    continue;
                }
                kept.clear();
                separated.clear();
                match cb {
                    SeparateCallback::Scalar(f) => {
                        for &b in &bufs {
                            if f(unsafe { b.as_ref() }, ctx.as_deref_mut()) {
                                kept.push(b);
                            } else {
                                separated.push(b);
                            }
                        }
                    }
                    SeparateCallback::Vector(f) => {
                        let pkts: ArrayVec<&mut Mbuf, MAX_BURST_SIZE> =
                            bufs.iter().map(|&b| unsafe { b.as_mut() }).collect();
                        f(&pkts, &mut mask[..n], ctx.as_deref_mut());
                        drop(pkts);
                        for (i, &b) in bufs.iter().enumerate() {
                            if mask[i] {
                                kept.push(b);
                            } else {
                                separated.push(b);
                            }
                        }
                    }
                }
                if !kept.is_empty() {
                    safe_enqueue(out_true, &env.stop, &env.stats, &kept);
                }
                if !separated.is_empty() {
                    safe_enqueue(out_false, &env.stop, &env.stats, &separated);
                }
                counter += n as u64;
            }
        }
    }
}

fn split_loop(
    f: SplitFn,
    input: &Ring,
    outs: &[Arc<Ring>],
    mut ctx: Option<Box<dyn UserContext>>,
    stop_rx: Receiver<i32>,
    report_tx: Sender<u64>,
    env: &ReplicaEnv,
) -> Result<()> {
    let tick = crossbeam_channel::tick(env.tick_period);
    let mut bufs = Burst::new();
    let mut split: Vec<Burst> = outs.iter().map(|_| Burst::new()).collect();
    let mut counter: u64 = 0;
    let mut pause_ns: u64 = 0;
    loop {
        select! {
            recv(stop_rx) -> msg => match msg {
                Ok(-1) | Err(_) => return Ok(()),
                Ok(v) => pause_ns = v.max(0) as u64,
            },
            recv(tick) -> _ => {
                let _ = report_tx.try_send(counter);
                counter = 0;
            },
            default => {
                bufs.clear();
                let n = input.dequeue_burst(&mut bufs, env.burst_size);
                if n == 0 {
                    idle(pause_ns);
                    continue;
                }
                for out in split.iter_mut() {
                    out.clear();
                }
                for &b in &bufs {
                    let index = f(unsafe { b.as_ref() }, ctx.as_deref_mut());
                    assert!(
                        index < outs.len(),
                        "split callback returned flow index {index}, graph has {}",
                        outs.len()
                    );
                    split[index].push(b);
                }
                for (index, out) in split.iter().enumerate() {
                    if !out.is_empty() {
                        safe_enqueue(&outs[index], &env.stop, &env.stats, out);
                    }
                }
                counter += n as u64;
            }
        }
    }
}
