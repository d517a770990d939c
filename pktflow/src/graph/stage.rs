// Stage descriptors.
//
// A descriptor is the construction-time record of one flow function: kind,
// ring attachments (by id, so merge can rewrite them), callback, and the
// clonable/unclonable split the scheduler acts on.

use std::path::PathBuf;
use std::sync::Arc;

use crate::graph::callbacks::{GenerateCallback, SeparateCallback, SplitFn, UserContext};
use crate::mempool::Mempool;
use crate::pcap::Clock;
use crate::port::{PortId, QueueId};
use crate::scheduler::replica::HandleWork;

/// Ring index inside the builder's ring table. Index 0 is always the stop
/// ring.
pub(crate) type RingId = usize;

pub(crate) const STOP_RING: RingId = 0;

pub(crate) struct StageDesc {
    pub id: usize,
    pub name: String,
    pub clonable: bool,
    pub spec: StageSpec,
}

pub(crate) enum StageSpec {
    Receive {
        port: PortId,
        queue: QueueId,
        out: RingId,
    },
    GenerateOne {
        f: crate::graph::callbacks::GenerateFn,
        out: RingId,
        pool: Arc<Mempool>,
    },
    GeneratePerf {
        cb: GenerateCallback,
        target_pps: u64,
        out: RingId,
        pool: Arc<Mempool>,
        ctx: Option<Box<dyn UserContext>>,
    },
    Handle {
        work: HandleWork,
        input: RingId,
        out: RingId,
        ctx: Option<Box<dyn UserContext>>,
    },
    Separate {
        cb: SeparateCallback,
        input: RingId,
        out_true: RingId,
        out_false: RingId,
        ctx: Option<Box<dyn UserContext>>,
    },
    Split {
        f: SplitFn,
        input: RingId,
        outs: Vec<RingId>,
        ctx: Option<Box<dyn UserContext>>,
    },
    Partition {
        input: RingId,
        out_first: RingId,
        out_second: RingId,
        n: u64,
        m: u64,
    },
    Send {
        port: PortId,
        queue: QueueId,
        input: RingId,
    },
    Write {
        path: PathBuf,
        input: RingId,
        clock: Arc<dyn Clock>,
    },
    Read {
        path: PathBuf,
        repcount: i32,
        out: RingId,
        pool: Arc<Mempool>,
    },
}

impl StageSpec {
    /// Redirect every output currently aimed at `from` to `to`. Send and
    /// Write have no output ring and are left alone; earlier merges have
    /// already been forwarded by their own rewrite.
    pub(crate) fn rewrite_output(&mut self, from: RingId, to: RingId) {
        let redirect = |r: &mut RingId| {
            if *r == from {
                *r = to;
            }
        };
        match self {
            StageSpec::Receive { out, .. }
            | StageSpec::GenerateOne { out, .. }
            | StageSpec::GeneratePerf { out, .. }
            | StageSpec::Handle { out, .. }
            | StageSpec::Read { out, .. } => redirect(out),
            StageSpec::Separate {
                out_true, out_false, ..
            } => {
                redirect(out_true);
                redirect(out_false);
            }
            StageSpec::Split { outs, .. } => outs.iter_mut().for_each(redirect),
            StageSpec::Partition {
                out_first,
                out_second,
                ..
            } => {
                redirect(out_first);
                redirect(out_second);
            }
            StageSpec::Send { .. } | StageSpec::Write { .. } => {}
        }
    }

    /// All output ring ids of this stage, for construction checks.
    #[cfg(test)]
    pub(crate) fn outputs(&self) -> Vec<RingId> {
        match self {
            StageSpec::Receive { out, .. }
            | StageSpec::GenerateOne { out, .. }
            | StageSpec::GeneratePerf { out, .. }
            | StageSpec::Handle { out, .. }
            | StageSpec::Read { out, .. } => vec![*out],
            StageSpec::Separate {
                out_true, out_false, ..
            } => vec![*out_true, *out_false],
            StageSpec::Split { outs, .. } => outs.clone(),
            StageSpec::Partition {
                out_first,
                out_second,
                ..
            } => vec![*out_first, *out_second],
            StageSpec::Send { .. } | StageSpec::Write { .. } => Vec::new(),
        }
    }
}
