//! Packet processing graph construction.
//!
//! All construction happens between [`GraphBuilder::new`] and
//! [`GraphBuilder::start`]. The builder's `set_*` operations wire flow
//! functions together through rings; a [`Flow`] is nothing more than the
//! open producer side of one ring, consumed by exactly one later operation.
//!
//! Merge is not a runtime stage: [`set_merger`](GraphBuilder::set_merger)
//! rewrites the producers of its input flows onto a single ring at
//! construction time, which is sound because nothing runs before `start`.
//!
//! # Example
//!
//! ```no_run
//! use pktflow::{Config, GraphBuilder, HandleCallback, Mbuf, UserContext};
//!
//! fn bump_ttl(pkt: &mut Mbuf, _ctx: Option<&mut (dyn UserContext + '_)>) {
//!     let data = pkt.data_mut();
//!     if data.len() > 22 {
//!         data[22] = data[22].wrapping_sub(1);
//!     }
//! }
//!
//! fn main() -> pktflow::Result<()> {
//!     let mut graph = GraphBuilder::new(Config::default())?;
//!     let mut flow = graph.set_reader("input.pcap", 1);
//!     graph.set_handler(&mut flow, HandleCallback::Scalar(bump_ttl), None);
//!     graph.set_writer(flow, "output.pcap");
//!     graph.start()
//! }
//! ```

pub mod callbacks;
pub(crate) mod stage;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::mempool::Mempool;
use crate::pcap::{Clock, SystemClock};
use crate::port::{NoPortsDriver, PortDriver, PortId, PortMode, PortState, QueueId};
use crate::ring::Ring;
use crate::scheduler::replica::HandleWork;
use crate::scheduler::stats::SchedulerStats;
use crate::scheduler::{self, GraphParts};
use crate::stop::StopRing;

use callbacks::{
    GenerateCallback, HandleCallback, SeparateCallback, SplitFn, UserContext,
};
use stage::{RingId, StageDesc, StageSpec, STOP_RING};

/// The open producer side of one ring.
///
/// A `Flow` is a construction-time token, nothing more: it is returned by
/// the operation that opened the ring and consumed (by value) by exactly one
/// later operation. Dropping a `Flow` without consuming it leaves the flow
/// open, which [`GraphBuilder::start`] rejects.
pub struct Flow {
    ring: RingId,
}

/// Requests shutdown of a running graph.
///
/// Obtain before [`GraphBuilder::start`]; cloneable and callable from any
/// thread. The scheduler notices on its next tick, delivers `stop = -1` to
/// every stage thread, joins them, and `start` returns.
#[derive(Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Builds the packet processing graph and hands it to the scheduler.
pub struct GraphBuilder {
    config: Config,
    driver: Arc<dyn PortDriver>,
    rings: Vec<Arc<Ring>>,
    stages: Vec<StageDesc>,
    ports: Vec<PortState>,
    open_flows: usize,
    stop: Arc<StopRing>,
    stats: Arc<SchedulerStats>,
    shutdown: Arc<AtomicBool>,
    pool_count: usize,
}

impl GraphBuilder {
    /// Initialize the system without NIC ports. Must be called before any
    /// `set_*` operation.
    pub fn new(config: Config) -> Result<GraphBuilder> {
        Self::with_driver(config, Arc::new(NoPortsDriver))
    }

    /// Initialize the system with a NIC driver providing the ports that
    /// receive and send stages attach to.
    pub fn with_driver(config: Config, driver: Arc<dyn PortDriver>) -> Result<GraphBuilder> {
        config.validate()?;
        let stats = Arc::new(SchedulerStats::default());
        let stop = StopRing::new(config.ring_capacity(), stats.clone());
        let rings = vec![stop.shared_ring()];
        let ports = (0..driver.port_count())
            .map(|i| PortState::inactive(i as PortId))
            .collect();
        info!(
            cores = config.cores(),
            burst_size = config.burst_size,
            ring_capacity = config.ring_capacity(),
            "initialized packet processing system"
        );
        Ok(GraphBuilder {
            config,
            driver,
            rings,
            stages: Vec::new(),
            ports,
            open_flows: 0,
            stop,
            stats,
            shutdown: Arc::new(AtomicBool::new(false)),
            pool_count: 0,
        })
    }

    /// Handle for requesting shutdown once the graph is running.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            flag: self.shutdown.clone(),
        }
    }

    /// Live runtime statistics (counters now, per-stage snapshots once the
    /// graph runs).
    pub fn stats(&self) -> Arc<SchedulerStats> {
        self.stats.clone()
    }

    /// Add a receive stage polling an automatically assigned rx queue of
    /// `port`. Returns the flow of received packets.
    pub fn set_receiver(&mut self, port: PortId) -> Result<Flow> {
        let state = self.port_mut(port)?;
        match state.mode {
            PortMode::Manual => {
                return Err(Error::PortModeConflict(port, "manual", "auto"));
            }
            _ => state.mode = PortMode::Auto,
        }
        let queue = state.rx_used.len() as QueueId;
        state.rx_used.push(true);
        let out = self.new_ring();
        self.add_stage("receiver", false, StageSpec::Receive { port, queue, out });
        Ok(self.open_flow(out))
    }

    /// Add a receive stage on an explicit rx queue of a manually configured
    /// port (see [`configure_port`](GraphBuilder::configure_port)).
    pub fn set_receiver_queue(&mut self, port: PortId, queue: QueueId) -> Result<Flow> {
        let state = self.port_mut(port)?;
        match state.mode {
            PortMode::Manual => {}
            PortMode::Auto => return Err(Error::PortModeConflict(port, "auto", "manual")),
            PortMode::Inactive => {
                return Err(Error::PortQueue {
                    port,
                    queue,
                    reason: "on an unconfigured port; call configure_port first",
                })
            }
        }
        let used = state.rx_used.get_mut(queue as usize).ok_or(Error::PortQueue {
            port,
            queue,
            reason: "out of the configured rx queue range",
        })?;
        if *used {
            return Err(Error::PortQueue {
                port,
                queue,
                reason: "already attached to a receiver",
            });
        }
        *used = true;
        let out = self.new_ring();
        self.add_stage("receiver", false, StageSpec::Receive { port, queue, out });
        Ok(self.open_flow(out))
    }

    /// Add a generate stage. With `target_pps == 0` a single-threaded
    /// one-shot generator is added (useful for request/response traffic);
    /// with a positive target the generator is clonable and the scheduler
    /// replicates it until the observed rate reaches the target.
    pub fn set_generator(
        &mut self,
        cb: GenerateCallback,
        target_pps: u64,
        ctx: Option<Box<dyn UserContext>>,
    ) -> Result<Flow> {
        let out = self.new_ring();
        let pool = self.new_mempool();
        if target_pps == 0 {
            let f = match cb {
                GenerateCallback::Scalar(f) => f,
                GenerateCallback::Vector(_) => return Err(Error::CallbackShape("generator")),
            };
            if ctx.is_some() {
                warn!("user context is ignored for a one-shot generator");
            }
            self.add_stage("generator", false, StageSpec::GenerateOne { f, out, pool });
        } else {
            self.add_stage(
                "fast-generator",
                true,
                StageSpec::GeneratePerf {
                    cb,
                    target_pps,
                    out,
                    pool,
                    ctx,
                },
            );
        }
        Ok(self.open_flow(out))
    }

    /// Add a read stage replaying a pcap file. `repcount` is the number of
    /// passes over the file; `-1` replays it forever.
    pub fn set_reader(&mut self, path: impl Into<PathBuf>, repcount: i32) -> Flow {
        let out = self.new_ring();
        let pool = self.new_mempool();
        self.add_stage(
            "reader",
            false,
            StageSpec::Read {
                path: path.into(),
                repcount,
                out,
                pool,
            },
        );
        self.open_flow(out)
    }

    /// Add a handle stage in place on `flow`. A `Filter` callback turns the
    /// handler into a separator whose false branch is the stop ring, so
    /// returning `false` drops the packet.
    pub fn set_handler(
        &mut self,
        flow: &mut Flow,
        cb: HandleCallback,
        ctx: Option<Box<dyn UserContext>>,
    ) {
        let input = flow.ring;
        let out = self.new_ring();
        match cb {
            HandleCallback::Scalar(f) => self.add_stage(
                "handler",
                true,
                StageSpec::Handle {
                    work: HandleWork::Scalar(f),
                    input,
                    out,
                    ctx,
                },
            ),
            HandleCallback::Vector(f) => self.add_stage(
                "vector-handler",
                true,
                StageSpec::Handle {
                    work: HandleWork::Vector(f),
                    input,
                    out,
                    ctx,
                },
            ),
            HandleCallback::Filter(f) => self.add_stage(
                "handler",
                true,
                StageSpec::Separate {
                    cb: SeparateCallback::Scalar(f),
                    input,
                    out_true: out,
                    out_false: STOP_RING,
                    ctx,
                },
            ),
            HandleCallback::VectorFilter(f) => self.add_stage(
                "vector-handler",
                true,
                StageSpec::Separate {
                    cb: SeparateCallback::Vector(f),
                    input,
                    out_true: out,
                    out_false: STOP_RING,
                    ctx,
                },
            ),
        }
        flow.ring = out;
    }

    /// Add a separate stage. Packets for which the callback returns `true`
    /// stay in `flow`; the returned flow carries the rest. Order within each
    /// branch is preserved.
    pub fn set_separator(
        &mut self,
        flow: &mut Flow,
        cb: SeparateCallback,
        ctx: Option<Box<dyn UserContext>>,
    ) -> Flow {
        let input = flow.ring;
        let out_true = self.new_ring();
        let out_false = self.new_ring();
        let name = match cb {
            SeparateCallback::Scalar(_) => "separator",
            SeparateCallback::Vector(_) => "vector-separator",
        };
        self.add_stage(
            name,
            true,
            StageSpec::Separate {
                cb,
                input,
                out_true,
                out_false,
                ctx,
            },
        );
        flow.ring = out_true;
        self.open_flow(out_false)
    }

    /// Add an N-way split stage. The callback picks an output index in
    /// `0..n` per packet; flow 0 is conventionally the drop flow and should
    /// get a stopper.
    pub fn set_splitter(
        &mut self,
        flow: Flow,
        f: SplitFn,
        n: usize,
        ctx: Option<Box<dyn UserContext>>,
    ) -> Result<Vec<Flow>> {
        if n == 0 {
            return Err(Error::InvalidSplitCount);
        }
        let input = flow.ring;
        self.close_flow(flow);
        let outs: Vec<RingId> = (0..n).map(|_| self.new_ring()).collect();
        self.add_stage(
            "splitter",
            true,
            StageSpec::Split {
                f,
                input,
                outs: outs.clone(),
                ctx,
            },
        );
        Ok(outs.into_iter().map(|r| self.open_flow(r)).collect())
    }

    /// Add a partition stage: each cycle keeps `n` packets in `flow` and
    /// sends the next `m` to the returned flow. The per-packet counter is
    /// shared state, so the stage is unclonable; constants below 75 are a
    /// performance hazard.
    pub fn set_partitioner(&mut self, flow: &mut Flow, n: u64, m: u64) -> Result<Flow> {
        if n == 0 || m == 0 {
            return Err(Error::InvalidPartition);
        }
        if n < 75 || m < 75 {
            warn!(n, m, "small partitioner constants; consider (75, 75) or larger");
        }
        let input = flow.ring;
        let out_first = self.new_ring();
        let out_second = self.new_ring();
        self.add_stage(
            "partitioner",
            false,
            StageSpec::Partition {
                input,
                out_first,
                out_second,
                n,
                m,
            },
        );
        flow.ring = out_first;
        Ok(self.open_flow(out_second))
    }

    /// Merge any number of flows into one by rewriting their producers onto
    /// a fresh ring. Uses no runtime stage and no core.
    pub fn set_merger(&mut self, flows: Vec<Flow>) -> Flow {
        let ring = self.new_ring();
        for flow in flows {
            let from = flow.ring;
            self.close_flow(flow);
            self.rewrite_ring(from, ring);
        }
        self.open_flow(ring)
    }

    /// Close `flow` by dropping all of its packets: its producers are
    /// rewritten onto the stop ring, whose drain frees every buffer.
    pub fn set_stopper(&mut self, flow: Flow) {
        let from = flow.ring;
        self.close_flow(flow);
        self.rewrite_ring(from, STOP_RING);
    }

    /// Add a send stage on an automatically assigned tx queue of `port`.
    pub fn set_sender(&mut self, flow: Flow, port: PortId) -> Result<()> {
        let state = self.port_mut(port)?;
        match state.mode {
            PortMode::Manual => {
                return Err(Error::PortModeConflict(port, "manual", "auto"));
            }
            _ => state.mode = PortMode::Auto,
        }
        let queue = state.tx_used.len() as QueueId;
        state.tx_used.push(true);
        let input = flow.ring;
        self.close_flow(flow);
        self.add_stage("sender", false, StageSpec::Send { port, queue, input });
        Ok(())
    }

    /// Add a send stage on an explicit tx queue of a manually configured
    /// port.
    pub fn set_sender_queue(&mut self, flow: Flow, port: PortId, queue: QueueId) -> Result<()> {
        let state = self.port_mut(port)?;
        match state.mode {
            PortMode::Manual => {}
            PortMode::Auto => return Err(Error::PortModeConflict(port, "auto", "manual")),
            PortMode::Inactive => {
                return Err(Error::PortQueue {
                    port,
                    queue,
                    reason: "on an unconfigured port; call configure_port first",
                })
            }
        }
        let used = state.tx_used.get_mut(queue as usize).ok_or(Error::PortQueue {
            port,
            queue,
            reason: "out of the configured tx queue range",
        })?;
        if *used {
            return Err(Error::PortQueue {
                port,
                queue,
                reason: "already attached to a sender",
            });
        }
        *used = true;
        let input = flow.ring;
        self.close_flow(flow);
        self.add_stage("sender", false, StageSpec::Send { port, queue, input });
        Ok(())
    }

    /// Add a write stage serializing `flow` to a pcap file with wall-clock
    /// timestamps.
    pub fn set_writer(&mut self, flow: Flow, path: impl Into<PathBuf>) {
        self.set_writer_with_clock(flow, path, Arc::new(SystemClock));
    }

    /// Add a write stage with an explicit timestamp source. Serialization
    /// tests seed this with a [`FixedClock`](crate::FixedClock).
    pub fn set_writer_with_clock(
        &mut self,
        flow: Flow,
        path: impl Into<PathBuf>,
        clock: Arc<dyn Clock>,
    ) {
        let input = flow.ring;
        self.close_flow(flow);
        self.add_stage(
            "writer",
            false,
            StageSpec::Write {
                path: path.into(),
                input,
                clock,
            },
        );
    }

    /// Pre-configure `port` with fixed rx/tx queue counts for use with
    /// [`set_receiver_queue`](GraphBuilder::set_receiver_queue) and
    /// [`set_sender_queue`](GraphBuilder::set_sender_queue). A port is
    /// either auto or manual, never both.
    pub fn configure_port(&mut self, port: PortId, rx_queues: u16, tx_queues: u16) -> Result<()> {
        if rx_queues == 0 && tx_queues == 0 {
            return Err(Error::PortUnused(port));
        }
        let state = self.port_mut(port)?;
        match state.mode {
            PortMode::Inactive => state.mode = PortMode::Manual,
            mode => return Err(Error::PortModeConflict(port, mode.as_str(), "manual")),
        }
        state.rx_used = vec![false; rx_queues as usize];
        state.tx_used = vec![false; tx_queues as usize];
        Ok(())
    }

    /// Default MAC address of an Ethernet port.
    pub fn port_mac_address(&self, port: PortId) -> Result<[u8; 6]> {
        if (port as usize) >= self.ports.len() {
            return Err(Error::PortOutOfRange(port, self.ports.len()));
        }
        Ok(self.driver.mac_address(port))
    }

    /// Start the system: spawn every stage on its core and enter the
    /// scheduler control loop. Returns after a [`ShutdownHandle`] fires and
    /// every stage thread has observed `stop = -1` and exited.
    pub fn start(self) -> Result<()> {
        self.check_system()?;
        info!(
            stages = self.stages.len(),
            rings = self.rings.len(),
            "starting flow functions"
        );
        scheduler::run_system(GraphParts {
            config: self.config,
            driver: self.driver,
            rings: self.rings,
            stages: self.stages,
            stop: self.stop,
            stats: self.stats,
            shutdown: self.shutdown,
        })
    }

    fn check_system(&self) -> Result<()> {
        if self.open_flows != 0 {
            return Err(Error::OpenFlows(self.open_flows));
        }
        for state in &self.ports {
            if state.mode == PortMode::Inactive {
                continue;
            }
            if state.rx_used.is_empty() && state.tx_used.is_empty() {
                return Err(Error::PortUnused(state.id));
            }
            if let Some(queue) = state.rx_used.iter().position(|used| !used) {
                // RSS spreads packets over every configured rx queue; an
                // unpolled queue silently loses traffic.
                return Err(Error::PortQueue {
                    port: state.id,
                    queue: queue as QueueId,
                    reason: "configured but has no receiver; packets would be missed",
                });
            }
            if state.tx_used.iter().any(|used| !used) {
                warn!(
                    port = state.id,
                    "port has unused send queues; performance can be lower than expected"
                );
            }
        }
        Ok(())
    }

    fn port_mut(&mut self, port: PortId) -> Result<&mut PortState> {
        let count = self.ports.len();
        self.ports
            .get_mut(port as usize)
            .ok_or(Error::PortOutOfRange(port, count))
    }

    fn new_ring(&mut self) -> RingId {
        self.rings
            .push(Arc::new(Ring::with_capacity(self.config.ring_capacity())));
        self.rings.len() - 1
    }

    fn new_mempool(&mut self) -> Arc<Mempool> {
        self.pool_count += 1;
        Mempool::create(
            format!("mempool-{}", self.pool_count),
            self.config.mempool_size,
        )
    }

    fn add_stage(&mut self, kind: &str, clonable: bool, spec: StageSpec) {
        let id = self.stages.len() + 1;
        self.stages.push(StageDesc {
            id,
            name: format!("{kind}-{id}"),
            clonable,
            spec,
        });
    }

    fn open_flow(&mut self, ring: RingId) -> Flow {
        self.open_flows += 1;
        Flow { ring }
    }

    fn close_flow(&mut self, flow: Flow) {
        self.open_flows -= 1;
        drop(flow);
    }

    fn rewrite_ring(&mut self, from: RingId, to: RingId) {
        for desc in &mut self.stages {
            desc.spec.rewrite_output(from, to);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mbuf::Mbuf;
    use crate::port::LoopbackPortDriver;

    fn nop_generate(_pkt: &mut Mbuf, _ctx: Option<&mut (dyn UserContext + '_)>) {}

    fn nop_separate(_pkt: &Mbuf, _ctx: Option<&mut (dyn UserContext + '_)>) -> bool {
        true
    }

    fn small_config() -> Config {
        Config {
            cpu_cores: 4,
            mempool_size: 64,
            ring_size_multiplier: 8,
            ..Config::default()
        }
    }

    #[test]
    fn test_open_flow_is_a_construction_error() {
        let mut graph = GraphBuilder::new(small_config()).unwrap();
        let _flow = graph
            .set_generator(GenerateCallback::Scalar(nop_generate), 0, None)
            .unwrap();
        assert!(matches!(graph.check_system(), Err(Error::OpenFlows(1))));
    }

    #[test]
    fn test_closed_graph_passes_checks() {
        let mut graph = GraphBuilder::new(small_config()).unwrap();
        let flow = graph
            .set_generator(GenerateCallback::Scalar(nop_generate), 0, None)
            .unwrap();
        graph.set_stopper(flow);
        graph.check_system().unwrap();
    }

    #[test]
    fn test_merge_rewrites_every_producer() {
        let mut graph = GraphBuilder::new(small_config()).unwrap();
        let flows: Vec<Flow> = (0..3)
            .map(|_| {
                graph
                    .set_generator(GenerateCallback::Scalar(nop_generate), 1000, None)
                    .unwrap()
            })
            .collect();
        let merged_rings: Vec<RingId> = flows.iter().map(|f| f.ring).collect();

        let out = graph.set_merger(flows);
        let merged_into = out.ring;
        graph.set_stopper(out);

        for desc in &graph.stages {
            for ring in desc.spec.outputs() {
                assert!(
                    !merged_rings.contains(&ring),
                    "stage {} still writes to a merged ring",
                    desc.name
                );
            }
        }
        // The stopper then forwarded the merged ring to the stop ring.
        for desc in &graph.stages {
            assert_eq!(desc.spec.outputs(), vec![STOP_RING]);
        }
        assert_ne!(merged_into, STOP_RING);
        graph.check_system().unwrap();
    }

    #[test]
    fn test_handler_filter_desugars_to_separator_into_stop_ring() {
        let mut graph = GraphBuilder::new(small_config()).unwrap();
        let mut flow = graph
            .set_generator(GenerateCallback::Scalar(nop_generate), 1000, None)
            .unwrap();
        graph.set_handler(&mut flow, HandleCallback::Filter(nop_separate), None);
        graph.set_stopper(flow);

        let handler = graph.stages.last().unwrap();
        match &handler.spec {
            StageSpec::Separate { out_false, .. } => assert_eq!(*out_false, STOP_RING),
            _ => panic!("filter handler should construct a separator"),
        }
    }

    #[test]
    fn test_auto_and_manual_port_modes_conflict() {
        let driver = LoopbackPortDriver::new(2, 16, 16);
        let mut graph = GraphBuilder::with_driver(small_config(), driver).unwrap();

        let rx = graph.set_receiver(0).unwrap();
        graph.set_stopper(rx);
        assert!(matches!(
            graph.configure_port(0, 1, 1),
            Err(Error::PortModeConflict(0, "auto", "manual"))
        ));

        graph.configure_port(1, 1, 0).unwrap();
        assert!(matches!(
            graph.set_receiver(1),
            Err(Error::PortModeConflict(1, "manual", "auto"))
        ));
        let rx = graph.set_receiver_queue(1, 0).unwrap();
        graph.set_stopper(rx);
        assert!(matches!(
            graph.set_receiver_queue(1, 0),
            Err(Error::PortQueue { .. })
        ));
        graph.check_system().unwrap();
    }

    #[test]
    fn test_unpolled_manual_rx_queue_fails_startup() {
        let driver = LoopbackPortDriver::new(1, 16, 16);
        let mut graph = GraphBuilder::with_driver(small_config(), driver).unwrap();
        graph.configure_port(0, 2, 0).unwrap();
        let rx = graph.set_receiver_queue(0, 0).unwrap();
        graph.set_stopper(rx);
        assert!(matches!(
            graph.check_system(),
            Err(Error::PortQueue { port: 0, queue: 1, .. })
        ));
    }

    #[test]
    fn test_port_out_of_range() {
        let mut graph = GraphBuilder::new(small_config()).unwrap();
        assert!(matches!(
            graph.set_receiver(0),
            Err(Error::PortOutOfRange(0, 0))
        ));
    }

    #[test]
    fn test_splitter_rejects_zero_outputs() {
        fn split(_pkt: &Mbuf, _ctx: Option<&mut (dyn UserContext + '_)>) -> usize {
            0
        }
        let mut graph = GraphBuilder::new(small_config()).unwrap();
        let flow = graph
            .set_generator(GenerateCallback::Scalar(nop_generate), 1000, None)
            .unwrap();
        assert!(matches!(
            graph.set_splitter(flow, split, 0, None),
            Err(Error::InvalidSplitCount)
        ));
    }

    #[test]
    fn test_partitioner_rejects_zero_constants() {
        let mut graph = GraphBuilder::new(small_config()).unwrap();
        let mut flow = graph
            .set_generator(GenerateCallback::Scalar(nop_generate), 1000, None)
            .unwrap();
        assert!(matches!(
            graph.set_partitioner(&mut flow, 0, 5),
            Err(Error::InvalidPartition)
        ));
        graph.set_stopper(flow);
    }

    #[test]
    fn test_one_shot_generator_rejects_vector_callback() {
        fn vector(_pkts: &mut [&mut Mbuf], _ctx: Option<&mut (dyn UserContext + '_)>) {}
        let mut graph = GraphBuilder::new(small_config()).unwrap();
        assert!(matches!(
            graph.set_generator(GenerateCallback::Vector(vector), 0, None),
            Err(Error::CallbackShape("generator"))
        ));
    }
}
