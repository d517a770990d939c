//! Poll-mode packet-processing graph runtime.
//!
//! Applications build a directed graph of flow functions (receive, generate,
//! handle, separate, split, partition, merge, send, read, write) whose edges
//! are bounded lock-free rings carrying pointers to pre-allocated packet
//! buffers. A user-space scheduler binds stage instances to CPU cores,
//! observes per-stage throughput and input-queue occupancy, and clones or
//! retires the stateless stages at runtime to meet target rates or relieve
//! pressure.
//!
//! All graph construction happens between [`GraphBuilder::new`] and
//! [`GraphBuilder::start`]. `start` enters the scheduler control loop and
//! returns only after a [`ShutdownHandle`] fires.
//!
//! # Example
//!
//! ```no_run
//! use pktflow::{Config, GraphBuilder, GenerateCallback, Mbuf, UserContext};
//!
//! fn fill(pkt: &mut Mbuf, _ctx: Option<&mut (dyn UserContext + '_)>) {
//!     pkt.copy_from_slice(&[0u8; 64]);
//! }
//!
//! fn main() -> pktflow::Result<()> {
//!     let mut graph = GraphBuilder::new(Config::default())?;
//!     let flow = graph.set_generator(GenerateCallback::Scalar(fill), 1_000_000, None)?;
//!     graph.set_stopper(flow);
//!     graph.start()
//! }
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod mbuf;
pub mod mempool;
pub mod pcap;
pub mod port;
pub mod ring;
pub mod scheduler;
pub mod stop;

pub use config::Config;
pub use error::{Error, Result};
pub use graph::callbacks::{
    GenerateCallback, GenerateFn, HandleCallback, HandleFn, SeparateCallback, SeparateFn, SplitFn,
    UserContext, VectorGenerateFn, VectorHandleFn, VectorSeparateFn,
};
pub use graph::{Flow, GraphBuilder, ShutdownHandle};
pub use mbuf::{Mbuf, MbufPtr};
pub use mempool::Mempool;
pub use pcap::{Clock, FixedClock, SystemClock};
pub use port::{LoopbackPortDriver, PortDriver, PortId, QueueId};
pub use ring::{Burst, Ring, MAX_BURST_SIZE};
pub use scheduler::stats::{SchedulerStats, StageSnapshot};
