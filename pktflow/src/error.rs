use crate::port::PortId;

/// Result type alias for pktflow operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported by graph construction and the runtime.
///
/// Construction errors are returned eagerly from builder calls and from
/// [`GraphBuilder::start`](crate::GraphBuilder::start). After `start` has
/// spawned the stages, only counted drops and fatal aborts exist; fatal
/// conditions are logged and terminate the process from the failing stage
/// thread.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0} flows are left open at the end of configuration")]
    OpenFlows(usize),

    #[error("requested port {0} exceeds the number of available ports ({1})")]
    PortOutOfRange(PortId, usize),

    #[error("port {0} was previously configured as {1} and can't be used as {2}")]
    PortModeConflict(PortId, &'static str, &'static str),

    #[error("queue {queue} on port {port} is {reason}")]
    PortQueue {
        port: PortId,
        queue: crate::port::QueueId,
        reason: &'static str,
    },

    #[error("port {0} has no receive and no send queues")]
    PortUnused(PortId),

    #[error("callback argument doesn't match any applicable prototype for {0}")]
    CallbackShape(&'static str),

    #[error("partitioner constants must be positive")]
    InvalidPartition,

    #[error("splitter needs at least one output flow")]
    InvalidSplitCount,

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("not enough CPU cores to start stage '{0}'")]
    OutOfCores(String),

    #[error("mempool '{0}' is exhausted")]
    MempoolExhausted(String),

    #[error("'{path}' is not a pcap file: {reason}")]
    PcapFormat { path: String, reason: &'static str },

    #[error("pcap record of {0} bytes doesn't fit into a packet buffer")]
    PacketTooLarge(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
