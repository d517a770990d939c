// NIC ports.
//
// The runtime only ever polls and bursts; everything below that line
// (device probing, queue descriptors, offload negotiation) lives behind the
// `PortDriver` seam. The builder-side port table tracks how each port's
// queues are claimed and enforces the auto/manual configuration split.

use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

use crate::mbuf::MbufPtr;
use crate::mempool::Mempool;
use crate::ring::{Burst, MAX_BURST_SIZE};

/// NIC port identifier.
pub type PortId = u16;

/// RX/TX queue identifier within a port.
pub type QueueId = u16;

/// The seam between the graph runtime and a NIC driver.
///
/// Receive stages poll [`rx_burst`](PortDriver::rx_burst); send stages call
/// [`tx_burst`](PortDriver::tx_burst). Ownership of successfully transmitted
/// buffers passes to the driver, which frees them to their pools once the
/// hardware is done.
pub trait PortDriver: Send + Sync {
    /// Number of ports this driver exposes.
    fn port_count(&self) -> usize;

    /// Default MAC address of a port.
    fn mac_address(&self, port: PortId) -> [u8; 6];

    /// Poll up to `max` packets from `(port, queue)`, appending owned
    /// handles to `out`. Returns the number received.
    fn rx_burst(&self, port: PortId, queue: QueueId, out: &mut Burst, max: usize) -> usize;

    /// Transmit a burst from `(port, queue)`. Returns the number accepted;
    /// accepted handles are owned by the driver, the rest stay with the
    /// caller.
    fn tx_burst(&self, port: PortId, queue: QueueId, bufs: &[MbufPtr]) -> usize;
}

/// Driver used when a graph has no NIC ports at all.
pub(crate) struct NoPortsDriver;

impl PortDriver for NoPortsDriver {
    fn port_count(&self) -> usize {
        0
    }

    fn mac_address(&self, _port: PortId) -> [u8; 6] {
        [0; 6]
    }

    fn rx_burst(&self, _port: PortId, _queue: QueueId, _out: &mut Burst, _max: usize) -> usize {
        0
    }

    fn tx_burst(&self, _port: PortId, _queue: QueueId, _bufs: &[MbufPtr]) -> usize {
        0
    }
}

/// A software driver whose tx side feeds its rx side.
///
/// Every port is one bounded queue shared by all of its rx/tx queues.
/// Packets transmitted (or [injected](LoopbackPortDriver::inject)) on a port
/// come back out of that port's receive burst. Used by the integration
/// suites in place of hardware.
pub struct LoopbackPortDriver {
    ports: Vec<ArrayQueue<MbufPtr>>,
    pool: Arc<Mempool>,
}

impl LoopbackPortDriver {
    /// Create a driver with `ports` ports, each buffering up to `depth`
    /// packets, and a private pool of `pool_size` buffers for injection.
    pub fn new(ports: usize, depth: usize, pool_size: usize) -> Arc<LoopbackPortDriver> {
        Arc::new(LoopbackPortDriver {
            ports: (0..ports).map(|_| ArrayQueue::new(depth)).collect(),
            pool: Mempool::create("loopback", pool_size),
        })
    }

    /// Allocate a buffer from the driver's pool, fill it with `data`, and
    /// queue it on `port` for the next receive burst. Returns `false` when
    /// the port queue or the pool is full.
    pub fn inject(&self, port: PortId, data: &[u8]) -> bool {
        let mut bufs = Burst::new();
        if self.pool.allocate_bulk(&mut bufs, 1).is_err() {
            return false;
        }
        let handle = bufs[0];
        if !unsafe { handle.as_mut() }.copy_from_slice(data) {
            self.pool.free_one(handle);
            return false;
        }
        if self.ports[port as usize].push(handle).is_err() {
            self.pool.free_one(handle);
            return false;
        }
        true
    }

    /// Take up to `max` packets that were transmitted on `port`, copying
    /// their payloads out and freeing the buffers.
    pub fn harvest(&self, port: PortId, max: usize) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        while out.len() < max {
            match self.ports[port as usize].pop() {
                Some(handle) => {
                    out.push(unsafe { handle.as_ref() }.data().to_vec());
                    unsafe { handle.as_ref().pool() }.free_one(handle);
                }
                None => break,
            }
        }
        out
    }
}

impl PortDriver for LoopbackPortDriver {
    fn port_count(&self) -> usize {
        self.ports.len()
    }

    fn mac_address(&self, port: PortId) -> [u8; 6] {
        [0x02, 0x00, 0x00, 0x00, 0x00, port as u8]
    }

    fn rx_burst(&self, port: PortId, _queue: QueueId, out: &mut Burst, max: usize) -> usize {
        let max = max.min(MAX_BURST_SIZE).min(out.capacity() - out.len());
        let mut moved = 0;
        while moved < max {
            match self.ports[port as usize].pop() {
                Some(handle) => {
                    out.push(handle);
                    moved += 1;
                }
                None => break,
            }
        }
        moved
    }

    fn tx_burst(&self, port: PortId, _queue: QueueId, bufs: &[MbufPtr]) -> usize {
        for (sent, &handle) in bufs.iter().enumerate() {
            if self.ports[port as usize].push(handle).is_err() {
                return sent;
            }
        }
        bufs.len()
    }
}

/// Builder-side configuration state of one port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PortMode {
    Inactive,
    Auto,
    Manual,
}

impl PortMode {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            PortMode::Inactive => "inactive",
            PortMode::Auto => "auto",
            PortMode::Manual => "manual",
        }
    }
}

/// Per-port queue bookkeeping, mutated only during construction.
#[derive(Debug)]
pub(crate) struct PortState {
    pub id: PortId,
    pub mode: PortMode,
    pub rx_used: Vec<bool>,
    pub tx_used: Vec<bool>,
}

impl PortState {
    pub(crate) fn inactive(id: PortId) -> PortState {
        PortState {
            id,
            mode: PortMode::Inactive,
            rx_used: Vec::new(),
            tx_used: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_tx_feeds_rx() {
        let driver = LoopbackPortDriver::new(1, 16, 16);
        assert!(driver.inject(0, &[1, 2, 3]));
        assert!(driver.inject(0, &[4, 5]));

        let mut out = Burst::new();
        assert_eq!(driver.rx_burst(0, 0, &mut out, 32), 2);
        assert_eq!(unsafe { out[0].as_ref() }.data(), &[1, 2, 3]);

        assert_eq!(driver.tx_burst(0, 0, &out), 2);
        let harvested = driver.harvest(0, 32);
        assert_eq!(harvested, vec![vec![1, 2, 3], vec![4, 5]]);
    }

    #[test]
    fn test_loopback_tx_reports_overflow() {
        let driver = LoopbackPortDriver::new(1, 2, 16);
        assert!(driver.inject(0, &[0]));
        assert!(driver.inject(0, &[1]));
        assert!(!driver.inject(0, &[2]));
    }
}
