// Unclonable stage loops.
//
// Each stage runs forever on its pinned core, checking its stop channel once
// per iteration; only stop = -1 is meaningful here (unclonable stages are
// never paused or retired).

use std::fs::File;
use std::io::{BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, TryRecvError};

use crate::error::Result;
use crate::graph::callbacks::GenerateFn;
use crate::mempool::Mempool;
use crate::pcap::{self, Clock, PcapGlobalHeader, GLOBAL_HEADER_LEN};
use crate::port::{PortDriver, PortId, QueueId};
use crate::ring::{Burst, Ring, MAX_BURST_SIZE};
use crate::scheduler::stats::SchedulerStats;
use crate::stop::{safe_enqueue, StopRing};

/// Environment shared by every unclonable stage loop.
#[derive(Clone)]
pub(crate) struct WorkerEnv {
    pub burst_size: usize,
    pub stop: Arc<StopRing>,
    pub stats: Arc<SchedulerStats>,
}

/// True when the stage should terminate.
#[inline]
fn stop_requested(stop_rx: &Receiver<i32>) -> bool {
    matches!(stop_rx.try_recv(), Ok(-1) | Err(TryRecvError::Disconnected))
}

pub(crate) fn receive_loop(
    driver: Arc<dyn PortDriver>,
    port: PortId,
    queue: QueueId,
    out: Arc<Ring>,
    env: WorkerEnv,
    stop_rx: Receiver<i32>,
) -> Result<()> {
    let mut bufs = Burst::new();
    loop {
        if stop_requested(&stop_rx) {
            return Ok(());
        }
        bufs.clear();
        let n = driver.rx_burst(port, queue, &mut bufs, env.burst_size);
        if n == 0 {
            std::hint::spin_loop();
            continue;
        }
        // NIC-owned metadata is stale; clear the cached header offsets.
        for &b in &bufs {
            unsafe { b.as_mut() }.reset_headers();
        }
        safe_enqueue(&out, &env.stop, &env.stats, &bufs);
    }
}

pub(crate) fn generate_one_loop(
    f: GenerateFn,
    out: Arc<Ring>,
    pool: Arc<Mempool>,
    env: WorkerEnv,
    stop_rx: Receiver<i32>,
) -> Result<()> {
    let mut bufs = Burst::new();
    loop {
        if stop_requested(&stop_rx) {
            return Ok(());
        }
        bufs.clear();
        pool.allocate_bulk(&mut bufs, 1)?;
        f(unsafe { bufs[0].as_mut() }, None);
        safe_enqueue(&out, &env.stop, &env.stats, &bufs);
    }
}

pub(crate) fn send_loop(
    driver: Arc<dyn PortDriver>,
    port: PortId,
    queue: QueueId,
    input: Arc<Ring>,
    env: WorkerEnv,
    stop_rx: Receiver<i32>,
) -> Result<()> {
    let mut bufs = Burst::new();
    loop {
        if stop_requested(&stop_rx) {
            return Ok(());
        }
        bufs.clear();
        let n = input.dequeue_burst(&mut bufs, env.burst_size);
        if n == 0 {
            std::hint::spin_loop();
            continue;
        }
        let sent = driver.tx_burst(port, queue, &bufs);
        // Transmitted buffers are the driver's to free; unsent go back now.
        if sent < n {
            env.stop.direct_stop(&bufs[sent..]);
        }
    }
}

pub(crate) struct PartitionState {
    n: u64,
    m: u64,
    counter: u64,
    first_side: bool,
}

impl PartitionState {
    pub(crate) fn new(n: u64, m: u64) -> PartitionState {
        PartitionState {
            n,
            m,
            counter: 0,
            first_side: true,
        }
    }

    /// Advance the machine by one packet; returns whether that packet goes
    /// to the first side.
    #[inline]
    pub(crate) fn advance(&mut self) -> bool {
        let side = self.first_side;
        self.counter += 1;
        let bound = if side { self.n } else { self.m };
        if self.counter == bound {
            self.first_side = !side;
            self.counter = 0;
        }
        side
    }
}

pub(crate) fn partition_loop(
    input: Arc<Ring>,
    out_first: Arc<Ring>,
    out_second: Arc<Ring>,
    n: u64,
    m: u64,
    env: WorkerEnv,
    stop_rx: Receiver<i32>,
) -> Result<()> {
    let mut state = PartitionState::new(n, m);
    let mut bufs = Burst::new();
    let mut first = Burst::new();
    let mut second = Burst::new();
    loop {
        if stop_requested(&stop_rx) {
            return Ok(());
        }
        bufs.clear();
        let count = input.dequeue_burst(&mut bufs, env.burst_size);
        if count == 0 {
            std::hint::spin_loop();
            continue;
        }
        first.clear();
        second.clear();
        for &b in &bufs {
            if state.advance() {
                first.push(b);
            } else {
                second.push(b);
            }
        }
        if !first.is_empty() {
            safe_enqueue(&out_first, &env.stop, &env.stats, &first);
        }
        if !second.is_empty() {
            safe_enqueue(&out_second, &env.stop, &env.stats, &second);
        }
    }
}

pub(crate) fn write_loop(
    path: &Path,
    input: Arc<Ring>,
    clock: Arc<dyn Clock>,
    env: WorkerEnv,
    stop_rx: Receiver<i32>,
) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    PcapGlobalHeader::default().write_to(&mut writer)?;
    writer.flush()?;
    let mut bufs = Burst::new();
    loop {
        if stop_requested(&stop_rx) {
            writer.flush()?;
            return Ok(());
        }
        bufs.clear();
        let n = input.dequeue_burst(&mut bufs, env.burst_size);
        if n == 0 {
            std::hint::spin_loop();
            continue;
        }
        for &b in &bufs {
            pcap::write_record(&mut writer, &*clock, unsafe { b.as_ref() }.data())?;
        }
        writer.flush()?;
        // Serialized buffers leave the graph through the stop path.
        env.stop.release(&bufs);
    }
}

pub(crate) fn read_loop(
    path: &Path,
    repcount: i32,
    out: Arc<Ring>,
    pool: Arc<Mempool>,
    env: WorkerEnv,
    stop_rx: Receiver<i32>,
) -> Result<()> {
    let path_str = path.display().to_string();
    let mut reader = BufReader::new(File::open(path)?);
    PcapGlobalHeader::read_from(&mut reader, &path_str)?;
    let mut completed: i32 = 0;
    let mut bufs = Burst::new();
    if repcount != 0 {
        'replay: loop {
            if stop_requested(&stop_rx) {
                return Ok(());
            }
            bufs.clear();
            pool.allocate_bulk(&mut bufs, 1)?;
            let handle = bufs[0];
            if pcap::read_record(&mut reader, unsafe { handle.as_mut() })? {
                completed += 1;
                if repcount > 0 && completed == repcount {
                    pool.free_bulk(&bufs);
                    break 'replay;
                }
                reader.seek(SeekFrom::Start(GLOBAL_HEADER_LEN as u64))?;
                if pcap::read_record(&mut reader, unsafe { handle.as_mut() })? {
                    // The capture has no records at all.
                    pool.free_bulk(&bufs);
                    break 'replay;
                }
            }
            safe_enqueue(&out, &env.stop, &env.stats, &bufs);
        }
    }
    // Replay finished; hold the core until shutdown.
    loop {
        match stop_rx.recv() {
            Ok(-1) | Err(_) => return Ok(()),
            Ok(_) => {}
        }
    }
}

pub(crate) fn stop_drain_loop(
    stop: Arc<StopRing>,
    burst_size: usize,
    stop_rx: Receiver<i32>,
) -> Result<()> {
    let mut scratch = Burst::new();
    loop {
        if stop_requested(&stop_rx) {
            return Ok(());
        }
        if stop.drain_burst(&mut scratch, burst_size.min(MAX_BURST_SIZE)) == 0 {
            // Keep the shared scheduler core breathable when idle.
            std::thread::sleep(Duration::from_micros(20));
        }
    }
}
