#![allow(dead_code)]

// Shared helpers for the integration suites.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use pktflow::pcap::{write_record, PcapGlobalHeader, PcapRecordHeader};
use pktflow::FixedClock;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Tagged test payload: a little-endian u32 tag padded to 60 bytes.
pub fn tagged_payload(tag: u32) -> Vec<u8> {
    let mut payload = vec![0u8; 60];
    payload[0..4].copy_from_slice(&tag.to_le_bytes());
    payload
}

pub fn payload_tag(payload: &[u8]) -> u32 {
    u32::from_le_bytes(payload[0..4].try_into().unwrap())
}

/// Write a pcap fixture with the given payloads.
pub fn write_input_pcap(path: &Path, payloads: impl IntoIterator<Item = Vec<u8>>) {
    let clock = FixedClock { sec: 0, usec: 0 };
    let mut writer = BufWriter::new(File::create(path).unwrap());
    PcapGlobalHeader::default().write_to(&mut writer).unwrap();
    for payload in payloads {
        write_record(&mut writer, &clock, &payload).unwrap();
    }
    writer.flush().unwrap();
}

/// Read every complete record of a pcap file. Only call once the writer has
/// stopped; use [`record_count`] while the graph is still running.
pub fn read_records(path: &Path) -> Vec<(PcapRecordHeader, Vec<u8>)> {
    let mut reader = BufReader::new(File::open(path).unwrap());
    PcapGlobalHeader::read_from(&mut reader, &path.display().to_string()).unwrap();
    let mut records = Vec::new();
    while let Some(header) = PcapRecordHeader::read_from(&mut reader).unwrap() {
        let mut payload = vec![0u8; header.incl_len as usize];
        reader.read_exact(&mut payload).unwrap();
        records.push((header, payload));
    }
    records
}

pub fn read_payloads(path: &Path) -> Vec<Vec<u8>> {
    read_records(path).into_iter().map(|(_, p)| p).collect()
}

/// Count the complete records currently in a pcap file, tolerating a
/// partially written tail.
pub fn record_count(path: &Path) -> usize {
    let Ok(file) = File::open(path) else { return 0 };
    let mut reader = BufReader::new(file);
    let mut header = [0u8; 24];
    if reader.read_exact(&mut header).is_err() {
        return 0;
    }
    let mut count = 0;
    loop {
        let mut record = [0u8; 16];
        if reader.read_exact(&mut record).is_err() {
            return count;
        }
        let incl_len = u32::from_le_bytes(record[8..12].try_into().unwrap()) as usize;
        let mut payload = vec![0u8; incl_len];
        if reader.read_exact(&mut payload).is_err() {
            return count;
        }
        count += 1;
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}
