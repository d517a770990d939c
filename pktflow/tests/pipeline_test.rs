// End-to-end graph topologies driven by pcap replay.
//
// Every scenario feeds a bounded packet sequence from a fixture file, so
// with rings larger than the sequence nothing is ever shed and the outputs
// are exact.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use pktflow::{
    Config, FixedClock, GraphBuilder, Mbuf, SeparateCallback, UserContext,
};

use common::*;

fn pipeline_config(cpu_cores: usize) -> Config {
    Config {
        cpu_cores,
        disable_scheduler: true,
        mempool_size: 8192,
        schedule_period_ms: 20,
        check_period_ms: 40,
        debug_period_ms: 50,
        ..Config::default()
    }
}

fn fixed_clock() -> Arc<FixedClock> {
    Arc::new(FixedClock { sec: 7, usec: 77 })
}

fn is_even_tag(pkt: &Mbuf, _ctx: Option<&mut (dyn UserContext + '_)>) -> bool {
    payload_tag(pkt.data()) & 1 == 0
}

#[test]
#[serial_test::serial]
fn test_tee_via_separate() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.pcap");
    let even = dir.path().join("even.pcap");
    let odd = dir.path().join("odd.pcap");
    const COUNT: u32 = 4000;
    write_input_pcap(&input, (0..COUNT).map(tagged_payload));

    let mut graph = GraphBuilder::new(pipeline_config(6)).unwrap();
    let shutdown = graph.shutdown_handle();
    let mut flow = graph.set_reader(&input, 1);
    let odd_flow = graph.set_separator(&mut flow, SeparateCallback::Scalar(is_even_tag), None);
    graph.set_writer_with_clock(flow, &even, fixed_clock());
    graph.set_writer_with_clock(odd_flow, &odd, fixed_clock());

    let runner = thread::spawn(move || graph.start());
    assert!(
        wait_until(Duration::from_secs(30), || {
            record_count(&even) + record_count(&odd) >= COUNT as usize
        }),
        "tee didn't deliver all packets in time"
    );
    shutdown.shutdown();
    runner.join().unwrap().unwrap();

    let even_tags: Vec<u32> = read_payloads(&even).iter().map(|p| payload_tag(p)).collect();
    let odd_tags: Vec<u32> = read_payloads(&odd).iter().map(|p| payload_tag(p)).collect();
    assert_eq!(even_tags.len() + odd_tags.len(), COUNT as usize);
    assert_eq!(even_tags, (0..COUNT).step_by(2).collect::<Vec<u32>>());
    assert_eq!(odd_tags, (1..COUNT).step_by(2).collect::<Vec<u32>>());
}

#[test]
#[serial_test::serial]
fn test_partition_one_one_alternation() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.pcap");
    let a = dir.path().join("a.pcap");
    let b = dir.path().join("b.pcap");
    const COUNT: u32 = 1000;
    write_input_pcap(&input, (0..COUNT).map(tagged_payload));

    let mut graph = GraphBuilder::new(pipeline_config(6)).unwrap();
    let shutdown = graph.shutdown_handle();
    let mut flow = graph.set_reader(&input, 1);
    let second = graph.set_partitioner(&mut flow, 1, 1).unwrap();
    graph.set_writer_with_clock(flow, &a, fixed_clock());
    graph.set_writer_with_clock(second, &b, fixed_clock());

    let runner = thread::spawn(move || graph.start());
    assert!(
        wait_until(Duration::from_secs(30), || {
            record_count(&a) + record_count(&b) >= COUNT as usize
        }),
        "partitioner didn't deliver all packets in time"
    );
    shutdown.shutdown();
    runner.join().unwrap().unwrap();

    let a_tags: Vec<u32> = read_payloads(&a).iter().map(|p| payload_tag(p)).collect();
    let b_tags: Vec<u32> = read_payloads(&b).iter().map(|p| payload_tag(p)).collect();
    assert_eq!(a_tags, (0..COUNT).step_by(2).collect::<Vec<u32>>());
    assert_eq!(b_tags, (1..COUNT).step_by(2).collect::<Vec<u32>>());
}

#[test]
#[serial_test::serial]
fn test_merge_combines_three_sources() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("merged.pcap");
    const PER_SOURCE: usize = 100;
    let magics: [u8; 3] = [0xA1, 0xB2, 0xC3];

    let mut graph = GraphBuilder::new(pipeline_config(7)).unwrap();
    let shutdown = graph.shutdown_handle();
    let mut flows = Vec::new();
    for (i, &magic) in magics.iter().enumerate() {
        let input = dir.path().join(format!("source-{i}.pcap"));
        write_input_pcap(&input, (0..PER_SOURCE).map(|_| vec![magic; 60]));
        flows.push(graph.set_reader(&input, 1));
    }
    let merged = graph.set_merger(flows);
    graph.set_writer_with_clock(merged, &out, fixed_clock());

    let runner = thread::spawn(move || graph.start());
    assert!(
        wait_until(Duration::from_secs(30), || {
            record_count(&out) >= PER_SOURCE * magics.len()
        }),
        "merger didn't deliver all packets in time"
    );
    shutdown.shutdown();
    runner.join().unwrap().unwrap();

    let payloads = read_payloads(&out);
    assert_eq!(payloads.len(), PER_SOURCE * magics.len());
    for &magic in &magics {
        let count = payloads.iter().filter(|p| p[0] == magic).count();
        assert_eq!(count, PER_SOURCE, "magic {magic:#X} count");
    }
    assert!(payloads.iter().all(|p| magics.contains(&p[0])));
}

#[test]
#[serial_test::serial]
fn test_infinite_replay_wraps_around() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.pcap");
    let out = dir.path().join("looped.pcap");
    const COUNT: u32 = 50;
    write_input_pcap(&input, (0..COUNT).map(tagged_payload));

    // Small rings: the endless reader overruns the writer, so buffers are
    // shed to the stop ring and must recycle through the drain.
    let config = Config {
        ring_size_multiplier: 8,
        mempool_size: 2048,
        ..pipeline_config(4)
    };
    let mut graph = GraphBuilder::new(config).unwrap();
    let shutdown = graph.shutdown_handle();
    let stats = graph.stats();
    let flow = graph.set_reader(&input, -1);
    graph.set_writer_with_clock(flow, &out, fixed_clock());

    let runner = thread::spawn(move || graph.start());
    assert!(
        wait_until(Duration::from_secs(30), || record_count(&out) >= 4 * COUNT as usize),
        "infinite replay never wrapped past the input"
    );
    shutdown.shutdown();
    runner.join().unwrap().unwrap();

    // Overruns are shed, never blocked on, so only membership is exact.
    let payloads = read_payloads(&out);
    assert!(payloads.len() >= 4 * COUNT as usize);
    assert!(payloads.iter().all(|p| payload_tag(p) < COUNT));
    assert!(stats.freed() > 0, "writer releases buffers through the stop path");
}

#[test]
#[serial_test::serial]
fn test_pcap_replay_three_times() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.pcap");
    let out = dir.path().join("replayed.pcap");
    const COUNT: u32 = 100;
    write_input_pcap(&input, (0..COUNT).map(tagged_payload));

    let mut graph = GraphBuilder::new(pipeline_config(4)).unwrap();
    let shutdown = graph.shutdown_handle();
    let flow = graph.set_reader(&input, 3);
    graph.set_writer_with_clock(flow, &out, fixed_clock());

    let runner = thread::spawn(move || graph.start());
    assert!(
        wait_until(Duration::from_secs(30), || {
            record_count(&out) >= 3 * COUNT as usize
        }),
        "replay didn't deliver all packets in time"
    );
    shutdown.shutdown();
    runner.join().unwrap().unwrap();

    let records = read_records(&out);
    assert_eq!(records.len(), 3 * COUNT as usize);
    for (i, (header, payload)) in records.iter().enumerate() {
        assert_eq!(payload_tag(payload), i as u32 % COUNT, "record {i}");
        // The write stage was seeded with a fixed clock.
        assert_eq!((header.ts_sec, header.ts_usec), (7, 77));
        assert_eq!(header.incl_len, 60);
        assert_eq!(header.orig_len, 60);
    }
}
