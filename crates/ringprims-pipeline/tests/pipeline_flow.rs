use std::thread;
use std::time::{Duration, Instant};

use ringprims_attr::{encode_words, DATA_START, NOTIFY_DATA_START, VARIABLE_RECORD_SIZE};
use ringprims_pipeline::{
    HostPeer, OpKind, PipelineError, PipelineSet, PipelineSetConfig, RecordEvent, StreamConfig,
    TransformConfig, UnitSize,
};
use ringprims_ring::{OpenFlags, RingRegistry, Role};

fn stream(name: &str, size: usize) -> StreamConfig {
    let mut config = StreamConfig::named(name, size);
    config.poll_interval_ms = 20;
    config.drain_timeout_ms = 100;
    config
}

fn set_of(streams: Vec<StreamConfig>) -> PipelineSetConfig {
    PipelineSetConfig { streams }
}

fn pattern(seed: u8, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| seed.wrapping_add((i % 97) as u8))
        .collect()
}

fn scaled(data: &[u8], factor: u8) -> Vec<u8> {
    data.iter().map(|b| b.wrapping_mul(factor)).collect()
}

#[test]
fn record_round_trip_is_transformed() {
    let registry = RingRegistry::new();
    let config = stream("roundtrip", 512);
    let set = PipelineSet::spawn(&set_of(vec![config.clone()]), &registry).unwrap();
    let mut host = HostPeer::attach(&registry, &config).unwrap();

    let record = pattern(3, 512);
    host.send_record(&record).unwrap();
    let received = host.recv_record().unwrap();
    assert_eq!(received.data.as_ref(), scaled(&record, 2).as_slice());

    host.request_shutdown().unwrap();
    let reports = set.join();
    host.close().unwrap();

    assert_eq!(reports.len(), 1);
    let stats = reports[0].outcome.as_ref().unwrap();
    assert_eq!(stats.cycles, 1);
    assert_eq!(stats.bytes_received, 512);
    assert_eq!(stats.bytes_sent, 512);
    assert!(stats.remote_shutdown);
    assert!(!registry.contains("roundtrip.out"));
    assert!(!registry.contains("roundtrip.in"));
}

#[test]
fn attributes_arrive_in_protocol_order() {
    let registry = RingRegistry::new();
    let config = stream("ordering", 256);
    let set = PipelineSet::spawn(&set_of(vec![config.clone()]), &registry).unwrap();
    let mut host = HostPeer::attach(&registry, &config).unwrap();

    for seed in 0..3u8 {
        host.send_record(&pattern(seed, 256)).unwrap();
        let received = host.recv_record().unwrap();
        assert_eq!(
            received.events,
            vec![
                RecordEvent::DataStart,
                RecordEvent::RecordSize(256),
                RecordEvent::Data(256),
                RecordEvent::DataEnd,
            ]
        );
    }

    host.request_shutdown().unwrap();
    let reports = set.join();
    host.close().unwrap();
    assert_eq!(reports[0].outcome.as_ref().unwrap().cycles, 3);
}

#[test]
fn small_grants_produce_the_same_record() {
    let registry = RingRegistry::new();
    let config = stream("grants", 500);
    let set = PipelineSet::spawn(&set_of(vec![config.clone()]), &registry).unwrap();
    let mut host = HostPeer::attach(&registry, &config).unwrap();

    let record = pattern(11, 500);
    host.send_record_in_grants(&record, 100).unwrap();
    let fragmented = host.recv_record().unwrap();
    host.send_record_in_grants(&record, 500).unwrap();
    let whole = host.recv_record().unwrap();

    assert_eq!(fragmented.data, whole.data);
    assert_eq!(whole.data.as_ref(), scaled(&record, 2).as_slice());

    host.request_shutdown().unwrap();
    set.join();
    host.close().unwrap();
}

#[test]
fn overshooting_grant_is_cancelled() {
    let registry = RingRegistry::new();
    let mut config = stream("cancel", 1024);
    config.record_size = 1000;
    config.send_size = 1000;
    config.chunk_size = 300;
    config.foot_size = 299;
    let set = PipelineSet::spawn(&set_of(vec![config.clone()]), &registry).unwrap();
    let mut host = HostPeer::attach(&registry, &config).unwrap();

    for seed in [5u8, 6] {
        let record = pattern(seed, 1000);
        host.send_record(&record).unwrap();
        let received = host.recv_record().unwrap();
        assert_eq!(received.data.len(), 1000);
        assert_eq!(received.data.as_ref(), scaled(&record, 2).as_slice());
        assert_eq!(received.events.first(), Some(&RecordEvent::DataStart));
        assert_eq!(received.events.last(), Some(&RecordEvent::DataEnd));
    }

    host.request_shutdown().unwrap();
    let reports = set.join();
    host.close().unwrap();
    let stats = reports[0].outcome.as_ref().unwrap();
    assert_eq!(stats.bytes_sent, 2000);
    assert_eq!(stats.bytes_cancelled, 400);
}

#[test]
fn concurrent_sets_do_not_mix_records() {
    let registry = RingRegistry::new();
    let mut left = stream("left", 512);
    left.transform = TransformConfig {
        op: OpKind::Multiply,
        factor: 3,
        unit: UnitSize::Byte,
    };
    let right = stream("right", 1024);

    let left_set = PipelineSet::spawn(&set_of(vec![left.clone()]), &registry).unwrap();
    let right_set = PipelineSet::spawn(&set_of(vec![right.clone()]), &registry).unwrap();

    let drive = |config: StreamConfig, seed: u8, factor: u8| {
        let registry = registry.clone();
        thread::spawn(move || {
            let mut host = HostPeer::attach(&registry, &config).unwrap();
            for round in 0..5u8 {
                let record = pattern(seed.wrapping_add(round), config.record_size);
                host.send_record(&record).unwrap();
                let received = host.recv_record().unwrap();
                assert_eq!(received.data.as_ref(), scaled(&record, factor).as_slice());
            }
            host.request_shutdown().unwrap();
            host
        })
    };
    let left_host = drive(left, 0x10, 3);
    let right_host = drive(right, 0x80, 2);

    let left_host = left_host.join().unwrap();
    let right_host = right_host.join().unwrap();
    let left_reports = left_set.join();
    let right_reports = right_set.join();
    left_host.close().unwrap();
    right_host.close().unwrap();

    assert_eq!(left_reports[0].outcome.as_ref().unwrap().cycles, 5);
    assert_eq!(right_reports[0].outcome.as_ref().unwrap().cycles, 5);
}

#[test]
fn shutdown_while_awaiting_start() {
    let registry = RingRegistry::new();
    let config = stream("idle", 256);
    let set = PipelineSet::spawn(&set_of(vec![config.clone()]), &registry).unwrap();
    let host = HostPeer::attach(&registry, &config).unwrap();

    thread::sleep(Duration::from_millis(50));
    let started = Instant::now();
    set.shutdown();
    let reports = set.join();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(reports[0].is_ok());
    assert!(!registry.contains("idle.out"));
    host.close().unwrap();
}

#[test]
fn shutdown_while_inbound_ring_missing() {
    let registry = RingRegistry::new();
    let set = PipelineSet::spawn(&set_of(vec![stream("orphan", 256)]), &registry).unwrap();

    thread::sleep(Duration::from_millis(50));
    let started = Instant::now();
    set.shutdown();
    let reports = set.join();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(reports[0].outcome.as_ref().unwrap().cycles, 0);
    assert!(registry.names().is_empty());
}

#[test]
fn shutdown_while_receiving_record() {
    let registry = RingRegistry::new();
    let config = stream("midrecord", 512);
    let set = PipelineSet::spawn(&set_of(vec![config.clone()]), &registry).unwrap();

    // DataStart and the first 100 bytes of a 512 byte record, then silence.
    registry.create(&config.inbound, config.inbound_attrs()).unwrap();
    let mut raw = registry
        .open(&config.inbound, Role::Writer, OpenFlags::CACHE_COHERENT)
        .unwrap();
    raw.set_attribute(DATA_START, 0).unwrap();
    let grant = raw.acquire(100).unwrap();
    assert_eq!(grant.len, 100);
    raw.with_grant_mut(|buf| buf.fill(7)).unwrap();
    raw.release(100).unwrap();
    let _ = raw.send_notify(NOTIFY_DATA_START);
    thread::sleep(Duration::from_millis(100));

    let started = Instant::now();
    set.shutdown();
    let reports = set.join();
    assert!(started.elapsed() < Duration::from_secs(2));

    let stats = reports[0].outcome.as_ref().unwrap();
    assert_eq!(stats.bytes_received, 100);
    assert_eq!(stats.records_received, 0);
    assert_eq!(stats.cycles, 0);
    assert!(!stats.remote_shutdown);
    assert!(!registry.contains("midrecord.out"));

    assert!(!raw.peer_attached());
    drop(raw);
    registry.delete(&config.inbound).unwrap();
}

#[test]
fn shutdown_while_outbound_full() {
    let registry = RingRegistry::new();
    let mut config = stream("blocked", 1024);
    config.send_size = 2048;
    config.chunk_size = 512;
    config.drain_timeout_ms = 50;
    let set = PipelineSet::spawn(&set_of(vec![config.clone()]), &registry).unwrap();
    let mut host = HostPeer::attach(&registry, &config).unwrap();

    // Nobody reads the outbound ring, so the pipeline stalls half way through the send.
    host.send_record(&pattern(1, 1024)).unwrap();
    thread::sleep(Duration::from_millis(100));

    let started = Instant::now();
    set.shutdown();
    let reports = set.join();
    assert!(started.elapsed() < Duration::from_secs(2));

    let stats = reports[0].outcome.as_ref().unwrap();
    assert_eq!(stats.cycles, 0);
    assert_eq!(stats.records_received, 1);
    assert!(stats.attr_bytes_abandoned > 0);
    assert!(!registry.contains("blocked.out"));
    host.close().unwrap();
}

#[test]
fn shutdown_attribute_stops_pipeline() {
    let registry = RingRegistry::new();
    let config = stream("inband", 256);
    let set = PipelineSet::spawn(&set_of(vec![config.clone()]), &registry).unwrap();
    let mut host = HostPeer::attach(&registry, &config).unwrap();

    host.send_shutdown_attribute().unwrap();
    // Stops on its own; the set's shutdown signal is never raised.
    let deadline = Instant::now() + Duration::from_secs(2);
    while !set.is_finished() {
        assert!(Instant::now() < deadline, "pipeline did not stop");
        thread::sleep(Duration::from_millis(5));
    }
    assert!(!set.shutdown_signal().is_set());
    let reports = set.join();
    let stats = reports[0].outcome.as_ref().unwrap();
    assert!(stats.remote_shutdown);
    host.close().unwrap();
}

#[test]
fn oversized_size_attribute_fails_only_its_stream() {
    let registry = RingRegistry::new();
    let bad = stream("bad", 256);
    let good = stream("good", 256);
    let set = PipelineSet::spawn(&set_of(vec![bad.clone(), good.clone()]), &registry).unwrap();

    // Raw writer that sends a two-word size attribute to a one-word buffer.
    registry.create(&bad.inbound, bad.inbound_attrs()).unwrap();
    let mut raw = registry
        .open(&bad.inbound, Role::Writer, OpenFlags::CACHE_COHERENT)
        .unwrap();
    raw.set_attribute(DATA_START, 0).unwrap();
    raw.set_vattribute(VARIABLE_RECORD_SIZE, 0, encode_words(&[256, 1]))
        .unwrap();
    // The pipeline also picks up queued markers without the notification.
    let _ = raw.send_notify(NOTIFY_DATA_START);

    let mut host = HostPeer::attach(&registry, &good).unwrap();
    let record = pattern(9, 256);
    host.send_record(&record).unwrap();
    assert_eq!(
        host.recv_record().unwrap().data.as_ref(),
        scaled(&record, 2).as_slice()
    );
    host.request_shutdown().unwrap();

    let reports = set.join();
    host.close().unwrap();
    drop(raw);

    assert_eq!(reports[0].name, "bad");
    assert!(matches!(reports[0].outcome, Err(PipelineError::Attr(_))));
    assert_eq!(reports[0].code(), 20);
    assert_eq!(reports[1].name, "good");
    assert_eq!(reports[1].code(), 0);
}
