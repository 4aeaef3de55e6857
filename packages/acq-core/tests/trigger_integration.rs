use acq_core::clock;
use acq_core::trigger::{
    policy_for, Destination, MemoryWriterFactory, NiStream, ProbeStream, StreamSet, TriggerConfig,
    TriggerController, TriggerMode, TtlMode, TtlParams, TtlSource,
};
use acq_core::{LinearAdc, ProbeConfig, ProbeLayout, StreamBuffer, StreamConfig};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn ni_stream(n_chans: usize, n_analog: usize, srate: f64) -> NiStream {
    let config = StreamConfig {
        sample_rate: srate,
        n_neural: 0,
        n_analog,
        n_chans,
        capacity_secs: 10.0,
        sync: None,
    };
    let buffer = Arc::new(StreamBuffer::new(srate, n_chans, config.capacity_secs));
    NiStream { config, buffer }
}

/// Digital word with bit 0 high for 20 scans every 200, starting at 100.
fn pulse_block(from_ct: u64, n: u64) -> Vec<i16> {
    (from_ct..from_ct + n)
        .flat_map(|ct| {
            let hi = ct >= 100 && (ct - 100) % 200 < 20;
            [ct as i16, i16::from(hi)]
        })
        .collect()
}

#[test]
fn test_threaded_ttl_run() {
    init_logging();
    let ni = ni_stream(2, 1, 1000.0);
    let buffer = Arc::clone(&ni.buffer);
    let streams = StreamSet {
        ni: Some(ni),
        probes: Vec::new(),
    };

    let mode = TriggerMode::Ttl(TtlParams {
        source: TtlSource::Digital { chan: 1, bit: 0 },
        mode: TtlMode::Timed,
        inarow: 2,
        margin_secs: 0.01,
        t_h: 0.05,
        refractory_secs: 0.0,
        n_max: None,
    });
    let config = TriggerConfig {
        loop_period_ms: 2,
        mode: mode.clone(),
        run_name: "ttl".to_string(),
        ..Default::default()
    };

    let factory = MemoryWriterFactory::new();
    let mut policy = policy_for(&mode, &streams, &LinearAdc::default()).unwrap();
    let ctl = Arc::new(TriggerController::new(config, streams, Arc::new(factory.clone())).unwrap());
    let finished = ctl.finished();

    let runner = {
        let ctl = Arc::clone(&ctl);
        thread::spawn(move || ctl.run(policy.as_mut()))
    };

    buffer.set_tzero(clock::now_secs());
    ctl.set_gate(true);

    // 1000 scans in 50-scan blocks, roughly at the stream rate
    let producer = {
        let buffer = Arc::clone(&buffer);
        thread::spawn(move || {
            for i in 0..20u64 {
                buffer.enqueue(&pulse_block(i * 50, 50), 50);
                thread::sleep(Duration::from_millis(5));
            }
        })
    };
    producer.join().unwrap();

    thread::sleep(Duration::from_millis(150));
    ctl.stop();

    let summary = finished.recv_timeout(Duration::from_secs(5)).unwrap();
    let returned = runner.join().unwrap();
    assert_eq!(returned.segments.len(), summary.segments.len());

    assert_eq!(summary.run_name, "ttl");
    assert_eq!(summary.gates, 1);
    assert_eq!(summary.segments.len(), 5);
    assert!(summary.segments.iter().all(|s| s.persisted && s.scans == 60));
    assert!(ctl.all_files_closed());

    let segs = factory.segments();
    for (k, seg) in segs.iter().enumerate() {
        let edge = 100 + 200 * k as i16;
        assert!(seg.closed);
        assert_eq!(seg.stem, format!("ttl_g0_t{}.nidq", k));
        assert_eq!(seg.data.len(), 60 * 2);
        assert_eq!(seg.data[0], edge - 10);
    }
}

#[test]
fn test_stop_without_gate_writes_nothing() {
    init_logging();
    let streams = StreamSet {
        ni: Some(ni_stream(1, 1, 1000.0)),
        probes: Vec::new(),
    };
    let config = TriggerConfig {
        loop_period_ms: 1,
        ..Default::default()
    };

    let factory = MemoryWriterFactory::new();
    let mut policy = policy_for(&config.mode, &streams, &LinearAdc::default()).unwrap();
    let ctl = Arc::new(TriggerController::new(config, streams, Arc::new(factory.clone())).unwrap());
    let finished = ctl.finished();

    let runner = {
        let ctl = Arc::clone(&ctl);
        thread::spawn(move || ctl.run(policy.as_mut()))
    };

    thread::sleep(Duration::from_millis(20));
    ctl.stop();
    runner.join().unwrap();

    let summary = finished.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(summary.gates, 0);
    assert!(summary.segments.is_empty());
    assert!(factory.segments().is_empty());
}

#[test]
fn test_segment_spans_ni_and_probe() {
    let ni = ni_stream(1, 1, 1000.0);
    let probe = ProbeStream {
        config: ProbeConfig {
            enabled: true,
            sample_rate: 12_000.0,
            layout: ProbeLayout {
                n_ap: 1,
                n_lf: 1,
                n_sy: 1,
            },
            capacity_secs: 1.0,
            sync: None,
        },
        buffer: Arc::new(StreamBuffer::with_capacity_scans(12_000.0, 3, 12_000)),
    };

    ni.buffer.set_tzero(100.0);
    probe.buffer.set_tzero(100.0);

    let ni_data: Vec<i16> = (0..300).collect();
    ni.buffer.enqueue(&ni_data, 300);
    let probe_data: Vec<i16> = (0..3000u64)
        .flat_map(|ct| [(ct % 10_000) as i16, -((ct % 10_000) as i16), 1])
        .collect();
    probe.buffer.enqueue(&probe_data, 3000);

    let streams = StreamSet {
        ni: Some(ni),
        probes: vec![probe],
    };
    let factory = MemoryWriterFactory::new();
    let ctl = TriggerController::new(TriggerConfig::default(), streams, Arc::new(factory.clone())).unwrap();

    ctl.set_gate(true);
    assert!(ctl.begin_segment(100, Some(160)));
    assert_eq!(ctl.cur_ni_file_start(), None);

    let progress = ctl.flush_segment().unwrap();
    assert!(progress.done);
    assert_eq!(ctl.cur_ni_file_start(), Some(100));
    assert_eq!(ctl.cur_im_file_start(0), Some(1200));
    assert_eq!(ctl.scan_count(Destination::ProbeAp(0)), 720);
    assert_eq!(ctl.scan_count(Destination::ProbeLf(0)), 60);
    ctl.end_trig();

    let segs = factory.segments();
    let by_dst = |dst: Destination| segs.iter().find(|s| s.dst == Some(dst)).unwrap();

    let ni_seg = by_dst(Destination::Ni);
    assert_eq!(ni_seg.data, (100..160).collect::<Vec<i16>>());

    // AP file keeps AP and SY words of every scan
    let ap = by_dst(Destination::ProbeAp(0));
    assert_eq!(ap.data.len(), 720 * 2);
    assert_eq!(&ap.data[..4], &[1200, 1, 1201, 1]);

    // LF file keeps LF and SY words of every 12th scan
    let lf = by_dst(Destination::ProbeLf(0));
    assert_eq!(lf.data.len(), 60 * 2);
    assert_eq!(&lf.data[..4], &[-1200, 1, -1212, 1]);
    assert_eq!(lf.metadata.get("sampleRate").map(String::as_str), Some("1000"));
}
