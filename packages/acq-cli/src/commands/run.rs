use acq_core::clock;
use acq_core::trigger::{policy_for, RunSummary, StreamSet, TriggerController};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::cli::RunArgs;
use crate::exit_codes;
use crate::monitor::{spawn_monitor, Monitor, MonitorReport};
use crate::output;
use crate::session::SessionConfig;
use crate::synth::{spawn_producer, Generator};
use crate::writer::BinWriterFactory;

const STATUS_PERIOD_SECS: f64 = 1.0;

#[derive(Debug, Serialize)]
struct StreamCount {
    stream: String,
    sample_rate: f64,
    scans: u64,
}

#[derive(Debug, Serialize)]
struct RunReport {
    started_at: DateTime<Utc>,
    out_dir: PathBuf,
    seconds: f64,
    trigger: &'static str,
    produced: Vec<StreamCount>,
    monitor: Option<MonitorReport>,
    #[serde(flatten)]
    summary: RunSummary,
}

pub fn execute(args: RunArgs) -> i32 {
    let config = match SessionConfig::from_args(&args.session) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return exit_codes::INPUT_ERROR;
        }
    };

    if let Err(e) = std::fs::create_dir_all(&args.out_dir) {
        eprintln!("Error: cannot create output directory {}: {}", args.out_dir.display(), e);
        return exit_codes::INPUT_ERROR;
    }

    if !args.quiet {
        eprintln!(
            "Acquiring for {}s into {}...",
            config.seconds,
            args.out_dir.display()
        );
    }

    let report = match run_session(&config, &args.out_dir) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Acquisition failed: {:#}", e);
            return exit_codes::EXECUTION_ERROR;
        }
    };

    let json = match output::to_json(&report, args.compact) {
        Ok(j) => j,
        Err(e) => {
            eprintln!("Error serializing result: {}", e);
            return exit_codes::EXECUTION_ERROR;
        }
    };
    if let Err(e) = output::write_output(&json, args.output.as_deref()) {
        eprintln!("Error: {}", e);
        return exit_codes::EXECUTION_ERROR;
    }

    let failed = report.summary.segments.iter().filter(|s| !s.persisted).count();
    if !args.quiet {
        eprintln!(
            "{} segments recorded in {} gates",
            report.summary.segments.len(),
            report.summary.gates
        );
        if let Some(ref path) = args.output {
            eprintln!("Summary written to {}", path);
        }
    }

    if failed > 0 {
        eprintln!("Warning: {} segments were not persisted", failed);
        return exit_codes::PARTIAL_FAILURE;
    }
    exit_codes::SUCCESS
}

fn monitor_for(config: &SessionConfig, streams: &StreamSet) -> Option<Monitor> {
    if let Some(ni) = streams.ni.as_ref().filter(|ni| ni.config.n_neural > 0) {
        return Some(Monitor::new(
            "nidq",
            Arc::clone(&ni.buffer),
            ni.config.neural_range(),
            &config.monitor,
        ));
    }
    streams.probes.first().map(|p| {
        Monitor::new(
            "imec0",
            Arc::clone(&p.buffer),
            p.config.layout.ap_range(),
            &config.monitor,
        )
    })
}

fn run_session(config: &SessionConfig, out_dir: &Path) -> Result<RunReport> {
    let started_at = Utc::now();
    let streams = config.build_streams();
    let mut policy =
        policy_for(&config.trigger.mode, &streams, &config.adc).context("Invalid trigger settings")?;
    let trigger = policy.name();

    let factory = Arc::new(BinWriterFactory::new(out_dir));
    let ctl = Arc::new(
        TriggerController::new(config.trigger.clone(), streams.clone(), factory)
            .context("Failed to set up the trigger controller")?,
    );

    let mut metadata = BTreeMap::new();
    metadata.insert("appVersion".to_string(), env!("CARGO_PKG_VERSION").to_string());
    metadata.insert("synthSeed".to_string(), config.synth.seed.to_string());
    ctl.set_metadata(metadata);

    let stop_inputs = Arc::new(AtomicBool::new(false));
    let block_secs = config.synth.block_secs;
    let mut producers = Vec::new();

    if let Some(ni) = &streams.ni {
        let gen = Generator::new(config.ni_plan(&ni.config), config.synth.clone(), ni.config.sample_rate, 0);
        let handle = spawn_producer("nidq".to_string(), Arc::clone(&ni.buffer), gen, block_secs, stop_inputs.clone())
            .context("Failed to start the NI producer")?;
        producers.push(("nidq".to_string(), ni.config.sample_rate, handle));
    }
    for (ip, probe) in streams.probes.iter().enumerate() {
        let name = format!("imec{}", ip);
        let gen = Generator::new(
            config.probe_plan(&probe.config),
            config.synth.clone(),
            probe.config.sample_rate,
            ip as u64 + 1,
        );
        let handle = spawn_producer(name.clone(), Arc::clone(&probe.buffer), gen, block_secs, stop_inputs.clone())
            .with_context(|| format!("Failed to start producer {}", name))?;
        producers.push((name, probe.config.sample_rate, handle));
    }

    let monitor = match monitor_for(config, &streams) {
        Some(m) => Some(spawn_monitor(m, stop_inputs.clone()).context("Failed to start the monitor")?),
        None => None,
    };

    let finished = ctl.finished();
    let runner = {
        let ctl = Arc::clone(&ctl);
        thread::Builder::new()
            .name("trigger".to_string())
            .spawn(move || ctl.run(policy.as_mut()))
            .context("Failed to start the trigger thread")?
    };

    drive_gate(&ctl, config);

    ctl.stop();
    let summary = finished
        .recv_timeout(Duration::from_secs(10))
        .context("Trigger did not report completion")?;
    runner.join().map_err(|_| anyhow!("Trigger thread panicked"))?;

    stop_inputs.store(true, Ordering::Relaxed);
    let mut produced = Vec::new();
    for (stream, sample_rate, handle) in producers {
        let scans = handle
            .join()
            .map_err(|_| anyhow!("Producer {} panicked", stream))?;
        produced.push(StreamCount {
            stream,
            sample_rate,
            scans,
        });
    }
    let monitor = match monitor {
        Some(h) => Some(h.join().map_err(|_| anyhow!("Monitor thread panicked"))?),
        None => None,
    };

    Ok(RunReport {
        started_at,
        out_dir: out_dir.to_path_buf(),
        seconds: config.seconds,
        trigger,
        produced,
        monitor,
        summary,
    })
}

/// Hold or toggle the gate for the configured acquisition time.
fn drive_gate(ctl: &TriggerController, config: &SessionConfig) {
    let t0 = clock::now_secs();
    let mut last_status = t0;
    let mut gate_hi = true;
    ctl.set_gate(gate_hi);

    loop {
        let now = clock::now_secs();
        let elapsed = now - t0;
        if elapsed >= config.seconds {
            break;
        }

        if let Some(period) = config.gate_period_secs {
            let want = ((elapsed / period) as u64) % 2 == 0;
            if want != gate_hi {
                gate_hi = want;
                ctl.set_gate(gate_hi);
            }
        }

        if now - last_status >= STATUS_PERIOD_SECS {
            let (ig, it) = ctl.get_gt();
            log::info!("{}", ctl.status_on_since(now, ig, it));
            for perf in ctl.status_wr_perf() {
                log::debug!("{} wrote {} scans at {:.2} MB/s", perf.dst, perf.scans, perf.mb_per_sec);
            }
            last_status = now;
        }

        thread::sleep(Duration::from_millis(5));
    }

    ctl.set_gate(false);
}
