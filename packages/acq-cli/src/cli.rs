use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "acqsim",
    version,
    about = "Synthetic multichannel acquisition driver",
    long_about = "Acquire synthetic NI and probe streams into ring buffers and record\n\
                  triggered segments as raw .bin files with .meta sidecars.\n\
                  Set $ACQSIM_OUT_DIR or use --out-dir to choose where segments land."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Command {
    /// Acquire for a fixed time and record triggered segments
    Run(RunArgs),
    /// Print the effective configuration as JSON
    Config(ConfigArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TriggerKind {
    Immediate,
    Timed,
    Ttl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TtlSourceKind {
    /// Bit 0 of the NI digital word
    Digital,
    /// First NI aux analog channel
    Analog,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TtlModeArg {
    Latched,
    Timed,
    Follower,
}

#[derive(Args, Debug, Clone)]
pub struct StreamArgs {
    /// Leave out the NI stream
    #[arg(long, default_value_t = false)]
    pub no_ni: bool,

    /// NI sample rate in Hz
    #[arg(long, default_value_t = 25_000.0)]
    pub ni_rate: f64,

    /// NI neural channels
    #[arg(long, default_value_t = 8)]
    pub ni_neural: usize,

    /// NI aux analog channels
    #[arg(long, default_value_t = 1)]
    pub ni_aux: usize,

    /// Number of probe streams
    #[arg(long, default_value_t = 0)]
    pub probes: usize,

    /// Probe AP sample rate in Hz
    #[arg(long, default_value_t = 30_000.0)]
    pub probe_rate: f64,

    /// AP channels per probe
    #[arg(long, default_value_t = 16)]
    pub n_ap: usize,

    /// LF channels per probe
    #[arg(long, default_value_t = 16)]
    pub n_lf: usize,

    /// Ring buffer retention in seconds
    #[arg(long, default_value_t = 4.0)]
    pub capacity_secs: f64,

    /// Do not align streams on the shared sync pulse
    #[arg(long, default_value_t = false)]
    pub no_sync: bool,
}

#[derive(Args, Debug, Clone)]
pub struct TriggerArgs {
    /// Trigger mode
    #[arg(long, value_enum, default_value_t = TriggerKind::Immediate)]
    pub trigger: TriggerKind,

    /// Base name of the recorded segments
    #[arg(long, env = "ACQSIM_RUN_NAME", default_value = "run")]
    pub run_name: String,

    /// Trigger loop period in milliseconds
    #[arg(long, default_value_t = 10)]
    pub loop_ms: u64,

    /// Segment duration in seconds (timed, ttl --ttl-mode timed)
    #[arg(long, default_value_t = 1.0)]
    pub t_h: f64,

    /// Low time between timed segments in seconds
    #[arg(long, default_value_t = 1.0)]
    pub t_l: f64,

    /// Delay from gate high to the first timed segment in seconds
    #[arg(long, default_value_t = 0.0)]
    pub t_l0: f64,

    /// Segments per gate
    #[arg(long)]
    pub n_max: Option<u32>,

    /// TTL source
    #[arg(long, value_enum, default_value_t = TtlSourceKind::Digital)]
    pub ttl_source: TtlSourceKind,

    /// TTL segment end
    #[arg(long, value_enum, default_value_t = TtlModeArg::Timed)]
    pub ttl_mode: TtlModeArg,

    /// Analog TTL threshold in volts
    #[arg(long, default_value_t = 2.5)]
    pub ttl_thresh_v: f64,

    /// Consecutive samples qualifying an edge
    #[arg(long, default_value_t = 5)]
    pub inarow: usize,

    /// Pre-edge margin in seconds
    #[arg(long, default_value_t = 0.1)]
    pub margin: f64,

    /// Dead time after a TTL edge in seconds
    #[arg(long, default_value_t = 0.0)]
    pub refractory: f64,
}

#[derive(Args, Debug, Clone)]
pub struct SynthArgs {
    /// Random seed for the synthetic signals
    #[arg(long, default_value_t = 1)]
    pub seed: u64,

    /// Peak noise amplitude in raw units
    #[arg(long, default_value_t = 200)]
    pub noise: i16,

    /// Spike trough amplitude in raw units
    #[arg(long, default_value_t = 4000)]
    pub spike_amp: i16,

    /// Mean spike rate per channel in Hz
    #[arg(long, default_value_t = 20.0)]
    pub spike_rate: f64,

    /// Interval between TTL pulse onsets in seconds
    #[arg(long, default_value_t = 0.5)]
    pub ttl_period: f64,

    /// TTL pulse width in seconds
    #[arg(long, default_value_t = 0.1)]
    pub ttl_width: f64,
}

#[derive(Args, Debug, Clone)]
pub struct MonitorArgs {
    /// Live highpass corner in Hz
    #[arg(long, default_value_t = 300.0)]
    pub highpass: f64,

    /// Disable the live highpass
    #[arg(long, default_value_t = false)]
    pub no_highpass: bool,

    /// Spike threshold in raw units for the activity tally
    #[arg(long, default_value_t = -1500, allow_hyphen_values = true)]
    pub spike_thresh: i16,

    /// Tally update period in seconds
    #[arg(long, default_value_t = 1.0)]
    pub tally_secs: f64,
}

#[derive(Args, Debug, Clone)]
pub struct SessionArgs {
    #[command(flatten)]
    pub streams: StreamArgs,

    #[command(flatten)]
    pub trigger: TriggerArgs,

    #[command(flatten)]
    pub synth: SynthArgs,

    #[command(flatten)]
    pub monitor: MonitorArgs,

    /// Acquisition time in seconds
    #[arg(long, default_value_t = 2.0)]
    pub seconds: f64,

    /// Toggle the gate with this half period in seconds; held high when absent
    #[arg(long)]
    pub gate_period: Option<f64>,
}

#[derive(Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub session: SessionArgs,

    /// Directory receiving the segment files
    #[arg(long, env = "ACQSIM_OUT_DIR")]
    pub out_dir: PathBuf,

    /// Summary file (default: stdout)
    #[arg(short, long)]
    pub output: Option<String>,

    /// Compact JSON output (no indentation)
    #[arg(long, default_value_t = false)]
    pub compact: bool,

    /// Suppress progress messages on stderr
    #[arg(long, default_value_t = false)]
    pub quiet: bool,
}

#[derive(Args)]
pub struct ConfigArgs {
    #[command(flatten)]
    pub session: SessionArgs,

    /// Output file (default: stdout)
    #[arg(short, long)]
    pub output: Option<String>,

    /// Compact JSON output (no indentation)
    #[arg(long, default_value_t = false)]
    pub compact: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_defaults() {
        let cli = Cli::parse_from(["acqsim", "run", "--out-dir", "/tmp/x"]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.session.trigger.trigger, TriggerKind::Immediate);
        assert_eq!(args.session.streams.probes, 0);
        assert_eq!(args.session.monitor.spike_thresh, -1500);
        assert_eq!(args.out_dir, PathBuf::from("/tmp/x"));
    }

    #[test]
    fn test_negative_threshold() {
        let cli = Cli::parse_from(["acqsim", "config", "--spike-thresh", "-900", "--trigger", "ttl"]);
        let Command::Config(args) = cli.command else {
            panic!("expected config");
        };
        assert_eq!(args.session.monitor.spike_thresh, -900);
        assert_eq!(args.session.trigger.trigger, TriggerKind::Ttl);
    }
}
