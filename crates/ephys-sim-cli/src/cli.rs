use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ephys_simulation::AcquisitionConfig;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "ephys-sim",
    version,
    about = "Simulated multichannel electrophysiology acquisition",
    long_about = "Runs simulated probe and NIDAQ streams in real time and drains them the way an\n\
                  acquisition host would. Set RUST_LOG to override the -v log level."
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
    /// Run an acquisition and print a JSON summary when it ends
    Run(RunArgs),
    /// Print the stream layout as JSON
    Layout(ConfigArgs),
    /// Print the effective configuration as JSON
    Config(ConfigArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Stop after this many seconds (runs until Ctrl-C when omitted)
    #[arg(long)]
    pub duration: Option<f64>,

    /// Interval between buffer drains in milliseconds
    #[arg(long, default_value_t = 10)]
    pub poll_ms: u64,

    /// Most frames drained from one stream per poll
    #[arg(long, default_value_t = 4096)]
    pub max_frames: usize,
}

#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// JSON configuration file; missing fields take their defaults
    #[arg(long, conflicts_with = "preset")]
    pub config: Option<PathBuf>,

    /// Built-in rig to start from
    #[arg(long, value_parser = ["default", "minimal", "neuropixels"])]
    pub preset: Option<String>,

    /// Number of probes
    #[arg(long)]
    pub probes: Option<usize>,

    #[arg(long)]
    pub channels_per_probe: Option<usize>,

    /// Number of NIDAQ devices
    #[arg(long)]
    pub nidaq: Option<usize>,

    #[arg(long)]
    pub channels_per_nidaq: Option<usize>,

    /// Ring buffer capacity per stream, in frames
    #[arg(long)]
    pub buffer_frames: Option<usize>,

    /// Seed for reproducible signals
    #[arg(long)]
    pub seed: Option<u64>,

    /// Clock tolerance in ppm
    #[arg(long)]
    pub tolerance_ppm: Option<f64>,
}

impl ConfigArgs {
    /// Load the file or preset, then apply command-line overrides
    pub fn resolve(&self) -> Result<AcquisitionConfig> {
        let mut config = match (&self.config, &self.preset) {
            (Some(path), _) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                AcquisitionConfig::from_json_str(&json)
                    .with_context(|| format!("Failed to load config file {}", path.display()))?
            }
            (None, Some(name)) => AcquisitionConfig::preset(name)
                .with_context(|| format!("Unknown preset '{}'", name))?,
            (None, None) => AcquisitionConfig::default(),
        };

        if let Some(probes) = self.probes {
            config.num_probes = probes;
        }
        if let Some(channels) = self.channels_per_probe {
            config.channels_per_probe = channels;
        }
        if let Some(devices) = self.nidaq {
            config.num_nidaq = devices;
        }
        if let Some(channels) = self.channels_per_nidaq {
            config.channels_per_nidaq = channels;
        }
        if let Some(frames) = self.buffer_frames {
            config.buffer_frames = frames;
        }
        if let Some(seed) = self.seed {
            config.generator.seed = Some(seed);
        }
        if let Some(ppm) = self.tolerance_ppm {
            config.clock.tolerance_ppm = ppm;
        }

        config.validate().context("Invalid acquisition configuration")?;
        Ok(config)
    }
}
