//! Commandline argument parser using clap for SoundScout

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Top-level arguments of the `soundscout` binary.
#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
pub struct LocatorArgs {
    #[command(subcommand)]
    /// Which task to perform: replay a recording, simulate a source, or
    /// calibrate from a recording
    pub command: CommandTask,

    /// Room and array configuration, in RON. Defaults apply when omitted
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Microphone table, one `id: x, y, z` line per channel in centimeters.
    /// A generated layout is used when omitted
    #[arg(short = 'm', long = "mics", global = true)]
    pub mics: Option<PathBuf>,
}

/// The tasks `soundscout` can perform.
#[derive(Debug, Subcommand, Clone)]
pub enum CommandTask {
    /// Run a multi-channel WAV recording through the locator
    #[command(about)]
    Replay(ReplayCommand),

    /// Localize a synthetic source rendered by the simulated array
    #[command(about)]
    Simulate(SimulateCommand),

    /// Derive per-channel gains from a recording and print them
    #[command(about)]
    Calibrate(CalibrateCommand),
}

/// Arguments of `replay`.
#[derive(Debug, Args, Clone)]
#[command(version, about)]
pub struct ReplayCommand {
    /// Recording with one channel per microphone
    pub input: PathBuf,
}

/// Arguments of `simulate`.
#[derive(Debug, Args, Clone)]
#[command(version, about)]
pub struct SimulateCommand {
    /// Source x coordinate, in cm
    #[arg(short, long, allow_hyphen_values = true)]
    pub x: f64,

    /// Source y coordinate, in cm
    #[arg(short, long, allow_hyphen_values = true)]
    pub y: f64,

    /// Source z coordinate, in cm
    #[arg(short, long, allow_hyphen_values = true)]
    pub z: f64,

    /// Number of periods to render
    #[arg(short, long, default_value_t = 200)]
    pub periods: u64,

    /// Amplitude of uncorrelated noise added to every channel
    #[arg(short, long, default_value_t = 0.0)]
    pub noise: f32,

    /// Also write the rendered audio to this WAV file
    #[arg(short, long)]
    pub record: Option<PathBuf>,
}

/// Arguments of `calibrate`.
#[derive(Debug, Args, Clone)]
#[command(version, about)]
pub struct CalibrateCommand {
    /// Recording with one channel per microphone
    pub input: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulate_with_negative_coordinates() {
        let args = LocatorArgs::parse_from([
            "soundscout",
            "--config",
            "room.ron",
            "simulate",
            "-x",
            "-120",
            "-y",
            "0",
            "-z",
            "150.5",
            "--periods",
            "10",
        ]);
        assert_eq!(args.config, Some(PathBuf::from("room.ron")));
        match args.command {
            CommandTask::Simulate(cmd) => {
                assert_eq!((cmd.x, cmd.y, cmd.z), (-120.0, 0.0, 150.5));
                assert_eq!(cmd.periods, 10);
                assert_eq!(cmd.noise, 0.0);
                assert!(cmd.record.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn global_options_after_subcommand() {
        let args = LocatorArgs::parse_from(["soundscout", "replay", "take.wav", "--mics", "m.txt"]);
        assert_eq!(args.mics, Some(PathBuf::from("m.txt")));
        match args.command {
            CommandTask::Replay(cmd) => assert_eq!(cmd.input, PathBuf::from("take.wav")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
