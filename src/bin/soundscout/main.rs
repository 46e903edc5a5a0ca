//! The `soundscout` binary: replays recordings, drives the simulated array,
//! and calibrates from recordings.

use clap::Parser;
use soundscout::{
    args::{CommandTask, LocatorArgs, SimulateCommand},
    calibration::{mean_square, ChannelCalibrator},
    config::LocatorConfig,
    device::SimulatedArray,
    error::LocatorError,
    geometry::MicrophoneLayout,
    localizer::LocalizationEstimate,
    pipeline::Pipeline,
    wav::{read_periods, WavRecorder},
    Point3, SubArray, TransposableIter,
};

use log::{error, info};
use std::{path::Path, process::ExitCode};

// Example:
// cargo run --bin soundscout -- --config config/room.ron
//                               --mics   config/microphones.txt
//                               simulate -x 40 -y 0 -z 120 --periods 100

fn main() -> ExitCode {
    env_logger::init();
    let args = LocatorArgs::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("soundscout: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: LocatorArgs) -> Result<(), LocatorError> {
    let config = match &args.config {
        Some(path) => LocatorConfig::from_path(path)?,
        None => LocatorConfig::default(),
    };
    let layout = match &args.mics {
        Some(path) => MicrophoneLayout::from_path(path)?,
        None => MicrophoneLayout::simulated(&config),
    };
    info!(
        "{} microphones, {} per sub-array",
        layout.len(),
        config.channels_per_sub_array()
    );

    match args.command {
        CommandTask::Replay(cmd) => replay(config, layout, &cmd.input),
        CommandTask::Simulate(cmd) => simulate(config, layout, cmd),
        CommandTask::Calibrate(cmd) => calibrate(&config, &cmd.input),
    }
}

fn print_estimate(estimate: &LocalizationEstimate) {
    println!("{}", estimate);
}

fn print_summary(pipeline: &Pipeline) -> Result<(), LocatorError> {
    for sub in SubArray::ALL {
        let points = pipeline.tracked_points(sub.index())?;
        println!("{} array tracked {} distinct positions", sub, points.len());
    }
    println!("{}", pipeline.stats());
    Ok(())
}

fn replay(
    config: LocatorConfig,
    layout: MicrophoneLayout,
    input: &Path,
) -> Result<(), LocatorError> {
    let periods = read_periods(input, &config)?;
    info!("replaying {} periods from {}", periods.len(), input.display());

    let (mut pipeline, mut capture) = Pipeline::new(config, layout)?;
    for period in &periods {
        capture.push_frame_wait(period)?;
        pipeline
            .estimates()
            .try_iter()
            .for_each(|e| print_estimate(&e));
    }
    drop(capture);
    pipeline.wait();
    pipeline
        .estimates()
        .try_iter()
        .for_each(|e| print_estimate(&e));

    print_summary(&pipeline)
}

fn simulate(
    config: LocatorConfig,
    layout: MicrophoneLayout,
    cmd: SimulateCommand,
) -> Result<(), LocatorError> {
    let (mut pipeline, capture) = Pipeline::new(config.clone(), layout.clone())?;

    let mut builder = SimulatedArray::builder(config.clone(), layout)
        .source(Point3::new(cmd.x, cmd.y, cmd.z))
        .noise(cmd.noise)
        .periods(cmd.periods);
    if let Some(path) = &cmd.record {
        builder = builder.record(WavRecorder::create(path, &config)?);
    }
    let mut array = builder.spawn(capture)?;

    // The estimate channel closes once the array stops and the worker drains.
    for estimate in pipeline.estimates().iter() {
        print_estimate(&estimate);
    }
    array.wait()?;
    pipeline.wait();

    print_summary(&pipeline)
}

fn calibrate(config: &LocatorConfig, input: &Path) -> Result<(), LocatorError> {
    let periods = read_periods(input, config)?;
    let mut calibrator = ChannelCalibrator::new(config.channel_count, config.calibration_periods);

    for period in &periods {
        let levels: Vec<f32> = period
            .chunks(config.channel_count)
            .transpose()
            .map(|samples| mean_square(&samples.into_iter().copied().collect::<Vec<_>>()))
            .collect();
        calibrator.accumulate(&levels)?;
    }

    let gains = calibrator.gains()?;
    let rms = calibrator.rms_levels();
    println!("channel  rms       gain");
    for (channel, (gain, level)) in gains.iter().zip(rms).enumerate() {
        println!("{:>7}  {:.6}  {:.4}", channel, level, gain);
    }
    Ok(())
}
