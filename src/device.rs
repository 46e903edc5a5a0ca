//! A simulated microphone array. It stands in for the audio device: a thread
//! renders one period at a time for a point source in the room and feeds it
//! to a [`Capture`] at the real period rate.

use crate::config::LocatorConfig;
use crate::error::LocatorError;
use crate::geometry::MicrophoneLayout;
use crate::pipeline::Capture;
use crate::wav::WavRecorder;
use crate::Point3;

use crossbeam_channel::{unbounded, Sender};
use log::{debug, info, warn};
use rand::prelude::*;
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Render one interleaved period of white noise emitted at `source` (cm)
/// and heard by every microphone of `layout`. Each channel is delayed by its
/// propagation time rounded to whole samples and attenuated with distance.
/// `noise` adds independent uniform noise of that amplitude per channel.
pub fn synthesize_frame<R: Rng>(
    layout: &MicrophoneLayout,
    config: &LocatorConfig,
    source: Point3,
    rng: &mut R,
    noise: f32,
) -> Vec<f32> {
    let channels = config.channel_count;
    let frame_size = config.frame_size;
    let samples_per_cm = config.sample_rate as f64 / config.speed_of_sound / 100.0;

    let paths: Vec<(usize, f32)> = (0..channels)
        .map(|c| {
            let distance = layout
                .position(c)
                .map_or(0.0, |p| p.distance(&source));
            let delay = (distance * samples_per_cm).round() as usize;
            let gain = (100.0 / distance.max(10.0)) as f32 * 0.25;
            (delay, gain)
        })
        .collect();
    let longest = paths.iter().map(|&(d, _)| d).max().unwrap_or(0);

    let emitted: Vec<f32> = (0..frame_size + longest)
        .map(|_| rng.gen_range(-1.0..1.0))
        .collect();

    let mut frame = Vec::with_capacity(frame_size * channels);
    for n in 0..frame_size {
        for &(delay, gain) in &paths {
            let mut sample = emitted[longest - delay + n] * gain;
            if noise > 0.0 {
                sample += rng.gen_range(-noise..noise);
            }
            frame.push(sample);
        }
    }
    frame
}

enum Signal {
    SourcePosition(Point3),
    Noise(f32),
    Stop,
}

/// Configures a [`SimulatedArray`] before its thread starts.
pub struct SimulatedArrayBuilder {
    config: LocatorConfig,
    layout: MicrophoneLayout,
    source: Point3,
    noise: f32,
    periods: Option<u64>,
    recorder: Option<WavRecorder>,
    seed: Option<u64>,
}

impl SimulatedArrayBuilder {
    /// Where the source starts, in centimeters.
    pub fn source(mut self, source: Point3) -> Self {
        self.source = source;
        self
    }

    /// Amplitude of uncorrelated noise added to every channel.
    pub fn noise(mut self, noise: f32) -> Self {
        self.noise = noise;
        self
    }

    /// Stop on its own after this many periods.
    pub fn periods(mut self, periods: u64) -> Self {
        self.periods = Some(periods);
        self
    }

    /// Also write every rendered period to a WAV file.
    pub fn record(mut self, recorder: WavRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Make the rendered audio reproducible.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Start rendering into `capture`.
    pub fn spawn(self, mut capture: Capture) -> Result<SimulatedArray, LocatorError> {
        let (tx, rx) = unbounded::<Signal>();
        let Self {
            config,
            layout,
            mut source,
            mut noise,
            periods,
            mut recorder,
            seed,
        } = self;

        let handle = thread::Builder::new()
            .name("SimulatedArray".to_owned())
            .spawn(move || -> Result<(), LocatorError> {
                let mut rng = match seed {
                    Some(seed) => StdRng::seed_from_u64(seed),
                    None => StdRng::from_entropy(),
                };
                let period = config.period();
                let mut deadline = Instant::now();
                let mut rendered = 0_u64;
                info!("simulating a source at {} cm", source);

                'run: while periods.map_or(true, |p| rendered < p) {
                    for signal in rx.try_iter() {
                        match signal {
                            Signal::SourcePosition(p) => source = p,
                            Signal::Noise(n) => noise = n,
                            Signal::Stop => break 'run,
                        }
                    }

                    let frame = synthesize_frame(&layout, &config, source, &mut rng, noise);
                    if let Some(recorder) = recorder.as_mut() {
                        recorder.write_period(&frame)?;
                    }
                    match capture.push_frame(&frame) {
                        Ok(true) => {}
                        Ok(false) => debug!("period {} dropped", rendered),
                        Err(e) => {
                            warn!("simulation stopped: {}", e);
                            break;
                        }
                    }
                    rendered += 1;

                    deadline += period;
                    let now = Instant::now();
                    if deadline > now {
                        spin_sleep::sleep(deadline - now);
                    }
                }

                info!("simulation rendered {} periods", rendered);
                if let Some(recorder) = recorder {
                    recorder.finalize()?;
                }
                Ok(())
            })?;

        Ok(SimulatedArray {
            handle: Some(handle),
            tx,
        })
    }
}

/// A running simulated array.
pub struct SimulatedArray {
    handle: Option<JoinHandle<Result<(), LocatorError>>>,
    tx: Sender<Signal>,
}

impl SimulatedArray {
    /// Start configuring a simulation of `layout`.
    pub fn builder(config: LocatorConfig, layout: MicrophoneLayout) -> SimulatedArrayBuilder {
        SimulatedArrayBuilder {
            config,
            layout,
            source: Point3::default(),
            noise: 0.0,
            periods: None,
            recorder: None,
            seed: None,
        }
    }

    /// Move the source.
    pub fn set_source(&self, source: Point3) {
        // A stopped simulation has nothing left to move.
        let _ = self.tx.send(Signal::SourcePosition(source));
    }

    /// Change the noise amplitude.
    pub fn set_noise(&self, noise: f32) {
        let _ = self.tx.send(Signal::Noise(noise));
    }

    /// Stop rendering and wait for the thread.
    pub fn stop(&mut self) -> Result<(), LocatorError> {
        let _ = self.tx.send(Signal::Stop);
        self.wait()
    }

    /// Wait for the thread to finish on its own, which it only does when a
    /// period count was set or the pipeline went away.
    pub fn wait(&mut self) -> Result<(), LocatorError> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| LocatorError::Disconnected)?,
            None => Ok(()),
        }
    }
}

impl Drop for SimulatedArray {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("simulated array: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Pipeline;
    use crate::wav::read_periods;
    use tempfile::tempdir;

    fn small_config() -> LocatorConfig {
        let mut config = LocatorConfig {
            channel_count: 4,
            frame_size: 256,
            ..LocatorConfig::default()
        };
        config.wall.reference_channel = 2;
        config
    }

    #[test]
    fn delays_follow_distance() {
        let config = small_config();
        // 343 m/s at 48 kHz: 100 samples is about 71.46 cm.
        let per_sample = 343.0 / 48_000.0 * 100.0;
        let layout = MicrophoneLayout::from_positions(vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(100.0 * per_sample, 0.0, 0.0),
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(0.0, 0.0, 0.0),
        ]);
        let mut rng = StdRng::seed_from_u64(1);
        let frame = synthesize_frame(&layout, &config, Point3::default(), &mut rng, 0.0);
        assert_eq!(frame.len(), 1024);

        let channel = |c: usize| -> Vec<f32> { frame.iter().skip(c).step_by(4).copied().collect() };
        let (near, far) = (channel(0), channel(1));
        let ratio = far[100] / near[0];
        for n in 0..156 {
            assert!((far[n + 100] - near[n] * ratio).abs() < 1e-6);
        }
        assert_eq!(channel(2), near);
    }

    #[test]
    fn runs_for_a_fixed_number_of_periods() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sim.wav");
        let config = small_config();
        let layout = MicrophoneLayout::simulated(&config);

        let (mut pipeline, capture) = Pipeline::new(config.clone(), layout.clone()).unwrap();
        let mut array = SimulatedArray::builder(config.clone(), layout)
            .source(Point3::new(10.0, 0.0, 100.0))
            .noise(0.01)
            .periods(5)
            .seed(9)
            .record(WavRecorder::create(&path, &config).unwrap())
            .spawn(capture)
            .unwrap();
        array.wait().unwrap();
        pipeline.wait();

        assert_eq!(pipeline.stats().captured, 5);
        assert_eq!(read_periods(&path, &config).unwrap().len(), 5);
    }

    #[test]
    fn stop_ends_an_open_ended_run() {
        let config = small_config();
        let layout = MicrophoneLayout::simulated(&config);
        let (pipeline, capture) = Pipeline::new(config.clone(), layout.clone()).unwrap();

        let mut array = SimulatedArray::builder(config, layout).spawn(capture).unwrap();
        array.set_source(Point3::new(0.0, 0.0, 50.0));
        array.set_noise(0.1);
        array.stop().unwrap();
        drop(pipeline);
    }
}
