//! The capture front end and the localization worker.
//!
//! [`Capture`] is owned by whatever delivers audio. For every period it
//! checks the buffer shape, de-interleaves, meters levels, feeds calibration,
//! applies the current gains and queues the frame without ever blocking. If
//! the worker has fallen behind, the frame is dropped and counted.
//!
//! The worker runs [`LocalizationStage`] under [`run_component`]: per
//! sub-array it builds the dataset, estimates delays, solves, clamps and
//! tracks, then emits every [`LocalizationEstimate`] on a bounded channel.
//!
//! Control calls on [`Pipeline`] may come from any thread at any time.

use crate::calibration::{apply_gain, mean_square, ChannelCalibrator};
use crate::component::{run_component, Component};
use crate::config::LocatorConfig;
use crate::delay::DelayEstimator;
use crate::error::LocatorError;
use crate::geometry::MicrophoneLayout;
use crate::localizer::{LocalizationEstimate, Localizer, MIN_OBSERVATIONS};
use crate::plausibility::PlausibilityChecker;
use crate::selector::{ChannelSelector, Dataset};
use crate::tracker::Tracker;
use crate::{Point, Point3, SubArray, TransposableIter};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, info, trace, warn};
use parking_lot::{Mutex, RwLock};
use std::fmt::{self, Display};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// One period of de-interleaved, gain-corrected audio.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiChannelFrame {
    /// Capture period counter, starting at 0
    pub period: u64,
    /// One buffer of `frame_size` samples per channel
    pub channels: Vec<Vec<f32>>,
}

/// Counters describing what the pipeline did with the audio it was given.
#[derive(Debug, Default)]
pub struct PipelineStats {
    captured: AtomicU64,
    dropped: AtomicU64,
    processed: AtomicU64,
    estimates: AtomicU64,
    insufficient: AtomicU64,
    discarded: AtomicU64,
    no_reference: AtomicU64,
}

/// A point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Periods accepted by the capture side
    pub captured: u64,
    /// Periods dropped because the worker queue was full
    pub dropped: u64,
    /// Periods the worker has finished
    pub processed: u64,
    /// Estimates emitted, over both sub-arrays
    pub estimates: u64,
    /// Sub-array periods with fewer delays than a solve needs
    pub insufficient: u64,
    /// Sub-array periods whose solve was singular or out of range
    pub discarded: u64,
    /// Sub-array periods without any active microphone
    pub no_reference: u64,
}

impl PipelineStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Read every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            captured: self.captured.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            estimates: self.estimates.load(Ordering::Relaxed),
            insufficient: self.insufficient.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            no_reference: self.no_reference.load(Ordering::Relaxed),
        }
    }
}

impl Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "captured {}, dropped {}, processed {}, estimates {}, \
             too few delays {}, discarded {}, no reference {}",
            self.captured,
            self.dropped,
            self.processed,
            self.estimates,
            self.insufficient,
            self.discarded,
            self.no_reference
        )
    }
}

/// State touched by both the capture side, the worker and control calls.
#[derive(Debug)]
struct Shared {
    config: LocatorConfig,
    selector: ChannelSelector,
    calibrator: Mutex<ChannelCalibrator>,
    gains: RwLock<Arc<[f32]>>,
    levels: RwLock<Vec<f32>>,
    tracker: Mutex<Tracker>,
    stats: PipelineStats,
}

impl Shared {
    fn new(config: LocatorConfig) -> Self {
        let channels = config.channel_count;
        Self {
            selector: ChannelSelector::new(&config),
            calibrator: Mutex::new(ChannelCalibrator::new(
                channels,
                config.calibration_periods,
            )),
            gains: RwLock::new(vec![1.0; channels].into()),
            levels: RwLock::new(vec![0.0; channels]),
            tracker: Mutex::new(Tracker::new()),
            stats: PipelineStats::default(),
            config,
        }
    }
}

/// The audio-callback side of the pipeline.
pub struct Capture {
    shared: Arc<Shared>,
    sender: Sender<MultiChannelFrame>,
    period: u64,
}

impl Capture {
    fn new(shared: Arc<Shared>, sender: Sender<MultiChannelFrame>) -> Self {
        Self {
            shared,
            sender,
            period: 0,
        }
    }

    /// Hand one interleaved period to the worker without blocking. Returns
    /// `Ok(false)` when the frame was dropped because the worker is behind.
    pub fn push_frame(&mut self, interleaved: &[f32]) -> Result<bool, LocatorError> {
        let frame = self.prepare(interleaved)?;
        match self.sender.try_send(frame) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(frame)) => {
                PipelineStats::bump(&self.shared.stats.dropped);
                trace!("worker busy, dropped period {}", frame.period);
                Ok(false)
            }
            Err(TrySendError::Disconnected(_)) => Err(LocatorError::Disconnected),
        }
    }

    /// Like [`Capture::push_frame`], but waits for room in the queue. For
    /// offline sources such as file replay, never for a live device.
    pub fn push_frame_wait(&mut self, interleaved: &[f32]) -> Result<(), LocatorError> {
        let frame = self.prepare(interleaved)?;
        self.sender
            .send(frame)
            .map_err(|_| LocatorError::Disconnected)
    }

    fn prepare(&mut self, interleaved: &[f32]) -> Result<MultiChannelFrame, LocatorError> {
        let config = &self.shared.config;
        let expected = config.period_len();
        if interleaved.len() != expected {
            return Err(LocatorError::FrameShape {
                expected,
                got: interleaved.len(),
            });
        }

        let mut channels: Vec<Vec<f32>> = interleaved
            .chunks(config.channel_count)
            .transpose()
            .map(|samples| samples.into_iter().copied().collect())
            .collect();

        let levels: Vec<f32> = channels.iter().map(|c| mean_square(c)).collect();
        self.calibrate(&levels);
        // A reader holding the meters keeps the previous period's levels.
        match self.shared.levels.try_write() {
            Some(mut slot) => *slot = levels,
            None => trace!("levels busy, period {} not metered", self.period),
        }

        let gains = Arc::clone(&*self.shared.gains.read());
        for (samples, &gain) in channels.iter_mut().zip(gains.iter()) {
            apply_gain(samples, gain);
        }

        let period = self.period;
        self.period += 1;
        PipelineStats::bump(&self.shared.stats.captured);
        Ok(MultiChannelFrame { period, channels })
    }

    /// Accumulate levels while calibrating and install the gains the moment
    /// calibration completes. A control call holding the calibrator costs
    /// this period its contribution rather than blocking the callback.
    fn calibrate(&self, levels: &[f32]) {
        let Some(mut calibrator) = self.shared.calibrator.try_lock() else {
            return;
        };
        if calibrator.is_calibrated() {
            return;
        }
        if let Err(e) = calibrator.accumulate(levels) {
            warn!("calibration skipped a period: {}", e);
            return;
        }
        if calibrator.is_calibrated() {
            match calibrator.gains() {
                Ok(gains) => {
                    info!("calibrated after {} periods", calibrator.periods());
                    *self.shared.gains.write() = gains.into();
                }
                Err(e) => warn!("calibration failed: {}", e),
            }
        }
    }
}

/// The worker stage: dataset, delays, solve, clamp and track, per sub-array.
pub struct LocalizationStage {
    shared: Arc<Shared>,
    positions: Vec<Point3>,
    estimator: DelayEstimator,
    localizer: Localizer,
    checker: PlausibilityChecker,
    dataset: Dataset,
}

impl LocalizationStage {
    fn new(shared: Arc<Shared>, layout: &MicrophoneLayout) -> Self {
        let config = &shared.config;
        Self {
            estimator: DelayEstimator::new(config),
            localizer: Localizer::new(config),
            checker: PlausibilityChecker::new(config),
            positions: layout.positions().to_vec(),
            dataset: Dataset::new(),
            shared,
        }
    }

    fn locate(&mut self, frame: &MultiChannelFrame, sub: SubArray) -> Option<LocalizationEstimate> {
        let stats = &self.shared.stats;

        if let Err(e) =
            self.shared
                .selector
                .fill_dataset(&mut self.dataset, &frame.channels, &self.positions, sub)
        {
            warn!("period {}: {}", frame.period, e);
            return None;
        }

        let configured = self.shared.config.sub_array(sub).reference_channel;
        let reference = if self.dataset.contains_key(&configured) {
            configured
        } else {
            let Some(&first) = self.dataset.keys().next() else {
                debug!("period {}: no active {} microphones", frame.period, sub);
                PipelineStats::bump(&stats.no_reference);
                return None;
            };
            first
        };
        let reference_position = self.dataset[&reference].position;

        let observations = self.estimator.estimate(&self.dataset, reference);
        if observations.len() < MIN_OBSERVATIONS {
            debug!(
                "period {}: {} has {} delays",
                frame.period,
                sub,
                observations.len()
            );
            PipelineStats::bump(&stats.insufficient);
            return None;
        }

        let Some(mut estimate) =
            self.localizer
                .solve(reference_position, reference, &observations, sub)
        else {
            PipelineStats::bump(&stats.discarded);
            return None;
        };
        estimate.period = frame.period;

        let estimate = self.checker.clamp(&estimate);
        self.shared.tracker.lock().add_point(&estimate);
        PipelineStats::bump(&stats.estimates);
        Some(estimate)
    }
}

impl Component for LocalizationStage {
    type InData = MultiChannelFrame;
    type OutData = LocalizationEstimate;

    fn convert(&mut self, frame: MultiChannelFrame) -> Vec<LocalizationEstimate> {
        let estimates = SubArray::ALL
            .iter()
            .filter_map(|&sub| self.locate(&frame, sub))
            .collect();
        PipelineStats::bump(&self.shared.stats.processed);
        estimates
    }

    fn finalize(&mut self) -> Result<(), LocatorError> {
        info!("{} : {}", self, self.shared.stats.snapshot());
        Ok(())
    }
}

impl Display for LocalizationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LocalizationStage")
    }
}

/// An explicitly owned localization pipeline and its control surface.
pub struct Pipeline {
    shared: Arc<Shared>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    estimates: Receiver<LocalizationEstimate>,
}

impl Pipeline {
    /// Validate the configuration, start the worker and return the pipeline
    /// together with the capture handle for the audio source.
    pub fn new(
        config: LocatorConfig,
        layout: MicrophoneLayout,
    ) -> Result<(Self, Capture), LocatorError> {
        config.validate()?;
        if layout.len() < config.channel_count {
            return Err(LocatorError::Config(format!(
                "layout has {} microphones, the array has {} channels",
                layout.len(),
                config.channel_count
            )));
        }

        let (frame_tx, frame_rx) = bounded(config.queue_capacity);
        let (estimate_tx, estimate_rx) = bounded(config.output_capacity);
        let shared = Arc::new(Shared::new(config));
        let running = Arc::new(AtomicBool::new(true));

        let stage = LocalizationStage::new(Arc::clone(&shared), &layout);
        let worker = run_component(stage, frame_rx, estimate_tx, Arc::clone(&running))?;
        info!(
            "pipeline started: {} channels, {} samples per period",
            shared.config.channel_count, shared.config.frame_size
        );

        let pipeline = Self {
            shared: Arc::clone(&shared),
            running,
            worker: Some(worker),
            estimates: estimate_rx,
        };
        Ok((pipeline, Capture::new(shared, frame_tx)))
    }

    /// The configuration the pipeline runs with.
    pub fn config(&self) -> &LocatorConfig {
        &self.shared.config
    }

    /// Replace the activation mask of sub-array `sub` (0 ceiling, 1 wall).
    pub fn set_activation_mask(&self, sub: usize, mask: &[bool]) -> Result<(), LocatorError> {
        let sub = SubArray::try_from(sub)?;
        self.shared.selector.set_activation_mask(sub, mask)?;
        info!("{} mask: {} active", sub, self.shared.selector.active_count(sub));
        Ok(())
    }

    /// A copy of the activation mask of sub-array `sub`.
    pub fn activation_mask(&self, sub: usize) -> Result<Vec<bool>, LocatorError> {
        Ok(self.shared.selector.activation_mask(SubArray::try_from(sub)?))
    }

    /// Active microphones in sub-array `sub`.
    pub fn active_count(&self, sub: usize) -> Result<usize, LocatorError> {
        Ok(self.shared.selector.active_count(SubArray::try_from(sub)?))
    }

    /// Start a new calibration. The current gains stay applied until the
    /// new ones are ready.
    pub fn recalibrate(&self) {
        self.shared.calibrator.lock().reset();
        info!("recalibrating");
    }

    /// `true` once the current calibration has completed.
    pub fn is_calibrated(&self) -> bool {
        self.shared.calibrator.lock().is_calibrated()
    }

    /// The gains of the current calibration.
    pub fn calibration_gains(&self) -> Result<Vec<f32>, LocatorError> {
        self.shared.calibrator.lock().gains()
    }

    /// RMS level of every channel in the most recent period, before gains.
    pub fn levels(&self) -> Vec<f32> {
        self.shared.levels.read().iter().map(|l| l.sqrt()).collect()
    }

    /// Forget the tracked points of sub-array `sub`.
    pub fn reset_tracker(&self, sub: usize) -> Result<(), LocatorError> {
        self.shared.tracker.lock().reset(SubArray::try_from(sub)?);
        Ok(())
    }

    /// The tracked points of sub-array `sub`, in insertion order.
    pub fn tracked_points(&self, sub: usize) -> Result<Vec<Point>, LocatorError> {
        let sub = SubArray::try_from(sub)?;
        Ok(self.shared.tracker.lock().points(sub).to_vec())
    }

    /// Current counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Estimates, in period order per sub-array.
    pub fn estimates(&self) -> &Receiver<LocalizationEstimate> {
        &self.estimates
    }

    /// Stop the worker now. Frames still queued are discarded.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        self.wait();
    }

    /// Wait for the worker to finish. It finishes once every [`Capture`] is
    /// dropped and the queue is drained, or after [`Pipeline::shutdown`].
    pub fn wait(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("localization worker panicked");
            }
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}
