//! Which microphones are trusted, and the per-period dataset built from them.

use crate::config::LocatorConfig;
use crate::error::LocatorError;
use crate::{Point3, SubArray};

use parking_lot::RwLock;
use std::collections::BTreeMap;

/// One channel's samples for one period, with the microphone's position.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelFrame {
    /// Global channel id
    pub channel: usize,
    /// Gain-corrected samples for this period
    pub samples: Vec<f32>,
    /// Microphone position, in centimeters
    pub position: Point3,
    /// Whether the microphone is trusted
    pub active: bool,
}

/// The channels of one sub-array handed to delay estimation, keyed by id.
pub type Dataset = BTreeMap<usize, ChannelFrame>;

/// Holds one activation mask per sub-array. Masks change only through
/// [`ChannelSelector::set_activation_mask`]; readers always receive a copy,
/// so a period in progress never sees a half-written mask.
#[derive(Debug)]
pub struct ChannelSelector {
    channel_count: usize,
    masks: RwLock<[Vec<bool>; 2]>,
}

impl ChannelSelector {
    /// Build the selector with the default masks from the configuration:
    /// every microphone is active except the listed faulty ones.
    pub fn new(config: &LocatorConfig) -> Self {
        let channel_count = config.channel_count;
        let masks = SubArray::ALL.map(|sub| {
            let faulty = &config.sub_array(sub).faulty_channels;
            sub.channels(channel_count)
                .map(|channel| !faulty.contains(&channel))
                .collect()
        });

        Self {
            channel_count,
            masks: RwLock::new(masks),
        }
    }

    /// Replace the mask of a sub-array. A mask of the wrong length is
    /// rejected and the previous mask stays in place.
    pub fn set_activation_mask(&self, sub: SubArray, mask: &[bool]) -> Result<(), LocatorError> {
        let expected = self.channel_count / 2;
        if mask.len() != expected {
            return Err(LocatorError::MaskLength {
                expected,
                got: mask.len(),
            });
        }
        self.masks.write()[sub.index()] = mask.to_vec();
        Ok(())
    }

    /// A copy of the mask of a sub-array. Index `i` is the sub-array's `i`th
    /// microphone.
    pub fn activation_mask(&self, sub: SubArray) -> Vec<bool> {
        self.masks.read()[sub.index()].clone()
    }

    /// Number of active microphones in a sub-array.
    pub fn active_count(&self, sub: SubArray) -> usize {
        self.masks.read()[sub.index()].iter().filter(|&&a| a).count()
    }

    /// Whether a single global channel is active.
    pub fn is_active(&self, channel: usize) -> bool {
        let half = self.channel_count / 2;
        if half == 0 || channel >= self.channel_count {
            return false;
        }
        self.masks.read()[channel / half][channel % half]
    }

    /// Build a fresh dataset holding the active channels of `sub`.
    pub fn build_dataset(
        &self,
        frames: &[Vec<f32>],
        positions: &[Point3],
        sub: SubArray,
    ) -> Result<Dataset, LocatorError> {
        let mut dataset = Dataset::new();
        self.fill_dataset(&mut dataset, frames, positions, sub)?;
        Ok(dataset)
    }

    /// Clear `dataset` and refill it with the active channels of `sub`.
    /// Nothing from a previous period survives, even on error.
    pub fn fill_dataset(
        &self,
        dataset: &mut Dataset,
        frames: &[Vec<f32>],
        positions: &[Point3],
        sub: SubArray,
    ) -> Result<(), LocatorError> {
        dataset.clear();

        if frames.len() != self.channel_count {
            return Err(LocatorError::FrameShape {
                expected: self.channel_count,
                got: frames.len(),
            });
        }
        if positions.len() < self.channel_count {
            return Err(LocatorError::ChannelOutOfRange {
                channel: positions.len(),
                channels: self.channel_count,
            });
        }

        let mask = self.activation_mask(sub);
        let channels = sub.channels(self.channel_count);
        for (channel, active) in channels.zip(mask) {
            if !active {
                continue;
            }
            dataset.insert(
                channel,
                ChannelFrame {
                    channel,
                    samples: frames[channel].clone(),
                    position: positions[channel],
                    active,
                },
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> LocatorConfig {
        let mut config = LocatorConfig {
            channel_count: 8,
            ..LocatorConfig::default()
        };
        config.ceiling.faulty_channels = vec![1];
        config.wall.reference_channel = 4;
        config.wall.faulty_channels = vec![6, 7];
        config
    }

    fn frames(n: usize) -> Vec<Vec<f32>> {
        (0..n).map(|c| vec![c as f32; 4]).collect()
    }

    fn positions(n: usize) -> Vec<Point3> {
        (0..n).map(|c| Point3::new(c as f64, 0.0, 0.0)).collect()
    }

    #[test]
    fn default_mask_skips_faulty() {
        let selector = ChannelSelector::new(&small_config());
        assert_eq!(
            selector.activation_mask(SubArray::Ceiling),
            vec![true, false, true, true]
        );
        assert_eq!(
            selector.activation_mask(SubArray::Wall),
            vec![true, true, false, false]
        );
        assert_eq!(selector.active_count(SubArray::Ceiling), 3);
        assert_eq!(selector.active_count(SubArray::Wall), 2);
        assert!(!selector.is_active(1));
        assert!(selector.is_active(5));
        assert!(!selector.is_active(99));
    }

    #[test]
    fn wrong_mask_length_keeps_previous() {
        let selector = ChannelSelector::new(&small_config());
        let before = selector.activation_mask(SubArray::Wall);
        assert!(matches!(
            selector.set_activation_mask(SubArray::Wall, &[true; 5]),
            Err(LocatorError::MaskLength {
                expected: 4,
                got: 5
            })
        ));
        assert_eq!(selector.activation_mask(SubArray::Wall), before);
    }

    #[test]
    fn dataset_holds_active_channels_of_one_sub_array() {
        let selector = ChannelSelector::new(&small_config());
        let dataset = selector
            .build_dataset(&frames(8), &positions(8), SubArray::Wall)
            .unwrap();
        assert_eq!(dataset.keys().copied().collect::<Vec<_>>(), vec![4, 5]);
        assert_eq!(dataset[&5].samples, vec![5.0; 4]);
        assert_eq!(dataset[&5].position, Point3::new(5.0, 0.0, 0.0));
        assert!(dataset[&5].active);
    }

    #[test]
    fn refill_does_not_keep_stale_channels() {
        let selector = ChannelSelector::new(&small_config());
        let mut dataset = Dataset::new();
        selector
            .fill_dataset(&mut dataset, &frames(8), &positions(8), SubArray::Ceiling)
            .unwrap();
        assert_eq!(dataset.len(), 3);

        selector
            .set_activation_mask(SubArray::Ceiling, &[false, false, true, false])
            .unwrap();
        selector
            .fill_dataset(&mut dataset, &frames(8), &positions(8), SubArray::Ceiling)
            .unwrap();
        assert_eq!(dataset.keys().copied().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn wrong_frame_count_clears_dataset() {
        let selector = ChannelSelector::new(&small_config());
        let mut dataset = selector
            .build_dataset(&frames(8), &positions(8), SubArray::Ceiling)
            .unwrap();
        assert!(selector
            .fill_dataset(&mut dataset, &frames(7), &positions(8), SubArray::Ceiling)
            .is_err());
        assert!(dataset.is_empty());
    }
}
