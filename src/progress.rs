use crate::burner::BurnerEvent;
use crate::image::ImageSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashStatus {
    Connecting,
    Flashing,
    Verifying,
    Stopped,
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartitionProgress {
    pub fraction: f64,
    pub status: Option<FlashStatus>,
}

/// Snapshot of a flashing run, derived from the tracker and the image set.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressState {
    pub current_index: Option<usize>,
    pub current_fraction: f64,
    pub per_partition: Vec<Option<PartitionProgress>>,
    pub progress: f64,
    pub status: Option<FlashStatus>,
}

/// Byte-weighted progress across every partition (or hex section) of an
/// [`ImageSet`].
#[derive(Debug, Default, Clone)]
pub struct FlashProgressTracker {
    current: Option<(usize, f64)>,
    status: Option<FlashStatus>,
}

impl FlashProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.current = None;
        self.status = None;
    }

    pub fn current(&self) -> Option<(usize, f64)> {
        self.current
    }

    pub fn status(&self) -> Option<FlashStatus> {
        self.status
    }

    pub fn set_current(&mut self, index: usize, fraction: f64) {
        self.current = Some((index, fraction.clamp(0.0, 1.0)));
    }

    pub fn set_status(&mut self, status: FlashStatus) {
        self.status = Some(status);
    }

    pub fn apply(&mut self, event: &BurnerEvent) {
        match event {
            BurnerEvent::WaitingForDevice | BurnerEvent::EnteringUpdateMode => {
                self.set_status(FlashStatus::Connecting);
            }
            BurnerEvent::PartitionStart { index, .. } => {
                self.set_current(*index, 0.0);
                self.set_status(FlashStatus::Flashing);
            }
            BurnerEvent::Progress { index, fraction } => {
                self.set_current(*index, *fraction);
                self.set_status(FlashStatus::Flashing);
            }
            BurnerEvent::Wrote { index } => {
                self.set_current(*index, 1.0);
                self.set_status(FlashStatus::Verifying);
            }
            BurnerEvent::Verified { index, .. } => self.set_current(*index, 1.0),
            BurnerEvent::Finished => self.set_status(FlashStatus::Success),
            BurnerEvent::Error(_) => self.set_status(FlashStatus::Error),
            BurnerEvent::ChipId(_)
            | BurnerEvent::FlashId { .. }
            | BurnerEvent::Resetting
            | BurnerEvent::Output(_) => {}
        }
    }

    /// Global fraction of bytes written, in `0.0..=1.0`.
    pub fn progress(&self, images: &ImageSet) -> f64 {
        let Some((index, fraction)) = self.current else {
            return 0.0;
        };

        let total = images.size();
        if total == 0 {
            return 0.0;
        }

        let wrote = images.size_up_to(index);
        let writing = images.entry_size(index) as f64 * fraction;
        ((wrote as f64 + writing) / total as f64).min(1.0)
    }

    pub fn per_partition(&self, images: &ImageSet) -> Vec<Option<PartitionProgress>> {
        (0..images.len())
            .map(|i| match self.current {
                Some((index, _)) if i < index => Some(PartitionProgress {
                    fraction: 1.0,
                    status: Some(FlashStatus::Success),
                }),
                Some((index, fraction)) if i == index => Some(PartitionProgress {
                    fraction,
                    status: self.status,
                }),
                _ => None,
            })
            .collect()
    }

    pub fn state(&self, images: &ImageSet) -> ProgressState {
        ProgressState {
            current_index: self.current.map(|(index, _)| index),
            current_fraction: self.current.map_or(0.0, |(_, fraction)| fraction),
            per_partition: self.per_partition(images),
            progress: self.progress(images),
            status: self.status,
        }
    }
}
