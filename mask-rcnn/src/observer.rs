//! Inspection hooks at fixed pipeline checkpoints.

use crate::{
    box_head::BoxHeadTrainOutput, common::*, image::Detection, loss::LossSum, ragged::Ragged,
    rpn::{Proposals, RpnLossSums},
};

/// A pipeline checkpoint together with the data produced there.
#[derive(Debug, Clone, Copy)]
pub enum Checkpoint<'a> {
    /// Anchors of an image grouped by level.
    Anchors(&'a Ragged<XYXY<f32>>),
    /// Proposals selected by the RPN.
    Proposals(&'a Proposals),
    RpnLoss(&'a RpnLossSums),
    /// Sampled proposals and losses of the box head.
    BoxSamples(&'a BoxHeadTrainOutput),
    Detections(&'a [Detection]),
    MaskLoss(&'a LossSum),
}

impl Checkpoint<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Anchors(_) => "anchors",
            Self::Proposals(_) => "proposals",
            Self::RpnLoss(_) => "rpn_loss",
            Self::BoxSamples(_) => "box_samples",
            Self::Detections(_) => "detections",
            Self::MaskLoss(_) => "mask_loss",
        }
    }
}

/// Receives checkpoints of every image. It is called from worker threads.
pub trait Observer: Send + Sync {
    fn observe(&self, image_index: usize, checkpoint: Checkpoint<'_>);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl Observer for NoopObserver {
    fn observe(&self, _image_index: usize, _checkpoint: Checkpoint<'_>) {}
}

/// Logs a short summary of each checkpoint at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl Observer for LogObserver {
    fn observe(&self, image_index: usize, checkpoint: Checkpoint<'_>) {
        let name = checkpoint.name();
        match checkpoint {
            Checkpoint::Anchors(anchors) => {
                debug!(
                    "image {} {}: {:?} per level",
                    image_index,
                    name,
                    anchors.lengths()
                );
            }
            Checkpoint::Proposals(proposals) => {
                debug!("image {} {}: {}", image_index, name, proposals.len());
            }
            Checkpoint::RpnLoss(sums) => {
                debug!(
                    "image {} {}: {} sampled, {} positive",
                    image_index, name, sums.num_sampled, sums.num_positives
                );
            }
            Checkpoint::BoxSamples(output) => {
                debug!(
                    "image {} {}: {} sampled, {} positive",
                    image_index,
                    name,
                    output.num_sampled,
                    output.positive_boxes.len()
                );
            }
            Checkpoint::Detections(detections) => {
                debug!("image {} {}: {}", image_index, name, detections.len());
            }
            Checkpoint::MaskLoss(loss) => {
                debug!(
                    "image {} {}: {} over {} pixels",
                    image_index, name, loss.total, loss.count
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        names: Mutex<Vec<(usize, &'static str)>>,
    }

    impl Observer for Recorder {
        fn observe(&self, image_index: usize, checkpoint: Checkpoint<'_>) {
            self.names
                .lock()
                .unwrap()
                .push((image_index, checkpoint.name()));
        }
    }

    #[test]
    fn observers_receive_checkpoints() {
        let recorder = Recorder::default();
        let proposals = Proposals::default();
        let observers: [&dyn Observer; 3] = [&NoopObserver, &LogObserver, &recorder];
        observers.iter().for_each(|observer| {
            observer.observe(1, Checkpoint::Proposals(&proposals));
            observer.observe(1, Checkpoint::Detections(&[]));
        });
        assert_eq!(
            *recorder.names.lock().unwrap(),
            vec![(1, "proposals"), (1, "detections")]
        );
    }
}
