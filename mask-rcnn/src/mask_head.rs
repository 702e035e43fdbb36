//! Per-instance mask prediction.

use crate::{
    common::*,
    config::MaskHeadConfig,
    image::{Detection, GroundTruth, ImageRecord},
    loss::{sigmoid, BceWithLogitsLoss, LossSum},
    model::{ensure_pooled, FeaturePyramid, MaskPredictor, RoiPooler},
    segmentation::paste_mask,
};

impl MaskHeadConfig {
    pub fn mask_head_init(&self, num_classes: usize) -> MaskHeadInit {
        MaskHeadInit {
            num_classes,
            resolution: self.resolution,
            mask_threshold: self.mask_threshold.raw(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MaskHeadInit {
    pub num_classes: usize,
    pub resolution: usize,
    pub mask_threshold: f64,
}

impl MaskHeadInit {
    pub fn build(self) -> Result<MaskHead> {
        let Self {
            num_classes,
            resolution,
            mask_threshold,
        } = self;

        ensure!(num_classes > 0, "num_classes must be positive");
        ensure!(resolution > 0, "mask resolution must be positive");
        ensure!(
            (0.0..=1.0).contains(&mask_threshold),
            "mask_threshold must be in range [0, 1]"
        );

        Ok(MaskHead {
            num_classes,
            resolution,
            mask_threshold: mask_threshold as f32,
        })
    }
}

#[derive(Debug, Clone)]
pub struct MaskHead {
    num_classes: usize,
    resolution: usize,
    mask_threshold: f32,
}

impl MaskHead {
    pub fn resolution(&self) -> usize {
        self.resolution
    }

    /// Mask loss terms of one image, one term per target pixel.
    ///
    /// Images without masks or without positive proposals contribute nothing.
    #[allow(clippy::too_many_arguments)]
    pub fn forward_train(
        &self,
        features: &FeaturePyramid,
        image_index: usize,
        positive_boxes: &[XYXY<f32>],
        positive_gt_indexes: &[usize],
        truth: &GroundTruth,
        pooler: &dyn RoiPooler,
        predictor: &dyn MaskPredictor,
    ) -> Result<LossSum> {
        ensure!(
            positive_boxes.len() == positive_gt_indexes.len(),
            "mask head: {} positive boxes but {} matched indexes",
            positive_boxes.len(),
            positive_gt_indexes.len()
        );
        let masks = match truth.masks() {
            Some(masks) if !positive_boxes.is_empty() => masks,
            _ => return Ok(LossSum::zero()),
        };

        let logits = self.predict(features, image_index, positive_boxes, pooler, predictor)?;

        let mut loss = LossSum::zero();
        for (row, rect, &gt_index) in izip!(0.., positive_boxes, positive_gt_indexes) {
            let mask = masks.get(gt_index).ok_or_else(|| {
                format_err!(
                    "mask head: ground truth index {} is out of range",
                    gt_index
                )
            })?;
            let class = truth.labels()[gt_index];
            ensure!(
                class <= self.num_classes,
                "mask head: class {} exceeds the {} foreground classes",
                class,
                self.num_classes
            );
            let target = mask.crop_and_resize(rect, self.resolution);
            let channel = logits.slice(s![row, class, .., ..]);
            loss += BceWithLogitsLoss.forward(channel.iter().cloned(), target.iter().cloned())?;
        }

        Ok(loss)
    }

    /// Attaches binary masks in original image coordinates to detections.
    pub fn forward_eval(
        &self,
        features: &FeaturePyramid,
        image_index: usize,
        image: &ImageRecord,
        detections: Vec<Detection>,
        pooler: &dyn RoiPooler,
        predictor: &dyn MaskPredictor,
    ) -> Result<Vec<Detection>> {
        if detections.is_empty() {
            return Ok(detections);
        }

        let boxes: Vec<_> = detections.iter().map(|det| det.rect).collect();
        let logits = self.predict(features, image_index, &boxes, pooler, predictor)?;
        let transform = image.to_original_transform()?;
        let canvas_size = image.original_size();

        let detections = detections
            .into_iter()
            .enumerate()
            .map(|(row, det)| {
                let probs = logits
                    .slice(s![row, det.class, .., ..])
                    .mapv(sigmoid);
                let rect = det.rect.transform(&transform);
                let mask = paste_mask(probs.view(), &rect, &canvas_size, self.mask_threshold);
                Detection {
                    mask: Some(mask),
                    ..det
                }
            })
            .collect();

        Ok(detections)
    }

    fn predict(
        &self,
        features: &FeaturePyramid,
        image_index: usize,
        boxes: &[XYXY<f32>],
        pooler: &dyn RoiPooler,
        predictor: &dyn MaskPredictor,
    ) -> Result<Array4<f32>> {
        let pooled = pooler.pool(features, image_index, boxes)?;
        ensure_pooled(&pooled, boxes.len(), "mask head")?;
        let logits = predictor.forward(&pooled)?;

        let expect = (
            boxes.len(),
            self.num_classes + 1,
            self.resolution,
            self.resolution,
        );
        ensure!(
            logits.dim() == expect,
            "mask head: expect mask logits of shape {:?}, but get {:?}",
            expect,
            logits.dim()
        );
        Ok(logits)
    }
}
