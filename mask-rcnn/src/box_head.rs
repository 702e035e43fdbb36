//! Proposal classification and class-specific box refinement.

use crate::{
    common::*,
    config::BoxHeadConfig,
    image::{Detection, GroundTruth},
    loss::{softmax, CrossEntropyLoss, LossSum, SmoothL1Loss},
    matcher::{Matcher, MatcherInit},
    model::{ensure_pooled, BoxPredictor, BoxPredictorOutput, FeaturePyramid, RoiPooler},
    rpn::Proposals,
    sampler::{BalancedSampler, BalancedSamplerInit},
};

impl BoxHeadConfig {
    pub fn box_head_init(&self, num_classes: usize) -> BoxHeadInit {
        let Self {
            ref matcher,
            ref sampler,
            box_weights,
            smooth_l1_beta,
            score_threshold,
            nms_threshold,
            detections_per_image,
        } = *self;

        BoxHeadInit {
            num_classes,
            matcher: matcher.matcher_init(),
            sampler: sampler.sampler_init(),
            box_weights: box_weights.map(|weight| weight.raw()),
            smooth_l1_beta: smooth_l1_beta.raw(),
            score_threshold: score_threshold.raw(),
            nms_threshold: nms_threshold.raw(),
            detections_per_image,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BoxHeadInit {
    /// The number of foreground classes.
    pub num_classes: usize,
    pub matcher: MatcherInit,
    pub sampler: BalancedSamplerInit,
    pub box_weights: [f64; 4],
    pub smooth_l1_beta: f64,
    pub score_threshold: f64,
    pub nms_threshold: f64,
    pub detections_per_image: usize,
}

impl BoxHeadInit {
    pub fn build(self) -> Result<BoxHead> {
        let Self {
            num_classes,
            matcher,
            sampler,
            box_weights,
            smooth_l1_beta,
            score_threshold,
            nms_threshold,
            detections_per_image,
        } = self;

        ensure!(num_classes > 0, "num_classes must be positive");
        ensure!(
            (0.0..=1.0).contains(&score_threshold),
            "box head score_threshold must be in range [0, 1]"
        );
        ensure!(
            (0.0..=1.0).contains(&nms_threshold),
            "box head nms_threshold must be in range [0, 1]"
        );
        ensure!(
            detections_per_image > 0,
            "detections_per_image must be positive"
        );

        Ok(BoxHead {
            num_classes,
            matcher: matcher.build()?,
            sampler: sampler.build()?,
            coder: BoxCoderInit {
                weights: box_weights.map(|weight| weight as f32),
                scale_clamp: None,
            }
            .build()?,
            smooth_l1: SmoothL1Loss::new(smooth_l1_beta)?,
            score_threshold: score_threshold as f32,
            nms_threshold: nms_threshold as f32,
            detections_per_image,
        })
    }
}

/// Training results of one image.
#[derive(Debug, Clone, Default)]
pub struct BoxHeadTrainOutput {
    pub cls_loss: LossSum,
    pub box_loss: LossSum,
    /// The number of sampled proposals, the normalizer of both terms.
    pub num_sampled: usize,
    /// Positive proposals passed on to the mask head.
    pub positive_boxes: Vec<XYXY<f32>>,
    /// The ground truth index matched by each positive proposal.
    pub positive_gt_indexes: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxHeadLoss {
    pub cls: f64,
    pub box_reg: f64,
}

impl BoxHeadLoss {
    pub fn from_outputs<'a, I>(outputs: I) -> Self
    where
        I: IntoIterator<Item = &'a BoxHeadTrainOutput>,
    {
        let (cls, box_reg, num_sampled) = outputs.into_iter().fold(
            (LossSum::zero(), LossSum::zero(), 0),
            |(cls, box_reg, num_sampled), output| {
                (
                    cls + output.cls_loss,
                    box_reg + output.box_loss,
                    num_sampled + output.num_sampled,
                )
            },
        );

        Self {
            cls: cls.normalize_by(num_sampled),
            box_reg: box_reg.normalize_by(num_sampled),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BoxHead {
    num_classes: usize,
    matcher: Matcher,
    sampler: BalancedSampler,
    coder: BoxCoder<f32>,
    smooth_l1: SmoothL1Loss,
    score_threshold: f32,
    nms_threshold: f32,
    detections_per_image: usize,
}

impl BoxHead {
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn coder(&self) -> &BoxCoder<f32> {
        &self.coder
    }

    #[allow(clippy::too_many_arguments)]
    pub fn forward_train(
        &self,
        features: &FeaturePyramid,
        image_index: usize,
        proposals: &Proposals,
        truth: &GroundTruth,
        pooler: &dyn RoiPooler,
        predictor: &dyn BoxPredictor,
        rng: &mut StdRng,
    ) -> Result<BoxHeadTrainOutput> {
        let matches = self.matcher.assign(&proposals.boxes, truth.boxes());
        let samples = self.sampler.sample(&matches, rng);
        if samples.is_empty() {
            return Ok(BoxHeadTrainOutput::default());
        }

        let (positive_boxes, positive_gt_indexes): (Vec<_>, Vec<_>) = samples
            .positives
            .iter()
            .map(|&(index, gt_index)| (proposals.boxes[index], gt_index))
            .unzip();
        let sampled_boxes: Vec<_> = chain(
            positive_boxes.iter().cloned(),
            samples
                .negatives
                .iter()
                .map(|&index| proposals.boxes[index]),
        )
        .collect();
        let target_classes: Vec<_> = chain(
            positive_gt_indexes
                .iter()
                .map(|&gt_index| truth.labels()[gt_index]),
            iter::repeat(0).take(samples.negatives.len()),
        )
        .collect();

        let prediction = self.predict(features, image_index, &sampled_boxes, pooler, predictor)?;
        let cls_loss = CrossEntropyLoss
            .forward(prediction.class_logits.view(), &target_classes)
            .context("box head classification")?;

        // only the delta slice of the matched class is regressed
        let box_loss = izip!(0.., &positive_boxes, &positive_gt_indexes)
            .map(|(row, proposal, &gt_index)| {
                let class = truth.labels()[gt_index];
                let delta = self.class_delta(&prediction, row, class);
                let target = self.coder.encode(proposal, &truth.boxes()[gt_index]);
                self.smooth_l1.forward(&delta, &target)
            })
            .sum();

        Ok(BoxHeadTrainOutput {
            cls_loss,
            box_loss,
            num_sampled: samples.len(),
            positive_boxes,
            positive_gt_indexes,
        })
    }

    /// Final detections of one image, without masks, in descending score order.
    pub fn forward_eval(
        &self,
        features: &FeaturePyramid,
        image_index: usize,
        proposals: &Proposals,
        bounds: &HW<f32>,
        pooler: &dyn RoiPooler,
        predictor: &dyn BoxPredictor,
    ) -> Result<Vec<Detection>> {
        if proposals.is_empty() {
            return Ok(vec![]);
        }
        let prediction = self.predict(features, image_index, &proposals.boxes, pooler, predictor)?;

        // candidates grouped by foreground class
        let mut per_class: Vec<(Vec<XYXY<f32>>, Vec<f32>)> = vec![(vec![], vec![]); self.num_classes];

        izip!(0.., &proposals.boxes, prediction.class_logits.outer_iter()).for_each(
            |(row, proposal, logits)| {
                let probs = softmax(logits);
                (1..=self.num_classes).for_each(|class| {
                    let score = probs[class];
                    if score > self.score_threshold {
                        let delta = self.class_delta(&prediction, row, class);
                        let rect = self.coder.decode(proposal, delta).clip_to(bounds);
                        let (boxes, scores) = &mut per_class[class - 1];
                        boxes.push(rect);
                        scores.push(score);
                    }
                });
            },
        );

        let mut detections = vec![];
        for (class_index, (boxes, scores)) in per_class.iter().enumerate() {
            let keep = nms(boxes, scores, self.nms_threshold, None)?;
            detections.extend(keep.into_iter().map(|index| Detection {
                rect: boxes[index],
                class: class_index + 1,
                score: scores[index],
                mask: None,
            }));
        }

        // stable sort keeps lower classes first among equal scores
        detections.sort_by(|lhs, rhs| {
            rhs.score
                .partial_cmp(&lhs.score)
                .unwrap_or(Ordering::Equal)
        });
        detections.truncate(self.detections_per_image);

        Ok(detections)
    }

    fn predict(
        &self,
        features: &FeaturePyramid,
        image_index: usize,
        boxes: &[XYXY<f32>],
        pooler: &dyn RoiPooler,
        predictor: &dyn BoxPredictor,
    ) -> Result<BoxPredictorOutput> {
        let pooled = pooler.pool(features, image_index, boxes)?;
        ensure_pooled(&pooled, boxes.len(), "box head")?;
        let prediction = predictor.forward(&pooled)?;

        let num_entries = self.num_classes + 1;
        ensure!(
            prediction.class_logits.dim() == (boxes.len(), num_entries),
            "box head: expect class logits of shape {:?}, but get {:?}",
            (boxes.len(), num_entries),
            prediction.class_logits.dim()
        );
        ensure!(
            prediction.box_deltas.dim() == (boxes.len(), num_entries * 4),
            "box head: expect box deltas of shape {:?}, but get {:?}",
            (boxes.len(), num_entries * 4),
            prediction.box_deltas.dim()
        );

        Ok(prediction)
    }

    fn class_delta(&self, prediction: &BoxPredictorOutput, row: usize, class: usize) -> [f32; 4] {
        let slice = prediction
            .box_deltas
            .slice(s![row, (class * 4)..(class * 4 + 4)]);
        [slice[0], slice[1], slice[2], slice[3]]
    }
}
