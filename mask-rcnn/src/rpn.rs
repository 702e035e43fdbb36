//! The region proposal stage.

use crate::{
    common::*,
    config::{ProposalCaps, RpnConfig},
    image::GroundTruth,
    loss::{sigmoid, BceWithLogitsLoss, LossSum, SmoothL1Loss},
    matcher::{Matcher, MatcherInit, Matches},
    model::RpnHeadOutput,
    ragged::Ragged,
    sampler::{BalancedSampler, BalancedSamplerInit},
};

impl RpnConfig {
    pub fn rpn_init(&self) -> RpnInit {
        let Self {
            ref matcher,
            ref sampler,
            ref train,
            ref eval,
            nms_threshold,
            min_size,
            box_weights,
            smooth_l1_beta,
            add_gt_proposals,
        } = *self;

        RpnInit {
            matcher: matcher.matcher_init(),
            sampler: sampler.sampler_init(),
            train: train.clone(),
            eval: eval.clone(),
            nms_threshold: nms_threshold.raw(),
            min_size: min_size.raw(),
            box_weights: box_weights.map(|weight| weight.raw()),
            smooth_l1_beta: smooth_l1_beta.raw(),
            add_gt_proposals,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RpnInit {
    pub matcher: MatcherInit,
    pub sampler: BalancedSamplerInit,
    pub train: ProposalCaps,
    pub eval: ProposalCaps,
    pub nms_threshold: f64,
    pub min_size: f64,
    pub box_weights: [f64; 4],
    pub smooth_l1_beta: f64,
    pub add_gt_proposals: bool,
}

impl RpnInit {
    pub fn build(self) -> Result<Rpn> {
        let Self {
            matcher,
            sampler,
            train,
            eval,
            nms_threshold,
            min_size,
            box_weights,
            smooth_l1_beta,
            add_gt_proposals,
        } = self;

        for (name, caps) in [("train", &train), ("eval", &eval)] {
            ensure!(
                caps.pre_nms_top_n > 0 && caps.post_nms_top_n > 0,
                "rpn {} proposal caps must be positive",
                name
            );
        }
        ensure!(
            (0.0..=1.0).contains(&nms_threshold),
            "rpn nms_threshold must be in range [0, 1]"
        );
        ensure!(
            min_size.is_finite() && min_size >= 0.0,
            "rpn min_size must be non-negative"
        );

        Ok(Rpn {
            matcher: matcher.build()?,
            sampler: sampler.build()?,
            coder: BoxCoderInit {
                weights: box_weights.map(|weight| weight as f32),
                scale_clamp: None,
            }
            .build()?,
            smooth_l1: SmoothL1Loss::new(smooth_l1_beta)?,
            train,
            eval,
            nms_threshold: nms_threshold as f32,
            min_size: min_size as f32,
            add_gt_proposals,
        })
    }
}

/// Ranked proposal boxes of one image.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Proposals {
    pub boxes: Vec<XYXY<f32>>,
    /// Objectness probabilities parallel to `boxes`.
    pub scores: Vec<f32>,
}

impl Proposals {
    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }
}

/// Unnormalized RPN loss terms of one image.
#[derive(Debug, Clone, Default)]
pub struct RpnLossSums {
    pub objectness: LossSum,
    pub box_reg: LossSum,
    /// The number of sampled anchors, the normalizer of both terms.
    pub num_sampled: usize,
    pub num_positives: usize,
}

/// Batch-normalized RPN losses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RpnLoss {
    pub objectness: f64,
    pub box_reg: f64,
}

impl RpnLoss {
    /// Sums per-image terms and divides by the batch-wide sample count.
    pub fn from_sums<'a, I>(sums: I) -> Self
    where
        I: IntoIterator<Item = &'a RpnLossSums>,
    {
        let (objectness, box_reg, num_sampled) = sums.into_iter().fold(
            (LossSum::zero(), LossSum::zero(), 0),
            |(objectness, box_reg, num_sampled), sums| {
                (
                    objectness + sums.objectness,
                    box_reg + sums.box_reg,
                    num_sampled + sums.num_sampled,
                )
            },
        );

        Self {
            objectness: objectness.normalize_by(num_sampled),
            box_reg: box_reg.normalize_by(num_sampled),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Rpn {
    matcher: Matcher,
    sampler: BalancedSampler,
    coder: BoxCoder<f32>,
    smooth_l1: SmoothL1Loss,
    train: ProposalCaps,
    eval: ProposalCaps,
    nms_threshold: f32,
    min_size: f32,
    add_gt_proposals: bool,
}

impl Rpn {
    pub fn coder(&self) -> &BoxCoder<f32> {
        &self.coder
    }

    /// Proposals and loss terms for one training image.
    pub fn forward_train(
        &self,
        anchors: &Ragged<XYXY<f32>>,
        output: &RpnHeadOutput,
        bounds: &HW<f32>,
        truth: &GroundTruth,
        rng: &mut StdRng,
    ) -> Result<(Proposals, RpnLossSums)> {
        let loss = self.loss(anchors, output, truth, rng)?;
        let proposals = self.train_proposals(anchors, output, bounds, truth)?;
        Ok((proposals, loss))
    }

    /// Loss terms of one training image, without proposal selection.
    pub fn loss(
        &self,
        anchors: &Ragged<XYXY<f32>>,
        output: &RpnHeadOutput,
        truth: &GroundTruth,
        rng: &mut StdRng,
    ) -> Result<RpnLossSums> {
        Self::check_output(anchors, output)?;
        let anchors = anchors.flat();

        let matches = self.assign_anchors(anchors, truth);
        let samples = self.sampler.sample(&matches, rng);
        let logits = output.objectness.flat();
        let deltas = output.deltas.flat();

        let objectness = BceWithLogitsLoss.forward(
            chain(
                samples.positives.iter().map(|&(index, _)| logits[index]),
                samples.negatives.iter().map(|&index| logits[index]),
            ),
            chain(
                iter::repeat(1.0).take(samples.positives.len()),
                iter::repeat(0.0).take(samples.negatives.len()),
            ),
        )?;

        let box_reg = samples
            .positives
            .iter()
            .map(|&(index, gt_index)| {
                let target = self.coder.encode(&anchors[index], &truth.boxes()[gt_index]);
                self.smooth_l1.forward(&deltas[index], &target)
            })
            .sum();

        Ok(RpnLossSums {
            objectness,
            box_reg,
            num_sampled: samples.len(),
            num_positives: samples.positives.len(),
        })
    }

    /// Proposals of one training image under the training caps, followed by
    /// the ground truth boxes when enabled.
    pub fn train_proposals(
        &self,
        anchors: &Ragged<XYXY<f32>>,
        output: &RpnHeadOutput,
        bounds: &HW<f32>,
        truth: &GroundTruth,
    ) -> Result<Proposals> {
        Self::check_output(anchors, output)?;

        let mut proposals = self.select_proposals(anchors, output, bounds, &self.train)?;
        if self.add_gt_proposals {
            proposals.boxes.extend(truth.boxes().iter().cloned());
            proposals
                .scores
                .extend(iter::repeat(1.0).take(truth.len()));
        }
        Ok(proposals)
    }

    /// Proposals for one evaluation image.
    pub fn forward_eval(
        &self,
        anchors: &Ragged<XYXY<f32>>,
        output: &RpnHeadOutput,
        bounds: &HW<f32>,
    ) -> Result<Proposals> {
        Self::check_output(anchors, output)?;
        self.select_proposals(anchors, output, bounds, &self.eval)
    }

    /// Labels the anchors of one image against its ground truth.
    pub fn assign_anchors(&self, anchors: &[XYXY<f32>], truth: &GroundTruth) -> Matches {
        self.matcher.assign(anchors, truth.boxes())
    }

    /// Encoded regression targets of positive anchors as
    /// `(anchor index, delta)` pairs.
    pub fn regression_targets(
        &self,
        anchors: &[XYXY<f32>],
        truth: &GroundTruth,
        matches: &Matches,
    ) -> Vec<(usize, [f32; 4])> {
        matches
            .positives()
            .map(|(index, gt_index)| {
                let target = self.coder.encode(&anchors[index], &truth.boxes()[gt_index]);
                (index, target)
            })
            .collect()
    }

    fn check_output(anchors: &Ragged<XYXY<f32>>, output: &RpnHeadOutput) -> Result<()> {
        anchors.ensure_same_layout(&output.objectness, "rpn objectness vs anchors")?;
        anchors.ensure_same_layout(&output.deltas, "rpn deltas vs anchors")?;
        Ok(())
    }

    fn select_proposals(
        &self,
        anchors: &Ragged<XYXY<f32>>,
        output: &RpnHeadOutput,
        bounds: &HW<f32>,
        caps: &ProposalCaps,
    ) -> Result<Proposals> {
        let candidates: Vec<_> = izip!(
            anchors.iter(),
            output.objectness.iter(),
            output.deltas.iter()
        )
        .flat_map(|(anchors, logits, deltas)| {
            // top-k per level, NaN logits never become proposals
            argsort_descending(logits)
                .into_iter()
                .filter(move |&index| !logits[index].is_nan())
                .take(caps.pre_nms_top_n)
                .map(move |index| {
                    let rect = self
                        .coder
                        .decode(&anchors[index], deltas[index])
                        .clip_to(bounds);
                    (rect, logits[index])
                })
        })
        .filter(|(rect, _)| rect.w() >= self.min_size && rect.h() >= self.min_size)
        .collect();

        let (boxes, logits): (Vec<_>, Vec<_>) = candidates.into_iter().unzip();
        let keep = nms(
            &boxes,
            &logits,
            self.nms_threshold,
            Some(caps.post_nms_top_n),
        )?;

        let proposals = Proposals {
            boxes: keep.iter().map(|&index| boxes[index]).collect(),
            scores: keep.iter().map(|&index| sigmoid(logits[index])).collect(),
        };
        Ok(proposals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, matcher::MatchLabel};

    fn rpn() -> Rpn {
        let mut config = Config::default().rpn;
        config.train.pre_nms_top_n = 3;
        config.train.post_nms_top_n = 2;
        config.rpn_init().build().unwrap()
    }

    fn anchors() -> Ragged<XYXY<f32>> {
        vec![
            vec![
                XYXY::from_xyxy([0.0, 0.0, 16.0, 16.0]),
                XYXY::from_xyxy([1.0, 1.0, 17.0, 17.0]),
                XYXY::from_xyxy([32.0, 32.0, 48.0, 48.0]),
                XYXY::from_xyxy([40.0, 0.0, 56.0, 16.0]),
            ],
            vec![XYXY::from_xyxy([0.0, 0.0, 64.0, 64.0])],
        ]
        .into_iter()
        .collect()
    }

    fn output(logits: Vec<f32>) -> RpnHeadOutput {
        let anchors = anchors();
        let objectness = Ragged::from_lengths(logits, &anchors.lengths()).unwrap();
        let deltas = anchors.map(|_| [0.0; 4]);
        RpnHeadOutput { objectness, deltas }
    }

    #[test]
    fn rpn_selects_top_proposals() -> Result<()> {
        let rpn = rpn();
        let bounds = HW::from_hw([64.0, 64.0]);
        let output = output(vec![3.0, 2.5, 1.0, -1.0, 0.5]);
        let mut rng = StdRng::seed_from_u64(0);
        let (proposals, _) =
            rpn.forward_train(&anchors(), &output, &bounds, &GroundTruth::empty(), &mut rng)?;

        // the overlapping second box is suppressed and the cap keeps two
        assert_eq!(proposals.len(), 2);
        assert_eq!(proposals.boxes[0].xyxy(), [0.0, 0.0, 16.0, 16.0]);
        assert_eq!(proposals.boxes[1].xyxy(), [32.0, 32.0, 48.0, 48.0]);
        assert!(proposals.scores[0] > proposals.scores[1]);
        Ok(())
    }

    #[test]
    fn rpn_appends_ground_truth() -> Result<()> {
        let rpn = rpn();
        let bounds = HW::from_hw([64.0, 64.0]);
        let output = output(vec![0.0; 5]);
        let truth = GroundTruth::new(vec![XYXY::from_xyxy([4.0, 4.0, 20.0, 20.0])], vec![1], None)?;
        let mut rng = StdRng::seed_from_u64(0);
        let (proposals, loss) = rpn.forward_train(&anchors(), &output, &bounds, &truth, &mut rng)?;
        assert_eq!(proposals.boxes.last(), truth.boxes().last());
        assert!(loss.num_positives >= 1);
        assert_eq!(loss.objectness.count, loss.num_sampled);
        Ok(())
    }

    #[test]
    fn rpn_empty_truth_is_all_negative() -> Result<()> {
        let rpn = rpn();
        let bounds = HW::from_hw([64.0, 64.0]);
        let output = output(vec![0.0; 5]);
        let mut rng = StdRng::seed_from_u64(0);
        let (_, loss) =
            rpn.forward_train(&anchors(), &output, &bounds, &GroundTruth::empty(), &mut rng)?;
        assert_eq!(loss.num_positives, 0);
        assert_eq!(loss.num_sampled, 5);
        assert_eq!(loss.box_reg, LossSum::zero());

        let loss = RpnLoss::from_sums(&[loss]);
        approx::assert_abs_diff_eq!(loss.objectness, 2f64.ln(), epsilon = 1e-9);
        Ok(())
    }

    #[test]
    fn rpn_rejects_misaligned_output() {
        let rpn = rpn();
        let bounds = HW::from_hw([64.0, 64.0]);
        let output = RpnHeadOutput {
            objectness: Ragged::from_lengths(vec![0.0; 5], &[5, 0]).unwrap(),
            deltas: anchors().map(|_| [0.0; 4]),
        };
        assert!(rpn.forward_eval(&anchors(), &output, &bounds).is_err());
    }

    #[test]
    fn rpn_drops_nan_objectness() -> Result<()> {
        let rpn = rpn();
        let bounds = HW::from_hw([64.0, 64.0]);
        let output = output(vec![f32::NAN, 1.0, 0.5, -1.0, 0.0]);
        let proposals = rpn.forward_eval(&anchors(), &output, &bounds)?;

        assert_eq!(proposals.len(), 4);
        assert!(proposals.scores.iter().all(|score| score.is_finite()));
        assert!(proposals
            .boxes
            .iter()
            .all(|rect| rect.xyxy() != [0.0, 0.0, 16.0, 16.0]));
        Ok(())
    }

    #[test]
    fn rpn_loss_normalizes_by_sampled_anchors() -> Result<()> {
        let mut config = Config::default().rpn;
        config.sampler.batch_size_per_image = 4;
        let rpn = config.rpn_init().build()?;

        let anchors: Ragged<XYXY<f32>> = vec![vec![
            // exact match
            XYXY::from_xyxy([0.0, 0.0, 16.0, 16.0]),
            // IoU 0.5, inside the ignore band
            XYXY::from_xyxy([0.0, 0.0, 16.0, 32.0]),
            XYXY::from_xyxy([32.0, 32.0, 48.0, 48.0]),
            XYXY::from_xyxy([40.0, 0.0, 56.0, 16.0]),
            XYXY::from_xyxy([0.0, 40.0, 16.0, 56.0]),
            XYXY::from_xyxy([48.0, 48.0, 64.0, 64.0]),
        ]]
        .into_iter()
        .collect();
        let output = RpnHeadOutput {
            objectness: Ragged::from_lengths(vec![0.0, 100.0, 0.0, 0.0, 0.0, 0.0], &[6])?,
            deltas: Ragged::from_lengths(
                vec![
                    [1.0, 0.0, 0.0, 0.0],
                    [5.0; 4],
                    [0.0; 4],
                    [0.0; 4],
                    [0.0; 4],
                    [0.0; 4],
                ],
                &[6],
            )?,
        };
        let truth = GroundTruth::new(vec![XYXY::from_xyxy([0.0, 0.0, 16.0, 16.0])], vec![1], None)?;

        let matches = rpn.assign_anchors(anchors.flat(), &truth);
        assert_eq!(matches.labels()[1], MatchLabel::Ignore);

        let mut rng = StdRng::seed_from_u64(5);
        let sums = rpn.loss(&anchors, &output, &truth, &mut rng)?;
        assert_eq!(sums.num_positives, 1);
        assert_eq!(sums.num_sampled, 4);
        assert_eq!(sums.objectness.count, 4);

        // the ignored anchor adds neither its large logit nor its deltas
        approx::assert_abs_diff_eq!(sums.objectness.total, 4.0 * 2f64.ln(), epsilon = 1e-9);
        approx::assert_abs_diff_eq!(sums.box_reg.total, 1.0 - 0.5 / 9.0, epsilon = 1e-6);

        let loss = RpnLoss::from_sums(&[sums]);
        approx::assert_abs_diff_eq!(loss.objectness, 2f64.ln(), epsilon = 1e-9);
        approx::assert_abs_diff_eq!(loss.box_reg, (1.0 - 0.5 / 9.0) / 4.0, epsilon = 1e-6);
        Ok(())
    }
}
