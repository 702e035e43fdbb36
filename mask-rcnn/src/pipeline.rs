//! The two-stage pipeline in training and evaluation mode.

use crate::{
    anchor::AnchorGenerator,
    box_head::{BoxHead, BoxHeadLoss, BoxHeadTrainOutput},
    common::*,
    config::Config,
    image::{Detection, GroundTruth, ImageRecord},
    loss::LossSum,
    mask_head::MaskHead,
    model::{FeaturePyramid, Networks, RpnHeadOutput},
    observer::{Checkpoint, NoopObserver, Observer},
    profiling::{ImageTiming, PassTiming},
    ragged::Ragged,
    rpn::{Rpn, RpnLoss, RpnLossSums},
};

/// The pipeline mode, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Train,
    /// Training that stops after the RPN loss.
    RpnOnly,
    Eval,
}

pub struct MaskRcnnInit {
    pub config: Config,
    pub networks: Networks,
    /// Defaults to [NoopObserver].
    pub observer: Option<Arc<dyn Observer>>,
}

impl MaskRcnnInit {
    pub fn build(self, mode: Mode) -> Result<MaskRcnn> {
        let Self {
            config,
            networks,
            observer,
        } = self;
        let Config {
            num_classes,
            seed,
            ref anchor,
            ref rpn,
            ref box_head,
            ref mask_head,
        } = config;

        ensure!(num_classes > 0, "num_classes must be positive");

        let stages = Stages {
            num_classes,
            seed,
            anchor_generator: anchor
                .anchor_generator_init()
                .build()
                .context("invalid anchor config")?,
            rpn: rpn.rpn_init().build().context("invalid rpn config")?,
            box_head: box_head
                .box_head_init(num_classes)
                .build()
                .context("invalid box head config")?,
            mask_head: mask_head
                .mask_head_init(num_classes)
                .build()
                .context("invalid mask head config")?,
            networks,
            observer: observer.unwrap_or_else(|| Arc::new(NoopObserver)),
        };

        info!("built the pipeline in {:?} mode", mode);

        let pipeline = match mode {
            Mode::Train => MaskRcnn::Train(TrainGraph {
                stages,
                rpn_only: false,
            }),
            Mode::RpnOnly => MaskRcnn::Train(TrainGraph {
                stages,
                rpn_only: true,
            }),
            Mode::Eval => MaskRcnn::Eval(EvalGraph { stages }),
        };
        Ok(pipeline)
    }
}

#[derive(Debug)]
pub enum MaskRcnn {
    Train(TrainGraph),
    Eval(EvalGraph),
}

impl MaskRcnn {
    pub fn mode(&self) -> Mode {
        match self {
            Self::Train(graph) if graph.rpn_only => Mode::RpnOnly,
            Self::Train(_) => Mode::Train,
            Self::Eval(_) => Mode::Eval,
        }
    }

    pub fn into_train(self) -> Result<TrainGraph> {
        match self {
            Self::Train(graph) => Ok(graph),
            Self::Eval(_) => bail!("the pipeline was built in eval mode"),
        }
    }

    pub fn into_eval(self) -> Result<EvalGraph> {
        match self {
            Self::Eval(graph) => Ok(graph),
            Self::Train(_) => bail!("the pipeline was built in training mode"),
        }
    }
}

/// Components shared by both graphs.
struct Stages {
    num_classes: usize,
    seed: u64,
    anchor_generator: AnchorGenerator,
    rpn: Rpn,
    box_head: BoxHead,
    mask_head: MaskHead,
    networks: Networks,
    observer: Arc<dyn Observer>,
}

impl Debug for Stages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stages")
            .field("num_classes", &self.num_classes)
            .field("seed", &self.seed)
            .field("anchor_generator", &self.anchor_generator)
            .field("rpn", &self.rpn)
            .field("box_head", &self.box_head)
            .field("mask_head", &self.mask_head)
            .finish_non_exhaustive()
    }
}

impl Stages {
    /// Runs the shared backbone, RPN head and anchor generator.
    fn features(
        &self,
        images: &[ImageRecord],
        timing: &mut PassTiming,
    ) -> Result<(FeaturePyramid, Vec<RpnHeadOutput>, Ragged<XYXY<f32>>)> {
        ensure!(!images.is_empty(), "the image batch must not be empty");

        let features = self.networks.backbone.forward(images)?;
        ensure!(
            features.batch_size() == images.len(),
            "backbone: expect a batch of {} images, but get {}",
            images.len(),
            features.batch_size()
        );
        timing.record("backbone");

        let outputs = self.networks.rpn_head.forward(&features)?;
        ensure!(
            outputs.len() == images.len(),
            "rpn head: expect {} outputs, but get {}",
            images.len(),
            outputs.len()
        );
        timing.record("rpn_head");

        let anchors = self.anchor_generator.generate_pyramid(&features)?;
        timing.record("anchors");

        Ok((features, outputs, anchors))
    }

    fn image_rng(&self, seed: u64, image_index: usize) -> StdRng {
        let mixed = seed ^ (image_index as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        StdRng::seed_from_u64(mixed)
    }

    /// Marks a checkpoint of one image in its timings and reports it to the
    /// observer.
    fn reach(&self, timing: &mut ImageTiming, checkpoint: Checkpoint<'_>) {
        timing.record(checkpoint.name());
        self.observer.observe(timing.image_index(), checkpoint);
    }
}

/// Batch-averaged training losses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainOutput {
    pub rpn_cls_loss: f64,
    pub rpn_box_loss: f64,
    /// Absent in RPN-only mode, like the other head losses.
    pub cls_loss: Option<f64>,
    pub box_loss: Option<f64>,
    pub mask_loss: Option<f64>,
}

impl TrainOutput {
    /// The sum of all present losses.
    pub fn total(&self) -> f64 {
        self.rpn_cls_loss
            + self.rpn_box_loss
            + self.cls_loss.unwrap_or(0.0)
            + self.box_loss.unwrap_or(0.0)
            + self.mask_loss.unwrap_or(0.0)
    }
}

struct ImageLosses {
    rpn: RpnLossSums,
    heads: Option<(BoxHeadTrainOutput, LossSum)>,
}

#[derive(Debug)]
pub struct TrainGraph {
    stages: Stages,
    rpn_only: bool,
}

impl TrainGraph {
    pub fn rpn_only(&self) -> bool {
        self.rpn_only
    }

    /// Computes the losses of a batch. The sampling seed falls back to the
    /// configured one.
    pub fn forward(
        &self,
        images: &[ImageRecord],
        targets: &[GroundTruth],
        seed: Option<u64>,
    ) -> Result<TrainOutput> {
        let stages = &self.stages;
        let seed = seed.unwrap_or(stages.seed);
        let mut timing = PassTiming::new("train_forward");

        ensure!(
            images.len() == targets.len(),
            "expect one ground truth per image, but get {} images and {} ground truths",
            images.len(),
            targets.len()
        );
        targets
            .iter()
            .try_for_each(|truth| truth.ensure_classes(stages.num_classes))?;

        let (features, outputs, anchors) = stages.features(images, &mut timing)?;

        let (losses, image_timings): (Vec<ImageLosses>, Vec<ImageTiming>) = (0..images.len())
            .into_par_iter()
            .map(|index| {
                self.forward_image(
                    index,
                    &images[index],
                    &targets[index],
                    &features,
                    &outputs[index],
                    &anchors,
                    seed,
                )
                .with_context(|| format!("training pass failed on image {}", index))
            })
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .unzip();
        timing.record("per_image");
        timing.extend_images(image_timings);

        let rpn_loss = RpnLoss::from_sums(losses.iter().map(|losses| &losses.rpn));
        let output = if self.rpn_only {
            TrainOutput {
                rpn_cls_loss: rpn_loss.objectness,
                rpn_box_loss: rpn_loss.box_reg,
                cls_loss: None,
                box_loss: None,
                mask_loss: None,
            }
        } else {
            let box_loss = BoxHeadLoss::from_outputs(
                losses
                    .iter()
                    .filter_map(|losses| losses.heads.as_ref().map(|(output, _)| output)),
            );
            let mask_loss: LossSum = losses
                .iter()
                .filter_map(|losses| losses.heads.as_ref().map(|(_, mask)| *mask))
                .sum();

            TrainOutput {
                rpn_cls_loss: rpn_loss.objectness,
                rpn_box_loss: rpn_loss.box_reg,
                cls_loss: Some(box_loss.cls),
                box_loss: Some(box_loss.box_reg),
                mask_loss: Some(mask_loss.mean()),
            }
        };
        timing.report();

        debug!("training losses {:?}", output);
        Ok(output)
    }

    #[allow(clippy::too_many_arguments)]
    fn forward_image(
        &self,
        index: usize,
        image: &ImageRecord,
        truth: &GroundTruth,
        features: &FeaturePyramid,
        output: &RpnHeadOutput,
        anchors: &Ragged<XYXY<f32>>,
        seed: u64,
    ) -> Result<(ImageLosses, ImageTiming)> {
        let stages = &self.stages;
        let Stages {
            rpn,
            box_head,
            mask_head,
            networks,
            ..
        } = stages;
        let mut timing = ImageTiming::start(index);
        let mut rng = stages.image_rng(seed, index);

        stages.reach(&mut timing, Checkpoint::Anchors(anchors));
        let rpn_sums = rpn.loss(anchors, output, truth, &mut rng)?;
        stages.reach(&mut timing, Checkpoint::RpnLoss(&rpn_sums));

        // proposals only feed the heads
        if self.rpn_only {
            let losses = ImageLosses {
                rpn: rpn_sums,
                heads: None,
            };
            return Ok((losses, timing));
        }

        let proposals = rpn.train_proposals(anchors, output, &image.bounds(), truth)?;
        stages.reach(&mut timing, Checkpoint::Proposals(&proposals));

        let box_output = box_head.forward_train(
            features,
            index,
            &proposals,
            truth,
            networks.box_pooler.as_ref(),
            networks.box_predictor.as_ref(),
            &mut rng,
        )?;
        stages.reach(&mut timing, Checkpoint::BoxSamples(&box_output));

        let mask_loss = mask_head.forward_train(
            features,
            index,
            &box_output.positive_boxes,
            &box_output.positive_gt_indexes,
            truth,
            networks.mask_pooler.as_ref(),
            networks.mask_predictor.as_ref(),
        )?;
        stages.reach(&mut timing, Checkpoint::MaskLoss(&mask_loss));

        let losses = ImageLosses {
            rpn: rpn_sums,
            heads: Some((box_output, mask_loss)),
        };
        Ok((losses, timing))
    }
}

#[derive(Debug)]
pub struct EvalGraph {
    stages: Stages,
}

impl EvalGraph {
    /// Detects objects on a batch. The output is parallel to `images`.
    pub fn forward(&self, images: &[ImageRecord]) -> Result<Vec<Vec<Detection>>> {
        let stages = &self.stages;
        let mut timing = PassTiming::new("eval_forward");

        let (features, outputs, anchors) = stages.features(images, &mut timing)?;

        let (detections, image_timings): (Vec<_>, Vec<_>) = (0..images.len())
            .into_par_iter()
            .map(|index| {
                self.forward_image(index, &images[index], &features, &outputs[index], &anchors)
                    .with_context(|| format!("evaluation pass failed on image {}", index))
            })
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .unzip();
        timing.record("per_image");
        timing.extend_images(image_timings);
        timing.report();

        debug!(
            "detections per image {:?}",
            detections.iter().map(|dets| dets.len()).collect::<Vec<_>>()
        );
        Ok(detections)
    }

    fn forward_image(
        &self,
        index: usize,
        image: &ImageRecord,
        features: &FeaturePyramid,
        output: &RpnHeadOutput,
        anchors: &Ragged<XYXY<f32>>,
    ) -> Result<(Vec<Detection>, ImageTiming)> {
        let stages = &self.stages;
        let Stages {
            rpn,
            box_head,
            mask_head,
            networks,
            ..
        } = stages;
        let mut timing = ImageTiming::start(index);
        let bounds = image.bounds();

        stages.reach(&mut timing, Checkpoint::Anchors(anchors));
        let proposals = rpn.forward_eval(anchors, output, &bounds)?;
        stages.reach(&mut timing, Checkpoint::Proposals(&proposals));

        let detections = box_head.forward_eval(
            features,
            index,
            &proposals,
            &bounds,
            networks.box_pooler.as_ref(),
            networks.box_predictor.as_ref(),
        )?;
        let detections = mask_head.forward_eval(
            features,
            index,
            image,
            detections,
            networks.mask_pooler.as_ref(),
            networks.mask_predictor.as_ref(),
        )?;
        stages.reach(&mut timing, Checkpoint::Detections(&detections));

        Ok((detections, timing))
    }
}
