//! Interfaces to the numerical engine that runs the learnable parts.
//!
//! The pipeline only reads shapes and values from these collaborators. How
//! the convolutions, ROI pooling and gradients are computed is up to the
//! implementation behind the traits.

use crate::{common::*, image::ImageRecord, ragged::Ragged};

/// One level of the feature pyramid.
#[derive(Debug, Clone, Getters, CopyGetters)]
pub struct FeatureMap {
    /// The stride relative to the input image.
    #[getset(get_copy = "pub")]
    stride: usize,
    /// Features in NCHW layout.
    #[getset(get = "pub")]
    data: Array4<f32>,
}

impl FeatureMap {
    pub fn new(stride: usize, data: Array4<f32>) -> Result<Self> {
        ensure!(stride > 0, "feature map stride must be positive");
        Ok(Self { stride, data })
    }

    pub fn batch_size(&self) -> usize {
        self.data.dim().0
    }

    /// The spatial shape `[h, w]`.
    pub fn shape(&self) -> [usize; 2] {
        let (_, _, h, w) = self.data.dim();
        [h, w]
    }
}

/// Backbone output ordered from the finest to the coarsest level.
#[derive(Debug, Clone)]
pub struct FeaturePyramid {
    levels: Vec<FeatureMap>,
}

impl FeaturePyramid {
    pub fn new(levels: Vec<FeatureMap>) -> Result<Self> {
        ensure!(!levels.is_empty(), "feature pyramid must have levels");
        let batch_size = levels[0].batch_size();
        ensure!(
            levels.iter().all(|level| level.batch_size() == batch_size),
            "feature pyramid levels disagree on the batch size"
        );
        Ok(Self { levels })
    }

    pub fn levels(&self) -> &[FeatureMap] {
        &self.levels
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn batch_size(&self) -> usize {
        self.levels[0].batch_size()
    }

    pub fn strides(&self) -> Vec<usize> {
        self.levels.iter().map(|level| level.stride()).collect()
    }

    pub fn shapes(&self) -> Vec<[usize; 2]> {
        self.levels.iter().map(|level| level.shape()).collect()
    }
}

/// Per-image region proposal network predictions, grouped by level.
#[derive(Debug, Clone)]
pub struct RpnHeadOutput {
    /// Objectness logits, one per anchor.
    pub objectness: Ragged<f32>,
    /// Box deltas, one per anchor.
    pub deltas: Ragged<[f32; 4]>,
}

/// Box predictor output for `N` pooled boxes and `C + 1` classes.
#[derive(Debug, Clone)]
pub struct BoxPredictorOutput {
    /// `[N, C + 1]` class logits, background first.
    pub class_logits: Array2<f32>,
    /// `[N, 4 * (C + 1)]` class-specific box deltas.
    pub box_deltas: Array2<f32>,
}

/// The convolutional feature extractor.
pub trait Backbone: Send + Sync {
    fn forward(&self, images: &[ImageRecord]) -> Result<FeaturePyramid>;
}

/// The convolutional objectness and box-delta head on top of the pyramid.
pub trait RpnHead: Send + Sync {
    fn forward(&self, features: &FeaturePyramid) -> Result<Vec<RpnHeadOutput>>;
}

/// Pools a fixed-size feature patch for each box of one image.
pub trait RoiPooler: Send + Sync {
    /// Returns `[boxes.len(), C, pool_h, pool_w]` features.
    fn pool(
        &self,
        features: &FeaturePyramid,
        image_index: usize,
        boxes: &[XYXY<f32>],
    ) -> Result<Array4<f32>>;
}

pub trait BoxPredictor: Send + Sync {
    fn forward(&self, pooled: &Array4<f32>) -> Result<BoxPredictorOutput>;
}

pub trait MaskPredictor: Send + Sync {
    /// Returns `[N, C + 1, M, M]` mask logits.
    fn forward(&self, pooled: &Array4<f32>) -> Result<Array4<f32>>;
}

/// The learnable collaborators of one pipeline.
pub struct Networks {
    pub backbone: Box<dyn Backbone>,
    pub rpn_head: Box<dyn RpnHead>,
    pub box_pooler: Box<dyn RoiPooler>,
    pub mask_pooler: Box<dyn RoiPooler>,
    pub box_predictor: Box<dyn BoxPredictor>,
    pub mask_predictor: Box<dyn MaskPredictor>,
}

impl Debug for Networks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Networks").finish_non_exhaustive()
    }
}

/// Checks the pooler output against the boxes it was asked for.
pub(crate) fn ensure_pooled(pooled: &Array4<f32>, num_boxes: usize, stage: &str) -> Result<()> {
    ensure!(
        pooled.dim().0 == num_boxes,
        "{}: the ROI pooler returned {} patches for {} boxes",
        stage,
        pooled.dim().0,
        num_boxes
    );
    Ok(())
}
