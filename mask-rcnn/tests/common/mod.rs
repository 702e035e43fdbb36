#![allow(dead_code)]

use anyhow::Result;
use mask_rcnn::{
    anchor::AnchorGenerator,
    bbox::{prelude::*, HW, XYXY},
    config::Config,
    image::{GroundTruth, ImageRecord, ImageRecordInit, SegmentationMask},
    model::{
        Backbone, BoxPredictor, BoxPredictorOutput, FeatureMap, FeaturePyramid, MaskPredictor,
        Networks, RoiPooler, RpnHead, RpnHeadOutput,
    },
    ragged::Ragged,
};
use ndarray::{s, Array1, Array2, Array3, Array4};
use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

lazy_static::lazy_static! {
    pub static ref CONFIG_DIR: PathBuf = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("cfg");
}

pub fn init_logger() {
    let _ = pretty_env_logger::try_init();
}

pub fn load_config(file_name: &str) -> Result<Config> {
    Config::open(CONFIG_DIR.join(file_name))
}

/// Zero features on the canonical grid, or on a fixed grid when given.
pub struct MockBackbone {
    pub strides: Vec<usize>,
    pub grid: Option<[usize; 2]>,
}

impl Backbone for MockBackbone {
    fn forward(&self, images: &[ImageRecord]) -> Result<FeaturePyramid> {
        let (height, width, _) = images[0].pixels().dim();
        let levels = self
            .strides
            .iter()
            .map(|&stride| {
                let [grid_h, grid_w] = match self.grid {
                    Some(grid) => grid,
                    None => AnchorGenerator::grid_size(&HW::from_hw([height, width]), stride)?,
                };
                FeatureMap::new(stride, Array4::zeros((images.len(), 1, grid_h, grid_w)))
            })
            .collect::<Result<Vec<_>>>()?;
        FeaturePyramid::new(levels)
    }
}

/// Constant objectness and zero deltas for every anchor.
pub struct MockRpnHead {
    pub anchors_per_location: usize,
    pub objectness: f32,
}

impl RpnHead for MockRpnHead {
    fn forward(&self, features: &FeaturePyramid) -> Result<Vec<RpnHeadOutput>> {
        let lengths: Vec<_> = features
            .shapes()
            .into_iter()
            .map(|[h, w]| h * w * self.anchors_per_location)
            .collect();
        let total: usize = lengths.iter().sum();

        (0..features.batch_size())
            .map(|_| {
                Ok(RpnHeadOutput {
                    objectness: Ragged::from_lengths(vec![self.objectness; total], &lengths)?,
                    deltas: Ragged::from_lengths(vec![[0.0; 4]; total], &lengths)?,
                })
            })
            .collect()
    }
}

/// Pools one zero value per box and counts its calls.
pub struct CountingPooler {
    pub calls: Arc<AtomicUsize>,
}

impl RoiPooler for CountingPooler {
    fn pool(
        &self,
        _features: &FeaturePyramid,
        _image_index: usize,
        boxes: &[XYXY<f32>],
    ) -> Result<Array4<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Array4::zeros((boxes.len(), 1, 1, 1)))
    }
}

/// The same class logits and zero deltas for every box.
pub struct FixedBoxPredictor {
    pub logits: Vec<f32>,
}

impl BoxPredictor for FixedBoxPredictor {
    fn forward(&self, pooled: &Array4<f32>) -> Result<BoxPredictorOutput> {
        let num_boxes = pooled.dim().0;
        let num_entries = self.logits.len();
        let row = Array1::from(self.logits.clone());
        let mut class_logits = Array2::zeros((num_boxes, num_entries));
        class_logits
            .rows_mut()
            .into_iter()
            .for_each(|mut logits| logits.assign(&row));
        Ok(BoxPredictorOutput {
            class_logits,
            box_deltas: Array2::zeros((num_boxes, num_entries * 4)),
        })
    }
}

pub struct ConstMaskPredictor {
    pub num_classes: usize,
    pub resolution: usize,
    pub logit: f32,
}

impl MaskPredictor for ConstMaskPredictor {
    fn forward(&self, pooled: &Array4<f32>) -> Result<Array4<f32>> {
        Ok(Array4::from_elem(
            (
                pooled.dim().0,
                self.num_classes + 1,
                self.resolution,
                self.resolution,
            ),
            self.logit,
        ))
    }
}

pub struct MockOptions {
    pub grid: Option<[usize; 2]>,
    pub box_logits: Vec<f32>,
    pub mask_logit: f32,
    pub pool_calls: Arc<AtomicUsize>,
}

pub fn networks(config: &Config, options: MockOptions) -> Networks {
    let MockOptions {
        grid,
        box_logits,
        mask_logit,
        pool_calls,
    } = options;
    let anchor = &config.anchor;
    let strides = (0..anchor.num_levels)
        .map(|level| anchor.base_stride << level)
        .collect();

    Networks {
        backbone: Box::new(MockBackbone { strides, grid }),
        rpn_head: Box::new(MockRpnHead {
            anchors_per_location: anchor.base_scales.len() * anchor.aspect_ratios.len(),
            objectness: 0.0,
        }),
        box_pooler: Box::new(CountingPooler {
            calls: pool_calls.clone(),
        }),
        mask_pooler: Box::new(CountingPooler { calls: pool_calls }),
        box_predictor: Box::new(FixedBoxPredictor { logits: box_logits }),
        mask_predictor: Box::new(ConstMaskPredictor {
            num_classes: config.num_classes,
            resolution: config.mask_head.resolution,
            logit: mask_logit,
        }),
    }
}

pub fn image(height: usize, width: usize) -> ImageRecord {
    ImageRecordInit {
        pixels: Array3::zeros((height, width, 3)),
        image_size: None,
        original_size: HW::from_hw([height, width]),
    }
    .build()
    .unwrap()
}

/// One object at `(10, 10, 50, 50)` on a 64x64 image, with its bitmap.
pub fn single_box_truth(with_mask: bool) -> GroundTruth {
    let rect = XYXY::from_xyxy([10.0, 10.0, 50.0, 50.0]);
    let masks = with_mask.then(|| {
        let mut bitmap = Array2::zeros((64, 64));
        bitmap.slice_mut(s![10..50, 10..50]).fill(1u8);
        vec![SegmentationMask::Bitmap(bitmap)]
    });
    GroundTruth::new(vec![rect], vec![1], masks).unwrap()
}
