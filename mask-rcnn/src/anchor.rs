//! Static anchor boxes over the feature pyramid.

use crate::{common::*, config::AnchorConfig, model::FeaturePyramid, ragged::Ragged};

impl AnchorConfig {
    pub fn anchor_generator_init(&self) -> AnchorGeneratorInit {
        let Self {
            base_stride,
            num_levels,
            ref base_scales,
            ref aspect_ratios,
            center_offset,
        } = *self;

        AnchorGeneratorInit {
            base_stride,
            num_levels,
            base_scales: base_scales.iter().map(|scale| scale.raw()).collect(),
            aspect_ratios: aspect_ratios.iter().map(|ratio| ratio.raw()).collect(),
            center_offset: center_offset.raw(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnchorGeneratorInit {
    pub base_stride: usize,
    pub num_levels: usize,
    pub base_scales: Vec<f64>,
    pub aspect_ratios: Vec<f64>,
    pub center_offset: f64,
}

impl AnchorGeneratorInit {
    pub fn build(self) -> Result<AnchorGenerator> {
        let Self {
            base_stride,
            num_levels,
            base_scales,
            aspect_ratios,
            center_offset,
        } = self;

        ensure!(base_stride > 0, "base_stride must be positive");
        ensure!(num_levels > 0, "num_levels must be positive");
        ensure!(!base_scales.is_empty(), "base_scales must not be empty");
        ensure!(!aspect_ratios.is_empty(), "aspect_ratios must not be empty");
        ensure!(
            base_scales
                .iter()
                .all(|scale| scale.is_finite() && *scale > 0.0),
            "anchor scales must be positive"
        );
        ensure!(
            aspect_ratios
                .iter()
                .all(|ratio| ratio.is_finite() && *ratio > 0.0),
            "aspect ratios must be positive"
        );
        ensure!(
            (0.0..=1.0).contains(&center_offset),
            "center_offset must be in range [0, 1]"
        );

        let levels = (0..num_levels)
            .map(|level| -> Result<_> {
                let factor = u32::try_from(level)
                    .ok()
                    .and_then(|level| 2usize.checked_pow(level));
                let stride = factor
                    .and_then(|factor| base_stride.checked_mul(factor))
                    .ok_or_else(|| format_err!("the stride of anchor level {} overflows", level))?;
                let factor = stride / base_stride;

                // ordered by ratio, then by scale
                let cell_anchors = iproduct!(aspect_ratios.iter(), base_scales.iter())
                    .map(|(&ratio, &scale)| {
                        let scale = scale * factor as f64;
                        let w = scale / ratio.sqrt();
                        let h = scale * ratio.sqrt();
                        [w as f32, h as f32]
                    })
                    .collect();

                Ok(LevelAnchors {
                    stride,
                    cell_anchors,
                })
            })
            .collect::<Result<_>>()?;

        Ok(AnchorGenerator {
            levels,
            center_offset: center_offset as f32,
        })
    }
}

#[derive(Debug, Clone)]
struct LevelAnchors {
    stride: usize,
    /// `[w, h]` of each anchor laid at one position.
    cell_anchors: Vec<[f32; 2]>,
}

/// Lays anchors over feature maps. The output depends only on shapes.
#[derive(Debug, Clone)]
pub struct AnchorGenerator {
    levels: Vec<LevelAnchors>,
    center_offset: f32,
}

impl AnchorGenerator {
    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn strides(&self) -> Vec<usize> {
        self.levels.iter().map(|level| level.stride).collect()
    }

    pub fn num_anchors_per_location(&self) -> usize {
        self.levels[0].cell_anchors.len()
    }

    /// The canonical feature shape `[⌈h/s⌉, ⌈w/s⌉]` of a level.
    pub fn grid_size(image_size: &HW<usize>, stride: usize) -> Result<[usize; 2]> {
        Ok(image_size.grid_size(stride)?.hw())
    }

    /// Anchors of one level on a `[h, w]` feature grid, ordered row-major
    /// over positions, then by aspect ratio, then by scale.
    pub fn generate_level(&self, level: usize, shape: [usize; 2]) -> Result<Vec<XYXY<f32>>> {
        let LevelAnchors {
            stride,
            cell_anchors,
        } = self
            .levels
            .get(level)
            .ok_or_else(|| format_err!("level {} is out of range", level))?;
        let stride = *stride as f32;

        let anchors = iproduct!(HW::from_hw(shape).cells(), cell_anchors.iter())
            .map(|((row, col), &[w, h])| {
                let cx = (col as f32 + self.center_offset) * stride;
                let cy = (row as f32 + self.center_offset) * stride;
                XYXY::from_cxcywh([cx, cy, w, h])
            })
            .collect();

        Ok(anchors)
    }

    /// Anchors of all levels, grouped by level.
    pub fn generate(&self, shapes: &[[usize; 2]]) -> Result<Ragged<XYXY<f32>>> {
        ensure!(
            shapes.len() == self.levels.len(),
            "expect {} feature levels, but get {}",
            self.levels.len(),
            shapes.len()
        );

        let mut anchors = Ragged::new();
        for (level, &shape) in shapes.iter().enumerate() {
            anchors.push_group(self.generate_level(level, shape)?);
        }
        Ok(anchors)
    }

    /// Anchors for the levels of a backbone output.
    pub fn generate_pyramid(&self, features: &FeaturePyramid) -> Result<Ragged<XYXY<f32>>> {
        let strides = features.strides();
        ensure!(
            strides == self.strides(),
            "feature strides {:?} do not match anchor strides {:?}",
            strides,
            self.strides()
        );
        self.generate(&features.shapes())
    }
}
