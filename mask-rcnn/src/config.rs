//! Pipeline configuration format.

use crate::common::*;

pub use anchor::*;
pub use heads::*;
pub use matching::*;
pub use rpn::*;

/// The main pipeline configuration.
///
/// Fields missing from a config file keep their [Default] values. It is
/// consumed once by [MaskRcnnInit](crate::pipeline::MaskRcnnInit) and
/// never changes afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The number of foreground classes. Class 0 is reserved for background.
    pub num_classes: usize,
    /// The default seed of the sampling random number generator.
    pub seed: u64,
    pub anchor: AnchorConfig,
    pub rpn: RpnConfig,
    pub box_head: BoxHeadConfig,
    pub mask_head: MaskHeadConfig,
}

impl Config {
    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{}'", path.display()))?;
        let config = json5::from_str(&text)
            .with_context(|| format!("failed to parse config file '{}'", path.display()))?;
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_classes: 80,
            seed: 0,
            anchor: AnchorConfig::default(),
            rpn: RpnConfig::default(),
            box_head: BoxHeadConfig::default(),
            mask_head: MaskHeadConfig::default(),
        }
    }
}

mod anchor {
    use super::*;

    /// Anchor layout over the feature pyramid.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct AnchorConfig {
        /// The stride of the finest pyramid level. It doubles per level.
        pub base_stride: usize,
        /// The number of pyramid levels.
        pub num_levels: usize,
        /// Anchor sizes on the finest level. They double per level.
        pub base_scales: Vec<R64>,
        /// Height to width ratios.
        pub aspect_ratios: Vec<R64>,
        /// The anchor center within a grid cell, in stride units.
        pub center_offset: R64,
    }

    impl Default for AnchorConfig {
        fn default() -> Self {
            Self {
                base_stride: 4,
                num_levels: 4,
                base_scales: vec![r64(32.0)],
                aspect_ratios: vec![r64(0.5), r64(1.0), r64(2.0)],
                center_offset: r64(0.5),
            }
        }
    }
}

mod matching {
    use super::*;

    /// IoU thresholds for labeling candidates against ground truth.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct MatcherConfig {
        /// Candidates with max IoU at or above it are positive.
        pub positive_threshold: R64,
        /// Candidates with max IoU below it are negative.
        pub negative_threshold: R64,
    }

    /// Positive/negative subsampling per image.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct SamplerConfig {
        pub batch_size_per_image: usize,
        pub positive_fraction: R64,
    }
}

mod rpn {
    use super::*;

    /// Proposal count caps around NMS.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct ProposalCaps {
        /// The number of top-scored boxes kept per level before NMS.
        pub pre_nms_top_n: usize,
        /// The number of proposals kept per image after NMS.
        pub post_nms_top_n: usize,
    }

    /// Region proposal network options.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct RpnConfig {
        pub matcher: MatcherConfig,
        pub sampler: SamplerConfig,
        /// Caps used by the training graph.
        pub train: ProposalCaps,
        /// Caps used by the evaluation graph.
        pub eval: ProposalCaps,
        pub nms_threshold: R64,
        /// Proposals narrower or shorter than it are dropped.
        pub min_size: R64,
        pub box_weights: [R64; 4],
        pub smooth_l1_beta: R64,
        /// Append ground truth boxes to the training proposals.
        pub add_gt_proposals: bool,
    }

    impl Default for RpnConfig {
        fn default() -> Self {
            Self {
                matcher: MatcherConfig {
                    positive_threshold: r64(0.7),
                    negative_threshold: r64(0.3),
                },
                sampler: SamplerConfig {
                    batch_size_per_image: 256,
                    positive_fraction: r64(0.5),
                },
                train: ProposalCaps {
                    pre_nms_top_n: 2000,
                    post_nms_top_n: 2000,
                },
                eval: ProposalCaps {
                    pre_nms_top_n: 1000,
                    post_nms_top_n: 1000,
                },
                nms_threshold: r64(0.7),
                min_size: r64(0.0),
                box_weights: [r64(1.0); 4],
                smooth_l1_beta: r64(1.0 / 9.0),
                add_gt_proposals: true,
            }
        }
    }
}

mod heads {
    use super::*;

    /// Box classification and regression head options.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct BoxHeadConfig {
        pub matcher: MatcherConfig,
        pub sampler: SamplerConfig,
        pub box_weights: [R64; 4],
        pub smooth_l1_beta: R64,
        /// Detections scored at or below it are dropped.
        pub score_threshold: R64,
        pub nms_threshold: R64,
        pub detections_per_image: usize,
    }

    impl Default for BoxHeadConfig {
        fn default() -> Self {
            Self {
                matcher: MatcherConfig {
                    positive_threshold: r64(0.5),
                    negative_threshold: r64(0.4),
                },
                sampler: SamplerConfig {
                    batch_size_per_image: 512,
                    positive_fraction: r64(0.25),
                },
                box_weights: [r64(10.0), r64(10.0), r64(5.0), r64(5.0)],
                smooth_l1_beta: r64(1.0),
                score_threshold: r64(0.05),
                nms_threshold: r64(0.5),
                detections_per_image: 100,
            }
        }
    }

    /// Mask head options.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct MaskHeadConfig {
        /// The side length of mask targets and predictions.
        pub resolution: usize,
        /// Pasted mask probabilities at or above it are foreground.
        pub mask_threshold: R64,
    }

    impl Default for MaskHeadConfig {
        fn default() -> Self {
            Self {
                resolution: 28,
                mask_threshold: r64(0.5),
            }
        }
    }
}
