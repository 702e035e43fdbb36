//! Per-image inputs and outputs of the pipeline.

use crate::common::*;

pub use detection::*;
pub use ground_truth::*;
pub use record::*;

mod record {
    use super::*;

    #[derive(Debug, Clone)]
    pub struct ImageRecordInit {
        /// Network input pixels in HWC layout, possibly padded.
        pub pixels: Array3<f32>,
        /// The valid region inside `pixels`. Defaults to the full array.
        pub image_size: Option<HW<usize>>,
        /// The image size before resizing.
        pub original_size: HW<usize>,
    }

    impl ImageRecordInit {
        pub fn build(self) -> Result<ImageRecord> {
            let Self {
                pixels,
                image_size,
                original_size,
            } = self;
            let (height, width, channels) = pixels.dim();
            ensure!(
                channels == 3,
                "image pixels must have 3 channels, but get {}",
                channels
            );
            let image_size = image_size.unwrap_or_else(|| HW::from_hw([height, width]));
            ensure!(
                image_size.h() <= height && image_size.w() <= width,
                "the valid image region {:?} exceeds the pixel array {}x{}",
                image_size,
                height,
                width
            );
            ensure!(
                !image_size.is_empty() && !original_size.is_empty(),
                "image sizes must be non-empty"
            );

            Ok(ImageRecord {
                pixels,
                image_size,
                original_size,
            })
        }
    }

    /// An input image. Immutable once built.
    #[derive(Debug, Clone, Getters, CopyGetters)]
    pub struct ImageRecord {
        #[getset(get = "pub")]
        pixels: Array3<f32>,
        #[getset(get_copy = "pub")]
        image_size: HW<usize>,
        #[getset(get_copy = "pub")]
        original_size: HW<usize>,
    }

    impl ImageRecord {
        /// The clipping bounds of boxes on this image.
        pub fn bounds(&self) -> HW<f32> {
            self.image_size.to_bounds()
        }

        /// Maps boxes on the network input onto the original image.
        pub fn to_original_transform(&self) -> Result<Transform<f32>> {
            Transform::try_from_sizes_exact(&self.bounds(), &self.original_size.to_bounds())
        }
    }
}

mod ground_truth {
    use super::*;

    /// An instance segmentation. Non-zero raster pixels are foreground.
    #[derive(Debug, Clone, PartialEq)]
    pub enum SegmentationMask {
        /// Binary raster of the image size.
        Bitmap(Array2<u8>),
        /// Closed polygons given as `[x, y]` image coordinates, filled with
        /// the even-odd rule.
        Polygons(Vec<Vec<[f32; 2]>>),
        /// Binary raster of any size stretched over `rect`, usually the
        /// instance box.
        BoxAligned { rect: XYXY<f32>, raster: Array2<u8> },
    }

    /// The annotations of one image.
    #[derive(Debug, Clone, Getters)]
    pub struct GroundTruth {
        #[getset(get = "pub")]
        boxes: Vec<XYXY<f32>>,
        #[getset(get = "pub")]
        labels: Vec<usize>,
        #[getset(get = "pub")]
        masks: Option<Vec<SegmentationMask>>,
    }

    impl GroundTruth {
        pub fn new(
            boxes: Vec<XYXY<f32>>,
            labels: Vec<usize>,
            masks: Option<Vec<SegmentationMask>>,
        ) -> Result<Self> {
            ensure!(
                boxes.len() == labels.len(),
                "ground truth has {} boxes but {} labels",
                boxes.len(),
                labels.len()
            );
            if let Some(masks) = &masks {
                ensure!(
                    boxes.len() == masks.len(),
                    "ground truth has {} boxes but {} masks",
                    boxes.len(),
                    masks.len()
                );
            }
            ensure!(
                labels.iter().all(|&label| label >= 1),
                "ground truth labels must be foreground classes (>= 1)"
            );
            boxes
                .iter()
                .filter(|rect| rect.is_degenerate())
                .for_each(|rect| {
                    warn!(
                        "The bounding box {:?} is degenerate. It never becomes a confident match.",
                        rect
                    );
                });

            Ok(Self {
                boxes,
                labels,
                masks,
            })
        }

        pub fn empty() -> Self {
            Self {
                boxes: vec![],
                labels: vec![],
                masks: None,
            }
        }

        pub fn len(&self) -> usize {
            self.boxes.len()
        }

        pub fn is_empty(&self) -> bool {
            self.boxes.is_empty()
        }

        /// Checks the labels against the number of foreground classes.
        pub fn ensure_classes(&self, num_classes: usize) -> Result<()> {
            ensure!(
                self.labels.iter().all(|&label| label <= num_classes),
                "ground truth labels {:?} exceed the {} foreground classes",
                self.labels,
                num_classes
            );
            Ok(())
        }
    }
}

mod detection {
    use super::*;

    /// A final detection. It is never modified after creation.
    #[derive(Debug, Clone, PartialEq)]
    pub struct Detection {
        /// The box on the network input image.
        pub rect: XYXY<f32>,
        /// The foreground class id.
        pub class: usize,
        pub score: f32,
        /// The binary mask in original image coordinates.
        pub mask: Option<Array2<bool>>,
    }
}
