//! Safe bounding box types and the geometry shared by the detection stages.

mod common;

pub mod into_xyxy;
pub use into_xyxy::*;

pub use transform::*;
mod transform;

pub use rect::*;
pub mod rect;

pub use xyxy::*;
pub mod xyxy;

pub use cxcywh::*;
pub mod cxcywh;

pub use hw::*;
pub mod hw;

pub use element::*;
pub mod element;

pub use iou::*;
pub mod iou;

pub use coder::*;
pub mod coder;

pub use nms::*;
pub mod nms;

pub mod prelude {
    pub use crate::rect::{Rect, RectFloat, RectNum};
}
