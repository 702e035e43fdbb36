//! The two-stage instance segmentation pipeline: anchors, region proposals,
//! box classification and mask prediction.

mod common;
pub mod anchor;
pub mod box_head;
pub mod config;
pub mod image;
pub mod loss;
pub mod mask_head;
pub mod matcher;
pub mod model;
pub mod observer;
pub mod pipeline;
pub mod profiling;
pub mod ragged;
pub mod rpn;
pub mod sampler;
pub mod segmentation;

pub use bbox;
