//! Loss function building blocks.
//!
//! Losses are evaluated in the forward direction only. Each function returns
//! a [LossSum] so that callers choose the normalizer.

mod bce_with_logits;
mod cross_entropy;
mod loss_sum;
mod smooth_l1;

pub use bce_with_logits::*;
pub use cross_entropy::*;
pub use loss_sum::*;
pub use smooth_l1::*;
