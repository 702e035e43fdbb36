use super::LossSum;
use crate::common::*;

/// Smooth L1 loss on box deltas, summed over the four components.
#[derive(Debug, Clone)]
pub struct SmoothL1Loss {
    beta: f64,
}

impl SmoothL1Loss {
    pub fn new(beta: f64) -> Result<Self> {
        ensure!(
            beta.is_finite() && beta >= 0.0,
            "smooth L1 beta must be non-negative, but get {}",
            beta
        );
        Ok(Self { beta })
    }

    pub fn single(&self, input: f32, target: f32) -> f64 {
        let diff = (input as f64 - target as f64).abs();
        let diff = if diff.is_finite() { diff } else { f64::from(f32::MAX) };
        if diff < self.beta {
            0.5 * diff * diff / self.beta
        } else {
            diff - 0.5 * self.beta
        }
    }

    pub fn forward(&self, input: &[f32; 4], target: &[f32; 4]) -> LossSum {
        let total = izip!(input, target)
            .map(|(&input, &target)| self.single(input, target))
            .sum();
        LossSum::new(total, 1)
    }
}
