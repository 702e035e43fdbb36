use super::LossSum;
use crate::common::*;

pub fn sigmoid(logit: f32) -> f32 {
    1.0 / (1.0 + (-logit).exp())
}

/// Binary cross entropy on logits, summed over elements.
#[derive(Debug, Clone, Copy, Default)]
pub struct BceWithLogitsLoss;

impl BceWithLogitsLoss {
    /// The loss of a single logit. Stable for large magnitudes.
    pub fn single(logit: f32, target: f32) -> f64 {
        let x = logit as f64;
        let t = target as f64;
        if !x.is_finite() {
            // saturated logits only cost when they point the wrong way
            return match (x > 0.0, t > 0.5) {
                (true, true) | (false, false) => 0.0,
                _ => f64::from(f32::MAX),
            };
        }
        x.max(0.0) - x * t + (-x.abs()).exp().ln_1p()
    }

    pub fn forward<I, T>(&self, input: I, target: T) -> Result<LossSum>
    where
        I: IntoIterator<Item = f32>,
        T: IntoIterator<Item = f32>,
    {
        let input: Vec<_> = input.into_iter().collect();
        let target: Vec<_> = target.into_iter().collect();
        ensure!(
            input.len() == target.len(),
            "bce loss expects one target per logit, but get {} logits and {} targets",
            input.len(),
            target.len()
        );
        debug_assert!(
            target.iter().all(|t| (0.0..=1.0).contains(t)),
            "target values must be in range of [0.0, 1.0]"
        );

        let total = izip!(&input, &target)
            .map(|(&logit, &target)| Self::single(logit, target))
            .sum();
        Ok(LossSum::new(total, input.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn bce_with_logits_values() -> Result<()> {
        assert_abs_diff_eq!(BceWithLogitsLoss::single(0.0, 1.0), 2f64.ln(), epsilon = 1e-9);
        assert_abs_diff_eq!(BceWithLogitsLoss::single(0.0, 0.0), 2f64.ln(), epsilon = 1e-9);
        assert!(BceWithLogitsLoss::single(100.0, 1.0) < 1e-9);
        assert_abs_diff_eq!(BceWithLogitsLoss::single(100.0, 0.0), 100.0, epsilon = 1e-9);

        let loss = BceWithLogitsLoss.forward(vec![0.0, 0.0], vec![1.0, 0.0])?;
        assert_eq!(loss.count, 2);
        assert_abs_diff_eq!(loss.mean(), 2f64.ln(), epsilon = 1e-9);
        Ok(())
    }

    #[test]
    fn bce_with_logits_length_mismatch() {
        assert!(BceWithLogitsLoss.forward(vec![0.0], vec![]).is_err());
    }

    #[test]
    fn sigmoid_is_centered() {
        assert_abs_diff_eq!(sigmoid(0.0), 0.5);
    }
}
