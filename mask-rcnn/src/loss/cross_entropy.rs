use super::LossSum;
use crate::common::*;

/// Softmax over a row of logits.
pub fn softmax(logits: ArrayView1<f32>) -> Array1<f32> {
    let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let max = if max.is_finite() { max } else { 0.0 };
    let exp = logits.mapv(|logit| (logit - max).exp());
    let sum = exp.sum();
    if sum > 0.0 && sum.is_finite() {
        exp / sum
    } else {
        Array1::from_elem(logits.len(), 1.0 / logits.len().max(1) as f32)
    }
}

/// Cross entropy of logits with sparse class targets, summed over rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct CrossEntropyLoss;

impl CrossEntropyLoss {
    pub fn forward(&self, input: ArrayView2<f32>, target: &[usize]) -> Result<LossSum> {
        // assume [batch_size, n_classes] input shape
        let (batch_size, num_classes) = input.dim();
        ensure!(
            batch_size == target.len(),
            "cross entropy expects {} targets, but get {}",
            batch_size,
            target.len()
        );
        ensure!(
            target.iter().all(|&class| class < num_classes),
            "target values must be in range of [0, {})",
            num_classes
        );

        let total = izip!(input.outer_iter(), target)
            .map(|(logits, &class)| {
                let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max) as f64;
                let max = if max.is_finite() { max } else { 0.0 };
                let log_sum_exp = logits
                    .iter()
                    .map(|&logit| (logit as f64 - max).exp())
                    .sum::<f64>()
                    .ln()
                    + max;
                let loss = log_sum_exp - logits[class] as f64;
                if loss.is_finite() {
                    loss
                } else {
                    f64::from(f32::MAX)
                }
            })
            .sum();

        Ok(LossSum::new(total, batch_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn softmax_sums_to_one() {
        let probs = softmax(array![1.0f32, 2.0, 3.0].view());
        assert_abs_diff_eq!(probs.sum(), 1.0, epsilon = 1e-6);
        assert!(probs[2] > probs[1] && probs[1] > probs[0]);
    }

    #[test]
    fn cross_entropy_uniform_logits() -> Result<()> {
        let input = Array2::zeros((2, 4));
        let loss = CrossEntropyLoss.forward(input.view(), &[0, 3])?;
        assert_abs_diff_eq!(loss.mean(), 4f64.ln(), epsilon = 1e-9);
        Ok(())
    }

    #[test]
    fn cross_entropy_rejects_bad_target() {
        let input = Array2::zeros((1, 3));
        assert!(CrossEntropyLoss.forward(input.view(), &[3]).is_err());
        assert!(CrossEntropyLoss.forward(input.view(), &[]).is_err());
    }
}
