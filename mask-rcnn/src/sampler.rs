use crate::{common::*, config::SamplerConfig, matcher::Matches};

impl SamplerConfig {
    pub fn sampler_init(&self) -> BalancedSamplerInit {
        BalancedSamplerInit {
            batch_size_per_image: self.batch_size_per_image,
            positive_fraction: self.positive_fraction.raw(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BalancedSamplerInit {
    pub batch_size_per_image: usize,
    pub positive_fraction: f64,
}

impl BalancedSamplerInit {
    pub fn build(self) -> Result<BalancedSampler> {
        let Self {
            batch_size_per_image,
            positive_fraction,
        } = self;

        ensure!(
            batch_size_per_image > 0,
            "batch_size_per_image must be positive"
        );
        ensure!(
            (0.0..=1.0).contains(&positive_fraction),
            "positive_fraction must be in range [0, 1]"
        );

        let max_positives = (batch_size_per_image as f64 * positive_fraction).floor() as usize;

        Ok(BalancedSampler {
            batch_size_per_image,
            max_positives,
        })
    }
}

/// Sampled candidates of one image.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Samples {
    /// `(candidate index, ground truth index)` pairs in ascending candidate order.
    pub positives: Vec<(usize, usize)>,
    /// Candidate indexes in ascending order.
    pub negatives: Vec<usize>,
}

impl Samples {
    pub fn len(&self) -> usize {
        self.positives.len() + self.negatives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Subsamples matched candidates to a fixed positive ratio.
#[derive(Debug, Clone)]
pub struct BalancedSampler {
    batch_size_per_image: usize,
    max_positives: usize,
}

impl BalancedSampler {
    /// Picks at most the positive quota of positives and fills the rest of
    /// the batch with negatives. Ignored candidates are never picked.
    pub fn sample(&self, matches: &Matches, rng: &mut StdRng) -> Samples {
        let positives: Vec<_> = matches.positives().collect();
        let negatives: Vec<_> = matches.negatives().collect();

        let num_positives = positives.len().min(self.max_positives);
        let num_negatives = negatives
            .len()
            .min(self.batch_size_per_image - num_positives);

        let mut positives: Vec<_> = positives
            .choose_multiple(rng, num_positives)
            .cloned()
            .collect();
        let mut negatives: Vec<_> = negatives
            .choose_multiple(rng, num_negatives)
            .cloned()
            .collect();
        positives.sort_unstable();
        negatives.sort_unstable();

        Samples {
            positives,
            negatives,
        }
    }
}
