//! Assignment of candidate boxes to ground truth.

use crate::{common::*, config::MatcherConfig};

impl MatcherConfig {
    pub fn matcher_init(&self) -> MatcherInit {
        MatcherInit {
            positive_threshold: self.positive_threshold.raw(),
            negative_threshold: self.negative_threshold.raw(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MatcherInit {
    pub positive_threshold: f64,
    pub negative_threshold: f64,
}

impl MatcherInit {
    pub fn build(self) -> Result<Matcher> {
        let Self {
            positive_threshold,
            negative_threshold,
        } = self;

        ensure!(
            (0.0..=1.0).contains(&positive_threshold),
            "positive_threshold must be in range [0, 1]"
        );
        ensure!(
            (0.0..=1.0).contains(&negative_threshold),
            "negative_threshold must be in range [0, 1]"
        );
        ensure!(
            positive_threshold > negative_threshold,
            "positive_threshold ({}) must be greater than negative_threshold ({})",
            positive_threshold,
            negative_threshold
        );

        Ok(Matcher {
            positive_threshold: positive_threshold as f32,
            negative_threshold: negative_threshold as f32,
        })
    }
}

/// The three-way label of a candidate box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchLabel {
    /// Matched to the ground truth at this index.
    Positive(usize),
    Negative,
    /// Between the thresholds. Excluded from losses.
    Ignore,
}

/// Labels of all candidates of one image, in candidate order.
#[derive(Debug, Clone, PartialEq)]
pub struct Matches {
    labels: Vec<MatchLabel>,
}

impl Matches {
    pub fn labels(&self) -> &[MatchLabel] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// `(candidate index, ground truth index)` of positives.
    pub fn positives(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.labels
            .iter()
            .enumerate()
            .filter_map(|(index, label)| match *label {
                MatchLabel::Positive(gt_index) => Some((index, gt_index)),
                _ => None,
            })
    }

    pub fn negatives(&self) -> impl Iterator<Item = usize> + '_ {
        self.labels
            .iter()
            .enumerate()
            .filter(|(_, label)| **label == MatchLabel::Negative)
            .map(|(index, _)| index)
    }

    pub fn num_positives(&self) -> usize {
        self.positives().count()
    }
}

/// Labels candidates by their best IoU against ground truth.
#[derive(Debug, Clone)]
pub struct Matcher {
    positive_threshold: f32,
    negative_threshold: f32,
}

impl Matcher {
    /// Assigns each candidate to its best-overlapping ground truth.
    ///
    /// Besides the threshold rule, the candidates that reach a ground truth's
    /// highest IoU are made positive for that ground truth, so every ground
    /// truth with a non-zero overlap gets at least one positive.
    pub fn assign(&self, candidates: &[XYXY<f32>], truths: &[XYXY<f32>]) -> Matches {
        if truths.is_empty() {
            return Matches {
                labels: vec![MatchLabel::Negative; candidates.len()],
            };
        }

        let ious = iou_matrix(candidates, truths);

        let mut labels: Vec<_> = ious
            .outer_iter()
            .map(|row| {
                let (gt_index, max_iou) = row
                    .iter()
                    .enumerate()
                    .fold((0, f32::NEG_INFINITY), |(best_index, best), (index, &iou)| {
                        if iou > best {
                            (index, iou)
                        } else {
                            (best_index, best)
                        }
                    });

                if max_iou >= self.positive_threshold {
                    MatchLabel::Positive(gt_index)
                } else if max_iou < self.negative_threshold {
                    MatchLabel::Negative
                } else {
                    MatchLabel::Ignore
                }
            })
            .collect();

        // force the best candidates of each ground truth to be positive
        let mut forced = vec![false; candidates.len()];

        for (gt_index, column) in ious.axis_iter(Axis(1)).enumerate() {
            let best_iou = column.iter().cloned().fold(0.0f32, f32::max);
            if best_iou <= 0.0 {
                debug!(
                    "ground truth {} overlaps no candidate and stays unmatched",
                    gt_index
                );
                continue;
            }

            let mut claimed = false;
            column
                .iter()
                .enumerate()
                .filter(|(_, &iou)| iou == best_iou)
                .for_each(|(index, _)| {
                    if !forced[index] {
                        forced[index] = true;
                        labels[index] = MatchLabel::Positive(gt_index);
                        claimed = true;
                    }
                });

            // the tied candidates were taken by earlier ground truth
            if !claimed {
                let fallback = column
                    .iter()
                    .enumerate()
                    .filter(|(index, &iou)| !forced[*index] && iou > 0.0)
                    .fold(None, |best: Option<(usize, f32)>, (index, &iou)| match best {
                        Some((_, best_iou)) if best_iou >= iou => best,
                        _ => Some((index, iou)),
                    });

                if let Some((index, _)) = fallback {
                    forced[index] = true;
                    labels[index] = MatchLabel::Positive(gt_index);
                }
            }
        }

        Matches { labels }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(positive_threshold: f64, negative_threshold: f64) -> Matcher {
        MatcherInit {
            positive_threshold,
            negative_threshold,
        }
        .build()
        .unwrap()
    }

    fn rect(xyxy: [f32; 4]) -> XYXY<f32> {
        XYXY::from_xyxy(xyxy)
    }

    #[test]
    fn matcher_three_way_labels() {
        let matcher = matcher(0.7, 0.3);
        let truths = vec![rect([0.0, 0.0, 10.0, 10.0])];
        let candidates = vec![
            rect([0.0, 0.0, 10.0, 10.0]),
            rect([0.0, 0.0, 10.0, 5.0]),
            rect([50.0, 50.0, 60.0, 60.0]),
            rect([0.0, 0.0, 10.0, 8.0]),
        ];
        let matches = matcher.assign(&candidates, &truths);
        assert_eq!(
            matches.labels(),
            &[
                MatchLabel::Positive(0),
                MatchLabel::Ignore,
                MatchLabel::Negative,
                MatchLabel::Positive(0),
            ]
        );
    }

    #[test]
    fn matcher_forces_best_candidate() {
        let matcher = matcher(0.7, 0.3);
        let truths = vec![rect([0.0, 0.0, 10.0, 10.0]), rect([100.0, 100.0, 140.0, 140.0])];
        let candidates = vec![
            rect([0.0, 0.0, 10.0, 10.0]),
            rect([110.0, 110.0, 126.0, 126.0]),
            rect([120.0, 120.0, 136.0, 136.0]),
        ];
        let matches = matcher.assign(&candidates, &truths);
        assert_eq!(matches.labels()[0], MatchLabel::Positive(0));
        assert_eq!(matches.labels()[1], MatchLabel::Positive(1));
        assert_eq!(matches.labels()[2], MatchLabel::Negative);
    }

    #[test]
    fn matcher_every_truth_has_positive() {
        let matcher = matcher(0.9, 0.5);
        let truths = vec![
            rect([0.0, 0.0, 20.0, 20.0]),
            rect([5.0, 5.0, 25.0, 25.0]),
            rect([60.0, 0.0, 70.0, 40.0]),
        ];
        // a single candidate is the best for both of the first two truths
        let candidates = vec![
            rect([2.0, 2.0, 22.0, 22.0]),
            rect([8.0, 8.0, 30.0, 30.0]),
            rect([55.0, 5.0, 75.0, 30.0]),
        ];
        let matches = matcher.assign(&candidates, &truths);
        let matched: HashSet<_> = matches.positives().map(|(_, gt)| gt).collect();
        assert_eq!(matched, (0..3).collect());
    }

    #[test]
    fn matcher_empty_truth() {
        let matcher = matcher(0.7, 0.3);
        let candidates = vec![rect([0.0, 0.0, 10.0, 10.0]); 4];
        let matches = matcher.assign(&candidates, &[]);
        assert_eq!(matches.len(), 4);
        assert_eq!(matches.negatives().count(), 4);
    }

    #[test]
    fn matcher_empty_candidates() {
        let matcher = matcher(0.7, 0.3);
        let matches = matcher.assign(&[], &[rect([0.0, 0.0, 1.0, 1.0])]);
        assert!(matches.is_empty());
    }

    #[test]
    fn matcher_rejects_inverted_thresholds() {
        assert!(MatcherInit {
            positive_threshold: 0.3,
            negative_threshold: 0.7,
        }
        .build()
        .is_err());
        assert!(MatcherInit {
            positive_threshold: 0.5,
            negative_threshold: 0.5,
        }
        .build()
        .is_err());
    }
}
