use crate::{common::*, Element, RectFloat, XYXY};

/// Orders indexes by descending score. Ties keep the original order and NaN
/// scores go last.
pub fn argsort_descending<T>(scores: &[T]) -> Vec<usize>
where
    T: Element,
{
    let mut indexes: Vec<usize> = (0..scores.len()).collect();
    indexes.sort_by(|&lhs, &rhs| {
        let lhs = scores[lhs];
        let rhs = scores[rhs];
        match (lhs.is_nan(), rhs.is_nan()) {
            (false, false) => rhs.partial_cmp(&lhs).unwrap_or(Ordering::Equal),
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (true, true) => Ordering::Equal,
        }
    });
    indexes
}

/// Greedy non-maximum suppression.
///
/// Returns the kept indexes into `boxes` in descending score order. A box is
/// suppressed when its IoU with an already kept box is above
/// `iou_threshold`. At most `max_outputs` indexes are returned when given.
pub fn nms<T>(
    boxes: &[XYXY<T>],
    scores: &[T],
    iou_threshold: T,
    max_outputs: Option<usize>,
) -> Result<Vec<usize>>
where
    T: Element,
{
    ensure!(
        boxes.len() == scores.len(),
        "nms expects one score per box, but get {} boxes and {} scores",
        boxes.len(),
        scores.len()
    );

    let max_outputs = max_outputs.unwrap_or(boxes.len());
    let epsilon = T::geometry_epsilon();
    let mut suppressed = vec![false; boxes.len()];
    let mut keep = vec![];

    let order = argsort_descending(scores);

    for (rank, &li) in order.iter().enumerate() {
        if keep.len() >= max_outputs {
            break;
        }
        if suppressed[li] {
            continue;
        }
        keep.push(li);
        let lhs = &boxes[li];

        for &ri in &order[(rank + 1)..] {
            if suppressed[ri] {
                continue;
            }
            if lhs.iou_with(&boxes[ri], epsilon) > iou_threshold {
                suppressed[ri] = true;
            }
        }
    }

    Ok(keep)
}
