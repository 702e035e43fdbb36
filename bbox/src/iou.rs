use crate::{common::*, Element, RectFloat, XYXY};

/// Computes the pairwise IoU matrix of shape `[lhs.len(), rhs.len()]`.
///
/// Every entry lies in `[0, 1]`. Degenerate boxes have zero overlap with
/// everything.
pub fn iou_matrix<T>(lhs: &[XYXY<T>], rhs: &[XYXY<T>]) -> Array2<T>
where
    T: Element,
{
    let epsilon = T::geometry_epsilon();
    Array2::from_shape_fn((lhs.len(), rhs.len()), |(li, ri)| {
        let lhs = &lhs[li];
        let rhs = &rhs[ri];
        if lhs.is_degenerate() || rhs.is_degenerate() {
            T::zero()
        } else {
            lhs.iou_with(rhs, epsilon)
        }
    })
}
