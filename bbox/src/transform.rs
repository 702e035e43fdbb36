use super::{Rect, XYXY};
use crate::{common::*, HW};

/// Axis-aligned scale followed by translation.
///
/// Maps boxes between the resized network input frame and the original image
/// frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Transform<T> {
    pub sx: T,
    pub sy: T,
    pub tx: T,
    pub ty: T,
}

impl<T> Transform<T>
where
    T: Copy + Num + PartialOrd,
{
    pub fn from_rects<R>(src: &R, tgt: &R) -> Self
    where
        R: Rect<Type = T>,
    {
        let sx = tgt.w() / src.w();
        let sy = tgt.h() / src.h();
        let tx = tgt.x1() - src.x1() * sx;
        let ty = tgt.y1() - src.y1() * sy;

        Self { sx, sy, tx, ty }
    }

    /// Stretch `src_size` onto `tgt_size` without keeping the aspect ratio.
    pub fn try_from_sizes_exact(src_size: &HW<T>, tgt_size: &HW<T>) -> Result<Self> {
        let zero = T::zero();
        ensure!(
            src_size.h() > zero && src_size.w() > zero,
            "source size must be non-empty"
        );
        Ok(Self::from_rects(&src_size.to_rect(), &tgt_size.to_rect()))
    }
}

impl<T> Mul<&XYXY<T>> for &Transform<T>
where
    T: Copy + Num,
{
    type Output = XYXY<T>;

    fn mul(self, rhs: &XYXY<T>) -> Self::Output {
        rhs.transform(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RectNum;

    #[test]
    fn rect_resize_exact() {
        let transform =
            Transform::try_from_sizes_exact(&HW::from_hw([80.0, 80.0]), &HW::from_hw([20.0, 40.0]))
                .unwrap();
        let expect = Transform {
            sx: 0.5,
            sy: 0.25,
            tx: 0.0,
            ty: 0.0,
        };
        assert_eq!(transform, expect);
    }

    #[test]
    fn rect_resize_maps_box() {
        let transform =
            Transform::try_from_sizes_exact(&HW::from_hw([50.0, 100.0]), &HW::from_hw([100.0, 200.0]))
                .unwrap();
        let rect = &transform * &XYXY::from_xyxy([10.0, 5.0, 20.0, 25.0]);
        assert_eq!(rect.xyxy(), [20.0, 10.0, 40.0, 50.0]);
    }

    #[test]
    fn rect_resize_empty_source_fails() {
        assert!(
            Transform::try_from_sizes_exact(&HW::from_hw([0.0, 10.0]), &HW::from_hw([5.0, 5.0]))
                .is_err()
        );
    }
}
