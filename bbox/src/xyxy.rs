use super::{CxCyWH, Rect, HW};
use crate::{common::*, Element, Transform};

/// Bounding box in corner form.
///
/// This is the only box representation the detection stages operate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct XYXY<T> {
    pub(crate) x1: T,
    pub(crate) y1: T,
    pub(crate) x2: T,
    pub(crate) y2: T,
}

impl<T> XYXY<T>
where
    T: Copy + Num,
{
    pub fn transform(&self, transform: &Transform<T>) -> Self {
        XYXY {
            x1: self.x1 * transform.sx + transform.tx,
            y1: self.y1 * transform.sy + transform.ty,
            x2: self.x2 * transform.sx + transform.tx,
            y2: self.y2 * transform.sy + transform.ty,
        }
    }
}

impl<T> XYXY<T>
where
    T: Element,
{
    /// Clamps all four coordinates into `[0, w] x [0, h]`.
    ///
    /// NaN coordinates collapse onto the lower bound.
    pub fn clip_to(&self, size: &HW<T>) -> Self {
        let zero = T::zero();
        let clamp = |value: T, upper: T| value.finite_or_zero().max(zero).min(upper);
        let x1 = clamp(self.x1, size.w());
        let y1 = clamp(self.y1, size.h());
        let x2 = clamp(self.x2, size.w()).max(x1);
        let y2 = clamp(self.y2, size.h()).max(y1);
        Self { x1, y1, x2, y2 }
    }
}

impl<T> Rect for XYXY<T>
where
    T: Copy + Num + PartialOrd,
{
    type Type = T;

    fn x1(&self) -> Self::Type {
        self.x1
    }

    fn y1(&self) -> Self::Type {
        self.y1
    }

    fn x2(&self) -> Self::Type {
        self.x2
    }

    fn y2(&self) -> Self::Type {
        self.y2
    }

    fn cx(&self) -> Self::Type {
        let two = T::one() + T::one();
        self.x1 + self.w() / two
    }

    fn cy(&self) -> Self::Type {
        let two = T::one() + T::one();
        self.y1 + self.h() / two
    }

    fn w(&self) -> Self::Type {
        self.x2 - self.x1
    }

    fn h(&self) -> Self::Type {
        self.y2 - self.y1
    }

    fn try_from_xyxy(xyxy: [Self::Type; 4]) -> Result<Self> {
        let [x1, y1, x2, y2] = xyxy;
        ensure!(
            x2 >= x1 && y2 >= y1,
            "x2 >= x1 and y2 >= y1 must hold for a corner-form box"
        );

        Ok(Self { x1, y1, x2, y2 })
    }

    fn try_from_xywh(xywh: [Self::Type; 4]) -> Result<Self> {
        let [x1, y1, w, h] = xywh;
        Self::try_from_xyxy([x1, y1, x1 + w, y1 + h])
    }

    fn try_from_cxcywh(cxcywh: [Self::Type; 4]) -> Result<Self> {
        let [cx, cy, w, h] = cxcywh;
        let zero = T::zero();
        ensure!(w >= zero && h >= zero, "w and h must be non-negative");

        let two = T::one() + T::one();
        Ok(Self {
            x1: cx - w / two,
            y1: cy - h / two,
            x2: cx + w / two,
            y2: cy + h / two,
        })
    }
}

impl<T> From<CxCyWH<T>> for XYXY<T>
where
    T: Copy + Num,
{
    fn from(from: CxCyWH<T>) -> Self {
        Self::from(&from)
    }
}

impl<T> From<&CxCyWH<T>> for XYXY<T>
where
    T: Copy + Num,
{
    fn from(from: &CxCyWH<T>) -> Self {
        let two = T::one() + T::one();
        let CxCyWH { cx, cy, w, h } = *from;
        Self {
            x1: cx - w / two,
            y1: cy - h / two,
            x2: cx + w / two,
            y2: cy + h / two,
        }
    }
}
