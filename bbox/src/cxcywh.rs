use super::{Rect, XYXY};
use crate::common::*;

/// Bounding box in center-size form.
///
/// Only used to ingest boxes from callers that speak this convention. Convert
/// to [XYXY] before any geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CxCyWH<T> {
    pub(crate) cx: T,
    pub(crate) cy: T,
    pub(crate) w: T,
    pub(crate) h: T,
}

impl<T> Rect for CxCyWH<T>
where
    T: Copy + Num + PartialOrd,
{
    type Type = T;

    fn x1(&self) -> Self::Type {
        let two = T::one() + T::one();
        self.cx - self.w / two
    }

    fn y1(&self) -> Self::Type {
        let two = T::one() + T::one();
        self.cy - self.h / two
    }

    fn x2(&self) -> Self::Type {
        let two = T::one() + T::one();
        self.cx + self.w / two
    }

    fn y2(&self) -> Self::Type {
        let two = T::one() + T::one();
        self.cy + self.h / two
    }

    fn cx(&self) -> Self::Type {
        self.cx
    }

    fn cy(&self) -> Self::Type {
        self.cy
    }

    fn w(&self) -> Self::Type {
        self.w
    }

    fn h(&self) -> Self::Type {
        self.h
    }

    fn try_from_xyxy(xyxy: [T; 4]) -> Result<Self> {
        let [x1, y1, x2, y2] = xyxy;
        let zero = T::zero();
        let two = T::one() + T::one();
        let w = x2 - x1;
        let h = y2 - y1;
        ensure!(
            w >= zero && h >= zero,
            "box width and height must be non-negative"
        );

        Ok(Self {
            cx: x1 + w / two,
            cy: y1 + h / two,
            w,
            h,
        })
    }

    fn try_from_xywh(xywh: [T; 4]) -> Result<Self> {
        let [x1, y1, w, h] = xywh;
        let zero = T::zero();
        let two = T::one() + T::one();
        ensure!(
            w >= zero && h >= zero,
            "box width and height must be non-negative"
        );

        Ok(Self {
            cx: x1 + w / two,
            cy: y1 + h / two,
            w,
            h,
        })
    }

    fn try_from_cxcywh(cxcywh: [T; 4]) -> Result<Self> {
        let [cx, cy, w, h] = cxcywh;
        let zero = T::zero();
        ensure!(
            w >= zero && h >= zero,
            "box width and height must be non-negative"
        );

        Ok(Self { cx, cy, w, h })
    }
}

impl<T> From<XYXY<T>> for CxCyWH<T>
where
    T: Copy + Num,
{
    fn from(from: XYXY<T>) -> Self {
        Self::from(&from)
    }
}

impl<T> From<&XYXY<T>> for CxCyWH<T>
where
    T: Copy + Num,
{
    fn from(from: &XYXY<T>) -> Self {
        let two = T::one() + T::one();
        let XYXY { x1, y1, x2, y2 } = *from;
        let w = x2 - x1;
        let h = y2 - y1;
        Self {
            cx: x1 + w / two,
            cy: y1 + h / two,
            w,
            h,
        }
    }
}
