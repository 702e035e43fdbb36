//! Unchecked box records as they arrive from callers.

use crate::{element::Element, rect::Rect, XYXY};

/// Unchecked bounding box in corner form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct XYXY_<T> {
    pub x1: T,
    pub y1: T,
    pub x2: T,
    pub y2: T,
}

/// Unchecked bounding box in center-size form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CxCyWH_<T> {
    pub cx: T,
    pub cy: T,
    pub w: T,
    pub h: T,
}

impl<T> TryFrom<XYXY_<T>> for XYXY<T>
where
    T: Element,
{
    type Error = anyhow::Error;

    fn try_from(from: XYXY_<T>) -> Result<Self, Self::Error> {
        Self::try_from(&from)
    }
}

impl<T> TryFrom<&XYXY_<T>> for XYXY<T>
where
    T: Element,
{
    type Error = anyhow::Error;

    fn try_from(from: &XYXY_<T>) -> Result<Self, Self::Error> {
        let XYXY_ { x1, y1, x2, y2 } = *from;
        Self::try_from_xyxy([x1, y1, x2, y2])
    }
}

impl<T> TryFrom<CxCyWH_<T>> for XYXY<T>
where
    T: Element,
{
    type Error = anyhow::Error;

    fn try_from(from: CxCyWH_<T>) -> Result<Self, Self::Error> {
        Self::try_from(&from)
    }
}

impl<T> TryFrom<&CxCyWH_<T>> for XYXY<T>
where
    T: Element,
{
    type Error = anyhow::Error;

    fn try_from(from: &CxCyWH_<T>) -> Result<Self, Self::Error> {
        let CxCyWH_ { cx, cy, w, h } = *from;
        Self::try_from_cxcywh([cx, cy, w, h])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RectNum;

    #[test]
    fn ingest_center_size_box() {
        let rect: XYXY<f64> = CxCyWH_ {
            cx: 30.0,
            cy: 30.0,
            w: 40.0,
            h: 20.0,
        }
        .try_into()
        .unwrap();
        assert_eq!(rect.xyxy(), [10.0, 20.0, 50.0, 40.0]);
    }

    #[test]
    fn ingest_negative_size_fails() {
        let result: Result<XYXY<f64>, _> = CxCyWH_ {
            cx: 0.0,
            cy: 0.0,
            w: -1.0,
            h: 2.0,
        }
        .try_into();
        assert!(result.is_err());
    }
}
