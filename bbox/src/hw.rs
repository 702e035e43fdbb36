use crate::{common::*, XYXY};

/// Image, feature map or mask extent, height first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HW<T> {
    h: T,
    w: T,
}

impl<T> HW<T>
where
    T: Copy + Num + PartialOrd,
{
    pub fn try_from_hw(hw: [T; 2]) -> Result<Self> {
        let [h, w] = hw;
        let zero = T::zero();
        ensure!(h >= zero && w >= zero, "an extent must be non-negative");
        Ok(Self { h, w })
    }

    pub fn from_hw(hw: [T; 2]) -> Self {
        Self::try_from_hw(hw).unwrap()
    }

    pub fn h(&self) -> T {
        self.h
    }

    pub fn w(&self) -> T {
        self.w
    }

    pub fn hw(&self) -> [T; 2] {
        [self.h, self.w]
    }

    pub fn area(&self) -> T {
        self.h * self.w
    }

    pub fn is_empty(&self) -> bool {
        self.h == T::zero() || self.w == T::zero()
    }

    /// The box `[0, 0, w, h]` spanning the whole extent.
    pub fn to_rect(&self) -> XYXY<T> {
        let zero = T::zero();
        XYXY {
            x1: zero,
            y1: zero,
            x2: self.w,
            y2: self.h,
        }
    }
}

impl HW<usize> {
    /// The pixel extent as box clipping bounds.
    pub fn to_bounds(&self) -> HW<f32> {
        HW {
            h: self.h as f32,
            w: self.w as f32,
        }
    }

    /// The grid of `stride`-pixel cells covering the extent. Partial cells
    /// at the bottom and right edges count as whole cells.
    pub fn grid_size(&self, stride: usize) -> Result<Self> {
        ensure!(stride > 0, "grid stride must be positive");
        let ceil_div = |value: usize| value / stride + <usize as From<bool>>::from(value % stride != 0);
        Ok(Self {
            h: ceil_div(self.h),
            w: ceil_div(self.w),
        })
    }

    /// `(row, col)` of every cell in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize)> {
        iproduct!(0..self.h, 0..self.w)
    }
}
