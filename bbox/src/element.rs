use crate::common::*;

/// The coordinate type of boxes that take part in geometry computations.
pub trait Element: Float + Debug + Send + Sync {
    /// The lower bound of IoU denominators and box extents.
    fn geometry_epsilon() -> Self {
        Self::from(1e-6).unwrap_or_else(Self::epsilon)
    }

    /// Replaces NaN and infinite values with zero.
    fn finite_or_zero(self) -> Self {
        if self.is_finite() {
            self
        } else {
            Self::zero()
        }
    }
}

impl<T> Element for T where T: Float + Debug + Send + Sync {}
