use crate::common::*;
use std::ops::{Add, AddAssign};

/// An unnormalized loss together with the number of summed terms.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LossSum {
    pub total: f64,
    pub count: usize,
}

impl LossSum {
    pub fn new(total: f64, count: usize) -> Self {
        Self { total, count }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    /// The average over the summed terms, or zero if nothing was summed.
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total / self.count as f64
        }
    }

    /// The total divided by an external count, or zero if it is zero.
    pub fn normalize_by(&self, count: usize) -> f64 {
        if count == 0 {
            0.0
        } else {
            self.total / count as f64
        }
    }
}

impl Add for LossSum {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            total: self.total + rhs.total,
            count: self.count + rhs.count,
        }
    }
}

impl AddAssign for LossSum {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl iter::Sum for LossSum {
    fn sum<I>(iter: I) -> Self
    where
        I: Iterator<Item = Self>,
    {
        iter.fold(Self::zero(), |acc, item| acc + item)
    }
}
