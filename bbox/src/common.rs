pub use anyhow::{ensure, Result};
pub use itertools::{iproduct, izip};
pub use ndarray::Array2;
pub use num_traits::{Float, Num, NumCast, One, Zero};
pub use std::{
    cmp::Ordering,
    fmt::Debug,
    ops::Mul,
};
