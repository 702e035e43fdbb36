pub use anyhow::{bail, ensure, format_err, Context as _, Error, Result};
pub use approx::abs_diff_eq;
pub use bbox::{
    argsort_descending, iou_matrix, nms, prelude::*, BoxCoder, BoxCoderInit, Element, Transform, HW,
    XYXY,
};
pub use getset::{CopyGetters, Getters};
pub use itertools::{chain, iproduct, izip, Itertools as _};
pub use lazy_static::lazy_static;
pub use log::{debug, info, warn};
pub use ndarray::{s, Array1, Array2, Array3, Array4, ArrayView1, ArrayView2, Axis};
pub use noisy_float::prelude::*;
pub use rand::{prelude::*, rngs::StdRng};
pub use rayon::prelude::*;
pub use serde::{Deserialize, Serialize};
pub use std::{
    cmp::Ordering,
    collections::HashSet,
    fmt::{self, Debug},
    iter,
    ops::Range,
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};
