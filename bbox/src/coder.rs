use crate::{common::*, Element, Rect, XYXY};

/// The default cap on the log-scale width/height growth, `ln(1000 / 16)`.
pub fn default_scale_clamp<T>() -> T
where
    T: Element,
{
    let ratio = T::from(1000.0 / 16.0).unwrap_or_else(T::one);
    ratio.ln()
}

#[derive(Debug, Clone)]
pub struct BoxCoderInit<T> {
    /// Weights applied to `(dx, dy, dw, dh)`.
    pub weights: [T; 4],
    /// The upper bound of `dw` and `dh` after un-weighting.
    pub scale_clamp: Option<T>,
}

impl<T> BoxCoderInit<T>
where
    T: Element,
{
    pub fn build(self) -> Result<BoxCoder<T>> {
        let Self {
            weights,
            scale_clamp,
        } = self;
        let scale_clamp = scale_clamp.unwrap_or_else(default_scale_clamp);

        ensure!(
            weights
                .iter()
                .all(|weight| weight.is_finite() && *weight > T::zero()),
            "box coder weights must be positive and finite, but get {:?}",
            weights
        );
        ensure!(
            scale_clamp.is_finite() && scale_clamp > T::zero(),
            "scale_clamp must be positive and finite"
        );

        Ok(BoxCoder {
            weights,
            scale_clamp,
        })
    }
}

/// Encodes boxes as R-CNN deltas relative to reference boxes and back.
///
/// `dx, dy` are center offsets normalized by the reference size, `dw, dh` are
/// log ratios of the sizes, each multiplied by its weight.
#[derive(Debug, Clone)]
pub struct BoxCoder<T> {
    weights: [T; 4],
    scale_clamp: T,
}

impl<T> BoxCoder<T>
where
    T: Element,
{
    pub fn weights(&self) -> [T; 4] {
        self.weights
    }

    pub fn encode(&self, reference: &XYXY<T>, target: &XYXY<T>) -> [T; 4] {
        let eps = T::geometry_epsilon();
        let [wx, wy, ww, wh] = self.weights;

        let ref_w = reference.w().max(eps);
        let ref_h = reference.h().max(eps);
        let tgt_w = target.w().max(eps);
        let tgt_h = target.h().max(eps);

        let dx = wx * (target.cx() - reference.cx()) / ref_w;
        let dy = wy * (target.cy() - reference.cy()) / ref_h;
        let dw = ww * (tgt_w / ref_w).ln();
        let dh = wh * (tgt_h / ref_h).ln();

        [
            dx.finite_or_zero(),
            dy.finite_or_zero(),
            dw.finite_or_zero(),
            dh.finite_or_zero(),
        ]
    }

    pub fn decode(&self, reference: &XYXY<T>, delta: [T; 4]) -> XYXY<T> {
        let [wx, wy, ww, wh] = self.weights;
        let [dx, dy, dw, dh] = delta;
        let two = T::one() + T::one();

        let dx = (dx / wx).finite_or_zero();
        let dy = (dy / wy).finite_or_zero();
        let dw = (dw / ww).finite_or_zero().min(self.scale_clamp);
        let dh = (dh / wh).finite_or_zero().min(self.scale_clamp);

        let ref_w = reference.w().finite_or_zero();
        let ref_h = reference.h().finite_or_zero();
        let cx = dx * ref_w + reference.cx().finite_or_zero();
        let cy = dy * ref_h + reference.cy().finite_or_zero();
        let w = dw.exp() * ref_w;
        let h = dh.exp() * ref_h;

        XYXY {
            x1: cx - w / two,
            y1: cy - h / two,
            x2: cx + w / two,
            y2: cy + h / two,
        }
    }
}
