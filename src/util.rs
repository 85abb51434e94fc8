//! Utility functions
use crate::AttackFloat;
use ndarray::{Array1, ArrayD, ArrayViewD, Zip};
use ndarray_stats::interpolate::Lower;
use ndarray_stats::Quantile1dExt;
use noisy_float::types::{n64, N64};

pub fn l2_norm(x: &ArrayViewD<AttackFloat>) -> AttackFloat {
    x.iter().map(|v| v * v).sum::<AttackFloat>().sqrt()
}

pub fn linf_norm(x: &ArrayViewD<AttackFloat>) -> AttackFloat {
    x.iter().fold(0., |acc, v| acc.max(v.abs()))
}

/// Elementwise clamp into `[min, max]`.
pub fn clip(mut x: ArrayD<AttackFloat>, min: AttackFloat, max: AttackFloat) -> ArrayD<AttackFloat> {
    x.mapv_inplace(|v| v.clamp(min, max));
    x
}

/// `(1 - t) * from + t * to`
pub fn interpolate(
    from: &ArrayViewD<AttackFloat>,
    to: &ArrayViewD<AttackFloat>,
    t: AttackFloat,
) -> ArrayD<AttackFloat> {
    Zip::from(from)
        .and(to)
        .map_collect(|&a, &b| (1. - t) * a + t * b)
}

pub fn sign(x: &ArrayViewD<AttackFloat>) -> ArrayD<AttackFloat> {
    x.mapv(|v| {
        if v > 0. {
            1.
        } else if v < 0. {
            -1.
        } else {
            0.
        }
    })
}

/// Lower median, i.e. the smaller of the two middle values for even lengths.
///
/// Returns `None` for an empty slice or when any value is NaN.
pub fn lower_median(values: &[AttackFloat]) -> Option<AttackFloat> {
    if values.iter().any(|v| v.is_nan()) {
        return None;
    }
    let mut arr: Array1<N64> = values.iter().map(|&v| n64(v)).collect();
    arr.quantile_mut(n64(0.5), &Lower)
        .ok()
        .map(|m| m.raw())
}
