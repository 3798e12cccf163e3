// math.rs
// ============================================================================
// Hinweis: Numerics shared by all layers: softmax, inverted dropout, argmax,
//          parameter initialisation.
// ============================================================================

#![forbid(unsafe_code)]

use std::cmp::Ordering;

use ndarray::{Array2, ArrayView1, Axis};
use ndarray::parallel::prelude::*;
use rand::Rng;
use rand_distr::{Distribution, Normal};

/// Added (negated) to the logits of suppressed positions; large enough that
/// exp() underflows to zero after max-subtraction.
pub const MASK_PENALTY: f32 = 1e9;

/// Numerically stable softmax over each row, rows in parallel.
pub fn softmax_rows_par(m: &Array2<f32>) -> Array2<f32> {
    let mut out = m.clone();
    out.axis_iter_mut(Axis(0))
        .into_par_iter()
        .for_each(|mut row| {
            let max_v = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let mut sum = 0.0f32;
            for v in row.iter_mut() {
                *v = (*v - max_v).exp();
                sum += *v;
            }
            if sum > 0.0 {
                for v in row.iter_mut() {
                    *v /= sum;
                }
            }
        });
    out
}

/// Inverted dropout. Identity when `training` is false or the rate is 0.
pub fn dropout(m: Array2<f32>, f_rate: f32, training: bool) -> Array2<f32> {
    let p = f_rate.clamp(0.0, 1.0);
    if !training || p <= 0.0 {
        return m;
    }
    let scale = if p < 1.0 { 1.0 / (1.0 - p) } else { 0.0 };
    let mut rng = rand::thread_rng();
    let mut out = m;
    for o in out.iter_mut() {
        if rng.r#gen::<f32>() < p {
            *o = 0.0;
        } else {
            *o *= scale;
        }
    }
    out
}

/// Index of the largest value; ties resolve to the lowest index. NaN entries
/// are skipped; `None` if the row is empty or all NaN.
pub fn argmax(v: ArrayView1<'_, f32>) -> Option<usize> {
    v.iter()
        .enumerate()
        .filter(|(_, d_val)| !d_val.is_nan())
        .fold(None, |best: Option<(usize, f32)>, (i_idx, &d_val)| match best {
            Some((_, d_best)) if d_val.partial_cmp(&d_best) != Some(Ordering::Greater) => best,
            _ => Some((i_idx, d_val)),
        })
        .map(|(i_idx, _)| i_idx)
}

/// He-style normal initialisation (std = sqrt(2 / fan_in)).
pub fn he_normal<R: Rng + ?Sized>(rng: &mut R, shape: (usize, usize), i_fan_in: usize) -> Array2<f32> {
    let std = (2.0 / i_fan_in.max(1) as f32).sqrt();
    normal_matrix(rng, shape, std)
}

pub fn normal_matrix<R: Rng + ?Sized>(rng: &mut R, shape: (usize, usize), std: f32) -> Array2<f32> {
    match Normal::new(0.0, std) {
        Ok(normal) => Array2::from_shape_fn(shape, |_| normal.sample(rng)),
        // std is derived from positive sizes; a degenerate value falls back to zeros
        Err(_) => Array2::zeros(shape),
    }
}
