// src/multi_head_attention.rs
// Scaled dot-product attention and MultiHeadAttention with explicit masks
use bincode::{Decode, Encode};
use ndarray::{concatenate, s, Array2, Array4, ArrayView2, Axis};
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};
use crate::layer_dense::Dense;
use crate::math::{softmax_rows_par, MASK_PENALTY};

/// softmax(Q·Kᵗ / sqrt(dk) − mask·1e9) · V
///
/// * `q` – [Lq, dk], `k` – [Lk, dk], `v` – [Lk, dv]
/// * `mask` – broadcastable to [Lq, Lk], 1.0 marks a suppressed key
///
/// Returns the attended values [Lq, dv] and the weights [Lq, Lk]. A query row
/// whose keys are all suppressed gets zero weights (and a zero output) rather
/// than the uniform distribution softmax would produce.
pub fn scaled_dot_product_attention(
    q: ArrayView2<'_, f32>,
    k: ArrayView2<'_, f32>,
    v: ArrayView2<'_, f32>,
    mask: Option<ArrayView2<'_, f32>>,
) -> ModelResult<(Array2<f32>, Array2<f32>)> {
    if q.ncols() != k.ncols() {
        return Err(ModelError::shape_mismatch("attention key depth", q.ncols(), k.ncols()));
    }
    if k.nrows() != v.nrows() {
        return Err(ModelError::shape_mismatch("attention value length", k.nrows(), v.nrows()));
    }
    let (i_lq, i_lk) = (q.nrows(), k.nrows());

    let scale = (q.ncols() as f32).sqrt();
    let mut logits = q.dot(&k.t());
    logits.mapv_inplace(|x| x / scale);

    let mask_b = match mask.as_ref() {
        Some(m) => Some(
            m.broadcast((i_lq, i_lk))
                .ok_or_else(|| ModelError::shape_mismatch("attention mask", (i_lq, i_lk), m.dim()))?,
        ),
        None => None,
    };

    if let Some(m) = mask_b.as_ref() {
        logits.zip_mut_with(m, |l, &flag| *l -= flag * MASK_PENALTY);
    }

    let mut weights = softmax_rows_par(&logits);

    if let Some(m) = mask_b.as_ref() {
        for (mut w_row, m_row) in weights.rows_mut().into_iter().zip(m.rows()) {
            if i_lk > 0 && m_row.iter().all(|&flag| flag >= 0.5) {
                w_row.fill(0.0);
            }
        }
    }

    let out = weights.dot(&v);
    Ok((out, weights))
}

#[derive(Debug, Clone, Serialize, Deserialize, Encode, Decode)]
pub struct MultiHeadAttention {
    pub i_embed: usize,
    pub i_heads: usize,
    pub i_head_dim: usize,
    pub wq: Dense,
    pub wk: Dense,
    pub wv: Dense,
    pub dense: Dense, // output projection
}

impl MultiHeadAttention {
    pub fn new<R: Rng + ?Sized>(rng: &mut R, i_embed: usize, i_heads: usize) -> ModelResult<Self> {
        if i_heads == 0 || i_embed % i_heads != 0 {
            return Err(ModelError::InvalidHeadDimension {
                d_model: i_embed,
                num_heads: i_heads,
            });
        }
        Ok(MultiHeadAttention {
            i_embed,
            i_heads,
            i_head_dim: i_embed / i_heads,
            wq: Dense::new(rng, i_embed, i_embed),
            wk: Dense::new(rng, i_embed, i_embed),
            wv: Dense::new(rng, i_embed, i_embed),
            dense: Dense::new(rng, i_embed, i_embed),
        })
    }

    pub fn parameter_count(&self) -> usize {
        self.wq.parameter_count()
            + self.wk.parameter_count()
            + self.wv.parameter_count()
            + self.dense.parameter_count()
    }

    /// Head split must tile `d_model` exactly and every projection must be
    /// [d_model, d_model].
    pub fn check_geometry(&self, i_d_model: usize, i_heads: usize) -> ModelResult<()> {
        if self.i_embed != i_d_model
            || self.i_heads != i_heads
            || self.i_head_dim.checked_mul(self.i_heads) != Some(self.i_embed)
        {
            return Err(ModelError::shape_mismatch(
                "attention heads (embed, heads, head_dim)",
                (i_d_model, i_heads, i_d_model / i_heads.max(1)),
                (self.i_embed, self.i_heads, self.i_head_dim),
            ));
        }
        self.wq.check_shape("attention wq", i_d_model, i_d_model)?;
        self.wk.check_shape("attention wk", i_d_model, i_d_model)?;
        self.wv.check_shape("attention wv", i_d_model, i_d_model)?;
        self.dense.check_shape("attention output", i_d_model, i_d_model)
    }

    /// Project, split into heads, attend per head, merge, project back.
    ///
    /// Returns the output [Lq, embed] and weights [1, heads, Lq, Lk].
    pub fn forward(
        &self,
        m_query: &Array2<f32>,
        m_key: &Array2<f32>,
        m_value: &Array2<f32>,
        mask: Option<&Array2<f32>>,
    ) -> ModelResult<(Array2<f32>, Array4<f32>)> {
        if m_key.nrows() != m_value.nrows() {
            return Err(ModelError::shape_mismatch(
                "key/value length",
                m_key.nrows(),
                m_value.nrows(),
            ));
        }

        // 1) Projections
        let m_q = self.wq.forward(m_query)?;
        let m_k = self.wk.forward(m_key)?;
        let m_v = self.wv.forward(m_value)?;

        // 2) Heads
        if self.i_head_dim.checked_mul(self.i_heads) != Some(m_q.ncols()) {
            return Err(ModelError::shape_mismatch(
                "attention head split",
                m_q.ncols(),
                (self.i_heads, self.i_head_dim),
            ));
        }
        let q_heads = self.split_heads_vec(&m_q);
        let k_heads = self.split_heads_vec(&m_k);
        let v_heads = self.split_heads_vec(&m_v);

        // 3) Attention per head
        let per_head: Vec<(Array2<f32>, Array2<f32>)> = (0..self.i_heads)
            .into_par_iter()
            .map(|h| {
                scaled_dot_product_attention(
                    q_heads[h].view(),
                    k_heads[h].view(),
                    v_heads[h].view(),
                    mask.map(|m| m.view()),
                )
            })
            .collect::<ModelResult<Vec<_>>>()?;

        let (i_lq, i_lk) = (m_query.nrows(), m_key.nrows());
        let mut weights = Array4::<f32>::zeros((1, self.i_heads, i_lq, i_lk));
        let mut ctx_per_head: Vec<Array2<f32>> = Vec::with_capacity(self.i_heads);
        for (h, (ctx, w)) in per_head.into_iter().enumerate() {
            weights.slice_mut(s![0, h, .., ..]).assign(&w);
            ctx_per_head.push(ctx);
        }

        // 4) Merge heads + output projection
        let m_concat = self.merge_heads_vec(&ctx_per_head)?;
        debug_assert_eq!(m_concat.ncols(), self.i_embed);
        let m_out = self.dense.forward(&m_concat)?;
        Ok((m_out, weights))
    }

    fn split_heads_vec(&self, m: &Array2<f32>) -> Vec<Array2<f32>> {
        let mut out = Vec::with_capacity(self.i_heads);
        for h in 0..self.i_heads {
            let c0 = h * self.i_head_dim;
            let c1 = c0 + self.i_head_dim;
            out.push(m.slice(s![.., c0..c1]).to_owned());
        }
        out
    }

    fn merge_heads_vec(&self, parts: &[Array2<f32>]) -> ModelResult<Array2<f32>> {
        let views: Vec<_> = parts.iter().map(|a| a.view()).collect();
        concatenate(Axis(1), &views)
            .map_err(|e| ModelError::shape_mismatch("merge heads", self.i_embed, e.to_string()))
    }
}
