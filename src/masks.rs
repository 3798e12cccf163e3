// ===========================================================================
//  Datei:        masks.rs
//  Projekt:      chartrans – Character-Level Transformer Translator
//  Modul:        Attention masks
// ---------------------------------------------------------------------------
//  Mask convention: 0.0 = attend, 1.0 = suppressed. Masks are rebuilt for
//  every forward call from the token ids and never cached.
// ===========================================================================

use ndarray::{Array2, ArrayView1, Zip};

/// 1 where the token equals `i_pad`, shape (1, seq_len) so it broadcasts
/// over query rows (and over heads, which are applied one at a time).
pub fn padding_mask(v_tokens: ArrayView1<'_, usize>, i_pad: usize) -> Array2<f32> {
    let i_len = v_tokens.len();
    Array2::from_shape_fn((1, i_len), |(_, j)| if v_tokens[j] == i_pad { 1.0 } else { 0.0 })
}

/// Strict upper triangle of ones: position i may not see any j > i.
pub fn look_ahead_mask(i_size: usize) -> Array2<f32> {
    Array2::from_shape_fn((i_size, i_size), |(i, j)| if j > i { 1.0 } else { 0.0 })
}

/// Decoder self-attention mask: future positions or padding are suppressed.
pub fn combined_decoder_mask(v_target: ArrayView1<'_, usize>, i_pad: usize) -> Array2<f32> {
    let i_len = v_target.len();
    let m_pad = padding_mask(v_target, i_pad);
    let mut m_mask = look_ahead_mask(i_len);
    // m_pad is (1, L); broadcast over the L query rows
    Zip::from(&mut m_mask)
        .and_broadcast(&m_pad)
        .for_each(|m, &p| *m = m.max(p));
    m_mask
}
