/***********************************************************************
*  layer_pos_encoding.rs  –  Sinusoidal position encoding table
*
*  The table is a pure function of (max_position, d_model); checkpoints
*  store only these two numbers and the values are recomputed on load.
***********************************************************************/
use bincode::{
    de::Decoder,
    enc::Encoder,
    error::{DecodeError, EncodeError},
    Decode, Encode,
};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Refuse to rebuild absurd tables from a corrupted header.
const I_MAX_TABLE_CELLS: usize = 1 << 28;

/// Builds the fixed (max_position, d_model) table.
///
/// Row `p`, column `2i` holds sin(p / 10000^(2i/d_model)) and column `2i+1`
/// holds cos of the same angle, so both columns of a pair share one frequency.
pub fn positional_encoding(i_max_position: usize, i_d_model: usize) -> Array2<f32> {
    Array2::from_shape_fn((i_max_position, i_d_model), |(pos, j)| {
        let i_pair = (j / 2) * 2;
        let exp = i_pair as f64 / i_d_model as f64;
        let angle = pos as f64 / 10000_f64.powf(exp);
        if j % 2 == 0 {
            angle.sin() as f32
        } else {
            angle.cos() as f32
        }
    })
}

/// Owned positional table; persisted as its shape only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(usize, usize)", into = "(usize, usize)")]
pub struct PositionalTable {
    m_table: Array2<f32>,
}

impl PositionalTable {
    pub fn new(i_max_position: usize, i_d_model: usize) -> Self {
        PositionalTable {
            m_table: positional_encoding(i_max_position, i_d_model),
        }
    }

    pub fn table(&self) -> &Array2<f32> {
        &self.m_table
    }

    pub fn max_position(&self) -> usize {
        self.m_table.nrows()
    }

    pub fn d_model(&self) -> usize {
        self.m_table.ncols()
    }
}

impl From<(usize, usize)> for PositionalTable {
    fn from((i_max_position, i_d_model): (usize, usize)) -> Self {
        PositionalTable::new(i_max_position, i_d_model)
    }
}

impl From<PositionalTable> for (usize, usize) {
    fn from(table: PositionalTable) -> Self {
        (table.max_position(), table.d_model())
    }
}

impl Encode for PositionalTable {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        Encode::encode(&(self.max_position() as u64), encoder)?;
        Encode::encode(&(self.d_model() as u64), encoder)
    }
}

impl<Context> Decode<Context> for PositionalTable {
    fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
        let u_rows: u64 = Decode::decode(decoder)?;
        let u_cols: u64 = Decode::decode(decoder)?;
        let i_rows = usize::try_from(u_rows)
            .map_err(|_| DecodeError::OtherString(format!("positional rows {u_rows}")))?;
        let i_cols = usize::try_from(u_cols)
            .map_err(|_| DecodeError::OtherString(format!("positional width {u_cols}")))?;
        match i_rows.checked_mul(i_cols) {
            Some(i_cells) if i_cells <= I_MAX_TABLE_CELLS => Ok(PositionalTable::new(i_rows, i_cols)),
            _ => Err(DecodeError::OtherString(format!(
                "positional table {i_rows}x{i_cols} too large"
            ))),
        }
    }
}

bincode::impl_borrow_decode!(PositionalTable);

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn even_columns_sin_odd_columns_cos() {
        let d_model = 16;
        let table = positional_encoding(50, d_model);
        assert_eq!(table.dim(), (50, d_model));
        for pos in [0usize, 1, 7, 49] {
            for i in 0..d_model / 2 {
                let angle = pos as f64 / 10000_f64.powf((2 * i) as f64 / d_model as f64);
                assert_abs_diff_eq!(table[(pos, 2 * i)], angle.sin() as f32, epsilon = 1e-6);
                assert_abs_diff_eq!(table[(pos, 2 * i + 1)], angle.cos() as f32, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn position_zero_alternates_zero_one() {
        let table = positional_encoding(4, 8);
        for j in 0..8 {
            let expected = if j % 2 == 0 { 0.0 } else { 1.0 };
            assert_abs_diff_eq!(table[(0, j)], expected, epsilon = 1e-7);
        }
    }

    #[test]
    fn deterministic() {
        assert_eq!(positional_encoding(128, 128), positional_encoding(128, 128));
    }

    #[test]
    fn table_is_stored_as_shape_and_rebuilt() {
        let table = PositionalTable::new(32, 16);
        let cfg = bincode::config::standard();
        let v_bytes = bincode::encode_to_vec(&table, cfg).unwrap();
        // two varint dimensions, no table values
        assert_eq!(v_bytes.len(), 2);
        let (decoded, _): (PositionalTable, usize) =
            bincode::decode_from_slice(&v_bytes, cfg).unwrap();
        assert_eq!(decoded, table);
        assert_eq!(decoded.table(), &positional_encoding(32, 16));
    }

    #[test]
    fn oversized_table_header_rejected() {
        let cfg = bincode::config::standard();
        let v_bytes = bincode::encode_to_vec((1u64 << 20, 1u64 << 20), cfg).unwrap();
        let result: Result<(PositionalTable, usize), _> = bincode::decode_from_slice(&v_bytes, cfg);
        assert!(result.is_err());
    }
}
