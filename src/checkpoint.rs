// ===========================================================================
//  Datei:        checkpoint.rs
//  Projekt:      chartrans – Character-Level Transformer Translator
//  Modul:        Parameter persistence
// ---------------------------------------------------------------------------
//  Layout (bincode, standard config, written in order)
//  ------
//      1  magic tag      "CHARTRANS"
//      2  version        u32
//      3  ModelConfig
//      4  Transformer    (config repeated, pad id, all layer weights;
//                        positional tables as their shape only)
//
//  The config is stored ahead of the weights so a reader can check shapes
//  before committing to the (large) parameter block. After decoding, every
//  layer's shapes and head split are checked against it.
// ===========================================================================

use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

use bincode::{config, decode_from_std_read, encode_into_std_write};

use crate::{
    config::ModelConfig,
    error::{ModelError, ModelResult},
    transformer::Transformer,
};

pub const S_MAGIC: &str = "CHARTRANS";
pub const U_VERSION: u32 = 2;
const I_BUF_CAPACITY: usize = 8 * 1024 * 1024; // 8 MB

pub fn save(p_path: impl AsRef<Path>, model: &Transformer) -> ModelResult<()> {
    let p_path = p_path.as_ref();
    let f = File::create(p_path)?;
    let mut w = BufWriter::with_capacity(I_BUF_CAPACITY, f);
    let cfg = config::standard();

    encode_into_std_write(S_MAGIC, &mut w, cfg)?;
    encode_into_std_write(U_VERSION, &mut w, cfg)?;
    encode_into_std_write(&model.config, &mut w, cfg)?;
    encode_into_std_write(model, &mut w, cfg)?;
    w.flush()?;

    tracing::info!(
        path = %p_path.display(),
        parameters = model.parameter_count(),
        "checkpoint saved"
    );
    Ok(())
}

/// Reads the header and returns the stored configuration plus the reader
/// positioned at the parameter block.
fn read_header(p_path: &Path) -> ModelResult<(ModelConfig, BufReader<File>)> {
    let f = File::open(p_path)?;
    let mut r = BufReader::with_capacity(I_BUF_CAPACITY, f);
    let cfg = config::standard();

    let s_magic: String = decode_from_std_read(&mut r, cfg)?;
    if s_magic != S_MAGIC {
        return Err(ModelError::Checkpoint(format!(
            "{}: not a chartrans checkpoint",
            p_path.display()
        )));
    }
    let u_version: u32 = decode_from_std_read(&mut r, cfg)?;
    if u_version != U_VERSION {
        return Err(ModelError::Checkpoint(format!(
            "{}: unsupported format version {u_version} (expected {U_VERSION})",
            p_path.display()
        )));
    }
    let stored: ModelConfig = decode_from_std_read(&mut r, cfg)?;
    Ok((stored, r))
}

fn read_model(p_path: &Path, stored: &ModelConfig, r: &mut BufReader<File>) -> ModelResult<Transformer> {
    let model: Transformer = decode_from_std_read(r, config::standard())?;
    if &model.config != stored {
        return Err(ModelError::Checkpoint(format!(
            "{}: parameter block disagrees with stored configuration",
            p_path.display()
        )));
    }
    model
        .check_geometry()
        .map_err(|e| ModelError::Checkpoint(format!("{}: {e}", p_path.display())))?;
    Ok(model)
}

/// Dimensions that determine parameter shapes; dropout and seed may differ.
fn same_shape(a: &ModelConfig, b: &ModelConfig) -> bool {
    a.num_layers == b.num_layers
        && a.d_model == b.d_model
        && a.num_heads == b.num_heads
        && a.dff == b.dff
        && a.max_position == b.max_position
        && a.input_vocab_size == b.input_vocab_size
        && a.target_vocab_size == b.target_vocab_size
}

/// Reconstructs a model entirely from the file.
pub fn load(p_path: impl AsRef<Path>) -> ModelResult<Transformer> {
    let p_path = p_path.as_ref();
    let (stored, mut r) = read_header(p_path)?;
    stored.validate()?;
    let model = read_model(p_path, &stored, &mut r)?;
    tracing::info!(
        path = %p_path.display(),
        parameters = model.parameter_count(),
        "checkpoint loaded"
    );
    Ok(model)
}

/// Populates an already constructed model. Fails before reading any weights
/// if the stored shapes differ from `model`'s.
pub fn load_into(p_path: impl AsRef<Path>, model: &mut Transformer) -> ModelResult<()> {
    let p_path = p_path.as_ref();
    let (stored, mut r) = read_header(p_path)?;
    if !same_shape(&stored, &model.config) {
        return Err(ModelError::Checkpoint(format!(
            "{}: stored shape {:?} does not match model shape {:?}",
            p_path.display(),
            stored,
            model.config
        )));
    }
    *model = read_model(p_path, &stored, &mut r)?;
    tracing::info!(path = %p_path.display(), "checkpoint weights restored");
    Ok(())
}
