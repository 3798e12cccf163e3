use chartrans::checkpoint::{load, load_into, save};
use chartrans::{ModelConfig, Seq2SeqModel, Transformer};
use ndarray::Array2;

fn small_config(seed: u64) -> ModelConfig {
    ModelConfig {
        num_layers: 2,
        d_model: 16,
        num_heads: 4,
        dff: 32,
        dropout_rate: 0.1,
        max_position: 24,
        input_vocab_size: 11,
        target_vocab_size: 13,
        layer_norm_epsilon: 1e-6,
        seed: Some(seed),
    }
}

fn row(v: &[usize]) -> Array2<usize> {
    Array2::from_shape_vec((1, v.len()), v.to_vec()).unwrap()
}

#[test]
fn test_save_load_reproduces_logits() {
    let dir = tempfile::tempdir().unwrap();
    let file_path = dir.path().join("model.bin");

    let model = Transformer::new(small_config(21)).unwrap();
    save(&file_path, &model).unwrap();
    let loaded = load(&file_path).unwrap();

    assert_eq!(loaded.config, model.config);
    assert_eq!(loaded.parameter_count(), model.parameter_count());

    let source = row(&[1, 4, 5, 2]);
    let target = row(&[1, 7, 3]);
    let a = model.forward(&source, &target, false).unwrap();
    let b = loaded.forward(&source, &target, false).unwrap();
    assert_eq!(a.logits, b.logits);
    for ((name_a, w_a), (name_b, w_b)) in a.attention.iter().zip(b.attention.iter()) {
        assert_eq!(name_a, name_b);
        assert_eq!(w_a, w_b);
    }
}

#[test]
fn test_load_into_replaces_weights() {
    let dir = tempfile::tempdir().unwrap();
    let file_path = dir.path().join("model.bin");

    let trained = Transformer::new(small_config(1)).unwrap();
    save(&file_path, &trained).unwrap();

    let mut fresh = Transformer::new(small_config(2)).unwrap();
    assert_ne!(fresh.final_layer.w, trained.final_layer.w);
    load_into(&file_path, &mut fresh).unwrap();

    let source = row(&[1, 9, 2]);
    let target = row(&[1]);
    assert_eq!(
        fresh.forward(&source, &target, false).unwrap().logits,
        trained.forward(&source, &target, false).unwrap().logits
    );
}

#[test]
fn test_inconsistent_head_split_rejected_on_load() {
    let dir = tempfile::tempdir().unwrap();
    let file_path = dir.path().join("model.bin");

    let mut model = Transformer::new(small_config(8)).unwrap();
    // 4 heads of width 5 do not tile d_model 16
    model.encoder.enc_layers[0].mha.i_head_dim = 5;
    save(&file_path, &model).unwrap();

    let err = load(&file_path).unwrap_err();
    assert!(matches!(err, chartrans::ModelError::Checkpoint(_)));
}

#[test]
fn test_wrong_layer_width_rejected_on_load() {
    let dir = tempfile::tempdir().unwrap();
    let file_path = dir.path().join("model.bin");

    let mut model = Transformer::new(small_config(9)).unwrap();
    model.decoder.dec_layers[1].ffn.dense2.w = Array2::zeros((32, 15));
    save(&file_path, &model).unwrap();

    let err = load(&file_path).unwrap_err();
    assert!(matches!(err, chartrans::ModelError::Checkpoint(_)));

    let mut target = Transformer::new(small_config(10)).unwrap();
    assert!(load_into(&file_path, &mut target).is_err());
}

#[test]
fn test_positional_tables_rebuilt_not_stored() {
    let dir = tempfile::tempdir().unwrap();
    let file_path = dir.path().join("model.bin");

    let model = Transformer::new(small_config(4)).unwrap();
    save(&file_path, &model).unwrap();
    let loaded = load(&file_path).unwrap();
    assert_eq!(
        loaded.encoder.pos_encoding.table(),
        &chartrans::layer_pos_encoding::positional_encoding(24, 16)
    );
    assert_eq!(loaded.decoder.pos_encoding, model.decoder.pos_encoding);

    // the two 24x16 tables would add 3072 bytes of f32 values if persisted
    let i_file_len = std::fs::metadata(&file_path).unwrap().len() as usize;
    let i_param_bytes = model.parameter_count() * std::mem::size_of::<f32>();
    assert!(i_file_len < i_param_bytes + 3072);
}

#[test]
fn test_missing_checkpoint_surfaces_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = load(dir.path().join("nope.bin")).unwrap_err();
    assert!(matches!(err, chartrans::ModelError::Io(_)));
}
