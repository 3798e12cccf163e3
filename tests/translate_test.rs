use chartrans::config::{END_ID, START_ID};
use chartrans::{
    CharVocab, ModelConfig, SpecialTokens, Termination, Transformer, Translator,
    TranslatorConfig,
};

fn small_config() -> ModelConfig {
    ModelConfig {
        num_layers: 2,
        d_model: 16,
        num_heads: 4,
        dff: 32,
        dropout_rate: 0.1,
        max_position: 16,
        input_vocab_size: 10,
        target_vocab_size: 8,
        layer_norm_epsilon: 1e-6,
        seed: Some(5150),
    }
}

fn vocab(tokens: &[&str]) -> CharVocab {
    CharVocab::from_tokens(
        tokens.iter().map(|s| s.to_string()).collect(),
        SpecialTokens::default(),
    )
    .unwrap()
}

fn translator(model: Transformer, max_length: usize) -> Translator<Transformer> {
    let config = TranslatorConfig {
        max_length,
        special: SpecialTokens::default(),
    };
    Translator::new(model, config).unwrap()
}

#[test]
fn test_untrained_model_translates_to_valid_ids() {
    let t = translator(Transformer::new(small_config()).unwrap(), 10);
    let result = t.translate(&[1, 9, 9, 2]).unwrap();

    assert_eq!(result.tokens[0], START_ID);
    assert!(result.tokens.len() <= 11);
    assert!(result.tokens.iter().all(|&id| id < 8));
    match result.termination {
        Termination::EndToken => assert_eq!(result.tokens.last(), Some(&END_ID)),
        Termination::LengthCap => assert_eq!(result.tokens.len(), 11),
    }

    // one self and one cross entry per decoder layer
    assert_eq!(result.attention.len(), 4);
    let names: Vec<&str> = result.attention.names().collect();
    assert_eq!(
        names,
        vec!["layer_1_self", "layer_1_cross", "layer_2_self", "layer_2_cross"]
    );
    let steps = result.tokens.len() - 1;
    let cross = result.attention.get("layer_2_cross").unwrap();
    assert_eq!(cross.dim(), (1, 4, steps, 4));
}

#[test]
fn test_text_round_trip_through_vocabularies() {
    let source_vocab = vocab(&["<pad>", "<s>", "</s>", "<unk>", "我", "哋", "去", "食", "飯", "嘢"]);
    let target_vocab = vocab(&["<pad>", "<s>", "</s>", "<unk>", "\u{2581}we", "##go", "eat", "!"]);

    // steer the projection so every step emits "eat" until the cap
    let mut model = Transformer::new(small_config()).unwrap();
    model.final_layer.w.fill(0.0);
    model.final_layer.b.fill(0.0);
    model.final_layer.b[(0, 6)] = 5.0;

    let t = translator(model, 3);
    let (text, result) = t
        .translate_text(&source_vocab, &target_vocab, "我哋去食飯")
        .unwrap();
    assert_eq!(result.tokens, vec![START_ID, 6, 6, 6]);
    assert!(result.is_truncated());
    assert_eq!(text, "eateateat");
}

#[test]
fn test_unknown_character_without_unk_is_reported() {
    let source_vocab = vocab(&["<pad>", "<s>", "</s>", "a", "b"]);
    let target_vocab = vocab(&["<pad>", "<s>", "</s>", "x"]);
    let t = translator(Transformer::new(small_config()).unwrap(), 4);
    assert!(matches!(
        t.translate_text(&source_vocab, &target_vocab, "abc"),
        Err(chartrans::ModelError::Vocabulary(_))
    ));
}

#[test]
fn test_shared_model_serves_parallel_requests() {
    let t = translator(Transformer::new(small_config()).unwrap(), 6);
    let sources: Vec<Vec<usize>> = (3..9).map(|id| vec![1, id, id, 2]).collect();
    let results = t.translate_many(&sources);
    assert_eq!(results.len(), sources.len());
    for (source, result) in sources.iter().zip(results) {
        let result = result.unwrap();
        assert_eq!(result.tokens, t.translate(source).unwrap().tokens);
    }
}
