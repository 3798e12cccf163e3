// ============================================================================
// Datei      : main.rs – Einstiegspunkt der Anwendung
// Hinweis    : init / info / translate; translate without text argument runs
//              an interactive loop until "quit".
// ============================================================================

use std::{
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
};

use anyhow::{ensure, Context, Result};
use clap::{Args, Parser, Subcommand};

use chartrans::{
    checkpoint, normalise_text, CharVocab, ModelConfig, SpecialTokens, TokenCodec, Transformer,
    Translator, TranslatorConfig,
};

const S_QUIT: &str = "quit";

#[derive(Parser, Debug)]
#[command(
    name = "chartrans",
    version,
    about = "Character-level Transformer translation with greedy decoding."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build a freshly initialised model sized to the vocabularies and save it
    Init(InitArgs),
    /// Print the layer layout and parameter count of a checkpoint
    Info(InfoArgs),
    /// Translate TEXT, or read lines from stdin until "quit"
    Translate(TranslateArgs),
}

#[derive(Args, Debug)]
struct InitArgs {
    /// JSON model config; reference hyperparameters when omitted
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    source_vocab: PathBuf,
    #[arg(long)]
    target_vocab: PathBuf,
    #[arg(long, short)]
    output: PathBuf,
    /// Overrides the config seed
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Args, Debug)]
struct InfoArgs {
    #[arg(long)]
    checkpoint: PathBuf,
}

#[derive(Args, Debug)]
struct TranslateArgs {
    #[arg(long)]
    checkpoint: PathBuf,
    #[arg(long)]
    source_vocab: PathBuf,
    #[arg(long)]
    target_vocab: PathBuf,
    /// Decode step cap; defaults to the model's positional table size
    #[arg(long)]
    max_length: Option<usize>,
    /// Clean up the input (full-width forms, whitespace, case) before encoding
    #[arg(long)]
    normalise: bool,
    text: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("chartrans=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => run_init(args),
        Commands::Info(args) => run_info(args),
        Commands::Translate(args) => run_translate(args),
    }
}

fn load_vocab(p_path: &Path) -> Result<CharVocab> {
    CharVocab::load(p_path, SpecialTokens::default())
        .with_context(|| format!("Kann Vokabular {} nicht laden", p_path.display()))
}

fn run_init(args: InitArgs) -> Result<()> {
    let source_vocab = load_vocab(&args.source_vocab)?;
    let target_vocab = load_vocab(&args.target_vocab)?;

    let mut config = match &args.config {
        Some(p_config) => ModelConfig::from_json_file(p_config)
            .with_context(|| format!("Kann Konfiguration {} nicht lesen", p_config.display()))?,
        None => ModelConfig::reference(source_vocab.vocab_size(), target_vocab.vocab_size()),
    };
    config.input_vocab_size = source_vocab.vocab_size();
    config.target_vocab_size = target_vocab.vocab_size();
    if args.seed.is_some() {
        config.seed = args.seed;
    }

    let model = Transformer::new(config)?;
    checkpoint::save(&args.output, &model)
        .with_context(|| format!("Kann Datei {} nicht erstellen", args.output.display()))?;
    println!(
        "Modell initialisiert: {} Parameter -> {}",
        model.parameter_count(),
        args.output.display()
    );
    Ok(())
}

fn run_info(args: InfoArgs) -> Result<()> {
    let model = checkpoint::load(&args.checkpoint)
        .with_context(|| format!("Fehler beim Laden von {}", args.checkpoint.display()))?;
    let config = &model.config;
    println!("Network: {}", model.network_description());
    println!(
        "layers={} d_model={} heads={} dff={} max_position={}",
        config.num_layers, config.d_model, config.num_heads, config.dff, config.max_position
    );
    println!(
        "vocab: source={} target={}",
        config.input_vocab_size, config.target_vocab_size
    );
    println!("Total parameters: {}", model.parameter_count());
    Ok(())
}

fn run_translate(args: TranslateArgs) -> Result<()> {
    let model = checkpoint::load(&args.checkpoint)
        .with_context(|| format!("Fehler beim Laden von {}", args.checkpoint.display()))?;
    let source_vocab = load_vocab(&args.source_vocab)?;
    let target_vocab = load_vocab(&args.target_vocab)?;
    ensure!(
        source_vocab.vocab_size() == model.config.input_vocab_size,
        "source vocabulary has {} entries, model expects {}",
        source_vocab.vocab_size(),
        model.config.input_vocab_size
    );
    ensure!(
        target_vocab.vocab_size() == model.config.target_vocab_size,
        "target vocabulary has {} entries, model expects {}",
        target_vocab.vocab_size(),
        model.config.target_vocab_size
    );

    ensure!(
        source_vocab.special() == target_vocab.special(),
        "source and target vocabularies disagree on special token ids"
    );

    let config = TranslatorConfig {
        max_length: args.max_length.unwrap_or(model.config.max_position),
        special: source_vocab.special(),
    };
    let translator = Translator::new(model, config)?;
    tracing::info!(
        network = %translator.model().network_description(),
        max_length = translator.config().max_length,
        "translator ready"
    );

    let translate_line = |s_line: &str| -> Result<()> {
        let s_input = if args.normalise {
            normalise_text(s_line)
        } else {
            s_line.to_string()
        };
        let (s_output, translation) =
            translator.translate_text(&source_vocab, &target_vocab, &s_input)?;
        println!("{s_output}");
        if translation.is_truncated() {
            println!(
                "(abgeschnitten nach {} Schritten, kein Endtoken)",
                translation.steps()
            );
        }
        Ok(())
    };

    if let Some(s_text) = &args.text {
        return translate_line(s_text);
    }

    println!("Eingabemodus ('{S_QUIT}' zum Beenden):");
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("> ");
        io::stdout().flush()?;
        let Some(line) = lines.next() else {
            break;
        };
        let s_line = line?;
        let s_line = s_line.trim();
        if s_line.eq_ignore_ascii_case(S_QUIT) {
            break;
        }
        if s_line.is_empty() {
            continue;
        }
        // a bad line (e.g. unknown character) should not end the session
        if let Err(e) = translate_line(s_line) {
            eprintln!("Fehler: {e:#}");
        }
    }
    Ok(())
}
