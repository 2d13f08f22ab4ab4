//! Pet Siamese CLI
//!
//! Train the same-animal model from a list of labeled pairs, compare two
//! photos with an exported model, and inspect exports or stored pair lists.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use pet_siamese::backend::{backend_report, default_device, TrainingBackend};
use pet_siamese::dataset::pairs::DataBalance;
use pet_siamese::persistence::{
    load_document, load_pair_records, save_document, FileFetcher, FileStore, KeyValueStore,
};
use pet_siamese::utils::format_duration;
use pet_siamese::utils::logging::{init_logging, LogConfig};
use pet_siamese::{
    ConfigOverrides, EngineEvent, ImageSource, PairRecord, SiameseConfig, SiameseEngine,
    StatusKind,
};

/// Same-animal detection for pet photos with a siamese CNN
#[derive(Parser, Debug)]
#[command(name = "pet_siamese")]
#[command(version)]
#[command(about = "Siamese pet comparison with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Configuration file (JSON); missing fields use defaults
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train on a JSON list of labeled pairs and export the model
    Train {
        /// JSON array of {image1Url, image2Url, isSameAnimal}
        #[arg(short, long)]
        pairs: PathBuf,

        /// Where to write the exported model
        #[arg(short, long, default_value = "output/pet_siamese.json")]
        output: PathBuf,

        /// Directory of the key/value store holding the pair snapshot
        #[arg(long, default_value = ".pet_siamese")]
        store_dir: PathBuf,

        /// Number of training epochs
        #[arg(short, long)]
        epochs: Option<usize>,

        /// Batch size for training
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Learning rate
        #[arg(short, long)]
        learning_rate: Option<f64>,

        /// Fraction of pairs held out for validation
        #[arg(long)]
        validation_split: Option<f64>,

        /// Disable data augmentation while adding pairs
        #[arg(long, default_value = "false")]
        no_augmentation: bool,
    },

    /// Compare two images with an exported model
    Compare {
        /// Exported model document
        #[arg(short, long)]
        model: PathBuf,

        /// First image
        image_a: PathBuf,

        /// Second image
        image_b: PathBuf,

        /// Decision threshold on the similarity score
        #[arg(short, long)]
        threshold: Option<f32>,
    },

    /// Show metadata and architecture of an exported model
    Inspect {
        /// Exported model document
        #[arg(short, long)]
        model: PathBuf,

        /// List every weight tensor
        #[arg(long, default_value = "false")]
        weights: bool,
    },

    /// Inspect or clear the stored pair snapshot
    Pairs {
        /// Directory of the key/value store
        #[arg(long, default_value = ".pet_siamese")]
        store_dir: PathBuf,

        #[command(subcommand)]
        action: PairsAction,
    },
}

#[derive(Subcommand, Debug)]
enum PairsAction {
    /// Print the stored pairs and their balance
    Show,
    /// Remove the stored snapshot
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };

    let _ = init_logging(&log_config);

    let config = match &cli.config {
        Some(path) => SiameseConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => SiameseConfig::default(),
    };

    match cli.command {
        Commands::Train {
            pairs,
            output,
            store_dir,
            epochs,
            batch_size,
            learning_rate,
            validation_split,
            no_augmentation,
        } => {
            let overrides = ConfigOverrides {
                epochs,
                batch_size,
                learning_rate,
                validation_split,
                augmentation: no_augmentation.then_some(false),
                ..Default::default()
            };
            cmd_train(config.with_overrides(&overrides), &pairs, &output, &store_dir).await?;
        }

        Commands::Compare {
            model,
            image_a,
            image_b,
            threshold,
        } => {
            cmd_compare(config, &model, image_a, image_b, threshold).await?;
        }

        Commands::Inspect { model, weights } => {
            cmd_inspect(&model, weights)?;
        }

        Commands::Pairs { store_dir, action } => {
            cmd_pairs(&config, &store_dir, action)?;
        }
    }

    Ok(())
}

fn print_balance(balance: &DataBalance) {
    println!(
        "  Pairs: {} ({} same, {} different)",
        balance.total,
        balance.positive.to_string().green(),
        balance.negative.to_string().yellow()
    );
}

async fn cmd_train(
    config: SiameseConfig,
    pairs_path: &Path,
    output: &Path,
    store_dir: &Path,
) -> Result<()> {
    let json = std::fs::read_to_string(pairs_path)
        .with_context(|| format!("Failed to read {}", pairs_path.display()))?;
    let records: Vec<PairRecord> =
        serde_json::from_str(&json).context("Pair list must be a JSON array of pair records")?;

    let report = backend_report();
    println!("{}", "Training Configuration:".cyan().bold());
    println!("  Backend:        {}", report.backend);
    println!("  Image size:     {}", config.image_size);
    println!("  Epochs:         {}", config.epochs);
    println!("  Batch size:     {}", config.batch_size);
    println!("  Learning rate:  {}", config.learning_rate);
    println!("  Augmentation:   {}", config.augmentation);
    println!();

    let base_dir = pairs_path.parent().unwrap_or(Path::new("."));
    let epochs = config.epochs;
    let engine = SiameseEngine::<TrainingBackend>::new(config, default_device())?
        .with_store(FileStore::new(store_dir)?)
        .with_fetcher(FileFetcher::with_base_dir(base_dir));

    println!("{}", "Adding pairs...".cyan());
    for record in records {
        engine.add_pair_from_record(record).await?;
    }
    print_balance(&engine.balance());
    println!();

    let progress = ProgressBar::new(epochs as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("  {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    let mut events = engine.subscribe();
    let bar = progress.clone();
    let listener = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                EngineEvent::Epoch(p) => {
                    bar.set_position(p.epoch as u64);
                    bar.set_message(format!("loss {:.4} acc {:.1}%", p.loss, p.accuracy * 100.0));
                }
                EngineEvent::Status {
                    kind: StatusKind::Done,
                    ..
                } => break,
                EngineEvent::Status { .. } => {}
            }
        }
    });

    let result = engine.start_training(None).await;
    listener.abort();
    let report = match result {
        Ok(report) => {
            progress.finish_with_message("done");
            report
        }
        Err(e) => {
            progress.abandon();
            bail!("{} ({})", e, e.status());
        }
    };

    println!();
    println!("{}", "Training Complete!".green().bold());
    if let Some(last) = report.history.last() {
        println!("  Loss:           {:.4}", last.loss);
        println!("  Accuracy:       {:.2}%", last.accuracy * 100.0);
        if let Some(val) = last.val_accuracy {
            println!("  Val accuracy:   {:.2}%", val * 100.0);
        }
    }
    println!("  Duration:       {}", format_duration(report.duration_secs));

    let document = engine.export_model().await?;
    save_document(&document, output)?;
    info!("Model written to {}", output.display());
    println!("  Saved to:       {}", output.display());
    Ok(())
}

async fn cmd_compare(
    config: SiameseConfig,
    model: &Path,
    image_a: PathBuf,
    image_b: PathBuf,
    threshold: Option<f32>,
) -> Result<()> {
    let document = load_document(model)?;
    let engine = SiameseEngine::<TrainingBackend>::new(config, default_device())?;
    engine.import_model(&document).await?;

    let images = [ImageSource::Path(image_a), ImageSource::Path(image_b)];
    let result = engine.compare_with_threshold(&images, threshold).await?;

    let verdict = if result.same_animal {
        "SAME ANIMAL".green().bold()
    } else {
        "DIFFERENT ANIMALS".yellow().bold()
    };
    println!("{}", verdict);
    println!("  Similarity:  {:.4}", result.similarity_score);
    println!("  Confidence:  {:.1}%", result.confidence * 100.0);
    Ok(())
}

fn cmd_inspect(model: &Path, show_weights: bool) -> Result<()> {
    let document = load_document(model)?;

    println!("{}", "Model Document".cyan().bold());
    match &document.metadata {
        Some(meta) => {
            println!("  Name:             {}", meta.name);
            println!("  Task:             {}", meta.task_name);
            println!("  Exported:         {}", meta.timestamp);
            println!("  Image size:       {}", meta.image_size);
            println!("  Feature size:     {}", meta.feature_size);
            println!("  Training pairs:   {}", meta.training_pairs_count);
            println!("  Comparisons:      {}", meta.comparison_count);
        }
        None => println!("  {}", "No metadata".yellow()),
    }

    for (label, artifact) in [
        ("Siamese model", &document.siamese_model),
        ("Feature extractor", &document.feature_extractor),
    ] {
        let params: usize = artifact.weight_specs.iter().map(|s| s.num_elements()).sum();
        println!();
        println!("{}", label.cyan().bold());
        println!("  Class:       {}", artifact.model_topology.class_name);
        println!("  Layers:      {}", artifact.model_topology.layers.len());
        println!("  Parameters:  {}", params);
        println!("  Weight data: {} bytes", artifact.weight_data.len());
        for layer in &artifact.model_topology.layers {
            let detail = match (layer.units, &layer.activation, layer.rate) {
                (Some(units), Some(act), _) => format!("{} units, {}", units, act),
                (_, _, Some(rate)) => format!("rate {:.2}", rate),
                _ => String::new(),
            };
            println!("    {:<22} {:<22} {}", layer.name, layer.kind, detail);
        }
        if show_weights {
            for spec in &artifact.weight_specs {
                println!("    {:<40} {:?} {}", spec.name, spec.shape, spec.dtype);
            }
        }
    }
    Ok(())
}

fn cmd_pairs(config: &SiameseConfig, store_dir: &Path, action: PairsAction) -> Result<()> {
    let store = FileStore::new(store_dir)?;
    let key = &config.storage_key;

    match action {
        PairsAction::Show => {
            let Some(records) = load_pair_records(&store, key)? else {
                println!("{} No pairs stored under '{}'", "Note:".yellow(), key);
                return Ok(());
            };
            let positive = records.iter().filter(|r| r.is_same_animal).count();
            let balance = DataBalance {
                positive,
                negative: records.len() - positive,
                total: records.len(),
            };
            println!("{}", "Stored Pairs".cyan().bold());
            print_balance(&balance);
            if !balance.within_ratio(config.max_imbalance_ratio) {
                println!("  {}", "Imbalanced: training would be rejected".red());
            }
            for record in &records {
                let mark = if record.is_same_animal { "=" } else { "≠" };
                println!("    {} {} {}", record.image1_url, mark, record.image2_url);
            }
        }
        PairsAction::Clear => {
            store.remove(key)?;
            println!("{} Cleared '{}'", "✓".green(), key);
        }
    }
    Ok(())
}
