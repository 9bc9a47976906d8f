//! camlab CLI: train a digit classifier, report on it and render saliency figures.

mod config;
mod plot;

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use burn::module::AutodiffModule;
use burn::prelude::*;
use camlab_analysis::ClassificationReport;
use camlab_core::backend::Autodiff;
use camlab_core::{DeviceSpec, Seed};
use camlab_data::{read_image_csv, train_test_split, ImageDataLoader, ImageDataset, MNIST_SHAPE};
use camlab_explain::{explain, CamMethod, CamOptions, TargetSelection};
use camlab_models::{CnnClassifier, CnnClassifierConfig};
use camlab_train::{
    adam, evaluate, predict_dataset, train_with_callbacks, BatchConfig, CallbackList, CrossEntropyLoss,
    HistoryCallback, ProgressCallback, TrainerConfig,
};

use crate::config::{Overrides, RunConfig};
use crate::plot::plot_losses;

#[cfg(feature = "backend-wgpu")]
type InnerBackend = camlab_core::backend::Wgpu;
#[cfg(not(feature = "backend-wgpu"))]
type InnerBackend = camlab_core::backend::NdArray;

/// Backend type for training.
type TrainBackend = Autodiff<InnerBackend>;

#[derive(Parser)]
#[command(name = "camlab")]
#[command(author, version)]
#[command(about = "Train a small CNN on MNIST-style CSVs and explain it with class activation maps")]
#[command(long_about = "camlab: train a small image classifier and render Grad-CAM family saliency figures.

EXAMPLES:
  # Train for 10 epochs on a Kaggle-style MNIST CSV
  camlab train --train-csv data/train.csv --epochs 10

  # Hold out a labeled test CSV and explain it with Grad-CAM++
  camlab train --train-csv data/train.csv --test-csv data/test.csv --method gradcam++

  # Start from a JSON config and override the seed
  camlab train --config run.json --seed 7 -v")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train, evaluate and explain a CNN
    Train {
        /// JSON run configuration; flags below override its values
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Labeled training CSV (label column first, 784 pixel columns)
        #[arg(long, value_name = "FILE")]
        train_csv: Option<PathBuf>,

        /// Held-out CSV, labeled or not
        #[arg(long, value_name = "FILE")]
        test_csv: Option<PathBuf>,

        /// The CSV files have no header row
        #[arg(long)]
        no_header: bool,

        /// Number of training epochs
        #[arg(long, value_name = "N")]
        epochs: Option<usize>,

        /// Batch size for training
        #[arg(long, value_name = "SIZE")]
        batch_size: Option<usize>,

        /// Learning rate for the Adam optimizer
        #[arg(long, value_name = "LR")]
        lr: Option<f64>,

        /// Compute device: cpu, gpu or gpu:N
        #[arg(long, value_name = "DEVICE")]
        device: Option<String>,

        /// Random seed for reproducibility
        #[arg(long, value_name = "SEED")]
        seed: Option<u64>,

        /// Fraction of the training CSV held out for validation
        #[arg(long, value_name = "RATIO")]
        valid_ratio: Option<f32>,

        /// Saliency method (see `camlab methods`)
        #[arg(long, value_name = "METHOD")]
        method: Option<String>,

        /// Comma-separated target layers
        #[arg(long, value_name = "LAYERS", value_delimiter = ',')]
        layers: Option<Vec<String>>,

        /// Number of samples in the saliency figures (0 disables them)
        #[arg(long, value_name = "N")]
        samples: Option<usize>,

        /// Average maps over flipped and rescaled inputs
        #[arg(long)]
        aug_smooth: bool,

        /// Collapse channels by their first principal component
        #[arg(long)]
        eigen_smooth: bool,

        /// Output directory for history, reports and figures
        #[arg(long, value_name = "DIR")]
        output: Option<PathBuf>,
    },
    /// List the available saliency methods
    Methods,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::filter::LevelFilter::from_level(log_level))
        .init();

    match cli.command {
        Commands::Train {
            config,
            train_csv,
            test_csv,
            no_header,
            epochs,
            batch_size,
            lr,
            device,
            seed,
            valid_ratio,
            method,
            layers,
            samples,
            aug_smooth,
            eigen_smooth,
            output,
        } => {
            let base = match config {
                Some(path) => RunConfig::from_file(&path)?,
                None => RunConfig::default(),
            };
            let overrides = Overrides {
                train_csv,
                test_csv,
                no_header,
                epochs,
                batch_size,
                learning_rate: lr,
                device: device
                    .map(|d| d.parse::<DeviceSpec>())
                    .transpose()
                    .context("Invalid --device")?,
                seed,
                valid_ratio,
                output,
                method: method
                    .map(|m| m.parse::<CamMethod>())
                    .transpose()
                    .context("Invalid --method")?,
                layers,
                samples,
                aug_smooth,
                eigen_smooth,
            };
            handle_train(overrides.apply(base))
        }
        Commands::Methods => {
            handle_methods();
            Ok(())
        }
    }
}

fn handle_methods() {
    println!("Saliency methods:");
    for method in CamMethod::ALL {
        let kind = if method.requires_gradients() {
            "gradient"
        } else {
            "gradient-free"
        };
        println!("  {:<14} {}", method.name(), kind);
    }
}

fn resolve_device(spec: DeviceSpec) -> Result<<TrainBackend as Backend>::Device> {
    #[cfg(feature = "backend-wgpu")]
    let device = camlab_core::backend::resolve_wgpu(spec)?;
    #[cfg(not(feature = "backend-wgpu"))]
    let device = camlab_core::backend::resolve_ndarray(spec)?;
    Ok(device)
}

fn handle_train(config: RunConfig) -> Result<()> {
    let train_csv = config
        .train_csv
        .clone()
        .context("No training CSV given (use --train-csv or set train_csv in the config)")?;

    println!("=== camlab training ===\n");
    println!("Configuration:");
    println!("  Train CSV: {}", train_csv.display());
    if let Some(test_csv) = &config.test_csv {
        println!("  Test CSV: {}", test_csv.display());
    }
    println!("  Epochs: {}", config.epochs);
    println!("  Learning rate: {}", config.learning_rate);
    println!("  Batch size: {}", config.batch_size);
    println!("  Device: {}", config.device);
    println!("  Seed: {}", config.seed);
    println!("  Output: {}\n", config.output.display());

    let device = resolve_device(config.device)?;
    let seed = Seed::new(config.seed);

    // Load data
    let dataset = read_image_csv(&train_csv, MNIST_SHAPE, config.csv_header)
        .with_context(|| format!("Failed to load '{}'", train_csv.display()))?;
    if !dataset.has_targets() {
        bail!("Training CSV '{}' has no label column", train_csv.display());
    }
    let n_classes = dataset.n_classes().max(2);
    let (train_ds, valid_ds) = train_test_split(&dataset, config.valid_ratio, seed)
        .context("Failed to split the training data")?;
    let test_ds = match &config.test_csv {
        Some(path) => Some(
            read_image_csv(path, MNIST_SHAPE, config.csv_header)
                .with_context(|| format!("Failed to load '{}'", path.display()))?,
        ),
        None => None,
    };

    println!("  Train samples: {}", train_ds.len());
    println!("  Valid samples: {}", valid_ds.len());
    if let Some(test) = &test_ds {
        println!("  Test samples: {}", test.len());
    }
    println!("  Classes: {}\n", n_classes);

    let train_dl = ImageDataLoader::builder(train_ds)
        .batch_size(config.batch_size)
        .shuffle(Some(seed.derive("train")))
        .build()
        .context("Failed to create the training loader")?;
    let valid_dl = ImageDataLoader::builder(valid_ds.clone())
        .batch_size(config.batch_size)
        .build()
        .context("Failed to create the validation loader")?;

    // Train
    let model = CnnClassifierConfig::new(dataset.image_shape(), n_classes)
        .init::<TrainBackend>(&device)
        .context("Invalid model configuration")?;
    let trainer = TrainerConfig::new(config.epochs)
        .with_learning_rate(config.learning_rate)
        .with_return_model(true);

    let history = HistoryCallback::default();
    let batches = history.handle();
    let mut callbacks = CallbackList::new()
        .with(ProgressCallback::default())
        .with(history);

    let output = train_with_callbacks::<TrainBackend, _, _, _, _, _, _>(
        move |_| model,
        CrossEntropyLoss::new,
        adam::<TrainBackend, CnnClassifier<TrainBackend>>,
        &train_dl,
        &valid_dl,
        &trainer,
        &device,
        &mut callbacks,
    )
    .context("Training failed")?;

    println!("Losses:");
    for (epoch, (train, valid)) in output.train_losses.iter().zip(&output.valid_losses).enumerate() {
        println!("  Epoch {:>3}: train_loss={:.4}  valid_loss={:.4}", epoch + 1, train, valid);
    }
    println!();

    fs::create_dir_all(&config.output)
        .with_context(|| format!("Failed to create '{}'", config.output.display()))?;
    let plot_path = config.output.join("losses.png");
    plot_losses(&output.train_losses, &output.valid_losses, &plot_path, (800, 500))
        .context("Failed to plot the loss curves")?;
    println!("Loss curves: {}", plot_path.display());

    let batches = batches
        .lock()
        .map(|records| records.clone())
        .map_err(|_| anyhow!("Batch history lock poisoned"))?;
    write_json(
        &config.output.join("history.json"),
        &serde_json::json!({
            "train_losses": output.train_losses,
            "valid_losses": output.valid_losses,
            "batches": batches,
        }),
    )?;

    let model = output.model.context("Trainer did not return the model")?;

    // Evaluate
    let named = |report: ClassificationReport| match &config.class_names {
        Some(names) => report.with_class_names(names),
        None => report,
    };
    let mut reports = serde_json::Map::new();

    let valid_report = named(evaluate::<TrainBackend, _>(&valid_ds, &model, &device, &BatchConfig::default())?);
    println!("Validation report:\n{}", valid_report.to_string_table(3));
    if let Some(line) = class_extremes(&valid_report) {
        println!("{}\n", line);
    }
    reports.insert("valid".to_string(), serde_json::to_value(&valid_report)?);

    let predictions = predict_dataset::<InnerBackend, _>(&valid_ds, &model.valid(), &device, &BatchConfig::default())?;
    let mut confusion = predictions.confusion_matrix(n_classes)?;
    if let Some(names) = &config.class_names {
        confusion = confusion.with_labels(names.clone());
    }
    println!("Validation confusion matrix:\n{}", confusion.to_string_table());

    if let Some(test) = &test_ds {
        if test.has_targets() {
            let test_report = named(evaluate::<TrainBackend, _>(test, &model, &device, &BatchConfig::default())?);
            println!("Test report:\n{}", test_report.to_string_table(3));
            reports.insert("test".to_string(), serde_json::to_value(&test_report)?);
        }
    }
    write_json(&config.output.join("reports.json"), &reports)?;

    // Explain
    let saliency = &config.saliency;
    if saliency.samples > 0 {
        let source: &ImageDataset = test_ds.as_ref().unwrap_or(&valid_ds);
        let mut options = CamOptions::default()
            .with_seed(seed.derive("saliency"))
            .with_aug_smooth(saliency.aug_smooth)
            .with_eigen_smooth(saliency.eigen_smooth)
            .with_image_weight(saliency.image_weight);
        if let Some(names) = &config.class_names {
            options = options.with_class_names(names.clone());
        }
        let layers: Vec<&str> = saliency.layers.iter().map(String::as_str).collect();

        let figures = explain::<TrainBackend, _>(
            &model,
            saliency.method,
            &layers,
            &TargetSelection::Predicted,
            source,
            saliency.samples,
            &options,
            &device,
        )
        .context("Saliency computation failed")?;

        let dir = config.output.join("saliency");
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create '{}'", dir.display()))?;
        println!("Saliency figures ({}):", saliency.method);
        for figure in &figures {
            let (image, _) = figure.save(&dir, saliency.scale)?;
            println!("  {}", image.display());
        }
    }

    println!("\nOutputs written to {}", config.output.display());
    Ok(())
}

/// One line naming the best and worst scoring classes by F1.
fn class_extremes(report: &ClassificationReport) -> Option<String> {
    let best = report.best_class()?;
    let worst = report.worst_class()?;
    Some(format!(
        "Best class: {} (f1={:.3})  Worst class: {} (f1={:.3})",
        best.label(),
        best.f1_score,
        worst.label(),
        worst.f1_score
    ))
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create '{}'", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use camlab_analysis::classification_report;

    #[test]
    fn test_class_extremes_names_best_and_worst() {
        let names = ["zero".to_string(), "one".to_string(), "two".to_string()];
        let report =
            classification_report(&[0, 0, 0, 1, 1, 2, 2, 2], &[0, 0, 0, 1, 2, 2, 2, 2], Some(&names))
                .unwrap();
        let line = class_extremes(&report).unwrap();
        assert!(line.starts_with("Best class: zero (f1=1.000)"), "{}", line);
        assert!(line.ends_with("Worst class: one (f1=0.667)"), "{}", line);
    }
}
