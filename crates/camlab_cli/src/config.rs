//! Run configuration: JSON file values overridden by command-line flags.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use camlab_core::DeviceSpec;
use camlab_explain::CamMethod;
use camlab_models::CNN_LAYERS;

/// Saliency section of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaliencyConfig {
    /// Attribution method.
    pub method: CamMethod,
    /// Target layers.
    pub layers: Vec<String>,
    /// Number of samples drawn for the figures (0 disables saliency).
    pub samples: usize,
    /// Average over flipped and rescaled inputs.
    pub aug_smooth: bool,
    /// Project channels onto their first principal component.
    pub eigen_smooth: bool,
    /// Share of the image in overlays.
    pub image_weight: f32,
    /// Pixel upscale of the rendered figures.
    pub scale: usize,
}

impl Default for SaliencyConfig {
    fn default() -> Self {
        Self {
            method: CamMethod::GradCam,
            layers: CNN_LAYERS.iter().map(|l| l.to_string()).collect(),
            samples: 8,
            aug_smooth: false,
            eigen_smooth: false,
            image_weight: 0.5,
            scale: 4,
        }
    }
}

/// Full run configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Labeled training CSV.
    pub train_csv: Option<PathBuf>,
    /// Optional held-out CSV.
    pub test_csv: Option<PathBuf>,
    /// Whether the CSV files start with a header row.
    pub csv_header: bool,
    /// Number of epochs.
    pub epochs: usize,
    /// Training batch size.
    pub batch_size: usize,
    /// Adam learning rate.
    pub learning_rate: f64,
    /// Compute device.
    pub device: DeviceSpec,
    /// Seed for splits, shuffles and sample draws.
    pub seed: u64,
    /// Fraction of the training CSV held out for validation.
    pub valid_ratio: f32,
    /// Output directory.
    pub output: PathBuf,
    /// Class names, index-aligned.
    pub class_names: Option<Vec<String>>,
    /// Saliency settings.
    pub saliency: SaliencyConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            train_csv: None,
            test_csv: None,
            csv_header: true,
            epochs: 10,
            batch_size: 64,
            learning_rate: 1e-3,
            device: DeviceSpec::Cpu,
            seed: 42,
            valid_ratio: 0.2,
            output: PathBuf::from("./runs"),
            class_names: None,
            saliency: SaliencyConfig::default(),
        }
    }
}

impl RunConfig {
    /// Load a JSON config; missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config '{}'", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config '{}'", path.display()))
    }
}

/// Command-line values; `None` keeps the config value.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub train_csv: Option<PathBuf>,
    pub test_csv: Option<PathBuf>,
    pub no_header: bool,
    pub epochs: Option<usize>,
    pub batch_size: Option<usize>,
    pub learning_rate: Option<f64>,
    pub device: Option<DeviceSpec>,
    pub seed: Option<u64>,
    pub valid_ratio: Option<f32>,
    pub output: Option<PathBuf>,
    pub method: Option<CamMethod>,
    pub layers: Option<Vec<String>>,
    pub samples: Option<usize>,
    pub aug_smooth: bool,
    pub eigen_smooth: bool,
}

impl Overrides {
    /// Apply the flags given on the command line.
    pub fn apply(self, mut config: RunConfig) -> RunConfig {
        if self.train_csv.is_some() {
            config.train_csv = self.train_csv;
        }
        if self.test_csv.is_some() {
            config.test_csv = self.test_csv;
        }
        if self.no_header {
            config.csv_header = false;
        }
        if let Some(epochs) = self.epochs {
            config.epochs = epochs;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(lr) = self.learning_rate {
            config.learning_rate = lr;
        }
        if let Some(device) = self.device {
            config.device = device;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(ratio) = self.valid_ratio {
            config.valid_ratio = ratio;
        }
        if let Some(output) = self.output {
            config.output = output;
        }
        if let Some(method) = self.method {
            config.saliency.method = method;
        }
        if let Some(layers) = self.layers {
            config.saliency.layers = layers;
        }
        if let Some(samples) = self.samples {
            config.saliency.samples = samples;
        }
        config.saliency.aug_smooth |= self.aug_smooth;
        config.saliency.eigen_smooth |= self.eigen_smooth;
        config
    }
}
