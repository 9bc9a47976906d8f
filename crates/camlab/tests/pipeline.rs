//! End-to-end tests: data → train → evaluate → explain.

use std::io::Write;

use burn::module::{ModuleMapper, ParamId};
use burn::prelude::*;
use burn::tensor::TensorData;
use ndarray::Array4;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use camlab::analysis::classification_report;
use camlab::core::backend::{Autodiff, NdArray};
use camlab::explain::{compute_saliency, explain, ExplainError};
use camlab::prelude::*;

type B = Autodiff<NdArray>;

/// Two balanced classes: bright top half vs bright bottom half, with noise.
fn toy_dataset(n: usize, side: usize, seed: u64) -> ImageDataset {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut x = Array4::<f32>::zeros((n, 1, side, side));
    let y: Vec<usize> = (0..n).map(|i| i % 2).collect();
    for ((i, _, h, _), v) in x.indexed_iter_mut() {
        let bright = (h < side / 2) == (y[i] == 0);
        let base = if bright { 0.8 } else { 0.1 };
        *v = base + rng.gen::<f32>() * 0.1;
    }
    ImageDataset::from_arrays(x, Some(y)).unwrap()
}

fn loader(ds: ImageDataset, batch_size: usize, seed: Option<Seed>) -> ImageDataLoader {
    ImageDataLoader::builder(ds)
        .batch_size(batch_size)
        .shuffle(seed)
        .build()
        .unwrap()
}

fn small_cnn(device: &<B as Backend>::Device) -> CnnClassifier<B> {
    CnnClassifierConfig::new(ImageShape::grayscale(12, 12), 2)
        .with_filters(4, 6, 8)
        .init(device)
        .unwrap()
}

#[test]
fn test_linear_model_learns_toy_problem() {
    let device = Default::default();
    let ds = toy_dataset(100, 8, 1);
    assert_eq!(ds.labels().unwrap().iter().filter(|&&c| c == 0).count(), 50);

    let train_dl = loader(ds.clone(), 16, Some(Seed::new(3)));
    let valid_dl = loader(ds.clone(), 50, None);
    let config = TrainerConfig::new(3)
        .with_learning_rate(1e-2)
        .with_return_model(true);

    let output = train::<B, _, _, _, _, _, _>(
        |device| LinearClassifierConfig::new(ImageShape::grayscale(8, 8), 2).init(device),
        CrossEntropyLoss::new,
        adam::<B, LinearClassifier<B>>,
        &train_dl,
        &valid_dl,
        &config,
        &device,
    )
    .unwrap();

    assert_eq!(output.train_losses.len(), 3);
    assert_eq!(output.valid_losses.len(), 3);
    assert!(output.train_losses.windows(2).any(|w| w[1] < w[0]));

    let model = output.model.unwrap();
    let report = evaluate::<B, _>(&ds, &model, &device, &BatchConfig::new(32)).unwrap();
    assert!(report.accuracy >= 0.5, "accuracy {}", report.accuracy);
    assert_eq!(report.total_samples, 100);
}

#[test]
fn test_loss_lists_match_epochs() {
    let device = Default::default();
    let ds = toy_dataset(24, 12, 2);
    let train_dl = loader(ds.clone(), 8, Some(Seed::new(0)));
    let valid_dl = loader(ds, 8, None);

    for epochs in 1..=3 {
        let output = train::<B, _, _, _, _, _, _>(
            small_cnn,
            CrossEntropyLoss::new,
            adam::<B, CnnClassifier<B>>,
            &train_dl,
            &valid_dl,
            &TrainerConfig::new(epochs),
            &device,
        )
        .unwrap();
        assert_eq!(output.train_losses.len(), epochs);
        assert_eq!(output.valid_losses.len(), epochs);
        assert!(output.model.is_none());
    }
}

#[test]
fn test_average_loss_independent_of_batching() {
    let device = Default::default();
    let ds = toy_dataset(23, 8, 4);
    let base = LinearClassifierConfig::new(ImageShape::grayscale(8, 8), 2).init::<B>(&device);
    let config = TrainerConfig::new(1).with_learning_rate(0.0);

    let run = |batch_size: usize| {
        train::<B, _, _, _, _, _, _>(
            |_| base.clone(),
            CrossEntropyLoss::new,
            adam::<B, LinearClassifier<B>>,
            &loader(ds.clone(), batch_size, None),
            &loader(ds.clone(), batch_size, None),
            &config,
            &device,
        )
        .unwrap()
    };

    let a = run(4);
    let b = run(23);
    approx::assert_relative_eq!(a.train_losses[0], b.train_losses[0], epsilon = 1e-4);
    approx::assert_relative_eq!(a.valid_losses[0], b.valid_losses[0], epsilon = 1e-4);
}

#[test]
fn test_evaluate_twice_gives_identical_reports() {
    let device = Default::default();
    let ds = toy_dataset(30, 12, 5);
    let model = small_cnn(&device);

    let first = evaluate::<B, _>(&ds, &model, &device, &BatchConfig::new(7)).unwrap();
    let second = evaluate::<B, _>(&ds, &model, &device, &BatchConfig::new(30)).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_absent_class_scores_zero() {
    let report = classification_report(&[0, 0, 1, 1], &[0, 2, 1, 2], None).unwrap();
    let absent = report.class(2).unwrap();
    assert_eq!(absent.precision, 0.0);
    assert_eq!(absent.recall, 0.0);
    assert_eq!(absent.f1_score, 0.0);
    assert_eq!(absent.support, 2);
}

/// Zeroes every weight matrix and replaces every bias with `bias`, so the
/// model's output no longer depends on its input.
struct ConstantHead {
    bias: Vec<f32>,
}

impl<BB: Backend> ModuleMapper<BB> for ConstantHead {
    fn map_float<const D: usize>(&mut self, _id: ParamId, tensor: Tensor<BB, D>) -> Tensor<BB, D> {
        if D == 1 {
            let data = TensorData::new(self.bias.clone(), tensor.shape().dims);
            Tensor::from_data(data, &tensor.device())
        } else {
            tensor.zeros_like()
        }
    }
}

#[test]
fn test_evaluate_scores_never_predicted_class_zero() {
    let device = Default::default();
    let labels: Vec<usize> = (0..9).map(|i| i % 3).collect();
    let x = Array4::<f32>::from_shape_fn((9, 1, 4, 4), |(i, _, h, w)| (i + h * 4 + w) as f32 / 40.0);
    let ds = ImageDataset::from_arrays(x, Some(labels)).unwrap();

    let model = LinearClassifierConfig::new(ImageShape::grayscale(4, 4), 3)
        .init::<B>(&device)
        .map(&mut ConstantHead {
            bias: vec![1.0, 0.5, -1.0],
        });
    let report = evaluate::<B, _>(&ds, &model, &device, &BatchConfig::new(4)).unwrap();

    let predicted = report.class(0).unwrap();
    assert_eq!(predicted.recall, 1.0);
    assert_eq!(predicted.support, 3);
    for class in [1, 2] {
        let never = report.class(class).unwrap();
        assert_eq!(never.precision, 0.0);
        assert_eq!(never.recall, 0.0);
        assert_eq!(never.f1_score, 0.0);
        assert_eq!(never.support, 3);
    }
    assert!(report.macro_f1 < predicted.f1_score);
}

#[test]
fn test_saliency_maps_are_unit_range_at_layer_resolution() {
    let device = Default::default();
    let ds = toy_dataset(6, 12, 6);
    let model = small_cnn(&device);
    let resolutions = [(5, 5), (3, 3), (1, 1)];

    for method in CamMethod::ALL {
        let layers = compute_saliency::<B, _>(
            &model,
            method,
            &CNN_LAYERS,
            &TargetSelection::Predicted,
            ds.x().view(),
            &CamOptions::default(),
            &device,
        )
        .unwrap();

        for (saliency, resolution) in layers.iter().zip(resolutions) {
            assert_eq!(saliency.len(), 6);
            for map in &saliency.maps {
                assert_eq!(map.dim(), resolution, "{} at {}", method, saliency.layer);
                assert!(map.iter().all(|v| (0.0..=1.0).contains(v)));
            }
        }
    }
}

#[test]
fn test_saliency_target_out_of_range_is_configuration_error() {
    let device = Default::default();
    let ds = toy_dataset(4, 12, 7);
    let model = small_cnn(&device);

    let result = compute_saliency::<B, _>(
        &model,
        CamMethod::GradCam,
        &["cnn_block3"],
        &TargetSelection::class(TargetSpec::Logit(2)),
        ds.x().view(),
        &CamOptions::default(),
        &device,
    );
    assert!(matches!(
        result,
        Err(ExplainError::TargetOutOfRange { class: 2, n_classes: 2 })
    ));
}

#[test]
fn test_csv_to_figures() {
    let device = Default::default();
    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("train.csv");

    let ds = toy_dataset(40, 12, 8);
    {
        let mut file = std::fs::File::create(&csv_path).unwrap();
        let header: Vec<String> = std::iter::once("label".to_string())
            .chain((0..144).map(|i| format!("pixel{}", i)))
            .collect();
        writeln!(file, "{}", header.join(",")).unwrap();
        for i in 0..ds.len() {
            let record = ds.get(i).unwrap();
            let pixels: Vec<String> = record
                .x
                .iter()
                .map(|v| ((v * 255.0).round() as u8).to_string())
                .collect();
            writeln!(file, "{},{}", record.y.unwrap(), pixels.join(",")).unwrap();
        }
    }

    let loaded = read_image_csv(&csv_path, ImageShape::grayscale(12, 12), true).unwrap();
    assert_eq!(loaded.len(), 40);
    let (train_ds, test_ds) = train_test_split(&loaded, 0.25, Seed::new(1)).unwrap();

    let output = train::<B, _, _, _, _, _, _>(
        small_cnn,
        CrossEntropyLoss::new,
        adam::<B, CnnClassifier<B>>,
        &loader(train_ds, 10, Some(Seed::new(1))),
        &loader(test_ds.clone(), 10, None),
        &TrainerConfig::new(2).with_return_model(true),
        &device,
    )
    .unwrap();
    let model = output.model.unwrap();

    let report = evaluate::<B, _>(&test_ds, &model, &device, &BatchConfig::default()).unwrap();
    assert_eq!(report.total_samples, test_ds.len());
    assert!(report.to_string_table(3).contains("accuracy"));

    let options = CamOptions::default()
        .with_seed(Seed::new(2))
        .with_class_names(vec!["top".to_string(), "bottom".to_string()]);
    let figures = explain::<B, _>(
        &model,
        CamMethod::GradCamPlusPlus,
        &["cnn_block1", "cnn_block2"],
        &TargetSelection::Predicted,
        &test_ds,
        4,
        &options,
        &device,
    )
    .unwrap();
    assert_eq!(figures.len(), 2);

    for figure in &figures {
        assert_eq!(figure.n_columns(), 4);
        assert!(figure
            .labels()
            .iter()
            .all(|l| matches!(l, Some("top") | Some("bottom"))));
        let (png, json) = figure.save(dir.path(), 2).unwrap();
        assert!(png.exists());
        assert!(json.exists());
    }
}
