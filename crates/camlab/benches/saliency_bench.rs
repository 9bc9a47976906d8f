//! Benchmarks for forward passes and saliency computation.
//!
//! Run with: cargo bench --bench saliency_bench

use burn::prelude::*;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::Array4;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use camlab::core::backend::{Autodiff, NdArray};
use camlab::prelude::*;

type TrainBackend = Autodiff<NdArray>;

fn random_images(n: usize) -> Array4<f32> {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    Array4::from_shape_simple_fn((n, 1, 28, 28), || rng.gen::<f32>())
}

fn bench_model_forward(c: &mut Criterion) {
    let mut group = c.benchmark_group("model_forward");
    let device = <TrainBackend as Backend>::Device::default();
    let model = CnnClassifierConfig::default()
        .init::<TrainBackend>(&device)
        .unwrap();

    for batch_size in [8, 32, 128] {
        let x = random_images(batch_size);
        let data = TensorData::new(x.iter().copied().collect::<Vec<f32>>(), [batch_size, 1, 28, 28]);
        let input = Tensor::<TrainBackend, 4>::from_data(data, &device);

        group.bench_with_input(BenchmarkId::new("cnn", batch_size), &batch_size, |b, _| {
            b.iter(|| black_box(model.forward(input.clone(), ForwardMode::Inference)))
        });
    }
    group.finish();
}

fn bench_saliency(c: &mut Criterion) {
    let mut group = c.benchmark_group("saliency");
    group.sample_size(10);
    let device = <TrainBackend as Backend>::Device::default();
    let model = CnnClassifierConfig::default()
        .init::<TrainBackend>(&device)
        .unwrap();
    let x = random_images(8);
    let options = CamOptions::default();

    for method in [CamMethod::GradCam, CamMethod::GradCamPlusPlus, CamMethod::EigenCam] {
        group.bench_with_input(BenchmarkId::new(method.name(), 8), &method, |b, &method| {
            b.iter(|| {
                black_box(
                    compute_saliency::<TrainBackend, _>(
                        &model,
                        method,
                        &["cnn_block3"],
                        &TargetSelection::Predicted,
                        x.view(),
                        &options,
                        &device,
                    )
                    .unwrap(),
                )
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_model_forward, bench_saliency);
criterion_main!(benches);
