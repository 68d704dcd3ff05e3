//! Benchmarks for loading and training throughput.
//!
//! Run with: cargo bench --bench training_bench

use burn::nn::{Linear, LinearConfig};
use burn::optim::AdamConfig;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn_autodiff::Autodiff;
use burn_ndarray::{NdArray, NdArrayDevice};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::Array3;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use pots::prelude::*;
use pots::train::Result;

type TrainBackend = Autodiff<NdArray>;

/// Create synthetic partially-observed series for benchmarking.
fn create_synthetic_data(n_samples: usize, seq_len: usize, n_features: usize) -> Array3<f32> {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    Array3::from_shape_fn((n_samples, seq_len, n_features), |_| {
        if rng.gen_bool(0.2) {
            f32::NAN
        } else {
            rng.gen::<f32>()
        }
    })
}

#[derive(Module, Debug)]
struct BenchImputer<B: Backend> {
    linear: Linear<B>,
}

fn masked_mse<B: Backend>(imputer: &BenchImputer<B>, inputs: ModelInputs<B>) -> Tensor<B, 1> {
    let ModelInputs::Bidirectional { forward, .. } = inputs else {
        unreachable!("bench imputer consumes bidirectional inputs")
    };
    let recon = imputer.linear.forward(forward.x.clone());
    ((recon - forward.x) * forward.mask).powf_scalar(2.0).mean()
}

impl<B: AutodiffBackend> PotsModule<B> for BenchImputer<B> {
    const NAME: &'static str = "BenchImputer";

    fn stream_loss(&self, inputs: ModelInputs<B>, _stream: &str) -> Result<Tensor<B, 1>> {
        Ok(masked_mse(self, inputs))
    }
}

impl<B: Backend> PotsInference<B> for BenchImputer<B> {
    fn validation_loss(&self, inputs: ModelInputs<B>) -> Result<Tensor<B, 1>> {
        Ok(masked_mse(self, inputs))
    }

    fn infer(&self, inputs: ModelInputs<B>) -> Result<ModelOutput<B>> {
        let ModelInputs::Bidirectional { forward, .. } = inputs else {
            unreachable!("bench imputer consumes bidirectional inputs")
        };
        Ok(ModelOutput::Imputation(self.linear.forward(forward.x)))
    }
}

fn bench_loader_epoch(c: &mut Criterion) {
    let mut group = c.benchmark_group("loader_epoch");
    let x = create_synthetic_data(1024, 48, 35);
    let dataset = PotsDataset::from_arrays(x, None).unwrap();

    for num_workers in [0usize, 2, 4] {
        let loader = PotsDataLoader::builder(dataset.clone())
            .batch_size(64)
            .num_workers(num_workers)
            .seed(Seed::new(42))
            .stage(Stage::Train)
            .build()
            .unwrap();

        group.bench_with_input(
            BenchmarkId::new("eager_workers", num_workers),
            &loader,
            |b, loader| {
                b.iter(|| {
                    let mut count = 0;
                    for batch in loader.epoch(0) {
                        black_box(batch.unwrap());
                        count += 1;
                    }
                    black_box(count)
                })
            },
        );
    }

    group.finish();
}

fn bench_training_epoch(c: &mut Criterion) {
    let mut group = c.benchmark_group("training_epoch");
    group.sample_size(10);

    let device = NdArrayDevice::Cpu;
    let x = create_synthetic_data(256, 48, 35);
    let dataset = PotsDataset::from_arrays(x, None).unwrap();
    let loader = PotsDataLoader::builder(dataset)
        .batch_size(32)
        .seed(Seed::new(42))
        .build()
        .unwrap();
    let plan = DeviceDispatcher::new(DeviceCatalog::ndarray())
        .resolve(&DeviceSpec::Auto)
        .unwrap();
    let model = BenchImputer::<TrainBackend> {
        linear: LinearConfig::new(35, 35).init(&device),
    };

    group.bench_function("single_epoch", |b| {
        b.iter(|| {
            let mut trainer = BurnTrainer::new(model.clone(), plan.clone(), 1e-3, |_| {
                AdamConfig::new().init::<TrainBackend, BenchImputer<TrainBackend>>()
            });
            let mut orchestrator = TrainingOrchestrator::new(1, None).unwrap();
            black_box(orchestrator.fit(&mut trainer, &loader, None).unwrap().state.best_loss)
        })
    });

    group.finish();
}

criterion_group!(benches, bench_loader_epoch, bench_training_epoch);
criterion_main!(benches);
