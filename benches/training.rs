use criterion::{black_box, criterion_group, criterion_main, Criterion, BenchmarkId};
use fashion_tuner::config::TrainConfig;
use fashion_tuner::model::build_model;
use fashion_tuner::nn::Tensor;
use fashion_tuner::optimizer::{ParameterValue, TrialParams};
use ndarray::Array2;
use rand::prelude::*;

fn params(conv_1: i64, conv_2: i64, dense_units: i64) -> TrialParams {
    let mut p = TrialParams::new();
    p.insert("conv_1".to_string(), ParameterValue::Int(conv_1));
    p.insert("conv_2".to_string(), ParameterValue::Int(conv_2));
    p.insert("dense_units".to_string(), ParameterValue::Int(dense_units));
    p.insert("learning_rate".to_string(), ParameterValue::Float(1e-3));
    p
}

fn create_batch(n: usize) -> (Tensor, Array2<f32>) {
    let mut rng = rand::thread_rng();
    let x = Tensor::from_shape_fn(vec![n, 28, 28, 1], |_| rng.gen::<f32>());
    let mut y = Array2::zeros((n, 10));
    for i in 0..n {
        y[[i, rng.gen_range(0..10)]] = 1.0;
    }
    (x, y)
}

fn bench_train_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("train_on_batch");
    group.sample_size(10);

    let config = TrainConfig::default();
    let (x, y) = create_batch(config.batch_size);
    for (conv_1, conv_2, dense) in [(32, 64, 256), (96, 128, 768)] {
        let mut model = build_model(&params(conv_1, conv_2, dense), &config).unwrap();
        group.bench_with_input(
            BenchmarkId::new("cnn", format!("{}-{}-{}", conv_1, conv_2, dense)),
            &(x.clone(), y.clone()),
            |b, (x, y)| b.iter(|| model.train_on_batch(black_box(x), black_box(y)).unwrap()),
        );
    }

    group.finish();
}

fn bench_prediction(c: &mut Criterion) {
    let mut group = c.benchmark_group("prediction");
    group.sample_size(10);

    let config = TrainConfig::default();
    let mut model = build_model(&params(32, 64, 256), &config).unwrap();
    for n in [32, 256] {
        let (x, _) = create_batch(n);
        group.bench_with_input(BenchmarkId::new("predict", n), &x, |b, x| {
            b.iter(|| model.predict(black_box(x.view()), config.predict_batch_size).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_train_step, bench_prediction);
criterion_main!(benches);
