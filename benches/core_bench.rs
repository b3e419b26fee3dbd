use criterion::{black_box, criterion_group, criterion_main, Criterion};
use image::{DynamicImage, ImageOutputFormat, RgbImage};
use std::sync::Arc;

use authscan_core::{
    config::Thresholds,
    corpus::{ImageSource, ProceduralSource},
    features::extract_features,
    predictor::Predictor,
    store::ModelStore,
    trainer::{TrainOptions, Trainer},
};

fn sample_images() -> (RgbImage, RgbImage) {
    let mut source = ProceduralSource::new(7);
    let synthetic = source.synthetic(1).unwrap().remove(0);
    let realistic = source.realistic(1).unwrap().remove(0);
    (synthetic, realistic)
}

fn bench_feature_extraction(c: &mut Criterion) {
    let (synthetic, realistic) = sample_images();

    c.bench_function("extract_features_synthetic", |b| {
        b.iter(|| extract_features(black_box(&synthetic)))
    });
    c.bench_function("extract_features_realistic", |b| {
        b.iter(|| extract_features(black_box(&realistic)))
    });
}

fn bench_predict(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ModelStore::new(dir.path()));
    let mut source = ProceduralSource::new(42).with_size_range(64, 128);
    Trainer::new(TrainOptions {
        samples_per_class: 20,
        ..TrainOptions::default()
    })
    .train(&mut source, &store)
    .unwrap();
    let predictor = Predictor::new(store, Thresholds::default());

    let (_, realistic) = sample_images();
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(realistic.clone())
        .write_to(&mut bytes, ImageOutputFormat::Png)
        .unwrap();

    c.bench_function("predict_png", |b| b.iter(|| predictor.predict(black_box(&bytes))));
    // 不含解码与缩放，只看特征提取 + 模型打分
    c.bench_function("score_raster", |b| {
        b.iter(|| predictor.score_raster(black_box(&realistic)))
    });
}

criterion_group!(benches, bench_feature_extraction, bench_predict);
criterion_main!(benches);
