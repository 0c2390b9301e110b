use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use churnflow::contract::{FeatureContract, FeatureMatrix, FeatureValue, Labels, Record};
use churnflow::inference::{InferenceService, PredictionRequest};
use churnflow::optimizer::TrialParams;
use churnflow::registry::{ModelPointer, Promoter};
use churnflow::tracking::{ExperimentLedger, MemoryArtifactStore};
use churnflow::training::Trainer;
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use std::sync::Arc;

const CONTRACTS: [&str; 3] = ["Month-to-month", "One year", "Two year"];

fn contract() -> Arc<FeatureContract> {
    Arc::new(
        FeatureContract::new("bench", 1)
            .numeric("tenure")
            .categorical("Contract", &CONTRACTS)
            .nullable_numeric("MonthlyCharges")
            .boolean("PaperlessBilling"),
    )
}

fn random_record(rng: &mut impl Rng) -> (Record, bool) {
    let tenure = rng.gen_range(0.0..72.0);
    let contract = CONTRACTS[rng.gen_range(0..3)];
    let charges: f64 = rng.gen_range(18.0..120.0);
    let churn = (tenure < 12.0 && contract == CONTRACTS[0]) || rng.gen_bool(0.05);

    let mut r = Record::new();
    r.insert("tenure".into(), FeatureValue::Number(tenure));
    r.insert("Contract".into(), FeatureValue::Text(contract.to_string()));
    r.insert(
        "MonthlyCharges".into(),
        if rng.gen_bool(0.02) { FeatureValue::Missing } else { FeatureValue::Number(charges) },
    );
    r.insert("PaperlessBilling".into(), FeatureValue::Bool(rng.gen_bool(0.6)));
    (r, churn)
}

fn serving(model: &str, n_rows: usize) -> (InferenceService, Vec<Record>) {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
    let (records, labels): (Vec<_>, Vec<_>) = (0..n_rows).map(|_| random_record(&mut rng)).unzip();
    let features = FeatureMatrix::new(contract(), records.clone()).unwrap();

    let ledger = ExperimentLedger::in_memory();
    let store = Arc::new(MemoryArtifactStore::new());
    let trainer = Trainer::new(store.clone(), ledger.run_ids());
    let mut params = TrialParams::new();
    params.insert("model".into(), model.into());
    if model == "gradient_boosting" {
        params.insert("n_estimators".into(), 100i64.into());
        params.insert("max_depth".into(), 4i64.into());
    }
    ledger
        .append(trainer.train(&features, &Labels::new(labels), &params).unwrap())
        .unwrap();

    let pointer = Arc::new(ModelPointer::in_memory());
    Promoter::new(Arc::clone(&pointer), store.clone()).promote(&ledger).unwrap();
    let service = InferenceService::new(pointer, store);
    service.start().unwrap();
    (service, records)
}

fn bench_predict_one(c: &mut Criterion) {
    let mut group = c.benchmark_group("predict_one");

    for model in ["logistic_regression", "gradient_boosting"] {
        let (service, records) = serving(model, 2000);
        let record = records[0].clone();
        group.bench_function(BenchmarkId::from_parameter(model), |b| {
            b.iter(|| service.predict_one(black_box(&record)).unwrap())
        });
    }

    group.finish();
}

fn bench_predict_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("predict_batch");
    let (service, records) = serving("gradient_boosting", 2000);

    for batch_size in [1, 10, 100, 1000].iter() {
        let request = PredictionRequest::Batch(records[..*batch_size].to_vec());
        group.bench_with_input(BenchmarkId::from_parameter(batch_size), &request, |b, request| {
            b.iter(|| service.predict(black_box(request)).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_predict_one, bench_predict_batch);
criterion_main!(benches);
