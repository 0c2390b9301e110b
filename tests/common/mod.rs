//! Shared fixtures for integration tests

#![allow(dead_code)]

use churnflow::contract::{FeatureContract, FeatureMatrix, FeatureValue, Labels, Record};
use churnflow::optimizer::SearchSpace;
use std::sync::Arc;

pub const CONTRACTS: [&str; 3] = ["Month-to-month", "One year", "Two year"];

pub fn contract() -> Arc<FeatureContract> {
    Arc::new(
        FeatureContract::new("churn_test", 1)
            .numeric("tenure")
            .categorical("Contract", &CONTRACTS)
            .nullable_numeric("MonthlyCharges"),
    )
}

pub fn record(tenure: f64, contract: &str, charges: Option<f64>) -> Record {
    let mut r = Record::new();
    r.insert("tenure".to_string(), FeatureValue::Number(tenure));
    r.insert("Contract".to_string(), FeatureValue::Text(contract.to_string()));
    r.insert(
        "MonthlyCharges".to_string(),
        charges.map_or(FeatureValue::Missing, FeatureValue::Number),
    );
    r
}

/// 100 customers, 30 of them churners with tenure 1..=15 against 30..=70
/// for the rest; tenure alone separates the classes
pub fn dataset() -> (FeatureMatrix, Labels) {
    let mut records = Vec::with_capacity(100);
    let mut labels = Vec::with_capacity(100);
    for i in 0..100usize {
        let churn = i % 10 < 3;
        let tenure = if churn {
            1 + (i * 7) % 15
        } else {
            30 + (i * 13) % 41
        };
        let contract = if churn { CONTRACTS[0] } else { CONTRACTS[i % 3] };
        let charges = if i % 17 == 0 { None } else { Some(20.0 + (i % 50) as f64) };
        records.push(record(tenure as f64, contract, charges));
        labels.push(churn);
    }
    (
        FeatureMatrix::new(contract(), records).expect("fixture conforms to contract"),
        Labels::new(labels),
    )
}

/// Logistic regression with either no penalty or a crippling one
pub fn l2_space(values: &[f64]) -> SearchSpace {
    SearchSpace::new()
        .categorical("model", &["logistic_regression"])
        .choice("l2", values.iter().map(|v| (*v).into()).collect())
}
