//! Feature contract and feature matrix
//!
//! The contract is the agreed schema between feature engineering and the
//! pipeline: an ordered list of feature names with their semantic type.
//! Training data and serving requests are both checked against it; values
//! are never coerced across types.

mod encoder;

pub use encoder::FeatureEncoder;

use crate::error::{ChurnError, Result};
use crate::validation::Violation;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Maximum number of violations reported for a single dataset
const MAX_REPORTED_VIOLATIONS: usize = 50;

/// Semantic type of a feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeatureType {
    Numeric,
    Boolean,
    Categorical { categories: Vec<String> },
}

impl FeatureType {
    fn describe(&self) -> &'static str {
        match self {
            FeatureType::Numeric => "numeric",
            FeatureType::Boolean => "boolean",
            FeatureType::Categorical { .. } => "categorical",
        }
    }
}

/// A single feature value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Bool(bool),
    Number(f64),
    Text(String),
    Missing,
}

impl FeatureValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FeatureValue::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FeatureValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FeatureValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, FeatureValue::Missing)
    }

    fn kind(&self) -> &'static str {
        match self {
            FeatureValue::Bool(_) => "boolean",
            FeatureValue::Number(_) => "number",
            FeatureValue::Text(_) => "text",
            FeatureValue::Missing => "null",
        }
    }
}

impl From<f64> for FeatureValue {
    fn from(v: f64) -> Self {
        FeatureValue::Number(v)
    }
}

impl From<bool> for FeatureValue {
    fn from(v: bool) -> Self {
        FeatureValue::Bool(v)
    }
}

impl From<&str> for FeatureValue {
    fn from(v: &str) -> Self {
        FeatureValue::Text(v.to_string())
    }
}

/// One customer record: feature name to value
pub type Record = BTreeMap<String, FeatureValue>;

/// Declared feature with its type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub name: String,
    #[serde(flatten)]
    pub kind: FeatureType,
    /// Whether `null` is an accepted value (numeric features only)
    #[serde(default)]
    pub nullable: bool,
}

/// Named, versioned feature schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureContract {
    pub name: String,
    pub version: u32,
    features: Vec<FeatureSpec>,
}

impl FeatureContract {
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
            features: Vec::new(),
        }
    }

    fn with(mut self, name: impl Into<String>, kind: FeatureType, nullable: bool) -> Self {
        self.features.push(FeatureSpec {
            name: name.into(),
            kind,
            nullable,
        });
        self
    }

    pub fn numeric(self, name: impl Into<String>) -> Self {
        self.with(name, FeatureType::Numeric, false)
    }

    pub fn nullable_numeric(self, name: impl Into<String>) -> Self {
        self.with(name, FeatureType::Numeric, true)
    }

    pub fn boolean(self, name: impl Into<String>) -> Self {
        self.with(name, FeatureType::Boolean, false)
    }

    pub fn categorical(self, name: impl Into<String>, categories: &[&str]) -> Self {
        let categories = categories.iter().map(|c| c.to_string()).collect();
        self.with(name, FeatureType::Categorical { categories }, false)
    }

    /// Processed telco customer schema
    pub fn telco() -> Self {
        const YES_NO_INTERNET: &[&str] = &["No", "No internet service", "Yes"];
        Self::new("telco_churn", 1)
            .categorical("gender", &["Female", "Male"])
            .boolean("SeniorCitizen")
            .boolean("Partner")
            .boolean("Dependents")
            .numeric("tenure")
            .boolean("PhoneService")
            .categorical("MultipleLines", &["No", "No phone service", "Yes"])
            .categorical("InternetService", &["DSL", "Fiber optic", "No"])
            .categorical("OnlineSecurity", YES_NO_INTERNET)
            .categorical("OnlineBackup", YES_NO_INTERNET)
            .categorical("DeviceProtection", YES_NO_INTERNET)
            .categorical("TechSupport", YES_NO_INTERNET)
            .categorical("StreamingTV", YES_NO_INTERNET)
            .categorical("StreamingMovies", YES_NO_INTERNET)
            .categorical("Contract", &["Month-to-month", "One year", "Two year"])
            .boolean("PaperlessBilling")
            .categorical(
                "PaymentMethod",
                &[
                    "Bank transfer (automatic)",
                    "Credit card (automatic)",
                    "Electronic check",
                    "Mailed check",
                ],
            )
            .numeric("MonthlyCharges")
            .nullable_numeric("TotalCharges")
    }

    pub fn features(&self) -> &[FeatureSpec] {
        &self.features
    }

    pub fn get(&self, name: &str) -> Option<&FeatureSpec> {
        self.features.iter().find(|f| f.name == name)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Check the contract itself is well formed
    pub fn validate(&self) -> Result<()> {
        if self.features.is_empty() {
            return Err(ChurnError::ConfigError(format!(
                "feature contract `{}` declares no features",
                self.name
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for spec in &self.features {
            if !seen.insert(spec.name.as_str()) {
                return Err(ChurnError::ConfigError(format!(
                    "feature `{}` declared twice",
                    spec.name
                )));
            }
            if let FeatureType::Categorical { categories } = &spec.kind {
                if categories.is_empty() {
                    return Err(ChurnError::ConfigError(format!(
                        "categorical feature `{}` has no categories",
                        spec.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Violations of a single record against the contract
    pub fn violations(&self, record: &Record) -> Vec<Violation> {
        let mut out = Vec::new();

        for spec in &self.features {
            let Some(value) = record.get(&spec.name) else {
                out.push(Violation::new("missing_field", &spec.name, "required feature is absent"));
                continue;
            };

            let ok = match (&spec.kind, value) {
                (FeatureType::Numeric, FeatureValue::Number(v)) => {
                    if !v.is_finite() {
                        out.push(Violation::new("non_finite", &spec.name, "numeric value must be finite"));
                        continue;
                    }
                    true
                }
                (FeatureType::Numeric, FeatureValue::Missing) => spec.nullable,
                (FeatureType::Boolean, FeatureValue::Bool(_)) => true,
                (FeatureType::Categorical { categories }, FeatureValue::Text(v)) => {
                    if !categories.iter().any(|c| c == v) {
                        out.push(Violation::new(
                            "unknown_category",
                            &spec.name,
                            format!("`{}` is not one of {:?}", v, categories),
                        ));
                        continue;
                    }
                    true
                }
                _ => false,
            };

            if !ok {
                out.push(Violation::new(
                    "type_mismatch",
                    &spec.name,
                    format!("expected {}, got {}", spec.kind.describe(), value.kind()),
                ));
            }
        }

        for key in record.keys() {
            if self.get(key).is_none() {
                out.push(Violation::new("unexpected_field", key, "feature is not part of the contract"));
            }
        }

        out
    }

    /// Validate one serving record, failing with [`ChurnError::ValidationError`]
    pub fn check_record(&self, record: &Record) -> Result<()> {
        let violations = self.violations(record);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(ChurnError::ValidationError(violations))
        }
    }
}

/// Immutable, contract-conforming sequence of records
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    contract: Arc<FeatureContract>,
    records: Arc<Vec<Record>>,
}

impl FeatureMatrix {
    /// Build a matrix, rejecting records that do not conform to the contract
    pub fn new(contract: Arc<FeatureContract>, records: Vec<Record>) -> Result<Self> {
        contract.validate()?;

        let mut violations = Vec::new();
        for (i, record) in records.iter().enumerate() {
            for mut v in contract.violations(record) {
                v.field = format!("records[{}].{}", i, v.field);
                violations.push(v);
                if violations.len() >= MAX_REPORTED_VIOLATIONS {
                    return Err(ChurnError::DataQualityError(violations));
                }
            }
        }
        if !violations.is_empty() {
            return Err(ChurnError::DataQualityError(violations));
        }

        Ok(Self {
            contract,
            records: Arc::new(records),
        })
    }

    pub fn contract(&self) -> &FeatureContract {
        &self.contract
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Rows at the given indices, in order
    pub fn select(&self, indices: &[usize]) -> FeatureMatrix {
        let records = indices.iter().map(|&i| self.records[i].clone()).collect();
        FeatureMatrix {
            contract: Arc::clone(&self.contract),
            records: Arc::new(records),
        }
    }
}

/// Binary churn labels aligned with a [`FeatureMatrix`]
#[derive(Debug, Clone, PartialEq)]
pub struct Labels {
    values: Arc<[bool]>,
}

impl Labels {
    pub fn new(values: Vec<bool>) -> Self {
        Self {
            values: values.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[bool] {
        &self.values
    }

    pub fn positives(&self) -> usize {
        self.values.iter().filter(|v| **v).count()
    }

    pub fn to_array(&self) -> Array1<f64> {
        self.values.iter().map(|&v| if v { 1.0 } else { 0.0 }).collect()
    }

    pub fn select(&self, indices: &[usize]) -> Labels {
        Labels::new(indices.iter().map(|&i| self.values[i]).collect())
    }
}

impl From<Vec<bool>> for Labels {
    fn from(values: Vec<bool>) -> Self {
        Labels::new(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contract() -> FeatureContract {
        FeatureContract::new("test", 1)
            .numeric("tenure")
            .boolean("paperless")
            .categorical("plan", &["basic", "premium"])
    }

    fn record() -> Record {
        let mut r = Record::new();
        r.insert("tenure".into(), 12.0.into());
        r.insert("paperless".into(), true.into());
        r.insert("plan".into(), "basic".into());
        r
    }

    #[test]
    fn test_conforming_record() {
        assert!(contract().check_record(&record()).is_ok());
    }

    #[test]
    fn test_missing_extra_and_mistyped_fields() {
        let mut r = record();
        r.remove("tenure");
        r.insert("paperless".into(), FeatureValue::Text("Yes".into()));
        r.insert("extra".into(), 1.0.into());

        let violations = contract().violations(&r);
        let ids: Vec<&str> = violations.iter().map(|v| v.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["missing_field", "type_mismatch", "unexpected_field"]);
    }

    #[test]
    fn test_unknown_category_is_not_coerced() {
        let mut r = record();
        r.insert("plan".into(), "gold".into());
        let err = contract().check_record(&r).unwrap_err();
        assert_eq!(err.violations()[0].rule_id, "unknown_category");
    }

    #[test]
    fn test_null_only_for_nullable_numeric() {
        let c = FeatureContract::new("t", 1).numeric("a").nullable_numeric("b");
        let mut r = Record::new();
        r.insert("a".into(), FeatureValue::Missing);
        r.insert("b".into(), FeatureValue::Missing);
        let violations = c.violations(&r);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].field, "a");
    }

    #[test]
    fn test_matrix_rejects_nonconforming_records() {
        let mut bad = record();
        bad.remove("plan");
        let err = FeatureMatrix::new(Arc::new(contract()), vec![record(), bad]).unwrap_err();
        match err {
            ChurnError::DataQualityError(v) => assert_eq!(v[0].field, "records[1].plan"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_record_json_round_trip_keeps_types() {
        let json = r#"{"tenure": 3, "paperless": false, "plan": "premium"}"#;
        let r: Record = serde_json::from_str(json).unwrap();
        assert_eq!(r["tenure"], FeatureValue::Number(3.0));
        assert_eq!(r["paperless"], FeatureValue::Bool(false));
        assert!(contract().check_record(&r).is_ok());
    }

    #[test]
    fn test_telco_contract_is_well_formed() {
        let c = FeatureContract::telco();
        assert!(c.validate().is_ok());
        assert_eq!(c.len(), 19);
        assert!(c.get("TotalCharges").unwrap().nullable);
    }
}
