//! Rule-based dataset validator

use super::{DataValidator, ValidationReport, Violation};
use crate::contract::{FeatureMatrix, FeatureValue};
use serde::{Deserialize, Serialize};

/// A single data-quality rule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Rule {
    /// The field must be declared by the feature contract
    Required { field: String },
    /// No record may carry a missing value for the field
    NotNull { field: String },
    /// Text values must come from the allowed set
    InSet { field: String, allowed: Vec<String> },
    /// Numeric values must lie within the bounds (inclusive)
    Between {
        field: String,
        min: Option<f64>,
        max: Option<f64>,
    },
    /// `a >= b` must hold for at least `mostly` of the comparable records
    PairAtLeast { a: String, b: String, mostly: f64 },
}

impl Rule {
    pub fn id(&self) -> &'static str {
        match self {
            Rule::Required { .. } => "required_column",
            Rule::NotNull { .. } => "not_null",
            Rule::InSet { .. } => "in_set",
            Rule::Between { .. } => "between",
            Rule::PairAtLeast { .. } => "pair_at_least",
        }
    }

    fn field(&self) -> &str {
        match self {
            Rule::Required { field }
            | Rule::NotNull { field }
            | Rule::InSet { field, .. }
            | Rule::Between { field, .. } => field,
            Rule::PairAtLeast { a, .. } => a,
        }
    }

    fn check(&self, matrix: &FeatureMatrix) -> Option<String> {
        let n = matrix.len();
        match self {
            Rule::Required { field } => {
                if matrix.contract().get(field).is_none() {
                    Some("required column is not part of the dataset".to_string())
                } else {
                    None
                }
            }
            Rule::NotNull { field } => {
                let nulls = matrix
                    .records()
                    .iter()
                    .filter(|r| matches!(r.get(field), None | Some(FeatureValue::Missing)))
                    .count();
                (nulls > 0).then(|| format!("{} of {} values are missing", nulls, n))
            }
            Rule::InSet { field, allowed } => {
                let bad = matrix
                    .records()
                    .iter()
                    .filter_map(|r| r.get(field).and_then(FeatureValue::as_text))
                    .filter(|v| !allowed.iter().any(|a| a == v))
                    .count();
                (bad > 0).then(|| format!("{} of {} values outside {:?}", bad, n, allowed))
            }
            Rule::Between { field, min, max } => {
                let bad = matrix
                    .records()
                    .iter()
                    .filter_map(|r| r.get(field).and_then(FeatureValue::as_number))
                    .filter(|v| min.map_or(false, |m| *v < m) || max.map_or(false, |m| *v > m))
                    .count();
                (bad > 0).then(|| {
                    format!(
                        "{} of {} values outside [{}, {}]",
                        bad,
                        n,
                        min.map_or("-inf".to_string(), |m| m.to_string()),
                        max.map_or("inf".to_string(), |m| m.to_string()),
                    )
                })
            }
            Rule::PairAtLeast { a, b, mostly } => {
                let pairs: Vec<bool> = matrix
                    .records()
                    .iter()
                    .filter_map(|r| {
                        let va = r.get(a).and_then(FeatureValue::as_number)?;
                        let vb = r.get(b).and_then(FeatureValue::as_number)?;
                        Some(va >= vb)
                    })
                    .collect();
                if pairs.is_empty() {
                    return None;
                }
                let ratio = pairs.iter().filter(|ok| **ok).count() as f64 / pairs.len() as f64;
                (ratio < *mostly).then(|| {
                    format!("{} >= {} holds for {:.3} of records, expected {:.3}", a, b, ratio, mostly)
                })
            }
        }
    }
}

/// Validator evaluating an ordered list of rules
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSetValidator {
    rules: Vec<Rule>,
}

impl RuleSetValidator {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Schema and business checks for the processed telco churn dataset
    pub fn telco() -> Self {
        let required = [
            "gender",
            "Partner",
            "Dependents",
            "PhoneService",
            "InternetService",
            "Contract",
            "tenure",
            "MonthlyCharges",
            "TotalCharges",
        ];
        let mut rules: Vec<Rule> = required
            .iter()
            .map(|f| Rule::Required { field: f.to_string() })
            .collect();

        let in_set = |field: &str, allowed: &[&str]| Rule::InSet {
            field: field.to_string(),
            allowed: allowed.iter().map(|s| s.to_string()).collect(),
        };
        rules.push(in_set("gender", &["Male", "Female"]));
        rules.push(in_set("Contract", &["Month-to-month", "One year", "Two year"]));
        rules.push(in_set("InternetService", &["DSL", "Fiber optic", "No"]));

        rules.push(Rule::Between { field: "tenure".to_string(), min: Some(0.0), max: Some(120.0) });
        rules.push(Rule::Between { field: "MonthlyCharges".to_string(), min: Some(0.0), max: Some(200.0) });
        rules.push(Rule::Between { field: "TotalCharges".to_string(), min: Some(0.0), max: None });
        rules.push(Rule::NotNull { field: "tenure".to_string() });
        rules.push(Rule::NotNull { field: "MonthlyCharges".to_string() });
        rules.push(Rule::PairAtLeast {
            a: "TotalCharges".to_string(),
            b: "MonthlyCharges".to_string(),
            mostly: 0.95,
        });

        Self { rules }
    }
}

impl DataValidator for RuleSetValidator {
    fn validate(&self, matrix: &FeatureMatrix) -> ValidationReport {
        let violations: Vec<Violation> = self
            .rules
            .iter()
            .filter_map(|rule| {
                rule.check(matrix)
                    .map(|message| Violation::new(rule.id(), rule.field(), message))
            })
            .collect();

        let total = self.rules.len();
        ValidationReport {
            passed: violations.is_empty(),
            total_checks: total,
            passed_checks: total - violations.len(),
            violations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{FeatureContract, Record};
    use std::sync::Arc;

    fn matrix(rows: &[(f64, f64)]) -> FeatureMatrix {
        let contract = Arc::new(
            FeatureContract::new("charges", 1)
                .numeric("MonthlyCharges")
                .nullable_numeric("TotalCharges"),
        );
        let records = rows
            .iter()
            .map(|(m, t)| {
                let mut r = Record::new();
                r.insert("MonthlyCharges".to_string(), FeatureValue::Number(*m));
                r.insert(
                    "TotalCharges".to_string(),
                    if t.is_nan() { FeatureValue::Missing } else { FeatureValue::Number(*t) },
                );
                r
            })
            .collect();
        FeatureMatrix::new(contract, records).unwrap()
    }

    #[test]
    fn test_between_and_not_null() {
        let m = matrix(&[(10.0, 100.0), (250.0, 300.0), (20.0, f64::NAN)]);
        let validator = RuleSetValidator::default()
            .with_rule(Rule::Between { field: "MonthlyCharges".into(), min: Some(0.0), max: Some(200.0) })
            .with_rule(Rule::NotNull { field: "TotalCharges".into() });
        let report = validator.validate(&m);
        assert!(!report.passed);
        assert_eq!(report.total_checks, 2);
        assert_eq!(report.violations.len(), 2);
        assert_eq!(report.violations[0].rule_id, "between");
        assert_eq!(report.violations[1].field, "TotalCharges");
    }

    #[test]
    fn test_pair_rule_respects_mostly() {
        let mut rows: Vec<(f64, f64)> = (0..19).map(|i| (10.0, 10.0 + i as f64)).collect();
        rows.push((50.0, 5.0));
        let m = matrix(&rows);
        let pair = |mostly| Rule::PairAtLeast {
            a: "TotalCharges".into(),
            b: "MonthlyCharges".into(),
            mostly,
        };
        assert!(RuleSetValidator::new(vec![pair(0.95)]).validate(&m).passed);
        assert!(!RuleSetValidator::new(vec![pair(0.99)]).validate(&m).passed);
    }

    #[test]
    fn test_required_column_missing_from_contract() {
        let m = matrix(&[(10.0, 10.0)]);
        let report = RuleSetValidator::new(vec![Rule::Required { field: "tenure".into() }]).validate(&m);
        assert!(!report.passed);
        assert_eq!(report.violations[0].rule_id, "required_column");
    }
}
