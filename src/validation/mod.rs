//! Data quality gate
//!
//! A validator inspects a [`FeatureMatrix`] before any training work and
//! returns a pass/fail report with structured violations. Training refuses
//! a failing dataset with [`ChurnError::DataQualityError`], passing the
//! violation list through unchanged.

mod rules;

pub use rules::{Rule, RuleSetValidator};

use crate::contract::FeatureMatrix;
use crate::error::{ChurnError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{error, info};

/// A single rule violation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub rule_id: String,
    pub field: String,
    pub message: String,
}

impl Violation {
    pub fn new(
        rule_id: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            rule_id: rule_id.into(),
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.rule_id, self.field, self.message)
    }
}

/// Outcome of running a validator over a dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub passed: bool,
    pub total_checks: usize,
    pub passed_checks: usize,
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    /// Report for a validator that ran no checks
    pub fn empty() -> Self {
        Self {
            passed: true,
            total_checks: 0,
            passed_checks: 0,
            violations: Vec::new(),
        }
    }

    pub fn failed_checks(&self) -> usize {
        self.total_checks - self.passed_checks
    }
}

/// Pass/fail gate run before training
pub trait DataValidator: Send + Sync {
    fn validate(&self, matrix: &FeatureMatrix) -> ValidationReport;
}

/// Run the validator and convert a failing report into an error
pub fn gate(validator: &dyn DataValidator, matrix: &FeatureMatrix) -> Result<ValidationReport> {
    let report = validator.validate(matrix);
    if report.passed {
        info!(
            passed = report.passed_checks,
            total = report.total_checks,
            "Data validation passed"
        );
        Ok(report)
    } else {
        error!(
            failed = report.failed_checks(),
            total = report.total_checks,
            "Data validation failed"
        );
        Err(ChurnError::DataQualityError(report.violations))
    }
}
