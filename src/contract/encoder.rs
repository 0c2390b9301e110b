//! Numeric encoding of contract records
//!
//! Fitted on the training split only and stored alongside the model, so
//! serving applies exactly the transformation the model was trained with.

use super::{FeatureMatrix, FeatureType, FeatureValue, Record};
use crate::error::{ChurnError, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Encoding of one output column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "encoding", rename_all = "snake_case")]
enum ColumnEncoding {
    /// Median fill for nulls, then `(x - center) / scale`
    Standardized {
        feature: String,
        fill: f64,
        center: f64,
        scale: f64,
    },
    Flag { feature: String },
    /// One indicator per category, first category dropped
    OneHot { feature: String, category: String },
}

impl ColumnEncoding {
    fn output_name(&self) -> String {
        match self {
            ColumnEncoding::Standardized { feature, .. } | ColumnEncoding::Flag { feature } => {
                feature.clone()
            }
            ColumnEncoding::OneHot { feature, category } => format!("{}_{}", feature, category),
        }
    }

    fn encode(&self, record: &Record) -> Result<f64> {
        let feature = match self {
            ColumnEncoding::Standardized { feature, .. }
            | ColumnEncoding::Flag { feature }
            | ColumnEncoding::OneHot { feature, .. } => feature,
        };
        let value = record
            .get(feature)
            .ok_or_else(|| ChurnError::DataError(format!("feature `{}` missing from record", feature)))?;

        let encoded = match (self, value) {
            (ColumnEncoding::Standardized { center, scale, .. }, FeatureValue::Number(v)) => {
                (v - center) / scale
            }
            (ColumnEncoding::Standardized { fill, center, scale, .. }, FeatureValue::Missing) => {
                (fill - center) / scale
            }
            (ColumnEncoding::Flag { .. }, FeatureValue::Bool(b)) => f64::from(u8::from(*b)),
            (ColumnEncoding::OneHot { category, .. }, FeatureValue::Text(v)) => {
                if v == category {
                    1.0
                } else {
                    0.0
                }
            }
            _ => {
                return Err(ChurnError::DataError(format!(
                    "feature `{}` has a value the encoder cannot handle: {:?}",
                    feature, value
                )))
            }
        };
        Ok(encoded)
    }
}

/// Encoder turning records into a dense `f64` matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureEncoder {
    columns: Vec<ColumnEncoding>,
}

impl FeatureEncoder {
    /// Learn fill values and scaling from a training matrix
    pub fn fit(matrix: &FeatureMatrix) -> Result<Self> {
        if matrix.is_empty() {
            return Err(ChurnError::DataError("cannot fit encoder on an empty matrix".to_string()));
        }

        let mut columns = Vec::new();
        for spec in matrix.contract().features() {
            match &spec.kind {
                FeatureType::Numeric => {
                    let present: Vec<f64> = matrix
                        .records()
                        .iter()
                        .filter_map(|r| r.get(&spec.name).and_then(FeatureValue::as_number))
                        .collect();
                    let fill = median(&present).unwrap_or(0.0);
                    let filled: Vec<f64> = matrix
                        .records()
                        .iter()
                        .map(|r| r.get(&spec.name).and_then(FeatureValue::as_number).unwrap_or(fill))
                        .collect();
                    let (center, std) = mean_std(&filled);
                    columns.push(ColumnEncoding::Standardized {
                        feature: spec.name.clone(),
                        fill,
                        center,
                        scale: if std == 0.0 { 1.0 } else { std },
                    });
                }
                FeatureType::Boolean => columns.push(ColumnEncoding::Flag {
                    feature: spec.name.clone(),
                }),
                FeatureType::Categorical { categories } => {
                    for category in categories.iter().skip(1) {
                        columns.push(ColumnEncoding::OneHot {
                            feature: spec.name.clone(),
                            category: category.clone(),
                        });
                    }
                }
            }
        }

        Ok(Self { columns })
    }

    pub fn n_outputs(&self) -> usize {
        self.columns.len()
    }

    pub fn output_names(&self) -> Vec<String> {
        self.columns.iter().map(ColumnEncoding::output_name).collect()
    }

    /// Encode records into a `(n_records, n_outputs)` matrix
    pub fn transform(&self, records: &[Record]) -> Result<Array2<f64>> {
        let n_cols = self.columns.len();
        let mut data = Vec::with_capacity(records.len() * n_cols);
        for record in records {
            for column in &self.columns {
                data.push(column.encode(record)?);
            }
        }
        Ok(Array2::from_shape_vec((records.len(), n_cols), data)?)
    }

    pub fn transform_matrix(&self, matrix: &FeatureMatrix) -> Result<Array2<f64>> {
        self.transform(matrix.records())
    }
}

fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::FeatureContract;
    use std::sync::Arc;

    fn matrix() -> FeatureMatrix {
        let contract = Arc::new(
            FeatureContract::new("t", 1)
                .nullable_numeric("charges")
                .boolean("paperless")
                .categorical("contract", &["monthly", "yearly", "two_year"]),
        );
        let rows = [
            (Some(10.0), true, "monthly"),
            (Some(20.0), false, "yearly"),
            (None, true, "two_year"),
            (Some(30.0), false, "monthly"),
        ];
        let records = rows
            .iter()
            .map(|(c, p, k)| {
                let mut r = Record::new();
                r.insert("charges".into(), c.map_or(FeatureValue::Missing, FeatureValue::Number));
                r.insert("paperless".into(), (*p).into());
                r.insert("contract".into(), (*k).into());
                r
            })
            .collect();
        FeatureMatrix::new(contract, records).unwrap()
    }

    #[test]
    fn test_output_layout_drops_first_category() {
        let encoder = FeatureEncoder::fit(&matrix()).unwrap();
        assert_eq!(
            encoder.output_names(),
            vec!["charges", "paperless", "contract_yearly", "contract_two_year"]
        );
    }

    #[test]
    fn test_nulls_filled_with_training_median() {
        let m = matrix();
        let encoder = FeatureEncoder::fit(&m).unwrap();
        let x = encoder.transform_matrix(&m).unwrap();
        assert_eq!(x.shape(), &[4, 4]);

        // median of [10, 20, 30] is 20, which standardizes to the column mean
        let filled = [10.0, 20.0, 20.0, 30.0];
        let mean = filled.iter().sum::<f64>() / 4.0;
        assert!((x[[2, 0]] - x[[1, 0]]).abs() < 1e-12);
        assert!(x.column(0).sum().abs() < 1e-9);
        assert!((mean - 20.0).abs() < 1e-12);

        assert_eq!(x[[0, 1]], 1.0);
        assert_eq!(x[[0, 2]], 0.0);
        assert_eq!(x[[1, 2]], 1.0);
        assert_eq!(x[[2, 3]], 1.0);
    }

    #[test]
    fn test_encoder_survives_serialization() {
        let encoder = FeatureEncoder::fit(&matrix()).unwrap();
        let json = serde_json::to_string(&encoder).unwrap();
        let restored: FeatureEncoder = serde_json::from_str(&json).unwrap();
        assert_eq!(encoder, restored);
    }
}
