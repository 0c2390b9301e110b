//! CSV loading into contract records

use crate::contract::{FeatureContract, FeatureMatrix, FeatureType, FeatureValue, Labels, Record};
use crate::error::{ChurnError, Result};
use polars::prelude::*;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Loads a labelled churn dataset and maps it onto a feature contract
///
/// Columns not declared by the contract (identifiers and the like) are
/// ignored. Yes/No text columns declared boolean are mapped to flags,
/// and numeric columns holding blanks become nulls.
#[derive(Debug, Clone)]
pub struct DataLoader {
    contract: Arc<FeatureContract>,
    target: String,
    infer_schema_length: usize,
}

impl DataLoader {
    pub fn new(contract: Arc<FeatureContract>) -> Self {
        Self {
            contract,
            target: "Churn".to_string(),
            infer_schema_length: 1000,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    pub fn with_infer_schema_length(mut self, n: usize) -> Self {
        self.infer_schema_length = n;
        self
    }

    pub fn contract(&self) -> &Arc<FeatureContract> {
        &self.contract
    }

    /// Load a CSV file with a header row
    pub fn load_csv(&self, path: impl AsRef<Path>) -> Result<(FeatureMatrix, Labels)> {
        let path = path.as_ref();
        let df = CsvReadOptions::default()
            .with_infer_schema_length(Some(self.infer_schema_length))
            .with_has_header(true)
            .try_into_reader_with_file_path(Some(path.to_path_buf()))?
            .finish()?;

        info!(path = %path.display(), rows = df.height(), columns = df.width(), "Loaded dataset");
        self.from_frame(&df)
    }

    /// Convert an in-memory frame
    pub fn from_frame(&self, df: &DataFrame) -> Result<(FeatureMatrix, Labels)> {
        let n = df.height();
        let mut records = vec![Record::new(); n];

        for spec in self.contract.features() {
            let series = column(df, &spec.name)?;
            let values = match &spec.kind {
                FeatureType::Numeric => numeric_values(&series)?,
                FeatureType::Boolean => flag_values(&series)?
                    .into_iter()
                    .map(|v| v.map_or(FeatureValue::Missing, FeatureValue::Bool))
                    .collect(),
                FeatureType::Categorical { .. } => text_values(&series)?,
            };
            for (record, value) in records.iter_mut().zip(values) {
                record.insert(spec.name.clone(), value);
            }
        }

        let target = column(df, &self.target)?;
        let labels = flag_values(&target)?
            .into_iter()
            .enumerate()
            .map(|(i, v)| {
                v.ok_or_else(|| {
                    ChurnError::DataError(format!("row {}: missing `{}` label", i, self.target))
                })
            })
            .collect::<Result<Vec<bool>>>()?;

        debug!(rows = n, features = self.contract.len(), "Mapped frame onto contract");
        let matrix = FeatureMatrix::new(Arc::clone(&self.contract), records)?;
        Ok((matrix, Labels::new(labels)))
    }
}

fn column(df: &DataFrame, name: &str) -> Result<Series> {
    df.column(name)
        .map(|c| c.as_materialized_series().clone())
        .map_err(|_| ChurnError::DataError(format!("column `{}` not found", name)))
}

fn numeric_values(series: &Series) -> Result<Vec<FeatureValue>> {
    let floats: Vec<Option<f64>> = if series.dtype() == &DataType::String {
        // blanks such as " " in TotalCharges parse to null
        series.str()?.into_iter().map(|v| v.and_then(|s| s.trim().parse::<f64>().ok())).collect()
    } else {
        series.cast(&DataType::Float64)?.f64()?.into_iter().collect()
    };
    Ok(floats
        .into_iter()
        .map(|v| v.map_or(FeatureValue::Missing, FeatureValue::Number))
        .collect())
}

fn text_values(series: &Series) -> Result<Vec<FeatureValue>> {
    let text = series.cast(&DataType::String)?;
    Ok(text
        .str()?
        .into_iter()
        .map(|v| v.map_or(FeatureValue::Missing, |s| FeatureValue::Text(s.to_string())))
        .collect())
}

fn flag_values(series: &Series) -> Result<Vec<Option<bool>>> {
    match series.dtype() {
        DataType::Boolean => Ok(series.bool()?.into_iter().collect()),
        DataType::String => series
            .str()?
            .into_iter()
            .map(|v| match v.map(str::trim) {
                None | Some("") => Ok(None),
                Some("Yes") | Some("yes") | Some("True") | Some("true") | Some("1") => Ok(Some(true)),
                Some("No") | Some("no") | Some("False") | Some("false") | Some("0") => Ok(Some(false)),
                Some(other) => Err(ChurnError::DataError(format!(
                    "column `{}`: `{}` is not a yes/no value",
                    series.name(),
                    other
                ))),
            })
            .collect(),
        _ => Ok(series
            .cast(&DataType::Float64)?
            .f64()?
            .into_iter()
            .map(|v| v.map(|x| x != 0.0))
            .collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn contract() -> Arc<FeatureContract> {
        Arc::new(
            FeatureContract::new("t", 1)
                .numeric("tenure")
                .nullable_numeric("TotalCharges")
                .boolean("SeniorCitizen")
                .boolean("Partner")
                .categorical("Contract", &["Month-to-month", "One year", "Two year"]),
        )
    }

    #[test]
    fn test_load_csv_maps_raw_columns() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "customerID,tenure,TotalCharges,SeniorCitizen,Partner,Contract,Churn").unwrap();
        writeln!(file, "A-1,1,29.85,0,Yes,Month-to-month,No").unwrap();
        writeln!(file, "A-2,34,1889.5,1,No,One year,Yes").unwrap();
        writeln!(file, "A-3,0, ,0,No,Two year,No").unwrap();
        file.flush().unwrap();

        let (matrix, labels) = DataLoader::new(contract()).load_csv(file.path()).unwrap();
        assert_eq!(matrix.len(), 3);
        assert_eq!(labels.values(), &[false, true, false]);

        let rows = matrix.records();
        assert_eq!(rows[0]["tenure"], FeatureValue::Number(1.0));
        assert_eq!(rows[0]["Partner"], FeatureValue::Bool(true));
        assert_eq!(rows[1]["SeniorCitizen"], FeatureValue::Bool(true));
        assert_eq!(rows[2]["TotalCharges"], FeatureValue::Missing);
        assert_eq!(rows[1]["Contract"], FeatureValue::Text("One year".into()));
        assert!(!rows[0].contains_key("customerID"));
    }

    #[test]
    fn test_missing_contract_column() {
        let df = df!("tenure" => &[1.0, 2.0], "Churn" => &["No", "Yes"]).unwrap();
        let err = DataLoader::new(contract()).from_frame(&df).unwrap_err();
        assert!(err.to_string().contains("TotalCharges"));
    }

    #[test]
    fn test_unknown_category_rejected() {
        let df = df!(
            "tenure" => &[1.0],
            "TotalCharges" => &[10.0],
            "SeniorCitizen" => &[0i64],
            "Partner" => &["No"],
            "Contract" => &["Weekly"],
            "Churn" => &["No"]
        )
        .unwrap();
        let err = DataLoader::new(contract()).from_frame(&df).unwrap_err();
        assert!(matches!(err, ChurnError::DataQualityError(_)));
    }
}
