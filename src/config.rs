//! Run configuration objects.
//!
//! The source analysis this replaces kept its working directory, output
//! paths, and regression variants as ambient script state. Here a run is
//! data: a [`RunConfig`] passed to every pipeline stage and a list of
//! [`RunSpec`]s consumed by one generic estimation entry point.

use std::fs;
use std::path::{Path, PathBuf};

use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{PanelError, Result};
use crate::schema::obs;

/// Paths and seed for one analysis run. No process-wide mutable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub base_path: PathBuf,
    pub output_dir: PathBuf,
    #[serde(default)]
    pub seed: u64,
}

impl RunConfig {
    pub fn new(base_path: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            output_dir: output_dir.into(),
            seed: 0,
        }
    }

    /// Load a run configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| PanelError::InvalidData(format!("run config: {e}")))
    }

    pub fn input_file(&self, filename: &str) -> PathBuf {
        self.base_path.join(filename)
    }

    pub fn ensure_output_dir(&self) -> Result<PathBuf> {
        fs::create_dir_all(&self.output_dir)?;
        Ok(self.output_dir.clone())
    }
}

/// How the estimator reacts to collinear columns after absorption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CollinearityPolicy {
    /// Fail with `RankDeficiency`, naming the offending columns.
    #[default]
    Strict,
    /// Drop the offending columns, record their names on the result.
    Permissive,
}

/// Declarative sample restriction applied before estimation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SpecFilter {
    /// Keep observations with `min <= time_period <= max`.
    PeriodRange { min: i64, max: i64 },
    /// Keep observations whose cluster id is in the list.
    ClusterIn { values: Vec<String> },
    /// Keep observations where a column equals a numeric value.
    ColumnEquals { column: String, value: f64 },
}

impl SpecFilter {
    pub fn to_expr(&self) -> Expr {
        match self {
            Self::PeriodRange { min, max } => col(obs::TIME_PERIOD)
                .gt_eq(lit(*min))
                .and(col(obs::TIME_PERIOD).lt_eq(lit(*max))),
            Self::ClusterIn { values } => {
                let s = Series::new("".into(), values.as_slice());
                col(obs::CLUSTER_ID).is_in(lit(s), false)
            }
            Self::ColumnEquals { column, value } => col(column.as_str()).eq(lit(*value)),
        }
    }
}

/// One parameterized regression specification.
///
/// Differences between "analyses" - covariate sets, absorbed dimensions,
/// sub-samples - are configuration here, not copy-pasted code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSpec {
    pub label: String,
    /// Outcome column; defaults to the observation schema's outcome.
    #[serde(default = "default_outcome")]
    pub outcome: String,
    /// Regressors of interest (e.g. the treatment interaction, or the
    /// event-time dummies once generated).
    pub regressors: Vec<String>,
    /// Additional covariate columns entering the design matrix.
    #[serde(default)]
    pub covariates: Vec<String>,
    /// One or two categorical dimensions to absorb.
    pub absorb: Vec<String>,
    /// Clustering variable for the robust variance.
    #[serde(default = "default_cluster")]
    pub cluster: String,
    #[serde(default)]
    pub filters: Vec<SpecFilter>,
    #[serde(default)]
    pub collinearity: CollinearityPolicy,
}

fn default_outcome() -> String {
    obs::OUTCOME.to_string()
}

fn default_cluster() -> String {
    obs::CLUSTER_ID.to_string()
}

impl RunSpec {
    /// Minimal spec: one regressor of interest, unit and time effects
    /// absorbed, clustered on the schema's cluster column.
    pub fn new(label: impl Into<String>, regressor: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            outcome: default_outcome(),
            regressors: vec![regressor.into()],
            covariates: Vec::new(),
            absorb: vec![obs::UNIT_ID.to_string(), obs::TIME_PERIOD.to_string()],
            cluster: default_cluster(),
            filters: Vec::new(),
            collinearity: CollinearityPolicy::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.regressors.is_empty() {
            return Err(PanelError::Configuration(format!(
                "spec '{}': at least one regressor is required",
                self.label
            )));
        }
        if self.absorb.is_empty() || self.absorb.len() > 2 {
            return Err(PanelError::Configuration(format!(
                "spec '{}': absorb must name one or two dimensions, got {}",
                self.label,
                self.absorb.len()
            )));
        }
        if self.cluster.is_empty() {
            return Err(PanelError::Configuration(format!(
                "spec '{}': clustering variable is required",
                self.label
            )));
        }
        Ok(())
    }

    /// Apply the spec's sample restrictions.
    pub fn restrict(&self, df: &DataFrame) -> Result<DataFrame> {
        if self.filters.is_empty() {
            return Ok(df.clone());
        }
        let mut lazy = df.clone().lazy();
        for f in &self.filters {
            lazy = lazy.filter(f.to_expr());
        }
        Ok(lazy.collect()?)
    }

    /// All design-matrix columns, regressors of interest first.
    pub fn design_columns(&self) -> Vec<String> {
        let mut cols = self.regressors.clone();
        cols.extend(self.covariates.iter().cloned());
        cols
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_round_trips_through_json() {
        let spec = RunSpec {
            filters: vec![SpecFilter::PeriodRange { min: 2010, max: 2019 }],
            covariates: vec!["age".into(), "age_sq".into()],
            ..RunSpec::new("baseline", "treated_post")
        };
        let text = serde_json::to_string(&spec).unwrap();
        let back: RunSpec = serde_json::from_str(&text).unwrap();
        assert_eq!(back.label, "baseline");
        assert_eq!(back.regressors, vec!["treated_post".to_string()]);
        assert_eq!(back.covariates.len(), 2);
        assert_eq!(back.collinearity, CollinearityPolicy::Strict);
    }

    #[test]
    fn validate_rejects_three_absorb_dims() {
        let mut spec = RunSpec::new("bad", "treated_post");
        spec.absorb = vec!["a".into(), "b".into(), "c".into()];
        assert!(matches!(
            spec.validate(),
            Err(PanelError::Configuration(_))
        ));
    }

    #[test]
    fn validate_rejects_empty_regressors() {
        let mut spec = RunSpec::new("bad", "x");
        spec.regressors.clear();
        assert!(spec.validate().is_err());
    }
}
