//! Sample construction: loading, eligibility filtering, derived variables,
//! and attrition bookkeeping.
//!
//! CSVs are read with every column as String, then cast explicitly - the
//! survey extracts mix numeric codes and labels, so inference is never
//! trusted. Rows dropped for data-quality reasons are counted and warned
//! about, not silently lost.

use std::path::Path;

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::RunConfig;
use crate::error::{PanelError, Result};
use crate::schema::{derived, obs, raw};

/// Read a CSV file with all columns as String dtype.
/// Trims whitespace from column names.
pub fn read_csv_as_strings(path: &Path) -> Result<DataFrame> {
    let mut df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0)) // all columns as String
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;

    let trimmed: Vec<String> = df
        .get_column_names_str()
        .iter()
        .map(|c| c.trim().to_string())
        .collect();
    df.set_column_names(trimmed)?;

    Ok(df)
}

pub fn require_columns(df: &DataFrame, required: &[&str]) -> Result<()> {
    for &name in required {
        if df.column(name).is_err() {
            return Err(PanelError::MissingColumn(name.to_string()));
        }
    }
    Ok(())
}

/// Parse a string column to Float64.
pub fn parse_float(df: DataFrame, column: &str) -> Result<DataFrame> {
    Ok(df
        .lazy()
        .with_columns([col(column)
            .str()
            .strip_chars(lit(" \t\r\n"))
            .cast(DataType::Float64)])
        .collect()?)
}

/// Parse a string column to Int64.
pub fn parse_int(df: DataFrame, column: &str) -> Result<DataFrame> {
    Ok(df
        .lazy()
        .with_columns([col(column)
            .str()
            .strip_chars(lit(" \t\r\n"))
            .cast(DataType::Int64)])
        .collect()?)
}

/// Load an observation table from `base_path/filename`.
///
/// Required columns: unit_id, time_period, outcome, treatment_group,
/// cluster_id. The first four are cast to numeric; cluster_id stays a
/// string label. All other columns are preserved as strings.
pub fn load_observations(config: &RunConfig, filename: &str) -> Result<DataFrame> {
    let raw_df = read_csv_as_strings(&config.input_file(filename))?;
    require_columns(&raw_df, &obs::REQUIRED)?;

    let df = raw_df
        .lazy()
        .with_columns([
            col(obs::UNIT_ID).cast(DataType::Int64),
            col(obs::TIME_PERIOD).cast(DataType::Int64),
            col(obs::OUTCOME).cast(DataType::Float64),
            col(obs::TREATMENT_GROUP).cast(DataType::Float64),
        ])
        .collect()?;

    Ok(df)
}

/// Eligibility restrictions applied to the raw survey extract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EligibilityFilter {
    pub min_age: Option<f64>,
    pub max_age: Option<f64>,
    /// Require the employment indicator to be 1.
    pub employed_only: bool,
    pub min_year: Option<i64>,
    pub max_year: Option<i64>,
}

impl Default for EligibilityFilter {
    fn default() -> Self {
        Self {
            min_age: None,
            max_age: None,
            employed_only: false,
            min_year: None,
            max_year: None,
        }
    }
}

impl EligibilityFilter {
    pub fn apply(&self, df: &DataFrame) -> Result<DataFrame> {
        let before = df.height();
        let mut lazy = df.clone().lazy();
        if let Some(min) = self.min_age {
            lazy = lazy.filter(col(raw::AGE).gt_eq(lit(min)));
        }
        if let Some(max) = self.max_age {
            lazy = lazy.filter(col(raw::AGE).lt_eq(lit(max)));
        }
        if self.employed_only {
            lazy = lazy.filter(col(raw::EMPLOYED).eq(lit(1)));
        }
        if let Some(min) = self.min_year {
            lazy = lazy.filter(col(raw::YEAR).gt_eq(lit(min)));
        }
        if let Some(max) = self.max_year {
            lazy = lazy.filter(col(raw::YEAR).lt_eq(lit(max)));
        }
        let out = lazy.collect()?;
        if out.height() < before {
            warn!(
                dropped = before - out.height(),
                kept = out.height(),
                "eligibility filter removed observations"
            );
        }
        Ok(out)
    }
}

/// Derive `outcome = ln(wage)`.
///
/// Rows with a missing wage are dropped (counted, warned). A non-positive
/// wage is a typed error, never a silent NaN in downstream tables.
pub fn derive_log_wage(df: DataFrame) -> Result<DataFrame> {
    require_columns(&df, &[raw::WAGE])?;
    let before = df.height();
    let df = df
        .lazy()
        .filter(col(raw::WAGE).is_not_null())
        .collect()?;
    let missing = before - df.height();
    if missing > 0 {
        warn!(missing, "dropped observations with missing wage");
    }

    let nonpositive = df
        .clone()
        .lazy()
        .filter(col(raw::WAGE).lt_eq(lit(0.0)))
        .collect()?
        .height();
    if nonpositive > 0 {
        return Err(PanelError::Numeric(format!(
            "{nonpositive} observations have non-positive wage; log wage is undefined"
        )));
    }

    Ok(df
        .lazy()
        .with_columns([col(raw::WAGE).log(std::f64::consts::E.into()).alias(obs::OUTCOME)])
        .collect()?)
}

/// time_period = calendar year.
pub fn derive_period_year(df: DataFrame) -> Result<DataFrame> {
    require_columns(&df, &[raw::YEAR])?;
    Ok(df
        .lazy()
        .with_columns([col(raw::YEAR).cast(DataType::Int64).alias(obs::TIME_PERIOD)])
        .collect()?)
}

/// time_period = half-year ordinal: `2*year + 1[interview_month >= boundary]`.
///
/// Used when a calendar year must be split at an intra-year cutoff (the
/// embargo starts in August 2014, so 2014 interviews before and after the
/// cutoff are distinct periods).
pub fn derive_period_split_year(df: DataFrame, boundary_month: i64) -> Result<DataFrame> {
    if !(1..=12).contains(&boundary_month) {
        return Err(PanelError::Configuration(format!(
            "boundary_month must be in 1..=12, got {boundary_month}"
        )));
    }
    require_columns(&df, &[raw::YEAR, raw::INTERVIEW_MONTH])?;
    Ok(df
        .lazy()
        .with_columns([(col(raw::YEAR).cast(DataType::Int64) * lit(2)
            + when(col(raw::INTERVIEW_MONTH).cast(DataType::Int64).gt_eq(lit(boundary_month)))
                .then(lit(1i64))
                .otherwise(lit(0i64)))
        .alias(obs::TIME_PERIOD)])
        .collect()?)
}

/// Keep only interviews in `min_month..=max_month`.
pub fn restrict_interview_months(df: DataFrame, min_month: i64, max_month: i64) -> Result<DataFrame> {
    require_columns(&df, &[raw::INTERVIEW_MONTH])?;
    let month = col(raw::INTERVIEW_MONTH).cast(DataType::Int64);
    Ok(df
        .lazy()
        .filter(month.clone().gt_eq(lit(min_month)).and(month.lt_eq(lit(max_month))))
        .collect()?)
}

/// treatment_group = 1 when `sector_col` equals `treated_value`.
pub fn derive_treatment_from_sector(
    df: DataFrame,
    sector_col: &str,
    treated_value: &str,
) -> Result<DataFrame> {
    require_columns(&df, &[sector_col])?;
    Ok(df
        .lazy()
        .with_columns([col(sector_col)
            .eq(lit(treated_value))
            .cast(DataType::Float64)
            .alias(obs::TREATMENT_GROUP)])
        .collect()?)
}

/// age_sq = age².
pub fn derive_age_sq(df: DataFrame) -> Result<DataFrame> {
    require_columns(&df, &[raw::AGE])?;
    let age = col(raw::AGE).cast(DataType::Float64);
    Ok(df
        .lazy()
        .with_columns([(age.clone() * age).alias(derived::AGE_SQ)])
        .collect()?)
}

/// One dummy column per distinct value of a string column.
///
/// Returns the augmented frame and the generated column names
/// (`{column}_{value}`, values sorted for a stable order).
pub fn category_dummies(df: DataFrame, column: &str) -> Result<(DataFrame, Vec<String>)> {
    require_columns(&df, &[column])?;
    let mut values: Vec<String> = df
        .column(column)?
        .str()?
        .unique()?
        .into_iter()
        .flatten()
        .map(|v| v.to_string())
        .collect();
    values.sort();

    let mut names = Vec::with_capacity(values.len());
    let mut exprs = Vec::with_capacity(values.len());
    for v in &values {
        let name = format!("{column}_{v}");
        exprs.push(
            col(column)
                .eq(lit(v.as_str()))
                .cast(DataType::Float64)
                .alias(name.as_str()),
        );
        names.push(name);
    }

    let out = df.lazy().with_columns(exprs).collect()?;
    Ok((out, names))
}

/// Per-unit first and last observed period, for stayer/switcher/entrant
/// classification and attrition checks.
pub fn attrition_spans(df: &DataFrame) -> Result<DataFrame> {
    require_columns(df, &[obs::UNIT_ID, obs::TIME_PERIOD])?;
    Ok(df
        .clone()
        .lazy()
        .group_by([col(obs::UNIT_ID)])
        .agg([
            col(obs::TIME_PERIOD).min().alias(derived::FIRST_PERIOD),
            col(obs::TIME_PERIOD).max().alias(derived::LAST_PERIOD),
        ])
        .sort([obs::UNIT_ID], Default::default())
        .collect()?)
}

/// Check that (unit_id, time_period) uniquely identifies a record.
pub fn check_unique_unit_period(df: &DataFrame) -> Result<()> {
    require_columns(df, &[obs::UNIT_ID, obs::TIME_PERIOD])?;
    let dupes = df
        .clone()
        .lazy()
        .group_by([col(obs::UNIT_ID), col(obs::TIME_PERIOD)])
        .agg([col(obs::UNIT_ID).count().alias("_n")])
        .filter(col("_n").gt(lit(1)))
        .collect()?;
    if dupes.height() > 0 {
        return Err(PanelError::InvalidData(format!(
            "{} (unit_id, time_period) pairs appear more than once",
            dupes.height()
        )));
    }
    Ok(())
}
