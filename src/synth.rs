//! Synthetic-control construction and placebo diagnostics.
//!
//! A synthetic counterfactual for one treated unit is a linear
//! combination of donor series, with weights fixed from the pre-treatment
//! window and frozen for all periods. The weighting schemes are
//! interchangeable strategies over one interface, mirroring the
//! declarative style of the rest of the crate.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{PanelError, Result};
use crate::stats;

/// Floor applied to donor-to-treated pre-mean distances before inversion.
/// An exact-match donor gets the largest finite weight instead of a
/// division by zero.
pub const MIN_DISTANCE: f64 = 1e-9;

/// Donor weighting strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightScheme {
    /// Equal-weighted average of all donor series.
    SimpleAverage,
    /// Treated pre-period mean plus equal-weighted donor deviations from
    /// their own pre-period means.
    MeanMatched,
    /// Weights proportional to 1 / |donor pre-mean - treated pre-mean|,
    /// distances floored at [`MIN_DISTANCE`].
    InverseDistance,
}

/// One donor unit's outcome series, aligned to the input's period axis.
#[derive(Debug, Clone)]
pub struct DonorSeries {
    pub label: String,
    pub values: Vec<f64>,
}

impl DonorSeries {
    pub fn new(label: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            label: label.into(),
            values,
        }
    }
}

/// Aligned input: one treated series and a donor pool over the same
/// periods, with the first treated period marked.
#[derive(Debug, Clone)]
pub struct SynthInput {
    pub periods: Vec<i64>,
    pub treated: Vec<f64>,
    pub donors: Vec<DonorSeries>,
    /// First post-treatment period.
    pub treatment_period: i64,
}

impl SynthInput {
    pub fn validate(&self) -> Result<()> {
        if self.treated.len() != self.periods.len() {
            return Err(PanelError::InvalidData(format!(
                "treated series has {} values for {} periods",
                self.treated.len(),
                self.periods.len()
            )));
        }
        for donor in &self.donors {
            if donor.values.len() != self.periods.len() {
                return Err(PanelError::InvalidData(format!(
                    "donor '{}' has {} values for {} periods",
                    donor.label,
                    donor.values.len(),
                    self.periods.len()
                )));
            }
        }
        if self.donors.is_empty() {
            return Err(PanelError::Configuration(
                "synthetic control needs at least one donor".into(),
            ));
        }
        if self.pre_indices().is_empty() {
            return Err(PanelError::Configuration(
                "no pre-treatment periods before the treatment period".into(),
            ));
        }
        if self.post_indices().is_empty() {
            return Err(PanelError::Configuration(
                "no post-treatment periods at or after the treatment period".into(),
            ));
        }
        Ok(())
    }

    fn pre_indices(&self) -> Vec<usize> {
        (0..self.periods.len())
            .filter(|&i| self.periods[i] < self.treatment_period)
            .collect()
    }

    fn post_indices(&self) -> Vec<usize> {
        (0..self.periods.len())
            .filter(|&i| self.periods[i] >= self.treatment_period)
            .collect()
    }
}

/// Synthetic-control series with its gap and fit diagnostics.
#[derive(Debug, Clone)]
pub struct SynthResult {
    pub periods: Vec<i64>,
    pub actual: Vec<f64>,
    pub synthetic: Vec<f64>,
    /// Per-period `actual - synthetic`.
    pub gap: Vec<f64>,
    pub pre_rmspe: f64,
    pub post_rmspe: f64,
}

impl SynthResult {
    /// Post/pre RMSPE ratio, the effect-size diagnostic. A zero
    /// pre-period RMSPE is a typed error, never a propagated infinity.
    pub fn rmspe_ratio(&self) -> Result<f64> {
        if self.pre_rmspe <= 0.0 {
            return Err(PanelError::Numeric(
                "pre-period RMSPE is zero; the post/pre ratio is undefined".into(),
            ));
        }
        Ok(self.post_rmspe / self.pre_rmspe)
    }
}

fn pre_mean(values: &[f64], pre: &[usize]) -> f64 {
    pre.iter().map(|&i| values[i]).sum::<f64>() / pre.len() as f64
}

/// Construct the synthetic counterfactual under the given scheme.
/// Weights are computed from the pre-treatment window only and applied
/// to every period.
pub fn construct(input: &SynthInput, scheme: WeightScheme) -> Result<SynthResult> {
    input.validate()?;
    let n = input.periods.len();
    let pre = input.pre_indices();
    let post = input.post_indices();
    let k = input.donors.len();

    let synthetic: Vec<f64> = match scheme {
        WeightScheme::SimpleAverage => (0..n)
            .map(|t| input.donors.iter().map(|d| d.values[t]).sum::<f64>() / k as f64)
            .collect(),
        WeightScheme::MeanMatched => {
            let treated_level = pre_mean(&input.treated, &pre);
            let donor_levels: Vec<f64> = input
                .donors
                .iter()
                .map(|d| pre_mean(&d.values, &pre))
                .collect();
            (0..n)
                .map(|t| {
                    let deviation: f64 = input
                        .donors
                        .iter()
                        .zip(&donor_levels)
                        .map(|(d, level)| d.values[t] - level)
                        .sum::<f64>()
                        / k as f64;
                    treated_level + deviation
                })
                .collect()
        }
        WeightScheme::InverseDistance => {
            let treated_level = pre_mean(&input.treated, &pre);
            let mut weights: Vec<f64> = input
                .donors
                .iter()
                .map(|d| {
                    let distance = (pre_mean(&d.values, &pre) - treated_level).abs();
                    1.0 / distance.max(MIN_DISTANCE)
                })
                .collect();
            let total: f64 = weights.iter().sum();
            for w in &mut weights {
                *w /= total;
            }
            (0..n)
                .map(|t| {
                    input
                        .donors
                        .iter()
                        .zip(&weights)
                        .map(|(d, w)| w * d.values[t])
                        .sum()
                })
                .collect()
        }
    };

    let gap: Vec<f64> = (0..n).map(|t| input.treated[t] - synthetic[t]).collect();
    let pre_gaps: Vec<f64> = pre.iter().map(|&i| gap[i]).collect();
    let post_gaps: Vec<f64> = post.iter().map(|&i| gap[i]).collect();

    Ok(SynthResult {
        periods: input.periods.clone(),
        actual: input.treated.clone(),
        synthetic,
        gap,
        pre_rmspe: stats::rmspe(&pre_gaps),
        post_rmspe: stats::rmspe(&post_gaps),
    })
}

// ── Placebo distribution ────────────────────────────────────────────────────

/// RMSPE diagnostics for one unit in the placebo exercise.
#[derive(Debug, Clone)]
pub struct PlaceboRow {
    pub label: String,
    pub pre_rmspe: f64,
    pub post_rmspe: f64,
    pub ratio: f64,
}

/// Placebo distribution and the rank-based p-value for the treated unit.
#[derive(Debug, Clone)]
pub struct PlaceboResult {
    pub actual: PlaceboRow,
    pub placebos: Vec<PlaceboRow>,
    /// `(1 + count(placebo_ratio >= actual_ratio)) / (1 + K)`.
    pub p_value: f64,
}

/// Leave-one-out placebo exercise: each donor in turn plays the treated
/// unit against the remaining donors. A donor whose construction fails
/// (for example a degenerate pre-period fit) is logged and excluded; the
/// exercise continues with its siblings.
pub fn placebo_distribution(
    input: &SynthInput,
    scheme: WeightScheme,
    treated_label: &str,
) -> Result<PlaceboResult> {
    input.validate()?;
    if input.donors.len() < 2 {
        return Err(PanelError::Configuration(
            "placebo exercise needs at least two donors".into(),
        ));
    }

    let actual_result = construct(input, scheme)?;
    let actual_ratio = actual_result.rmspe_ratio()?;
    let actual = PlaceboRow {
        label: treated_label.to_string(),
        pre_rmspe: actual_result.pre_rmspe,
        post_rmspe: actual_result.post_rmspe,
        ratio: actual_ratio,
    };

    let attempts: Vec<(String, Result<PlaceboRow>)> = (0..input.donors.len())
        .into_par_iter()
        .map(|j| {
            let label = input.donors[j].label.clone();
            let row = run_single_placebo(input, scheme, j);
            (label, row)
        })
        .collect();

    let mut placebos = Vec::with_capacity(attempts.len());
    for (label, attempt) in attempts {
        match attempt {
            Ok(row) => placebos.push(row),
            Err(error) => {
                warn!(donor = %label, %error, "placebo donor failed; excluded");
            }
        }
    }
    if placebos.is_empty() {
        return Err(PanelError::InvalidData(
            "every placebo donor failed; no reference distribution".into(),
        ));
    }

    let exceeding = placebos.iter().filter(|p| p.ratio >= actual.ratio).count();
    let p_value = (1 + exceeding) as f64 / (1 + placebos.len()) as f64;

    Ok(PlaceboResult {
        actual,
        placebos,
        p_value,
    })
}

fn run_single_placebo(input: &SynthInput, scheme: WeightScheme, j: usize) -> Result<PlaceboRow> {
    let donors: Vec<DonorSeries> = input
        .donors
        .iter()
        .enumerate()
        .filter(|&(i, _)| i != j)
        .map(|(_, d)| d.clone())
        .collect();
    let placebo_input = SynthInput {
        periods: input.periods.clone(),
        treated: input.donors[j].values.clone(),
        donors,
        treatment_period: input.treatment_period,
    };
    let result = construct(&placebo_input, scheme)?;
    Ok(PlaceboRow {
        label: input.donors[j].label.clone(),
        pre_rmspe: result.pre_rmspe,
        post_rmspe: result.post_rmspe,
        ratio: result.rmspe_ratio()?,
    })
}
