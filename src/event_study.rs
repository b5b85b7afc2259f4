//! Event-study and DiD aggregation.
//!
//! Runs the fixed-effects estimator with a full set of event-time
//! dummies and exposes a typed per-period result table, delta-method
//! pooled averages, and joint tests. Also the plain DiD runner and a
//! batch runner that isolates per-specification failures.

use polars::prelude::DataFrame;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::{CollinearityPolicy, RunSpec, SpecFilter};
use crate::error::{PanelError, Result};
use crate::estimator::{self, Estimate, FitResult, WaldTest};
use crate::event_time::{add_did_columns, add_event_dummies, dummy_name, EventWindow};
use crate::schema::{derived, obs};

/// Declarative event-study specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventStudySpec {
    pub label: String,
    /// First treated period; event time 0.
    pub onset: i64,
    pub window: EventWindow,
    #[serde(default)]
    pub covariates: Vec<String>,
    pub absorb: Vec<String>,
    pub cluster: String,
    #[serde(default)]
    pub filters: Vec<SpecFilter>,
    #[serde(default)]
    pub collinearity: CollinearityPolicy,
}

impl EventStudySpec {
    /// Unit and time effects absorbed, clustered on the schema's cluster
    /// column.
    pub fn new(label: impl Into<String>, onset: i64, window: EventWindow) -> Self {
        Self {
            label: label.into(),
            onset,
            window,
            covariates: Vec::new(),
            absorb: vec![obs::UNIT_ID.to_string(), obs::TIME_PERIOD.to_string()],
            cluster: obs::CLUSTER_ID.to_string(),
            filters: Vec::new(),
            collinearity: CollinearityPolicy::default(),
        }
    }
}

/// One event-time row of the result table. The reference row is pinned
/// to coefficient 0, standard error 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventTimeEstimate {
    pub event_time: i64,
    pub coefficient: f64,
    pub std_error: f64,
}

impl EventTimeEstimate {
    pub fn estimate(&self) -> Estimate {
        Estimate {
            coefficient: self.coefficient,
            std_error: self.std_error,
        }
    }
}

/// Event-study output: the per-period coefficient path plus the full fit
/// for covariance-aware aggregation.
#[derive(Debug, Clone)]
pub struct EventStudyResult {
    rows: Vec<EventTimeEstimate>,
    window: EventWindow,
    pub fit: FitResult,
}

impl EventStudyResult {
    /// Per-event-time estimates in ascending event-time order, reference
    /// included at exactly 0 / 0.
    pub fn rows(&self) -> &[EventTimeEstimate] {
        &self.rows
    }

    pub fn window(&self) -> EventWindow {
        self.window
    }

    pub fn estimate(&self, event_time: i64) -> Option<Estimate> {
        self.rows
            .iter()
            .find(|r| r.event_time == event_time)
            .map(|r| r.estimate())
    }

    /// Equal-weighted mean of the coefficients at the given event times,
    /// with a delta-method standard error off the full covariance matrix.
    /// The reference contributes a zero coefficient with zero covariance.
    pub fn pooled_mean(&self, times: &[i64]) -> Result<Estimate> {
        if times.is_empty() {
            return Err(PanelError::Configuration(
                "pooled mean requires at least one event time".into(),
            ));
        }
        let names: Vec<String> = times
            .iter()
            .filter(|&&k| k != self.window.reference)
            .map(|&k| dummy_name(k))
            .collect();
        let refs: Vec<&str> = names.iter().map(|s| s.as_str()).collect();

        // Denominator counts every requested time, reference included.
        let k = times.len() as f64;
        if refs.is_empty() {
            return Ok(Estimate {
                coefficient: 0.0,
                std_error: 0.0,
            });
        }
        let sum: f64 = refs
            .iter()
            .map(|&n| {
                self.fit.coefficient(n).ok_or_else(|| {
                    PanelError::Configuration(format!("event-time dummy '{n}' not in fitted model"))
                })
            })
            .sum::<Result<f64>>()?;
        let sub = self.fit.sub_vcov(&refs)?;
        let var = sub.sum() / (k * k);
        Ok(Estimate {
            coefficient: sum / k,
            std_error: var.max(0.0).sqrt(),
        })
    }

    /// Mean of the pre-treatment coefficients (reference excluded).
    pub fn pre_period_mean(&self) -> Result<Estimate> {
        self.pooled_mean(&self.window.pre_times())
    }

    /// Mean of the post-treatment coefficients.
    pub fn post_period_mean(&self) -> Result<Estimate> {
        self.pooled_mean(&self.window.post_times())
    }

    /// Wald joint test that the coefficients at the given event times are
    /// all zero.
    pub fn joint_test(&self, times: &[i64]) -> Result<WaldTest> {
        let names: Vec<String> = times
            .iter()
            .filter(|&&k| k != self.window.reference)
            .map(|&k| dummy_name(k))
            .collect();
        let refs: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
        self.fit.wald_test(&refs)
    }

    /// Joint significance of all pre-treatment coefficients - the
    /// pre-trend test.
    pub fn pre_trend_test(&self) -> Result<WaldTest> {
        self.joint_test(&self.window.pre_times())
    }
}

/// Run the full event-study regression for a specification.
pub fn run(df: &DataFrame, spec: &EventStudySpec) -> Result<EventStudyResult> {
    let (augmented, dummies) = add_event_dummies(df.clone(), &spec.window, spec.onset)?;

    let run_spec = RunSpec {
        label: spec.label.clone(),
        outcome: obs::OUTCOME.to_string(),
        regressors: dummies.iter().map(|(_, name)| name.clone()).collect(),
        covariates: spec.covariates.clone(),
        absorb: spec.absorb.clone(),
        cluster: spec.cluster.clone(),
        filters: spec.filters.clone(),
        collinearity: spec.collinearity,
    };
    let fit = estimator::fit(&augmented, &run_spec)?;

    let mut rows = Vec::with_capacity(spec.window.all_times().len());
    for k in spec.window.all_times() {
        if k == spec.window.reference {
            // Reference normalization: identically zero, no uncertainty.
            rows.push(EventTimeEstimate {
                event_time: k,
                coefficient: 0.0,
                std_error: 0.0,
            });
        } else if let Some(est) = fit.estimate(&dummy_name(k)) {
            rows.push(EventTimeEstimate {
                event_time: k,
                coefficient: est.coefficient,
                std_error: est.std_error,
            });
        }
        // Dummies dropped as collinear in permissive mode simply have no
        // row; their names are on `fit.dropped`.
    }

    Ok(EventStudyResult {
        rows,
        window: spec.window,
        fit,
    })
}

// ── DiD ─────────────────────────────────────────────────────────────────────

/// One row of the DiD summary table.
#[derive(Debug, Clone)]
pub struct DidRow {
    pub label: String,
    pub estimate: Estimate,
    pub n_obs: usize,
    pub r_squared: f64,
}

/// Run a single difference-in-differences specification: derives the
/// `post` and `treated × post` columns at `onset`, then fits the spec.
pub fn run_did(df: &DataFrame, onset: i64, spec: &RunSpec) -> Result<DidRow> {
    let augmented = add_did_columns(df.clone(), onset)?;
    let fit = estimator::fit(&augmented, spec)?;
    let estimate = fit
        .estimate(derived::TREATED_POST)
        .or_else(|| spec.regressors.first().and_then(|r| fit.estimate(r)))
        .ok_or_else(|| {
            PanelError::Configuration(format!(
                "spec '{}' does not estimate a treatment coefficient",
                spec.label
            ))
        })?;
    Ok(DidRow {
        label: spec.label.clone(),
        estimate,
        n_obs: fit.n_obs,
        r_squared: fit.r_squared,
    })
}

/// A specification that failed inside a batch, with its identifying label.
#[derive(Debug)]
pub struct SpecFailure {
    pub label: String,
    pub error: PanelError,
}

/// Outcome of a batch of independent specifications.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub rows: Vec<DidRow>,
    pub failures: Vec<SpecFailure>,
}

/// Run a batch of DiD specifications in parallel over the shared,
/// immutable dataset.
///
/// A failed specification is logged with its label and excluded from the
/// summary; siblings are unaffected.
pub fn run_batch(df: &DataFrame, onset: i64, specs: &[RunSpec]) -> BatchOutcome {
    let results: Vec<(String, Result<DidRow>)> = specs
        .par_iter()
        .map(|spec| (spec.label.clone(), run_did(df, onset, spec)))
        .collect();

    let mut outcome = BatchOutcome::default();
    for (label, result) in results {
        match result {
            Ok(row) => outcome.rows.push(row),
            Err(error) => {
                warn!(spec = %label, %error, "specification failed; excluded from batch");
                outcome.failures.push(SpecFailure { label, error });
            }
        }
    }
    outcome
}
