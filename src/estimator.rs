//! Fixed-effects estimator.
//!
//! Fits `outcome ~ design columns` absorbing one or two categorical
//! dimensions by alternating demeaning, then computes one-way
//! cluster-robust standard errors. Point estimates match OLS on the
//! fully-expanded dummy matrix up to floating tolerance; that invariant
//! is exercised in the tests.

use std::collections::HashMap;

use ndarray::{Array1, Array2};
use polars::prelude::*;
use tracing::{debug, warn};

use crate::config::{CollinearityPolicy, RunSpec};
use crate::error::{DataQualityReport, PanelError, Result};
use crate::stats;

/// Convergence tolerance for the alternating-demeaning sweep: the sweep
/// stops once every remaining group mean is below this in absolute value.
const DEMEAN_TOL: f64 = 1e-10;
const DEMEAN_MAX_SWEEPS: usize = 1000;

/// Point estimate with its cluster-robust standard error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub coefficient: f64,
    pub std_error: f64,
}

impl Estimate {
    /// Large-sample 95% confidence interval: coef ± 1.96 × SE.
    pub fn ci(&self) -> (f64, f64) {
        (
            self.coefficient - 1.96 * self.std_error,
            self.coefficient + 1.96 * self.std_error,
        )
    }
}

/// Wald joint test of a coefficient subset against zero.
#[derive(Debug, Clone, Copy)]
pub struct WaldTest {
    pub statistic: f64,
    pub df: usize,
    pub p_value: f64,
}

/// Immutable result of one regression run.
#[derive(Debug, Clone)]
pub struct FitResult {
    names: Vec<String>,
    coef: Array1<f64>,
    vcov: Array2<f64>,
    /// Design columns dropped as collinear (permissive mode only).
    pub dropped: Vec<String>,
    pub n_obs: usize,
    pub n_clusters: usize,
    pub r_squared: f64,
    pub df_resid: usize,
    pub quality: DataQualityReport,
}

impl FitResult {
    /// Kept design-column names, in estimation order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn coefficient(&self, name: &str) -> Option<f64> {
        self.index_of(name).map(|i| self.coef[i])
    }

    pub fn estimate(&self, name: &str) -> Option<Estimate> {
        self.index_of(name).map(|i| Estimate {
            coefficient: self.coef[i],
            std_error: self.vcov[[i, i]].sqrt(),
        })
    }

    /// Variance-covariance submatrix for the named coefficients, in the
    /// given order.
    pub fn sub_vcov(&self, names: &[&str]) -> Result<Array2<f64>> {
        let idx = self.indices(names)?;
        let k = idx.len();
        let mut out = Array2::zeros((k, k));
        for (a, &i) in idx.iter().enumerate() {
            for (b, &j) in idx.iter().enumerate() {
                out[[a, b]] = self.vcov[[i, j]];
            }
        }
        Ok(out)
    }

    /// Equal-weighted mean of the named coefficients with a delta-method
    /// standard error off the full covariance matrix:
    /// Var(mean) = (1/k²) · 1ᵀ Σ 1.
    pub fn pooled_mean(&self, names: &[&str]) -> Result<Estimate> {
        if names.is_empty() {
            return Err(PanelError::Configuration(
                "pooled mean requires at least one coefficient".into(),
            ));
        }
        let idx = self.indices(names)?;
        let k = idx.len() as f64;
        let coefficient = idx.iter().map(|&i| self.coef[i]).sum::<f64>() / k;
        let mut var = 0.0;
        for &i in &idx {
            for &j in &idx {
                var += self.vcov[[i, j]];
            }
        }
        var /= k * k;
        Ok(Estimate {
            coefficient,
            std_error: var.max(0.0).sqrt(),
        })
    }

    /// Wald chi-square test that the named coefficients are jointly zero.
    pub fn wald_test(&self, names: &[&str]) -> Result<WaldTest> {
        if names.is_empty() {
            return Err(PanelError::Configuration(
                "joint test requires at least one coefficient".into(),
            ));
        }
        let idx = self.indices(names)?;
        let sub = self.sub_vcov(names)?;
        let (kept, l) = stats::cholesky_select(&sub, stats::PIVOT_TOL);
        if kept.len() != idx.len() {
            return Err(PanelError::Numeric(
                "coefficient covariance submatrix is singular".into(),
            ));
        }
        let b = Array1::from_iter(idx.iter().map(|&i| self.coef[i]));
        let solved = stats::cho_solve(&l, &b);
        let statistic = b.dot(&solved);
        let df = idx.len();
        Ok(WaldTest {
            statistic,
            df,
            p_value: stats::chi_square_sf(statistic, df),
        })
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    fn indices(&self, names: &[&str]) -> Result<Vec<usize>> {
        names
            .iter()
            .map(|&n| {
                self.index_of(n).ok_or_else(|| {
                    PanelError::Configuration(format!("coefficient '{n}' not in fitted model"))
                })
            })
            .collect()
    }
}

/// Fit a specification against an observation table.
///
/// Pure function of the inputs: applies the spec's sample restrictions,
/// drops rows with missing values (counted), drops singleton absorbed
/// groups (counted, warned), demeans, solves, and clusters.
pub fn fit(df: &DataFrame, spec: &RunSpec) -> Result<FitResult> {
    spec.validate()?;
    let df = spec.restrict(df)?;
    let design_names = spec.design_columns();

    let extracted = extract(&df, spec, &design_names)?;
    fit_extracted(extracted, spec, &design_names)
}

// ── Columnar extraction ─────────────────────────────────────────────────────

struct Extracted {
    y: Vec<f64>,
    /// Row-major design values, one Vec per column.
    x: Vec<Vec<f64>>,
    /// Per absorbed dimension: compact group index per row, group count.
    groups: Vec<(Vec<usize>, usize)>,
    cluster: Vec<usize>,
    n_clusters: usize,
    quality: DataQualityReport,
}

fn float_column(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let column = df
        .column(name)
        .map_err(|_| PanelError::MissingColumn(name.to_string()))?;
    let casted = column
        .cast(&DataType::Float64)
        .map_err(|_| PanelError::InvalidData(format!("column '{name}' is not numeric")))?;
    Ok(casted.f64()?.into_iter().collect())
}

fn key_column(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let column = df
        .column(name)
        .map_err(|_| PanelError::MissingColumn(name.to_string()))?;
    Ok(column
        .as_materialized_series()
        .rechunk()
        .iter()
        .map(|v| match v {
            AnyValue::Null => None,
            other => Some(format!("{other}")),
        })
        .collect())
}

fn extract(df: &DataFrame, spec: &RunSpec, design_names: &[String]) -> Result<Extracted> {
    let n = df.height();
    let outcome = float_column(df, &spec.outcome)?;
    let design: Vec<Vec<Option<f64>>> = design_names
        .iter()
        .map(|name| float_column(df, name))
        .collect::<Result<_>>()?;
    let absorb: Vec<Vec<Option<String>>> = spec
        .absorb
        .iter()
        .map(|name| key_column(df, name))
        .collect::<Result<_>>()?;
    let cluster_keys = key_column(df, &spec.cluster)?;

    // Rows with any missing used value are dropped and counted.
    let mut alive: Vec<bool> = (0..n)
        .map(|i| {
            outcome[i].is_some()
                && design.iter().all(|c| c[i].is_some())
                && absorb.iter().all(|c| c[i].is_some())
                && cluster_keys[i].is_some()
        })
        .collect();
    let missing_dropped = alive.iter().filter(|a| !**a).count();
    if missing_dropped > 0 {
        warn!(missing_dropped, "dropped rows with missing values");
    }

    // Singleton absorbed groups carry no identifying variation; drop them.
    // Dropping in one dimension can create singletons in the other, so
    // sweep until stable.
    let mut singletons_dropped = 0usize;
    loop {
        let mut removed = 0usize;
        for dim in &absorb {
            let mut counts: HashMap<&str, usize> = HashMap::new();
            for i in 0..n {
                if alive[i] {
                    *counts.entry(dim[i].as_deref().unwrap()).or_default() += 1;
                }
            }
            for i in 0..n {
                if alive[i] && counts[dim[i].as_deref().unwrap()] == 1 {
                    alive[i] = false;
                    removed += 1;
                }
            }
        }
        if removed == 0 {
            break;
        }
        singletons_dropped += removed;
    }
    if singletons_dropped > 0 {
        warn!(
            singletons_dropped,
            "dropped singleton fixed-effect groups"
        );
    }

    let rows: Vec<usize> = (0..n).filter(|&i| alive[i]).collect();
    if rows.is_empty() {
        return Err(PanelError::InvalidData(
            "no observations remain after dropping missing values and singletons".into(),
        ));
    }

    let y: Vec<f64> = rows.iter().map(|&i| outcome[i].unwrap()).collect();
    let x: Vec<Vec<f64>> = design
        .iter()
        .map(|c| rows.iter().map(|&i| c[i].unwrap()).collect())
        .collect();

    let mut groups = Vec::with_capacity(absorb.len());
    for dim in &absorb {
        let mut index: HashMap<&str, usize> = HashMap::new();
        let mut ids = Vec::with_capacity(rows.len());
        for &i in &rows {
            let next = index.len();
            let id = *index.entry(dim[i].as_deref().unwrap()).or_insert(next);
            ids.push(id);
        }
        let count = index.len();
        groups.push((ids, count));
    }

    let mut cluster_index: HashMap<&str, usize> = HashMap::new();
    let mut cluster = Vec::with_capacity(rows.len());
    for &i in &rows {
        let next = cluster_index.len();
        let id = *cluster_index
            .entry(cluster_keys[i].as_deref().unwrap())
            .or_insert(next);
        cluster.push(id);
    }
    let n_clusters = cluster_index.len();

    Ok(Extracted {
        y,
        x,
        groups,
        cluster,
        n_clusters,
        quality: DataQualityReport {
            missing_dropped,
            singletons_dropped,
        },
    })
}

// ── Within transformation ───────────────────────────────────────────────────

/// Subtract group means from every column of `data`. Returns the largest
/// absolute group mean removed.
fn demean_pass(data: &mut Array2<f64>, groups: &[usize], n_groups: usize) -> f64 {
    let k = data.ncols();
    let mut sums = vec![0.0; n_groups * k];
    let mut counts = vec![0usize; n_groups];
    for (row, &g) in groups.iter().enumerate() {
        counts[g] += 1;
        for c in 0..k {
            sums[g * k + c] += data[[row, c]];
        }
    }
    let mut max_mean = 0.0f64;
    for g in 0..n_groups {
        for c in 0..k {
            sums[g * k + c] /= counts[g] as f64;
            max_mean = max_mean.max(sums[g * k + c].abs());
        }
    }
    for (row, &g) in groups.iter().enumerate() {
        for c in 0..k {
            data[[row, c]] -= sums[g * k + c];
        }
    }
    max_mean
}

/// Alternate demeaning over the absorbed dimensions until convergence.
/// One dimension converges in a single pass.
fn within_transform(data: &mut Array2<f64>, groups: &[(Vec<usize>, usize)]) {
    if groups.len() == 1 {
        demean_pass(data, &groups[0].0, groups[0].1);
        return;
    }
    for sweep in 0..DEMEAN_MAX_SWEEPS {
        let mut max_mean = 0.0f64;
        for (ids, count) in groups {
            max_mean = max_mean.max(demean_pass(data, ids, *count));
        }
        if max_mean < DEMEAN_TOL {
            debug!(sweeps = sweep + 1, "within transformation converged");
            return;
        }
    }
    debug!(
        sweeps = DEMEAN_MAX_SWEEPS,
        "within transformation hit the sweep cap"
    );
}

// ── Estimation ──────────────────────────────────────────────────────────────

fn fit_extracted(ex: Extracted, spec: &RunSpec, design_names: &[String]) -> Result<FitResult> {
    let n = ex.y.len();
    let k_all = ex.x.len();

    if ex.n_clusters < 2 {
        return Err(PanelError::Inference(format!(
            "clustering variable '{}' has {} group(s); at least 2 are required",
            spec.cluster, ex.n_clusters
        )));
    }

    // Stack y and X into one matrix so a single sweep demeans everything.
    let mut data = Array2::zeros((n, k_all + 1));
    for (row, &v) in ex.y.iter().enumerate() {
        data[[row, 0]] = v;
    }
    for (c, column) in ex.x.iter().enumerate() {
        for (row, &v) in column.iter().enumerate() {
            data[[row, c + 1]] = v;
        }
    }
    within_transform(&mut data, &ex.groups);

    let yd = data.column(0).to_owned();
    let xd = data.slice(ndarray::s![.., 1..]).to_owned();

    let gram = xd.t().dot(&xd);
    let (kept, l) = stats::cholesky_select(&gram, stats::PIVOT_TOL);
    let dropped: Vec<String> = (0..k_all)
        .filter(|i| !kept.contains(i))
        .map(|i| design_names[i].clone())
        .collect();

    if !dropped.is_empty() {
        match spec.collinearity {
            CollinearityPolicy::Strict => {
                return Err(PanelError::RankDeficiency { columns: dropped });
            }
            CollinearityPolicy::Permissive => {
                warn!(spec = %spec.label, columns = ?dropped, "dropped collinear columns");
            }
        }
    }
    if kept.is_empty() {
        return Err(PanelError::RankDeficiency {
            columns: design_names.to_vec(),
        });
    }

    let xk = xd.select(ndarray::Axis(1), &kept);
    let rhs = xk.t().dot(&yd);
    let coef = stats::cho_solve(&l, &rhs);
    let fitted = xk.dot(&coef);
    let resid = &yd - &fitted;

    // Absorbed parameters: one intercept is shared between dimensions.
    let absorbed: usize =
        ex.groups.iter().map(|(_, c)| c).sum::<usize>() - (ex.groups.len() - 1);
    let k_total = kept.len() + absorbed;
    if n <= k_total {
        return Err(PanelError::Inference(format!(
            "no residual degrees of freedom: {n} observations, {k_total} parameters"
        )));
    }

    // One-way cluster-robust variance with the CR1 small-sample factor.
    let g = ex.n_clusters as f64;
    let nn = n as f64;
    let correction = g / (g - 1.0) * (nn - 1.0) / (nn - k_total as f64);

    let kk = kept.len();
    let mut scores = Array2::zeros((ex.n_clusters, kk));
    for row in 0..n {
        let u = resid[row];
        for c in 0..kk {
            scores[[ex.cluster[row], c]] += xk[[row, c]] * u;
        }
    }
    let meat = scores.t().dot(&scores);
    let bread = stats::cho_inverse(&l);
    let vcov = bread.dot(&meat).dot(&bread) * correction;

    let ssr: f64 = resid.iter().map(|u| u * u).sum();
    let y_mean = stats::mean(&ex.y);
    let tss: f64 = ex.y.iter().map(|v| (v - y_mean) * (v - y_mean)).sum();
    let r_squared = if tss > 0.0 { 1.0 - ssr / tss } else { 0.0 };

    let names: Vec<String> = kept.iter().map(|&i| design_names[i].clone()).collect();

    Ok(FitResult {
        names,
        coef,
        vcov,
        dropped,
        n_obs: n,
        n_clusters: ex.n_clusters,
        r_squared,
        df_resid: n - k_total,
        quality: ex.quality,
    })
}
