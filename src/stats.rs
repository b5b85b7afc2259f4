//! Small numeric routines shared by the estimator and diagnostics:
//! pivoted Cholesky on the Gram matrix, triangular solves, and the
//! chi-square upper tail used by the Wald test.

use ndarray::{Array1, Array2};

/// Relative pivot tolerance below which a Gram column is treated as
/// linearly dependent on the columns before it.
pub const PIVOT_TOL: f64 = 1e-10;

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Root-mean-squared prediction error of a gap series.
pub fn rmspe(gaps: &[f64]) -> f64 {
    if gaps.is_empty() {
        return f64::NAN;
    }
    (gaps.iter().map(|g| g * g).sum::<f64>() / gaps.len() as f64).sqrt()
}

/// Incremental Cholesky factorization of a Gram matrix that skips
/// linearly dependent columns instead of failing.
///
/// Returns the indices of the kept columns (in original order) and the
/// lower-triangular factor L of the kept submatrix, so that
/// `L Lᵀ = G[kept, kept]`.
pub fn cholesky_select(gram: &Array2<f64>, tol: f64) -> (Vec<usize>, Array2<f64>) {
    let n = gram.nrows();
    let mut kept: Vec<usize> = Vec::with_capacity(n);
    // Rows of L for kept columns, built incrementally.
    let mut rows: Vec<Vec<f64>> = Vec::with_capacity(n);

    for j in 0..n {
        let mut row = vec![0.0; kept.len()];
        for (ii, &i) in kept.iter().enumerate() {
            let mut s = gram[[j, i]];
            for m in 0..ii {
                s -= row[m] * rows[ii][m];
            }
            row[ii] = s / rows[ii][ii];
        }
        let mut d = gram[[j, j]];
        for &r in &row {
            d -= r * r;
        }
        if d > tol * gram[[j, j]].max(1.0) {
            row.push(d.sqrt());
            rows.push(row);
            kept.push(j);
        }
    }

    let k = kept.len();
    let mut l = Array2::zeros((k, k));
    for (i, row) in rows.iter().enumerate() {
        for (m, &v) in row.iter().enumerate() {
            l[[i, m]] = v;
        }
    }
    (kept, l)
}

/// Solve `L Lᵀ x = b` by forward then backward substitution.
pub fn cho_solve(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = l.nrows();
    let mut y = Array1::zeros(n);
    for i in 0..n {
        let mut s = b[i];
        for m in 0..i {
            s -= l[[i, m]] * y[m];
        }
        y[i] = s / l[[i, i]];
    }
    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        let mut s = y[i];
        for m in (i + 1)..n {
            s -= l[[m, i]] * x[m];
        }
        x[i] = s / l[[i, i]];
    }
    x
}

/// Inverse of `L Lᵀ`, solving column by column against the identity.
pub fn cho_inverse(l: &Array2<f64>) -> Array2<f64> {
    let n = l.nrows();
    let mut inv = Array2::zeros((n, n));
    for j in 0..n {
        let mut e = Array1::zeros(n);
        e[j] = 1.0;
        let x = cho_solve(l, &e);
        inv.column_mut(j).assign(&x);
    }
    inv
}

/// Upper-tail probability of the chi-square distribution with `df`
/// degrees of freedom, via the regularized incomplete gamma function.
pub fn chi_square_sf(x: f64, df: usize) -> f64 {
    if x <= 0.0 {
        return 1.0;
    }
    1.0 - gamma_p(df as f64 / 2.0, x / 2.0)
}

/// Regularized lower incomplete gamma P(a, x).
fn gamma_p(a: f64, x: f64) -> f64 {
    if x < a + 1.0 {
        gamma_p_series(a, x)
    } else {
        1.0 - gamma_q_cf(a, x)
    }
}

/// Series representation, converges fast for x < a + 1.
fn gamma_p_series(a: f64, x: f64) -> f64 {
    let mut ap = a;
    let mut sum = 1.0 / a;
    let mut del = sum;
    for _ in 0..500 {
        ap += 1.0;
        del *= x / ap;
        sum += del;
        if del.abs() < sum.abs() * 1e-14 {
            break;
        }
    }
    sum * (-x + a * x.ln() - ln_gamma(a)).exp()
}

/// Continued-fraction representation of Q(a, x) for x >= a + 1
/// (modified Lentz).
fn gamma_q_cf(a: f64, x: f64) -> f64 {
    const TINY: f64 = 1e-300;
    let mut b = x + 1.0 - a;
    let mut c = 1.0 / TINY;
    let mut d = 1.0 / b;
    let mut h = d;
    for i in 1..500 {
        let an = -(i as f64) * (i as f64 - a);
        b += 2.0;
        d = an * d + b;
        if d.abs() < TINY {
            d = TINY;
        }
        c = b + an / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        let del = d * c;
        h *= del;
        if (del - 1.0).abs() < 1e-14 {
            break;
        }
    }
    (-x + a * x.ln() - ln_gamma(a)).exp() * h
}

/// Lanczos approximation of ln Γ(x), x > 0.
fn ln_gamma(x: f64) -> f64 {
    const COEF: [f64; 6] = [
        76.180_091_729_471_46,
        -86.505_320_329_416_77,
        24.014_098_240_830_91,
        -1.231_739_572_450_155,
        0.120_865_097_386_617_7e-2,
        -0.539_523_938_495_3e-5,
    ];
    let mut y = x;
    let tmp = x + 5.5;
    let tmp = tmp - (x + 0.5) * tmp.ln();
    let mut ser = 1.000_000_000_190_015;
    for c in COEF {
        y += 1.0;
        ser += c / y;
    }
    -tmp + (2.506_628_274_631_000_5 * ser / x).ln()
}
