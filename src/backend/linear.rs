//! Ordinary least squares

use super::{special, BackendError, FitOutput, FitRequest, StatBackend, Vce};
use crate::command::WeightKind;
use crate::signals::CancelToken;
use ndarray::{Array1, Array2, Axis};
use std::collections::BTreeMap;

/// Relative pivot below which a column counts as collinear
const COLLINEAR_TOL: f64 = 1e-10;

/// Invert a symmetric positive semi-definite matrix by sweeping pivots in
/// order. Columns whose pivot collapses are skipped and reported as
/// omitted; their rows and columns of the result are zero.
pub fn sweep_inverse(a: &Array2<f64>) -> (Array2<f64>, Vec<bool>) {
    let p = a.nrows();
    let mut m = a.clone();
    let mut omitted = vec![false; p];
    for k in 0..p {
        let d = m[[k, k]];
        if !(d.abs() > COLLINEAR_TOL * a[[k, k]].abs()) || d.abs() < f64::MIN_POSITIVE {
            omitted[k] = true;
            continue;
        }
        for j in 0..p {
            m[[k, j]] /= d;
        }
        for i in 0..p {
            if i == k {
                continue;
            }
            let b = m[[i, k]];
            for j in 0..p {
                m[[i, j]] -= b * m[[k, j]];
            }
            m[[i, k]] = -b / d;
        }
        m[[k, k]] = 1.0 / d;
    }
    for k in (0..p).filter(|&k| omitted[k]) {
        m.row_mut(k).fill(0.0);
        m.column_mut(k).fill(0.0);
    }
    (m, omitted)
}

/// `X' diag(w) X`
pub(super) fn weighted_cross(x: &Array2<f64>, w: &Array1<f64>) -> Array2<f64> {
    let wx = x * &w.view().insert_axis(Axis(1));
    x.t().dot(&wx)
}

/// Sandwich `B M B` from per-row score vectors, summed within clusters
pub(super) fn sandwich(
    bread: &Array2<f64>,
    scores: &Array2<f64>,
    vce: &Vce,
    scale: f64,
) -> (Array2<f64>, Option<f64>) {
    let k = scores.ncols();
    let (meat, clusters) = match vce {
        Vce::Cluster(ids) => {
            let mut sums: BTreeMap<usize, Array1<f64>> = BTreeMap::new();
            for (row, id) in scores.rows().into_iter().zip(ids) {
                *sums.entry(*id).or_insert_with(|| Array1::zeros(k)) += &row;
            }
            let mut meat = Array2::<f64>::zeros((k, k));
            for u in sums.values() {
                let col = u.view().insert_axis(Axis(1));
                meat += &col.dot(&col.t());
            }
            (meat, Some(sums.len() as f64))
        }
        _ => (scores.t().dot(scores), None),
    };
    let v = bread.dot(&meat).dot(bread);
    let factor = match clusters {
        Some(g) if g > 1.0 => scale * g / (g - 1.0),
        _ => scale,
    };
    (v * factor, clusters)
}

pub struct OlsBackend;

impl StatBackend for OlsBackend {
    fn fit(&self, request: &FitRequest, cancel: &CancelToken) -> Result<FitOutput, BackendError> {
        let x = &request.x;
        let y = &request.y;
        let w = request.row_weights();
        let n = request.effective_nobs();
        let constant = request.has_constant();

        let xtx = weighted_cross(x, &w);
        let (inverse, omitted) = sweep_inverse(&xtx);
        let k = omitted.iter().filter(|o| !**o).count() as f64;
        if n <= k {
            return Err(BackendError::InsufficientObservations);
        }
        if cancel.is_cancelled() {
            return Err(BackendError::Interrupted);
        }

        let xty = x.t().dot(&(y * &w));
        let beta = inverse.dot(&xty);
        let residuals = y - &x.dot(&beta);
        let rss = (&residuals * &residuals * &w).sum();
        let mean = if constant { (y * &w).sum() / w.sum() } else { 0.0 };
        let tss = y.iter().zip(&w).map(|(v, wi)| wi * (v - mean).powi(2)).sum::<f64>();
        let mss = tss - rss;

        let df_m = if constant { k - 1.0 } else { k };
        let sigma2 = rss / (n - k);

        let vce = request.vce();
        let (covariance, df_r) = match &vce {
            Vce::Classical => (&inverse * sigma2, n - k),
            _ => {
                // frequency weights replicate rows, so each row counts w times
                let score_w = match &request.weights {
                    Some((WeightKind::Frequency, _)) => &residuals * &w.mapv(f64::sqrt),
                    _ => &residuals * &w,
                };
                let scores = x * &score_w.insert_axis(Axis(1));
                match vce {
                    Vce::Cluster(_) => {
                        let (v, clusters) = sandwich(&inverse, &scores, &vce, (n - 1.0) / (n - k));
                        (v, clusters.map_or(n - k, |g| g - 1.0))
                    }
                    _ => (sandwich(&inverse, &scores, &vce, n / (n - k)).0, n - k),
                }
            }
        };

        let r2 = if tss > 0.0 { mss / tss } else { 0.0 };
        let mut fit = vec![("df_m".to_string(), df_m), ("df_r".to_string(), df_r)];
        if df_m > 0.0 {
            let f = match vce {
                Vce::Classical => (mss / df_m) / sigma2,
                _ => wald_f(&beta, &covariance, &omitted, constant, df_m),
            };
            if f.is_finite() {
                fit.push(("F".to_string(), f));
                fit.push(("p".to_string(), special::f_upper(f, df_m, df_r)));
            }
        }
        fit.push(("r2".to_string(), r2));
        if constant {
            fit.push(("r2_a".to_string(), 1.0 - (1.0 - r2) * (n - 1.0) / (n - k)));
        }
        fit.push(("rmse".to_string(), sigma2.sqrt()));
        fit.push(("mss".to_string(), mss));
        fit.push(("rss".to_string(), rss));
        fit.push(("ll".to_string(), -0.5 * n * (1.0 + (2.0 * std::f64::consts::PI).ln() + (rss / n).ln())));

        Ok(FitOutput {
            coefficients: beta,
            covariance,
            omitted,
            nobs: n.round() as usize,
            df_resid: Some(df_r),
            fit,
            title: "Linear regression".to_string(),
            iterations: Vec::new(),
        })
    }
}

/// Joint test that all slopes are zero: `b' V^-1 b / q`
pub(super) fn wald_f(
    beta: &Array1<f64>,
    covariance: &Array2<f64>,
    omitted: &[bool],
    constant: bool,
    q: f64,
) -> f64 {
    let last = if constant { beta.len().saturating_sub(1) } else { beta.len() };
    let keep: Vec<usize> = (0..last).filter(|&i| !omitted[i]).collect();
    let b = Array1::from_iter(keep.iter().map(|&i| beta[i]));
    let v = Array2::from_shape_fn((keep.len(), keep.len()), |(i, j)| covariance[[keep[i], keep[j]]]);
    let (vinv, _) = sweep_inverse(&v);
    b.dot(&vinv.dot(&b)) / q
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ModelKind;
    use crate::command::Options;
    use ndarray::array;

    fn request(y: Array1<f64>, xs: &[f64]) -> FitRequest {
        let n = xs.len();
        let x = Array2::from_shape_fn((n, 2), |(i, j)| if j == 0 { xs[i] } else { 1.0 });
        FitRequest {
            kind: ModelKind::Ols,
            depvar: "y".into(),
            names: vec!["x".into(), "_cons".into()],
            y,
            x,
            weights: None,
            vce: Vce::Classical,
            groups: None,
            time: None,
            options: Options::default(),
        }
    }

    fn stat(out: &FitOutput, name: &str) -> f64 {
        out.fit.iter().find(|(n, _)| n == name).map(|(_, v)| *v).unwrap()
    }

    #[test]
    fn sweep_inverts_and_flags_collinear_columns() {
        let a = array![[4.0, 2.0], [2.0, 3.0]];
        let (inv, omitted) = sweep_inverse(&a);
        assert_eq!(omitted, vec![false, false]);
        let id = a.dot(&inv);
        assert!((id[[0, 0]] - 1.0).abs() < 1e-12 && id[[0, 1]].abs() < 1e-12);

        let singular = array![[1.0, 2.0], [2.0, 4.0]];
        let (_, omitted) = sweep_inverse(&singular);
        assert_eq!(omitted, vec![false, true]);
    }

    #[test]
    fn simple_regression() {
        // y = 1 + 2x + e
        let y = array![3.1, 4.9, 7.2, 8.8, 11.1];
        let out = OlsBackend.fit(&request(y, &[1.0, 2.0, 3.0, 4.0, 5.0]), &CancelToken::new()).unwrap();
        assert!((out.coefficients[0] - 1.99).abs() < 1e-9);
        assert!((out.coefficients[1] - 1.05).abs() < 1e-9);
        assert_eq!(out.df_resid, Some(3.0));
        assert_eq!(out.nobs, 5);
        assert!(stat(&out, "r2") > 0.99);
        let se = out.covariance[[0, 0]].sqrt();
        // sigma^2 = rss / 3 with rss = 0.107, sxx = 10
        assert!((se - (0.107f64 / 3.0 / 10.0).sqrt()).abs() < 1e-9);
    }

    #[test]
    fn robust_errors_differ_but_keep_coefficients() {
        let y = array![1.0, 3.0, 2.0, 5.0, 4.0, 9.0];
        let xs = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let classical = OlsBackend.fit(&request(y.clone(), &xs), &CancelToken::new()).unwrap();
        let mut r = request(y, &xs);
        r.vce = Vce::Robust;
        let robust = OlsBackend.fit(&r, &CancelToken::new()).unwrap();
        assert_eq!(classical.coefficients, robust.coefficients);
        assert_ne!(classical.covariance, robust.covariance);
    }

    #[test]
    fn cluster_errors_use_cluster_count() {
        let y = array![1.0, 3.0, 2.0, 5.0, 4.0, 9.0];
        let mut r = request(y, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        r.vce = Vce::Cluster(vec![0, 0, 1, 1, 2, 2]);
        let out = OlsBackend.fit(&r, &CancelToken::new()).unwrap();
        assert_eq!(out.df_resid, Some(2.0));
    }

    #[test]
    fn too_few_observations() {
        let r = request(array![1.0, 2.0], &[1.0, 2.0]);
        assert_eq!(
            OlsBackend.fit(&r, &CancelToken::new()).unwrap_err(),
            BackendError::InsufficientObservations
        );
    }
}
