//! Maximum likelihood for logit, probit and Poisson models
//!
//! Newton-Raphson on the observed information with step halving. The
//! iteration log (log likelihood per step) is returned for display.

use super::linear::{sandwich, sweep_inverse, wald_f, weighted_cross};
use super::special::{self, chi2_upper, ln_gamma};
use super::{BackendError, FitOutput, FitRequest, ModelKind, StatBackend, Vce};
use crate::signals::CancelToken;
use ndarray::{Array1, Axis};

const MAX_ITER: usize = 300;
const TOLERANCE: f64 = 1e-9;

fn normal_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / (2.0 * std::f64::consts::PI).sqrt()
}

/// Per-row log likelihood, score weight and curvature weight at index `xb`
pub(super) fn contribution(kind: ModelKind, y: f64, xb: f64) -> (f64, f64, f64) {
    match kind {
        ModelKind::Probit => {
            let cdf = special::normal_cdf(xb).clamp(1e-300, 1.0);
            let upper = special::normal_cdf(-xb).clamp(1e-300, 1.0);
            let pdf = normal_pdf(xb);
            if y > 0.0 {
                let lambda = pdf / cdf;
                (cdf.ln(), lambda, lambda * (lambda + xb))
            } else {
                let lambda = -pdf / upper;
                (upper.ln(), lambda, lambda * (lambda + xb))
            }
        }
        ModelKind::Poisson => {
            let mu = xb.exp();
            (y * xb - mu - ln_gamma(y + 1.0), y - mu, mu)
        }
        _ => {
            let p = 1.0 / (1.0 + (-xb).exp());
            // log(1 + e^xb) without overflow
            let log1pexp = if xb > 30.0 { xb } else { xb.exp().ln_1p() };
            (y * xb - log1pexp, y - p, p * (1.0 - p))
        }
    }
}

fn log_likelihood(kind: ModelKind, y: &Array1<f64>, xb: &Array1<f64>, w: &Array1<f64>) -> f64 {
    y.iter()
        .zip(xb)
        .zip(w)
        .map(|((&yi, &xbi), &wi)| wi * contribution(kind, yi, xbi).0)
        .sum()
}

/// Log likelihood of the constant-only model
fn null_log_likelihood(kind: ModelKind, y: &Array1<f64>, w: &Array1<f64>) -> f64 {
    let mean = (y * w).sum() / w.sum();
    let xb = match kind {
        ModelKind::Poisson => mean.ln(),
        ModelKind::Probit => special::normal_quantile(mean),
        _ => (mean / (1.0 - mean)).ln(),
    };
    log_likelihood(kind, y, &Array1::from_elem(y.len(), xb), w)
}

pub struct GlmBackend;

impl GlmBackend {
    pub(super) fn check_response(kind: ModelKind, y: &Array1<f64>) -> Result<Array1<f64>, BackendError> {
        match kind {
            ModelKind::Poisson => {
                if y.iter().any(|&v| v < 0.0) {
                    return Err(BackendError::Invalid("dependent variable must be nonnegative".into()));
                }
                Ok(y.clone())
            }
            _ => {
                // any nonzero outcome is a positive outcome
                let y = y.mapv(|v| if v != 0.0 { 1.0 } else { 0.0 });
                let positives = y.sum();
                if positives == 0.0 || positives == y.len() as f64 {
                    return Err(BackendError::Invalid("outcome does not vary".into()));
                }
                Ok(y)
            }
        }
    }
}

impl StatBackend for GlmBackend {
    fn fit(&self, request: &FitRequest, cancel: &CancelToken) -> Result<FitOutput, BackendError> {
        let kind = request.kind;
        let x = &request.x;
        let y = Self::check_response(kind, &request.y)?;
        let w = request.row_weights();
        let n = request.effective_nobs();
        let constant = request.has_constant();
        let k = x.ncols();

        let mut beta = Array1::<f64>::zeros(k);
        if constant && kind == ModelKind::Poisson {
            beta[k - 1] = ((&y * &w).sum() / w.sum()).max(1e-10).ln();
        }

        let mut ll = log_likelihood(kind, &y, &x.dot(&beta), &w);
        let mut iterations = vec![ll];
        let mut converged = false;
        let max_iter = request.iteration_limit(MAX_ITER)?;

        for _ in 0..max_iter {
            if cancel.is_cancelled() {
                return Err(BackendError::Interrupted);
            }
            let xb = x.dot(&beta);
            let mut score_w = Array1::<f64>::zeros(y.len());
            let mut curve_w = Array1::<f64>::zeros(y.len());
            for i in 0..y.len() {
                let (_, s, c) = contribution(kind, y[i], xb[i]);
                score_w[i] = w[i] * s;
                curve_w[i] = w[i] * c;
            }
            let gradient = x.t().dot(&score_w);
            let information = weighted_cross(x, &curve_w);
            let step = sweep_inverse(&information).0.dot(&gradient);

            // halve the step until the likelihood improves
            let mut scale = 1.0;
            let mut candidate = &beta + &step;
            let mut next = log_likelihood(kind, &y, &x.dot(&candidate), &w);
            while !(next >= ll - 1e-12) && scale > 1e-8 {
                scale /= 2.0;
                candidate = &beta + &(&step * scale);
                next = log_likelihood(kind, &y, &x.dot(&candidate), &w);
            }
            beta = candidate;
            let change = (next - ll).abs();
            ll = next;
            iterations.push(ll);
            let max_step = step.iter().fold(0.0f64, |m, s| m.max((s * scale).abs()));
            if max_step < TOLERANCE || change < 1e-12 * (1.0 + ll.abs()) {
                converged = true;
                break;
            }
        }
        if !converged || beta.iter().any(|b| !b.is_finite()) {
            return Err(BackendError::Convergence(max_iter));
        }

        // recompute curvature at the optimum
        let xb = x.dot(&beta);
        let mut score_w = Array1::<f64>::zeros(y.len());
        let mut curve_w = Array1::<f64>::zeros(y.len());
        for i in 0..y.len() {
            let (_, s, c) = contribution(kind, y[i], xb[i]);
            score_w[i] = w[i] * s;
            curve_w[i] = w[i] * c;
        }
        let (inverse, omitted) = sweep_inverse(&weighted_cross(x, &curve_w));

        let vce = request.vce();
        let covariance = match vce {
            Vce::Classical => inverse,
            _ => {
                let scores = x * &score_w.insert_axis(Axis(1));
                let scale = match vce {
                    Vce::Cluster(_) => 1.0,
                    _ => n / (n - 1.0),
                };
                sandwich(&inverse, &scores, &vce, scale).0
            }
        };

        let df_m = omitted.iter().filter(|o| !**o).count() as f64 - if constant { 1.0 } else { 0.0 };
        let mut fit = vec![("ll".to_string(), ll)];
        if constant {
            let ll_0 = null_log_likelihood(kind, &y, &w);
            fit.push(("ll_0".to_string(), ll_0));
            let chi2 = match vce {
                Vce::Classical => 2.0 * (ll - ll_0),
                _ => wald_f(&beta, &covariance, &omitted, constant, 1.0),
            };
            fit.push(("df_m".to_string(), df_m));
            fit.push(("chi2".to_string(), chi2));
            if df_m > 0.0 {
                fit.push(("p".to_string(), chi2_upper(chi2, df_m)));
            }
            if ll_0 != 0.0 {
                fit.push(("r2_p".to_string(), 1.0 - ll / ll_0));
            }
        }

        let title = match kind {
            ModelKind::Probit => "Probit regression",
            ModelKind::Poisson => "Poisson regression",
            _ => "Logistic regression",
        };
        Ok(FitOutput {
            coefficients: beta,
            covariance,
            omitted,
            nobs: n.round() as usize,
            df_resid: None,
            fit,
            title: title.to_string(),
            iterations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Options;
    use ndarray::{array, Array2};

    fn request(kind: ModelKind, y: Array1<f64>, xs: &[f64]) -> FitRequest {
        let n = xs.len();
        FitRequest {
            kind,
            depvar: "y".into(),
            names: vec!["x".into(), "_cons".into()],
            y,
            x: Array2::from_shape_fn((n, 2), |(i, j)| if j == 0 { xs[i] } else { 1.0 }),
            weights: None,
            vce: Vce::Classical,
            groups: None,
            time: None,
            options: Options::default(),
        }
    }

    #[test]
    fn logit_with_single_binary_regressor_matches_log_odds() {
        // x=0: 1 of 4 positive, x=1: 3 of 4 positive
        let y = array![1.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 0.0];
        let xs = [0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0];
        let out = GlmBackend.fit(&request(ModelKind::Logit, y, &xs), &CancelToken::new()).unwrap();
        let cons = (1.0f64 / 3.0).ln();
        assert!((out.coefficients[1] - cons).abs() < 1e-6);
        assert!((out.coefficients[0] - 2.0 * 3f64.ln()).abs() < 1e-6);
        assert!(out.iterations.len() > 1);
        assert_eq!(out.df_resid, None);
    }

    #[test]
    fn poisson_recovers_group_means() {
        let y = array![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let xs = [0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let out = GlmBackend.fit(&request(ModelKind::Poisson, y, &xs), &CancelToken::new()).unwrap();
        assert!((out.coefficients[1] - 2f64.ln()).abs() < 1e-6);
        assert!((out.coefficients[0] - (5f64 / 2.0).ln()).abs() < 1e-6);
    }

    #[test]
    fn probit_runs_and_reports_pseudo_r2() {
        let y = array![0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0];
        let xs = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let out = GlmBackend.fit(&request(ModelKind::Probit, y, &xs), &CancelToken::new()).unwrap();
        assert!(out.coefficients[0] > 0.0);
        let r2p = out.fit.iter().find(|(n, _)| n == "r2_p").unwrap().1;
        assert!(r2p > 0.0 && r2p < 1.0);
    }

    #[test]
    fn constant_outcome_is_rejected() {
        let y = array![1.0, 1.0, 1.0];
        let err = GlmBackend.fit(&request(ModelKind::Logit, y, &[1.0, 2.0, 3.0]), &CancelToken::new());
        assert!(matches!(err, Err(BackendError::Invalid(_))));
    }
}
