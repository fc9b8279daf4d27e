//! Panel-data logit, probit and Poisson models
//!
//! Random effects integrate a normal panel effect out by Gauss-Hermite
//! quadrature (logit, probit) or a gamma effect in closed form (Poisson).
//! Fixed effects maximize the likelihood conditional on each panel's
//! outcome total, which does not depend on the panel effects. Newton steps
//! use finite-difference derivatives of the summed panel log likelihoods.

use super::glm::{contribution, GlmBackend};
use super::linear::{sandwich, sweep_inverse, wald_f};
use super::special::{chi2_upper, gauss_hermite, ln_gamma};
use super::{BackendError, FitOutput, FitRequest, ModelKind, StatBackend, Vce};
use crate::signals::CancelToken;
use ndarray::{s, Array1, Array2};
use std::f64::consts::{PI, SQRT_2};

const MAX_ITER: usize = 300;
const DEFAULT_INTPOINTS: usize = 12;

/// How the panel effect leaves the likelihood
#[derive(Debug, Clone, PartialEq)]
enum Effects {
    /// Normal effect integrated over quadrature nodes `(node, ln weight)`
    Normal(Vec<(f64, f64)>),
    /// Gamma-distributed multiplicative effect
    Gamma,
    /// Conditioned away
    Fixed,
}

struct PanelModel {
    /// Pooled counterpart: logit, probit or Poisson
    family: ModelKind,
    effects: Effects,
    y: Array1<f64>,
    /// Identified columns only
    x: Array2<f64>,
    panels: Vec<Vec<usize>>,
}

impl PanelModel {
    /// Log likelihood of one panel; `theta` holds the coefficients and,
    /// for random effects, the log variance parameter last
    fn panel_ll(&self, theta: &Array1<f64>, rows: &[usize]) -> f64 {
        let k = self.x.ncols();
        let beta = theta.slice(s![..k]);
        let xb: Vec<f64> = rows.iter().map(|&r| self.x.row(r).dot(&beta)).collect();
        let y = |i: usize| self.y[rows[i]];
        match &self.effects {
            Effects::Normal(nodes) => {
                let sigma = (0.5 * theta[k]).exp();
                let terms: Vec<f64> = nodes
                    .iter()
                    .map(|&(node, ln_weight)| {
                        let u = SQRT_2 * sigma * node;
                        ln_weight
                            + xb.iter().enumerate().map(|(i, e)| contribution(self.family, y(i), e + u).0).sum::<f64>()
                    })
                    .collect();
                log_sum_exp(&terms)
            }
            Effects::Gamma => {
                let shape = (-theta[k]).exp();
                let total_y: f64 = (0..rows.len()).map(y).sum();
                let total_mu: f64 = xb.iter().map(|e| e.exp()).sum();
                let own: f64 = xb.iter().enumerate().map(|(i, e)| y(i) * e - ln_gamma(y(i) + 1.0)).sum();
                own + ln_gamma(shape + total_y) - ln_gamma(shape) + shape * shape.ln()
                    - (shape + total_y) * (shape + total_mu).ln()
            }
            Effects::Fixed if self.family == ModelKind::Poisson => {
                let lse = log_sum_exp(&xb);
                let total_y: f64 = (0..rows.len()).map(y).sum();
                let own: f64 = xb.iter().enumerate().map(|(i, e)| y(i) * (e - lse) - ln_gamma(y(i) + 1.0)).sum();
                own + ln_gamma(total_y + 1.0)
            }
            Effects::Fixed => {
                let outcomes: Vec<bool> = (0..rows.len()).map(|i| y(i) > 0.0).collect();
                conditional_logit(&outcomes, &xb)
            }
        }
    }

    fn log_likelihood(&self, theta: &Array1<f64>) -> f64 {
        self.panels.iter().map(|rows| self.panel_ll(theta, rows)).sum()
    }

    /// Per-panel score vectors, one row per panel
    fn scores(&self, theta: &Array1<f64>) -> Array2<f64> {
        let mut scores = Array2::zeros((self.panels.len(), theta.len()));
        for (g, rows) in self.panels.iter().enumerate() {
            scores.row_mut(g).assign(&gradient(&|t: &Array1<f64>| self.panel_ll(t, rows), theta));
        }
        scores
    }
}

fn log_sum_exp(terms: &[f64]) -> f64 {
    let top = terms.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !top.is_finite() {
        return top;
    }
    top + terms.iter().map(|t| (t - top).exp()).sum::<f64>().ln()
}

/// ln P(outcomes | number of positives) for linear indices `xb`
fn conditional_logit(outcomes: &[bool], xb: &[f64]) -> f64 {
    let positives = outcomes.iter().filter(|o| **o).count();
    let centre = xb.iter().sum::<f64>() / xb.len() as f64;
    // sums[j]: over j-subsets of the rows seen so far, exp of their index total
    let mut sums = vec![0.0; positives + 1];
    sums[0] = 1.0;
    for e in xb {
        let v = (e - centre).exp();
        for j in (1..=positives).rev() {
            sums[j] += sums[j - 1] * v;
        }
    }
    let chosen: f64 = outcomes.iter().zip(xb).filter(|(o, _)| **o).map(|(_, e)| e - centre).sum();
    chosen - sums[positives].ln()
}

fn spacing(t: f64, scale: f64) -> f64 {
    scale * (1.0 + t.abs())
}

fn gradient(ll: &impl Fn(&Array1<f64>) -> f64, theta: &Array1<f64>) -> Array1<f64> {
    Array1::from_shape_fn(theta.len(), |i| {
        let h = spacing(theta[i], 1e-6);
        let mut up = theta.clone();
        up[i] += h;
        let mut down = theta.clone();
        down[i] -= h;
        (ll(&up) - ll(&down)) / (2.0 * h)
    })
}

/// Negative Hessian by central differences
fn information(ll: &impl Fn(&Array1<f64>) -> f64, theta: &Array1<f64>) -> Array2<f64> {
    let p = theta.len();
    let h: Vec<f64> = theta.iter().map(|&t| spacing(t, 1e-4)).collect();
    let at = |shifts: &[(usize, f64)]| {
        let mut t = theta.clone();
        for &(i, d) in shifts {
            t[i] += d;
        }
        ll(&t)
    };
    let centre = ll(theta);
    let mut info = Array2::zeros((p, p));
    for i in 0..p {
        info[[i, i]] = -(at(&[(i, h[i])]) - 2.0 * centre + at(&[(i, -h[i])])) / (h[i] * h[i]);
        for j in 0..i {
            let v = -(at(&[(i, h[i]), (j, h[j])]) - at(&[(i, h[i]), (j, -h[j])]) - at(&[(i, -h[i]), (j, h[j])])
                + at(&[(i, -h[i]), (j, -h[j])]))
                / (4.0 * h[i] * h[j]);
            info[[i, j]] = v;
            info[[j, i]] = v;
        }
    }
    info
}

/// Newton-Raphson with step halving. Returns the information matrix at
/// the maximum, the maximizer and the log likelihood of every iteration.
fn maximize(
    ll: impl Fn(&Array1<f64>) -> f64,
    start: Array1<f64>,
    max_iter: usize,
    cancel: &CancelToken,
) -> Result<(Array2<f64>, Array1<f64>, Vec<f64>), BackendError> {
    let mut theta = start;
    let mut current = ll(&theta);
    if !current.is_finite() {
        return Err(BackendError::Invalid("initial values not feasible".into()));
    }
    let mut iterations = vec![current];
    let mut converged = false;
    for _ in 0..max_iter {
        if cancel.is_cancelled() {
            return Err(BackendError::Interrupted);
        }
        let g = gradient(&ll, &theta);
        let (inverse, _) = sweep_inverse(&information(&ll, &theta));
        let mut step = inverse.dot(&g);
        // outside the concave region climb the gradient instead
        if !(g.dot(&step) > 0.0) {
            step = g;
        }

        let mut scale = 1.0;
        let mut improved = None;
        while scale > 1e-10 {
            let candidate = &theta + &(&step * scale);
            let next = ll(&candidate);
            if next.is_finite() && next >= current - 1e-12 {
                improved = Some((candidate, next));
                break;
            }
            scale /= 2.0;
        }
        let Some((candidate, next)) = improved else {
            converged = true;
            break;
        };
        let moved = step.iter().fold(0.0f64, |m, s| m.max((s * scale).abs()));
        let change = next - current;
        theta = candidate;
        current = next;
        iterations.push(current);
        if moved < 1e-8 || change.abs() < 1e-11 * (1.0 + current.abs()) {
            converged = true;
            break;
        }
    }
    if !converged || theta.iter().any(|t| !t.is_finite()) {
        return Err(BackendError::Convergence(max_iter));
    }
    Ok((information(&ll, &theta), theta, iterations))
}

/// Rows of each panel from dense panel ids
fn panel_rows(groups: &[usize]) -> Vec<Vec<usize>> {
    let mut panels: Vec<Vec<usize>> = Vec::new();
    for (row, &g) in groups.iter().enumerate() {
        if g >= panels.len() {
            panels.resize(g + 1, Vec::new());
        }
        panels[g].push(row);
    }
    panels.retain(|rows| !rows.is_empty());
    panels
}

fn select_columns(x: &Array2<f64>, columns: &[usize]) -> Array2<f64> {
    Array2::from_shape_fn((x.nrows(), columns.len()), |(i, j)| x[[i, columns[j]]])
}

/// Columns of `x` that vary within at least one panel and are not
/// collinear after removing panel means
fn within_identified(x: &Array2<f64>, panels: &[Vec<usize>]) -> Vec<bool> {
    let k = x.ncols();
    let mut cross = Array2::<f64>::zeros((k, k));
    for rows in panels {
        let mut mean = Array1::<f64>::zeros(k);
        for &r in rows {
            mean += &x.row(r);
        }
        mean /= rows.len() as f64;
        for &r in rows {
            let d = Array1::from_shape_fn(k, |j| {
                let v = x[[r, j]] - mean[j];
                // constants averaged in floating point leave rounding dust
                if v.abs() <= 1e-12 * (1.0 + x[[r, j]].abs()) {
                    0.0
                } else {
                    v
                }
            });
            for i in 0..k {
                for j in 0..k {
                    cross[[i, j]] += d[i] * d[j];
                }
            }
        }
    }
    let (_, omitted) = sweep_inverse(&cross);
    omitted.into_iter().map(|o| !o).collect()
}

/// Built-in backend for `xtlogit`, `xtprobit` and `xtpoisson`: random
/// effects by default, conditional fixed effects with `fe`
pub struct PanelGlmBackend;

impl PanelGlmBackend {
    fn quadrature(request: &FitRequest) -> Result<Vec<(f64, f64)>, BackendError> {
        let points = match request.options.number("intpoints") {
            None => DEFAULT_INTPOINTS,
            Some(Ok(n)) if n.fract() == 0.0 && (1.0..=195.0).contains(&n) => n as usize,
            Some(_) => return Err(BackendError::Invalid("intpoints() must be an integer between 1 and 195".into())),
        };
        Ok(gauss_hermite(points).into_iter().map(|(node, w)| (node, (w / PI.sqrt()).ln())).collect())
    }
}

impl StatBackend for PanelGlmBackend {
    fn fit(&self, request: &FitRequest, cancel: &CancelToken) -> Result<FitOutput, BackendError> {
        let family = request
            .kind
            .family()
            .ok_or_else(|| BackendError::Unavailable(request.kind.name().to_string()))?;
        let groups = request
            .groups
            .as_ref()
            .ok_or_else(|| BackendError::Invalid("panel variable not set".into()))?;
        if request.weights.is_some() {
            return Err(BackendError::Invalid("weights not allowed with panel-data models".into()));
        }
        let fixed = request.options.has("fe");
        if fixed && request.options.has("re") {
            return Err(BackendError::Invalid("options fe and re may not be combined".into()));
        }
        if fixed && family == ModelKind::Probit {
            return Err(BackendError::Invalid("fixed-effects probit is not identified; option fe not allowed".into()));
        }
        let y = GlmBackend::check_response(family, &request.y)?;
        let max_iter = request.iteration_limit(MAX_ITER)?;
        let k = request.x.ncols();
        let mut panels = panel_rows(groups);

        let mut fit = Vec::new();
        let (effects, identified, start) = if fixed {
            // panels whose outcome cannot vary carry no information
            panels.retain(|rows| {
                let positives = rows.iter().filter(|&&r| y[r] > 0.0).count();
                match family {
                    ModelKind::Poisson => positives > 0,
                    _ => positives > 0 && positives < rows.len(),
                }
            });
            if panels.is_empty() {
                return Err(BackendError::Invalid("no panels with variation in the outcome".into()));
            }
            let identified = within_identified(&request.x, &panels);
            let free = identified.iter().filter(|f| **f).count();
            (Effects::Fixed, identified, Array1::zeros(free))
        } else {
            let pooled_request = FitRequest { kind: family, vce: Vce::Classical, ..request.clone() };
            let pooled = GlmBackend.fit(&pooled_request, cancel)?;
            if let Some((_, ll)) = pooled.fit.iter().find(|(n, _)| n == "ll") {
                fit.push(("ll_pooled".to_string(), *ll));
            }
            let identified: Vec<bool> = pooled.omitted.iter().map(|o| !o).collect();
            let start: Array1<f64> = (0..k)
                .filter(|&j| identified[j])
                .map(|j| pooled.coefficients[j])
                .chain([0.0])
                .collect();
            let effects = match family {
                ModelKind::Poisson => Effects::Gamma,
                _ => Effects::Normal(Self::quadrature(request)?),
            };
            (effects, identified, start)
        };

        let free: Vec<usize> = (0..k).filter(|&j| identified[j]).collect();
        let model = PanelModel { family, effects, y, x: select_columns(&request.x, &free), panels };
        tracing::debug!(?family, fixed, panels = model.panels.len(), "panel likelihood");
        let (info, theta, iterations) = maximize(|t| model.log_likelihood(t), start, max_iter, cancel)?;
        let ll = iterations.last().copied().unwrap_or(f64::NAN);
        let (inverse, dropped) = sweep_inverse(&info);

        let cluster_of_panel = match request.vce() {
            Vce::Classical => None,
            Vce::Robust => Some((0..model.panels.len()).collect::<Vec<_>>()),
            // panels nest within clusters
            Vce::Cluster(ids) => Some(model.panels.iter().map(|rows| ids[rows[0]]).collect()),
        };
        let theta_cov = match cluster_of_panel {
            None => inverse,
            Some(ids) => sandwich(&inverse, &model.scores(&theta), &Vce::Cluster(ids), 1.0).0,
        };

        let mut coefficients = Array1::zeros(k);
        let mut covariance = Array2::zeros((k, k));
        let mut omitted = vec![true; k];
        for (a, &j) in free.iter().enumerate() {
            coefficients[j] = theta[a];
            omitted[j] = dropped[a];
            for (b, &l) in free.iter().enumerate() {
                covariance[[j, l]] = theta_cov[[a, b]];
            }
        }

        let nobs: usize = model.panels.iter().map(Vec::len).sum();
        let constant = request.has_constant();
        let df_m = omitted.iter().filter(|o| !**o).count() as f64 - if constant { 1.0 } else { 0.0 };
        fit.push(("ll".to_string(), ll));
        fit.push(("N_g".to_string(), model.panels.len() as f64));
        fit.push(("df_m".to_string(), df_m));
        if df_m > 0.0 {
            let chi2 = wald_f(&coefficients, &covariance, &omitted, constant, 1.0);
            fit.push(("chi2".to_string(), chi2));
            fit.push(("p".to_string(), chi2_upper(chi2, df_m)));
        }
        let ancillary = theta.get(free.len()).copied();
        match (&model.effects, ancillary) {
            (Effects::Normal(_), Some(ln_var)) => {
                let var = ln_var.exp();
                let residual = if family == ModelKind::Probit { 1.0 } else { PI * PI / 3.0 };
                fit.push(("sigma_u".to_string(), var.sqrt()));
                fit.push(("rho".to_string(), var / (var + residual)));
            }
            (Effects::Gamma, Some(ln_alpha)) => fit.push(("alpha".to_string(), ln_alpha.exp())),
            _ => {}
        }
        // likelihood-ratio test against the pooled model
        if let Some(pooled) = fit.iter().find(|(n, _)| n == "ll_pooled").map(|(_, v)| *v) {
            fit.push(("chi2_c".to_string(), (2.0 * (ll - pooled)).max(0.0)));
        }

        let title = match (fixed, family) {
            (true, ModelKind::Poisson) => "Conditional fixed-effects Poisson regression",
            (true, _) => "Conditional fixed-effects logistic regression",
            (false, ModelKind::Poisson) => "Random-effects Poisson regression",
            (false, ModelKind::Probit) => "Random-effects probit regression",
            (false, _) => "Random-effects logistic regression",
        };
        Ok(FitOutput {
            coefficients,
            covariance,
            omitted,
            nobs,
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

    /// Two periods per panel, `x` switching from 0 to 1
    fn two_period(kind: ModelKind, outcomes: &[(f64, f64)], options: &[&str]) -> FitRequest {
        let n = outcomes.len() * 2;
        let mut opts = Options::default();
        for o in options {
            opts.insert(o, None);
        }
        FitRequest {
            kind,
            depvar: "y".into(),
            names: vec!["x".into()],
            y: outcomes.iter().flat_map(|(a, b)| [*a, *b]).collect(),
            x: Array2::from_shape_fn((n, 1), |(i, _)| (i % 2) as f64),
            weights: None,
            vce: Vce::Classical,
            groups: Some((0..n).map(|i| i / 2).collect()),
            time: None,
            options: opts,
        }
    }

    fn stat(out: &FitOutput, name: &str) -> f64 {
        out.fit.iter().find(|(n, _)| n == name).map(|(_, v)| *v).unwrap()
    }

    #[test]
    fn conditional_logit_uses_discordant_panels() {
        // two panels switch 0 -> 1, one switches 1 -> 0, two never change
        let outcomes = [(0.0, 1.0), (0.0, 1.0), (1.0, 0.0), (0.0, 0.0), (1.0, 1.0)];
        let request = two_period(ModelKind::PanelLogit, &outcomes, &["fe"]);
        let out = PanelGlmBackend.fit(&request, &CancelToken::new()).unwrap();
        assert!((out.coefficients[0] - 2f64.ln()).abs() < 1e-5, "{}", out.coefficients[0]);
        assert_eq!(out.nobs, 6);
        assert_eq!(stat(&out, "N_g"), 3.0);
        // the variance of ln(n01/n10) is 1/n01 + 1/n10
        assert!((out.covariance[[0, 0]] - 1.5).abs() < 1e-3, "{}", out.covariance[[0, 0]]);
    }

    #[test]
    fn conditional_poisson_compares_period_totals() {
        let outcomes = [(1.0, 2.0), (2.0, 4.0), (3.0, 3.0), (0.0, 0.0)];
        let request = two_period(ModelKind::PanelPoisson, &outcomes, &["fe"]);
        let out = PanelGlmBackend.fit(&request, &CancelToken::new()).unwrap();
        assert!((out.coefficients[0] - 1.5f64.ln()).abs() < 1e-5);
        assert_eq!(stat(&out, "N_g"), 3.0);
        assert_eq!(out.title, "Conditional fixed-effects Poisson regression");
    }

    #[test]
    fn time_invariant_regressor_is_omitted_under_fixed_effects() {
        let outcomes = [(0.0, 1.0), (1.0, 0.0), (0.0, 1.0)];
        let mut request = two_period(ModelKind::PanelLogit, &outcomes, &["fe"]);
        // second column constant within each panel
        request.names.push("z".into());
        request.x = Array2::from_shape_fn((6, 2), |(i, j)| if j == 0 { (i % 2) as f64 } else { (i / 2) as f64 * 0.1 });
        let out = PanelGlmBackend.fit(&request, &CancelToken::new()).unwrap();
        assert_eq!(out.omitted, vec![false, true]);
        assert_eq!(out.coefficients[1], 0.0);
    }

    #[test]
    fn random_effects_logit_improves_on_pooled() {
        let outcomes = [
            (0.0, 1.0),
            (1.0, 1.0),
            (1.0, 1.0),
            (0.0, 0.0),
            (0.0, 0.0),
            (0.0, 1.0),
            (1.0, 0.0),
            (1.0, 1.0),
        ];
        let mut request = two_period(ModelKind::PanelLogit, &outcomes, &[]);
        request.names.push("_cons".into());
        request.x = Array2::from_shape_fn((16, 2), |(i, j)| if j == 0 { (i % 2) as f64 } else { 1.0 });
        let out = PanelGlmBackend.fit(&request, &CancelToken::new()).unwrap();
        assert!(stat(&out, "ll") >= stat(&out, "ll_pooled") - 1e-6);
        let rho = stat(&out, "rho");
        assert!((0.0..1.0).contains(&rho));
        assert!(!out.iterations.is_empty());
        assert_eq!(out.nobs, 16);
    }

    #[test]
    fn fixed_effects_probit_is_rejected() {
        let request = two_period(ModelKind::PanelProbit, &[(0.0, 1.0), (1.0, 0.0)], &["fe"]);
        let err = PanelGlmBackend.fit(&request, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, BackendError::Invalid(_)));
    }

    #[test]
    fn conditional_denominator_counts_subsets() {
        // equal indices: P(any one of three rows positive) = 1/3
        let ll = conditional_logit(&[true, false, false], &[0.5, 0.5, 0.5]);
        assert!((ll - (1.0f64 / 3.0).ln()).abs() < 1e-12);
    }
}
