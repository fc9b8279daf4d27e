//! Statistical backends
//!
//! The dispatcher builds a `FitRequest` (response, design matrix, weights,
//! variance type) and hands it to the `StatBackend` registered for the
//! model kind. Linear regression, the binary/count GLMs and their
//! panel-data counterparts are built in; every other kind needs a
//! registered backend.

mod glm;
mod linear;
mod panel;
pub mod special;

pub use glm::GlmBackend;
pub use linear::{sweep_inverse, OlsBackend};
pub use panel::PanelGlmBackend;

use crate::command::{Options, WeightKind};
use crate::signals::CancelToken;
use ndarray::{Array1, Array2};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("no estimation backend available for {0}")]
    Unavailable(String),
    #[error("no observations")]
    NoObservations,
    #[error("insufficient observations")]
    InsufficientObservations,
    #[error("convergence not achieved after {0} iterations")]
    Convergence(usize),
    #[error("{0}")]
    Invalid(String),
    #[error("--Break--")]
    Interrupted,
}

/// Estimator family behind an estimation verb
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    Ols,
    Logit,
    Probit,
    Poisson,
    NegBinomial,
    Tobit,
    IntervalReg,
    Areg,
    Reghdfe,
    PanelRegression,
    PanelLogit,
    PanelProbit,
    PanelPoisson,
    /// Arellano-Bond and Blundell-Bond GMM
    DynamicPanel,
    Anova,
    Newey,
    Arima,
    Arch,
    Var,
    Vec,
    InstrumentalVariables,
}

impl ModelKind {
    pub fn from_verb(verb: &str) -> Option<ModelKind> {
        let kind = match verb {
            "regress" => ModelKind::Ols,
            "logit" | "logistic" => ModelKind::Logit,
            "probit" => ModelKind::Probit,
            "poisson" => ModelKind::Poisson,
            "nbreg" => ModelKind::NegBinomial,
            "tobit" => ModelKind::Tobit,
            "intreg" => ModelKind::IntervalReg,
            "areg" => ModelKind::Areg,
            "reghdfe" => ModelKind::Reghdfe,
            "xtreg" => ModelKind::PanelRegression,
            "xtlogit" => ModelKind::PanelLogit,
            "xtprobit" => ModelKind::PanelProbit,
            "xtpoisson" => ModelKind::PanelPoisson,
            "xtabond" | "xtdpdsys" => ModelKind::DynamicPanel,
            "anova" => ModelKind::Anova,
            "newey" => ModelKind::Newey,
            "arima" => ModelKind::Arima,
            "arch" => ModelKind::Arch,
            "var" => ModelKind::Var,
            "vec" => ModelKind::Vec,
            "ivregress" => ModelKind::InstrumentalVariables,
            _ => return None,
        };
        Some(kind)
    }

    pub fn name(self) -> &'static str {
        match self {
            ModelKind::Ols => "linear regression",
            ModelKind::Logit => "logistic regression",
            ModelKind::Probit => "probit regression",
            ModelKind::Poisson => "Poisson regression",
            ModelKind::NegBinomial => "negative binomial regression",
            ModelKind::Tobit => "tobit regression",
            ModelKind::IntervalReg => "interval regression",
            ModelKind::Areg => "linear regression, absorbing indicators",
            ModelKind::Reghdfe => "HDFE linear regression",
            ModelKind::PanelRegression => "panel-data regression",
            ModelKind::PanelLogit => "panel-data logistic regression",
            ModelKind::PanelProbit => "panel-data probit regression",
            ModelKind::PanelPoisson => "panel-data Poisson regression",
            ModelKind::DynamicPanel => "dynamic panel-data estimation",
            ModelKind::Anova => "analysis of variance",
            ModelKind::Newey => "regression with Newey-West standard errors",
            ModelKind::Arima => "ARIMA regression",
            ModelKind::Arch => "ARCH family regression",
            ModelKind::Var => "vector autoregression",
            ModelKind::Vec => "vector error-correction model",
            ModelKind::InstrumentalVariables => "instrumental-variables regression",
        }
    }

    /// Needs `xtset` panel metadata
    pub fn requires_panel(self) -> bool {
        matches!(
            self,
            ModelKind::PanelRegression
                | ModelKind::PanelLogit
                | ModelKind::PanelProbit
                | ModelKind::PanelPoisson
                | ModelKind::DynamicPanel
        )
    }

    /// Needs a time variable from `tsset`/`xtset`
    pub fn requires_time(self) -> bool {
        matches!(
            self,
            ModelKind::Newey
                | ModelKind::Arima
                | ModelKind::Arch
                | ModelKind::Var
                | ModelKind::Vec
                | ModelKind::DynamicPanel
        )
    }

    /// Pooled model behind a panel-data binary or count model
    pub fn family(self) -> Option<ModelKind> {
        match self {
            ModelKind::PanelLogit => Some(ModelKind::Logit),
            ModelKind::PanelProbit => Some(ModelKind::Probit),
            ModelKind::PanelPoisson => Some(ModelKind::Poisson),
            _ => None,
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Variance estimator
#[derive(Debug, Clone, PartialEq)]
pub enum Vce {
    Classical,
    /// HC1 sandwich
    Robust,
    /// Cluster ids, one per estimation row
    Cluster(Vec<usize>),
}

/// Everything a backend needs to fit one model
#[derive(Debug, Clone)]
pub struct FitRequest {
    pub kind: ModelKind,
    pub depvar: String,
    /// Column names of `x`; `_cons` last when there is a constant
    pub names: Vec<String>,
    pub y: Array1<f64>,
    pub x: Array2<f64>,
    pub weights: Option<(WeightKind, Array1<f64>)>,
    pub vce: Vce,
    /// Panel ids from `xtset` or group ids from `absorb()`
    pub groups: Option<Vec<usize>>,
    /// Time values from `tsset`/`xtset`
    pub time: Option<Array1<f64>>,
    /// The command's options, for backend-specific settings
    pub options: Options,
}

impl FitRequest {
    pub fn nobs(&self) -> usize {
        self.y.len()
    }

    pub fn has_constant(&self) -> bool {
        self.names.last().map_or(false, |n| n == "_cons")
    }

    /// Per-row weights with the normalization Stata applies: frequency and
    /// importance weights as given, analytic and probability weights
    /// rescaled to sum to the row count
    pub fn row_weights(&self) -> Array1<f64> {
        let n = self.nobs();
        match &self.weights {
            None => Array1::ones(n),
            Some((WeightKind::Frequency | WeightKind::Importance, w)) => w.clone(),
            Some((_, w)) => {
                let total = w.sum();
                if total > 0.0 {
                    w * (n as f64 / total)
                } else {
                    w.clone()
                }
            }
        }
    }

    /// Observation count: sum of frequency weights or the row count
    pub fn effective_nobs(&self) -> f64 {
        match &self.weights {
            Some((WeightKind::Frequency, w)) => w.sum(),
            _ => self.nobs() as f64,
        }
    }

    /// Iteration cap from `iterate(#)`
    pub fn iteration_limit(&self, default: usize) -> Result<usize, BackendError> {
        match self.options.number("iterate") {
            Some(Ok(n)) if n >= 0.0 => Ok(n as usize),
            Some(_) => Err(BackendError::Invalid("iterate() must be a nonnegative integer".into())),
            None => Ok(default),
        }
    }

    /// Probability weights imply a robust variance
    pub fn vce(&self) -> Vce {
        match (&self.vce, &self.weights) {
            (Vce::Classical, Some((WeightKind::Probability, _))) => Vce::Robust,
            (vce, _) => vce.clone(),
        }
    }
}

/// Raw estimates returned by a backend
#[derive(Debug, Clone, PartialEq)]
pub struct FitOutput {
    pub coefficients: Array1<f64>,
    pub covariance: Array2<f64>,
    /// Columns dropped for collinearity
    pub omitted: Vec<bool>,
    pub nobs: usize,
    /// `None` for large-sample (z) inference
    pub df_resid: Option<f64>,
    pub fit: Vec<(String, f64)>,
    pub title: String,
    /// Log likelihood at each iteration, for iterative estimators
    pub iterations: Vec<f64>,
}

/// A fitting routine for one or more model kinds
pub trait StatBackend: Send {
    fn fit(&self, request: &FitRequest, cancel: &CancelToken) -> Result<FitOutput, BackendError>;
}

/// Model kind -> backend
pub struct BackendRegistry {
    backends: HashMap<ModelKind, Box<dyn StatBackend>>,
}

impl BackendRegistry {
    /// Registry without any backends
    pub fn empty() -> Self {
        BackendRegistry { backends: HashMap::new() }
    }

    /// Registry with the built-in estimators
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(ModelKind::Ols, Box::new(OlsBackend));
        for kind in [ModelKind::Logit, ModelKind::Probit, ModelKind::Poisson] {
            registry.register(kind, Box::new(GlmBackend));
        }
        for kind in [ModelKind::PanelLogit, ModelKind::PanelProbit, ModelKind::PanelPoisson] {
            registry.register(kind, Box::new(PanelGlmBackend));
        }
        registry
    }

    /// Install or replace the backend for `kind`
    pub fn register(&mut self, kind: ModelKind, backend: Box<dyn StatBackend>) {
        self.backends.insert(kind, backend);
    }

    pub fn has(&self, kind: ModelKind) -> bool {
        self.backends.contains_key(&kind)
    }

    pub fn fit(&self, request: &FitRequest, cancel: &CancelToken) -> Result<FitOutput, BackendError> {
        let backend = self
            .backends
            .get(&request.kind)
            .ok_or_else(|| BackendError::Unavailable(request.kind.name().to_string()))?;
        if request.nobs() == 0 {
            return Err(BackendError::NoObservations);
        }
        tracing::debug!(kind = ?request.kind, nobs = request.nobs(), k = request.names.len(), "fitting model");
        backend.fit(request, cancel)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn request(kind: ModelKind) -> FitRequest {
        FitRequest {
            kind,
            depvar: "y".into(),
            names: vec!["x".into(), "_cons".into()],
            y: array![1.0, 2.0, 3.0],
            x: array![[1.0, 1.0], [2.0, 1.0], [3.0, 1.0]],
            weights: None,
            vce: Vce::Classical,
            groups: None,
            time: None,
            options: Options::default(),
        }
    }

    #[test]
    fn unregistered_kind_is_unavailable() {
        let registry = BackendRegistry::with_builtins();
        let err = registry.fit(&request(ModelKind::Tobit), &CancelToken::new()).unwrap_err();
        assert!(matches!(err, BackendError::Unavailable(_)));
        let err = registry.fit(&request(ModelKind::DynamicPanel), &CancelToken::new()).unwrap_err();
        assert!(matches!(err, BackendError::Unavailable(_)));
        assert!(registry.has(ModelKind::PanelLogit));
    }

    #[test]
    fn registered_backend_is_used() {
        struct Fixed;
        impl StatBackend for Fixed {
            fn fit(&self, r: &FitRequest, _: &CancelToken) -> Result<FitOutput, BackendError> {
                Ok(FitOutput {
                    coefficients: Array1::zeros(r.names.len()),
                    covariance: Array2::zeros((r.names.len(), r.names.len())),
                    omitted: vec![false; r.names.len()],
                    nobs: r.nobs(),
                    df_resid: None,
                    fit: Vec::new(),
                    title: "fixed".into(),
                    iterations: Vec::new(),
                })
            }
        }
        let mut registry = BackendRegistry::empty();
        registry.register(ModelKind::Tobit, Box::new(Fixed));
        let out = registry.fit(&request(ModelKind::Tobit), &CancelToken::new()).unwrap();
        assert_eq!(out.title, "fixed");
    }

    #[test]
    fn analytic_weights_are_normalized() {
        let mut r = request(ModelKind::Ols);
        r.weights = Some((WeightKind::Analytic, array![1.0, 1.0, 4.0]));
        assert_eq!(r.row_weights(), array![0.5, 0.5, 2.0]);
        assert_eq!(r.effective_nobs(), 3.0);
        r.weights = Some((WeightKind::Frequency, array![1.0, 1.0, 4.0]));
        assert_eq!(r.effective_nobs(), 6.0);
    }
}
