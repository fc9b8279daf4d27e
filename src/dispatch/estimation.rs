//! Estimation commands: build the design matrix and call the backend

use super::{expand_varlist, numeric_column, numeric_values_of, parse_exp, sorted_levels, Invocation};
use crate::backend::{special, FitOutput, FitRequest, ModelKind, Vce};
use crate::command::WeightKind;
use crate::dataset::Key;
use crate::display::{format_g, EstimationView, Output};
use crate::error::{rc, CommandError, ErrorKind};
use crate::eval::Evaluator;
use crate::results::{Coefficient, EstimationResult};
use crate::session::Session;
use ndarray::{Array1, Array2};
use std::collections::HashMap;

const DEFAULT_LEVEL: f64 = 95.0;

/// One right-hand-side term before expansion into columns
#[derive(Debug, Clone, PartialEq)]
enum Term {
    /// A numeric variable or time-series operated variable, with its values
    Column { name: String, values: Vec<Option<f64>> },
    /// `i.var`: one indicator per non-base level
    Factor { var: String, keys: Vec<Key> },
}

impl Term {
    fn usable(&self, row: usize) -> bool {
        match self {
            Term::Column { values, .. } => values[row].is_some(),
            Term::Factor { keys, .. } => !keys[row].is_missing(),
        }
    }
}

/// `(endog = instruments)` of `ivregress`
fn instrument_group(token: &str) -> Option<(Vec<String>, Vec<String>)> {
    let inner = token.strip_prefix('(')?.strip_suffix(')')?;
    let (endog, inst) = inner.split_once('=')?;
    let words = |s: &str| s.split_whitespace().map(String::from).collect::<Vec<_>>();
    Some((words(endog), words(inst)))
}

/// Map each row's key to a dense group id
fn group_ids(keys: &[Vec<Key>], rows: &[usize]) -> Vec<usize> {
    let mut ids: HashMap<&[Key], usize> = HashMap::new();
    rows.iter()
        .map(|&r| {
            let next = ids.len();
            *ids.entry(keys[r].as_slice()).or_insert(next)
        })
        .collect()
}

/// Column title when coefficients are reported exponentiated
fn eform_title(verb: &str, kind: ModelKind, inv: &Invocation) -> Option<String> {
    let title = match kind {
        ModelKind::Logit if verb == "logistic" || inv.has("or") => "Odds ratio",
        ModelKind::PanelLogit if inv.has("or") => "Odds ratio",
        ModelKind::Poisson | ModelKind::NegBinomial | ModelKind::PanelPoisson if inv.has("irr") => "IRR",
        _ if inv.has("eform") => "exp(b)",
        _ => return None,
    };
    Some(title.to_string())
}

/// Confidence level from `level(#)`
pub(super) fn confidence_level(inv: &Invocation) -> Result<f64, CommandError> {
    match inv.options().number("level") {
        None => Ok(DEFAULT_LEVEL),
        Some(Ok(level)) if (10.0..=99.99).contains(&level) => Ok(level),
        Some(Ok(level)) => Err(CommandError::parse(format!("level({}) must be between 10 and 99.99", level))
            .with_fragment(format!("level({})", level))),
        Some(Err(e)) => Err(e.into()),
    }
}

impl Session {
    fn term(&self, token: &str, all_rows: &[usize]) -> Result<Vec<Term>, CommandError> {
        if token.contains('#') {
            return Err(CommandError::parse(format!("{}: interactions not supported", token)).with_fragment(token));
        }
        if let Some(var) = token.strip_prefix("i.") {
            let vars = expand_varlist(&self.data, &[var.to_string()])?;
            return vars
                .into_iter()
                .map(|var| {
                    // factor variables must be numeric
                    numeric_column(&self.data, &var, &[])?;
                    let column = self.data.column(&var)?;
                    let keys = all_rows.iter().map(|&r| Key::from_value(column.get(r))).collect();
                    Ok(Term::Factor { var, keys })
                })
                .collect();
        }
        let token = token.strip_prefix("c.").unwrap_or(token);
        if token.contains('.') {
            // time-series operators: L.x, L2.x, D.x, F.x
            let expr = parse_exp(token)?;
            let values = numeric_values_of(&Evaluator::new(&self.data), &expr, token)?;
            return Ok(vec![Term::Column { name: token.to_string(), values }]);
        }
        expand_varlist(&self.data, &[token.to_string()])?
            .into_iter()
            .map(|name| {
                let values = numeric_column(&self.data, &name, all_rows)?;
                Ok(Term::Column { name, values })
            })
            .collect()
    }

    fn vce(&self, inv: &Invocation, rows: &[usize]) -> Result<(Vce, Option<String>), CommandError> {
        let words = inv.options().words("vce");
        let cluster_var = match words.first().map(String::as_str) {
            Some("cluster" | "cl") => words.get(1).cloned(),
            _ => inv.options().text("cluster"),
        };
        if let Some(var) = cluster_var {
            let var = expand_varlist(&self.data, &[var])?.remove(0);
            let keys = self.data.row_keys(std::slice::from_ref(&var))?;
            let ids = group_ids(&keys, rows);
            return Ok((Vce::Cluster(ids), Some(format!("cluster {}", var))));
        }
        let robust = inv.has("robust") || matches!(words.first().map(String::as_str), Some("robust" | "r" | "hc1"));
        match words.first().map(String::as_str) {
            None | Some("robust" | "r" | "hc1" | "ols") => {}
            Some(other) => {
                return Err(CommandError::parse(format!("vce({}) not supported", other)).with_fragment(other));
            }
        }
        if robust {
            Ok((Vce::Robust, Some("robust".to_string())))
        } else {
            Ok((Vce::Classical, None))
        }
    }

    pub(super) fn cmd_estimate(&mut self, inv: &Invocation) -> Result<Output, CommandError> {
        let verb = inv.verb.name();
        let kind = ModelKind::from_verb(verb)
            .ok_or_else(|| CommandError::unknown_command(verb))?;

        // panel and time requirements come before anything else
        let panel_var = if kind.requires_panel() {
            let spec = self.data.validated_panel()?;
            Some(spec.panel.clone().ok_or_else(|| {
                CommandError::state("panel variable not set; use xtset panelvar")
            })?)
        } else {
            None
        };
        let time_var = if kind.requires_time() { Some(self.data.time_spec()?.1.to_string()) } else { None };

        let mut tokens: Vec<String> = inv.tokens().to_vec();
        let mut instruments: Vec<String> = Vec::new();
        if kind == ModelKind::InstrumentalVariables {
            if tokens.first().is_some_and(|t| matches!(t.as_str(), "2sls" | "liml" | "gmm")) {
                tokens.remove(0);
            }
            let mut rest = Vec::with_capacity(tokens.len());
            let mut endog = Vec::new();
            for token in tokens {
                match instrument_group(&token) {
                    Some((e, i)) => {
                        endog.extend(e);
                        instruments.extend(i);
                    }
                    None => rest.push(token),
                }
            }
            rest.extend(endog);
            tokens = rest;
            if instruments.is_empty() {
                return Err(CommandError::parse("ivregress requires (endogenous = instruments)"));
            }
        }
        let Some((depvar, regressors)) = tokens.split_first() else {
            return Err(CommandError::new(ErrorKind::Parse, rc::VARLIST_REQUIRED, "varlist required"));
        };

        let nobs = self.data.nobs();
        let all_rows: Vec<usize> = (0..nobs).collect();
        let depvar = expand_varlist(&self.data, std::slice::from_ref(depvar))?.remove(0);
        let y_all = numeric_column(&self.data, &depvar, &all_rows)?;
        let mut terms = Vec::new();
        for token in regressors {
            terms.extend(self.term(token, &all_rows)?);
        }
        let mut instrument_terms = Vec::new();
        for token in &instruments {
            instrument_terms.extend(self.term(token, &all_rows)?);
        }

        let absorb = expand_varlist(&self.data, &inv.options().words("absorb"))?;
        let absorb_keys = if absorb.is_empty() { None } else { Some(self.data.row_keys(&absorb)?) };
        let panel_keys = panel_var.as_ref().map(|p| self.data.row_keys(std::slice::from_ref(p))).transpose()?;
        let time_all = time_var.as_ref().map(|t| numeric_column(&self.data, t, &all_rows)).transpose()?;

        // listwise deletion
        let weight_at = |r: usize| inv.weights.as_ref().map(|(_, w)| w[r]);
        let rows: Vec<usize> = inv
            .rows
            .iter()
            .copied()
            .filter(|&r| {
                y_all[r].is_some()
                    && terms.iter().chain(&instrument_terms).all(|t| t.usable(r))
                    && weight_at(r).map_or(true, |w| w.is_some_and(|w| w > 0.0))
                    && absorb_keys.as_ref().map_or(true, |k| !k[r].iter().any(Key::is_missing))
                    && panel_keys.as_ref().map_or(true, |k| !k[r].iter().any(Key::is_missing))
                    && time_all.as_ref().map_or(true, |t| t[r].is_some())
            })
            .collect();
        let (vce, vce_label) = self.vce(inv, &rows)?;
        if rows.is_empty() {
            return Err(CommandError::new(ErrorKind::Backend, rc::NO_OBSERVATIONS, "no observations"));
        }
        tracing::debug!(verb, nobs = rows.len(), dropped = inv.rows.len() - rows.len(), "estimation sample");

        // panel effects absorb the constant under conditional fixed effects
        let constant = !inv.has("noconstant") && !(kind.family().is_some() && inv.has("fe"));
        let (names, x) = design_matrix(&terms, &rows, constant);
        let mut options = inv.options().clone();
        if !instruments.is_empty() {
            let (inst_names, _) = design_matrix(&instrument_terms, &rows, false);
            options.insert("instruments", Some(inst_names.join(" ")));
        }
        let weights = inv
            .weights
            .as_ref()
            .map(|(kind, w)| (*kind, rows.iter().map(|&r| w[r].unwrap_or(0.0)).collect::<Array1<f64>>()));
        let groups = match (&absorb_keys, &panel_keys) {
            (Some(keys), _) | (None, Some(keys)) => Some(group_ids(keys, &rows)),
            (None, None) => None,
        };

        let request = FitRequest {
            kind,
            depvar: depvar.clone(),
            names,
            y: rows.iter().map(|&r| y_all[r].unwrap_or(0.0)).collect(),
            x,
            weights,
            vce,
            groups,
            time: time_all.map(|t| rows.iter().map(|&r| t[r].unwrap_or(0.0)).collect()),
            options,
        };
        let fit = self.backends.fit(&request, &self.cancel)?;
        let mut result = build_result(verb, &request, &fit);
        result.vce = match (&vce_label, &request.weights) {
            (None, Some((WeightKind::Probability, _))) => Some("robust".to_string()),
            (label, _) => label.clone(),
        };
        tracing::info!(verb, depvar = %depvar, nobs = result.nobs, "estimated");

        let level = confidence_level(inv)?;
        self.results.set_last(result.clone());
        Ok(Output::Estimation(EstimationView {
            result,
            level,
            eform: eform_title(verb, kind, inv),
            iterations: fit.iterations,
        }))
    }
}

/// Columns for `terms` over the estimation rows, `_cons` last
fn design_matrix(terms: &[Term], rows: &[usize], constant: bool) -> (Vec<String>, Array2<f64>) {
    let mut names = Vec::new();
    let mut columns: Vec<Vec<f64>> = Vec::new();
    for term in terms {
        match term {
            Term::Column { name, values } => {
                names.push(name.clone());
                columns.push(rows.iter().map(|&r| values[r].unwrap_or(0.0)).collect());
            }
            Term::Factor { var, keys } => {
                // lowest level is the base
                let levels = sorted_levels(rows.iter().map(|&r| keys[r].clone()));
                for level in levels.iter().skip(1) {
                    let label = match level.to_value().as_num() {
                        Some(n) => format_g(n, 9),
                        None => continue,
                    };
                    names.push(format!("{}.{}", label, var));
                    columns.push(rows.iter().map(|&r| if &keys[r] == level { 1.0 } else { 0.0 }).collect());
                }
            }
        }
    }
    if constant {
        names.push("_cons".to_string());
        columns.push(vec![1.0; rows.len()]);
    }
    let mut x = Array2::<f64>::zeros((rows.len(), columns.len()));
    for (j, column) in columns.iter().enumerate() {
        for (i, v) in column.iter().enumerate() {
            x[[i, j]] = *v;
        }
    }
    (names, x)
}

/// Standard errors and p-values from the backend's covariance matrix
fn build_result(verb: &str, request: &FitRequest, fit: &FitOutput) -> EstimationResult {
    let mut result = EstimationResult::new(verb, &request.depvar);
    result.title = fit.title.clone();
    result.indepvars = request.names.iter().filter(|n| *n != "_cons").cloned().collect();
    result.nobs = fit.nobs;
    result.df_resid = fit.df_resid;
    result.fit = fit.fit.clone();
    for (i, name) in request.names.iter().enumerate() {
        if fit.omitted.get(i).copied().unwrap_or(false) {
            result.coefficients.push(Coefficient { name: name.clone(), estimate: 0.0, std_err: None, p_value: None });
            continue;
        }
        let estimate = fit.coefficients[i];
        let variance = fit.covariance[[i, i]];
        let std_err = (variance >= 0.0).then(|| variance.sqrt());
        let p_value = std_err.filter(|se| *se > 0.0).map(|se| {
            let stat = estimate / se;
            match fit.df_resid {
                Some(df) => special::t_two_sided(stat, df),
                None => special::normal_two_sided(stat),
            }
        });
        result.coefficients.push(Coefficient { name: name.clone(), estimate, std_err, p_value });
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Dataset, Variable};

    fn complete_rows(data: &Dataset, vars: &[&str]) -> Vec<usize> {
        (0..data.nobs())
            .filter(|&r| vars.iter().all(|v| data.value(v, r).map_or(false, |x| !x.is_missing())))
            .collect()
    }

    fn session() -> Session {
        let mut s = Session::new();
        let x = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let noise = [0.1, -0.2, 0.05, 0.0, -0.1, 0.15, -0.05, 0.02];
        let y: Vec<Option<f64>> = x.iter().zip(noise).map(|(x, e)| Some(1.0 + 2.0 * x + e)).collect();
        let mut xs: Vec<Option<f64>> = x.iter().map(|v| Some(*v)).collect();
        xs[7] = None;
        let data = Dataset::from_variables(vec![
            Variable::numeric("y", y),
            Variable::numeric("x", xs),
            Variable::numeric("g", vec![Some(1.0), Some(2.0), Some(1.0), Some(2.0), Some(3.0), Some(3.0), Some(1.0), Some(2.0)]),
            Variable::numeric("t", (1..=8).map(|t| Some(t as f64)).collect()),
            Variable::numeric("b", vec![Some(0.0), Some(1.0), Some(0.0), Some(1.0), Some(1.0), Some(0.0), Some(1.0), Some(1.0)]),
        ])
        .unwrap();
        s.set_data(data);
        s
    }

    fn estimates(out: Output) -> EstimationView {
        match out {
            Output::Estimation(v) => v,
            other => panic!("expected estimates, got {:?}", other),
        }
    }

    #[test]
    fn regress_drops_incomplete_rows() {
        let mut s = session();
        let v = estimates(s.execute("regress y x").unwrap());
        assert_eq!(v.result.nobs, complete_rows(s.data(), &["y", "x"]).len());
        let slope = v.result.coefficient("x").unwrap();
        assert!((slope.estimate - 2.0).abs() < 0.1);
        assert!(slope.p_value.unwrap() < 0.001);
        assert_eq!(v.result.coefficients.last().unwrap().name, "_cons");
        assert_eq!(s.results().last().unwrap().depvar, "y");
    }

    #[test]
    fn factor_variables_expand_to_indicators() {
        let mut s = session();
        let v = estimates(s.execute("reg y x i.g").unwrap());
        let names: Vec<&str> = v.result.coefficients.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["x", "2.g", "3.g", "_cons"]);
    }

    #[test]
    fn robust_and_cluster_label_the_variance() {
        let mut s = session();
        let v = estimates(s.execute("regress y x, robust").unwrap());
        assert_eq!(v.result.vce.as_deref(), Some("robust"));
        let v = estimates(s.execute("regress y x, vce(cluster g)").unwrap());
        assert_eq!(v.result.vce.as_deref(), Some("cluster g"));
    }

    #[test]
    fn noconstant_and_level() {
        let mut s = session();
        let v = estimates(s.execute("regress y x, nocons level(90)").unwrap());
        assert!(v.result.coefficient("_cons").is_none());
        assert_eq!(v.level, 90.0);
        assert_eq!(s.execute("regress y x, level(5)").unwrap_err().code, 198);
    }

    #[test]
    fn logistic_reports_odds_ratios() {
        let mut s = session();
        let v = estimates(s.execute("logistic b x").unwrap());
        assert_eq!(v.eform.as_deref(), Some("Odds ratio"));
        assert!(!v.iterations.is_empty());
    }

    #[test]
    fn time_series_models_need_tsset() {
        let mut s = session();
        let err = s.execute("newey y x, lag(1)").unwrap_err();
        assert_eq!((err.kind, err.code), (ErrorKind::State, 459));
        let err = s.execute("xtreg y x").unwrap_err();
        assert_eq!(err.code, 459);
    }

    #[test]
    fn panel_logit_with_fixed_effects() {
        let mut s = session();
        assert_eq!(s.execute("xtlogit b x, fe").unwrap_err().code, 459);
        s.execute("xtset g t").unwrap();
        let v = estimates(s.execute("xtlogit b x, fe or").unwrap());
        assert_eq!(v.result.title, "Conditional fixed-effects logistic regression");
        assert_eq!(v.eform.as_deref(), Some("Odds ratio"));
        // panel 2 never varies once x is complete
        assert_eq!(v.result.nobs, 5);
        assert_eq!(v.result.fit_stat("N_g"), Some(2.0));
        assert!(v.result.coefficient("_cons").is_none());
        assert!(v.result.coefficient("x").unwrap().std_err.is_some());

        let err = s.execute("xtprobit b x, fe").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Backend);
        assert_eq!(s.execute("xtlogit b x, bogus").unwrap_err().code, 198);
    }

    #[test]
    fn dynamic_panel_models_need_a_backend() {
        let mut s = session();
        s.execute("xtset g t").unwrap();
        let err = s.execute("xtabond y x, lags(1)").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Backend);
        let err = s.execute("xtdpdsys y x").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Backend);
    }

    #[test]
    fn unregistered_models_fail_in_the_backend() {
        let mut s = session();
        s.execute("tsset t").unwrap();
        let err = s.execute("newey y x, lag(1)").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Backend);
    }

    #[test]
    fn lagged_regressors_lose_the_first_row() {
        let mut s = session();
        s.execute("tsset t").unwrap();
        let v = estimates(s.execute("regress y L.x").unwrap());
        assert_eq!(v.result.nobs, 7);
        assert!(v.result.coefficient("L.x").is_some());
    }

    #[test]
    fn ivregress_needs_instruments() {
        let mut s = session();
        assert_eq!(s.execute("ivregress 2sls y x").unwrap_err().code, 198);
        let err = s.execute("ivregress 2sls y (x = g)").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Backend);
    }

    #[test]
    fn failed_estimation_keeps_previous_results() {
        let mut s = session();
        s.execute("regress y x").unwrap();
        assert!(s.execute("regress y nosuchvar").is_err());
        assert_eq!(s.results().last().unwrap().indepvars, vec!["x"]);
    }
}
