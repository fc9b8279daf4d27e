//! Estimation results and the named result store (`eststo`, `estadd`,
//! `estimates`)

use crate::backend::special;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResultError {
    #[error("last estimates not found")]
    NoEstimates,
    #[error("estimation result {0} not found")]
    NotFound(String),
    #[error("{0} invalid name")]
    InvalidName(String),
}

/// One row of a coefficient table
#[derive(Debug, Clone, PartialEq)]
pub struct Coefficient {
    pub name: String,
    pub estimate: f64,
    pub std_err: Option<f64>,
    pub p_value: Option<f64>,
}

impl Coefficient {
    /// t or z statistic
    pub fn statistic(&self) -> Option<f64> {
        self.std_err.filter(|se| *se > 0.0).map(|se| self.estimate / se)
    }
}

/// `estadd` entries
#[derive(Debug, Clone, PartialEq)]
pub enum AuxValue {
    Scalar(f64),
    Local(String),
}

impl fmt::Display for AuxValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuxValue::Scalar(v) => write!(f, "{}", crate::display::format_number(*v)),
            AuxValue::Local(s) => write!(f, "{}", s),
        }
    }
}

/// Output of one estimation command
#[derive(Debug, Clone, PartialEq)]
pub struct EstimationResult {
    /// Verb that produced it, e.g. `regress`
    pub command: String,
    pub title: String,
    pub depvar: String,
    pub indepvars: Vec<String>,
    pub nobs: usize,
    pub coefficients: Vec<Coefficient>,
    /// Residual degrees of freedom; `None` means normal (z) inference
    pub df_resid: Option<f64>,
    /// `robust`, `cluster id`, ...
    pub vce: Option<String>,
    /// Fit statistics in display order (`r2`, `F`, `ll`, ...)
    pub fit: Vec<(String, f64)>,
    pub aux: Vec<(String, AuxValue)>,
}

impl EstimationResult {
    pub fn new(command: &str, depvar: &str) -> Self {
        EstimationResult {
            command: command.to_string(),
            title: String::new(),
            depvar: depvar.to_string(),
            indepvars: Vec::new(),
            nobs: 0,
            coefficients: Vec::new(),
            df_resid: None,
            vce: None,
            fit: Vec::new(),
            aux: Vec::new(),
        }
    }

    pub fn coefficient(&self, name: &str) -> Option<&Coefficient> {
        self.coefficients.iter().find(|c| c.name == name)
    }

    pub fn fit_stat(&self, name: &str) -> Option<f64> {
        self.fit.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    /// Label of the test statistic column
    pub fn stat_label(&self) -> &'static str {
        if self.df_resid.is_some() {
            "t"
        } else {
            "z"
        }
    }

    /// Two-sided critical value for a confidence level in percent
    pub fn critical_value(&self, level: f64) -> f64 {
        let tail = (1.0 - level / 100.0) / 2.0;
        match self.df_resid {
            Some(df) => special::t_quantile(1.0 - tail, df),
            None => special::normal_quantile(1.0 - tail),
        }
    }

    /// Add or overwrite an `estadd` entry, keeping the original position
    pub fn add_aux(&mut self, name: &str, value: AuxValue) {
        match self.aux.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value,
            None => self.aux.push((name.to_string(), value)),
        }
    }

    /// Statistic by name for `esttab ..., stats()`: `N`, fit statistics,
    /// then `estadd` entries
    pub fn lookup(&self, name: &str) -> Option<AuxValue> {
        if name == "N" {
            return Some(AuxValue::Scalar(self.nobs as f64));
        }
        if let Some((_, v)) = self.aux.iter().find(|(n, _)| n == name) {
            return Some(v.clone());
        }
        self.fit_stat(name).map(AuxValue::Scalar)
    }
}

/// Named results plus the most recent estimation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultStore {
    last: Option<EstimationResult>,
    stored: Vec<(String, EstimationResult)>,
    /// Stored name of the active result, if it was stored
    current: Option<String>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fresh estimation as the active result
    pub fn set_last(&mut self, result: EstimationResult) {
        self.last = Some(result);
        self.current = None;
    }

    pub fn last(&self) -> Option<&EstimationResult> {
        self.last.as_ref()
    }

    pub fn current_name(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Store the active result; without a name it becomes `est1`, `est2`, ...
    pub fn store(&mut self, name: Option<&str>) -> Result<String, ResultError> {
        let result = self.last.clone().ok_or(ResultError::NoEstimates)?;
        let name = match name {
            Some(n) => {
                if !crate::command::is_name(n) {
                    return Err(ResultError::InvalidName(n.to_string()));
                }
                n.to_string()
            }
            None => self.next_default_name(),
        };
        match self.stored.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = result,
            None => self.stored.push((name.clone(), result)),
        }
        self.current = Some(name.clone());
        tracing::debug!(name = %name, "stored estimates");
        Ok(name)
    }

    fn next_default_name(&self) -> String {
        (self.stored.len() + 1..)
            .map(|i| format!("est{}", i))
            .find(|n| self.get(n).is_none())
            .unwrap_or_default()
    }

    pub fn get(&self, name: &str) -> Option<&EstimationResult> {
        self.stored.iter().find(|(n, _)| n == name).map(|(_, r)| r)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.stored.iter().map(|(n, _)| n.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.stored.is_empty()
    }

    /// Make a stored result active again (`estimates restore`)
    pub fn restore(&mut self, name: &str) -> Result<(), ResultError> {
        let result = self.get(name).cloned().ok_or_else(|| ResultError::NotFound(name.to_string()))?;
        self.last = Some(result);
        self.current = Some(name.to_string());
        Ok(())
    }

    pub fn drop(&mut self, name: &str) -> Result<(), ResultError> {
        let before = self.stored.len();
        self.stored.retain(|(n, _)| n != name);
        if self.stored.len() == before {
            return Err(ResultError::NotFound(name.to_string()));
        }
        if self.current.as_deref() == Some(name) {
            self.current = None;
        }
        Ok(())
    }

    /// Drop all stored results; the active result survives
    pub fn clear(&mut self) {
        self.stored.clear();
        self.current = None;
    }

    /// `estadd`: add to the active result and to its stored copy
    pub fn add(&mut self, name: &str, value: AuxValue) -> Result<(), ResultError> {
        let last = self.last.as_mut().ok_or(ResultError::NoEstimates)?;
        last.add_aux(name, value.clone());
        if let Some(current) = &self.current {
            if let Some((_, stored)) = self.stored.iter_mut().find(|(n, _)| n == current) {
                stored.add_aux(name, value);
            }
        }
        Ok(())
    }

    /// Title of a stored result (`eststo name, title()`)
    pub fn retitle(&mut self, name: &str, title: &str) -> Result<(), ResultError> {
        let (_, stored) = self
            .stored
            .iter_mut()
            .find(|(n, _)| n == name)
            .ok_or_else(|| ResultError::NotFound(name.to_string()))?;
        stored.title = title.to_string();
        Ok(())
    }

    /// `estadd ... : m1 m2`: add to each named stored result
    pub fn add_to(&mut self, targets: &[String], name: &str, value: AuxValue) -> Result<(), ResultError> {
        let names: Vec<String> = self.select(targets)?.into_iter().map(|(n, _)| n).collect();
        for target in &names {
            if target == "." {
                if let Some(last) = self.last.as_mut() {
                    last.add_aux(name, value.clone());
                }
            } else if let Some((_, stored)) = self.stored.iter_mut().find(|(n, _)| n == target) {
                stored.add_aux(name, value.clone());
            }
            if self.current.as_deref() == Some(target.as_str()) {
                if let Some(last) = self.last.as_mut() {
                    last.add_aux(name, value.clone());
                }
            }
        }
        Ok(())
    }

    /// Resolve a name list (`*` wildcards allowed); empty means all stored
    pub fn select(&self, names: &[String]) -> Result<Vec<(String, &EstimationResult)>, ResultError> {
        if names.is_empty() {
            if self.stored.is_empty() {
                return self
                    .last
                    .as_ref()
                    .map(|r| vec![(".".to_string(), r)])
                    .ok_or(ResultError::NoEstimates);
            }
            return Ok(self.stored.iter().map(|(n, r)| (n.clone(), r)).collect());
        }
        let mut out = Vec::new();
        for name in names {
            if name == "." {
                out.push((name.clone(), self.last.as_ref().ok_or(ResultError::NoEstimates)?));
                continue;
            }
            let pattern = glob::Pattern::new(name).map_err(|_| ResultError::NotFound(name.clone()))?;
            let before = out.len();
            for (n, r) in &self.stored {
                if pattern.matches(n) {
                    out.push((n.clone(), r));
                }
            }
            if out.len() == before {
                return Err(ResultError::NotFound(name.clone()));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(depvar: &str) -> EstimationResult {
        let mut r = EstimationResult::new("regress", depvar);
        r.nobs = 10;
        r.coefficients.push(Coefficient {
            name: "x".into(),
            estimate: 2.0,
            std_err: Some(0.5),
            p_value: Some(0.01),
        });
        r
    }

    #[test]
    fn store_requires_an_estimation() {
        let mut store = ResultStore::new();
        assert_eq!(store.store(Some("m1")), Err(ResultError::NoEstimates));
    }

    #[test]
    fn default_names_count_up() {
        let mut store = ResultStore::new();
        store.set_last(result("y"));
        assert_eq!(store.store(None).unwrap(), "est1");
        assert_eq!(store.store(None).unwrap(), "est2");
        assert_eq!(store.names().collect::<Vec<_>>(), vec!["est1", "est2"]);
    }

    #[test]
    fn estadd_reaches_stored_copy() {
        let mut store = ResultStore::new();
        store.set_last(result("y"));
        store.store(Some("m1")).unwrap();
        store.add("N2", AuxValue::Local("99".into())).unwrap();
        let m1 = store.get("m1").unwrap();
        assert_eq!(m1.lookup("N2"), Some(AuxValue::Local("99".into())));
        assert_eq!(m1.lookup("N"), Some(AuxValue::Scalar(10.0)));

        // a new estimation is not stored until asked
        store.set_last(result("z"));
        store.add("flag", AuxValue::Scalar(1.0)).unwrap();
        assert_eq!(store.get("m1").unwrap().lookup("flag"), None);
    }

    #[test]
    fn select_with_wildcards() {
        let mut store = ResultStore::new();
        store.set_last(result("y"));
        store.store(Some("m1")).unwrap();
        store.store(Some("m2")).unwrap();
        store.store(Some("other")).unwrap();
        let picked = store.select(&["m*".into()]).unwrap();
        assert_eq!(picked.len(), 2);
        assert!(matches!(store.select(&["zz".into()]), Err(ResultError::NotFound(_))));
        assert_eq!(store.select(&[]).unwrap().len(), 3);
    }

    #[test]
    fn drop_and_restore() {
        let mut store = ResultStore::new();
        store.set_last(result("y"));
        store.store(Some("a")).unwrap();
        store.set_last(result("z"));
        store.restore("a").unwrap();
        assert_eq!(store.last().unwrap().depvar, "y");
        store.drop("a").unwrap();
        assert!(store.drop("a").is_err());
    }
}
