//! summarize and tabulate

use super::{sorted_levels, Invocation};
use crate::ast::Value;
use crate::command::WeightKind;
use crate::dataset::Key;
use crate::display::{format_g, Output, SummaryRow, SummaryTable, Tabulation};
use crate::error::CommandError;
use crate::eval::SummaryStats;
use crate::session::Session;
use std::collections::HashMap;

impl Session {
    pub(super) fn cmd_summarize(&mut self, inv: &Invocation) -> Result<Output, CommandError> {
        let weights = inv.selected_weights();
        let weights = weights.as_ref().map(|(kind, w)| (*kind, w.as_slice()));
        let detail = inv.has("detail");
        let mut rows = Vec::with_capacity(inv.vars.len());
        for name in &inv.vars {
            self.check_cancel()?;
            let var = self.data.require(name)?;
            // string variables show zero observations
            let values: Vec<Option<f64>> = if var.is_numeric() {
                inv.rows.iter().map(|&r| var.data.num(r)).collect()
            } else {
                Vec::new()
            };
            let stats = if values.is_empty() {
                SummaryStats::compute(&[], None, detail)
            } else {
                SummaryStats::compute(&values, weights, detail)
            };
            rows.push(SummaryRow { name: name.clone(), label: var.label.clone(), stats });
        }
        if inv.has("meanonly") {
            if let Some(row) = rows.last() {
                tracing::debug!(var = %row.name, mean = ?row.stats.mean, "meanonly");
            }
            return Ok(Output::None);
        }
        Ok(Output::Summary(SummaryTable { rows, weighted: weights.is_some(), detail }))
    }

    /// Frequency of every selected row: its weight, or 1
    fn frequencies(&self, inv: &Invocation) -> Vec<f64> {
        let Some((kind, w)) = &inv.weights else {
            return vec![1.0; inv.rows.len()];
        };
        let raw: Vec<f64> = inv.rows.iter().map(|&r| w[r].filter(|x| *x > 0.0).unwrap_or(0.0)).collect();
        if *kind == WeightKind::Analytic {
            // analytic weights are rescaled to sum to the number of observations
            let used = raw.iter().filter(|x| **x > 0.0).count() as f64;
            let total: f64 = raw.iter().sum();
            if total > 0.0 {
                return raw.iter().map(|x| x * used / total).collect();
            }
        }
        raw
    }

    fn level_text(&self, var: &str, key: &Key, labels: bool) -> String {
        match key.to_value() {
            Value::Num(n) if !labels => format_g(n, 9),
            Value::Str(s) if s.is_empty() => "\"\"".to_string(),
            value => self.display_value(var, &value),
        }
    }

    pub(super) fn cmd_tabulate(&mut self, inv: &Invocation) -> Result<Output, CommandError> {
        let include_missing = inv.has("missing");
        let labels = !inv.has("nolabel");
        let freq = self.frequencies(inv);
        let is_missing = |k: &Key| match k {
            Key::Str(s) => s.is_empty(),
            other => other.is_missing(),
        };
        let keys: Vec<Vec<Key>> = inv
            .vars
            .iter()
            .map(|v| {
                let column = self.data.column(v)?;
                Ok(inv.rows.iter().map(|&r| Key::from_value(column.get(r))).collect())
            })
            .collect::<Result<_, CommandError>>()?;
        let kept: Vec<usize> = (0..inv.rows.len())
            .filter(|&i| include_missing || !keys.iter().any(|k| is_missing(&k[i])))
            .collect();

        if let [row_var] = inv.vars.as_slice() {
            let mut counts: HashMap<&Key, f64> = HashMap::new();
            for &i in &kept {
                *counts.entry(&keys[0][i]).or_default() += freq[i];
            }
            let levels = sorted_levels(counts.keys().map(|k| (*k).clone()));
            let rows = levels
                .iter()
                .map(|k| (self.level_text(row_var, k, labels), counts.get(k).copied().unwrap_or(0.0)))
                .filter(|(_, n)| *n > 0.0)
                .collect();
            return Ok(Output::Tabulation(Tabulation::OneWay { var: row_var.clone(), rows }));
        }

        let (row_var, col_var) = (&inv.vars[0], &inv.vars[1]);
        let row_levels = sorted_levels(kept.iter().map(|&i| keys[0][i].clone()));
        let col_levels = sorted_levels(kept.iter().map(|&i| keys[1][i].clone()));
        let mut counts = vec![vec![0.0; col_levels.len()]; row_levels.len()];
        for &i in &kept {
            if let (Ok(r), Ok(c)) = (row_levels.binary_search(&keys[0][i]), col_levels.binary_search(&keys[1][i])) {
                counts[r][c] += freq[i];
            }
        }
        Ok(Output::Tabulation(Tabulation::TwoWay {
            row_var: row_var.clone(),
            col_var: col_var.clone(),
            row_labels: row_levels.iter().map(|k| self.level_text(row_var, k, labels)).collect(),
            col_labels: col_levels.iter().map(|k| self.level_text(col_var, k, labels)).collect(),
            counts,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Dataset, Variable};
    use crate::display::render;

    fn session() -> Session {
        let mut s = Session::new();
        let mut data = Dataset::from_variables(vec![
            Variable::numeric("x", vec![Some(1.0), None, Some(3.0)]),
            Variable::numeric("g", vec![Some(1.0), Some(2.0), Some(1.0)]),
            Variable::string("s", vec!["a".into(), "b".into(), "".into()]),
            Variable::numeric("w", vec![Some(1.0), Some(2.0), Some(3.0)]),
        ])
        .unwrap();
        data.define_label("g", vec![(1, "one".into())], false).unwrap();
        data.attach_label("g", Some("g")).unwrap();
        s.set_data(data);
        s
    }

    fn summary(out: Output) -> SummaryTable {
        match out {
            Output::Summary(t) => t,
            other => panic!("expected a summary table, got {:?}", other),
        }
    }

    #[test]
    fn summarize_skips_missing() {
        let mut s = session();
        let t = summary(s.execute("summarize x").unwrap());
        let stats = &t.rows[0].stats;
        assert_eq!(stats.n, 2.0);
        assert_eq!(stats.mean, Some(2.0));
        let text = render(&Output::Summary(t), 80);
        assert!(text.lines().nth(2).unwrap().trim_start().starts_with("x |"), "{}", text);
    }

    #[test]
    fn summarize_with_frequency_weights() {
        let mut s = session();
        let t = summary(s.execute("summarize x [fw=w]").unwrap());
        assert!(t.weighted);
        assert_eq!(t.rows[0].stats.n, 4.0);
        assert_eq!(t.rows[0].stats.mean, Some(2.5));
    }

    #[test]
    fn summarize_strings_have_no_observations() {
        let mut s = session();
        let t = summary(s.execute("su s").unwrap());
        assert_eq!(t.rows[0].stats.n, 0.0);
        assert!(s.execute("summarize x, meanonly").unwrap().is_none());
    }

    #[test]
    fn one_way_uses_labels() {
        let mut s = session();
        match s.execute("tab g").unwrap() {
            Output::Tabulation(Tabulation::OneWay { rows, .. }) => {
                assert_eq!(rows, vec![("one".to_string(), 2.0), ("2".to_string(), 1.0)]);
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn missing_is_excluded_unless_asked() {
        let mut s = session();
        let count = |out: Output| match out {
            Output::Tabulation(Tabulation::OneWay { rows, .. }) => rows.len(),
            other => panic!("{:?}", other),
        };
        assert_eq!(count(s.execute("tab x").unwrap()), 2);
        assert_eq!(count(s.execute("tab x, missing").unwrap()), 3);
        assert_eq!(count(s.execute("tab s").unwrap()), 2);
    }

    #[test]
    fn two_way_counts() {
        let mut s = session();
        match s.execute("tabulate g x, nolabel").unwrap() {
            Output::Tabulation(Tabulation::TwoWay { row_labels, col_labels, counts, .. }) => {
                assert_eq!(row_labels, vec!["1"]);
                assert_eq!(col_labels, vec!["1", "3"]);
                assert_eq!(counts, vec![vec![1.0, 1.0]]);
            }
            other => panic!("{:?}", other),
        }
    }
}
