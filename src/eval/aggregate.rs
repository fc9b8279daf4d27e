//! By-groups and summary statistics shared by `egen`, `collapse`,
//! `summarize` and `tabulate`

use super::EvalError;
use crate::command::WeightKind;
use crate::dataset::{Dataset, Key};
use std::collections::HashMap;

/// Partition of a set of rows into groups of equal key values
///
/// Groups are numbered in order of first appearance; rows inside a group
/// keep their relative order.
#[derive(Debug, Clone, Default)]
pub struct Grouping {
    keys: Vec<Vec<Key>>,
    groups: Vec<Vec<usize>>,
    /// row -> (group, position within group)
    located: HashMap<usize, (usize, usize)>,
}

impl Grouping {
    pub fn by(data: &Dataset, vars: &[String], rows: &[usize]) -> Result<Grouping, EvalError> {
        let columns = vars
            .iter()
            .map(|v| data.column(v))
            .collect::<Result<Vec<_>, _>>()?;
        let mut index: HashMap<Vec<Key>, usize> = HashMap::new();
        let mut grouping = Grouping::default();
        for &row in rows {
            let key = data.row_key(&columns, row);
            let group = match index.get(&key) {
                Some(&g) => g,
                None => {
                    let g = grouping.groups.len();
                    index.insert(key.clone(), g);
                    grouping.keys.push(key);
                    grouping.groups.push(Vec::new());
                    g
                }
            };
            grouping.located.insert(row, (group, grouping.groups[group].len()));
            grouping.groups[group].push(row);
        }
        Ok(grouping)
    }

    /// All rows in one group
    pub fn single(rows: &[usize]) -> Grouping {
        Grouping {
            keys: vec![Vec::new()],
            groups: vec![rows.to_vec()],
            located: rows.iter().enumerate().map(|(i, &r)| (r, (0, i))).collect(),
        }
    }

    /// Renumber groups in ascending key order
    pub fn sort_by_key(&mut self) {
        let mut order: Vec<usize> = (0..self.groups.len()).collect();
        order.sort_by(|&a, &b| self.keys[a].cmp(&self.keys[b]));
        let keys: Vec<_> = order.iter().map(|&g| std::mem::take(&mut self.keys[g])).collect();
        let groups: Vec<_> = order.iter().map(|&g| std::mem::take(&mut self.groups[g])).collect();
        self.keys = keys;
        self.groups = groups;
        for (g, rows) in self.groups.iter().enumerate() {
            for (i, &row) in rows.iter().enumerate() {
                self.located.insert(row, (g, i));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn rows(&self, group: usize) -> &[usize] {
        &self.groups[group]
    }

    pub fn key(&self, group: usize) -> &[Key] {
        &self.keys[group]
    }

    /// Group of `row` and its 0-based position inside it
    pub fn locate(&self, row: usize) -> Option<(usize, usize)> {
        self.located.get(&row).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[Key], &[usize])> {
        self.keys.iter().map(Vec::as_slice).zip(self.groups.iter().map(Vec::as_slice))
    }
}

/// Group statistic used by `egen` and `collapse`
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Stat {
    Mean,
    Sum,
    Count,
    Min,
    Max,
    Sd,
    Median,
    Percentile(f64),
    Iqr,
    First,
    Last,
    FirstNonMissing,
    LastNonMissing,
}

impl Stat {
    pub fn parse(name: &str) -> Option<Stat> {
        let stat = match name {
            "mean" => Stat::Mean,
            "sum" | "total" => Stat::Sum,
            "count" => Stat::Count,
            "min" => Stat::Min,
            "max" => Stat::Max,
            "sd" => Stat::Sd,
            "median" => Stat::Median,
            "iqr" => Stat::Iqr,
            "first" => Stat::First,
            "last" => Stat::Last,
            "firstnm" => Stat::FirstNonMissing,
            "lastnm" => Stat::LastNonMissing,
            _ => {
                let p: f64 = name.strip_prefix('p')?.parse().ok()?;
                if !(1.0..=99.0).contains(&p) {
                    return None;
                }
                Stat::Percentile(p)
            }
        };
        Some(stat)
    }

    pub fn name(&self) -> String {
        match self {
            Stat::Mean => "mean".into(),
            Stat::Sum => "sum".into(),
            Stat::Count => "count".into(),
            Stat::Min => "min".into(),
            Stat::Max => "max".into(),
            Stat::Sd => "sd".into(),
            Stat::Median => "median".into(),
            Stat::Percentile(p) => format!("p{}", p),
            Stat::Iqr => "iqr".into(),
            Stat::First => "first".into(),
            Stat::Last => "last".into(),
            Stat::FirstNonMissing => "firstnm".into(),
            Stat::LastNonMissing => "lastnm".into(),
        }
    }

    /// Compute over one group's values in row order. Sum and count of an
    /// empty group are 0; everything else is missing.
    pub fn apply(&self, values: &[Option<f64>]) -> Option<f64> {
        match self {
            Stat::First => return values.first().copied().flatten(),
            Stat::Last => return values.last().copied().flatten(),
            _ => {}
        }
        let present: Vec<f64> = values.iter().flatten().copied().collect();
        let n = present.len() as f64;
        match self {
            Stat::Count => Some(n),
            Stat::Sum => Some(present.iter().sum()),
            Stat::FirstNonMissing => present.first().copied(),
            Stat::LastNonMissing => present.last().copied(),
            _ if present.is_empty() => None,
            Stat::Mean => Some(present.iter().sum::<f64>() / n),
            Stat::Min => present.iter().copied().reduce(f64::min),
            Stat::Max => present.iter().copied().reduce(f64::max),
            Stat::Sd => {
                if present.len() < 2 {
                    return None;
                }
                let mean = present.iter().sum::<f64>() / n;
                let ss: f64 = present.iter().map(|x| (x - mean).powi(2)).sum();
                Some((ss / (n - 1.0)).sqrt())
            }
            Stat::Median | Stat::Percentile(_) | Stat::Iqr => {
                let mut sorted = present;
                sorted.sort_by(f64::total_cmp);
                match self {
                    Stat::Median => percentile(&sorted, 50.0),
                    Stat::Percentile(p) => percentile(&sorted, *p),
                    _ => Some(percentile(&sorted, 75.0)? - percentile(&sorted, 25.0)?),
                }
            }
            Stat::First | Stat::Last => None,
        }
    }
}

/// Stata's percentile rule on sorted data: with `P = n*p/100`, take
/// `x[ceil(P)]` unless `P` is an integer, in which case average `x[P]`
/// and `x[P+1]` (1-based)
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = sorted.iter().map(|&x| (x, 1.0)).collect();
    weighted_percentile(&pairs, p)
}

/// Same rule with cumulative weights in place of counts
fn weighted_percentile(sorted: &[(f64, f64)], p: f64) -> Option<f64> {
    let total: f64 = sorted.iter().map(|(_, w)| w).sum();
    if sorted.is_empty() || total <= 0.0 {
        return None;
    }
    let target = total * p / 100.0;
    let mut cumulative = 0.0;
    for (i, &(x, w)) in sorted.iter().enumerate() {
        cumulative += w;
        if (cumulative - target).abs() < 1e-9 * total.max(1.0) {
            let next = sorted.get(i + 1).map_or(x, |&(y, _)| y);
            return Some((x + next) / 2.0);
        }
        if cumulative > target {
            return Some(x);
        }
    }
    sorted.last().map(|&(x, _)| x)
}

/// Percentiles reported by `summarize, detail`
pub const DETAIL_PERCENTILES: [f64; 9] = [1.0, 5.0, 10.0, 25.0, 50.0, 75.0, 90.0, 95.0, 99.0];

/// Extra moments and order statistics for `summarize, detail`
#[derive(Debug, Clone, PartialEq)]
pub struct DetailStats {
    pub percentiles: Vec<(f64, f64)>,
    pub smallest: Vec<f64>,
    pub largest: Vec<f64>,
    pub variance: Option<f64>,
    pub skewness: Option<f64>,
    pub kurtosis: Option<f64>,
}

/// Summary of one variable over the selected observations
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryStats {
    /// Observations, or the sum of frequency weights
    pub n: f64,
    pub sum_weights: f64,
    pub mean: Option<f64>,
    pub sd: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub detail: Option<DetailStats>,
}

impl SummaryStats {
    /// Summarize nonmissing `values`. With `weights`, rows whose weight is
    /// missing or not positive are left out.
    pub fn compute(
        values: &[Option<f64>],
        weights: Option<(WeightKind, &[Option<f64>])>,
        detail: bool,
    ) -> SummaryStats {
        let mut pairs: Vec<(f64, f64)> = Vec::with_capacity(values.len());
        for (i, value) in values.iter().enumerate() {
            let Some(x) = value else { continue };
            let w = match weights {
                Some((_, ws)) => match ws.get(i).copied().flatten() {
                    Some(w) if w > 0.0 => w,
                    _ => continue,
                },
                None => 1.0,
            };
            pairs.push((*x, w));
        }

        let count = pairs.len() as f64;
        let sum_weights: f64 = pairs.iter().map(|(_, w)| w).sum();
        let frequency = matches!(weights, None | Some((WeightKind::Frequency, _)));
        let n = if frequency { sum_weights } else { count };

        if pairs.is_empty() {
            return SummaryStats {
                n: 0.0,
                sum_weights: 0.0,
                mean: None,
                sd: None,
                min: None,
                max: None,
                detail: None,
            };
        }

        let mean = pairs.iter().map(|(x, w)| x * w).sum::<f64>() / sum_weights;
        let ss: f64 = pairs.iter().map(|(x, w)| w * (x - mean).powi(2)).sum();
        // analytic weights are rescaled to sum to the number of observations
        let variance = if frequency {
            (n > 1.0).then(|| ss / (n - 1.0))
        } else {
            (count > 1.0).then(|| ss * count / sum_weights / (count - 1.0))
        };

        let mut sorted = pairs.clone();
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0));
        let min = sorted.first().map(|p| p.0);
        let max = sorted.last().map(|p| p.0);

        let detail = detail.then(|| {
            let moment = |k: i32| pairs.iter().map(|(x, w)| w * (x - mean).powi(k)).sum::<f64>() / sum_weights;
            let m2 = moment(2);
            let (skewness, kurtosis) = if m2 > 0.0 {
                (Some(moment(3) / m2.powf(1.5)), Some(moment(4) / (m2 * m2)))
            } else {
                (None, None)
            };
            DetailStats {
                percentiles: DETAIL_PERCENTILES
                    .iter()
                    .filter_map(|&p| weighted_percentile(&sorted, p).map(|v| (p, v)))
                    .collect(),
                smallest: sorted.iter().take(4).map(|p| p.0).collect(),
                largest: sorted.iter().rev().take(4).map(|p| p.0).collect::<Vec<_>>().into_iter().rev().collect(),
                variance,
                skewness,
                kurtosis,
            }
        });

        SummaryStats {
            n,
            sum_weights,
            mean: Some(mean),
            sd: variance.map(f64::sqrt),
            min,
            max,
            detail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Variable;

    #[test]
    fn groups_in_first_appearance_order() {
        let ds = Dataset::from_variables(vec![Variable::numeric(
            "g",
            vec![Some(2.0), Some(1.0), Some(2.0), None],
        )])
        .unwrap();
        let mut g = Grouping::by(&ds, &["g".into()], &[0, 1, 2, 3]).unwrap();
        assert_eq!(g.len(), 3);
        assert_eq!(g.rows(0), &[0, 2]);
        assert_eq!(g.locate(2), Some((0, 1)));
        g.sort_by_key();
        assert_eq!(g.rows(0), &[1]);
        // missing sorts last
        assert_eq!(g.rows(2), &[3]);
        assert_eq!(g.locate(2), Some((1, 1)));
    }

    #[test]
    fn stats_ignore_missing() {
        let v = [Some(1.0), None, Some(3.0)];
        assert_eq!(Stat::Mean.apply(&v), Some(2.0));
        assert_eq!(Stat::Count.apply(&v), Some(2.0));
        assert_eq!(Stat::Last.apply(&v), Some(3.0));
        assert_eq!(Stat::First.apply(&[None, Some(1.0)]), None);
        assert_eq!(Stat::FirstNonMissing.apply(&[None, Some(1.0)]), Some(1.0));
        assert_eq!(Stat::Sum.apply(&[None]), Some(0.0));
        assert_eq!(Stat::Mean.apply(&[None]), None);
        assert_eq!(Stat::Sd.apply(&[Some(1.0)]), None);
    }

    #[test]
    fn stat_names() {
        assert_eq!(Stat::parse("p25"), Some(Stat::Percentile(25.0)));
        assert_eq!(Stat::parse("total"), Some(Stat::Sum));
        assert_eq!(Stat::parse("p100"), None);
        assert_eq!(Stat::parse("bogus"), None);
    }

    #[test]
    fn percentile_rule() {
        let x = [1.0, 2.0, 3.0, 4.0];
        // P = 2 exactly: average of 2nd and 3rd
        assert_eq!(percentile(&x, 50.0), Some(2.5));
        // P = 1.2: take the 2nd
        assert_eq!(percentile(&x, 30.0), Some(2.0));
        assert_eq!(percentile(&[5.0], 99.0), Some(5.0));
        assert_eq!(percentile(&[], 50.0), None);
    }

    #[test]
    fn summary_skips_missing() {
        let s = SummaryStats::compute(&[Some(1.0), None, Some(3.0)], None, false);
        assert_eq!(s.n, 2.0);
        assert_eq!(s.mean, Some(2.0));
        assert!((s.sd.unwrap() - 2f64.sqrt()).abs() < 1e-12);
        assert_eq!((s.min, s.max), (Some(1.0), Some(3.0)));
    }

    #[test]
    fn frequency_weights_count_observations() {
        let w = [Some(2.0), Some(1.0)];
        let s = SummaryStats::compute(&[Some(1.0), Some(4.0)], Some((WeightKind::Frequency, &w)), false);
        assert_eq!(s.n, 3.0);
        assert_eq!(s.mean, Some(2.0));
        // equivalent to 1, 1, 4
        assert!((s.sd.unwrap() - 3f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn detail_statistics() {
        let values: Vec<Option<f64>> = (1..=10).map(|i| Some(i as f64)).collect();
        let s = SummaryStats::compute(&values, None, true);
        let d = s.detail.unwrap();
        assert!(d.percentiles.contains(&(50.0, 5.5)));
        assert_eq!(d.smallest, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(d.largest, vec![7.0, 8.0, 9.0, 10.0]);
        assert!(d.skewness.unwrap().abs() < 1e-12);
    }
}
