//! Value-label sets

use std::collections::BTreeMap;

/// Mapping from integer code to display text, shared by name between
/// variables
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSet {
    entries: BTreeMap<i64, String>,
}

impl LabelSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (i64, String)>) -> Self {
        LabelSet { entries: entries.into_iter().collect() }
    }

    /// Insert or overwrite one code; an empty text removes the code
    pub fn insert(&mut self, code: i64, text: String) {
        if text.is_empty() {
            self.entries.remove(&code);
        } else {
            self.entries.insert(code, text);
        }
    }

    pub fn get(&self, code: i64) -> Option<&str> {
        self.entries.get(&code).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, &str)> {
        self.entries.iter().map(|(c, t)| (*c, t.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_removes_code() {
        let mut set = LabelSet::from_entries([(1, "yes".to_string()), (0, "no".to_string())]);
        set.insert(1, String::new());
        assert_eq!(set.get(1), None);
        assert_eq!(set.get(0), Some("no"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn iteration_is_ordered_by_code() {
        let set = LabelSet::from_entries([(3, "c".to_string()), (-1, "z".to_string())]);
        let codes: Vec<i64> = set.iter().map(|(c, _)| c).collect();
        assert_eq!(codes, vec![-1, 3]);
    }
}
