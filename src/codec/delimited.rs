//! Delimited text (`import delimited` / `export delimited`)

use super::{Codec, CodecError};
use crate::dataset::{validate_name, Column, Dataset, Variable, MAX_NAME_LEN};
use crate::display::format_number;
use std::fs::File;
use std::path::Path;

/// Comma-separated by default; the first row holds variable names
#[derive(Debug, Clone)]
pub struct CsvCodec {
    pub delimiter: u8,
    pub header: bool,
}

impl Default for CsvCodec {
    fn default() -> Self {
        CsvCodec { delimiter: b',', header: true }
    }
}

/// Turn a header cell into a usable, unique variable name
fn variable_name(raw: &str, index: usize, taken: &[String]) -> String {
    let mut name: String = raw
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if name.chars().next().map_or(false, |c| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name.truncate(MAX_NAME_LEN);
    if name.is_empty() || validate_name(&name).is_err() {
        name = format!("v{}", index + 1);
    }
    let base = name.clone();
    let mut n = 1;
    while taken.contains(&name) {
        n += 1;
        let suffix = n.to_string();
        name = format!("{}{}", &base[..base.len().min(MAX_NAME_LEN - suffix.len())], suffix);
    }
    name
}

/// A cell that reads as numeric missing
fn is_missing_text(s: &str) -> bool {
    matches!(s.trim(), "" | "." | "NA")
}

impl CsvCodec {
    fn infer(cells: Vec<String>) -> Column {
        let numeric = cells
            .iter()
            .all(|c| is_missing_text(c) || c.trim().parse::<f64>().is_ok());
        if numeric {
            Column::Numeric(cells.iter().map(|c| c.trim().parse::<f64>().ok()).collect())
        } else {
            Column::Str(cells)
        }
    }
}

impl Codec for CsvCodec {
    fn read(&self, path: &Path) -> Result<Dataset, CodecError> {
        let file = File::open(path).map_err(|e| CodecError::open(path, e))?;
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(false)
            .flexible(true)
            .from_reader(file);

        let mut records = reader.records();
        let header: Option<Vec<String>> = match (self.header, records.next()) {
            (true, Some(first)) => Some(first?.iter().map(String::from).collect()),
            (true, None) => Some(Vec::new()),
            (false, None) => None,
            (false, Some(first)) => {
                let row: Vec<String> = first?.iter().map(String::from).collect();
                let mut columns: Vec<Vec<String>> = row.into_iter().map(|c| vec![c]).collect();
                return self.finish(path, None, &mut columns, records);
            }
        };
        let width = header.as_ref().map_or(0, Vec::len);
        let mut columns: Vec<Vec<String>> = vec![Vec::new(); width];
        self.finish(path, header, &mut columns, records)
    }

    fn write(&self, data: &Dataset, path: &Path) -> Result<(), CodecError> {
        let mut writer = csv::WriterBuilder::new().delimiter(self.delimiter).from_path(path)?;
        if self.header {
            writer.write_record(data.names())?;
        }
        for row in 0..data.nobs() {
            let record = data.variables().iter().map(|v| match &v.data {
                Column::Numeric(values) => values[row].map(format_number).unwrap_or_default(),
                Column::Str(values) => values[row].clone(),
            });
            writer.write_record(record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl CsvCodec {
    fn finish(
        &self,
        path: &Path,
        header: Option<Vec<String>>,
        columns: &mut Vec<Vec<String>>,
        records: csv::StringRecordsIter<'_, File>,
    ) -> Result<Dataset, CodecError> {
        let mut nrows = columns.first().map_or(0, Vec::len);
        for record in records {
            let record = record?;
            // ragged rows: widen with empty cells on either side
            while columns.len() < record.len() {
                columns.push(vec![String::new(); nrows]);
            }
            for (j, column) in columns.iter_mut().enumerate() {
                column.push(record.get(j).unwrap_or("").to_string());
            }
            nrows += 1;
        }

        let header = header.unwrap_or_default();
        let mut names: Vec<String> = Vec::new();
        let mut vars = Vec::with_capacity(columns.len());
        for (j, cells) in columns.drain(..).enumerate() {
            let name = variable_name(header.get(j).map_or("", String::as_str), j, &names);
            names.push(name.clone());
            let mut var = Variable::new(name, Self::infer(cells));
            // keep a header that had to be renamed as the variable label
            if let Some(raw) = header.get(j) {
                if raw.trim() != var.name && !raw.trim().is_empty() {
                    var.label = Some(raw.trim().to_string());
                }
            }
            vars.push(var);
        }
        tracing::debug!(path = %path.display(), rows = nrows, cols = vars.len(), "parsed delimited file");
        let mut ds = Dataset::from_variables(vars)?;
        ds.mark_saved();
        Ok(ds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Value;

    fn read(text: &str) -> Dataset {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.csv");
        std::fs::write(&path, text).unwrap();
        CsvCodec::default().read(&path).unwrap()
    }

    #[test]
    fn numeric_columns_are_inferred() {
        let ds = read("id,score,name\n1,2.5,ann\n2,.,bob\n3,,\n");
        assert_eq!(ds.nobs(), 3);
        assert!(ds.require("id").unwrap().is_numeric());
        assert_eq!(ds.value("score", 1).unwrap(), Value::Missing);
        assert_eq!(ds.value("name", 2).unwrap(), Value::Str(String::new()));
    }

    #[test]
    fn header_names_are_cleaned() {
        let ds = read("first name,1st,first name\na,b,c\n");
        let names: Vec<&str> = ds.names().collect();
        assert_eq!(names, vec!["first_name", "_1st", "first_name2"]);
        assert_eq!(ds.require("first_name").unwrap().label.as_deref(), Some("first name"));
    }

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let ds = Dataset::from_variables(vec![
            Variable::numeric("x", vec![Some(1.0), None]),
            Variable::string("s", vec!["a,b".into(), "c".into()]),
        ])
        .unwrap();
        CsvCodec::default().write(&ds, &path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "x,s\n1,\"a,b\"\n,c\n");
        let back = CsvCodec::default().read(&path).unwrap();
        assert_eq!(back.value("x", 1).unwrap(), Value::Missing);
        assert_eq!(back.value("s", 0).unwrap(), Value::Str("a,b".into()));
    }
}
