//! Stata `.dta` files, formats 117-119
//!
//! Writing always produces format 118, little-endian: numeric variables as
//! `double`, strings as `str#`. Reading accepts every numeric storage type,
//! `str#` and `strL`, and either byte order.

use super::{Codec, CodecError};
use crate::dataset::{Column, Dataset, LabelSet, Variable};
use chrono::Local;
use std::collections::HashMap;
use std::path::Path;

const WRITE_RELEASE: u16 = 118;
const MAX_STR: usize = 2045;

const T_STRL: u16 = 32768;
const T_DOUBLE: u16 = 65526;
const T_FLOAT: u16 = 65527;
const T_LONG: u16 = 65528;
const T_INT: u16 = 65529;
const T_BYTE: u16 = 65530;

/// Bit pattern of `.` as a double (2^1023); anything at or above is missing
const MISSING_DOUBLE: u64 = 0x7fe0_0000_0000_0000;

/// Field widths that differ between releases
#[derive(Debug, Clone, Copy)]
struct Layout {
    release: u16,
    name_len: usize,
    format_len: usize,
    label_len: usize,
}

impl Layout {
    fn for_release(release: u16) -> Option<Layout> {
        match release {
            117 => Some(Layout { release, name_len: 33, format_len: 49, label_len: 81 }),
            118 | 119 => Some(Layout { release, name_len: 129, format_len: 57, label_len: 321 }),
            _ => None,
        }
    }
}

pub struct DtaCodec;

impl Codec for DtaCodec {
    fn read(&self, path: &Path) -> Result<Dataset, CodecError> {
        let bytes = std::fs::read(path).map_err(|e| CodecError::open(path, e))?;
        let mut reader = Reader { data: &bytes, pos: 0, big_endian: false, path };
        reader.dataset()
    }

    fn write(&self, data: &Dataset, path: &Path) -> Result<(), CodecError> {
        let bytes = encode(data).map_err(|reason| CodecError::format(path, reason))?;
        std::fs::write(path, bytes)?;
        Ok(())
    }
}

// Reading

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    big_endian: bool,
    path: &'a Path,
}

impl<'a> Reader<'a> {
    fn fail(&self, reason: impl Into<String>) -> CodecError {
        CodecError::format(self.path, format!("{} (offset {})", reason.into(), self.pos))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let end = self.pos.checked_add(n).filter(|&e| e <= self.data.len());
        match end {
            Some(end) => {
                let slice = &self.data[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(self.fail("unexpected end of file")),
        }
    }

    fn peek(&self, tag: &str) -> bool {
        self.data[self.pos..].starts_with(tag.as_bytes())
    }

    fn expect(&mut self, tag: &str) -> Result<(), CodecError> {
        if self.peek(tag) {
            self.pos += tag.len();
            Ok(())
        } else {
            Err(self.fail(format!("expected {}", tag)))
        }
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, CodecError> {
        let b = self.array::<2>()?;
        Ok(if self.big_endian { u16::from_be_bytes(b) } else { u16::from_le_bytes(b) })
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        let b = self.array::<4>()?;
        Ok(if self.big_endian { u32::from_be_bytes(b) } else { u32::from_le_bytes(b) })
    }

    fn u64(&mut self) -> Result<u64, CodecError> {
        let b = self.array::<8>()?;
        Ok(if self.big_endian { u64::from_be_bytes(b) } else { u64::from_le_bytes(b) })
    }

    fn text(&mut self, n: usize) -> Result<String, CodecError> {
        Ok(c_string(self.take(n)?))
    }

    fn dataset(&mut self) -> Result<Dataset, CodecError> {
        self.expect("<stata_dta><header><release>")?;
        let release: u16 = std::str::from_utf8(self.take(3)?)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| self.fail("bad release"))?;
        let layout = Layout::for_release(release)
            .ok_or_else(|| self.fail(format!("unsupported .dta release {}", release)))?;
        self.expect("</release><byteorder>")?;
        self.big_endian = match self.take(3)? {
            b"MSF" => true,
            b"LSF" => false,
            _ => return Err(self.fail("bad byte order")),
        };
        self.expect("</byteorder><K>")?;
        let nvars = if release == 119 { self.u32()? as usize } else { self.u16()? as usize };
        self.expect("</K><N>")?;
        let nobs = if release == 117 { self.u32()? as usize } else { self.u64()? as usize };
        self.expect("</N><label>")?;
        let label_len = if release == 117 { self.u8()? as usize } else { self.u16()? as usize };
        self.take(label_len)?;
        self.expect("</label><timestamp>")?;
        let ts_len = self.u8()? as usize;
        self.take(ts_len)?;
        self.expect("</timestamp></header>")?;

        self.expect("<map>")?;
        self.take(14 * 8)?;
        self.expect("</map>")?;

        self.expect("<variable_types>")?;
        let types = (0..nvars).map(|_| self.u16()).collect::<Result<Vec<_>, _>>()?;
        self.expect("</variable_types>")?;

        self.expect("<varnames>")?;
        let names = (0..nvars).map(|_| self.text(layout.name_len)).collect::<Result<Vec<_>, _>>()?;
        self.expect("</varnames>")?;

        self.expect("<sortlist>")?;
        let mut sort = Vec::new();
        for _ in 0..=nvars {
            let k = if release == 119 { self.u32()? as usize } else { self.u16()? as usize };
            if k > 0 {
                sort.push(k);
            }
        }
        self.expect("</sortlist>")?;

        self.expect("<formats>")?;
        let formats = (0..nvars).map(|_| self.text(layout.format_len)).collect::<Result<Vec<_>, _>>()?;
        self.expect("</formats>")?;

        self.expect("<value_label_names>")?;
        let value_labels = (0..nvars).map(|_| self.text(layout.name_len)).collect::<Result<Vec<_>, _>>()?;
        self.expect("</value_label_names>")?;

        self.expect("<variable_labels>")?;
        let labels = (0..nvars).map(|_| self.text(layout.label_len)).collect::<Result<Vec<_>, _>>()?;
        self.expect("</variable_labels>")?;

        self.expect("<characteristics>")?;
        while self.peek("<ch>") {
            self.expect("<ch>")?;
            let len = self.u32()? as usize;
            self.take(len)?;
            self.expect("</ch>")?;
        }
        self.expect("</characteristics>")?;

        // data is read raw first; strL references resolve after <strls>
        self.expect("<data>")?;
        let mut columns: Vec<RawColumn> = types
            .iter()
            .map(|&t| RawColumn::for_type(t).ok_or_else(|| self.fail(format!("unknown variable type {}", t))))
            .collect::<Result<_, _>>()?;
        for _ in 0..nobs {
            for (col, &t) in columns.iter_mut().zip(&types) {
                self.cell(col, t, layout)?;
            }
        }
        self.expect("</data>")?;

        self.expect("<strls>")?;
        let mut strls: HashMap<(u64, u64), String> = HashMap::new();
        while self.peek("GSO") {
            self.expect("GSO")?;
            let v = self.u32()? as u64;
            let o = if release == 117 { self.u32()? as u64 } else { self.u64()? };
            let kind = self.u8()?;
            let len = self.u32()? as usize;
            let bytes = self.take(len)?;
            // type 130 is a null-terminated ASCII string
            let text = if kind == 130 { c_string(bytes) } else { String::from_utf8_lossy(bytes).into_owned() };
            strls.insert((v, o), text);
        }
        self.expect("</strls>")?;

        self.expect("<value_labels>")?;
        let mut sets = Vec::new();
        while self.peek("<lbl>") {
            self.expect("<lbl>")?;
            let len = self.u32()? as usize;
            let name = self.text(layout.name_len)?;
            self.take(3)?;
            let table = self.take(len)?;
            sets.push((name, self.label_table(table)?));
            self.expect("</lbl>")?;
        }
        self.expect("</value_labels>")?;
        self.expect("</stata_dta>")?;

        let mut vars = Vec::with_capacity(nvars);
        for (i, raw) in columns.into_iter().enumerate() {
            let data = match raw {
                RawColumn::Numeric(v) => Column::Numeric(v),
                RawColumn::Str(v) => Column::Str(v),
                RawColumn::StrL(refs) => Column::Str(
                    refs.into_iter()
                        .map(|r| if r == (0, 0) { String::new() } else { strls.get(&r).cloned().unwrap_or_default() })
                        .collect(),
                ),
            };
            let mut var = Variable::new(names[i].clone(), data);
            if !formats[i].is_empty() {
                var.format = formats[i].clone();
            }
            var.label = Some(labels[i].clone()).filter(|s| !s.is_empty());
            var.value_label = Some(value_labels[i].clone()).filter(|s| !s.is_empty());
            vars.push(var);
        }
        let mut ds = Dataset::from_variables(vars)?;
        for (name, set) in sets {
            ds.insert_label_set(name, set);
        }
        let sort_names = sort.iter().filter_map(|&k| names.get(k - 1).cloned()).collect();
        ds.restore_sort_marker(sort_names);
        ds.mark_saved();
        Ok(ds)
    }

    fn cell(&mut self, col: &mut RawColumn, t: u16, layout: Layout) -> Result<(), CodecError> {
        match col {
            RawColumn::Numeric(v) => {
                let value = match t {
                    T_BYTE => {
                        let x = self.u8()? as i8;
                        (x <= 100).then_some(x as f64)
                    }
                    T_INT => {
                        let x = self.u16()? as i16;
                        (x <= 32740).then_some(x as f64)
                    }
                    T_LONG => {
                        let x = self.u32()? as i32;
                        (x <= 2_147_483_620).then_some(x as f64)
                    }
                    T_FLOAT => {
                        let x = f32::from_bits(self.u32()?);
                        (x.is_finite() && x <= 1.701_411_7e38).then_some(x as f64)
                    }
                    _ => {
                        let x = f64::from_bits(self.u64()?);
                        (x.is_finite() && x < f64::from_bits(MISSING_DOUBLE)).then_some(x)
                    }
                };
                v.push(value);
            }
            RawColumn::Str(v) => {
                let s = self.text(t as usize)?;
                v.push(s);
            }
            RawColumn::StrL(v) => {
                let reference = if layout.release == 117 {
                    (self.u32()? as u64, self.u32()? as u64)
                } else {
                    // 2-byte variable number and 6-byte observation number
                    let raw = self.u64()?;
                    if self.big_endian {
                        (raw >> 48, raw & 0xffff_ffff_ffff)
                    } else {
                        (raw & 0xffff, raw >> 16)
                    }
                };
                v.push(reference);
            }
        }
        Ok(())
    }

    fn label_table(&self, table: &[u8]) -> Result<LabelSet, CodecError> {
        let mut sub = Reader { data: table, pos: 0, big_endian: self.big_endian, path: self.path };
        let n = sub.u32()? as usize;
        let text_len = sub.u32()? as usize;
        let offsets = (0..n).map(|_| sub.u32()).collect::<Result<Vec<_>, _>>()?;
        let values = (0..n).map(|_| sub.u32().map(|v| v as i32)).collect::<Result<Vec<_>, _>>()?;
        let text = sub.take(text_len)?;
        let mut set = LabelSet::new();
        for (off, value) in offsets.into_iter().zip(values) {
            let start = off as usize;
            if start > text.len() {
                return Err(self.fail("value label offset out of range"));
            }
            set.insert(value as i64, c_string(&text[start..]));
        }
        Ok(set)
    }
}

enum RawColumn {
    Numeric(Vec<Option<f64>>),
    Str(Vec<String>),
    StrL(Vec<(u64, u64)>),
}

impl RawColumn {
    fn for_type(t: u16) -> Option<RawColumn> {
        match t {
            1..=2045 => Some(RawColumn::Str(Vec::new())),
            T_STRL => Some(RawColumn::StrL(Vec::new())),
            T_DOUBLE | T_FLOAT | T_LONG | T_INT | T_BYTE => Some(RawColumn::Numeric(Vec::new())),
            _ => None,
        }
    }
}

/// Text up to the first NUL
fn c_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

// Writing

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn tag(&mut self, tag: &str) {
        self.buf.extend_from_slice(tag.as_bytes());
    }

    fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// `text` NUL-padded to exactly `width` bytes, cut at a char boundary
    fn fixed(&mut self, text: &str, width: usize) {
        let mut end = text.len().min(width.saturating_sub(1));
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        self.buf.extend_from_slice(&text.as_bytes()[..end]);
        self.buf.resize(self.buf.len() + width - end, 0);
    }

    fn pos(&self) -> u64 {
        self.buf.len() as u64
    }
}

fn label_table(set: &LabelSet) -> Vec<u8> {
    let mut offsets = Vec::new();
    let mut values = Vec::new();
    let mut text = Vec::new();
    for (code, label) in set.iter() {
        offsets.push(text.len() as u32);
        values.push(code as i32);
        text.extend_from_slice(label.as_bytes());
        text.push(0);
    }
    let mut out = Vec::new();
    out.extend_from_slice(&(offsets.len() as u32).to_le_bytes());
    out.extend_from_slice(&(text.len() as u32).to_le_bytes());
    for o in offsets {
        out.extend_from_slice(&o.to_le_bytes());
    }
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out.extend_from_slice(&text);
    out
}

fn encode(data: &Dataset) -> Result<Vec<u8>, String> {
    let layout = Layout { release: WRITE_RELEASE, name_len: 129, format_len: 57, label_len: 321 };
    let vars = data.variables();
    if vars.len() > u16::MAX as usize {
        return Err("too many variables for format 118".into());
    }

    let widths: Vec<Option<usize>> = vars
        .iter()
        .map(|v| match &v.data {
            Column::Numeric(_) => Ok(None),
            Column::Str(s) => {
                let w = s.iter().map(String::len).max().unwrap_or(0).max(1);
                if w > MAX_STR {
                    Err(format!("{}: strings longer than {} bytes are not supported", v.name, MAX_STR))
                } else {
                    Ok(Some(w))
                }
            }
        })
        .collect::<Result<_, _>>()?;

    let mut w = Writer { buf: Vec::new() };
    let mut map = [0u64; 14];

    w.tag("<stata_dta><header><release>");
    w.tag(&layout.release.to_string());
    w.tag("</release><byteorder>LSF</byteorder><K>");
    w.u16(vars.len() as u16);
    w.tag("</K><N>");
    w.u64(data.nobs() as u64);
    w.tag("</N><label>");
    w.u16(0);
    w.tag("</label><timestamp>");
    let stamp = Local::now().format("%d %b %Y %H:%M").to_string();
    w.buf.push(stamp.len() as u8);
    w.tag(&stamp);
    w.tag("</timestamp></header>");

    map[1] = w.pos();
    w.tag("<map>");
    let map_at = w.buf.len();
    w.buf.resize(map_at + 14 * 8, 0);
    w.tag("</map>");

    map[2] = w.pos();
    w.tag("<variable_types>");
    for width in &widths {
        w.u16(width.map_or(T_DOUBLE, |n| n as u16));
    }
    w.tag("</variable_types>");

    map[3] = w.pos();
    w.tag("<varnames>");
    for v in vars {
        w.fixed(&v.name, layout.name_len);
    }
    w.tag("</varnames>");

    map[4] = w.pos();
    w.tag("<sortlist>");
    let sort: Vec<u16> = data
        .sorted_by()
        .iter()
        .filter_map(|s| data.position(s).map(|p| p as u16 + 1))
        .collect();
    for i in 0..=vars.len() {
        w.u16(sort.get(i).copied().unwrap_or(0));
    }
    w.tag("</sortlist>");

    map[5] = w.pos();
    w.tag("<formats>");
    for v in vars {
        w.fixed(&v.format, layout.format_len);
    }
    w.tag("</formats>");

    map[6] = w.pos();
    w.tag("<value_label_names>");
    for v in vars {
        w.fixed(v.value_label.as_deref().unwrap_or(""), layout.name_len);
    }
    w.tag("</value_label_names>");

    map[7] = w.pos();
    w.tag("<variable_labels>");
    for v in vars {
        w.fixed(v.label.as_deref().unwrap_or(""), layout.label_len);
    }
    w.tag("</variable_labels>");

    map[8] = w.pos();
    w.tag("<characteristics></characteristics>");

    map[9] = w.pos();
    w.tag("<data>");
    for row in 0..data.nobs() {
        for (v, width) in vars.iter().zip(&widths) {
            match (&v.data, width) {
                (Column::Numeric(values), _) => {
                    w.u64(values[row].filter(|x| x.is_finite()).map_or(MISSING_DOUBLE, f64::to_bits))
                }
                (Column::Str(values), n) => {
                    let bytes = values[row].as_bytes();
                    w.buf.extend_from_slice(bytes);
                    w.buf.resize(w.buf.len() + n.unwrap_or(1) - bytes.len(), 0);
                }
            }
        }
    }
    w.tag("</data>");

    map[10] = w.pos();
    w.tag("<strls></strls>");

    map[11] = w.pos();
    w.tag("<value_labels>");
    for (name, set) in data.label_sets() {
        let table = label_table(set);
        w.tag("<lbl>");
        w.u32(table.len() as u32);
        w.fixed(name, layout.name_len);
        w.buf.extend_from_slice(&[0, 0, 0]);
        w.buf.extend_from_slice(&table);
        w.tag("</lbl>");
    }
    w.tag("</value_labels>");

    map[12] = w.pos();
    w.tag("</stata_dta>");
    map[13] = w.pos();

    for (i, offset) in map.iter().enumerate() {
        let at = map_at + i * 8;
        w.buf[at..at + 8].copy_from_slice(&offset.to_le_bytes());
    }
    Ok(w.buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Dataset {
        let mut ds = Dataset::from_variables(vec![
            Variable::numeric("id", vec![Some(1.0), Some(2.0), Some(3.0)]).with_label("Identifier"),
            Variable::numeric("x", vec![Some(1.5), None, Some(-3.25)]),
            Variable::string("name", vec!["ann".into(), "".into(), "bé".into()]),
        ])
        .unwrap();
        ds.define_label("yesno", vec![(0, "no".into()), (1, "yes".into())], false).unwrap();
        ds.attach_label("id", Some("yesno")).unwrap();
        ds.sort_by(&["id".to_string()]).unwrap();
        ds
    }

    #[test]
    fn write_then_read_reproduces_the_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.dta");
        let ds = sample();
        DtaCodec.write(&ds, &path).unwrap();
        let back = DtaCodec.read(&path).unwrap();
        assert_eq!(back.nobs(), 3);
        assert_eq!(back.names().collect::<Vec<_>>(), vec!["id", "x", "name"]);
        assert_eq!(back.variables(), ds.variables());
        assert_eq!(back.label_set("yesno").unwrap().get(1), Some("yes"));
        assert_eq!(back.sorted_by(), &["id".to_string()]);
        assert!(!back.is_changed());
    }

    #[test]
    fn header_and_map_are_well_formed() {
        let bytes = encode(&sample()).unwrap();
        assert!(bytes.starts_with(b"<stata_dta><header><release>118</release><byteorder>LSF"));
        assert!(bytes.ends_with(b"</stata_dta>"));
        let map_at = bytes.windows(5).position(|w| w == b"<map>").unwrap() + 5;
        let last = u64::from_le_bytes(bytes[map_at + 13 * 8..map_at + 14 * 8].try_into().unwrap());
        assert_eq!(last as usize, bytes.len());
        let data_at = u64::from_le_bytes(bytes[map_at + 9 * 8..map_at + 10 * 8].try_into().unwrap()) as usize;
        assert!(bytes[data_at..].starts_with(b"<data>"));
    }

    #[test]
    fn truncated_file_is_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.dta");
        let bytes = encode(&sample()).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
        assert!(matches!(DtaCodec.read(&path), Err(CodecError::Format { .. })));
    }
}
