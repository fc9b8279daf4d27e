//! Stata daily dates: days since 1960-01-01

use chrono::{Datelike, Local, NaiveDate};

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1960, 1, 1).unwrap_or_default()
}

pub fn days_from_date(date: NaiveDate) -> f64 {
    (date - epoch()).num_days() as f64
}

pub fn date_from_days(days: f64) -> Option<NaiveDate> {
    // beyond chrono's range
    if !days.is_finite() || days.abs() > 1.0e8 {
        return None;
    }
    epoch().checked_add_signed(chrono::Duration::days(days.floor() as i64))
}

/// `mdy(M, D, Y)`
pub(super) fn mdy(month: f64, day: f64, year: f64) -> Option<f64> {
    if [month, day, year].iter().any(|v| v.fract() != 0.0) {
        return None;
    }
    NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32).map(days_from_date)
}

/// `year()`, `month()`, `day()`, `dow()` (0 = Sunday), `doy()`
pub(super) fn component(name: &str, days: f64) -> Option<f64> {
    let date = date_from_days(days)?;
    let value = match name {
        "year" => date.year() as f64,
        "month" => date.month() as f64,
        "day" => date.day() as f64,
        "dow" => date.weekday().num_days_from_sunday() as f64,
        "doy" => date.ordinal() as f64,
        _ => return None,
    };
    Some(value)
}

pub(super) fn today() -> f64 {
    days_from_date(Local::now().date_naive())
}

fn month_from_name(name: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let lower = name.to_lowercase();
    let prefix = lower.get(..3)?;
    MONTHS.iter().position(|m| *m == prefix).map(|i| i as u32 + 1)
}

/// `date(s, mask)` with masks built from `D`, `M` and `Y` such as `"DMY"`
/// or `"YMD"`. Months may be numbers or names; years need four digits.
pub(super) fn parse_date(text: &str, mask: &str) -> Option<f64> {
    let mask: Vec<char> = mask
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if mask.len() != 3 {
        return None;
    }

    // split into digit runs and letter runs
    let mut parts: Vec<String> = Vec::new();
    let mut current = String::new();
    for c in text.trim().chars() {
        let same_kind = current
            .chars()
            .last()
            .map_or(true, |last| last.is_ascii_digit() == c.is_ascii_digit());
        if (!c.is_ascii_alphanumeric() || !same_kind) && !current.is_empty() {
            parts.push(std::mem::take(&mut current));
        }
        if c.is_ascii_alphanumeric() {
            current.push(c);
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    // compact form such as 20200115
    if parts.len() == 1 && parts[0].len() == 8 && parts[0].chars().all(|c| c.is_ascii_digit()) {
        let s = parts.remove(0);
        let mut offset = 0;
        for &slot in &mask {
            let width = if slot == 'Y' { 4 } else { 2 };
            parts.push(s[offset..offset + width].to_string());
            offset += width;
        }
    }
    if parts.len() != 3 {
        return None;
    }

    let (mut year, mut month, mut day) = (None, None, None);
    for (slot, part) in mask.iter().zip(&parts) {
        match slot {
            'Y' if part.len() == 4 => year = part.parse::<i32>().ok(),
            'M' => month = part.parse::<u32>().ok().or_else(|| month_from_name(part)),
            'D' => day = part.parse::<u32>().ok(),
            _ => return None,
        }
    }
    NaiveDate::from_ymd_opt(year?, month?, day?).map(days_from_date)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_is_day_zero() {
        assert_eq!(mdy(1.0, 1.0, 1960.0), Some(0.0));
        assert_eq!(mdy(1.0, 2.0, 1960.0), Some(1.0));
        assert_eq!(mdy(12.0, 31.0, 1959.0), Some(-1.0));
        assert_eq!(mdy(2.0, 30.0, 2020.0), None);
    }

    #[test]
    fn date_components() {
        let d = mdy(3.0, 15.0, 2021.0).unwrap();
        assert_eq!(component("year", d), Some(2021.0));
        assert_eq!(component("month", d), Some(3.0));
        assert_eq!(component("day", d), Some(15.0));
        // 15 March 2021 was a Monday
        assert_eq!(component("dow", d), Some(1.0));
        assert_eq!(component("doy", d), Some(74.0));
    }

    #[test]
    fn parse_date_masks() {
        let expected = mdy(1.0, 15.0, 2020.0);
        assert_eq!(parse_date("15jan2020", "DMY"), expected);
        assert_eq!(parse_date("2020-01-15", "YMD"), expected);
        assert_eq!(parse_date("1/15/2020", "MDY"), expected);
        assert_eq!(parse_date("20200115", "YMD"), expected);
        assert_eq!(parse_date("15jan20", "DMY"), None);
        assert_eq!(parse_date("garbage", "DMY"), None);
    }
}
