//! Locale-tolerant number and date parsing.
//!
//! Source files mix Brazilian (`R$ 1.234,56`) and international (`1234.56`)
//! notations, often within the same column. [`parse_number`] is the single
//! parser used for type inference, normalized record values, and money
//! detection. The rules, applied after stripping currency markers and
//! whitespace:
//!
//! | Input shape | Interpretation | Example |
//! |-------------|----------------|---------|
//! | comma and dot | dots group thousands, comma is decimal | `1.234,56` → 1234.56 |
//! | comma only | comma is decimal | `12,5` → 12.5 |
//! | several dots, 3-digit groups | dots group thousands | `1.234.567` → 1234567 |
//! | single dot | dot is decimal | `1234.56` → 1234.56 |
//! | `( … )` or leading `-` | negative | `(10,00)` → -10.0 |
//!
//! Anything else (including `1,234.56`, which contradicts the grouping
//! rule) is not a number.

use chrono::{NaiveDate, NaiveDateTime};

const CURRENCY_MARKERS: &[&str] = &["R$", "US$", "$", "€", "£"];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y", "%Y/%m/%d", "%d/%m/%y",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

/// Parse a number written in Brazilian or international notation.
pub fn parse_number(raw: &str) -> Option<f64> {
    let mut s = raw.trim();
    let mut negative = false;

    if let Some(inner) = s.strip_prefix('(').and_then(|r| r.strip_suffix(')')) {
        negative = true;
        s = inner.trim();
    }

    // Sign and currency marker may come in either order: "-R$ 5" / "R$ -5".
    loop {
        if let Some(rest) = s.strip_prefix('-') {
            negative = !negative;
            s = rest.trim_start();
            continue;
        }
        if let Some(rest) = s.strip_prefix('+') {
            s = rest.trim_start();
            continue;
        }
        if let Some(rest) = CURRENCY_MARKERS.iter().find_map(|m| s.strip_prefix(m)) {
            s = rest.trim_start();
            continue;
        }
        break;
    }
    if let Some(rest) = CURRENCY_MARKERS.iter().find_map(|m| s.strip_suffix(m)) {
        s = rest.trim_end();
    }

    let compact: String = s
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{a0}')
        .collect();
    if !compact.chars().any(|c| c.is_ascii_digit())
        || !compact
            .chars()
            .all(|c| c.is_ascii_digit() || c == '.' || c == ',')
    {
        return None;
    }

    let has_comma = compact.contains(',');
    let has_dot = compact.contains('.');
    let canonical = match (has_comma, has_dot) {
        (true, true) => {
            let (int_part, frac) = compact.rsplit_once(',')?;
            if int_part.contains(',') || !is_digits(frac) || !valid_grouping(int_part, '.') {
                return None;
            }
            format!("{}.{}", int_part.replace('.', ""), frac)
        }
        (true, false) => {
            let (int_part, frac) = compact.split_once(',')?;
            if frac.contains(',') || !is_digits(frac) {
                return None;
            }
            let int_part = if int_part.is_empty() { "0" } else { int_part };
            format!("{}.{}", int_part, frac)
        }
        (false, true) => {
            if compact.matches('.').count() == 1 {
                let (int_part, frac) = compact.split_once('.')?;
                if !is_digits(frac) {
                    return None;
                }
                let int_part = if int_part.is_empty() { "0" } else { int_part };
                format!("{}.{}", int_part, frac)
            } else if valid_grouping(&compact, '.') {
                compact.replace('.', "")
            } else {
                return None;
            }
        }
        (false, false) => compact,
    };

    let value: f64 = canonical.parse().ok()?;
    Some(if negative { -value } else { value })
}

/// Strict plain-number check: optional sign, digits, optional `.digits`.
///
/// Used where a value must look like a bare numeric id rather than a
/// formatted amount.
pub fn parse_plain_number(raw: &str) -> Option<f64> {
    let s = raw.trim();
    let unsigned = s.strip_prefix(['+', '-']).unwrap_or(s);
    let (int_part, frac) = match unsigned.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (unsigned, None),
    };
    if !is_digits(int_part) || frac.is_some_and(|f| !is_digits(f)) {
        return None;
    }
    s.parse().ok()
}

/// Parse a calendar date, day-first where ambiguous.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .map(|dt| dt.date())
        })
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

/// `1`, `12`, `123`, `1.234`, `12.345.678` are valid; `1234.567` and `1.23` are not.
fn valid_grouping(int_part: &str, sep: char) -> bool {
    let mut groups = int_part.split(sep);
    let first = groups.next().unwrap_or_default();
    if !is_digits(first) {
        return false;
    }
    let rest: Vec<&str> = groups.collect();
    if rest.is_empty() {
        return true;
    }
    first.len() <= 3 && rest.iter().all(|g| g.len() == 3 && is_digits(g))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Option<f64>, b: f64) -> bool {
        a.is_some_and(|a| (a - b).abs() < 1e-9)
    }

    #[test]
    fn test_brazilian_notation() {
        assert!(approx(parse_number("1.234,56"), 1234.56));
        assert!(approx(parse_number("R$ 1.234,56"), 1234.56));
        assert!(approx(parse_number("12.345.678,9"), 12345678.9));
        assert!(approx(parse_number("12,5"), 12.5));
    }

    #[test]
    fn test_international_notation() {
        assert!(approx(parse_number("1234.56"), 1234.56));
        assert!(approx(parse_number("10367"), 10367.0));
        assert!(approx(parse_number("US$ 99.90"), 99.9));
        assert!(approx(parse_number("1.234.567"), 1234567.0));
    }

    #[test]
    fn test_negative_forms() {
        assert!(approx(parse_number("(10,00)"), -10.0));
        assert!(approx(parse_number("-R$ 5,50"), -5.5));
        assert!(approx(parse_number("R$ -5,50"), -5.5));
    }

    #[test]
    fn test_rejects_contradictory_grouping() {
        assert_eq!(parse_number("1,234.56"), None);
        assert_eq!(parse_number("1.23,4"), None);
        assert_eq!(parse_number("1,2,3"), None);
        assert_eq!(parse_number("12.34.56"), None);
    }

    #[test]
    fn test_rejects_non_numbers() {
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("SEINF"), None);
        assert_eq!(parse_number("R$"), None);
        assert_eq!(parse_number("12/03/2024"), None);
        assert_eq!(parse_number("1e5"), None);
    }

    #[test]
    fn test_plain_number() {
        assert!(approx(parse_plain_number("10367"), 10367.0));
        assert!(approx(parse_plain_number("-3.5"), -3.5));
        assert_eq!(parse_plain_number("1.234,56"), None);
        assert_eq!(parse_plain_number("12a"), None);
        assert_eq!(parse_plain_number("."), None);
    }

    #[test]
    fn test_dates_day_first() {
        assert_eq!(parse_date("2024-03-15"), NaiveDate::from_ymd_opt(2024, 3, 15));
        assert_eq!(parse_date("05/03/2024"), NaiveDate::from_ymd_opt(2024, 3, 5));
        assert_eq!(parse_date("15.03.2024"), NaiveDate::from_ymd_opt(2024, 3, 15));
        assert_eq!(
            parse_date("2024-03-15 10:30:00"),
            NaiveDate::from_ymd_opt(2024, 3, 15)
        );
        assert_eq!(parse_date("10367"), None);
        assert_eq!(parse_date("31/02/2024"), None);
    }
}
