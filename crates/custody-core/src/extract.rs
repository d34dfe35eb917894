//! Row extraction from delimited text files.
//!
//! Turns the stored bytes of a tabular [`RawFile`] into ordered
//! [`ParsedRecord`]s. Encoding and delimiter are sniffed from the content.
//!
//! Row numbers are physical: `row_number` is the line on which a record
//! starts, counted from the line after the header. Blank lines are skipped
//! but still consume a number, so "row 42" always points at the same place
//! in the original file. A malformed row is skipped and reported; the file
//! fails only when no row at all can be parsed.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use crate::error::{CustodyError, Result};
use crate::models::{new_id, timestamp_now, ParsedRecord, RawFile};
use crate::normalize::normalize_column_name;
use crate::number::parse_number;

const DELIMITER_CANDIDATES: &[char] = &[';', ',', '\t', '|'];
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TextEncoding {
    Utf8,
    Windows1252,
}

impl TextEncoding {
    pub fn as_str(self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Windows1252 => "windows-1252",
        }
    }
}

/// A data row that could not be turned into a record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedRow {
    pub row_number: Option<u64>,
    pub reason: String,
}

/// Result of extracting one file.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub delimiter: char,
    pub encoding: TextEncoding,
    /// Column names, disambiguated, in file order.
    pub headers: Vec<String>,
    pub records: Vec<ParsedRecord>,
    /// Lines after the header line.
    pub physical_rows: u64,
    pub skipped: Vec<SkippedRow>,
}

impl Extraction {
    /// Values of one column across all records, in row order.
    pub fn column_values(&self, header: &str) -> Vec<&str> {
        self.records
            .iter()
            .map(|r| r.data.get(header).map(String::as_str).unwrap_or(""))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct RowExtractor {
    delimiters: Vec<char>,
}

impl Default for RowExtractor {
    fn default() -> Self {
        Self {
            delimiters: DELIMITER_CANDIDATES.to_vec(),
        }
    }
}

impl RowExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extract(&self, raw_file: &RawFile, bytes: &[u8]) -> Result<Extraction> {
        if !raw_file.format.is_tabular() {
            return Err(CustodyError::UnsupportedFormat(
                raw_file.format.as_str().to_string(),
            ));
        }

        let (text, encoding) = decode(bytes);
        let delimiter = self.sniff_delimiter(&text);
        let delimiter_byte = u8::try_from(delimiter).map_err(|_| {
            CustodyError::InvalidInput(format!("delimiter {:?} is not a single byte", delimiter))
        })?;

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(delimiter_byte)
            .from_reader(text.as_bytes());

        let lines = LineIndex::new(&text);
        let mut rows = reader.records();
        let mut header_line = None;
        let mut raw_headers = Vec::new();
        let mut skipped = Vec::new();

        for result in rows.by_ref() {
            match result {
                Ok(record) if record.iter().all(|f| f.trim().is_empty()) => continue,
                Ok(record) => {
                    header_line = record.position().map(|p| lines.line_at(p.byte()));
                    raw_headers = record.iter().map(str::to_string).collect();
                    break;
                }
                Err(e) => {
                    return Err(CustodyError::ParseFailure {
                        filename: format!("{} (unreadable header: {})", raw_file.filename, e),
                        skipped: 0,
                    })
                }
            }
        }
        let Some(header_line) = header_line else {
            return Err(CustodyError::ParseFailure {
                filename: raw_file.filename.clone(),
                skipped: 0,
            });
        };

        let headers = disambiguate_headers(&raw_headers);
        let normalized_keys = normalized_keys(&headers);
        let created_at = timestamp_now();
        let mut records = Vec::new();

        for result in rows {
            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    let row_number = e
                        .position()
                        .map(|p| lines.line_at(p.byte()).saturating_sub(header_line));
                    tracing::warn!(file = %raw_file.filename, ?row_number, error = %e, "skipping unreadable row");
                    skipped.push(SkippedRow {
                        row_number,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            let row_number = record
                .position()
                .map(|p| lines.line_at(p.byte()).saturating_sub(header_line))
                .unwrap_or_default();

            if record.iter().all(|f| f.trim().is_empty()) {
                continue;
            }
            if record.len() > headers.len()
                && record.iter().skip(headers.len()).any(|f| !f.trim().is_empty())
            {
                let reason = format!(
                    "row has {} fields but header has {}",
                    record.len(),
                    headers.len()
                );
                tracing::warn!(file = %raw_file.filename, row_number, %reason, "skipping malformed row");
                skipped.push(SkippedRow {
                    row_number: Some(row_number),
                    reason,
                });
                continue;
            }

            let mut data = IndexMap::with_capacity(headers.len());
            let mut normalized_data = IndexMap::with_capacity(headers.len());
            for (i, header) in headers.iter().enumerate() {
                let value = record.get(i).unwrap_or("").trim().to_string();
                normalized_data.insert(normalized_keys[i].clone(), normalized_value(&value));
                data.insert(header.clone(), value);
            }
            let text_content = text_content(&data);

            records.push(ParsedRecord {
                id: new_id(),
                raw_file_id: raw_file.id.clone(),
                row_number,
                data,
                normalized_data,
                text_content,
                created_at,
            });
        }

        let physical_rows = lines.count().saturating_sub(header_line);

        if records.is_empty() {
            return Err(CustodyError::ParseFailure {
                filename: raw_file.filename.clone(),
                skipped: skipped.len() as u64,
            });
        }

        tracing::debug!(
            file = %raw_file.filename,
            delimiter = ?delimiter,
            encoding = encoding.as_str(),
            records = records.len(),
            skipped = skipped.len(),
            "extracted rows"
        );

        Ok(Extraction {
            delimiter,
            encoding,
            headers,
            records,
            physical_rows,
            skipped,
        })
    }

    /// Pick the candidate that occurs most often, outside quotes, on the
    /// first non-blank line. Ties go to the earlier candidate; no hit means `,`.
    pub fn sniff_delimiter(&self, text: &str) -> char {
        let Some(line) = text
            .split(|c: char| c == '\n' || c == '\r')
            .find(|l| !l.trim().is_empty())
        else {
            return ',';
        };
        let mut counts = vec![0usize; self.delimiters.len()];
        let mut in_quotes = false;
        for c in line.chars() {
            if c == '"' {
                in_quotes = !in_quotes;
            } else if !in_quotes {
                if let Some(i) = self.delimiters.iter().position(|d| *d == c) {
                    counts[i] += 1;
                }
            }
        }
        let mut best: Option<(usize, usize)> = None;
        for (i, &n) in counts.iter().enumerate() {
            if n > 0 && best.map_or(true, |(_, top)| n > top) {
                best = Some((i, n));
            }
        }
        best.map(|(i, _)| self.delimiters[i]).unwrap_or(',')
    }
}

/// Windows-1252 characters for bytes 0x80..=0x9F. The five unassigned
/// bytes keep their Latin-1 control character.
const WINDOWS_1252_HIGH: [char; 32] = [
    '\u{20AC}', '\u{0081}', '\u{201A}', '\u{0192}', '\u{201E}', '\u{2026}', '\u{2020}', '\u{2021}',
    '\u{02C6}', '\u{2030}', '\u{0160}', '\u{2039}', '\u{0152}', '\u{008D}', '\u{017D}', '\u{008F}',
    '\u{0090}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '\u{2022}', '\u{2013}', '\u{2014}',
    '\u{02DC}', '\u{2122}', '\u{0161}', '\u{203A}', '\u{0153}', '\u{009D}', '\u{017E}', '\u{0178}',
];

/// UTF-8 (BOM stripped) when valid, otherwise Windows-1252.
pub fn decode(bytes: &[u8]) -> (String, TextEncoding) {
    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    match std::str::from_utf8(body) {
        Ok(s) => (s.to_string(), TextEncoding::Utf8),
        Err(_) => (
            body.iter().map(|&b| windows_1252_char(b)).collect(),
            TextEncoding::Windows1252,
        ),
    }
}

fn windows_1252_char(b: u8) -> char {
    match b {
        0x80..=0x9F => WINDOWS_1252_HIGH[usize::from(b - 0x80)],
        _ => char::from(b),
    }
}

/// `"name: value | name: value"` over non-empty values in column order.
pub fn text_content(data: &IndexMap<String, String>) -> String {
    data.iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| format!("{}: {}", k, v))
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Make every header distinct, case-insensitively. Empty headers become
/// `column_N`; repeats get a ` (2)`, ` (3)`, … suffix.
fn disambiguate_headers(raw: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(raw.len());
    for (i, name) in raw.iter().enumerate() {
        let base = if name.trim().is_empty() {
            format!("column_{}", i + 1)
        } else {
            name.clone()
        };
        let mut candidate = base.clone();
        let mut n = 2;
        while !seen.insert(candidate.trim().to_lowercase()) {
            candidate = format!("{} ({})", base, n);
            n += 1;
        }
        out.push(candidate);
    }
    out
}

fn normalized_keys(headers: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    headers
        .iter()
        .enumerate()
        .map(|(i, h)| {
            let base = match normalize_column_name(h) {
                n if n.is_empty() => format!("column_{}", i + 1),
                n => n,
            };
            let mut key = base.clone();
            let mut n = 2;
            while !seen.insert(key.clone()) {
                key = format!("{}_{}", base, n);
                n += 1;
            }
            key
        })
        .collect()
}

fn normalized_value(value: &str) -> Value {
    if value.is_empty() {
        return Value::Null;
    }
    match parse_number(value) {
        Some(n) if n.fract() == 0.0 && n.abs() < i64::MAX as f64 => Value::from(n as i64),
        Some(n) => serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(value.to_string())),
        None => Value::String(value.to_string()),
    }
}

/// Maps byte offsets to 1-based physical line numbers.
///
/// Line breaks are counted the way the csv reader terminates records:
/// `\r\n`, `\n` and a lone `\r` each end one line. The reader reports a
/// record's position as the point where it began reading, which sits before
/// any blank lines it skipped, so lookup steps over those breaks first.
struct LineIndex<'a> {
    bytes: &'a [u8],
    /// Offset of the last byte of each line break.
    breaks: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    fn new(text: &'a str) -> Self {
        let bytes = text.as_bytes();
        let mut breaks = Vec::new();
        for (i, &b) in bytes.iter().enumerate() {
            match b {
                b'\n' => breaks.push(i),
                b'\r' if bytes.get(i + 1) != Some(&b'\n') => breaks.push(i),
                _ => {}
            }
        }
        Self { bytes, breaks }
    }

    fn line_at(&self, byte: u64) -> u64 {
        let mut start = byte as usize;
        while start < self.bytes.len() && matches!(self.bytes[start], b'\n' | b'\r') {
            start += 1;
        }
        self.breaks.partition_point(|&end| end < start) as u64 + 1
    }

    /// Number of lines, not counting an empty remainder after a final break.
    fn count(&self) -> u64 {
        let n = self.breaks.len() as u64;
        match self.breaks.last() {
            Some(&last) if last + 1 == self.bytes.len() => n,
            _ if self.bytes.is_empty() => 0,
            _ => n + 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FileFormat, FileStatus, StorageLocation};

    fn raw_file(name: &str) -> RawFile {
        RawFile {
            id: "raw-1".into(),
            source_type: "test".into(),
            source_identifier: None,
            filename: name.into(),
            format: FileFormat::from_filename(name),
            size_bytes: 0,
            sha256: String::new(),
            md5: String::new(),
            metadata: Default::default(),
            storage: StorageLocation::Inline,
            status: FileStatus::Stored,
            error_message: None,
            created_at: timestamp_now(),
        }
    }

    #[test]
    fn test_extract_semicolon_file() {
        let bytes = "EDITAL N°;ORIGEM;VALOR\n10367;SEINF;1.234,56\n".as_bytes();
        let out = RowExtractor::new().extract(&raw_file("editais.csv"), bytes).unwrap();
        assert_eq!(out.delimiter, ';');
        assert_eq!(out.encoding, TextEncoding::Utf8);
        assert_eq!(out.records.len(), 1);
        let rec = &out.records[0];
        assert_eq!(rec.row_number, 1);
        assert_eq!(rec.data["EDITAL N°"], "10367");
        assert_eq!(rec.data["ORIGEM"], "SEINF");
        assert_eq!(rec.data["VALOR"], "1.234,56");
        assert_eq!(
            rec.text_content,
            "EDITAL N°: 10367 | ORIGEM: SEINF | VALOR: 1.234,56"
        );
        assert_eq!(rec.normalized_data["edital_n"], serde_json::json!(10367));
        assert_eq!(rec.normalized_data["valor"], serde_json::json!(1234.56));
    }

    #[test]
    fn test_blank_rows_keep_physical_numbering() {
        let bytes = b"a,b\n1,2\n\n3,4\n,\n5,6\n";
        let out = RowExtractor::new().extract(&raw_file("t.csv"), bytes).unwrap();
        let numbers: Vec<u64> = out.records.iter().map(|r| r.row_number).collect();
        assert_eq!(numbers, vec![1, 3, 5]);
        assert_eq!(out.physical_rows, 5);
        assert!(out.skipped.is_empty());
    }

    #[test]
    fn test_carriage_return_line_endings() {
        let out = RowExtractor::new()
            .extract(&raw_file("t.csv"), b"a;b\r1;2\r3;4\r5;6\r")
            .unwrap();
        let numbers: Vec<u64> = out.records.iter().map(|r| r.row_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(out.physical_rows, 3);
        assert_eq!(out.records[2].data["b"], "6");
    }

    #[test]
    fn test_crlf_line_endings_with_blank_row() {
        let out = RowExtractor::new()
            .extract(&raw_file("t.csv"), b"a,b\r\n1,2\r\n\r\n3,4\r\n")
            .unwrap();
        let numbers: Vec<u64> = out.records.iter().map(|r| r.row_number).collect();
        assert_eq!(numbers, vec![1, 3]);
        assert_eq!(out.physical_rows, 3);
        assert_eq!(out.records[1].data["b"], "4");
    }

    #[test]
    fn test_overlong_row_is_skipped_and_counted() {
        let bytes = b"a,b\n1,2\n3,4,5\n6,7\n";
        let out = RowExtractor::new().extract(&raw_file("t.csv"), bytes).unwrap();
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.skipped.len(), 1);
        assert_eq!(out.skipped[0].row_number, Some(2));
        assert_eq!(out.records[1].row_number, 3);
    }

    #[test]
    fn test_short_rows_are_padded_and_trailing_delimiters_tolerated() {
        let bytes = b"a;b;c\n1;2\n4;5;6;\n";
        let out = RowExtractor::new().extract(&raw_file("t.csv"), bytes).unwrap();
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.records[0].data["c"], "");
        assert_eq!(out.records[0].text_content, "a: 1 | b: 2");
        assert_eq!(out.records[1].data["c"], "6");
    }

    #[test]
    fn test_header_only_is_parse_failure() {
        let err = RowExtractor::new()
            .extract(&raw_file("t.csv"), b"a,b\n\n")
            .unwrap_err();
        assert!(matches!(err, CustodyError::ParseFailure { .. }));
    }

    #[test]
    fn test_non_tabular_format_is_rejected() {
        let err = RowExtractor::new()
            .extract(&raw_file("scan.pdf"), b"%PDF-1.4")
            .unwrap_err();
        assert!(matches!(err, CustodyError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_windows_1252_and_bom() {
        let legacy = b"ORG\xC3O;VALOR\nSME;10\n";
        let out = RowExtractor::new().extract(&raw_file("t.csv"), legacy).unwrap();
        assert_eq!(out.encoding, TextEncoding::Windows1252);
        assert_eq!(out.headers[0], "ORGÃO");

        let bom = b"\xEF\xBB\xBFa,b\n1,2\n";
        let out = RowExtractor::new().extract(&raw_file("t.csv"), bom).unwrap();
        assert_eq!(out.encoding, TextEncoding::Utf8);
        assert_eq!(out.headers, vec!["a", "b"]);
    }

    #[test]
    fn test_windows_1252_punctuation() {
        let (text, encoding) = decode(b"\x93Obra\x94 \x96 R\x80 10\x81");
        assert_eq!(encoding, TextEncoding::Windows1252);
        assert_eq!(text, "\u{201C}Obra\u{201D} \u{2013} R\u{20AC} 10\u{0081}");
    }

    #[test]
    fn test_duplicate_and_empty_headers() {
        let bytes = b"Nome,nome,,Nome\nx,y,z,w\n";
        let out = RowExtractor::new().extract(&raw_file("t.csv"), bytes).unwrap();
        assert_eq!(out.headers, vec!["Nome", "nome (2)", "column_3", "Nome (3)"]);
        assert_eq!(out.records[0].data["column_3"], "z");
    }

    #[test]
    fn test_sniff_delimiter_ignores_quoted() {
        let ex = RowExtractor::new();
        assert_eq!(ex.sniff_delimiter("\"a;b;c\",d,e\n"), ',');
        assert_eq!(ex.sniff_delimiter("a\tb\tc\n"), '\t');
        assert_eq!(ex.sniff_delimiter("a|b\n"), '|');
        assert_eq!(ex.sniff_delimiter("single\n"), ',');
    }

    #[test]
    fn test_quoted_multiline_field_keeps_start_line() {
        let bytes = b"a,b\n1,\"two\nlines\"\n3,4\n";
        let out = RowExtractor::new().extract(&raw_file("t.csv"), bytes).unwrap();
        assert_eq!(out.records[0].row_number, 1);
        assert_eq!(out.records[0].data["b"], "two\nlines");
        assert_eq!(out.records[1].row_number, 3);
    }
}
