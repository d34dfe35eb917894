//! Schema discovery: column types, content signatures, and rendering.
//!
//! [`SchemaDiscoverer::discover`] is a pure function of an [`Extraction`];
//! persisting and activating the result is the job of
//! [`AliasIndex::publish`](crate::alias::AliasIndex::publish).

use std::collections::HashSet;
use std::sync::Arc;

use crate::alias::generate_aliases;
use crate::extract::Extraction;
use crate::heuristics::Heuristics;
use crate::models::{
    new_id, timestamp_now, ColumnInfo, ContentSignature, DataType, DiscoveryInfo, FileSchema,
    RawFile, SchemaStatus,
};
use crate::normalize::{display_name, normalize_column_name, value_tokens};
use crate::number::{parse_date, parse_number, parse_plain_number};

/// Bumped whenever inference rules change, so old schemas can be told apart.
pub const DISCOVERY_VERSION: u32 = 1;

#[derive(Debug, Clone)]
pub struct SchemaDiscoverer {
    heuristics: Arc<Heuristics>,
}

impl SchemaDiscoverer {
    pub fn new(heuristics: Arc<Heuristics>) -> Self {
        Self { heuristics }
    }

    pub fn heuristics(&self) -> &Heuristics {
        &self.heuristics
    }

    pub fn discover(&self, raw_file: &RawFile, table: &Extraction) -> FileSchema {
        let columns: Vec<ColumnInfo> = table
            .headers
            .iter()
            .map(|header| self.describe_column(header, &table.column_values(header)))
            .collect();

        tracing::debug!(
            file = %raw_file.filename,
            columns = columns.len(),
            rows = table.records.len(),
            "discovered schema"
        );

        FileSchema {
            id: new_id(),
            raw_file_id: raw_file.id.clone(),
            filename: raw_file.filename.clone(),
            total_columns: columns.len(),
            columns,
            total_rows: table.records.len() as u64,
            status: SchemaStatus::Active,
            discovery: DiscoveryInfo {
                delimiter: table.delimiter.to_string(),
                encoding: table.encoding.as_str().to_string(),
                physical_rows: table.physical_rows,
                skipped_rows: table.skipped.len() as u64,
                version: DISCOVERY_VERSION,
            },
            discovered_at: timestamp_now(),
        }
    }

    pub fn describe_column(&self, name: &str, values: &[&str]) -> ColumnInfo {
        let h = &*self.heuristics;
        let non_null: Vec<&str> = values
            .iter()
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .collect();

        let mut distinct: Vec<&str> = Vec::new();
        let mut seen = HashSet::new();
        for v in &non_null {
            if seen.insert(*v) {
                distinct.push(*v);
            }
        }

        let data_type = self.infer_type(&non_null, distinct.len());
        let content_signature =
            self.infer_signature(&non_null[..non_null.len().min(h.signature_sample)]);
        let unique_values = (distinct.len() <= h.max_unique_values)
            .then(|| distinct.iter().map(|v| v.to_string()).collect());

        ColumnInfo {
            original_name: name.to_string(),
            normalized_name: normalize_column_name(name),
            display_name: display_name(name),
            semantic_aliases: generate_aliases(name, content_signature, h),
            data_type,
            content_signature,
            sample_values: distinct
                .iter()
                .take(h.sample_size)
                .map(|v| v.to_string())
                .collect(),
            unique_values,
            null_count: (values.len() - non_null.len()) as u64,
            unique_count: distinct.len() as u64,
        }
    }

    /// Majority vote over non-empty values.
    pub fn infer_type(&self, non_null: &[&str], distinct: usize) -> DataType {
        if non_null.is_empty() {
            return DataType::Text;
        }
        let h = &*self.heuristics;
        let total = non_null.len() as f64;

        let numbers: Vec<f64> = non_null.iter().filter_map(|v| parse_number(v)).collect();
        if numbers.len() as f64 / total >= h.majority_ratio {
            return if numbers.iter().all(|n| n.fract() == 0.0) {
                DataType::Integer
            } else {
                DataType::Float
            };
        }

        let dates = non_null.iter().filter(|v| parse_date(v).is_some()).count();
        if dates as f64 / total >= h.majority_ratio {
            return DataType::Date;
        }

        if (distinct as f64 / total) < h.category_ratio {
            return DataType::Category;
        }
        DataType::Text
    }

    /// Classify the meaning of a column from its first sampled values.
    ///
    /// Rules are tried in order: plain numerics, organization keywords,
    /// modality keywords, money markers, date separators.
    pub fn infer_signature(&self, sample: &[&str]) -> ContentSignature {
        if sample.is_empty() {
            return ContentSignature::Unknown;
        }
        let h = &*self.heuristics;

        let plain: Vec<f64> = sample.iter().filter_map(|v| parse_plain_number(v)).collect();
        if plain.len() == sample.len() {
            return if plain.windows(2).all(|w| w[0] <= w[1]) {
                ContentSignature::NumericSequential
            } else {
                ContentSignature::Numeric
            };
        }

        let share = |pred: &dyn Fn(&str) -> bool| -> f64 {
            sample.iter().filter(|v| pred(**v)).count() as f64 / sample.len() as f64
        };

        if share(&|v: &str| has_keyword(v, &h.organization_keywords)) >= h.signature_ratio {
            return ContentSignature::OrganizationName;
        }
        if share(&|v: &str| has_keyword(v, &h.modality_keywords)) >= h.signature_ratio {
            return ContentSignature::BiddingModality;
        }

        let is_money = |v: &str| {
            h.currency_markers.iter().any(|m| v.contains(m.as_str())) || has_comma_decimal(v)
        };
        if share(&is_money) >= h.signature_ratio {
            return ContentSignature::Money;
        }

        let is_date_like =
            |v: &str| (v.contains('/') || v.contains('-')) && v.chars().any(|c| c.is_ascii_digit());
        if share(&is_date_like) >= h.signature_ratio {
            return ContentSignature::Date;
        }

        ContentSignature::Text
    }
}

fn has_keyword(value: &str, keywords: &[String]) -> bool {
    value_tokens(value)
        .iter()
        .any(|t| keywords.iter().any(|k| k.eq_ignore_ascii_case(t)))
}

/// A digit, a comma, a digit: `1.234,56`, `10,5`.
fn has_comma_decimal(value: &str) -> bool {
    let chars: Vec<char> = value.chars().collect();
    chars
        .windows(3)
        .any(|w| w[0].is_ascii_digit() && w[1] == ',' && w[2].is_ascii_digit())
}

/// Human- and LLM-readable listing of a schema.
///
/// Shows names, types, top aliases, samples, and known values. Alias
/// confidences stay internal.
pub fn render_schema(schema: &FileSchema, top_aliases: usize) -> String {
    let mut out = String::new();
    out.push_str(&format!("File: {} (schema {})\n", schema.filename, schema.id));
    out.push_str(&format!(
        "Rows: {} | Columns: {} | Status: {}\n",
        schema.total_rows,
        schema.total_columns,
        schema.status.as_str()
    ));
    out.push_str("Columns:\n");
    for col in &schema.columns {
        out.push_str(&format!(
            "  - \"{}\" ({}, {})\n",
            col.original_name,
            col.data_type.as_str(),
            col.content_signature.as_str()
        ));
        let aliases: Vec<&str> = col
            .semantic_aliases
            .iter()
            .take(top_aliases)
            .map(String::as_str)
            .collect();
        if !aliases.is_empty() {
            out.push_str(&format!("      aliases: {}\n", aliases.join(", ")));
        }
        if !col.sample_values.is_empty() {
            out.push_str(&format!("      samples: {}\n", col.sample_values.join(", ")));
        }
        if let Some(values) = &col.unique_values {
            if matches!(
                col.content_signature,
                ContentSignature::OrganizationName | ContentSignature::BiddingModality
            ) || col.data_type == DataType::Category
            {
                out.push_str(&format!("      values: {}\n", values.join(", ")));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn discoverer() -> SchemaDiscoverer {
        SchemaDiscoverer::new(Arc::new(Heuristics::default()))
    }

    #[test]
    fn test_integer_sequential_column() {
        let col = discoverer().describe_column("EDITAL N°", &["10367", "10368", "10400"]);
        assert_eq!(col.data_type, DataType::Integer);
        assert_eq!(col.content_signature, ContentSignature::NumericSequential);
        assert_eq!(col.normalized_name, "edital_n");
        assert_eq!(col.display_name, "Edital N");
    }

    #[test]
    fn test_unordered_numbers_are_plain_numeric() {
        let col = discoverer().describe_column("qtd", &["5", "2", "9"]);
        assert_eq!(col.content_signature, ContentSignature::Numeric);
    }

    #[test]
    fn test_money_column_is_float() {
        let col = discoverer().describe_column("VALOR", &["1.234,56", "R$ 10,00", "99,90"]);
        assert_eq!(col.data_type, DataType::Float);
        assert_eq!(col.content_signature, ContentSignature::Money);
    }

    #[test]
    fn test_organization_and_modality_signatures() {
        let d = discoverer();
        let org = d.describe_column("ORIGEM", &["SEINF", "SME", "Secretaria da Saúde"]);
        assert_eq!(org.content_signature, ContentSignature::OrganizationName);
        assert_eq!(org.unique_values.as_ref().unwrap().len(), 3);

        let modality = d.describe_column("MODALIDADE", &["PREGÃO ELETRÔNICO", "Concorrência"]);
        assert_eq!(modality.content_signature, ContentSignature::BiddingModality);
    }

    #[test]
    fn test_date_column() {
        let col = discoverer().describe_column("DATA", &["01/02/2024", "15/03/2024", ""]);
        assert_eq!(col.data_type, DataType::Date);
        assert_eq!(col.content_signature, ContentSignature::Date);
        assert_eq!(col.null_count, 1);
    }

    #[test]
    fn test_low_cardinality_is_category() {
        let mut values = vec!["ATIVO"; 30];
        values.extend(vec!["INATIVO"; 30]);
        let col = discoverer().describe_column("situacao", &values);
        assert_eq!(col.data_type, DataType::Category);
        assert_eq!(col.unique_values, Some(vec!["ATIVO".into(), "INATIVO".into()]));
        assert_eq!(col.sample_values, vec!["ATIVO", "INATIVO"]);
    }

    #[test]
    fn test_unique_values_capped() {
        let owned: Vec<String> = (0..60).map(|i| format!("item {}", i)).collect();
        let values: Vec<&str> = owned.iter().map(String::as_str).collect();
        let col = discoverer().describe_column("descricao", &values);
        assert_eq!(col.data_type, DataType::Text);
        assert!(col.unique_values.is_none());
        assert_eq!(col.unique_count, 60);
        assert_eq!(col.sample_values.len(), 5);
    }

    #[test]
    fn test_empty_column_is_unknown_text() {
        let col = discoverer().describe_column("obs", &["", " "]);
        assert_eq!(col.data_type, DataType::Text);
        assert_eq!(col.content_signature, ContentSignature::Unknown);
        assert_eq!(col.unique_values, Some(vec![]));
    }

    #[test]
    fn test_render_hides_scores() {
        let d = discoverer();
        let schema = FileSchema {
            id: "s1".into(),
            raw_file_id: "r1".into(),
            filename: "editais.csv".into(),
            columns: vec![
                d.describe_column("EDITAL N°", &["10367"]),
                d.describe_column("ORIGEM", &["SEINF"]),
            ],
            total_rows: 1,
            total_columns: 2,
            status: SchemaStatus::Active,
            discovery: DiscoveryInfo {
                delimiter: ";".into(),
                encoding: "utf-8".into(),
                physical_rows: 1,
                skipped_rows: 0,
                version: DISCOVERY_VERSION,
            },
            discovered_at: timestamp_now(),
        };
        let text = render_schema(&schema, 5);
        assert!(text.contains("\"EDITAL N°\" (integer, numeric_sequential)"));
        assert!(text.contains("aliases: edital_n, editaln, edital"));
        assert!(text.contains("values: SEINF"));
        assert!(!text.contains("0.9"));
    }
}
