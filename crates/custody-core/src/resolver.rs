//! Free text to structured field/value mappings.
//!
//! The resolver turns a query such as `"edital 10367 da SEINF"` into
//! candidate filters (`EDITAL N° = 10367`, `ORIGEM = SEINF`) over the
//! discovered schemas:
//!
//! 1. **Entity extraction** scans the diacritic-folded, lowercased query for
//!    standalone integers, known categorical values, and field keywords
//!    (each column's normalized name and top aliases). Values and keywords
//!    match whole words only, not substrings: `"pe"` does not hit inside
//!    `"pedro"`. Overlapping spans keep the first occurrence.
//! 2. **Field names** resolve by exact alias lookup per schema, falling back
//!    to fuzzy similarity, which is weighted to rank below any alias hit.
//! 3. **Numbers** are proposed against every numeric column.
//! 4. **Categorical values** map to same-family columns that contain them.
//!
//! An empty result is not an error; it tells callers to fall back to
//! unstructured search.

use std::cmp::Reverse;
use std::sync::Arc;

use crate::error::Result;
use crate::heuristics::Heuristics;
use crate::models::{
    ColumnInfo, ContentSignature, DataType, EntityKind, FieldMapping, FileSchema, MappingMatch,
    MappingValue, Operator,
};
use crate::normalize::fold_lower_char;
use crate::similarity::similarity;
use crate::store::Store;

/// A span of the query recognised as something mappable.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub kind: EntityKind,
    /// The span as written in the query.
    pub text: String,
    /// Folded lowercase form used for lookups.
    pub key: String,
    /// Char offsets into the query.
    pub start: usize,
    pub end: usize,
}

#[derive(Clone)]
pub struct FieldResolver {
    store: Arc<dyn Store>,
    heuristics: Arc<Heuristics>,
}

impl FieldResolver {
    pub fn new(store: Arc<dyn Store>, heuristics: Arc<Heuristics>) -> Self {
        Self { store, heuristics }
    }

    /// Map `text` against every active schema.
    pub async fn map_query_active(&self, text: &str) -> Result<Vec<FieldMapping>> {
        let schemas = self.store.active_schemas().await?;
        self.map_query(text, &schemas).await
    }

    /// Map `text` against `schemas`, best first.
    pub async fn map_query(&self, text: &str, schemas: &[FileSchema]) -> Result<Vec<FieldMapping>> {
        let h = &*self.heuristics;
        if schemas.is_empty() || text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let entities = extract_entities(text, schemas, h);
        tracing::debug!(query = text, entities = entities.len(), "extracted entities");

        let mut mappings = Vec::new();
        for entity in &entities {
            match entity.kind {
                EntityKind::FieldName => {
                    for schema in schemas {
                        let hits = self
                            .store
                            .lookup_alias(&entity.key, Some(&schema.id))
                            .await?;
                        if hits.is_empty() {
                            for (col, confidence) in
                                fuzzy_column_matches(&entity.key, schema, h, h.fuzzy_threshold)
                            {
                                mappings.push(mapping(
                                    entity,
                                    schema,
                                    col,
                                    MappingMatch::Fuzzy,
                                    confidence,
                                    None,
                                ));
                            }
                            continue;
                        }
                        for hit in hits {
                            if let Some(col) = schema.column(&hit.original_column_name) {
                                mappings.push(mapping(
                                    entity,
                                    schema,
                                    col,
                                    hit.match_type.into(),
                                    hit.confidence,
                                    None,
                                ));
                            }
                        }
                    }
                }
                EntityKind::Number => {
                    let value = match entity.text.parse::<i64>() {
                        Ok(n) => MappingValue::Integer(n),
                        Err(_) => MappingValue::Text(entity.text.clone()),
                    };
                    for schema in schemas {
                        for col in schema.columns.iter().filter(|c| c.data_type.is_numeric()) {
                            let confidence =
                                if col.content_signature == ContentSignature::NumericSequential {
                                    h.sequential_confidence
                                } else {
                                    h.numeric_confidence
                                };
                            mappings.push(mapping(
                                entity,
                                schema,
                                col,
                                MappingMatch::NumericValue,
                                confidence,
                                Some(value.clone()),
                            ));
                        }
                    }
                }
                EntityKind::Organization | EntityKind::Category => {
                    for schema in schemas {
                        for col in &schema.columns {
                            if categorical_family(col) != Some(entity.kind) {
                                continue;
                            }
                            let found = col.unique_values.as_ref().and_then(|values| {
                                values.iter().find(|v| fold_key(v) == entity.key)
                            });
                            if let Some(literal) = found {
                                mappings.push(mapping(
                                    entity,
                                    schema,
                                    col,
                                    MappingMatch::CategoricalValue,
                                    h.categorical_confidence,
                                    Some(MappingValue::Text(literal.clone())),
                                ));
                            }
                        }
                    }
                }
            }
        }

        mappings.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        Ok(mappings)
    }
}

fn mapping(
    entity: &Entity,
    schema: &FileSchema,
    col: &ColumnInfo,
    match_type: MappingMatch,
    confidence: f64,
    value: Option<MappingValue>,
) -> FieldMapping {
    let operator = value.as_ref().map(|_| Operator::Equals);
    FieldMapping {
        query_text: entity.text.clone(),
        entity: entity.kind,
        file_schema_id: schema.id.clone(),
        filename: schema.filename.clone(),
        column_name: col.original_name.clone(),
        column_type: col.data_type,
        match_type,
        confidence,
        value,
        operator,
    }
}

/// Which categorical entity family a column's values belong to, if any.
fn categorical_family(col: &ColumnInfo) -> Option<EntityKind> {
    if col.content_signature == ContentSignature::OrganizationName {
        Some(EntityKind::Organization)
    } else if col.data_type == DataType::Category {
        Some(EntityKind::Category)
    } else {
        None
    }
}

/// Columns of `schema` whose name or an alias is at least `threshold`
/// similar to `term`, with the best weighted score per column.
pub fn fuzzy_column_matches<'a>(
    term: &str,
    schema: &'a FileSchema,
    h: &Heuristics,
    threshold: f64,
) -> Vec<(&'a ColumnInfo, f64)> {
    let mut out = Vec::new();
    for col in &schema.columns {
        let mut best: Option<f64> = None;
        let name_score = similarity(term, &col.normalized_name);
        if name_score >= threshold {
            best = Some(name_score * h.fuzzy_name_weight);
        }
        for alias in &col.semantic_aliases {
            let score = similarity(term, alias);
            if score >= threshold {
                let weighted = score * h.fuzzy_alias_weight;
                best = Some(best.map_or(weighted, |b| b.max(weighted)));
            }
        }
        if let Some(confidence) = best {
            out.push((col, confidence));
        }
    }
    out
}

/// Find mappable spans in `text`.
pub fn extract_entities(text: &str, schemas: &[FileSchema], h: &Heuristics) -> Vec<Entity> {
    let original: Vec<char> = text.chars().collect();
    let folded: Vec<char> = original.iter().map(|c| fold_lower_char(*c)).collect();
    let mut found: Vec<(usize, Entity)> = Vec::new();

    let span = |kind: EntityKind, start: usize, end: usize, key: String| Entity {
        kind,
        text: original[start..end].iter().collect(),
        key,
        start,
        end,
    };

    // Numbers: digit runs not glued to letters.
    let mut i = 0;
    while i < folded.len() {
        if folded[i].is_ascii_digit() && (i == 0 || !folded[i - 1].is_alphanumeric()) {
            let mut j = i;
            while j < folded.len() && folded[j].is_ascii_digit() {
                j += 1;
            }
            if j == folded.len() || !folded[j].is_alphanumeric() {
                let key: String = folded[i..j].iter().collect();
                found.push((0, span(EntityKind::Number, i, j, key)));
            }
            i = j;
        } else {
            i += 1;
        }
    }

    // Known categorical values.
    for schema in schemas {
        for col in &schema.columns {
            let Some(kind) = categorical_family(col) else {
                continue;
            };
            for value in col.unique_values.iter().flatten() {
                let key = fold_key(value);
                let needle: Vec<char> = key.chars().collect();
                if needle.len() < h.min_category_len {
                    continue;
                }
                if let Some(start) = find_word(&folded, &needle) {
                    found.push((1, span(kind, start, start + needle.len(), key)));
                }
            }
        }
    }

    // Field keywords: normalized name plus top aliases.
    for schema in schemas {
        for col in &schema.columns {
            let keywords = std::iter::once(&col.normalized_name)
                .chain(col.semantic_aliases.iter().take(h.top_aliases));
            for keyword in keywords {
                if keyword.chars().count() < h.min_keyword_len {
                    continue;
                }
                let spaced = keyword.replace('_', " ");
                for form in [keyword.as_str(), spaced.as_str()] {
                    let needle: Vec<char> = form.chars().collect();
                    if let Some(start) = find_word(&folded, &needle) {
                        found.push((
                            2,
                            span(EntityKind::FieldName, start, start + needle.len(), keyword.clone()),
                        ));
                        break;
                    }
                }
            }
        }
    }

    found.sort_by_key(|(rank, e)| (e.start, *rank, Reverse(e.end - e.start)));
    let mut entities = Vec::new();
    let mut last_end = 0;
    for (_, entity) in found {
        if entities.is_empty() || entity.start >= last_end {
            last_end = entity.end;
            entities.push(entity);
        }
    }
    entities
}

/// Human-readable listing of the best `top_n` mappings.
pub fn render_mappings(mappings: &[FieldMapping], top_n: usize) -> String {
    if mappings.is_empty() {
        return "No structured mappings; fall back to unstructured search.\n".to_string();
    }
    let mut out = String::new();
    for m in mappings.iter().take(top_n) {
        let target = match &m.value {
            Some(v) => format!("{} = {}", m.column_name, v),
            None => m.column_name.clone(),
        };
        out.push_str(&format!(
            "\"{}\" -> {} [{}] ({:?}, {:.2})\n",
            m.query_text, target, m.filename, m.match_type, m.confidence
        ));
    }
    out
}

fn fold_key(s: &str) -> String {
    s.trim().chars().map(fold_lower_char).collect()
}

/// First occurrence of `needle` in `hay` bounded by non-alphanumerics.
fn find_word(hay: &[char], needle: &[char]) -> Option<usize> {
    if needle.is_empty() || needle.len() > hay.len() {
        return None;
    }
    (0..=hay.len() - needle.len()).find(|&start| {
        let end = start + needle.len();
        hay[start..end] == *needle
            && (start == 0 || !hay[start - 1].is_alphanumeric())
            && (end == hay.len() || !hay[end].is_alphanumeric())
    })
}
