//! Alias generation and the alias index.
//!
//! Every column gets a deterministic set of alternate names so callers can
//! refer to `"EDITAL N°"` as `edital`, `numero`, or `licitacao`. Aliases are
//! persisted per schema as [`AliasEntry`] rows with a confidence that
//! reflects how they were derived:
//!
//! | Match type | Confidence | Derived from |
//! |------------|-----------:|--------------|
//! | exact | 1.0 | the original column name, lowercased |
//! | normalized | 0.95 | the normalized name and its no-space form |
//! | semantic | 0.9 | tokens, token combinations, signature and keyword synonyms |

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use crate::error::Result;
use crate::heuristics::Heuristics;
use crate::models::{AliasEntry, ContentSignature, FileSchema, MatchType};
use crate::normalize::{fold_lower, name_tokens, normalize_column_name};
use crate::store::Store;

/// Ordered, de-duplicated alias list with length filtering.
struct AliasList<'a> {
    heuristics: &'a Heuristics,
    seen: HashSet<String>,
    aliases: Vec<String>,
}

impl<'a> AliasList<'a> {
    fn new(heuristics: &'a Heuristics) -> Self {
        Self {
            heuristics,
            seen: HashSet::new(),
            aliases: Vec::new(),
        }
    }

    fn push(&mut self, alias: &str) {
        let alias = alias.trim().to_lowercase();
        let len = alias.chars().count();
        if len < self.heuristics.min_alias_len || len > self.heuristics.max_alias_len {
            return;
        }
        if self.seen.insert(alias.clone()) {
            self.aliases.push(alias);
        }
    }
}

/// Aliases for one column, in priority order.
///
/// The same name and signature always yield the same list.
pub fn generate_aliases(
    original_name: &str,
    signature: ContentSignature,
    heuristics: &Heuristics,
) -> Vec<String> {
    let mut list = AliasList::new(heuristics);

    let normalized = normalize_column_name(original_name);
    list.push(&normalized);
    list.push(&normalized.replace('_', ""));

    let tokens = name_tokens(original_name);
    for token in tokens.iter().filter(|t| t.chars().count() > 2) {
        list.push(token);
    }
    if let (Some(first), Some(last)) = (tokens.first(), tokens.last()) {
        if tokens.len() > 1 {
            list.push(&format!("{}_{}", first, last));
            list.push(&format!("{}{}", first, last));
            list.push(&tokens.join("_"));
            list.push(&tokens.concat());
        }
    }

    for synonym in heuristics.synonyms_for(signature) {
        list.push(synonym);
    }

    let folded = fold_lower(original_name);
    for rule in &heuristics.keyword_synonyms {
        if rule.triggers.iter().any(|t| folded.contains(t.as_str())) {
            for synonym in &rule.synonyms {
                list.push(synonym);
            }
        }
    }

    list.aliases
}

/// Alias entries for a whole schema.
///
/// Entries are claimed first-come in three passes (exact, then normalized,
/// then semantic) so a strong alias of one column is never shadowed by a
/// weaker alias of another, and no alias appears twice in one schema.
/// Exact entries bypass the length filter: a column can always be found by
/// its own name.
pub fn build_alias_entries(schema: &FileSchema, heuristics: &Heuristics) -> Vec<AliasEntry> {
    let mut claimed = HashSet::new();
    let mut entries = Vec::new();
    let mut claim = |alias: String, column: &str, match_type: MatchType, confidence: f64| {
        if alias.is_empty() || !claimed.insert(alias.clone()) {
            return;
        }
        entries.push(AliasEntry {
            file_schema_id: schema.id.clone(),
            alias,
            original_column_name: column.to_string(),
            match_type,
            confidence,
        });
    };

    for col in &schema.columns {
        claim(
            col.original_name.trim().to_lowercase(),
            &col.original_name,
            MatchType::Exact,
            heuristics.exact_confidence,
        );
    }
    for col in &schema.columns {
        for alias in [col.normalized_name.clone(), col.normalized_name.replace('_', "")] {
            let len = alias.chars().count();
            if len >= heuristics.min_alias_len && len <= heuristics.max_alias_len {
                claim(
                    alias,
                    &col.original_name,
                    MatchType::Normalized,
                    heuristics.normalized_confidence,
                );
            }
        }
    }
    for col in &schema.columns {
        for alias in &col.semantic_aliases {
            claim(
                alias.clone(),
                &col.original_name,
                MatchType::Semantic,
                heuristics.semantic_confidence,
            );
        }
    }
    entries
}

/// A schema that has been made visible to resolvers.
#[derive(Debug, Clone, Serialize)]
pub struct PublishedSchema {
    pub schema: FileSchema,
    pub aliases: usize,
    /// Id of the schema this one replaced as active.
    pub superseded: Option<String>,
}

/// Persisted alias lookups over active schemas.
#[derive(Clone)]
pub struct AliasIndex {
    store: Arc<dyn Store>,
    heuristics: Arc<Heuristics>,
}

impl AliasIndex {
    pub fn new(store: Arc<dyn Store>, heuristics: Arc<Heuristics>) -> Self {
        Self { store, heuristics }
    }

    /// Build alias entries and activate the schema in one atomic step.
    pub async fn publish(&self, schema: FileSchema) -> Result<PublishedSchema> {
        let entries = build_alias_entries(&schema, &self.heuristics);
        let superseded = self.store.activate_schema(&schema, &entries).await?;
        tracing::info!(
            file = %schema.filename,
            schema_id = %schema.id,
            aliases = entries.len(),
            superseded = ?superseded,
            "schema activated"
        );
        Ok(PublishedSchema {
            schema,
            aliases: entries.len(),
            superseded,
        })
    }

    /// Exact lookup of `text` (lowercased, trimmed), best first.
    pub async fn resolve_alias(
        &self,
        text: &str,
        file_schema_id: Option<&str>,
    ) -> Result<Vec<AliasEntry>> {
        let key = text.trim().to_lowercase();
        if key.is_empty() {
            return Ok(Vec::new());
        }
        let mut entries = self.store.lookup_alias(&key, file_schema_id).await?;
        entries.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.file_schema_id.cmp(&b.file_schema_id))
        });
        Ok(entries)
    }

    pub async fn aliases_for_schema(&self, file_schema_id: &str) -> Result<Vec<AliasEntry>> {
        Ok(self.store.aliases_for_schema(file_schema_id).await?)
    }
}
