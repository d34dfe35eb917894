//! Tunable heuristics for schema discovery and field resolution.
//!
//! The defaults target Brazilian public-procurement spreadsheets (Portuguese
//! column names, agency acronyms, bidding modalities) with English synonyms
//! alongside. Every constant and keyword list can be overridden from the
//! `[heuristics]` table of the configuration file when deploying against a
//! different locale. Only the ranking mechanism is fixed: fuzzy matches must
//! always score below exact and semantic alias hits, which
//! [`Heuristics::validate`] enforces.

use serde::{Deserialize, Serialize};

use crate::error::{CustodyError, Result};
use crate::models::ContentSignature;

/// Synonyms attached to every column with a given content signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureSynonyms {
    pub signature: ContentSignature,
    pub synonyms: Vec<String>,
}

/// Synonyms attached to a column whose name contains one of `triggers`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordSynonyms {
    pub triggers: Vec<String>,
    pub synonyms: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Heuristics {
    /// Share of non-empty values that must parse for a numeric or date type.
    pub majority_ratio: f64,
    /// Distinct/non-empty ratio below which a column is categorical.
    pub category_ratio: f64,
    pub max_unique_values: usize,
    pub sample_size: usize,
    pub signature_sample: usize,
    /// Share of sampled values that must carry a keyword or marker for a
    /// keyword-driven signature.
    pub signature_ratio: f64,

    pub organization_keywords: Vec<String>,
    pub modality_keywords: Vec<String>,
    pub currency_markers: Vec<String>,
    pub signature_synonyms: Vec<SignatureSynonyms>,
    pub keyword_synonyms: Vec<KeywordSynonyms>,

    pub min_alias_len: usize,
    pub max_alias_len: usize,
    pub exact_confidence: f64,
    pub normalized_confidence: f64,
    pub semantic_confidence: f64,

    pub top_aliases: usize,
    pub min_keyword_len: usize,
    pub min_category_len: usize,
    pub fuzzy_threshold: f64,
    pub fuzzy_name_weight: f64,
    pub fuzzy_alias_weight: f64,
    pub sequential_confidence: f64,
    pub numeric_confidence: f64,
    pub categorical_confidence: f64,
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for Heuristics {
    fn default() -> Self {
        Self {
            majority_ratio: 0.8,
            category_ratio: 0.05,
            max_unique_values: 50,
            sample_size: 5,
            signature_sample: 10,
            signature_ratio: 0.5,

            organization_keywords: words(&[
                "SEINF", "SME", "SMS", "SEPLAG", "SEFIN", "SECRETARIA", "INSTITUTO", "URBFOR",
                "IJF", "PREFEITURA", "FUNDACAO", "AUTARQUIA",
            ]),
            modality_keywords: words(&[
                "PREGAO", "CONCORRENCIA", "DISPENSA", "INEXIGIBILIDADE", "TOMADA", "CONVITE",
                "LEILAO", "PE", "CE",
            ]),
            currency_markers: words(&["R$", "US$", "$", "€", "£"]),
            signature_synonyms: vec![
                SignatureSynonyms {
                    signature: ContentSignature::NumericSequential,
                    synonyms: words(&["numero", "number", "id", "codigo", "code"]),
                },
                SignatureSynonyms {
                    signature: ContentSignature::OrganizationName,
                    synonyms: words(&[
                        "orgao", "origem", "secretaria", "entidade", "organization", "department",
                        "entity",
                    ]),
                },
                SignatureSynonyms {
                    signature: ContentSignature::BiddingModality,
                    synonyms: words(&["modalidade", "modality", "tipo", "type"]),
                },
                SignatureSynonyms {
                    signature: ContentSignature::Money,
                    synonyms: words(&[
                        "valor", "preco", "custo", "montante", "value", "price", "cost", "amount",
                    ]),
                },
                SignatureSynonyms {
                    signature: ContentSignature::Date,
                    synonyms: words(&["data", "dia", "date", "quando", "when"]),
                },
            ],
            keyword_synonyms: vec![
                KeywordSynonyms {
                    triggers: words(&["edital", "licitacao"]),
                    synonyms: words(&["edital", "licitacao", "bidding", "tender"]),
                },
                KeywordSynonyms {
                    triggers: words(&["processo", "proc"]),
                    synonyms: words(&["processo", "process", "proc"]),
                },
                KeywordSynonyms {
                    triggers: words(&["objeto", "descricao"]),
                    synonyms: words(&["objeto", "descricao", "object", "description"]),
                },
                KeywordSynonyms {
                    triggers: words(&["situacao", "status"]),
                    synonyms: words(&["situacao", "status", "state"]),
                },
            ],

            min_alias_len: 2,
            max_alias_len: 50,
            exact_confidence: 1.0,
            normalized_confidence: 0.95,
            semantic_confidence: 0.9,

            top_aliases: 5,
            min_keyword_len: 3,
            min_category_len: 2,
            fuzzy_threshold: 0.6,
            fuzzy_name_weight: 0.8,
            fuzzy_alias_weight: 0.85,
            sequential_confidence: 0.9,
            numeric_confidence: 0.7,
            categorical_confidence: 1.0,
        }
    }
}

impl Heuristics {
    /// Check ranges and the fuzzy-below-alias ordering.
    pub fn validate(&self) -> Result<()> {
        let unit = |name: &str, v: f64| -> Result<()> {
            if v > 0.0 && v <= 1.0 {
                Ok(())
            } else {
                Err(CustodyError::InvalidInput(format!(
                    "heuristics.{} must be in (0.0, 1.0], got {}",
                    name, v
                )))
            }
        };
        unit("majority_ratio", self.majority_ratio)?;
        unit("category_ratio", self.category_ratio)?;
        unit("signature_ratio", self.signature_ratio)?;
        unit("fuzzy_threshold", self.fuzzy_threshold)?;
        unit("fuzzy_name_weight", self.fuzzy_name_weight)?;
        unit("fuzzy_alias_weight", self.fuzzy_alias_weight)?;
        unit("exact_confidence", self.exact_confidence)?;
        unit("normalized_confidence", self.normalized_confidence)?;
        unit("semantic_confidence", self.semantic_confidence)?;
        unit("sequential_confidence", self.sequential_confidence)?;
        unit("numeric_confidence", self.numeric_confidence)?;
        unit("categorical_confidence", self.categorical_confidence)?;

        if self.min_alias_len == 0 || self.min_alias_len > self.max_alias_len {
            return Err(CustodyError::InvalidInput(format!(
                "heuristics alias length bounds [{}, {}] are invalid",
                self.min_alias_len, self.max_alias_len
            )));
        }
        if self.top_aliases == 0 || self.signature_sample == 0 {
            return Err(CustodyError::InvalidInput(
                "heuristics.top_aliases and heuristics.signature_sample must be >= 1".to_string(),
            ));
        }
        let alias_floor = self
            .semantic_confidence
            .min(self.normalized_confidence)
            .min(self.exact_confidence);
        let fuzzy_ceiling = self.fuzzy_name_weight.max(self.fuzzy_alias_weight);
        if fuzzy_ceiling >= alias_floor {
            return Err(CustodyError::InvalidInput(format!(
                "fuzzy weights ({}) must stay below alias confidences ({})",
                fuzzy_ceiling, alias_floor
            )));
        }
        Ok(())
    }

    pub fn synonyms_for(&self, signature: ContentSignature) -> &[String] {
        self.signature_synonyms
            .iter()
            .find(|s| s.signature == signature)
            .map(|s| s.synonyms.as_slice())
            .unwrap_or_default()
    }
}
