//! Column-name and text normalization.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Strip diacritics one character at a time.
///
/// Each input char maps to exactly one output char (`ç` → `c`, `Á` → `A`),
/// so char offsets in the folded text line up with the input.
pub fn fold_char(c: char) -> char {
    if c.is_ascii() {
        return c;
    }
    std::iter::once(c)
        .nfd()
        .find(|d| !is_combining_mark(*d))
        .unwrap_or(c)
}

pub fn fold_diacritics(s: &str) -> String {
    s.chars().map(fold_char).collect()
}

/// [`fold_char`] then lowercase, still one char out per char in. A
/// lowercase mapping longer than one char keeps only its first.
pub fn fold_lower_char(c: char) -> char {
    let folded = fold_char(c);
    folded.to_lowercase().next().unwrap_or(folded)
}

/// Diacritic-free, lowercase form used for matching free text.
pub fn fold_lower(s: &str) -> String {
    s.chars().map(fold_lower_char).collect()
}

/// `"EDITAL N°"` → `"edital_n"`, `"Órgão de Origem"` → `"orgao_de_origem"`.
pub fn normalize_column_name(name: &str) -> String {
    let cleaned: String = fold_lower(name)
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join("_")
}

/// `"EDITAL N°"` → `"Edital N"`.
pub fn display_name(name: &str) -> String {
    normalize_column_name(name)
        .split('_')
        .filter(|w| !w.is_empty())
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Word tokens of the normalized name.
pub fn name_tokens(name: &str) -> Vec<String> {
    normalize_column_name(name)
        .split('_')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Uppercase alphanumeric tokens of a value, for keyword matching.
pub fn value_tokens(value: &str) -> Vec<String> {
    fold_diacritics(value)
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_uppercase())
        .collect()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_column_name() {
        assert_eq!(normalize_column_name("EDITAL N°"), "edital_n");
        assert_eq!(normalize_column_name("Órgão de Origem"), "orgao_de_origem");
        assert_eq!(normalize_column_name("  Valor (R$)  "), "valor_r");
        assert_eq!(normalize_column_name("data_abertura"), "data_abertura");
        assert_eq!(normalize_column_name("°°"), "");
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("EDITAL N°"), "Edital N");
        assert_eq!(display_name("situação"), "Situacao");
    }

    #[test]
    fn test_fold_preserves_char_count() {
        let s = "Licitação Pública nº 12";
        assert_eq!(fold_lower(s).chars().count(), s.chars().count());
        assert_eq!(fold_lower(s), "licitacao publica nº 12");
        let dotted = "İzmir ΣΑΣ";
        assert_eq!(fold_lower(dotted).chars().count(), dotted.chars().count());
    }

    #[test]
    fn test_tokens() {
        assert_eq!(name_tokens("Data de Abertura"), vec!["data", "de", "abertura"]);
        assert_eq!(value_tokens("Secretaria-SEINF/ce"), vec!["SECRETARIA", "SEINF", "CE"]);
    }
}
