//! Property tests for row numbering, alias determinism and fuzzy matching.

use proptest::prelude::*;

use custody_core::alias::generate_aliases;
use custody_core::discovery::SchemaDiscoverer;
use custody_core::resolver::fuzzy_column_matches;
use custody_core::{
    timestamp_now, ContentSignature, DiscoveryInfo, FileFormat, FileSchema, FileStatus,
    Heuristics, RawFile, RowExtractor, SchemaStatus, StorageLocation,
};
use std::sync::Arc;

fn csv_file() -> RawFile {
    RawFile {
        id: "raw".into(),
        source_type: "manual".into(),
        source_identifier: None,
        filename: "rows.csv".into(),
        format: FileFormat::Csv,
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

fn schema_with(names: &[String]) -> FileSchema {
    let d = SchemaDiscoverer::new(Arc::new(Heuristics::default()));
    let columns: Vec<_> = names.iter().map(|n| d.describe_column(n, &[])).collect();
    FileSchema {
        id: "schema".into(),
        raw_file_id: "raw".into(),
        filename: "rows.csv".into(),
        total_columns: columns.len(),
        columns,
        total_rows: 0,
        status: SchemaStatus::Active,
        discovery: DiscoveryInfo {
            delimiter: ";".into(),
            encoding: "utf-8".into(),
            physical_rows: 0,
            skipped_rows: 0,
            version: 1,
        },
        discovered_at: timestamp_now(),
    }
}

proptest! {
    #[test]
    fn row_numbers_are_increasing_and_physical(
        rows in prop::collection::vec(
            prop_oneof![Just(None), ("[a-z0-9]{1,6}", "[a-z0-9]{1,6}").prop_map(Some)],
            1..40,
        )
    ) {
        let mut text = String::from("COL_A;COL_B\n");
        for row in &rows {
            if let Some((a, b)) = row {
                text.push_str(&format!("{};{}", a, b));
            }
            text.push('\n');
        }
        let expected: Vec<u64> = rows
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_some())
            .map(|(i, _)| i as u64 + 1)
            .collect();

        match RowExtractor::new().extract(&csv_file(), text.as_bytes()) {
            Ok(out) => {
                let numbers: Vec<u64> = out.records.iter().map(|r| r.row_number).collect();
                prop_assert!(numbers.windows(2).all(|w| w[0] < w[1]));
                prop_assert!(out.records.len() as u64 <= out.physical_rows);
                prop_assert!(numbers.iter().all(|n| *n >= 1 && *n <= out.physical_rows));
                prop_assert_eq!(numbers, expected);
            }
            Err(_) => prop_assert!(expected.is_empty()),
        }
    }

    #[test]
    fn alias_generation_is_deterministic(name in "[A-Za-zÀ-ú °_]{1,30}") {
        let h = Heuristics::default();
        for signature in [ContentSignature::NumericSequential, ContentSignature::Money, ContentSignature::Text] {
            prop_assert_eq!(
                generate_aliases(&name, signature, &h),
                generate_aliases(&name, signature, &h)
            );
        }
    }

    #[test]
    fn lowering_fuzzy_threshold_never_loses_matches(
        term in "[a-z]{2,10}",
        names in prop::collection::vec("[A-Z]{2,8}( [A-Z]{2,8})?", 1..6),
        high in 0.6f64..1.0,
        gap in 0.0f64..0.5,
    ) {
        let h = Heuristics::default();
        let schema = schema_with(&names);
        let low = (high - gap).max(0.01);
        let strict = fuzzy_column_matches(&term, &schema, &h, high);
        let loose = fuzzy_column_matches(&term, &schema, &h, low);
        prop_assert!(strict.len() <= loose.len());
        for (_, confidence) in strict.iter().chain(loose.iter()) {
            prop_assert!(*confidence < h.semantic_confidence);
        }
    }
}
