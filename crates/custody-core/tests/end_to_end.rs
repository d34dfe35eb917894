//! End-to-end flows over the in-memory backends.

use std::sync::Arc;

use custody_core::content::DEFAULT_INLINE_THRESHOLD;
use custody_core::store::memory::{InMemoryStore, MemoryBlobStore};
use custody_core::{
    ContentSignature, Custody, DataType, EntityKind, Heuristics, MappingValue, Operation,
    Operator, Outcome, Store, Upload,
};

const LICITACOES: &str = "EDITAL N°;ORIGEM;VALOR\n10367;SEINF;1.234,56\n";

fn custody() -> (Arc<InMemoryStore>, Custody) {
    let store = Arc::new(InMemoryStore::new());
    let custody = Custody::new(
        store.clone(),
        Arc::new(MemoryBlobStore::new()),
        Heuristics::default(),
        DEFAULT_INLINE_THRESHOLD,
    );
    (store, custody)
}

#[tokio::test]
async fn test_licitacoes_file_end_to_end() {
    let (store, custody) = custody();
    let report = custody
        .process(Upload::new(LICITACOES.as_bytes().to_vec(), "licitacoes.csv", "manual"))
        .await
        .unwrap();
    assert_eq!(report.outcome, Outcome::Processed);

    let records = store
        .records_for_file(&report.raw_file.id, 0, None)
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].row_number, 1);
    assert_eq!(records[0].data["EDITAL N°"], "10367");
    assert_eq!(records[0].data["ORIGEM"], "SEINF");
    assert_eq!(records[0].data["VALOR"], "1.234,56");

    let schema = store
        .active_schema(&report.raw_file.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(schema.total_columns, 3);
    let edital = schema.column("EDITAL N°").unwrap();
    assert_eq!(edital.data_type, DataType::Integer);
    assert_eq!(edital.content_signature, ContentSignature::NumericSequential);
    for alias in ["edital_n", "edital", "numero", "id", "codigo"] {
        assert!(
            edital.semantic_aliases.iter().any(|a| a == alias),
            "missing alias {}",
            alias
        );
    }

    let mappings = custody
        .resolver()
        .map_query_active("edital 10367 da SEINF")
        .await
        .unwrap();
    let edital_value = mappings
        .iter()
        .find(|m| m.column_name == "EDITAL N°" && m.entity == EntityKind::Number)
        .unwrap();
    assert_eq!(edital_value.value, Some(MappingValue::Integer(10367)));
    assert_eq!(edital_value.operator, Some(Operator::Equals));
    assert!((edital_value.confidence - 0.9).abs() < 1e-9);

    let origem = mappings
        .iter()
        .find(|m| m.column_name == "ORIGEM" && m.entity == EntityKind::Organization)
        .unwrap();
    assert_eq!(origem.value, Some(MappingValue::Text("SEINF".into())));
    assert_eq!(origem.confidence, 1.0);
    assert_eq!(mappings[0].confidence, 1.0);
}

#[tokio::test]
async fn test_exact_alias_always_resolves() {
    let (_, custody) = custody();
    custody
        .process(Upload::new(LICITACOES.as_bytes().to_vec(), "licitacoes.csv", "manual"))
        .await
        .unwrap();
    for column in ["EDITAL N°", "ORIGEM", "VALOR"] {
        let hits = custody.aliases().resolve_alias(column, None).await.unwrap();
        assert!(!hits.is_empty(), "no hit for {}", column);
        assert_eq!(hits[0].original_column_name, column);
        assert_eq!(hits[0].confidence, 1.0);
    }
    assert!(custody
        .aliases()
        .resolve_alias("nonexistent", None)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_concurrent_identical_uploads_collapse() {
    let (store, custody) = custody();
    let mut handles = Vec::new();
    for i in 0..8 {
        let custody = custody.clone();
        handles.push(tokio::spawn(async move {
            custody
                .content()
                .store(Upload::new(
                    LICITACOES.as_bytes().to_vec(),
                    format!("copy-{}.csv", i),
                    "manual",
                ))
                .await
                .unwrap()
                .raw_file
                .id
        }));
    }
    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap());
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(store.list_raw_files().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_retrieval_citations_and_audit() {
    let (store, custody) = custody();
    let report = custody
        .process(Upload::new(LICITACOES.as_bytes().to_vec(), "licitacoes.csv", "portal"))
        .await
        .unwrap();
    let record = store
        .records_for_file(&report.raw_file.id, 0, None)
        .await
        .unwrap()
        .remove(0);

    let logged = custody
        .ledger()
        .log_retrieval(
            &[record.id.clone(), "unknown-record".to_string()],
            Some("session-1"),
            Some("message-1"),
            Some(&[0.87, 0.5]),
        )
        .await
        .unwrap();
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].operation, Operation::Retrieval);

    let citations = custody
        .ledger()
        .citations_for_message("message-1")
        .await
        .unwrap();
    assert_eq!(citations.len(), 1);
    assert_eq!(citations[0].raw_file.sha256, report.raw_file.sha256);
    assert_eq!(citations[0].record.as_ref().unwrap().row_number, 1);
    assert_eq!(citations[0].score, Some(0.87));

    let verification = custody
        .ledger()
        .verify(&logged[0].id)
        .await
        .unwrap()
        .unwrap();
    assert!(verification.integrity.passed);
    assert_eq!(verification.parsed_record.unwrap().id, record.id);

    let lineage = custody
        .ledger()
        .get_file_lineage(&report.raw_file.id, false)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(lineage.retrieval_count, 1);
    assert_eq!(lineage.parsed_records, 1);
    assert!(lineage
        .entries
        .iter()
        .all(|e| e.operation != Operation::Retrieval));
}
