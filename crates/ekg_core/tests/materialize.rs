use ekg_core::{
    open_db_in_memory, DerivationRecord, EventRecord, GraphStore, LogBatch, MaterializeOptions,
    Materializer, ObjectRecord, RecordKind, RelationRecord, SqliteGraphStore, ValidationError,
};

fn event(id: &str, timestamp: i64, correlated: &[&str]) -> EventRecord {
    EventRecord {
        id: Some(id.to_string()),
        activity: Some(format!("act-{id}")),
        timestamp: Some(timestamp),
        correlated: correlated.iter().map(|id| id.to_string()).collect(),
    }
}

fn object(id: &str, object_type: &str) -> ObjectRecord {
    ObjectRecord {
        id: Some(id.to_string()),
        object_type: Some(object_type.to_string()),
        attributes: Default::default(),
    }
}

fn derivation(derived: &str, base: &str) -> DerivationRecord {
    DerivationRecord {
        derived: Some(derived.to_string()),
        base: Some(base.to_string()),
    }
}

fn order_batch() -> LogBatch {
    LogBatch {
        events: vec![
            event("e1", 10, &["o1", "i1"]),
            event("e2", 20, &["o1"]),
            event("e3", 30, &["i1"]),
        ],
        objects: vec![object("o1", "order"), object("i1", "item")],
        relations: vec![RelationRecord {
            source: Some("o1".to_string()),
            target: Some("i1".to_string()),
            qualifier: Some("contains".to_string()),
        }],
        derivations: vec![derivation("i1", "o1")],
    }
}

#[test]
fn materializes_every_family() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteGraphStore::try_new(&conn).unwrap();
    let materializer = Materializer::new(store, MaterializeOptions::default());

    let report = materializer.materialize(&order_batch()).unwrap();

    assert_eq!(report.entities_inserted, 2);
    assert_eq!(report.events_inserted, 3);
    assert_eq!(report.corr_inserted, 4);
    assert_eq!(report.rel_inserted, 1);
    assert_eq!(report.derived_inserted, 1);
    assert!(report.rejected.is_empty());

    let summary = store.graph_summary().unwrap();
    assert_eq!(summary.events, 3);
    assert_eq!(summary.entities, 2);
    assert_eq!(summary.corr_edges, 4);
    assert_eq!(summary.df_edges, 0);
}

#[test]
fn rematerializing_the_same_batch_inserts_nothing() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteGraphStore::try_new(&conn).unwrap();
    let materializer = Materializer::new(store, MaterializeOptions::default());

    materializer.materialize(&order_batch()).unwrap();
    let before = store.graph_summary().unwrap();
    let again = materializer.materialize(&order_batch()).unwrap();

    assert_eq!(again.entities_inserted, 0);
    assert_eq!(again.events_inserted, 0);
    assert_eq!(again.corr_inserted, 0);
    assert_eq!(again.rel_inserted, 0);
    assert_eq!(again.derived_inserted, 0);
    assert_eq!(store.graph_summary().unwrap(), before);
}

#[test]
fn invalid_records_are_skipped_without_aborting_the_batch() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteGraphStore::try_new(&conn).unwrap();
    let mut batch = order_batch();
    batch.events.push(EventRecord {
        timestamp: None,
        ..event("e4", 40, &["o1"])
    });
    batch.objects.push(ObjectRecord {
        object_type: Some("  ".to_string()),
        ..object("o2", "order")
    });

    let report = Materializer::new(store, MaterializeOptions::default())
        .materialize(&batch)
        .unwrap();

    assert_eq!(report.events_inserted, 3);
    assert_eq!(report.entities_inserted, 2);
    let rejected = report
        .rejected
        .iter()
        .map(|record| (record.kind, record.index))
        .collect::<Vec<_>>();
    assert_eq!(rejected, vec![(RecordKind::Object, 2), (RecordKind::Event, 3)]);
    assert!(matches!(
        report.rejected[1].error,
        ValidationError::MissingField {
            field: "timestamp",
            ..
        }
    ));
}

#[test]
fn references_to_unknown_entities_are_rejected() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteGraphStore::try_new(&conn).unwrap();
    let mut batch = order_batch();
    batch.events.push(event("e4", 40, &["o1", "ghost"]));
    batch.derivations.push(derivation("ghost", "o1"));

    let report = Materializer::new(store, MaterializeOptions::default())
        .materialize(&batch)
        .unwrap();

    assert_eq!(report.events_inserted, 4);
    assert_eq!(report.corr_inserted, 5);
    assert_eq!(report.rejected.len(), 2);
    for rejected in &report.rejected {
        assert!(matches!(
            &rejected.error,
            ValidationError::UnknownEntity { entity_id, .. } if entity_id == "ghost"
        ));
    }
    assert!(store
        .list_corr_edges()
        .unwrap()
        .iter()
        .all(|edge| edge.entity_id != "ghost"));
}

#[test]
fn derivation_closing_a_cycle_is_rejected_at_load() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteGraphStore::try_new(&conn).unwrap();
    let materializer = Materializer::new(store, MaterializeOptions::default());
    materializer.materialize(&order_batch()).unwrap();

    let report = materializer
        .materialize(&LogBatch {
            derivations: vec![derivation("o1", "i1"), derivation("o1", "o1")],
            ..LogBatch::default()
        })
        .unwrap();

    assert_eq!(report.derived_inserted, 0);
    assert_eq!(report.rejected.len(), 2);
    assert!(report
        .rejected
        .iter()
        .all(|record| matches!(record.error, ValidationError::CyclicDerivation { .. })));
    assert_eq!(store.list_derived_edges().unwrap().len(), 1);
}

#[test]
fn ingestion_sequence_is_stable_across_batches() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteGraphStore::try_new(&conn).unwrap();
    let materializer = Materializer::new(store, MaterializeOptions::default());
    materializer.materialize(&order_batch()).unwrap();

    materializer
        .materialize(&LogBatch {
            events: vec![event("e0", 0, &["o1"]), event("e1", 10, &["o1"])],
            ..LogBatch::default()
        })
        .unwrap();

    let seqs = store
        .list_events()
        .unwrap()
        .into_iter()
        .map(|event| (event.id, event.seq))
        .collect::<Vec<_>>();
    assert_eq!(
        seqs,
        vec![
            ("e1".to_string(), 0),
            ("e2".to_string(), 1),
            ("e3".to_string(), 2),
            ("e0".to_string(), 3)
        ]
    );
}

#[test]
fn log_batch_decodes_from_json() {
    let batch: LogBatch = serde_json::from_str(
        r#"{
            "events": [{"id": "e1", "activity": "create", "timestamp": 5, "correlated": ["o1"]}],
            "objects": [{"id": "o1", "type": "order", "attributes": {"price": "3"}}]
        }"#,
    )
    .unwrap();

    assert_eq!(batch.events.len(), 1);
    assert!(batch.relations.is_empty());
    assert!(batch.derivations.is_empty());
}
