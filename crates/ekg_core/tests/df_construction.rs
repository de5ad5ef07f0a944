use ekg_core::{
    open_db, open_db_in_memory, CorrEdge, DfConstructor, DfEdgeFilter, DfError, DfOptions,
    EventRecord, GraphStore, LogBatch, MaterializeOptions, Materializer, ObjectRecord,
    SqliteGraphStore, WorkerPool,
};
use std::collections::HashMap;
use std::path::Path;

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

fn load(store: SqliteGraphStore<'_>, batch: &LogBatch) {
    Materializer::new(store, MaterializeOptions::default())
        .materialize(batch)
        .unwrap();
}

fn pairs_of(store: &SqliteGraphStore<'_>, entity_id: &str) -> Vec<(String, String)> {
    let mut pairs = store
        .list_df_edges(&DfEdgeFilter::owned_by(entity_id))
        .unwrap()
        .into_iter()
        .map(|edge| (edge.source_event_id, edge.target_event_id))
        .collect::<Vec<_>>();
    pairs.sort();
    pairs
}

fn pair(source: &str, target: &str) -> (String, String) {
    (source.to_string(), target.to_string())
}

/// Orders o1/o2 share some events; item i1 has a single event.
fn shared_batch() -> LogBatch {
    LogBatch {
        events: vec![
            event("e3", 30, &["o1"]),
            event("e1", 10, &["o1", "o2"]),
            event("e4", 40, &["o2"]),
            event("e2", 20, &["o1", "o2", "i1"]),
        ],
        objects: vec![
            object("o1", "order"),
            object("o2", "order"),
            object("i1", "item"),
            object("lonely", "item"),
        ],
        ..LogBatch::default()
    }
}

#[test]
fn every_entity_gets_its_consecutive_pairs() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteGraphStore::try_new(&conn).unwrap();
    load(store, &shared_batch());

    let report = DfConstructor::new(
        store,
        DfOptions {
            pool: WorkerPool::new(3),
            ..DfOptions::default()
        },
    )
    .construct()
    .unwrap();

    assert_eq!(report.entities_seen, 3);
    assert_eq!(report.edges_emitted, 4);
    assert_eq!(report.edges_inserted, 4);
    assert_eq!(pairs_of(&store, "o1"), vec![pair("e1", "e2"), pair("e2", "e3")]);
    assert_eq!(pairs_of(&store, "o2"), vec![pair("e1", "e2"), pair("e2", "e4")]);
    assert!(pairs_of(&store, "i1").is_empty());
    assert!(pairs_of(&store, "lonely").is_empty());

    let o1 = store.list_df_edges(&DfEdgeFilter::owned_by("o1")).unwrap();
    assert!(o1.iter().all(|edge| edge.entity_type == "order"));
}

#[test]
fn construction_is_idempotent() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteGraphStore::try_new(&conn).unwrap();
    load(store, &shared_batch());
    let constructor = DfConstructor::new(store, DfOptions::default());

    constructor.construct().unwrap();
    let before = store.graph_summary().unwrap();
    let again = constructor.construct().unwrap();

    assert_eq!(again.edges_emitted, 4);
    assert_eq!(again.edges_inserted, 0);
    assert_eq!(store.graph_summary().unwrap(), before);
}

#[test]
fn equal_timestamps_keep_ingestion_order() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteGraphStore::try_new(&conn).unwrap();
    load(
        store,
        &LogBatch {
            events: vec![
                event("z", 5, &["o1"]),
                event("a", 5, &["o1"]),
                event("m", 5, &["o1"]),
            ],
            objects: vec![object("o1", "order")],
            ..LogBatch::default()
        },
    );

    for _ in 0..3 {
        DfConstructor::new(store, DfOptions::default())
            .construct()
            .unwrap();
    }

    assert_eq!(pairs_of(&store, "o1"), vec![pair("a", "m"), pair("z", "a")]);
    assert_eq!(store.graph_summary().unwrap().df_edges, 2);
}

#[test]
fn later_batches_extend_traces_without_duplicates() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteGraphStore::try_new(&conn).unwrap();
    load(store, &shared_batch());
    let constructor = DfConstructor::new(store, DfOptions::default());
    constructor.construct().unwrap();

    load(
        store,
        &LogBatch {
            events: vec![event("e5", 50, &["o1"])],
            ..LogBatch::default()
        },
    );
    let report = constructor.construct().unwrap();

    assert_eq!(report.edges_inserted, 1);
    assert_eq!(report.edges_removed, 0);
    assert_eq!(
        pairs_of(&store, "o1"),
        vec![pair("e1", "e2"), pair("e2", "e3"), pair("e3", "e5")]
    );
}

#[test]
fn event_landing_mid_trace_replaces_the_skipped_pair() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteGraphStore::try_new(&conn).unwrap();
    load(
        store,
        &LogBatch {
            events: vec![event("e1", 10, &["o1"]), event("e3", 30, &["o1", "o2"])],
            objects: vec![object("o1", "order"), object("o2", "order")],
            ..LogBatch::default()
        },
    );
    let constructor = DfConstructor::new(store, DfOptions::default());
    constructor.construct().unwrap();
    assert_eq!(pairs_of(&store, "o1"), vec![pair("e1", "e3")]);

    load(
        store,
        &LogBatch {
            events: vec![event("e2", 20, &["o1"])],
            ..LogBatch::default()
        },
    );
    let report = constructor.construct().unwrap();

    assert_eq!(report.edges_inserted, 2);
    assert_eq!(report.edges_removed, 1);
    assert_eq!(pairs_of(&store, "o1"), vec![pair("e1", "e2"), pair("e2", "e3")]);
    assert!(pairs_of(&store, "o2").is_empty());
    assert_eq!(store.graph_summary().unwrap().df_edges, 2);
}

#[test]
fn dangling_correlation_fails_before_any_write() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteGraphStore::try_new(&conn).unwrap();
    load(store, &shared_batch());
    store
        .upsert_corr_edges(&[CorrEdge {
            event_id: "missing".to_string(),
            entity_id: "o1".to_string(),
        }])
        .unwrap();

    let err = DfConstructor::new(store, DfOptions::default())
        .construct()
        .unwrap_err();

    assert!(matches!(err, DfError::Reference(_)));
    assert_eq!(store.graph_summary().unwrap().df_edges, 0);
}

#[test]
fn concurrent_constructors_converge_on_one_edge_set() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ekg.db");
    {
        let conn = open_db(&path).unwrap();
        load(SqliteGraphStore::try_new(&conn).unwrap(), &shared_batch());
    }

    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| construct_on(&path));
        }
    });

    let conn = open_db(&path).unwrap();
    let store = SqliteGraphStore::try_new(&conn).unwrap();
    let edges = store.list_df_edges(&DfEdgeFilter::default()).unwrap();
    let mut per_key: HashMap<_, usize> = HashMap::new();
    for edge in &edges {
        *per_key.entry(edge.key()).or_default() += 1;
    }
    assert_eq!(edges.len(), 4);
    assert!(per_key.values().all(|count| *count == 1));
}

fn construct_on(path: &Path) {
    let conn = open_db(path).unwrap();
    let store = SqliteGraphStore::try_new(&conn).unwrap();
    DfConstructor::new(store, DfOptions::default())
        .construct()
        .unwrap();
}
