use ekg_core::{
    open_db_in_memory, BoundaryPolicy, DfEdgeFilter, EkgConfig, EkgPipeline, GraphStore,
    LogBatch, PipelineError, PipelineStage, SqliteGraphStore,
};

const ORDER_LOG: &str = r#"{
    "objects": [
        {"id": "o1", "type": "order"},
        {"id": "p1", "type": "package", "attributes": {"carrier": "dhl"}}
    ],
    "events": [
        {"id": "e1", "activity": "place", "timestamp": 100, "correlated": ["o1"]},
        {"id": "e2", "activity": "pick", "timestamp": 200, "correlated": ["o1", "p1"]},
        {"id": "e3", "activity": "pack", "timestamp": 300, "correlated": ["o1", "p1"]},
        {"id": "e4", "activity": "ship", "timestamp": 400, "correlated": ["p1"]},
        {"id": "e5", "activity": "bill", "correlated": ["o1"]}
    ],
    "relations": [{"source": "p1", "target": "o1", "qualifier": "ships"}],
    "derivations": [{"derived": "p1", "base": "o1"}]
}"#;

fn config(policy: BoundaryPolicy) -> EkgConfig {
    EkgConfig {
        parallelism: 2,
        boundary_policy: policy,
        ..EkgConfig::default()
    }
}

#[test]
fn pipeline_runs_every_stage_in_order() {
    let batch: LogBatch = serde_json::from_str(ORDER_LOG).unwrap();
    let conn = open_db_in_memory().unwrap();
    let store = SqliteGraphStore::try_new(&conn).unwrap();

    let report = EkgPipeline::new(store, config(BoundaryPolicy::Disabled))
        .run(&batch)
        .unwrap();

    let stages = report
        .timings
        .iter()
        .map(|timing| timing.stage)
        .collect::<Vec<_>>();
    assert_eq!(
        stages,
        vec![
            PipelineStage::Materialize,
            PipelineStage::Construct,
            PipelineStage::Prune
        ]
    );
    assert_eq!(report.materialize.events_inserted, 4);
    assert_eq!(report.materialize.rejected.len(), 1);
    assert_eq!(report.construct.edges_emitted, 4);
    assert_eq!(report.prune.downgraded, 1);
    assert_eq!(report.prune.deleted, 1);
    assert_eq!(report.summary.events, 4);
    assert_eq!(report.summary.rel_edges, 1);
    assert_eq!(report.summary.df_edges, 3);
}

#[test]
fn default_policy_keeps_the_view_trace_connected() {
    let batch: LogBatch = serde_json::from_str(ORDER_LOG).unwrap();
    let conn = open_db_in_memory().unwrap();
    let store = SqliteGraphStore::try_new(&conn).unwrap();

    let report = EkgPipeline::new(store, config(BoundaryPolicy::default()))
        .run(&batch)
        .unwrap();

    // p1: e2 -> e3 -> e4; the shared step e2 -> e3 has no p1 predecessor.
    assert_eq!(report.prune.restored, 0);
    assert_eq!(report.summary.df_edges, 3);
}

#[test]
fn report_serializes_with_stage_durations_in_millis() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteGraphStore::try_new(&conn).unwrap();
    let report = EkgPipeline::new(store, config(BoundaryPolicy::ByEntityId))
        .run(&LogBatch::default())
        .unwrap();

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["timings"][0]["stage"], "materialize");
    assert!(json["timings"][0]["duration_ms"].is_u64());
    assert_eq!(json["prune"]["policy"], "by_entity_id");
    assert_eq!(json["summary"]["df_edges"], 0);
}

#[test]
fn stage_failure_stops_the_pipeline() {
    let batch: LogBatch = serde_json::from_str(ORDER_LOG).unwrap();
    let conn = open_db_in_memory().unwrap();
    let store = SqliteGraphStore::try_new(&conn).unwrap();
    let config = EkgConfig {
        prune_timeout_ms: Some(0),
        ..config(BoundaryPolicy::ByEntityId)
    };

    let err = EkgPipeline::new(store, config).run(&batch).unwrap_err();

    assert!(matches!(err, PipelineError::Prune(_)));
}

#[test]
fn rebuild_starts_from_an_empty_store() {
    let batch: LogBatch = serde_json::from_str(ORDER_LOG).unwrap();
    let conn = open_db_in_memory().unwrap();
    let store = SqliteGraphStore::try_new(&conn).unwrap();
    let pipeline = EkgPipeline::new(store, config(BoundaryPolicy::Disabled));
    pipeline.run(&batch).unwrap();

    let late: LogBatch = serde_json::from_str(
        r#"{
            "objects": [{"id": "o9", "type": "order"}],
            "events": [
                {"id": "x1", "activity": "place", "timestamp": 1, "correlated": ["o9"]},
                {"id": "x2", "activity": "bill", "timestamp": 2, "correlated": ["o9"]}
            ]
        }"#,
    )
    .unwrap();
    let report = pipeline.rebuild(&late).unwrap();

    assert_eq!(report.summary.events, 2);
    assert_eq!(report.summary.entities, 1);
    assert_eq!(report.summary.rel_edges, 0);
    assert_eq!(report.summary.df_edges, 1);
    assert!(store
        .list_df_edges(&DfEdgeFilter::owned_by("o1"))
        .unwrap()
        .is_empty());
}

#[test]
fn rerun_with_interleaved_event_keeps_traces_consecutive() {
    let batch: LogBatch = serde_json::from_str(ORDER_LOG).unwrap();
    let conn = open_db_in_memory().unwrap();
    let store = SqliteGraphStore::try_new(&conn).unwrap();
    let pipeline = EkgPipeline::new(store, config(BoundaryPolicy::Disabled));
    pipeline.run(&batch).unwrap();

    let late: LogBatch = serde_json::from_str(
        r#"{"events": [{"id": "e1b", "activity": "check", "timestamp": 150, "correlated": ["o1"]}]}"#,
    )
    .unwrap();
    let report = pipeline.run(&late).unwrap();

    assert_eq!(report.construct.edges_removed, 1);
    let mut pairs = store
        .list_df_edges(&DfEdgeFilter::owned_by("o1"))
        .unwrap()
        .into_iter()
        .map(|edge| (edge.source_event_id, edge.target_event_id))
        .collect::<Vec<_>>();
    pairs.sort();
    assert_eq!(
        pairs,
        vec![
            ("e1".to_string(), "e1b".to_string()),
            ("e1b".to_string(), "e2".to_string()),
            ("e2".to_string(), "e3".to_string())
        ]
    );
}
