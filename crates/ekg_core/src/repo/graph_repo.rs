//! Graph store contracts and SQLite implementation.
//!
//! # Responsibility
//! - Expose the primitive operations the EKG services rely on: idempotent
//!   upsert by natural key, filtered reads, batch delete by edge identity,
//!   and a transient queryable flag on DF edges.
//! - Keep SQL details inside the persistence boundary.
//!
//! # Invariants
//! - Every write path is `INSERT OR IGNORE` on the natural key; re-running a
//!   write never duplicates a node or edge.
//! - Multi-row writes run in one `IMMEDIATE` transaction.
//! - Read paths reject invalid persisted state instead of masking it.
//! - Flags only ever hold values while a prune run is `flagged`.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::graph::{
    CorrEdge, DerivedEdge, DfEdge, DfEdgeKey, Entity, EntityId, Event, EventDraft, GraphSummary,
    RelEdge,
};
use crate::model::prune::{BoundaryPolicy, PruneRun, PruneRunId, PruneRunStatus};
use rusqlite::types::Value;
use rusqlite::{
    params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row, ToSql, Transaction,
    TransactionBehavior,
};
use std::collections::{BTreeMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const REQUIRED_TABLES: &[&str] = &[
    "events",
    "entities",
    "entity_attributes",
    "corr_edges",
    "rel_edges",
    "derived_edges",
    "df_edges",
    "prune_runs",
];

const PRUNE_RUN_SELECT_SQL: &str = "SELECT
    run_uuid,
    policy,
    status,
    edges_considered,
    downgraded,
    restored,
    deleted
FROM prune_runs";

const DF_INSERT_SQL: &str = "INSERT OR IGNORE INTO df_edges (
    source_event_id,
    target_event_id,
    entity_id,
    entity_type
) VALUES (?1, ?2, ?3, ?4);";

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from graph store operations.
#[derive(Debug)]
pub enum StoreError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Store is busy or locked; safe to retry idempotent writes.
    Unavailable(rusqlite::Error),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    MissingRequiredTable(&'static str),
    /// Persisted data cannot be converted to a valid graph value.
    InvalidData(String),
    /// Commit was requested for a run that is not `flagged`.
    PruneRunNotPending(PruneRunId),
    /// A DF edge vanished between the prune snapshot and flag persistence.
    ConcurrentModification(DfEdgeKey),
}

impl StoreError {
    /// Whether the failure is transient (busy/locked store).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Unavailable(err) => write!(f, "graph store unavailable: {err}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "graph store requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "graph store requires table `{table}`")
            }
            Self::InvalidData(message) => write!(f, "invalid persisted graph data: {message}"),
            Self::PruneRunNotPending(run_id) => {
                write!(f, "prune run {run_id} is not pending commit")
            }
            Self::ConcurrentModification(key) => write!(
                f,
                "df edge {} -> {} owned by `{}` changed during pruning",
                key.source_event_id, key.target_event_id, key.entity_id
            ),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Unavailable(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        match value {
            DbError::Sqlite(err) => Self::from(err),
            other => Self::Db(other),
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        let transient = matches!(
            value.sqlite_error_code(),
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
        );
        if transient {
            Self::Unavailable(value)
        } else {
            Self::Db(DbError::Sqlite(value))
        }
    }
}

/// Typed filter for DF edge reads. `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DfEdgeFilter {
    pub entity_id: Option<EntityId>,
    pub entity_type: Option<String>,
    /// `Some(b)` matches edges currently flagged `b`; flags exist only while
    /// a prune run is pending.
    pub informative: Option<bool>,
}

impl DfEdgeFilter {
    pub fn owned_by(entity_id: impl Into<EntityId>) -> Self {
        Self {
            entity_id: Some(entity_id.into()),
            ..Self::default()
        }
    }
}

/// Outcome of [`GraphStore::replace_df_edges`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DfEdgeSync {
    pub inserted: usize,
    /// Stored edges of a listed owner that were not in the new set.
    pub removed: usize,
}

/// Graph store primitives used by the EKG services.
pub trait GraphStore {
    /// Inserts entities (and their attributes) not yet present. Returns the
    /// number of newly inserted entities.
    fn upsert_entities(&self, entities: &[Entity]) -> StoreResult<usize>;
    /// Inserts events not yet present, assigning ingestion sequence numbers
    /// in slice order. Existing events keep their original sequence number.
    fn append_events(&self, drafts: &[EventDraft]) -> StoreResult<usize>;
    fn upsert_corr_edges(&self, edges: &[CorrEdge]) -> StoreResult<usize>;
    fn upsert_rel_edges(&self, edges: &[RelEdge]) -> StoreResult<usize>;
    fn upsert_derived_edges(&self, edges: &[DerivedEdge]) -> StoreResult<usize>;
    fn upsert_df_edges(&self, edges: &[DfEdge]) -> StoreResult<usize>;
    /// Makes the stored DF edges of every entity in `owners` exactly the
    /// subset of `edges` it owns, in one transaction. Edges of other
    /// entities are left alone.
    fn replace_df_edges(&self, owners: &[EntityId], edges: &[DfEdge])
        -> StoreResult<DfEdgeSync>;

    /// Events in ingestion order.
    fn list_events(&self) -> StoreResult<Vec<Event>>;
    fn list_entities(&self) -> StoreResult<Vec<Entity>>;
    fn list_corr_edges(&self) -> StoreResult<Vec<CorrEdge>>;
    fn list_rel_edges(&self) -> StoreResult<Vec<RelEdge>>;
    fn list_derived_edges(&self) -> StoreResult<Vec<DerivedEdge>>;
    fn list_df_edges(&self, filter: &DfEdgeFilter) -> StoreResult<Vec<DfEdge>>;

    /// Deletes DF edges by identity in one transaction.
    fn delete_df_edges(&self, keys: &[DfEdgeKey]) -> StoreResult<usize>;

    /// Persists informative flags for `run` and records the run as pending.
    /// Any earlier pending run is aborted and its flags overwritten.
    fn tag_df_edges(&self, run: &PruneRun, flags: &[(DfEdgeKey, bool)]) -> StoreResult<()>;
    fn pending_prune_run(&self) -> StoreResult<Option<PruneRun>>;
    fn get_prune_run(&self, run_id: PruneRunId) -> StoreResult<Option<PruneRun>>;
    /// Deletes every edge flagged non-informative, clears all flags and
    /// marks the run committed, atomically. Returns deleted edge count.
    fn commit_prune_run(&self, run_id: PruneRunId) -> StoreResult<usize>;

    fn graph_summary(&self) -> StoreResult<GraphSummary>;
    /// Removes every node, edge and prune run.
    fn clear(&self) -> StoreResult<()>;
}

/// SQLite-backed graph store borrowing a migrated connection.
#[derive(Clone, Copy)]
pub struct SqliteGraphStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteGraphStore<'conn> {
    /// Creates the store from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> StoreResult<Self> {
        ensure_graph_connection_ready(conn)?;
        Ok(Self { conn })
    }

    fn write_tx(&self) -> StoreResult<Transaction<'conn>> {
        Ok(Transaction::new_unchecked(
            self.conn,
            TransactionBehavior::Immediate,
        )?)
    }

    fn insert_all<T>(
        &self,
        sql: &str,
        rows: &[T],
        bind: impl Fn(&T) -> Vec<&dyn ToSql>,
    ) -> StoreResult<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let tx = self.write_tx()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare_cached(sql)?;
            for row in rows {
                inserted += stmt.execute(bind(row).as_slice())?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }
}

impl GraphStore for SqliteGraphStore<'_> {
    fn upsert_entities(&self, entities: &[Entity]) -> StoreResult<usize> {
        if entities.is_empty() {
            return Ok(0);
        }
        let tx = self.write_tx()?;
        let mut inserted = 0;
        {
            let mut entity_stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO entities (entity_id, entity_type) VALUES (?1, ?2);",
            )?;
            let mut attribute_stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO entity_attributes (entity_id, key, value)
                 VALUES (?1, ?2, ?3);",
            )?;
            for entity in entities {
                if entity_stmt.execute(params![entity.id, entity.entity_type])? == 0 {
                    continue;
                }
                inserted += 1;
                for (key, value) in &entity.attributes {
                    attribute_stmt.execute(params![entity.id, key, value])?;
                }
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn append_events(&self, drafts: &[EventDraft]) -> StoreResult<usize> {
        if drafts.is_empty() {
            return Ok(0);
        }
        let tx = self.write_tx()?;
        let mut next_seq: i64 =
            tx.query_row("SELECT COALESCE(MAX(seq) + 1, 0) FROM events;", [], |row| {
                row.get(0)
            })?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO events (event_id, activity, timestamp_ms, seq)
                 VALUES (?1, ?2, ?3, ?4);",
            )?;
            for draft in drafts {
                let changed =
                    stmt.execute(params![draft.id, draft.activity, draft.timestamp_ms, next_seq])?;
                if changed > 0 {
                    next_seq += 1;
                    inserted += 1;
                }
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn upsert_corr_edges(&self, edges: &[CorrEdge]) -> StoreResult<usize> {
        self.insert_all(
            "INSERT OR IGNORE INTO corr_edges (event_id, entity_id) VALUES (?1, ?2);",
            edges,
            |edge| vec![&edge.event_id as &dyn ToSql, &edge.entity_id],
        )
    }

    fn upsert_rel_edges(&self, edges: &[RelEdge]) -> StoreResult<usize> {
        self.insert_all(
            "INSERT OR IGNORE INTO rel_edges (source_id, target_id, qualifier)
             VALUES (?1, ?2, ?3);",
            edges,
            |edge| vec![&edge.source_id as &dyn ToSql, &edge.target_id, &edge.qualifier],
        )
    }

    fn upsert_derived_edges(&self, edges: &[DerivedEdge]) -> StoreResult<usize> {
        self.insert_all(
            "INSERT OR IGNORE INTO derived_edges (derived_id, base_id) VALUES (?1, ?2);",
            edges,
            |edge| vec![&edge.derived_id as &dyn ToSql, &edge.base_id],
        )
    }

    fn upsert_df_edges(&self, edges: &[DfEdge]) -> StoreResult<usize> {
        self.insert_all(DF_INSERT_SQL, edges, df_edge_params)
    }

    fn replace_df_edges(
        &self,
        owners: &[EntityId],
        edges: &[DfEdge],
    ) -> StoreResult<DfEdgeSync> {
        if owners.is_empty() && edges.is_empty() {
            return Ok(DfEdgeSync::default());
        }
        let expected = edges.iter().map(DfEdge::key).collect::<HashSet<_>>();
        let tx = self.write_tx()?;
        let mut sync = DfEdgeSync::default();
        {
            let mut stmt = tx.prepare_cached(DF_INSERT_SQL)?;
            for edge in edges {
                sync.inserted += stmt.execute(df_edge_params(edge).as_slice())?;
            }
        }

        let stale = {
            let mut stmt = tx.prepare_cached(
                "SELECT source_event_id, target_event_id, entity_id
                 FROM df_edges
                 WHERE entity_id = ?1;",
            )?;
            let mut stale = Vec::new();
            for owner in owners {
                let stored = stmt
                    .query_map([owner], |row| {
                        Ok(DfEdgeKey {
                            source_event_id: row.get(0)?,
                            target_event_id: row.get(1)?,
                            entity_id: row.get(2)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                stale.extend(stored.into_iter().filter(|key| !expected.contains(key)));
            }
            stale
        };
        sync.removed = delete_df_keys(&tx, &stale)?;

        tx.commit()?;
        Ok(sync)
    }

    fn list_events(&self) -> StoreResult<Vec<Event>> {
        let mut stmt = self.conn.prepare(
            "SELECT event_id, activity, timestamp_ms, seq
             FROM events
             ORDER BY seq ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut events = Vec::new();
        while let Some(row) = rows.next()? {
            events.push(Event {
                id: row.get("event_id")?,
                activity: row.get("activity")?,
                timestamp_ms: row.get("timestamp_ms")?,
                seq: row.get("seq")?,
            });
        }
        Ok(events)
    }

    fn list_entities(&self) -> StoreResult<Vec<Entity>> {
        let mut entities = BTreeMap::new();
        {
            let mut stmt = self
                .conn
                .prepare("SELECT entity_id, entity_type FROM entities;")?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let id: String = row.get("entity_id")?;
                let entity_type: String = row.get("entity_type")?;
                entities.insert(id.clone(), Entity::new(id, entity_type));
            }
        }

        let mut stmt = self
            .conn
            .prepare("SELECT entity_id, key, value FROM entity_attributes;")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let id: String = row.get("entity_id")?;
            let entity = entities.get_mut(&id).ok_or_else(|| {
                StoreError::InvalidData(format!(
                    "attribute row references missing entity `{id}` in entity_attributes"
                ))
            })?;
            entity.attributes.insert(row.get("key")?, row.get("value")?);
        }

        Ok(entities.into_values().collect())
    }

    fn list_corr_edges(&self) -> StoreResult<Vec<CorrEdge>> {
        let mut stmt = self.conn.prepare(
            "SELECT event_id, entity_id
             FROM corr_edges
             ORDER BY entity_id ASC, event_id ASC;",
        )?;
        let edges = stmt
            .query_map([], |row| {
                Ok(CorrEdge {
                    event_id: row.get(0)?,
                    entity_id: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(edges)
    }

    fn list_rel_edges(&self) -> StoreResult<Vec<RelEdge>> {
        let mut stmt = self.conn.prepare(
            "SELECT source_id, target_id, qualifier
             FROM rel_edges
             ORDER BY source_id ASC, target_id ASC, qualifier ASC;",
        )?;
        let edges = stmt
            .query_map([], |row| {
                Ok(RelEdge {
                    source_id: row.get(0)?,
                    target_id: row.get(1)?,
                    qualifier: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(edges)
    }

    fn list_derived_edges(&self) -> StoreResult<Vec<DerivedEdge>> {
        let mut stmt = self.conn.prepare(
            "SELECT derived_id, base_id
             FROM derived_edges
             ORDER BY derived_id ASC, base_id ASC;",
        )?;
        let edges = stmt
            .query_map([], |row| {
                Ok(DerivedEdge {
                    derived_id: row.get(0)?,
                    base_id: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(edges)
    }

    fn list_df_edges(&self, filter: &DfEdgeFilter) -> StoreResult<Vec<DfEdge>> {
        let mut sql = String::from(
            "SELECT source_event_id, target_event_id, entity_id, entity_type
             FROM df_edges
             WHERE 1 = 1",
        );
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(entity_id) = &filter.entity_id {
            sql.push_str(" AND entity_id = ?");
            bind_values.push(Value::Text(entity_id.clone()));
        }
        if let Some(entity_type) = &filter.entity_type {
            sql.push_str(" AND entity_type = ?");
            bind_values.push(Value::Text(entity_type.clone()));
        }
        if let Some(informative) = filter.informative {
            sql.push_str(" AND informative = ?");
            bind_values.push(Value::Integer(bool_to_int(informative)));
        }
        sql.push_str(" ORDER BY entity_id ASC, source_event_id ASC, target_event_id ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut edges = Vec::new();
        while let Some(row) = rows.next()? {
            edges.push(parse_df_row(row)?);
        }
        Ok(edges)
    }

    fn delete_df_edges(&self, keys: &[DfEdgeKey]) -> StoreResult<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let tx = self.write_tx()?;
        let deleted = delete_df_keys(&tx, keys)?;
        tx.commit()?;
        Ok(deleted)
    }

    fn tag_df_edges(&self, run: &PruneRun, flags: &[(DfEdgeKey, bool)]) -> StoreResult<()> {
        let tx = self.write_tx()?;
        tx.execute(
            "UPDATE prune_runs
             SET status = 'aborted',
                 finished_at = (strftime('%s', 'now') * 1000)
             WHERE status = 'flagged';",
            [],
        )?;
        tx.execute(
            "UPDATE df_edges SET informative = NULL WHERE informative IS NOT NULL;",
            [],
        )?;
        {
            let mut stmt = tx.prepare_cached(
                "UPDATE df_edges
                 SET informative = ?4
                 WHERE source_event_id = ?1
                   AND target_event_id = ?2
                   AND entity_id = ?3;",
            )?;
            for (key, informative) in flags {
                let changed = stmt.execute(params![
                    key.source_event_id,
                    key.target_event_id,
                    key.entity_id,
                    bool_to_int(*informative),
                ])?;
                if changed == 0 {
                    return Err(StoreError::ConcurrentModification(key.clone()));
                }
            }
        }
        tx.execute(
            "INSERT INTO prune_runs (
                run_uuid,
                policy,
                status,
                edges_considered,
                downgraded,
                restored
            ) VALUES (?1, ?2, 'flagged', ?3, ?4, ?5);",
            params![
                run.run_id.to_string(),
                run.policy.as_str(),
                count_to_db(run.edges_considered),
                count_to_db(run.downgraded),
                count_to_db(run.restored),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn pending_prune_run(&self) -> StoreResult<Option<PruneRun>> {
        let mut stmt = self.conn.prepare(&format!(
            "{PRUNE_RUN_SELECT_SQL}
             WHERE status = 'flagged'
             ORDER BY started_at DESC, run_uuid ASC
             LIMIT 1;"
        ))?;
        let mut rows = stmt.query([])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_prune_run_row(row)?));
        }
        Ok(None)
    }

    fn get_prune_run(&self, run_id: PruneRunId) -> StoreResult<Option<PruneRun>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{PRUNE_RUN_SELECT_SQL} WHERE run_uuid = ?1;"))?;
        let mut rows = stmt.query([run_id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_prune_run_row(row)?));
        }
        Ok(None)
    }

    fn commit_prune_run(&self, run_id: PruneRunId) -> StoreResult<usize> {
        let tx = self.write_tx()?;
        let status: Option<String> = tx
            .query_row(
                "SELECT status FROM prune_runs WHERE run_uuid = ?1;",
                [run_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        if status.as_deref() != Some(PruneRunStatus::Flagged.as_str()) {
            return Err(StoreError::PruneRunNotPending(run_id));
        }

        let keys = {
            let mut stmt = tx.prepare(
                "SELECT source_event_id, target_event_id, entity_id
                 FROM df_edges
                 WHERE informative = 0;",
            )?;
            let keys = stmt
                .query_map([], |row| {
                    Ok(DfEdgeKey {
                        source_event_id: row.get(0)?,
                        target_event_id: row.get(1)?,
                        entity_id: row.get(2)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            keys
        };
        let deleted = delete_df_keys(&tx, &keys)?;

        tx.execute(
            "UPDATE df_edges SET informative = NULL WHERE informative IS NOT NULL;",
            [],
        )?;
        tx.execute(
            "UPDATE prune_runs
             SET status = 'committed',
                 deleted = ?2,
                 finished_at = (strftime('%s', 'now') * 1000)
             WHERE run_uuid = ?1;",
            params![run_id.to_string(), count_to_db(deleted as u64)],
        )?;
        tx.commit()?;
        Ok(deleted)
    }

    fn graph_summary(&self) -> StoreResult<GraphSummary> {
        let counts = self.conn.query_row(
            "SELECT
                (SELECT COUNT(*) FROM events),
                (SELECT COUNT(*) FROM entities),
                (SELECT COUNT(*) FROM corr_edges),
                (SELECT COUNT(*) FROM rel_edges),
                (SELECT COUNT(*) FROM derived_edges),
                (SELECT COUNT(*) FROM df_edges);",
            [],
            |row| {
                Ok([
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                ])
            },
        )?;
        Ok(GraphSummary {
            events: count_from_db(counts[0], "events")?,
            entities: count_from_db(counts[1], "entities")?,
            corr_edges: count_from_db(counts[2], "corr_edges")?,
            rel_edges: count_from_db(counts[3], "rel_edges")?,
            derived_edges: count_from_db(counts[4], "derived_edges")?,
            df_edges: count_from_db(counts[5], "df_edges")?,
        })
    }

    fn clear(&self) -> StoreResult<()> {
        let tx = self.write_tx()?;
        for table in REQUIRED_TABLES {
            tx.execute(&format!("DELETE FROM {table};"), [])?;
        }
        tx.commit()?;
        Ok(())
    }
}

fn delete_df_keys(conn: &Connection, keys: &[DfEdgeKey]) -> StoreResult<usize> {
    let mut stmt = conn.prepare_cached(
        "DELETE FROM df_edges
         WHERE source_event_id = ?1
           AND target_event_id = ?2
           AND entity_id = ?3;",
    )?;
    let mut deleted = 0;
    for key in keys {
        deleted += stmt.execute(params![
            key.source_event_id,
            key.target_event_id,
            key.entity_id
        ])?;
    }
    Ok(deleted)
}

fn df_edge_params(edge: &DfEdge) -> Vec<&dyn ToSql> {
    vec![
        &edge.source_event_id as &dyn ToSql,
        &edge.target_event_id,
        &edge.entity_id,
        &edge.entity_type,
    ]
}

fn parse_df_row(row: &Row<'_>) -> StoreResult<DfEdge> {
    let edge = DfEdge {
        source_event_id: row.get("source_event_id")?,
        target_event_id: row.get("target_event_id")?,
        entity_id: row.get("entity_id")?,
        entity_type: row.get("entity_type")?,
    };
    if edge.source_event_id == edge.target_event_id {
        return Err(StoreError::InvalidData(format!(
            "self-loop df edge on event `{}` owned by `{}`",
            edge.source_event_id, edge.entity_id
        )));
    }
    Ok(edge)
}

fn parse_prune_run_row(row: &Row<'_>) -> StoreResult<PruneRun> {
    let uuid_text: String = row.get("run_uuid")?;
    let run_id = Uuid::parse_str(&uuid_text).map_err(|_| {
        StoreError::InvalidData(format!(
            "invalid uuid value `{uuid_text}` in prune_runs.run_uuid"
        ))
    })?;

    let policy_text: String = row.get("policy")?;
    let policy = BoundaryPolicy::parse(&policy_text).ok_or_else(|| {
        StoreError::InvalidData(format!(
            "invalid boundary policy `{policy_text}` in prune_runs.policy"
        ))
    })?;

    let status_text: String = row.get("status")?;
    let status = PruneRunStatus::parse(&status_text).ok_or_else(|| {
        StoreError::InvalidData(format!(
            "invalid run status `{status_text}` in prune_runs.status"
        ))
    })?;

    let deleted = match row.get::<_, Option<i64>>("deleted")? {
        Some(value) => Some(count_from_db(value, "prune_runs.deleted")?),
        None => None,
    };

    Ok(PruneRun {
        run_id,
        policy,
        status,
        edges_considered: count_from_db(
            row.get("edges_considered")?,
            "prune_runs.edges_considered",
        )?,
        downgraded: count_from_db(row.get("downgraded")?, "prune_runs.downgraded")?,
        restored: count_from_db(row.get("restored")?, "prune_runs.restored")?,
        deleted,
    })
}

fn count_from_db(value: i64, column: &str) -> StoreResult<u64> {
    u64::try_from(value)
        .map_err(|_| StoreError::InvalidData(format!("negative count `{value}` in {column}")))
}

fn count_to_db(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

fn ensure_graph_connection_ready(conn: &Connection) -> StoreResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(StoreError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for table in REQUIRED_TABLES {
        if !table_exists(conn, table)? {
            return Err(StoreError::MissingRequiredTable(*table));
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> StoreResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}
