use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{
    EdgeKind, GraphNode, GraphPath, GraphRelationship, GraphStats, Label, NodeId, NodeKey,
    QueryRow, Related, Span,
};
use blake3::Hasher;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, Row, params};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

mod migrations;

const NODE_COLUMN_COUNT: usize = 8;

#[derive(Debug)]
struct ConnectionCustomizer {
    busy_timeout: Duration,
}

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for ConnectionCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.busy_timeout(self.busy_timeout)?;
        // Pool connections only ever serve reads.
        conn.execute_batch("PRAGMA query_only = ON;")?;
        Ok(())
    }

    fn on_release(&self, _conn: Connection) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDigest {
    pub rows: usize,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphDigest {
    pub nodes: TableDigest,
    pub edges: TableDigest,
}

/// Client for the persistent repository graph.
///
/// Writes go through one mutex-guarded connection, so concurrent ingestion
/// tasks serialize on the store itself. Reads use a pool of `query_only`
/// connections.
pub struct GraphStore {
    write_conn: Mutex<Connection>,
    read_pool: Pool<SqliteConnectionManager>,
    statements: AtomicUsize,
}

impl GraphStore {
    /// Open (creating if needed) the store at `location`, a filesystem path
    /// or a SQLite `file:` URI.
    pub fn open(location: &str) -> Result<Self> {
        if !location.starts_with("file:") {
            crate::util::ensure_parent_dir(Path::new(location)).map_err(Error::write)?;
        }

        let config = Config::get();
        let busy_timeout = Duration::from_secs(config.busy_timeout_secs);
        tracing::debug!(
            location,
            pool_size = config.pool_size,
            min_idle = config.pool_min_idle,
            "opening graph store"
        );

        let write_conn = Connection::open(location)
            .map_err(|err| Error::GraphWrite(format!("open graph store at {location}: {err}")))?;
        write_conn.busy_timeout(busy_timeout).map_err(Error::write)?;
        write_conn
            .execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA foreign_keys = ON;
                ",
            )
            .map_err(Error::write)?;
        migrations::migrate(&write_conn).map_err(Error::write)?;

        let manager = SqliteConnectionManager::file(location);
        let read_pool = Pool::builder()
            .max_size(config.pool_size)
            .min_idle(Some(config.pool_min_idle))
            .connection_timeout(busy_timeout)
            .connection_customizer(Box::new(ConnectionCustomizer { busy_timeout }))
            .build(manager)
            .map_err(|err| Error::GraphRead(format!("create connection pool: {err}")))?;

        Ok(Self {
            write_conn: Mutex::new(write_conn),
            read_pool,
            statements: AtomicUsize::new(0),
        })
    }

    /// Number of statements issued against the store since it was opened.
    pub fn statement_count(&self) -> usize {
        self.statements.load(Ordering::SeqCst)
    }

    fn tick(&self) {
        self.statements.fetch_add(1, Ordering::SeqCst);
    }

    // A worker that panicked mid-write must not wedge every later writer.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.write_conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.read_pool
            .get()
            .map_err(|err| Error::GraphRead(format!("get read connection from pool: {err}")))
    }

    /// Create-if-absent-else-reuse on the node key. A span overwrites the
    /// stored start/end lines.
    pub fn merge_node(&self, key: NodeKey<'_>, span: Option<Span>) -> Result<NodeId> {
        let key_string = key.key_string();
        let conn = self.conn();
        self.tick();
        conn.execute(
            "INSERT INTO nodes (key, label, name, file, path, start_line, end_line)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET
                start_line = COALESCE(excluded.start_line, nodes.start_line),
                end_line = COALESCE(excluded.end_line, nodes.end_line)",
            params![
                key_string,
                key.label().as_str(),
                key.name(),
                key.file(),
                key.path(),
                span.map(|s| s.start),
                span.map(|s| s.end),
            ],
        )
        .map_err(Error::write)?;
        self.tick();
        let id: NodeId = conn
            .query_row(
                "SELECT id FROM nodes WHERE key = ?",
                params![key_string],
                |row| row.get(0),
            )
            .map_err(Error::write)?;
        Ok(id)
    }

    /// Unconditional insert; used for nodes that have no identity key.
    pub fn create_node(&self, label: Label, text: &str) -> Result<NodeId> {
        let conn = self.conn();
        self.tick();
        conn.execute(
            "INSERT INTO nodes (key, label, text) VALUES (NULL, ?, ?)",
            params![label.as_str(), text],
        )
        .map_err(Error::write)?;
        Ok(conn.last_insert_rowid())
    }

    pub fn merge_edge(&self, source: NodeId, kind: EdgeKind, target: NodeId) -> Result<()> {
        self.tick();
        self.conn()
            .execute(
                "INSERT INTO edges (source_id, kind, target_id) VALUES (?, ?, ?)
                 ON CONFLICT(source_id, kind, target_id) DO NOTHING",
                params![source, kind.as_str(), target],
            )
            .map_err(Error::write)?;
        Ok(())
    }

    pub fn nodes_by_name(&self, name: &str) -> Result<Vec<GraphNode>> {
        self.tick();
        let conn = self.read_conn()?;
        let sql = format!(
            "SELECT {} FROM nodes n WHERE n.name = ? ORDER BY n.id",
            node_columns("n")
        );
        let mut stmt = conn.prepare(&sql).map_err(Error::read)?;
        let rows = stmt
            .query_map(params![name], |row| node_from_row_offset(row, 0))
            .map_err(Error::read)?;
        collect_rows(rows)
    }

    /// Nodes one `kind` hop away from any `anchor_label` node named `name`.
    pub fn one_hop(
        &self,
        name: &str,
        anchor_label: Label,
        kind: EdgeKind,
        direction: Direction,
    ) -> Result<Vec<GraphNode>> {
        let (anchor_col, other_col) = match direction {
            Direction::Outgoing => ("source_id", "target_id"),
            Direction::Incoming => ("target_id", "source_id"),
        };
        let sql = format!(
            "SELECT DISTINCT {cols}
             FROM nodes anchor
             JOIN edges e ON e.{anchor_col} = anchor.id AND e.kind = ?
             JOIN nodes n ON n.id = e.{other_col}
             WHERE anchor.label = ? AND anchor.name = ?
             ORDER BY n.id",
            cols = node_columns("n"),
        );
        self.tick();
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(&sql).map_err(Error::read)?;
        let rows = stmt
            .query_map(params![kind.as_str(), anchor_label.as_str(), name], |row| {
                node_from_row_offset(row, 0)
            })
            .map_err(Error::read)?;
        collect_rows(rows)
    }

    /// `(a)-[r:kind]->(b)` for every node `a` named `name`, any label.
    pub fn related(&self, name: &str, kind: EdgeKind) -> Result<Vec<Related>> {
        let sql = format!(
            "SELECT {a}, e.kind, {b}
             FROM nodes a
             JOIN edges e ON e.source_id = a.id AND e.kind = ?
             JOIN nodes b ON b.id = e.target_id
             WHERE a.name = ?
             ORDER BY e.id",
            a = node_columns("a"),
            b = node_columns("b"),
        );
        self.tick();
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(&sql).map_err(Error::read)?;
        let rows = stmt
            .query_map(params![kind.as_str(), name], |row| {
                let a = node_from_row_offset(row, 0)?;
                let kind: String = row.get(NODE_COLUMN_COUNT)?;
                let b = node_from_row_offset(row, NODE_COLUMN_COUNT + 1)?;
                let r = GraphRelationship {
                    kind,
                    start: a.id,
                    end: b.id,
                };
                Ok(Related { a, r, b })
            })
            .map_err(Error::read)?;
        collect_rows(rows)
    }

    /// Every chain of 1..=`max_hops` IMPORTS edges starting at the File node
    /// with `path`. A node appears at most once per chain.
    pub fn import_paths(&self, path: &str, max_hops: usize) -> Result<Vec<GraphPath>> {
        let kind = EdgeKind::Imports.as_str();
        let trails: Vec<String> = {
            self.tick();
            let conn = self.read_conn()?;
            let mut stmt = conn
                .prepare(
                    "WITH RECURSIVE chain(node_id, trail, hops) AS (
                        SELECT e.target_id, f.id || ',' || e.target_id, 1
                        FROM nodes f
                        JOIN edges e ON e.source_id = f.id AND e.kind = ?1
                        WHERE f.label = 'File' AND f.path = ?2
                        UNION ALL
                        SELECT e.target_id, c.trail || ',' || e.target_id, c.hops + 1
                        FROM chain c
                        JOIN edges e ON e.source_id = c.node_id AND e.kind = ?1
                        WHERE c.hops < ?3
                          AND instr(',' || c.trail || ',', ',' || e.target_id || ',') = 0
                    )
                    SELECT trail FROM chain ORDER BY hops, trail",
                )
                .map_err(Error::read)?;
            let rows = stmt
                .query_map(params![kind, path, max_hops as i64], |row| row.get(0))
                .map_err(Error::read)?;
            collect_rows(rows)?
        };
        if trails.is_empty() {
            return Ok(Vec::new());
        }

        let chains: Vec<Vec<NodeId>> = trails
            .iter()
            .map(|trail| {
                trail
                    .split(',')
                    .filter_map(|id| id.parse::<NodeId>().ok())
                    .collect()
            })
            .collect();
        let mut ids: Vec<NodeId> = chains.iter().flatten().copied().collect();
        ids.sort_unstable();
        ids.dedup();
        let nodes = self.nodes_by_ids(&ids)?;

        let mut paths = Vec::with_capacity(chains.len());
        for chain in chains {
            let mut path_nodes = Vec::with_capacity(chain.len());
            for id in &chain {
                let node = nodes
                    .get(id)
                    .cloned()
                    .ok_or_else(|| Error::GraphRead(format!("node {id} vanished mid-query")))?;
                path_nodes.push(node);
            }
            let relationships = chain
                .windows(2)
                .map(|pair| GraphRelationship {
                    kind: kind.to_string(),
                    start: pair[0],
                    end: pair[1],
                })
                .collect();
            paths.push(GraphPath {
                nodes: path_nodes,
                relationships,
            });
        }
        Ok(paths)
    }

    fn nodes_by_ids(&self, ids: &[NodeId]) -> Result<HashMap<NodeId, GraphNode>> {
        let mut sql = format!("SELECT {} FROM nodes n WHERE n.id IN (", node_columns("n"));
        for (idx, _) in ids.iter().enumerate() {
            if idx > 0 {
                sql.push(',');
            }
            sql.push('?');
        }
        sql.push(')');
        self.tick();
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(&sql).map_err(Error::read)?;
        let params: Vec<&dyn rusqlite::ToSql> =
            ids.iter().map(|id| id as &dyn rusqlite::ToSql).collect();
        let rows = stmt
            .query_map(&*params, |row| node_from_row_offset(row, 0))
            .map_err(Error::read)?;
        let mut out = HashMap::new();
        for node in collect_rows(rows)? {
            out.insert(node.id, node);
        }
        Ok(out)
    }

    /// Run caller-supplied SQL on a read-only connection, returning at most
    /// `max_rows` rows keyed by column name.
    pub fn raw_query(&self, sql: &str, max_rows: usize) -> Result<Vec<QueryRow>> {
        self.tick();
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(sql).map_err(Error::read)?;
        let columns: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(|name| name.to_string())
            .collect();
        let mut rows = stmt.query([]).map_err(Error::read)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(Error::read)? {
            if out.len() >= max_rows {
                break;
            }
            let mut record = QueryRow::new();
            for (idx, column) in columns.iter().enumerate() {
                let value = row.get_ref(idx).map_err(Error::read)?;
                record.insert(column.clone(), json_value(value));
            }
            out.push(record);
        }
        Ok(out)
    }

    pub fn stats(&self) -> Result<GraphStats> {
        self.tick();
        let conn = self.read_conn()?;
        let mut stats = GraphStats::default();

        let mut stmt = conn
            .prepare("SELECT label, COUNT(*) FROM nodes GROUP BY label ORDER BY label")
            .map_err(Error::read)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(Error::read)?;
        for (label, count) in collect_rows(rows)? {
            stats.nodes += count as usize;
            stats.nodes_by_label.insert(label, count as usize);
        }

        self.tick();
        let mut stmt = conn
            .prepare("SELECT kind, COUNT(*) FROM edges GROUP BY kind ORDER BY kind")
            .map_err(Error::read)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(Error::read)?;
        for (kind, count) in collect_rows(rows)? {
            stats.edges += count as usize;
            stats.edges_by_kind.insert(kind, count as usize);
        }
        Ok(stats)
    }

    /// Content digest of the node and edge sets, independent of row ids.
    pub fn digest(&self) -> Result<GraphDigest> {
        Ok(GraphDigest {
            nodes: self.digest_nodes()?,
            edges: self.digest_edges()?,
        })
    }

    fn digest_nodes(&self) -> Result<TableDigest> {
        self.tick();
        let conn = self.read_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT key, label, name, file, path, text, start_line, end_line
                 FROM nodes
                 ORDER BY key IS NULL, key, text, id",
            )
            .map_err(Error::read)?;
        let rows = stmt
            .query_map([], |row| {
                let key: Option<String> = row.get(0)?;
                let label: String = row.get(1)?;
                let name: Option<String> = row.get(2)?;
                let file: Option<String> = row.get(3)?;
                let path: Option<String> = row.get(4)?;
                let text: Option<String> = row.get(5)?;
                let start: Option<i64> = row.get(6)?;
                let end: Option<i64> = row.get(7)?;
                Ok(json!([key, label, name, file, path, text, start, end]).to_string())
            })
            .map_err(Error::read)?;
        digest_rows(rows)
    }

    fn digest_edges(&self) -> Result<TableDigest> {
        self.tick();
        let conn = self.read_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT COALESCE(s.key, s.label || '#' || s.text) AS src,
                        e.kind,
                        COALESCE(t.key, t.label || '#' || t.text) AS dst
                 FROM edges e
                 JOIN nodes s ON s.id = e.source_id
                 JOIN nodes t ON t.id = e.target_id
                 ORDER BY src, e.kind, dst",
            )
            .map_err(Error::read)?;
        let rows = stmt
            .query_map([], |row| {
                let src: String = row.get(0)?;
                let kind: String = row.get(1)?;
                let dst: String = row.get(2)?;
                Ok(json!([src, kind, dst]).to_string())
            })
            .map_err(Error::read)?;
        digest_rows(rows)
    }
}

fn node_columns(alias: &str) -> String {
    format!(
        "{alias}.id, {alias}.label, {alias}.name, {alias}.file, {alias}.path, \
         {alias}.text, {alias}.start_line, {alias}.end_line"
    )
}

fn node_from_row_offset(row: &Row<'_>, offset: usize) -> rusqlite::Result<GraphNode> {
    Ok(GraphNode {
        id: row.get(offset)?,
        label: row.get(offset + 1)?,
        name: row.get(offset + 2)?,
        file: row.get(offset + 3)?,
        path: row.get(offset + 4)?,
        text: row.get(offset + 5)?,
        start: row.get(offset + 6)?,
        end: row.get(offset + 7)?,
    })
}

fn collect_rows<T, I>(rows: I) -> Result<Vec<T>>
where
    I: Iterator<Item = rusqlite::Result<T>>,
{
    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(Error::read)?);
    }
    Ok(out)
}

fn digest_rows<I>(rows: I) -> Result<TableDigest>
where
    I: Iterator<Item = rusqlite::Result<String>>,
{
    let mut hasher = Hasher::new();
    let mut count = 0;
    for row in rows {
        let row = row.map_err(Error::read)?;
        hasher.update(row.as_bytes());
        hasher.update(b"\n");
        count += 1;
    }
    Ok(TableDigest {
        rows: count,
        hash: hasher.finalize().to_hex().to_string(),
    })
}

fn json_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => json!(v),
        ValueRef::Real(v) => serde_json::Number::from_f64(v)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => json!(bytes),
    }
}
