//! `sqlx`-backed Postgres implementations of the Operation Log Store and
//! Element Store, against the schema in `migrations/0001_init.sql`.
//!
//! Connection pooling follows the teacher's `DatabaseConfig` /
//! `ConnectionPool` shape (`database/connection_pool.rs`), adapted from
//! SQLite to Postgres.

use super::{ElementStore, OperationLogStore};
use crate::error::AppResult;
use crate::model::{Element, ElementId, ElementType, LamportTimestamp, OpKind, Operation, StateVector, WorkspaceId};
use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::time::Duration;

/// Postgres connection-pool configuration.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub url: String,
    pub min_connections: u32,
    pub max_connections: u32,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/hertzboard".to_string(),
            min_connections: 2,
            max_connections: 20,
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

pub struct PostgresPool {
    pool: PgPool,
}

impl PostgresPool {
    pub async fn connect(config: &PostgresConfig) -> AppResult<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout)
            .idle_timeout(config.idle_timeout)
            .connect(&config.url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> AppResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub async fn health_check(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn row_to_operation(row: PgRow) -> sqlx::Result<Operation> {
    let op_type: String = row.try_get("op_type")?;
    Ok(Operation {
        id: row.try_get("id")?,
        workspace_id: row.try_get("workspace_id")?,
        element_id: row.try_get("element_id")?,
        user_id: row.try_get("user_id")?,
        op_type: parse_op_kind(&op_type),
        data: row.try_get("data")?,
        timestamp: row.try_get("timestamp")?,
        created_at: row.try_get("created_at")?,
    })
}

fn parse_op_kind(s: &str) -> OpKind {
    match s {
        "create" => OpKind::Create,
        "update" => OpKind::Update,
        "delete" => OpKind::Delete,
        "move" => OpKind::Move,
        other => panic!("unknown op_type in database: {other}"),
    }
}

fn op_kind_str(kind: OpKind) -> &'static str {
    match kind {
        OpKind::Create => "create",
        OpKind::Update => "update",
        OpKind::Delete => "delete",
        OpKind::Move => "move",
    }
}

fn row_to_element(row: PgRow) -> sqlx::Result<Element> {
    let element_type: String = row.try_get("element_type")?;
    Ok(Element {
        id: row.try_get("id")?,
        workspace_id: row.try_get("workspace_id")?,
        element_type: parse_element_type(&element_type),
        data: row.try_get("element_data")?,
        z_index: row.try_get("z_index")?,
        parent_id: row.try_get("parent_id")?,
        version: row.try_get("version")?,
        created_by: row.try_get("created_by")?,
        updated_by: row.try_get("updated_by")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get::<Option<LamportTimestamp>, _>("deleted_at")?,
    })
}

fn parse_element_type(s: &str) -> ElementType {
    match s {
        "text" => ElementType::Text,
        "rectangle" => ElementType::Rectangle,
        "ellipse" => ElementType::Ellipse,
        "triangle" => ElementType::Triangle,
        "line" => ElementType::Line,
        "arrow" => ElementType::Arrow,
        "freehand" => ElementType::Freehand,
        "sticky" => ElementType::Sticky,
        "list" => ElementType::List,
        "image" => ElementType::Image,
        "connector" => ElementType::Connector,
        "group" => ElementType::Group,
        other => panic!("unknown element_type in database: {other}"),
    }
}

fn element_type_str(t: ElementType) -> &'static str {
    match t {
        ElementType::Text => "text",
        ElementType::Rectangle => "rectangle",
        ElementType::Ellipse => "ellipse",
        ElementType::Triangle => "triangle",
        ElementType::Line => "line",
        ElementType::Arrow => "arrow",
        ElementType::Freehand => "freehand",
        ElementType::Sticky => "sticky",
        ElementType::List => "list",
        ElementType::Image => "image",
        ElementType::Connector => "connector",
        ElementType::Group => "group",
    }
}

pub struct PostgresOperationLogStore {
    pool: PgPool,
}

impl PostgresOperationLogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OperationLogStore for PostgresOperationLogStore {
    async fn append(&self, op: &Operation) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO operations (id, workspace_id, element_id, user_id, op_type, data, timestamp, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (workspace_id, timestamp, user_id) DO NOTHING",
        )
        .bind(op.id)
        .bind(op.workspace_id)
        .bind(op.element_id)
        .bind(op.user_id)
        .bind(op_kind_str(op.op_type))
        .bind(&op.data)
        .bind(op.timestamp)
        .bind(op.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_since(
        &self,
        workspace_id: WorkspaceId,
        state_vector: &StateVector,
        limit: usize,
    ) -> AppResult<Vec<Operation>> {
        // Push the per-author high-water filter into SQL: a known author
        // only needs rows past their own mark, an author absent from the
        // state vector (never seen by this client) needs everything. This
        // keeps the scan bounded by `limit` instead of the workspace's
        // entire history, the author set per workspace being small enough
        // to inline as a bounded OR chain.
        let mut qb = sqlx::QueryBuilder::new("SELECT * FROM operations WHERE workspace_id = ");
        qb.push_bind(workspace_id);

        if !state_vector.is_empty() {
            qb.push(" AND (");
            for (i, (user_id, high_water)) in state_vector.iter().enumerate() {
                if i > 0 {
                    qb.push(" OR ");
                }
                qb.push("(user_id = ");
                qb.push_bind(*user_id);
                qb.push(" AND timestamp > ");
                qb.push_bind(*high_water);
                qb.push(")");
            }
            qb.push(" OR user_id NOT IN (");
            for (i, user_id) in state_vector.keys().enumerate() {
                if i > 0 {
                    qb.push(", ");
                }
                qb.push_bind(*user_id);
            }
            qb.push("))");
        }

        qb.push(" ORDER BY timestamp ASC LIMIT ");
        qb.push_bind(limit as i64);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.into_iter().map(row_to_operation).collect::<sqlx::Result<Vec<_>>>().map_err(Into::into)
    }

    async fn list_by_workspace(
        &self,
        workspace_id: WorkspaceId,
        limit: usize,
    ) -> AppResult<Vec<Operation>> {
        let rows = sqlx::query(
            "SELECT * FROM operations WHERE workspace_id = $1 ORDER BY timestamp DESC LIMIT $2",
        )
        .bind(workspace_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(row_to_operation)
            .collect::<sqlx::Result<Vec<_>>>()
            .map_err(Into::into)
    }
}

pub struct PostgresElementStore {
    pool: PgPool,
}

impl PostgresElementStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // Equal-version writes are accepted so the engine can persist the
    // winner of a Lamport tie-break; only regressions are rejected.
    async fn upsert_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        element: &Element,
    ) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO canvas_elements
                (id, workspace_id, element_type, element_data, z_index, parent_id,
                 created_by, updated_by, version, created_at, updated_at, deleted_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             ON CONFLICT (id) DO UPDATE SET
                element_data = EXCLUDED.element_data,
                z_index = EXCLUDED.z_index,
                parent_id = EXCLUDED.parent_id,
                updated_by = EXCLUDED.updated_by,
                version = EXCLUDED.version,
                updated_at = EXCLUDED.updated_at,
                deleted_at = EXCLUDED.deleted_at
             WHERE canvas_elements.version <= EXCLUDED.version",
        )
        .bind(element.id)
        .bind(element.workspace_id)
        .bind(element_type_str(element.element_type))
        .bind(&element.data)
        .bind(element.z_index)
        .bind(element.parent_id)
        .bind(element.created_by)
        .bind(element.updated_by)
        .bind(element.version)
        .bind(element.created_at)
        .bind(element.updated_at)
        .bind(element.deleted_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ElementStore for PostgresElementStore {
    async fn get(&self, id: ElementId) -> AppResult<Option<Element>> {
        let row = sqlx::query("SELECT * FROM canvas_elements WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_element).transpose().map_err(Into::into)
    }

    async fn list_by_workspace(&self, workspace_id: WorkspaceId) -> AppResult<Vec<Element>> {
        let rows = sqlx::query(
            "SELECT * FROM canvas_elements WHERE workspace_id = $1 AND deleted_at IS NULL",
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(row_to_element)
            .collect::<sqlx::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    async fn upsert(&self, element: Element) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        Self::upsert_tx(&mut tx, &element).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn tombstone(&self, id: ElementId, at: i64) -> AppResult<()> {
        sqlx::query(
            "UPDATE canvas_elements SET deleted_at = $2, version = $2
             WHERE id = $1 AND version < $2",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_many(&self, elements: Vec<Element>) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        for element in &elements {
            Self::upsert_tx(&mut tx, element).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn tombstone_many(&self, ids: Vec<(ElementId, i64)>) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        for (id, at) in ids {
            sqlx::query(
                "UPDATE canvas_elements SET deleted_at = $2, version = $2
                 WHERE id = $1 AND version < $2",
            )
            .bind(id)
            .bind(at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
