//! SQLite CommandStore implementation.

use async_trait::async_trait;
use backon::Retryable;
use chrono::{DateTime, Utc};
use sea_query::{Expr, Order, Query, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::warn;

use super::schema::{Commands, CREATE_COMMANDS_TABLE};
use super::{CommandStore, Result, StorageError};
use crate::ledger::{Command, CommandKey, NodeId};
use crate::utils::retry::connection_backoff;

/// Columns selected for a full command row.
const COMMAND_COLUMNS: [Commands; 9] = [
    Commands::ContextId,
    Commands::Context,
    Commands::NodeId,
    Commands::CorrelationId,
    Commands::RequestPayload,
    Commands::RequestedAt,
    Commands::ResponsePayload,
    Commands::RespondedAt,
    Commands::Version,
];

/// SQLite implementation of CommandStore.
pub struct SqliteCommandStore {
    pool: SqlitePool,
}

impl SqliteCommandStore {
    /// Create a new SQLite command store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database file, then initialize the schema.
    pub async fn connect(path: &str) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::Unavailable(format!("{}: {}", parent.display(), e)))?;
        }

        let url = format!("sqlite:{}?mode=rwc", path);
        let pool = (|| SqlitePool::connect(&url))
            .retry(connection_backoff())
            .notify(|err, delay| {
                warn!(error = %err, ?delay, "Failed to open command database, retrying");
            })
            .await?;

        let store = Self::new(pool);
        store.init().await?;
        Ok(store)
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> Result<()> {
        sqlx::raw_sql(CREATE_COMMANDS_TABLE)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn row_to_command(row: &SqliteRow) -> Result<Command> {
        let node_id: i64 = row.get("node_id");
        let node_id = NodeId::try_from(node_id)
            .map_err(|_| StorageError::InvalidRow(format!("node_id out of range: {}", node_id)))?;
        let version: i64 = row.get("version");
        let version = u64::try_from(version)
            .map_err(|_| StorageError::InvalidRow(format!("negative version: {}", version)))?;

        let requested_at: String = row.get("requested_at");
        let responded_at: Option<String> = row.get("responded_at");

        Ok(Command {
            key: CommandKey {
                context_id: row.get("context_id"),
                context: row.get("context"),
                node_id,
            },
            correlation_id: row.get("correlation_id"),
            request_payload: row.get("request_payload"),
            requested_at: parse_timestamp(&requested_at)?,
            response_payload: row.get("response_payload"),
            responded_at: responded_at.as_deref().map(parse_timestamp).transpose()?,
            version,
        })
    }

    async fn fetch_commands(&self, query: &str) -> Result<Vec<Command>> {
        let rows = sqlx::query(query).fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_command).collect()
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::InvalidTimestamp(format!("{}: {}", value, e)))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

#[async_trait]
impl CommandStore for SqliteCommandStore {
    async fn get(&self, key: &CommandKey) -> Result<Option<Command>> {
        let query = Query::select()
            .columns(COMMAND_COLUMNS)
            .from(Commands::Table)
            .and_where(Expr::col(Commands::ContextId).eq(key.context_id.as_str()))
            .and_where(Expr::col(Commands::Context).eq(key.context.as_str()))
            .and_where(Expr::col(Commands::NodeId).eq(key.node_id))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::row_to_command).transpose()
    }

    async fn insert(&self, command: &Command) -> Result<()> {
        let query = Query::insert()
            .into_table(Commands::Table)
            .columns([
                Commands::ContextId,
                Commands::Context,
                Commands::NodeId,
                Commands::CorrelationId,
                Commands::RequestPayload,
                Commands::RequestedAt,
                Commands::Version,
            ])
            .values_panic([
                command.key.context_id.clone().into(),
                command.key.context.clone().into(),
                command.key.node_id.into(),
                command.correlation_id.clone().into(),
                command.request_payload.clone().into(),
                command.requested_at.to_rfc3339().into(),
                (command.version as i64).into(),
            ])
            .to_string(SqliteQueryBuilder);

        match sqlx::query(&query).execute(&self.pool).await {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(StorageError::VersionConflict {
                key: command.key.clone(),
                expected: None,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_response(
        &self,
        key: &CommandKey,
        expected_version: u64,
        payload: &[u8],
        responded_at: DateTime<Utc>,
    ) -> Result<Command> {
        let query = Query::update()
            .table(Commands::Table)
            .values([
                (Commands::ResponsePayload, payload.to_vec().into()),
                (Commands::RespondedAt, responded_at.to_rfc3339().into()),
                (Commands::Version, Expr::col(Commands::Version).add(1)),
            ])
            .and_where(Expr::col(Commands::ContextId).eq(key.context_id.as_str()))
            .and_where(Expr::col(Commands::Context).eq(key.context.as_str()))
            .and_where(Expr::col(Commands::NodeId).eq(key.node_id))
            .and_where(Expr::col(Commands::Version).eq(expected_version as i64))
            .and_where(Expr::col(Commands::ResponsePayload).is_null())
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::VersionConflict {
                key: key.clone(),
                expected: Some(expected_version),
            });
        }

        self.get(key).await?.ok_or_else(|| StorageError::VersionConflict {
            key: key.clone(),
            expected: Some(expected_version + 1),
        })
    }

    async fn exists_for_context(&self, context_id: &str, context: &str) -> Result<bool> {
        let query = Query::select()
            .column(Commands::NodeId)
            .from(Commands::Table)
            .and_where(Expr::col(Commands::ContextId).eq(context_id))
            .and_where(Expr::col(Commands::Context).eq(context))
            .limit(1)
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        Ok(row.is_some())
    }

    async fn find_by_context(&self, context_id: &str, context: &str) -> Result<Vec<Command>> {
        let query = Query::select()
            .columns(COMMAND_COLUMNS)
            .from(Commands::Table)
            .and_where(Expr::col(Commands::ContextId).eq(context_id))
            .and_where(Expr::col(Commands::Context).eq(context))
            .order_by(Commands::NodeId, Order::Asc)
            .to_string(SqliteQueryBuilder);

        self.fetch_commands(&query).await
    }

    async fn find_by_correlation(&self, correlation_id: &str) -> Result<Vec<Command>> {
        if correlation_id.is_empty() {
            return Ok(vec![]);
        }

        let query = Query::select()
            .columns(COMMAND_COLUMNS)
            .from(Commands::Table)
            .and_where(Expr::col(Commands::CorrelationId).eq(correlation_id))
            .order_by(Commands::NodeId, Order::Asc)
            .to_string(SqliteQueryBuilder);

        self.fetch_commands(&query).await
    }
}
