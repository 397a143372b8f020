//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.

#[cfg(feature = "sqlite")]
use sea_query::Iden;

/// Commands table schema.
#[cfg(feature = "sqlite")]
#[derive(Iden)]
pub enum Commands {
    Table,
    #[iden = "context_id"]
    ContextId,
    #[iden = "context"]
    Context,
    #[iden = "node_id"]
    NodeId,
    #[iden = "correlation_id"]
    CorrelationId,
    #[iden = "request_payload"]
    RequestPayload,
    #[iden = "requested_at"]
    RequestedAt,
    #[iden = "response_payload"]
    ResponsePayload,
    #[iden = "responded_at"]
    RespondedAt,
    #[iden = "version"]
    Version,
}

/// SQL for creating the commands table.
///
/// The primary key is the command identity; correlation lookups use the index.
pub const CREATE_COMMANDS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS commands (
    context_id TEXT NOT NULL,
    context TEXT NOT NULL,
    node_id INTEGER NOT NULL,
    correlation_id TEXT NOT NULL,
    request_payload BLOB NOT NULL,
    requested_at TEXT NOT NULL,
    response_payload BLOB,
    responded_at TEXT,
    version INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (context_id, context, node_id)
);

CREATE INDEX IF NOT EXISTS idx_commands_correlation ON commands(correlation_id);
"#;
