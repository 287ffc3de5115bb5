//! SurrealDB schema migrations and initialization
//!
//! Sets up the three Forgeline tables with their unique indexes.

use crate::error::StateError;
use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Initialize all Forgeline tables in SurrealDB
///
/// Safe to call multiple times (idempotent).
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing Forgeline SurrealDB schema");

    init_server_config_table(db).await?;
    init_secrets_table(db).await?;
    init_registries_table(db).await?;

    info!("Forgeline schema initialization complete");
    Ok(())
}

/// Initialize `server_config` table
///
/// Schema:
/// ```text
/// TABLE server_config {
///   id:    server_config:<key>
///   key:   STRING (unique)
///   value: STRING
/// }
/// ```
///
/// The record id is the key itself, so `CREATE` on an existing key fails
/// and gives insert-if-absent semantics.
async fn init_server_config_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing server_config table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS server_config SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_server_config_key ON TABLE server_config COLUMNS key UNIQUE;
    "#;

    run(db, sql, "server_config").await
}

/// Initialize `secrets` table
///
/// Schema:
/// ```text
/// TABLE secrets {
///   scope_kind: STRING (repo | org | global)
///   scope_name: STRING ("" for global)
///   name:       STRING
///   value:      STRING
///   images:     ARRAY<STRING>
///   events:     ARRAY<STRING>
/// }
/// ```
///
/// `(scope_kind, scope_name, name)` is unique.
async fn init_secrets_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing secrets table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS secrets SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_secret_scope_name ON TABLE secrets
            COLUMNS scope_kind, scope_name, name UNIQUE;
    "#;

    run(db, sql, "secrets").await
}

/// Initialize `registries` table
///
/// `(scope_kind, scope_name, address)` is unique.
async fn init_registries_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing registries table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS registries SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_registry_scope_address ON TABLE registries
            COLUMNS scope_kind, scope_name, address UNIQUE;
    "#;

    run(db, sql, "registries").await
}

async fn run(db: &Surreal<Any>, sql: &str, table: &str) -> Result<()> {
    db.query(sql)
        .await
        .and_then(|response| response.check())
        .map_err(|e| StateError::SchemaSetup(format!("{table}: {e}")))?;
    Ok(())
}
