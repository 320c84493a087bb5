//! PostgreSQL schema.

use sqlx::{Executor, PgConnection};
use tracing::info;

use fxrates_common::StorageError;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS currencies (
        id BIGSERIAL PRIMARY KEY,
        code VARCHAR(3) NOT NULL,
        full_name VARCHAR(128) NOT NULL,
        sign VARCHAR(8) NOT NULL
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS currencies_code_key
        ON currencies (UPPER(code))
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS exchange_rates (
        id BIGSERIAL PRIMARY KEY,
        base_currency_id BIGINT NOT NULL REFERENCES currencies (id),
        target_currency_id BIGINT NOT NULL REFERENCES currencies (id),
        rate NUMERIC(18, 6) NOT NULL CHECK (rate > 0),
        UNIQUE (base_currency_id, target_currency_id)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS exchange_rates_target_idx
        ON exchange_rates (target_currency_id)
    "#,
];

/// Create the tables and indexes if they do not exist yet.
pub async fn run(conn: &mut PgConnection) -> Result<(), StorageError> {
    info!("Applying schema");

    for statement in SCHEMA {
        (&mut *conn).execute(*statement).await.map_err(StorageError::query)?;
    }

    Ok(())
}
