//! PostgreSQL backend on top of `sqlx`.

use std::str::FromStr;

use async_trait::async_trait;
use fxrates_common::{
    Currency, CurrencyCode, CurrencyId, CurrencyPair, ExchangeRate, ExchangeRateId, FxRatesError,
    NewCurrency, NewExchangeRate, Result, StorageError,
};
use fxrates_pool::{IsolationLevel, ManageConnection};
use rust_decimal::Decimal;
use sqlx::postgres::{PgConnectOptions, PgRow};
use sqlx::{Connection, Executor, PgConnection, Row};
use tracing::debug;

use crate::traits::{CurrencyStore, RateStore, LIST_LIMIT};

const SELECT_RATE: &str = r#"
    SELECT
        er.id,
        er.rate,
        b.id AS base_id,
        b.code AS base_code,
        b.full_name AS base_full_name,
        b.sign AS base_sign,
        t.id AS target_id,
        t.code AS target_code,
        t.full_name AS target_full_name,
        t.sign AS target_sign
    FROM exchange_rates er
    JOIN currencies b ON b.id = er.base_currency_id
    JOIN currencies t ON t.id = er.target_currency_id
"#;

fn malformed(err: sqlx::Error) -> FxRatesError {
    StorageError::MalformedRow(err.to_string()).into()
}

fn query_failed(err: sqlx::Error) -> FxRatesError {
    StorageError::query(err).into()
}

/// Constraint a failed write ran into.
enum Violation {
    Unique,
    ForeignKey,
    Check,
}

fn violation(err: &sqlx::Error) -> Option<Violation> {
    let sqlx::Error::Database(db_err) = err else {
        return None;
    };
    if db_err.is_unique_violation() {
        Some(Violation::Unique)
    } else if db_err.is_foreign_key_violation() {
        Some(Violation::ForeignKey)
    } else if db_err.is_check_violation() {
        Some(Violation::Check)
    } else {
        None
    }
}

fn currency_from_row(row: &PgRow, prefix: &str) -> Result<Currency> {
    let column = |name: &str| format!("{}{}", prefix, name);

    let code: String = row.try_get(column("code").as_str()).map_err(malformed)?;
    Ok(Currency {
        id: CurrencyId::new(row.try_get(column("id").as_str()).map_err(malformed)?),
        code: CurrencyCode::new(code),
        full_name: row.try_get(column("full_name").as_str()).map_err(malformed)?,
        sign: row.try_get(column("sign").as_str()).map_err(malformed)?,
    })
}

fn rate_from_row(row: &PgRow) -> Result<ExchangeRate> {
    Ok(ExchangeRate {
        id: ExchangeRateId::new(row.try_get("id").map_err(malformed)?),
        base: currency_from_row(row, "base_")?,
        target: currency_from_row(row, "target_")?,
        rate: row.try_get::<Decimal, _>("rate").map_err(malformed)?,
    })
}

fn rates_from_rows(rows: Vec<PgRow>) -> Result<Vec<ExchangeRate>> {
    rows.iter().map(rate_from_row).collect()
}

#[async_trait]
impl CurrencyStore for PgConnection {
    async fn find_currency_by_code(&mut self, code: &CurrencyCode) -> Result<Option<Currency>> {
        let row = sqlx::query(
            "SELECT id, code, full_name, sign FROM currencies WHERE UPPER(code) = $1",
        )
        .bind(code.as_str())
        .fetch_optional(&mut *self)
        .await
        .map_err(query_failed)?;

        row.as_ref().map(|r| currency_from_row(r, "")).transpose()
    }

    async fn find_currency_by_name(&mut self, full_name: &str) -> Result<Option<Currency>> {
        let row = sqlx::query(
            "SELECT id, code, full_name, sign FROM currencies \
             WHERE LOWER(full_name) = LOWER($1) ORDER BY id LIMIT 1",
        )
        .bind(full_name)
        .fetch_optional(&mut *self)
        .await
        .map_err(query_failed)?;

        row.as_ref().map(|r| currency_from_row(r, "")).transpose()
    }

    async fn find_currency_by_id(&mut self, id: CurrencyId) -> Result<Option<Currency>> {
        let row = sqlx::query("SELECT id, code, full_name, sign FROM currencies WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&mut *self)
            .await
            .map_err(query_failed)?;

        row.as_ref().map(|r| currency_from_row(r, "")).transpose()
    }

    async fn list_currencies(&mut self) -> Result<Vec<Currency>> {
        let rows = sqlx::query("SELECT id, code, full_name, sign FROM currencies ORDER BY id LIMIT $1")
            .bind(LIST_LIMIT as i64)
            .fetch_all(&mut *self)
            .await
            .map_err(query_failed)?;

        rows.iter().map(|r| currency_from_row(r, "")).collect()
    }

    async fn save_currency(&mut self, currency: NewCurrency) -> Result<Currency> {
        let code = currency.code.to_string();
        let row = sqlx::query(
            "INSERT INTO currencies (code, full_name, sign) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(currency.code.as_str())
        .bind(&currency.full_name)
        .bind(&currency.sign)
        .fetch_one(&mut *self)
        .await
        .map_err(|e| match violation(&e) {
            Some(Violation::Unique) => FxRatesError::CurrencyAlreadyExists(code),
            _ => query_failed(e),
        })?;

        let id: i64 = row.try_get("id").map_err(malformed)?;
        Ok(currency.with_id(CurrencyId::new(id)))
    }

    async fn update_currency(&mut self, currency: &Currency) -> Result<Currency> {
        let code = currency.code.to_string();
        let result = sqlx::query(
            "UPDATE currencies SET code = $1, full_name = $2, sign = $3 WHERE id = $4",
        )
        .bind(currency.code.as_str())
        .bind(&currency.full_name)
        .bind(&currency.sign)
        .bind(currency.id.get())
        .execute(&mut *self)
        .await
        .map_err(|e| match violation(&e) {
            Some(Violation::Unique) => FxRatesError::CurrencyAlreadyExists(code),
            _ => query_failed(e),
        })?;

        if result.rows_affected() == 0 {
            return Err(FxRatesError::CurrencyNotFound(format!("id {}", currency.id)));
        }
        Ok(currency.clone())
    }
}

#[async_trait]
impl RateStore for PgConnection {
    async fn find_rate(
        &mut self,
        base: &CurrencyCode,
        target: &CurrencyCode,
    ) -> Result<Option<ExchangeRate>> {
        let sql = format!("{} WHERE UPPER(b.code) = $1 AND UPPER(t.code) = $2", SELECT_RATE);
        let row = sqlx::query(&sql)
            .bind(base.as_str())
            .bind(target.as_str())
            .fetch_optional(&mut *self)
            .await
            .map_err(query_failed)?;

        row.as_ref().map(rate_from_row).transpose()
    }

    async fn find_rates_by_base(&mut self, base: &CurrencyCode) -> Result<Vec<ExchangeRate>> {
        let sql = format!("{} WHERE UPPER(b.code) = $1 ORDER BY er.id", SELECT_RATE);
        let rows = sqlx::query(&sql)
            .bind(base.as_str())
            .fetch_all(&mut *self)
            .await
            .map_err(query_failed)?;

        rates_from_rows(rows)
    }

    async fn find_rates_by_target(&mut self, target: &CurrencyCode) -> Result<Vec<ExchangeRate>> {
        let sql = format!("{} WHERE UPPER(t.code) = $1 ORDER BY er.id", SELECT_RATE);
        let rows = sqlx::query(&sql)
            .bind(target.as_str())
            .fetch_all(&mut *self)
            .await
            .map_err(query_failed)?;

        rates_from_rows(rows)
    }

    async fn list_rates(&mut self) -> Result<Vec<ExchangeRate>> {
        let sql = format!("{} ORDER BY er.id LIMIT $1", SELECT_RATE);
        let rows = sqlx::query(&sql)
            .bind(LIST_LIMIT as i64)
            .fetch_all(&mut *self)
            .await
            .map_err(query_failed)?;

        rates_from_rows(rows)
    }

    async fn save_rate(&mut self, rate: NewExchangeRate) -> Result<ExchangeRate> {
        let pair = rate.pair();
        let row = sqlx::query(
            r#"
            INSERT INTO exchange_rates (base_currency_id, target_currency_id, rate)
            VALUES ($1, $2, $3)
            RETURNING id, rate
            "#,
        )
        .bind(rate.base.id.get())
        .bind(rate.target.id.get())
        .bind(rate.rate)
        .fetch_one(&mut *self)
        .await
        .map_err(|e| missing_or_taken(e, &pair))?;

        let id: i64 = row.try_get("id").map_err(malformed)?;
        let stored: Decimal = row.try_get("rate").map_err(malformed)?;
        Ok(ExchangeRate {
            rate: stored,
            ..rate.with_id(ExchangeRateId::new(id))
        })
    }

    async fn update_rate(&mut self, rate: &ExchangeRate) -> Result<ExchangeRate> {
        let pair = rate.pair();
        let row = sqlx::query(
            r#"
            UPDATE exchange_rates
            SET base_currency_id = $1, target_currency_id = $2, rate = $3
            WHERE id = $4
            RETURNING rate
            "#,
        )
        .bind(rate.base.id.get())
        .bind(rate.target.id.get())
        .bind(rate.rate)
        .bind(rate.id.get())
        .fetch_optional(&mut *self)
        .await
        .map_err(|e| missing_or_taken(e, &pair))?
        .ok_or_else(|| FxRatesError::RateNotFound(pair.clone()))?;

        let stored: Decimal = row.try_get("rate").map_err(malformed)?;
        Ok(ExchangeRate {
            rate: stored,
            ..rate.clone()
        })
    }
}

fn missing_or_taken(err: sqlx::Error, pair: &CurrencyPair) -> FxRatesError {
    match violation(&err) {
        Some(Violation::Unique) => FxRatesError::RateAlreadyExists(pair.clone()),
        Some(Violation::ForeignKey) => FxRatesError::CurrencyNotFound(pair.to_string()),
        Some(Violation::Check) => FxRatesError::validation("rate", "must be positive"),
        None => query_failed(err),
    }
}

/// Opens [`PgConnection`]s and drives their transactions with plain SQL.
#[derive(Debug, Clone)]
pub struct PgConnectionManager {
    options: PgConnectOptions,
}

impl PgConnectionManager {
    /// Create a manager from connect options.
    pub fn new(options: PgConnectOptions) -> Self {
        Self { options }
    }

    /// Create a manager from a `postgres://` URL, with optional credentials
    /// overriding the ones in the URL.
    pub fn from_url(
        url: &str,
        username: Option<&str>,
        password: Option<&str>,
    ) -> std::result::Result<Self, StorageError> {
        let mut options = PgConnectOptions::from_str(url)
            .map_err(|e| StorageError::Configuration(format!("invalid database URL: {}", e)))?;
        if let Some(username) = username {
            options = options.username(username);
        }
        if let Some(password) = password {
            options = options.password(password);
        }
        Ok(Self::new(options))
    }

    async fn run(conn: &mut PgConnection, sql: &str) -> std::result::Result<(), sqlx::Error> {
        (&mut *conn).execute(sql).await.map(|_| ())
    }
}

#[async_trait]
impl ManageConnection for PgConnectionManager {
    type Connection = PgConnection;

    async fn connect(&self) -> std::result::Result<PgConnection, StorageError> {
        PgConnection::connect_with(&self.options)
            .await
            .map_err(|e| StorageError::Connect(Box::new(e)))
    }

    async fn begin(
        &self,
        conn: &mut PgConnection,
        isolation: IsolationLevel,
    ) -> std::result::Result<(), StorageError> {
        let sql = format!("BEGIN ISOLATION LEVEL {}", isolation.as_sql());
        Self::run(conn, &sql)
            .await
            .map_err(|e| StorageError::transaction("begin", e))
    }

    async fn commit(&self, conn: &mut PgConnection) -> std::result::Result<(), StorageError> {
        Self::run(conn, "COMMIT")
            .await
            .map_err(|e| StorageError::transaction("commit", e))
    }

    async fn rollback(&self, conn: &mut PgConnection) -> std::result::Result<(), StorageError> {
        Self::run(conn, "ROLLBACK")
            .await
            .map_err(|e| StorageError::transaction("rollback", e))
    }

    async fn reset(&self, conn: &mut PgConnection) -> std::result::Result<(), StorageError> {
        // ROLLBACK outside a transaction only raises a warning.
        Self::run(conn, "ROLLBACK")
            .await
            .map_err(|e| StorageError::Reset(Box::new(e)))?;
        Self::run(conn, "RESET ALL")
            .await
            .map_err(|e| StorageError::Reset(Box::new(e)))?;
        debug!("Session state reset");
        Ok(())
    }

    async fn close(&self, conn: PgConnection) -> std::result::Result<(), StorageError> {
        conn.close().await.map_err(|e| StorageError::Query(Box::new(e)))
    }
}
