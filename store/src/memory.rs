//! In-memory backend.
//!
//! Tables live in one [`MemoryDatabase`] shared by every connection. A
//! connection in autocommit mode writes straight through; inside a transaction
//! its writes are staged, visible only to itself, and replayed atomically on
//! commit. A staged insert claims its unique key until the transaction ends,
//! so a second session inserting the same code or pair fails when it writes.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use fxrates_common::{
    ensure_positive_rate, normalize_rate, Currency, CurrencyCode, CurrencyId, CurrencyPair,
    ExchangeRate, ExchangeRateId, FxRatesError, NewCurrency, NewExchangeRate, Result,
    StorageError,
};
use fxrates_pool::{IsolationLevel, ManageConnection};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use tracing::debug;

use crate::traits::{CurrencyStore, RateStore, LIST_LIMIT};

#[derive(Debug, Clone)]
struct RateRow {
    id: i64,
    base_id: i64,
    target_id: i64,
    rate: Decimal,
}

#[derive(Debug, Clone)]
enum Write {
    InsertCurrency(Currency),
    UpdateCurrency(Currency),
    InsertRate(RateRow),
    UpdateRate(RateRow),
}

impl Write {
    /// The unique key this write touches, and whether staging it claims the key.
    fn unique_key(&self) -> (UniqueKey, bool) {
        match self {
            Write::InsertCurrency(c) => (UniqueKey::Code(c.code.clone()), true),
            Write::UpdateCurrency(c) => (UniqueKey::Code(c.code.clone()), false),
            Write::InsertRate(r) => (UniqueKey::Pair(r.base_id, r.target_id), true),
            Write::UpdateRate(r) => (UniqueKey::Pair(r.base_id, r.target_id), false),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum UniqueKey {
    Code(CurrencyCode),
    Pair(i64, i64),
}

#[derive(Debug, Clone, Default)]
struct Tables {
    currencies: BTreeMap<i64, Currency>,
    rates: BTreeMap<i64, RateRow>,
}

impl Tables {
    fn currency_by_code(&self, code: &CurrencyCode) -> Option<&Currency> {
        self.currencies.values().find(|c| &c.code == code)
    }

    fn code_of(&self, id: i64) -> CurrencyCode {
        self.currencies
            .get(&id)
            .map(|c| c.code.clone())
            .unwrap_or_else(|| CurrencyCode::new(id.to_string()))
    }

    fn pair_of(&self, row: &RateRow) -> CurrencyPair {
        CurrencyPair::new(self.code_of(row.base_id), self.code_of(row.target_id))
    }

    fn to_model(&self, row: &RateRow) -> Result<ExchangeRate> {
        let currency = |id: i64| {
            self.currencies.get(&id).cloned().ok_or_else(|| {
                StorageError::MalformedRow(format!("rate {} references missing currency {}", row.id, id))
            })
        };

        Ok(ExchangeRate {
            id: ExchangeRateId::new(row.id),
            base: currency(row.base_id)?,
            target: currency(row.target_id)?,
            rate: row.rate,
        })
    }

    fn rates_where(&self, keep: impl Fn(&RateRow) -> bool) -> Result<Vec<ExchangeRate>> {
        self.rates
            .values()
            .filter(|row| keep(row))
            .map(|row| self.to_model(row))
            .collect()
    }

    fn check_rate_refs(&self, row: &RateRow) -> Result<()> {
        for id in [row.base_id, row.target_id] {
            if !self.currencies.contains_key(&id) {
                return Err(FxRatesError::CurrencyNotFound(format!("id {}", id)));
            }
        }
        ensure_positive_rate(row.rate)
    }

    fn already_exists(&self, key: &UniqueKey) -> FxRatesError {
        match key {
            UniqueKey::Code(code) => FxRatesError::CurrencyAlreadyExists(code.to_string()),
            UniqueKey::Pair(base, target) => FxRatesError::RateAlreadyExists(CurrencyPair::new(
                self.code_of(*base),
                self.code_of(*target),
            )),
        }
    }

    fn pair_taken(&self, row: &RateRow) -> bool {
        self.rates.values().any(|other| {
            other.id != row.id && other.base_id == row.base_id && other.target_id == row.target_id
        })
    }

    /// Apply one write, enforcing the same constraints as the SQL schema.
    /// Nothing is changed when an error is returned.
    fn apply(&mut self, write: &Write) -> Result<()> {
        match write {
            Write::InsertCurrency(currency) => {
                if self.currency_by_code(&currency.code).is_some() {
                    return Err(FxRatesError::CurrencyAlreadyExists(currency.code.to_string()));
                }
                self.currencies.insert(currency.id.get(), currency.clone());
            }
            Write::UpdateCurrency(currency) => {
                if !self.currencies.contains_key(&currency.id.get()) {
                    return Err(FxRatesError::CurrencyNotFound(format!("id {}", currency.id)));
                }
                let taken = self
                    .currencies
                    .values()
                    .any(|other| other.id != currency.id && other.code == currency.code);
                if taken {
                    return Err(FxRatesError::CurrencyAlreadyExists(currency.code.to_string()));
                }
                self.currencies.insert(currency.id.get(), currency.clone());
            }
            Write::InsertRate(row) => {
                self.check_rate_refs(row)?;
                if self.pair_taken(row) {
                    return Err(FxRatesError::RateAlreadyExists(self.pair_of(row)));
                }
                self.rates.insert(row.id, row.clone());
            }
            Write::UpdateRate(row) => {
                if !self.rates.contains_key(&row.id) {
                    return Err(FxRatesError::RateNotFound(self.pair_of(row)));
                }
                self.check_rate_refs(row)?;
                if self.pair_taken(row) {
                    return Err(FxRatesError::RateAlreadyExists(self.pair_of(row)));
                }
                self.rates.insert(row.id, row.clone());
            }
        }
        Ok(())
    }
}

/// Committed tables shared by every [`MemoryConnection`].
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    tables: RwLock<Tables>,
    /// Unique keys of staged inserts, by owning session.
    claims: Mutex<BTreeMap<UniqueKey, u64>>,
    currency_seq: AtomicI64,
    rate_seq: AtomicI64,
    session_seq: AtomicU64,
    open_connections: AtomicUsize,
}

impl MemoryDatabase {
    /// Create an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed currencies.
    pub fn currency_count(&self) -> usize {
        self.tables.read().currencies.len()
    }

    /// Number of committed rates.
    pub fn rate_count(&self) -> usize {
        self.tables.read().rates.len()
    }

    /// Number of connections opened and not yet closed.
    pub fn open_connections(&self) -> usize {
        self.open_connections.load(Ordering::Acquire)
    }

    fn next_currency_id(&self) -> i64 {
        self.currency_seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn next_rate_id(&self) -> i64 {
        self.rate_seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Check `key` against other sessions' claims, taking it when `hold`.
    /// Returns false if another session holds it.
    fn claim(&self, session: u64, key: &UniqueKey, hold: bool) -> bool {
        let mut claims = self.claims.lock();
        match claims.get(key) {
            Some(owner) if *owner != session => false,
            _ => {
                if hold {
                    claims.insert(key.clone(), session);
                }
                true
            }
        }
    }

    fn release_claims(&self, session: u64) {
        self.claims.lock().retain(|_, owner| *owner != session);
    }
}

/// A session on a [`MemoryDatabase`].
#[derive(Debug)]
pub struct MemoryConnection {
    db: Arc<MemoryDatabase>,
    session: u64,
    autocommit: bool,
    isolation: Option<IsolationLevel>,
    pending: Vec<Write>,
}

impl MemoryConnection {
    /// Open a session in autocommit mode.
    pub fn new(db: Arc<MemoryDatabase>) -> Self {
        db.open_connections.fetch_add(1, Ordering::AcqRel);
        let session = db.session_seq.fetch_add(1, Ordering::Relaxed);
        Self {
            db,
            session,
            autocommit: true,
            isolation: None,
            pending: Vec::new(),
        }
    }

    pub fn autocommit(&self) -> bool {
        self.autocommit
    }

    /// Isolation level set by the last `begin`, `None` for the default.
    pub fn isolation(&self) -> Option<IsolationLevel> {
        self.isolation
    }

    pub fn in_transaction(&self) -> bool {
        !self.autocommit
    }

    /// Writes staged by the open transaction.
    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    fn begin(&mut self, isolation: IsolationLevel) {
        self.rollback();
        self.autocommit = false;
        self.isolation = Some(isolation);
    }

    fn commit(&mut self) -> Result<()> {
        let pending = std::mem::take(&mut self.pending);
        if pending.is_empty() {
            return Ok(());
        }

        let mut tables = self.db.tables.write();
        let mut next = tables.clone();
        let applied = pending.iter().try_for_each(|write| next.apply(write));
        if applied.is_ok() {
            *tables = next;
        }
        // Claims go while the write lock is held, so a stager sees the row or the claim.
        self.db.release_claims(self.session);
        drop(tables);

        applied?;
        debug!(writes = pending.len(), "Memory transaction committed");
        Ok(())
    }

    fn rollback(&mut self) {
        if !self.pending.is_empty() {
            debug!(writes = self.pending.len(), "Memory transaction rolled back");
        }
        self.pending.clear();
        self.db.release_claims(self.session);
    }

    fn reset(&mut self) {
        self.rollback();
        self.autocommit = true;
        self.isolation = None;
    }

    /// Run `f` against the committed tables plus this session's staged writes.
    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> T {
        let committed = self.db.tables.read();
        self.with_view(&committed, f)
    }

    fn with_view<T>(&self, committed: &Tables, f: impl FnOnce(&Tables) -> T) -> T {
        if self.pending.is_empty() {
            return f(committed);
        }

        let mut view = committed.clone();
        for write in &self.pending {
            if let Err(e) = view.apply(write) {
                debug!(error = %e, "Staged write conflicts with committed data");
            }
        }
        f(&view)
    }

    fn write(&mut self, write: Write) -> Result<()> {
        let (key, hold) = write.unique_key();

        if self.autocommit {
            let mut tables = self.db.tables.write();
            if !self.db.claim(self.session, &key, false) {
                return Err(tables.already_exists(&key));
            }
            return tables.apply(&write);
        }

        // The committed tables stay read-locked until the key is claimed, so a
        // concurrent commit cannot slip in between the two checks.
        let committed = self.db.tables.read();
        self.with_view(&committed, |view| -> Result<()> {
            view.clone().apply(&write)?;
            if !self.db.claim(self.session, &key, hold) {
                return Err(view.already_exists(&key));
            }
            Ok(())
        })?;
        drop(committed);

        self.pending.push(write);
        Ok(())
    }

    fn load_rate(&self, id: i64) -> Result<ExchangeRate> {
        self.read(|t| match t.rates.get(&id) {
            Some(row) => t.to_model(row),
            None => Err(StorageError::MalformedRow(format!("rate {} vanished after write", id)).into()),
        })
    }

    fn row_for(&self, id: i64, base: &Currency, target: &Currency, rate: Decimal) -> RateRow {
        RateRow {
            id,
            base_id: base.id.get(),
            target_id: target.id.get(),
            rate: normalize_rate(rate),
        }
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.db.release_claims(self.session);
        self.db.open_connections.fetch_sub(1, Ordering::AcqRel);
    }
}

#[async_trait]
impl CurrencyStore for MemoryConnection {
    async fn find_currency_by_code(&mut self, code: &CurrencyCode) -> Result<Option<Currency>> {
        Ok(self.read(|t| t.currency_by_code(code).cloned()))
    }

    async fn find_currency_by_name(&mut self, full_name: &str) -> Result<Option<Currency>> {
        let wanted = full_name.to_lowercase();
        Ok(self.read(|t| {
            t.currencies
                .values()
                .find(|c| c.full_name.to_lowercase() == wanted)
                .cloned()
        }))
    }

    async fn find_currency_by_id(&mut self, id: CurrencyId) -> Result<Option<Currency>> {
        Ok(self.read(|t| t.currencies.get(&id.get()).cloned()))
    }

    async fn list_currencies(&mut self) -> Result<Vec<Currency>> {
        Ok(self.read(|t| t.currencies.values().take(LIST_LIMIT).cloned().collect()))
    }

    async fn save_currency(&mut self, currency: NewCurrency) -> Result<Currency> {
        let currency = currency.with_id(CurrencyId::new(self.db.next_currency_id()));
        self.write(Write::InsertCurrency(currency.clone()))?;
        Ok(currency)
    }

    async fn update_currency(&mut self, currency: &Currency) -> Result<Currency> {
        self.write(Write::UpdateCurrency(currency.clone()))?;
        Ok(currency.clone())
    }
}

#[async_trait]
impl RateStore for MemoryConnection {
    async fn find_rate(
        &mut self,
        base: &CurrencyCode,
        target: &CurrencyCode,
    ) -> Result<Option<ExchangeRate>> {
        self.read(|t| {
            let (Some(b), Some(c)) = (t.currency_by_code(base), t.currency_by_code(target)) else {
                return Ok(None);
            };
            let (base_id, target_id) = (b.id.get(), c.id.get());
            t.rates
                .values()
                .find(|row| row.base_id == base_id && row.target_id == target_id)
                .map(|row| t.to_model(row))
                .transpose()
        })
    }

    async fn find_rates_by_base(&mut self, base: &CurrencyCode) -> Result<Vec<ExchangeRate>> {
        self.read(|t| match t.currency_by_code(base) {
            Some(c) => {
                let id = c.id.get();
                t.rates_where(|row| row.base_id == id)
            }
            None => Ok(Vec::new()),
        })
    }

    async fn find_rates_by_target(&mut self, target: &CurrencyCode) -> Result<Vec<ExchangeRate>> {
        self.read(|t| match t.currency_by_code(target) {
            Some(c) => {
                let id = c.id.get();
                t.rates_where(|row| row.target_id == id)
            }
            None => Ok(Vec::new()),
        })
    }

    async fn list_rates(&mut self) -> Result<Vec<ExchangeRate>> {
        self.read(|t| {
            t.rates
                .values()
                .take(LIST_LIMIT)
                .map(|row| t.to_model(row))
                .collect()
        })
    }

    async fn save_rate(&mut self, rate: NewExchangeRate) -> Result<ExchangeRate> {
        let id = self.db.next_rate_id();
        let row = self.row_for(id, &rate.base, &rate.target, rate.rate);
        self.write(Write::InsertRate(row))?;
        self.load_rate(id)
    }

    async fn update_rate(&mut self, rate: &ExchangeRate) -> Result<ExchangeRate> {
        let id = rate.id.get();
        let row = self.row_for(id, &rate.base, &rate.target, rate.rate);
        self.write(Write::UpdateRate(row))?;
        self.load_rate(id)
    }
}

/// Opens [`MemoryConnection`]s on one shared database.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnectionManager {
    db: Arc<MemoryDatabase>,
}

impl MemoryConnectionManager {
    /// Create a manager over a fresh, empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a manager over an existing database.
    pub fn with_database(db: Arc<MemoryDatabase>) -> Self {
        Self { db }
    }

    /// Get the shared database.
    pub fn database(&self) -> &Arc<MemoryDatabase> {
        &self.db
    }
}

#[async_trait]
impl ManageConnection for MemoryConnectionManager {
    type Connection = MemoryConnection;

    async fn connect(&self) -> std::result::Result<MemoryConnection, StorageError> {
        Ok(MemoryConnection::new(Arc::clone(&self.db)))
    }

    async fn begin(
        &self,
        conn: &mut MemoryConnection,
        isolation: IsolationLevel,
    ) -> std::result::Result<(), StorageError> {
        conn.begin(isolation);
        Ok(())
    }

    async fn commit(&self, conn: &mut MemoryConnection) -> std::result::Result<(), StorageError> {
        conn.commit().map_err(|e| StorageError::transaction("commit", e))
    }

    async fn rollback(&self, conn: &mut MemoryConnection) -> std::result::Result<(), StorageError> {
        conn.rollback();
        Ok(())
    }

    async fn reset(&self, conn: &mut MemoryConnection) -> std::result::Result<(), StorageError> {
        conn.reset();
        Ok(())
    }

    async fn close(&self, conn: MemoryConnection) -> std::result::Result<(), StorageError> {
        drop(conn);
        Ok(())
    }
}
