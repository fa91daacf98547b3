//! Remote table store boundary.
//!
//! [`TableStore`] is the narrow surface the loader and validator need:
//! delete-all, whole-batch insert and paginated read-back. [`MemoryTableStore`]
//! is an in-process implementation with fault injection for tests and demos.

use crate::retry::Transient;
use crate::value::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// A row as sent to or read back from the store, keyed by column name.
pub type Row = BTreeMap<String, Value>;

/// Page size used when reading a table back.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    Unavailable,
    Timeout,
    RateLimited,
    /// The store acknowledged fewer rows than were sent.
    PartialAccept,
    Rejected,
    NotFound,
}

impl StoreErrorKind {
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Unavailable | Self::Timeout | Self::RateLimited | Self::PartialAccept
        )
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind:?}: {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl Transient for StoreError {
    fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A remote table store.
pub trait TableStore {
    /// Remove every row of `table`.
    ///
    /// # Errors
    /// Returns a [`StoreError`] if the table cannot be cleared.
    fn delete_all(&self, table: &str) -> StoreResult<()>;

    /// Insert `rows` in one call. Returns the number of rows the store
    /// acknowledged.
    ///
    /// # Errors
    /// Returns a [`StoreError`] if the call is refused.
    fn insert_batch(&self, table: &str, rows: &[Row]) -> StoreResult<usize>;

    /// Read up to `limit` rows starting at `offset`.
    ///
    /// # Errors
    /// Returns a [`StoreError`] if the page cannot be read.
    fn read_page(&self, table: &str, offset: usize, limit: usize) -> StoreResult<Vec<Row>>;

    fn page_size(&self) -> usize {
        DEFAULT_PAGE_SIZE
    }

    /// Read the whole table, one page at a time.
    ///
    /// # Errors
    /// Returns the first page error.
    fn read_all(&self, table: &str) -> StoreResult<Vec<Row>> {
        let limit = self.page_size().max(1);
        let mut rows = Vec::new();
        loop {
            let page = self.read_page(table, rows.len(), limit)?;
            let has_more = page.len() == limit;
            rows.extend(page);
            if !has_more {
                break;
            }
        }
        Ok(rows)
    }
}

#[derive(Debug, Default)]
struct Faults {
    insert_failures: Vec<StoreErrorKind>,
    always_fail_inserts: Option<StoreErrorKind>,
    partial_accepts: usize,
    delete_failure: Option<StoreErrorKind>,
    read_failure: Option<StoreErrorKind>,
    insert_calls: usize,
    delete_calls: usize,
}

/// In-process [`TableStore`]. Clones share the same tables.
#[derive(Clone, Debug)]
pub struct MemoryTableStore {
    tables: Arc<Mutex<HashMap<String, Vec<Row>>>>,
    faults: Arc<Mutex<Faults>>,
    page_size: usize,
}

impl MemoryTableStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: Arc::new(Mutex::new(HashMap::new())),
            faults: Arc::new(Mutex::new(Faults::default())),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Creates an empty table if it does not exist yet.
    ///
    /// # Panics
    ///
    /// Panics if the tables mutex is poisoned.
    pub fn create_table(&self, name: &str) {
        self.tables
            .lock()
            .expect("tables mutex poisoned")
            .entry(name.to_string())
            .or_default();
    }

    /// Current contents of `table`, if it exists.
    ///
    /// # Panics
    ///
    /// Panics if the tables mutex is poisoned.
    #[must_use]
    pub fn rows(&self, table: &str) -> Option<Vec<Row>> {
        self.tables
            .lock()
            .expect("tables mutex poisoned")
            .get(table)
            .cloned()
    }

    /// Put rows directly, bypassing fault injection.
    ///
    /// # Panics
    ///
    /// Panics if the tables mutex is poisoned.
    pub fn seed(&self, table: &str, rows: Vec<Row>) {
        self.tables
            .lock()
            .expect("tables mutex poisoned")
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    fn faults(&self) -> std::sync::MutexGuard<'_, Faults> {
        self.faults.lock().expect("faults mutex poisoned")
    }

    /// Fail the next `times` insert calls with `kind`.
    pub fn fail_next_inserts(&self, times: usize, kind: StoreErrorKind) {
        self.faults()
            .insert_failures
            .extend(std::iter::repeat_n(kind, times));
    }

    /// Fail every insert call with `kind`.
    pub fn fail_inserts_always(&self, kind: StoreErrorKind) {
        self.faults().always_fail_inserts = Some(kind);
    }

    /// Make the next `times` insert calls acknowledge one row fewer than sent.
    /// Nothing from those calls is persisted.
    pub fn accept_partially(&self, times: usize) {
        self.faults().partial_accepts += times;
    }

    pub fn fail_delete(&self, kind: StoreErrorKind) {
        self.faults().delete_failure = Some(kind);
    }

    pub fn fail_reads(&self, kind: StoreErrorKind) {
        self.faults().read_failure = Some(kind);
    }

    /// Remove every injected fault.
    pub fn heal(&self) {
        let mut faults = self.faults();
        faults.insert_failures.clear();
        faults.always_fail_inserts = None;
        faults.partial_accepts = 0;
        faults.delete_failure = None;
        faults.read_failure = None;
    }

    #[must_use]
    pub fn insert_calls(&self) -> usize {
        self.faults().insert_calls
    }

    #[must_use]
    pub fn delete_calls(&self) -> usize {
        self.faults().delete_calls
    }
}

impl Default for MemoryTableStore {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(table: &str) -> StoreError {
    StoreError::new(StoreErrorKind::NotFound, format!("table {table} not found"))
}

impl TableStore for MemoryTableStore {
    fn delete_all(&self, table: &str) -> StoreResult<()> {
        {
            let mut faults = self.faults();
            faults.delete_calls += 1;
            if let Some(kind) = faults.delete_failure {
                return Err(StoreError::new(kind, format!("injected delete failure on {table}")));
            }
        }
        let mut tables = self.tables.lock().expect("tables mutex poisoned");
        tables.get_mut(table).ok_or_else(|| not_found(table))?.clear();
        Ok(())
    }

    fn insert_batch(&self, table: &str, rows: &[Row]) -> StoreResult<usize> {
        {
            let mut faults = self.faults();
            faults.insert_calls += 1;
            if let Some(kind) = faults.always_fail_inserts {
                return Err(StoreError::new(kind, format!("injected insert failure on {table}")));
            }
            if !faults.insert_failures.is_empty() {
                let kind = faults.insert_failures.remove(0);
                return Err(StoreError::new(kind, format!("injected insert failure on {table}")));
            }
            if faults.partial_accepts > 0 && !rows.is_empty() {
                faults.partial_accepts -= 1;
                return Ok(rows.len() - 1);
            }
        }
        let mut tables = self.tables.lock().expect("tables mutex poisoned");
        let target = tables.get_mut(table).ok_or_else(|| not_found(table))?;
        target.extend_from_slice(rows);
        Ok(rows.len())
    }

    fn read_page(&self, table: &str, offset: usize, limit: usize) -> StoreResult<Vec<Row>> {
        if let Some(kind) = self.faults().read_failure {
            return Err(StoreError::new(kind, format!("injected read failure on {table}")));
        }
        let tables = self.tables.lock().expect("tables mutex poisoned");
        let rows = tables.get(table).ok_or_else(|| not_found(table))?;
        Ok(rows.iter().skip(offset).take(limit).cloned().collect())
    }

    fn page_size(&self) -> usize {
        self.page_size
    }
}
