//! Stand-in for the generic SQL driver registry (spec.md §6, AMBIENT).
//!
//! The real registry — where a mail server's generic SQL layer looks up a
//! driver by name and dispatches through a vtable — lives outside this
//! crate (spec.md §1 names it an external collaborator, explicitly out of
//! scope). What belongs here is the shape a driver plugs into: the
//! `SqlDriver` trait mirroring that vtable, and a small process-global table
//! a real registry module would query, grounded on the same
//! register/unregister-by-name pattern the teacher's `pool` module uses for
//! its own address bookkeeping (`once_cell`-backed, logged at `info!`).

use std::collections::HashMap;
use std::sync::Mutex;

use log::info;
use once_cell::sync::Lazy;

use crate::connection::Connection;
use crate::errors::Error;
use crate::result::QueryResult;
use crate::transaction::Transaction;

/// Driver name this crate registers itself under, matching libpq's own
/// driver name for the generic SQL layer's benefit.
pub const DRIVER_NAME: &str = "pgsql";

/// Registry flags a driver may advertise. Only `POOLED` is meaningful here:
/// it tells the generic SQL layer that connections this driver hands out may
/// be kept open and reused rather than torn down after every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverFlags {
    pub pooled: bool,
}

/// The vtable contract a generic SQL layer dispatches through. Every method
/// mirrors one operation from spec.md §6; `Connection`/`Transaction` already
/// implement the underlying behavior, this trait just names the contract
/// explicitly so a generic-SQL-layer caller can be written against it
/// generically instead of against `Connection` directly.
pub trait SqlDriver: Send {
    fn init(connect_string: &str) -> Self
    where
        Self: Sized;
    async fn connect(&mut self) -> Result<(), Error>;
    fn disconnect(&mut self);
    async fn escape_string(&mut self, s: &str) -> Result<String, Error>;
    fn escape_blob(&self, data: &[u8]) -> String;
    async fn exec(&mut self, sql: &str);
    async fn query(&mut self, sql: &str) -> QueryResult;
    fn query_s(&mut self, sql: &str) -> QueryResult;
    fn transaction_begin(&self) -> Transaction;
    fn update(&self, txn: &mut Transaction, sql: &str, want_affected_rows: bool) -> Result<(), Error>;
    async fn transaction_commit(&mut self, txn: &mut Transaction) -> Result<Vec<u64>, Error>;
    fn transaction_commit_s(&mut self, txn: &mut Transaction) -> Result<Vec<u64>, Error>;
    fn transaction_rollback(&self, txn: &mut Transaction);
}

impl SqlDriver for Connection {
    fn init(connect_string: &str) -> Self {
        Connection::new(connect_string)
    }
    async fn connect(&mut self) -> Result<(), Error> {
        Connection::connect(self).await
    }
    fn disconnect(&mut self) {
        Connection::disconnect(self)
    }
    async fn escape_string(&mut self, s: &str) -> Result<String, Error> {
        Connection::escape_string(self, s).await
    }
    fn escape_blob(&self, data: &[u8]) -> String {
        crate::connection::escape_blob(data)
    }
    async fn exec(&mut self, sql: &str) {
        Connection::exec(self, sql).await
    }
    async fn query(&mut self, sql: &str) -> QueryResult {
        Connection::query(self, sql).await
    }
    fn query_s(&mut self, sql: &str) -> QueryResult {
        Connection::query_s(self, sql)
    }
    fn transaction_begin(&self) -> Transaction {
        Transaction::new()
    }
    fn update(&self, txn: &mut Transaction, sql: &str, want_affected_rows: bool) -> Result<(), Error> {
        txn.update(sql, want_affected_rows)
    }
    async fn transaction_commit(&mut self, txn: &mut Transaction) -> Result<Vec<u64>, Error> {
        txn.commit(self).await
    }
    fn transaction_commit_s(&mut self, txn: &mut Transaction) -> Result<Vec<u64>, Error> {
        txn.commit_s(self)
    }
    fn transaction_rollback(&self, txn: &mut Transaction) {
        txn.rollback()
    }
}

static REGISTRY: Lazy<Mutex<HashMap<String, DriverFlags>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Register this driver under `name` (spec.md's "register a `sql_db` record
/// ... with flag `POOLED`"). Idempotent: registering the same name twice
/// just overwrites the flags and logs again.
pub fn register(name: &str, flags: DriverFlags) {
    info!("pgsql: registering SQL driver {name:?} (pooled: {})", flags.pooled);
    REGISTRY.lock().expect("registry mutex poisoned").insert(name.to_string(), flags);
}

/// Remove a previously registered driver name. No-op if it was never
/// registered.
pub fn unregister(name: &str) {
    if REGISTRY
        .lock()
        .expect("registry mutex poisoned")
        .remove(name)
        .is_some()
    {
        info!("pgsql: unregistering SQL driver {name:?}");
    }
}

pub fn is_registered(name: &str) -> bool {
    REGISTRY.lock().expect("registry mutex poisoned").contains_key(name)
}
