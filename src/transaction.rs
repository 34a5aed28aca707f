//! The transaction coordinator (spec.md §4.5, component C5).
//!
//! Grounded on the teacher's multi-statement handling in
//! `server_backend.rs` (buffer statements, send as one batch, watch for the
//! matching number of `ReadyForQuery`s) adapted to this driver's
//! one-statement-per-round-trip `Connection::query`. `begin`/`update` only
//! buffer; all I/O happens in `commit`/`commit_s`.

use crate::connection::Connection;
use crate::errors::Error;
use crate::result::QueryResult;

/// Buffers statements for one transaction and sequences `BEGIN` / the
/// buffered statements / `COMMIT` (or `ROLLBACK`) against a [`Connection`]
/// supplied at commit time.
#[derive(Debug, Default)]
pub struct Transaction {
    statements: Vec<(String, bool)>,
    failed: Option<String>,
}

impl Transaction {
    pub fn new() -> Self {
        Transaction::default()
    }

    /// Buffer `sql`. No I/O happens until [`Transaction::commit`] or
    /// [`Transaction::commit_s`]. `want_affected_rows` requests that the
    /// corresponding entry in `commit`'s returned `Vec<u64>` carry this
    /// statement's `CmdTuples` count (`0` otherwise).
    pub fn update(&mut self, sql: impl Into<String>, want_affected_rows: bool) -> Result<(), Error> {
        if self.failed.is_some() {
            return Err(Error::TransactionStatement(
                "transaction already failed".to_string(),
                sql.into(),
            ));
        }
        self.statements.push((sql.into(), want_affected_rows));
        Ok(())
    }

    /// Sequence `BEGIN, s1..sn, COMMIT` against `conn` (or, for a single
    /// buffered statement, dispatch it directly with no wrapping `BEGIN`/
    /// `COMMIT` — spec.md's single-statement fast path). On a mid-sequence
    /// failure, sends an explicit `ROLLBACK` if the connection is still
    /// usable, then returns `Error::TransactionStatement` naming the
    /// statement that failed.
    pub async fn commit(&mut self, conn: &mut Connection) -> Result<Vec<u64>, Error> {
        if let Some(reason) = &self.failed {
            return Err(Error::TransactionStatement(reason.clone(), String::new()));
        }
        if self.statements.is_empty() {
            return Ok(Vec::new());
        }
        if self.statements.len() == 1 {
            let (sql, want_rows) = self.statements[0].clone();
            let result = conn.query(&sql).await;
            return self.finish_single(&sql, &want_rows, result);
        }

        let statements = std::mem::take(&mut self.statements);
        let begin = conn.query("BEGIN").await;
        if let Some(err) = begin.error() {
            let message = err.to_string();
            self.failed = Some(message.clone());
            return Err(Error::TransactionStatement(message, "BEGIN".to_string()));
        }

        let mut affected = Vec::with_capacity(statements.len());
        for (sql, want_rows) in &statements {
            let result = conn.query(sql).await;
            if let Some(err) = result.error() {
                let message = err.to_string();
                self.failed = Some(message.clone());
                if conn.state() != crate::connection::ConnState::Disconnected {
                    conn.exec("ROLLBACK").await;
                }
                return Err(Error::TransactionStatement(message, sql.clone()));
            }
            affected.push(if *want_rows {
                result.affected_rows().unwrap_or(0)
            } else {
                0
            });
        }

        let commit = conn.query("COMMIT").await;
        if let Some(err) = commit.error() {
            let message = err.to_string();
            self.failed = Some(message.clone());
            return Err(Error::TransactionStatement(message, "COMMIT".to_string()));
        }
        Ok(affected)
    }

    /// Blocking variant of [`Transaction::commit`] (spec.md §5), using
    /// [`Connection::query_s`]'s private event loop for each statement.
    ///
    /// If the attempt leaves `conn` `Disconnected` (the commit's own
    /// statements never reached the server, or reached it and the connection
    /// then dropped before a reply), this logs and retries the whole sequence
    /// exactly once after reconnecting (spec.md §4.5) — a fresh connection
    /// has no partial transaction state to resume, so the retry restarts
    /// from `BEGIN` (or the lone statement) rather than resuming mid-sequence.
    pub fn commit_s(&mut self, conn: &mut Connection) -> Result<Vec<u64>, Error> {
        if let Some(reason) = &self.failed {
            return Err(Error::TransactionStatement(reason.clone(), String::new()));
        }
        if self.statements.is_empty() {
            return Ok(Vec::new());
        }

        let statements = self.statements.clone();
        match self.commit_s_attempt(conn, &statements) {
            Ok(affected) => {
                self.statements.clear();
                Ok(affected)
            }
            Err(err) if conn.state() == crate::connection::ConnState::Disconnected => {
                log::warn!(
                    "pgsql: transaction commit lost the connection, reconnecting and retrying once"
                );
                self.failed = None;
                if let Err(connect_err) = conn.connect_s() {
                    self.failed = Some(connect_err.to_string());
                    self.statements.clear();
                    return Err(connect_err);
                }
                let _ = err; // superseded by the retry's own outcome below
                let result = self.commit_s_attempt(conn, &statements);
                self.statements.clear();
                result
            }
            Err(err) => {
                self.statements.clear();
                Err(err)
            }
        }
    }

    /// One full synchronous commit attempt against `conn`, without touching
    /// `self.statements` (the caller owns retry bookkeeping).
    fn commit_s_attempt(
        &mut self,
        conn: &mut Connection,
        statements: &[(String, bool)],
    ) -> Result<Vec<u64>, Error> {
        if statements.len() == 1 {
            let (sql, want_rows) = &statements[0];
            let result = conn.query_s(sql);
            return self.finish_single(sql, want_rows, result);
        }

        let begin = conn.query_s("BEGIN");
        if let Some(err) = begin.error() {
            let message = err.to_string();
            self.failed = Some(message.clone());
            return Err(Error::TransactionStatement(message, "BEGIN".to_string()));
        }

        let mut affected = Vec::with_capacity(statements.len());
        for (sql, want_rows) in statements {
            let result = conn.query_s(sql);
            if let Some(err) = result.error() {
                let message = err.to_string();
                self.failed = Some(message.clone());
                if conn.state() != crate::connection::ConnState::Disconnected {
                    conn.query_s("ROLLBACK");
                }
                return Err(Error::TransactionStatement(message, sql.clone()));
            }
            affected.push(if *want_rows {
                result.affected_rows().unwrap_or(0)
            } else {
                0
            });
        }

        let commit = conn.query_s("COMMIT");
        if let Some(err) = commit.error() {
            let message = err.to_string();
            self.failed = Some(message.clone());
            return Err(Error::TransactionStatement(message, "COMMIT".to_string()));
        }
        Ok(affected)
    }

    /// Discards any buffered statements without dispatching anything.
    pub fn rollback(&mut self) {
        self.statements.clear();
        self.failed = None;
    }

    fn finish_single(
        &mut self,
        sql: &str,
        want_rows: &bool,
        result: QueryResult,
    ) -> Result<Vec<u64>, Error> {
        if let Some(err) = result.error() {
            let message = err.to_string();
            self.failed = Some(message.clone());
            return Err(Error::TransactionStatement(message, sql.to_string()));
        }
        Ok(vec![if *want_rows {
            result.affected_rows().unwrap_or(0)
        } else {
            0
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_after_failure_is_rejected() {
        let mut txn = Transaction::new();
        txn.failed = Some("boom".to_string());
        assert!(txn.update("SELECT 1", false).is_err());
    }

    #[test]
    fn rollback_clears_buffered_statements() {
        let mut txn = Transaction::new();
        txn.update("INSERT INTO t VALUES (1)", false).unwrap();
        txn.rollback();
        assert!(txn.statements.is_empty());
        assert!(txn.failed.is_none());
    }
}
