//! The Result object (spec.md §3/§4.4, component C3).
//!
//! A `QueryResult` holds the server's answer to one dispatched query. Since
//! PostgreSQL's simple-query protocol can fold several `;`-separated
//! statements into one round trip, each producing its own `RowDescription`/
//! `DataRow`*/`CommandComplete` group before the final `ReadyForQuery`, the
//! pipeline (`connection::pipeline`) fetches every group up front and
//! attaches them here as a small queue. `next_row` advances within the
//! current group and, on exhaustion, switches to the next queued one — the
//! direct, ownership-safe equivalent of the original's "synchronously fetch
//! the next packet's result" behavior noted in design note 9 (the call no
//! longer has to block on I/O because the pipeline already did that work,
//! but the cursor semantics the caller observes are unchanged).

use std::cell::RefCell;
use std::collections::HashMap;

use crate::errors::Error;
use crate::messages::wire::unescape_bytea;

/// One `RowDescription`/`DataRow`*/`CommandComplete` (or error) group.
#[derive(Debug, Clone)]
pub(crate) struct ResultGroup {
    pub status: GroupStatus,
    pub field_names: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
    pub command_tag: Option<String>,
    pub server_error: Option<(String, String)>, // (sqlstate, message)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GroupStatus {
    CommandOk,
    TuplesOk,
    EmptyQuery,
    NonfatalError,
    FatalError,
}

/// A single dispatched query's result, as handed to the caller.
#[derive(Debug)]
pub struct QueryResult {
    groups: Vec<ResultGroup>,
    current_group: usize,
    rownum: Option<usize>,
    started: bool,
    failed: bool,
    try_retry: bool,
    timed_out: bool,
    error: Option<String>,
    binary_cache: RefCell<HashMap<usize, Vec<u8>>>,
}

impl QueryResult {
    /// Builds a result and eagerly classifies the first group's status, so
    /// `error()`/`is_failed()`/`try_retry()` are answerable immediately —
    /// the way `PQresultStatus` doesn't require a row fetch first. Only the
    /// row *cursor* is lazy: `next_row()` still has to be called to walk
    /// rows or advance into later groups (see module docs).
    pub(crate) fn from_groups(groups: Vec<ResultGroup>) -> Self {
        let mut result = QueryResult {
            groups,
            current_group: 0,
            rownum: None,
            started: false,
            failed: false,
            try_retry: false,
            timed_out: false,
            error: None,
            binary_cache: RefCell::new(HashMap::new()),
        };
        result.classify(0);
        result
    }

    /// Sets `failed`/`try_retry`/`error` from the status of group `index`,
    /// without touching the row cursor.
    fn classify(&mut self, index: usize) {
        let Some(group) = self.groups.get(index) else {
            return;
        };
        match group.status {
            GroupStatus::CommandOk | GroupStatus::TuplesOk => {}
            GroupStatus::EmptyQuery | GroupStatus::NonfatalError => {
                self.failed = true;
                if let Some((_, msg)) = &group.server_error {
                    self.error = Some(msg.clone());
                }
            }
            GroupStatus::FatalError => {
                self.failed = true;
                self.try_retry = true;
                if let Some((_, msg)) = &group.server_error {
                    self.error = Some(msg.clone());
                }
            }
        }
    }

    /// A result representing "not connected" — returned by `query_s` when
    /// invoked on a disconnected connection, or a send/flush/timeout failure.
    pub(crate) fn failed(message: impl Into<String>, try_retry: bool) -> Self {
        let mut result = QueryResult::from_groups(Vec::new());
        result.failed = true;
        result.try_retry = try_retry;
        result.error = Some(message.into());
        result
    }

    pub(crate) fn timed_out() -> Self {
        let mut result = QueryResult::from_groups(Vec::new());
        result.failed = true;
        result.timed_out = true;
        result
    }

    pub(crate) fn mark_retryable(&mut self) {
        self.try_retry = true;
    }

    /// First call inspects the active group's status; later calls advance
    /// the row cursor, switching to the next queued group on exhaustion.
    /// Returns 1 (row available), 0 (no more rows / command with no rows),
    /// or -1 (error — `failed` is set; fatal errors also request a retry).
    pub fn next_row(&mut self) -> i32 {
        if !self.started {
            self.started = true;
            return self.enter_group(self.current_group);
        }

        let Some(group) = self.groups.get(self.current_group) else {
            return 0;
        };
        let rownum = self.rownum.unwrap_or(0) + 1;
        if rownum < group.rows.len() {
            self.rownum = Some(rownum);
            return 1;
        }

        // Past the end of this group: synchronously "fetch" the next
        // already-queued packet's result, mirroring the original's blocking
        // `PQgetResult` call between packets (see module docs).
        if self.current_group + 1 < self.groups.len() {
            self.current_group += 1;
            return self.enter_group(self.current_group);
        }

        0
    }

    fn enter_group(&mut self, index: usize) -> i32 {
        let Some(group) = self.groups.get(index) else {
            self.failed = true;
            return -1;
        };
        let status = group.status;
        let rows_empty = group.rows.is_empty();
        self.classify(index);
        match status {
            GroupStatus::CommandOk => {
                self.rownum = None;
                0
            }
            GroupStatus::TuplesOk => {
                if rows_empty {
                    self.rownum = None;
                    0
                } else {
                    self.rownum = Some(0);
                    1
                }
            }
            GroupStatus::EmptyQuery | GroupStatus::NonfatalError | GroupStatus::FatalError => -1,
        }
    }

    /// Number of fields in the current (or first, if iteration hasn't
    /// started) result group.
    pub fn fields_count(&self) -> usize {
        self.groups
            .get(self.current_group)
            .map(|group| group.field_names.len())
            .unwrap_or(0)
    }

    pub fn field_name(&self, index: usize) -> Option<&str> {
        self.groups
            .get(self.current_group)
            .and_then(|group| group.field_names.get(index))
            .map(String::as_str)
    }

    pub fn find_field(&self, name: &str) -> Option<usize> {
        self.groups
            .get(self.current_group)?
            .field_names
            .iter()
            .position(|field| field == name)
    }

    /// The current row's value for `index`, or `None` for SQL NULL.
    pub fn field_value(&self, index: usize) -> Option<&str> {
        let group = self.groups.get(self.current_group)?;
        let row = group.rows.get(self.rownum?)?;
        row.get(index)?.as_deref()
    }

    /// `field_value(find_field(name))` in one call: the current row's value
    /// for the field named `name`, or `None` if no such field exists or the
    /// value is SQL NULL (spec.md §6 Result vtable).
    pub fn find_field_value(&self, name: &str) -> Option<&str> {
        self.field_value(self.find_field(name)?)
    }

    /// All values of the current row, one entry per field, `None` at NULL
    /// positions.
    pub fn values(&self) -> Vec<Option<&str>> {
        let Some(group) = self.groups.get(self.current_group) else {
            return Vec::new();
        };
        let Some(rownum) = self.rownum else {
            return vec![None; group.field_names.len()];
        };
        match group.rows.get(rownum) {
            Some(row) => row.iter().map(|v| v.as_deref()).collect(),
            None => vec![None; group.field_names.len()],
        }
    }

    /// The current row's value for `index`, unescaping PostgreSQL's hex
    /// `bytea` format and caching the decoded bytes for the lifetime of this
    /// `QueryResult`.
    pub fn field_value_binary(&self, index: usize) -> Result<Option<Vec<u8>>, Error> {
        let Some(text) = self.field_value(index) else {
            return Ok(None);
        };
        if let Some(cached) = self.binary_cache.borrow().get(&index) {
            return Ok(Some(cached.clone()));
        }
        let bytes = unescape_bytea(text)?;
        self.binary_cache.borrow_mut().insert(index, bytes.clone());
        Ok(Some(bytes))
    }

    /// Composes the error message per spec.md §4.4: the cached timeout
    /// message takes priority, then any server-reported error, else `None`
    /// for a successful result.
    pub fn error(&self) -> Option<&str> {
        if self.timed_out {
            return Some("Query timed out");
        }
        self.error.as_deref()
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn try_retry(&self) -> bool {
        self.try_retry
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// Affected-row count (`CmdTuples`) of the active group's command tag.
    /// Returns an error if the tag has no numeric suffix — per spec.md, a
    /// parse failure here is an internal consistency error, since callers
    /// only invoke this after a successful, non-`SELECT` statement.
    pub fn affected_rows(&self) -> Result<u64, Error> {
        let tag = self
            .groups
            .get(self.current_group)
            .and_then(|group| group.command_tag.as_deref())
            .ok_or_else(|| Error::ProtocolSync("no command tag on this result".into()))?;
        crate::messages::wire::parse_affected_rows(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuples_group(names: &[&str], rows: Vec<Vec<Option<&str>>>) -> ResultGroup {
        ResultGroup {
            status: GroupStatus::TuplesOk,
            field_names: names.iter().map(|s| s.to_string()).collect(),
            rows: rows
                .into_iter()
                .map(|row| row.into_iter().map(|v| v.map(str::to_string)).collect())
                .collect(),
            command_tag: Some("SELECT 1".to_string()),
            server_error: None,
        }
    }

    #[test]
    fn zero_row_select_returns_zero_on_first_call() {
        let mut result = QueryResult::from_groups(vec![tuples_group(&["?column?"], vec![])]);
        assert_eq!(result.next_row(), 0);
    }

    #[test]
    fn single_row_then_end() {
        let mut result =
            QueryResult::from_groups(vec![tuples_group(&["?column?"], vec![vec![Some("1")]])]);
        assert_eq!(result.next_row(), 1);
        assert_eq!(result.fields_count(), 1);
        assert_eq!(result.field_name(0), Some("?column?"));
        assert_eq!(result.field_value(0), Some("1"));
        assert_eq!(result.next_row(), 0);
    }

    #[test]
    fn null_field_is_absent() {
        let mut result =
            QueryResult::from_groups(vec![tuples_group(&["a", "b"], vec![vec![Some("1"), None]])]);
        assert_eq!(result.next_row(), 1);
        assert_eq!(result.field_value(1), None);
        assert_eq!(result.values(), vec![Some("1"), None]);
    }

    #[test]
    fn find_field_value_looks_up_by_name() {
        let mut result =
            QueryResult::from_groups(vec![tuples_group(&["id", "name"], vec![vec![Some("1"), None]])]);
        result.next_row();
        assert_eq!(result.find_field_value("id"), Some("1"));
        assert_eq!(result.find_field_value("name"), None);
        assert_eq!(result.find_field_value("missing"), None);
    }

    #[test]
    fn field_cache_idempotence_across_orderings() {
        let result = QueryResult::from_groups(vec![tuples_group(&["x", "y"], vec![])]);
        assert_eq!(result.fields_count(), 2);
        assert_eq!(result.field_name(1), Some("y"));
        assert_eq!(result.find_field("x"), Some(0));

        let result2 = QueryResult::from_groups(vec![tuples_group(&["x", "y"], vec![])]);
        assert_eq!(result2.find_field("y"), Some(1));
        assert_eq!(result2.field_name(0), Some("x"));
        assert_eq!(result2.fields_count(), 2);
    }

    #[test]
    fn command_ok_returns_zero() {
        let mut result = QueryResult::from_groups(vec![ResultGroup {
            status: GroupStatus::CommandOk,
            field_names: vec![],
            rows: vec![],
            command_tag: Some("INSERT 0 3".to_string()),
            server_error: None,
        }]);
        assert_eq!(result.next_row(), 0);
        assert_eq!(result.affected_rows().unwrap(), 3);
    }

    #[test]
    fn fatal_error_sets_try_retry() {
        let mut result = QueryResult::from_groups(vec![ResultGroup {
            status: GroupStatus::FatalError,
            field_names: vec![],
            rows: vec![],
            command_tag: None,
            server_error: Some(("57P01".to_string(), "terminating connection".to_string())),
        }]);
        assert_eq!(result.next_row(), -1);
        assert!(result.is_failed());
        assert!(result.try_retry());
        assert_eq!(result.error(), Some("terminating connection"));
    }

    #[test]
    fn timeout_error_text() {
        let result = QueryResult::timed_out();
        assert_eq!(result.error(), Some("Query timed out"));
        assert!(result.timed_out());
    }

    #[test]
    fn bytea_unescape_round_trip_cache() {
        let mut result = QueryResult::from_groups(vec![tuples_group(
            &["data"],
            vec![vec![Some("\\x00ff10")]],
        )]);
        result.next_row();
        let first = result.field_value_binary(0).unwrap();
        let second = result.field_value_binary(0).unwrap();
        assert_eq!(first, Some(vec![0x00, 0xff, 0x10]));
        assert_eq!(first, second);
    }

    #[test]
    fn multi_statement_group_advances_on_exhaustion() {
        let mut result = QueryResult::from_groups(vec![
            tuples_group(&["a"], vec![vec![Some("1")]]),
            ResultGroup {
                status: GroupStatus::CommandOk,
                field_names: vec![],
                rows: vec![],
                command_tag: Some("INSERT 0 1".to_string()),
                server_error: None,
            },
        ]);
        assert_eq!(result.next_row(), 1);
        assert_eq!(result.next_row(), 0); // advances into the second group
        assert_eq!(result.affected_rows().unwrap(), 1);
    }
}
