//! The nonblocking query pipeline (spec.md §4.3, component C4).
//!
//! Grounded on the teacher's client-request handling in `server_backend.rs`
//! (`send_and_flush`, then read backend messages until `ReadyForQuery`), but
//! collapsed into a single `async fn`: the five-phase dispatch loop spec.md
//! describes (send / flush / consume input / fetch result / drain extras)
//! is exactly what sequential `.await`s already give us, so there is no
//! separate phase-tracking state here — the `Future`'s own suspend points
//! are the phases.

use crate::connection::Connection;
use crate::errors::Error;
use crate::messages::constants::backend;
use crate::messages::wire::*;
use crate::result::{GroupStatus, QueryResult, ResultGroup};

/// Send `sql` as a simple-query string and collect every result group it
/// produces (one per `;`-separated statement) up through `ReadyForQuery`.
pub(crate) async fn run_query(conn: &mut Connection, sql: &str) -> Result<QueryResult, Error> {
    let stream = conn.stream_mut()?;
    write_all_flush(stream, &simple_query(sql)).await?;

    let mut groups = Vec::new();
    let mut pending_fields: Option<Vec<String>> = None;
    let mut pending_rows: Vec<Vec<Option<String>>> = Vec::new();

    loop {
        let stream = conn.stream_mut()?;
        let (code, body) = read_message(stream).await?;
        match code {
            backend::ROW_DESCRIPTION => {
                pending_fields = Some(parse_row_description(body)?);
                pending_rows = Vec::new();
            }
            backend::DATA_ROW => {
                pending_rows.push(parse_data_row(body)?);
            }
            backend::COMMAND_COMPLETE => {
                let tag = parse_command_complete(body)?;
                groups.push(finish_group(&mut pending_fields, &mut pending_rows, tag));
            }
            backend::EMPTY_QUERY_RESPONSE => {
                groups.push(ResultGroup {
                    status: GroupStatus::EmptyQuery,
                    field_names: Vec::new(),
                    rows: Vec::new(),
                    command_tag: None,
                    server_error: Some((String::new(), "empty query string".to_string())),
                });
            }
            backend::ERROR_RESPONSE => {
                let err = parse_error_fields(body)?;
                let fatal = is_fatal_sqlstate(&err.code);
                if fatal {
                    conn.mark_fatal();
                }
                groups.push(ResultGroup {
                    status: if fatal {
                        GroupStatus::FatalError
                    } else {
                        GroupStatus::NonfatalError
                    },
                    field_names: Vec::new(),
                    rows: Vec::new(),
                    command_tag: None,
                    server_error: Some((err.code, err.message)),
                });
            }
            backend::NOTICE_RESPONSE => {
                // Advisory only; spec.md §4.3 drains these without surfacing
                // them on the QueryResult.
            }
            backend::NOTIFICATION_RESPONSE => {
                // Async LISTEN/NOTIFY payload; out of scope (spec.md
                // Non-goals), drained and discarded.
            }
            backend::PARAMETER_STATUS => {
                let (key, value) = parse_parameter_status(body)?;
                conn.server_parameters_mut().insert(key, value);
            }
            backend::READY_FOR_QUERY => {
                if groups.is_empty() {
                    conn.set_last_error("server sent no result for this query");
                }
                return Ok(QueryResult::from_groups(groups));
            }
            other => {
                return Err(Error::ProtocolSync(format!(
                    "unexpected message {:?} during query execution",
                    other as char
                )))
            }
        }
    }
}

fn finish_group(
    pending_fields: &mut Option<Vec<String>>,
    pending_rows: &mut Vec<Vec<Option<String>>>,
    tag: String,
) -> ResultGroup {
    let field_names = pending_fields.take().unwrap_or_default();
    let rows = std::mem::take(pending_rows);
    let status = if field_names.is_empty() {
        GroupStatus::CommandOk
    } else {
        GroupStatus::TuplesOk
    };
    ResultGroup {
        status,
        field_names,
        rows,
        command_tag: Some(tag),
        server_error: None,
    }
}

/// Classifies a server error as connection-fatal per spec.md §4.2: class
/// `57` (operator intervention — admin shutdown, crash shutdown, cannot
/// connect now) and class `08` (connection exception) invalidate the
/// session; anything else (constraint violations, syntax errors, etc.)
/// leaves the connection usable for the next query.
fn is_fatal_sqlstate(code: &str) -> bool {
    code.starts_with("57") || code.starts_with("08")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_sqlstate_classes() {
        assert!(is_fatal_sqlstate("57P01"));
        assert!(is_fatal_sqlstate("08006"));
        assert!(!is_fatal_sqlstate("23505"));
        assert!(!is_fatal_sqlstate("42601"));
    }
}
