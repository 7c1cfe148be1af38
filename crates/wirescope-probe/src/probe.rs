//! Batch execution and JSON-lines output.
//!
//! Each row is written as one line: `{"set":<index>,"row":{<column>:<value>}}`.
//! Result sets are read one at a time through a grid reader, so a large
//! first result set is fully written before the next one is requested.

use std::io::Write;

use serde_json::json;
use tracing::{info, warn};
use wirescope::{CancellationToken, ConnectionFactory, Database, Row};

use crate::error::ProbeError;

/// What one probe run produced.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Summary {
    /// Result sets read.
    pub result_sets: usize,
    /// Rows written across all result sets.
    pub rows: usize,
}

/// Open one session, run `sql` and write every result set to `out`.
///
/// The session is closed before returning, including when reading fails. A
/// batch failure takes precedence over a failure to close afterwards.
pub async fn run<F: ConnectionFactory>(
    database: &Database<F>,
    sql: &str,
    cancel: &CancellationToken,
    out: &mut impl Write,
) -> Result<Summary, ProbeError> {
    if sql.trim().is_empty() {
        return Err(ProbeError::EmptyBatch);
    }

    let mut session = database.connect(cancel).await?;
    let result = write_batch(&mut session, sql, cancel, out).await;
    if let Err(close_error) = session.close().await {
        if result.is_ok() {
            return Err(close_error.into());
        }
        warn!(error = %close_error, "Failed to close the session after a failed batch");
    }
    result
}

async fn write_batch<C: wirescope::Connection>(
    session: &mut wirescope::Session<C>,
    sql: &str,
    cancel: &CancellationToken,
    out: &mut impl Write,
) -> Result<Summary, ProbeError> {
    let mut grid = session.execute_grid_reader(sql, cancel).await?;
    let mut summary = Summary::default();

    while !grid.is_closed() {
        cancel.check()?;
        let rows: Vec<Row> = grid.read().await?;
        for row in &rows {
            let line = json!({ "set": summary.result_sets, "row": row.to_json() });
            serde_json::to_writer(&mut *out, &line)?;
            out.write_all(b"\n")?;
        }
        info!(
            result_set = summary.result_sets,
            rows = rows.len(),
            "Result set read"
        );
        summary.rows = summary.rows.saturating_add(rows.len());
        summary.result_sets = summary.result_sets.saturating_add(1);
    }
    out.flush()?;
    Ok(summary)
}
