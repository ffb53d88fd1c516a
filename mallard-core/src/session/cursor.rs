//! Forward-only cursor over one execution's result.

use std::sync::Arc;
use std::vec;

use duckdb::arrow::record_batch::RecordBatch;
use duckdb::types::Value;
use duckdb::{params_from_iter, Statement};
use tracing::debug;

use crate::engine::tracker::ResourceGuard;
use crate::error::{DriverError, QueryContext};
use crate::progress::ProgressTicket;
use crate::session::lease::Fence;
use crate::session::row::{columns_from_schema, Column, Row};
use crate::types::{arrow_array_to_duckdb_values, is_decodable};

/// Result batches of one execution, as handed over by the engine.
pub(crate) struct QueryOutput {
    pub(crate) columns: Arc<[Column]>,
    pub(crate) batches: Vec<RecordBatch>,
    pub(crate) total_rows: usize,
}

impl QueryOutput {
    pub(crate) fn empty() -> Self {
        Self {
            columns: Arc::from(Vec::new()),
            batches: Vec::new(),
            total_rows: 0,
        }
    }
}

/// Run a prepared statement and collect its result batches.
///
/// The native result borrows the statement, which borrows the session's
/// connection, so every batch is fetched here while the connection lock is
/// held.
pub(crate) fn run_query(
    stmt: &mut Statement<'_>,
    params: &[Value],
    sql: &str,
) -> Result<QueryOutput, DriverError> {
    let arrow = stmt
        .query_arrow(params_from_iter(params.iter()))
        .query_context("query", sql)?;
    let schema = arrow.get_schema();

    let mut total_rows = 0usize;
    let batches: Vec<RecordBatch> = arrow
        .inspect(|batch| total_rows += batch.num_rows())
        .collect();

    debug!(
        batch_count = batches.len(),
        total_rows, "collected query result"
    );
    Ok(QueryOutput {
        columns: columns_from_schema(&schema),
        batches,
        total_rows,
    })
}

/// Forward-only, non-restartable sequence of result rows.
///
/// The engine result is fetched in full when the query runs; rows are then
/// decoded lazily, one Arrow batch at a time, as they are read. The cursor stays
/// tied to the session (and statement handle, if any) that produced it:
/// once either is closed, or the handle is executed again, reads fail with
/// [`DriverError::UseAfterClose`].
pub struct RowCursor {
    columns: Arc<[Column]>,
    batches: vec::IntoIter<RecordBatch>,
    pending: vec::IntoIter<Vec<Value>>,
    delivered: usize,
    total: usize,
    fences: Vec<Fence>,
    execution: Option<Fence>,
    progress: Option<ProgressTicket>,
    done: bool,
    _guard: ResourceGuard,
}

impl RowCursor {
    pub(crate) fn new(
        output: QueryOutput,
        fences: Vec<Fence>,
        execution: Option<Fence>,
        progress: ProgressTicket,
        guard: ResourceGuard,
    ) -> Self {
        let mut cursor = Self {
            columns: output.columns,
            batches: output.batches.into_iter(),
            pending: Vec::new().into_iter(),
            delivered: 0,
            total: output.total_rows,
            fences,
            execution,
            progress: Some(progress),
            done: false,
            _guard: guard,
        };
        if cursor.total == 0 {
            cursor.finish();
        }
        cursor
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Rows handed out so far.
    pub fn rows_read(&self) -> usize {
        self.delivered
    }

    /// Advance to the next row; `Ok(None)` once the result is exhausted.
    pub fn next_row(&mut self) -> Result<Option<Row>, DriverError> {
        if self.fences.iter().any(|fence| !fence.is_valid()) {
            return Err(DriverError::UseAfterClose("row cursor"));
        }

        loop {
            if let Some(values) = self.pending.next() {
                self.delivered += 1;
                if let Some(progress) = &self.progress {
                    progress.report(self.delivered as f64 / self.total as f64);
                }
                return Ok(Some(Row::new(Arc::clone(&self.columns), values)));
            }

            match self.batches.next() {
                Some(batch) => self.pending = decode_batch(&batch)?,
                None => {
                    self.finish();
                    return Ok(None);
                }
            }
        }
    }

    fn finish(&mut self) {
        if let Some(execution) = &self.execution {
            execution.mark_exhausted();
        }
        self.progress = None;
    }
}

impl Iterator for RowCursor {
    type Item = Result<Row, DriverError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let next = self.next_row().transpose();
        if !matches!(next, Some(Ok(_))) {
            self.done = true;
        }
        next
    }
}

impl std::fmt::Debug for RowCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowCursor")
            .field("columns", &self.columns)
            .field("delivered", &self.delivered)
            .field("total", &self.total)
            .finish_non_exhaustive()
    }
}

fn decode_batch(batch: &RecordBatch) -> Result<vec::IntoIter<Vec<Value>>, DriverError> {
    let mut rows: Vec<Vec<Value>> = (0..batch.num_rows())
        .map(|_| Vec::with_capacity(batch.num_columns()))
        .collect();
    for column in batch.columns() {
        // Cells of columns without a decoder stay NULL; `Row::get` rejects them.
        if !is_decodable(column.data_type()) {
            rows.iter_mut().for_each(|row| row.push(Value::Null));
            continue;
        }
        for (row, value) in rows.iter_mut().zip(arrow_array_to_duckdb_values(column)?) {
            row.push(value);
        }
    }
    Ok(rows.into_iter())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tracker::{ResourceKind, ResourceTracker};
    use crate::progress::ProgressMonitor;
    use crate::session::lease::Lease;
    use duckdb::arrow::array::{ArrayRef, Decimal256Array, Int32Array, StringArray};
    use duckdb::arrow::datatypes::{i256, DataType, Field, Schema};

    fn batch(names: &[&str], ages: &[i32]) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("name", DataType::Utf8, true),
            Field::new("age", DataType::Int32, true),
        ]));
        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from(names.to_vec())),
            Arc::new(Int32Array::from(ages.to_vec())),
        ];
        RecordBatch::try_new(schema, columns).unwrap()
    }

    fn output(batches: Vec<RecordBatch>) -> QueryOutput {
        let total_rows = batches.iter().map(RecordBatch::num_rows).sum();
        QueryOutput {
            columns: columns_from_schema(&batches[0].schema()),
            batches,
            total_rows,
        }
    }

    #[test]
    fn reads_across_batches_and_reports_progress() {
        let monitor = ProgressMonitor::new();
        let tracker = ResourceTracker::default();
        let lease = Lease::new();
        let execution = lease.renew();

        let mut cursor = RowCursor::new(
            output(vec![batch(&["a", "b"], &[1, 2]), batch(&["c", "d"], &[3, 4])]),
            vec![execution.clone()],
            Some(execution),
            monitor.start(),
            tracker.acquire(ResourceKind::Cursor),
        );
        assert_eq!(cursor.columns()[1].declared_type(), "INTEGER");

        let first = cursor.next_row().unwrap().unwrap();
        assert_eq!(first.get::<String>(0).unwrap(), "a");
        assert_eq!(monitor.current(), 0.25);

        let rest: Vec<i32> = cursor
            .by_ref()
            .map(|row| row.and_then(|row| row.get::<i32>(1)))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(rest, vec![2, 3, 4]);
        assert!(lease.is_exhausted());
        assert_eq!(monitor.current(), 0.0);
        assert!(cursor.next_row().unwrap().is_none());

        drop(cursor);
        assert!(tracker.snapshot().is_idle());
    }

    #[test]
    fn closed_lease_fails_reads() {
        let monitor = ProgressMonitor::new();
        let tracker = ResourceTracker::default();
        let lease = Lease::new();

        let mut cursor = RowCursor::new(
            output(vec![batch(&["a"], &[1])]),
            vec![lease.fence()],
            None,
            monitor.start(),
            tracker.acquire(ResourceKind::Cursor),
        );
        lease.close();
        assert!(matches!(
            cursor.next_row(),
            Err(DriverError::UseAfterClose("row cursor"))
        ));
        assert!(matches!(cursor.next(), Some(Err(_))));
        assert!(cursor.next().is_none());
    }

    #[test]
    fn empty_result_is_exhausted_immediately() {
        let monitor = ProgressMonitor::new();
        let tracker = ResourceTracker::default();
        let lease = Lease::new();
        let execution = lease.renew();

        let mut cursor = RowCursor::new(
            QueryOutput::empty(),
            vec![execution.clone()],
            Some(execution),
            monitor.start(),
            tracker.acquire(ResourceKind::Cursor),
        );
        assert!(lease.is_exhausted());
        assert!(cursor.next_row().unwrap().is_none());
    }

    #[test]
    fn undecodable_column_fails_only_when_read() {
        let monitor = ProgressMonitor::new();
        let tracker = ResourceTracker::default();
        let lease = Lease::new();

        let schema = Arc::new(Schema::new(vec![
            Field::new("x", DataType::Int32, true),
            Field::new("wide", DataType::Decimal256(40, 2), true),
        ]));
        let wide = Decimal256Array::from(vec![Some(i256::from_i128(5))])
            .with_precision_and_scale(40, 2)
            .unwrap();
        let columns: Vec<ArrayRef> = vec![Arc::new(Int32Array::from(vec![1])), Arc::new(wide)];
        let batch = RecordBatch::try_new(schema, columns).unwrap();

        let mut cursor = RowCursor::new(
            output(vec![batch]),
            vec![lease.fence()],
            None,
            monitor.start(),
            tracker.acquire(ResourceKind::Cursor),
        );
        assert!(!cursor.columns()[1].is_decodable());

        let row = cursor.next_row().unwrap().unwrap();
        assert_eq!(row.get::<i32>(0).unwrap(), 1);
        match row.get::<Value>(1).unwrap_err() {
            DriverError::TypeMismatch { column, actual, .. } => {
                assert_eq!(column, "wide");
                assert_eq!(actual, "DECIMAL(40,2)");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
