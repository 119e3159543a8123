//! Query cursors.

use clickhouse_session::{Column, Value};

use crate::connection::Connection;
use crate::error::{Error, Result};

/// A per-operation execution context bound to one [`Connection`].
///
/// A cursor borrows its connection mutably, so it cannot outlive the
/// connection's release back to a pool: finish fetching before letting
/// the connection go.
pub struct Cursor<'a> {
    connection: &'a mut Connection,
    result: Option<CursorResult>,
    closed: bool,
}

struct CursorResult {
    columns: Vec<Column>,
    rows: std::vec::IntoIter<Vec<Value>>,
    rowcount: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(connection: &'a mut Connection) -> Self {
        Self {
            connection,
            result: None,
            closed: false,
        }
    }

    /// The connection this cursor was created on.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        self.connection
    }

    /// Execute a query, replacing any previous result.
    pub async fn execute(&mut self, query: &str) -> Result<()> {
        self.check_open()?;
        let result = self.connection.execute(query).await?;
        let rowcount = result.rows.len();
        self.result = Some(CursorResult {
            columns: result.columns,
            rows: result.rows.into_iter(),
            rowcount,
        });
        Ok(())
    }

    /// Fetch the next row, or `None` when the result is exhausted.
    pub fn fetchone(&mut self) -> Result<Option<Vec<Value>>> {
        self.check_open()?;
        match self.result.as_mut() {
            Some(result) => Ok(result.rows.next()),
            None => Err(Error::NoResults),
        }
    }

    /// Fetch up to `n` rows.
    pub fn fetchmany(&mut self, n: usize) -> Result<Vec<Vec<Value>>> {
        self.check_open()?;
        match self.result.as_mut() {
            Some(result) => Ok(result.rows.by_ref().take(n).collect()),
            None => Err(Error::NoResults),
        }
    }

    /// Fetch every remaining row.
    pub fn fetchall(&mut self) -> Result<Vec<Vec<Value>>> {
        self.check_open()?;
        match self.result.as_mut() {
            Some(result) => Ok(result.rows.by_ref().collect()),
            None => Err(Error::NoResults),
        }
    }

    /// Number of rows the last `execute` produced, or -1 before any
    /// query ran.
    #[must_use]
    pub fn rowcount(&self) -> i64 {
        match &self.result {
            Some(result) => result.rowcount as i64,
            None => -1,
        }
    }

    /// Columns of the last result, if a query has been executed.
    #[must_use]
    pub fn columns(&self) -> Option<&[Column]> {
        self.result.as_ref().map(|r| r.columns.as_slice())
    }

    /// Close the cursor, discarding any buffered result.
    ///
    /// Further operations fail with a cursor-closed error.
    pub fn close(&mut self) {
        self.result = None;
        self.closed = true;
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::CursorClosed)
        } else {
            Ok(())
        }
    }
}
