//! NDJSON (newline-delimited JSON) stream sink.
//!
//! Each row is serialized directly to the writer without an intermediate
//! `String`.
//!
//! ```ignore
//! let mut sink = JsonStreamSink::stdout();
//! sink.write_summary(&summary)?;
//! sink.write_rows(&rows)?;
//! sink.finish()?;
//! ```

use super::{OwnershipRow, ReportSummaryRow};
use serde::Serialize;
use std::io::{self, BufWriter, Write};

/// Buffered NDJSON writer.
pub struct JsonStreamSink<W: Write> {
    writer: BufWriter<W>,
    rows_written: usize,
}

impl JsonStreamSink<io::Stdout> {
    /// Write NDJSON to stdout.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> JsonStreamSink<W> {
    /// Create a sink wrapping any writer (file, Vec<u8>, etc.).
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::with_capacity(64 * 1024, writer),
            rows_written: 0,
        }
    }

    fn write_row<T: Serialize>(&mut self, row: &T) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, row).map_err(io::Error::other)?;
        self.writer.write_all(b"\n")?;
        self.rows_written += 1;
        Ok(())
    }

    pub fn write_summary(&mut self, row: &ReportSummaryRow) -> io::Result<()> {
        self.write_row(row)
    }

    pub fn write_rows(&mut self, rows: &[OwnershipRow]) -> io::Result<()> {
        for row in rows {
            self.write_row(row)?;
        }
        Ok(())
    }

    /// Flush and return how many rows were written.
    pub fn finish(mut self) -> io::Result<usize> {
        self.writer.flush()?;
        Ok(self.rows_written)
    }

    /// Number of rows written so far.
    pub fn rows_written(&self) -> usize {
        self.rows_written
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_json_object_per_line() {
        let mut buf = Vec::new();
        let mut sink = JsonStreamSink::new(&mut buf);

        let summary = ReportSummaryRow {
            user: "marlyn".into(),
            include_groups: true,
            owned: 1,
            direct: 1,
            inherited_only: 0,
            sole_owned_shared: 1,
            elapsed_ms: 0,
            generated_at: 1_700_000_000,
        };
        let rows = vec![OwnershipRow {
            user: "marlyn".into(),
            resource: "nodejs".into(),
            via: "user:marlyn".into(),
            direct: true,
            shared: true,
            sole_owner: true,
            generated_at: 1_700_000_000,
        }];

        sink.write_summary(&summary).unwrap();
        sink.write_rows(&rows).unwrap();
        assert_eq!(sink.rows_written(), 2);
        assert_eq!(sink.finish().unwrap(), 2);

        let output = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = output.trim().split('\n').collect();
        assert_eq!(lines.len(), 2);

        let row: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(row["resource"], "nodejs");
        assert_eq!(row["sole_owner"], true);
    }
}
