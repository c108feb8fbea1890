//! Flat, serializable rows for ownership reports.
//!
//! Two row schemas:
//! - [`ReportSummaryRow`] -- one per report
//! - [`OwnershipRow`] -- one per owned resource (denormalized)
//!
//! Backend: [`json_stream::JsonStreamSink`] writes newline-delimited JSON to
//! any `Write` impl.

pub mod json_stream;

use crate::reporter::OwnershipReport;
use serde::Serialize;
use std::time::SystemTime;

// ---------------------------------------------------------------------------
// Serializable row types
// ---------------------------------------------------------------------------

/// One row per owned resource.
#[derive(Debug, Clone, Serialize)]
pub struct OwnershipRow {
    pub user: String,
    pub resource: String,
    /// Owning subjects, `kind:id`, comma separated.
    pub via: String,
    pub direct: bool,
    pub shared: bool,
    pub sole_owner: bool,
    /// Unix seconds.
    pub generated_at: u64,
}

/// One row per report.
#[derive(Debug, Clone, Serialize)]
pub struct ReportSummaryRow {
    pub user: String,
    pub include_groups: bool,
    pub owned: u32,
    pub direct: u32,
    pub inherited_only: u32,
    pub sole_owned_shared: u32,
    pub elapsed_ms: u64,
    pub generated_at: u64,
}

// ---------------------------------------------------------------------------
// Builder: Report → Rows
// ---------------------------------------------------------------------------

impl OwnershipReport {
    /// Flatten the report into sink-ready rows.
    pub fn to_rows(&self) -> (ReportSummaryRow, Vec<OwnershipRow>) {
        let now = unix_now();

        let summary = ReportSummaryRow {
            user: self.user.to_string(),
            include_groups: self.include_groups,
            owned: self.resources.len() as u32,
            direct: self.direct_count() as u32,
            inherited_only: self.inherited_only_count() as u32,
            sole_owned_shared: self.sole_owned_count() as u32,
            elapsed_ms: self.elapsed.as_millis() as u64,
            generated_at: now,
        };

        let rows = self
            .resources
            .iter()
            .map(|r| OwnershipRow {
                user: self.user.to_string(),
                resource: r.resource.to_string(),
                via: r
                    .via
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(","),
                direct: r.is_direct(),
                shared: r.shared,
                sole_owner: r.sole_owner,
                generated_at: now,
            })
            .collect();

        (summary, rows)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
