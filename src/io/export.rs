//! CSV export for per-tick feeder telemetry.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::sim::types::TelemetryRow;

/// Column header for feeder telemetry export.
const HEADER: &str = "time_s,cycle,feeder_id,target_kw,current_kw,load_pct,\
                       status,active_ders,der_contribution_kw,pending";

/// Exports telemetry rows to a CSV file at the given path.
///
/// Writes a header row followed by one row per feeder per load tick.
/// Produces deterministic output for identical inputs.
///
/// # Errors
///
/// Returns an `io::Error` if file creation or writing fails.
pub fn export_csv(rows: &[TelemetryRow], path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    write_csv(rows, io::BufWriter::new(file))
}

/// Writes telemetry rows as CSV to any writer.
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_csv(rows: &[TelemetryRow], writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);

    wtr.write_record(HEADER.split(',').map(str::trim))?;

    for r in rows {
        wtr.write_record(&[
            format!("{:.1}", r.time_ms as f64 / 1000.0),
            r.cycle.to_string(),
            r.feeder_id.clone(),
            format!("{:.2}", r.target_kw),
            format!("{:.2}", r.current_kw),
            format!("{:.2}", r.load_pct),
            r.status.to_string(),
            r.active_ders.to_string(),
            format!("{:.2}", r.der_contribution_kw),
            r.pending.to_string(),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}
