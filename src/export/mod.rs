//! CSV serialization of the finished wide table.
//!
//! The first row is the header in schema order, the first column is `time`
//! holding integer epoch seconds. Missing cells render as empty fields.

use std::io;
use std::path::Path;

use anyhow::{Context, Result};

use crate::schema::TIME_COLUMN;
use crate::table::WideTable;

/// Write the table to a CSV file at `path`.
pub fn write_file(table: &WideTable, path: &Path) -> Result<()> {
    let writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating output file {}", path.display()))?;
    write_to(table, writer)
}

/// Write the table through an already-constructed CSV writer.
pub fn write_to<W: io::Write>(table: &WideTable, mut writer: csv::Writer<W>) -> Result<()> {
    let mut header = Vec::with_capacity(table.columns().len() + 1);
    header.push(TIME_COLUMN.to_string());
    header.extend(table.columns().iter().cloned());
    writer.write_record(&header).context("writing CSV header")?;

    for ts in table.timestamps() {
        let mut record = Vec::with_capacity(header.len());
        record.push(ts.to_string());
        for column in table.columns() {
            record.push(match table.cell(ts, column) {
                Some(value) => value.to_string(),
                None => String::new(),
            });
        }
        writer.write_record(&record).context("writing CSV row")?;
    }

    writer.flush().context("flushing CSV output")?;
    Ok(())
}
