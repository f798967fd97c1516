//! CSV export of a month's day buckets.

use crate::activity::MonthView;
use crate::Result;
use std::path::Path;

/// A row in the CSV output
#[derive(Debug, serde::Serialize)]
struct CsvRow {
    date: String,
    sins: u32,
    prayers: u32,
    intensity: u8,
}

/// Write every day of `view` to `path`, replacing any existing file.
///
/// Returns the number of rows written.
pub fn month_to_csv(view: &MonthView, path: &Path) -> Result<usize> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = csv::WriterBuilder::new()
        .has_headers(true)
        .from_path(path)?;

    for day in &view.days {
        writer.serialize(CsvRow {
            date: day.date.format("%Y-%m-%d").to_string(),
            sins: day.sin_count,
            prayers: day.prayer_count,
            intensity: day.intensity(),
        })?;
    }
    writer.flush()?;

    tracing::info!("Exported {} days of {} to {:?}", view.days.len(), view.month, path);
    Ok(view.days.len())
}
