use std::fs;
use std::path::Path;

use rust_xlsxwriter::{Format, Workbook};

use crate::sweep::SweepError;
use crate::types::SweepPoint;

const COLUMNS: [&str; 5] = [
    "Frequency, MHz",
    "Level, dB",
    "Voltage, V",
    "Peak-to-peak, V",
    "Sensitivity, dB",
];

/// Writes the run's rows to a single-sheet workbook, same columns as the CSV.
pub fn write_workbook(path: &Path, points: &[SweepPoint]) -> Result<(), SweepError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();
    let sheet = workbook.add_worksheet();
    sheet.set_name("sweep")?;
    for (col, title) in COLUMNS.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *title, &header)?;
    }
    for (index, point) in points.iter().enumerate() {
        let row = index as u32 + 1;
        sheet.write_number(row, 0, point.frequency_mhz)?;
        sheet.write_number(row, 1, point.level_db as f64)?;
        sheet.write_number(row, 2, point.voltage_v)?;
        sheet.write_number(row, 3, point.peak_to_peak_v)?;
        sheet.write_number(row, 4, point.sensitivity_db)?;
    }
    workbook.save(path)?;
    log::info!("Spreadsheet saved to {}", path.display());
    Ok(())
}
