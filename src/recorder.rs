use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::sweep::SweepError;
use crate::types::SweepPoint;

pub const CSV_HEADER: &str = "frequency_mhz,level_db,voltage_v,peak_to_peak_v,sensitivity_db";

/// Append-as-measured CSV writer. Every row is flushed before `write_point`
/// returns, so an interrupted sweep keeps everything recorded so far.
pub struct DataRecorder {
    writer: BufWriter<File>,
    path: PathBuf,
    rows: usize,
}

impl DataRecorder {
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, SweepError> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let mut writer = BufWriter::new(File::create(&path)?);
        writeln!(writer, "{CSV_HEADER}")?;
        writer.flush()?;
        log::info!("Recording sweep rows to {}", path.display());
        Ok(Self {
            writer,
            path,
            rows: 0,
        })
    }

    pub fn write_point(&mut self, point: &SweepPoint) -> Result<(), SweepError> {
        // `{}` on f64 prints the shortest text that parses back to the same value.
        writeln!(
            self.writer,
            "{},{},{},{},{}",
            point.frequency_mhz, point.level_db, point.voltage_v, point.peak_to_peak_v, point.sensitivity_db
        )?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> usize {
        self.rows
    }
}

/// Reads back a file written by [`DataRecorder`].
pub fn read_points(path: &Path) -> Result<Vec<SweepPoint>, SweepError> {
    let reader = BufReader::new(File::open(path)?);
    let mut points = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if index == 0 || line.trim().is_empty() {
            continue;
        }
        points.push(parse_row(&line).ok_or_else(|| {
            SweepError::Config(format!("{}:{}: malformed row '{line}'", path.display(), index + 1))
        })?);
    }
    Ok(points)
}

fn parse_row(line: &str) -> Option<SweepPoint> {
    let mut fields = line.split(',').map(str::trim);
    let point = SweepPoint {
        frequency_mhz: fields.next()?.parse().ok()?,
        level_db: fields.next()?.parse().ok()?,
        voltage_v: fields.next()?.parse().ok()?,
        peak_to_peak_v: fields.next()?.parse().ok()?,
        sensitivity_db: fields.next()?.parse().ok()?,
    };
    if fields.next().is_some() {
        return None;
    }
    Some(point)
}
