use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::recorder::DataRecorder;
use crate::sweep::export::write_workbook;
use crate::sweep::plot::{
    sensitivity_curve, voltage_curve, write_curve_png, PlotStyle, SENSITIVITY_LABELS, VOLTAGE_LABELS,
};
use crate::sweep::SweepError;
use crate::types::{SweepPoint, SweepRun};

/// Where a run's rows end up.
pub trait DataSink {
    /// Persists one row as soon as it is measured.
    fn record(&mut self, point: &SweepPoint) -> Result<(), SweepError>;
    /// Produces the end-of-run artefacts.
    fn finalize(&mut self, run: &SweepRun) -> Result<(), SweepError>;
}

/// Receives the sensitivity curve point by point while the sweep runs.
pub trait LiveCurve {
    fn push(&mut self, frequency_mhz: f64, sensitivity_db: f64) -> Result<(), SweepError>;
}

/// File names of one run, stamped with the start time.
#[derive(Clone, Debug)]
pub struct RunPaths {
    pub csv: PathBuf,
    pub xlsx: PathBuf,
    pub voltage_png: PathBuf,
    pub sensitivity_png: PathBuf,
    pub live_png: PathBuf,
}

impl RunPaths {
    pub fn new(data_dir: &Path, images_dir: &Path, experiment: &str) -> Self {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self::with_stem(data_dir, images_dir, &format!("{experiment}_{stamp}"))
    }

    pub fn with_stem(data_dir: &Path, images_dir: &Path, stem: &str) -> Self {
        Self {
            csv: data_dir.join(format!("{stem}.csv")),
            xlsx: data_dir.join(format!("{stem}.xlsx")),
            voltage_png: images_dir.join(format!("{stem}_FV.png")),
            sensitivity_png: images_dir.join(format!("{stem}_FL.png")),
            live_png: images_dir.join(format!("{stem}_live.png")),
        }
    }
}

/// End-of-run artefacts: both curves as PNG and the rows as a workbook.
pub fn write_reports(paths: &RunPaths, points: &[SweepPoint], style: &PlotStyle) -> Result<(), SweepError> {
    write_curve_png(&paths.voltage_png, &voltage_curve(points), VOLTAGE_LABELS, style)?;
    write_curve_png(&paths.sensitivity_png, &sensitivity_curve(points), SENSITIVITY_LABELS, style)?;
    log::info!(
        "Plots saved to {} and {}",
        paths.voltage_png.display(),
        paths.sensitivity_png.display()
    );
    write_workbook(&paths.xlsx, points)
}

/// Re-renders the sensitivity curve to a PNG after every point.
pub struct PngLiveCurve {
    path: PathBuf,
    style: PlotStyle,
    curve: Vec<(f64, f64)>,
}

impl PngLiveCurve {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            style: PlotStyle {
                width: 800,
                height: 400,
                ..PlotStyle::default()
            },
            curve: Vec::new(),
        }
    }
}

impl LiveCurve for PngLiveCurve {
    fn push(&mut self, frequency_mhz: f64, sensitivity_db: f64) -> Result<(), SweepError> {
        self.curve.push((frequency_mhz, sensitivity_db));
        write_curve_png(&self.path, &self.curve, SENSITIVITY_LABELS, &self.style)
    }
}

/// CSV rows as they arrive, a live curve, and plots plus a workbook at the end.
pub struct FileSink {
    paths: RunPaths,
    recorder: DataRecorder,
    live: Box<dyn LiveCurve + Send>,
    style: PlotStyle,
}

impl FileSink {
    pub fn create(paths: RunPaths, live: Box<dyn LiveCurve + Send>) -> Result<Self, SweepError> {
        let recorder = DataRecorder::create(&paths.csv)?;
        Ok(Self {
            paths,
            recorder,
            live,
            style: PlotStyle::default(),
        })
    }

    pub fn paths(&self) -> &RunPaths {
        &self.paths
    }
}

impl DataSink for FileSink {
    fn record(&mut self, point: &SweepPoint) -> Result<(), SweepError> {
        self.recorder.write_point(point)?;
        // A broken live view must not lose the measurement.
        if let Err(e) = self.live.push(point.frequency_mhz, point.sensitivity_db) {
            log::warn!("Live curve update failed: {e}");
        }
        Ok(())
    }

    fn finalize(&mut self, run: &SweepRun) -> Result<(), SweepError> {
        if run.points.is_empty() {
            log::warn!("No rows recorded; skipping plots and spreadsheet");
            return Ok(());
        }
        write_reports(&self.paths, &run.points, &self.style)?;
        log::info!("{} rows written to {}", self.recorder.rows(), self.recorder.path().display());
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::read_points;

    #[test]
    fn file_sink_writes_every_artefact() {
        let root = std::env::temp_dir().join(format!("sensitivity-sweep-sink-{}", std::process::id()));
        let paths = RunPaths::with_stem(&root.join("data"), &root.join("images"), "unit");
        let live = Box::new(PngLiveCurve::new(paths.live_png.clone()));
        let mut sink = FileSink::create(paths.clone(), live).unwrap();
        let points: Vec<SweepPoint> = (0..3)
            .map(|i| SweepPoint {
                frequency_mhz: 1120.0 + i as f64,
                level_db: -10,
                voltage_v: 0.95 + 0.01 * i as f64,
                peak_to_peak_v: 1.9,
                sensitivity_db: -10.0 + i as f64,
            })
            .collect();
        for point in &points {
            sink.record(point).unwrap();
        }
        assert!(paths.live_png.exists());
        assert_eq!(read_points(&paths.csv).unwrap(), points);

        let run = SweepRun {
            center_voltage_v: 0.95,
            points,
            completed: true,
        };
        sink.finalize(&run).unwrap();
        assert!(paths.voltage_png.exists());
        assert!(paths.sensitivity_png.exists());
        assert!(paths.xlsx.exists());
    }

    #[test]
    fn run_paths_share_one_stem() {
        let paths = RunPaths::with_stem(Path::new("data"), Path::new("images"), "exp_1");
        assert_eq!(paths.csv, Path::new("data/exp_1.csv"));
        assert_eq!(paths.sensitivity_png, Path::new("images/exp_1_FL.png"));
        assert_eq!(paths.voltage_png, Path::new("images/exp_1_FV.png"));
    }
}
