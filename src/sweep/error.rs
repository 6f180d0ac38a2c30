use thiserror::Error;

use crate::instruments::InstrumentError;

/// Which of the two window tables a lookup was made against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowTable {
    Min,
    Max,
}

impl std::fmt::Display for WindowTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WindowTable::Min => write!(f, "min"),
            WindowTable::Max => write!(f, "max"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("{frequency_mhz} MHz is outside every range of the {table} level table")]
    RangeLookup {
        frequency_mhz: f64,
        table: WindowTable,
    },
    #[error("empty search window at {frequency_mhz} MHz: min {min_db} dB > max {max_db} dB")]
    InvalidSearchWindow {
        frequency_mhz: f64,
        min_db: i32,
        max_db: i32,
    },
    #[error("sensitivity requested before the center-frequency reference was measured")]
    ReferenceNotInitialized,
    #[error("center-frequency reference already set to {existing} V")]
    ReferenceAlreadySet { existing: f64 },
    #[error("no valid oscilloscope reading at {frequency_mhz} MHz")]
    NoValidSample { frequency_mhz: f64 },
    #[error("sweep cancelled")]
    Cancelled,
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Instrument(#[from] InstrumentError),
    #[error("output file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to render plot: {0}")]
    Plot(String),
    #[error("spreadsheet export failed: {0}")]
    Export(#[from] rust_xlsxwriter::XlsxError),
}

impl<E: std::error::Error + Send + Sync + 'static> From<plotters::drawing::DrawingAreaErrorKind<E>>
    for SweepError
{
    fn from(value: plotters::drawing::DrawingAreaErrorKind<E>) -> Self {
        SweepError::Plot(format!("{value:?}"))
    }
}

impl From<image::ImageError> for SweepError {
    fn from(value: image::ImageError) -> Self {
        SweepError::Plot(value.to_string())
    }
}
