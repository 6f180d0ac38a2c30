// src/types.rs
use serde::{Deserialize, Serialize};

/// Which bench the engine drives.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    #[default]
    Simulation,
    Hardware,
}

/// Which measurement a run performs.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepMode {
    /// Adaptive level search at every frequency.
    #[default]
    Search,
    /// One fixed level across the whole span.
    Linear,
}

/// One oscilloscope reading at one (frequency, level) pair.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeasurementSample {
    pub level_db: i32,
    pub voltage_v: f64,
    pub peak_to_peak_v: f64,
}

/// One persisted output row.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SweepPoint {
    pub frequency_mhz: f64,
    pub level_db: i32,
    pub voltage_v: f64,
    pub peak_to_peak_v: f64,
    pub sensitivity_db: f64,
}

/// Rows of one execution plus the reference voltage they were computed against.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SweepRun {
    pub center_voltage_v: f64,
    pub points: Vec<SweepPoint>,
    pub completed: bool,
}

// Commands the GUI sends to the engine thread
#[derive(Clone, Debug)]
pub enum GuiCommand {
    StartSweep {
        mode: ConnectionMode,
        sweep: SweepMode,
        experiment: String,
    },
}

// Messages the engine sends back to the GUI
#[derive(Clone, Debug)]
pub enum SweepMessage {
    Log(String),
    Running(bool),
    CurvePoint {
        frequency_mhz: f64,
        sensitivity_db: f64,
    },
    Progress {
        index: usize,
        total: usize,
        remaining_secs: u64,
    },
    Finished(String),
}
