// src/sweep/mod.rs
// Measurement core: window policy, level search, sensitivity and run control.
pub mod cancel;
pub mod error;
pub mod export;
pub mod linear;
pub mod orchestrator;
pub mod plot;
pub mod search;
pub mod sensitivity;
pub mod sink;
pub mod window;

pub use cancel::CancelToken;
pub use error::SweepError;
pub use linear::LinearSweep;
pub use orchestrator::{format_hms, FrequencyPlan, ProgressObserver, SweepOrchestrator, SweepProgress};
pub use search::{LevelSearchEngine, SearchThresholds, SelectionPolicy};
pub use sensitivity::{SensitivityModel, DEFAULT_SLOPE_V_PER_DB};
pub use sink::{DataSink, FileSink, LiveCurve, RunPaths};
pub use window::{FrequencyWindowPolicy, LevelBand, WindowProfile};
