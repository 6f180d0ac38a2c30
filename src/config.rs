// src/config.rs
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::instruments::discovery::DiscoveryConfig;
use crate::instruments::link::LinkConfig;
use crate::instruments::sim::SimulationConfig;
use crate::sweep::{
    FrequencyPlan, FrequencyWindowPolicy, LevelBand, LevelSearchEngine, LinearSweep, SearchThresholds,
    SelectionPolicy, SensitivityModel, SweepError, SweepOrchestrator, WindowProfile, DEFAULT_SLOPE_V_PER_DB,
};
use crate::types::{ConnectionMode, SweepMode};

/// Identity of the unit under test, folded into every output file name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentLabel {
    pub unit: String,
    pub with_resistors: bool,
    pub with_screen: bool,
    pub firmware: String,
}

impl ExperimentLabel {
    pub fn name(&self) -> String {
        fn presence(flag: bool) -> &'static str {
            if flag {
                "with"
            } else {
                "without"
            }
        }
        format!(
            "REM-{}_{}_resistors_{}_screen_{}",
            self.unit.trim(),
            presence(self.with_resistors),
            presence(self.with_screen),
            self.firmware.trim()
        )
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Used verbatim when set.
    pub name: Option<String>,
    pub label: Option<ExperimentLabel>,
}

impl ExperimentConfig {
    pub fn file_stem(&self) -> String {
        match (&self.name, &self.label) {
            (Some(name), _) if !name.trim().is_empty() => name.trim().to_owned(),
            (_, Some(label)) => label.name(),
            _ => "sweep".to_owned(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FrequencyConfig {
    pub start_mhz: f64,
    /// Excluded from the grid.
    pub stop_mhz: f64,
    pub step_mhz: f64,
    pub center_mhz: f64,
}

impl Default for FrequencyConfig {
    fn default() -> Self {
        Self {
            start_mhz: 1120.0,
            stop_mhz: 1220.0,
            step_mhz: 1.0,
            center_mhz: 1160.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExplicitTables {
    pub min: Vec<LevelBand>,
    pub max: Vec<LevelBand>,
}

/// Either explicit tables or a notch laid out around the center frequency.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub profile: WindowProfile,
    pub tables: Option<ExplicitTables>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub db_step: i32,
    pub thresholds: SearchThresholds,
    pub policy: SelectionPolicy,
    pub settle_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            db_step: 10,
            thresholds: SearchThresholds::default(),
            policy: SelectionPolicy::default(),
            settle_ms: 300,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SensitivityConfig {
    pub slope_v_per_db: f64,
}

impl Default for SensitivityConfig {
    fn default() -> Self {
        Self {
            slope_v_per_db: DEFAULT_SLOPE_V_PER_DB,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearConfig {
    pub level_db: i32,
    pub passes: u32,
    pub settle_ms: u64,
}

impl Default for LinearConfig {
    fn default() -> Self {
        Self {
            level_db: -70,
            passes: 1,
            settle_ms: 300,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Probed with `discovery` when unset.
    pub link: Option<LinkConfig>,
    pub discovery: DiscoveryConfig,
    pub idn_match: String,
    pub initial_level_db: i32,
    pub factory_reset: bool,
    pub timeout_ms: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            link: None,
            discovery: DiscoveryConfig::default(),
            idn_match: "Rigol".to_owned(),
            initial_level_db: -70,
            factory_reset: true,
            timeout_ms: 2000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OscilloscopeConfig {
    pub link: LinkConfig,
    pub reset: bool,
    pub timeout_ms: u64,
}

impl Default for OscilloscopeConfig {
    fn default() -> Self {
        Self {
            link: LinkConfig::Tcp {
                host: "192.168.1.72".to_owned(),
                port: 3000,
            },
            reset: true,
            timeout_ms: 2000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub data_dir: PathBuf,
    pub images_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            images_dir: PathBuf::from("images"),
            log_dir: PathBuf::from("logs"),
        }
    }
}

/// Where a loaded configuration came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    /// The path did not exist.
    Defaults(PathBuf),
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::File(path) => write!(f, "Loaded config from {}", path.display()),
            ConfigSource::Defaults(path) => write!(f, "No config at {}; using defaults", path.display()),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub experiment: ExperimentConfig,
    pub connection: ConnectionMode,
    pub mode: SweepMode,
    pub frequency: FrequencyConfig,
    pub window: WindowConfig,
    pub search: SearchConfig,
    pub sensitivity: SensitivityConfig,
    pub linear: LinearConfig,
    pub generator: GeneratorConfig,
    pub oscilloscope: OscilloscopeConfig,
    pub output: OutputConfig,
    pub simulation: SimulationConfig,
}

impl RunConfig {
    /// Reads `path`; a missing file yields the defaults. Runs before the
    /// logger exists, so the caller logs the returned source.
    pub fn load(path: &Path) -> Result<(Self, ConfigSource)> {
        if !path.exists() {
            return Ok((Self::default(), ConfigSource::Defaults(path.to_path_buf())));
        }
        let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config: Self =
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        Ok((config, ConfigSource::File(path.to_path_buf())))
    }

    pub fn validate(&self) -> Result<(), SweepError> {
        let f = &self.frequency;
        if !(f.step_mhz > 0.0) {
            return Err(config_error(format!("frequency step must be positive, got {}", f.step_mhz)));
        }
        if !(f.start_mhz < f.stop_mhz) {
            return Err(config_error(format!(
                "frequency span is empty or inverted: {} to {} MHz",
                f.start_mhz, f.stop_mhz
            )));
        }
        if !(f.start_mhz <= f.center_mhz && f.center_mhz <= f.stop_mhz) {
            return Err(config_error(format!(
                "center {} MHz lies outside {} to {} MHz",
                f.center_mhz, f.start_mhz, f.stop_mhz
            )));
        }
        if self.search.db_step <= 0 {
            return Err(config_error(format!("db_step must be positive, got {}", self.search.db_step)));
        }
        let t = &self.search.thresholds;
        if !(t.deviation_growth > 0.0) {
            return Err(config_error(format!(
                "deviation_growth must be positive, got {}",
                t.deviation_growth
            )));
        }
        if !(t.low_voltage_floor < t.target_voltage) {
            return Err(config_error(format!(
                "low_voltage_floor {} must be below target_voltage {}",
                t.low_voltage_floor, t.target_voltage
            )));
        }
        if !(self.sensitivity.slope_v_per_db > 0.0) {
            return Err(config_error(format!(
                "slope_v_per_db must be positive, got {}",
                self.sensitivity.slope_v_per_db
            )));
        }
        if self.linear.passes == 0 {
            return Err(config_error("linear sweep needs at least one pass".to_owned()));
        }
        let p = &self.window.profile;
        if self.window.tables.is_none() && !(0.0 < p.inner_offset_mhz && p.inner_offset_mhz <= p.outer_offset_mhz) {
            return Err(config_error(format!(
                "window offsets must satisfy 0 < inner ({}) <= outer ({})",
                p.inner_offset_mhz, p.outer_offset_mhz
            )));
        }
        let (notch_lo, notch_hi) = (f.center_mhz - p.outer_offset_mhz, f.center_mhz + p.outer_offset_mhz);
        if self.window.tables.is_none() && !(f.start_mhz <= notch_lo && notch_hi <= f.stop_mhz) {
            return Err(config_error(format!(
                "notch [{notch_lo}, {notch_hi}] MHz does not fit inside [{}, {}] MHz",
                f.start_mhz, f.stop_mhz
            )));
        }
        Ok(())
    }

    pub fn plan(&self) -> Result<FrequencyPlan, SweepError> {
        let f = &self.frequency;
        FrequencyPlan::new(f.start_mhz, f.stop_mhz, f.step_mhz, f.center_mhz)
    }

    pub fn window_policy(&self) -> Result<FrequencyWindowPolicy, SweepError> {
        match &self.window.tables {
            Some(tables) => FrequencyWindowPolicy::from_tables(tables.min.clone(), tables.max.clone()),
            None => FrequencyWindowPolicy::around_center(
                self.frequency.start_mhz,
                self.frequency.stop_mhz,
                self.frequency.center_mhz,
                &self.window.profile,
            ),
        }
    }

    pub fn orchestrator(&self) -> Result<SweepOrchestrator, SweepError> {
        let engine = LevelSearchEngine::new(self.search.db_step, self.search.thresholds, self.search.policy)
            .with_settle(Duration::from_millis(self.search.settle_ms));
        Ok(SweepOrchestrator::new(
            self.plan()?,
            self.window_policy()?,
            engine,
            SensitivityModel::new(self.sensitivity.slope_v_per_db),
        ))
    }

    pub fn linear_sweep(&self) -> Result<LinearSweep, SweepError> {
        Ok(LinearSweep::new(
            self.plan()?,
            self.linear.level_db,
            self.linear.passes,
            self.sensitivity.slope_v_per_db,
        )
        .with_settle(Duration::from_millis(self.linear.settle_ms)))
    }
}

fn config_error(message: String) -> SweepError {
    log::error!("Invalid configuration: {message}");
    SweepError::Config(message)
}
