// src/instruments/mod.rs
// Capability interfaces the sweep core drives, plus the concrete adapters.
pub mod akip;
pub mod discovery;
pub mod link;
pub mod rigol;
#[cfg(test)]
pub mod scripted;
pub mod sim;

use thiserror::Error;

pub use akip::Akip4122;
pub use link::ScpiLink;
pub use rigol::RigolDsg;
pub use sim::SimulatedBench;

#[derive(Debug, Error)]
pub enum InstrumentError {
    #[error("instrument I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("unexpected instrument response: {0}")]
    Protocol(String),
    #[error("no instrument matching '{0}' found")]
    NotFound(String),
}

/// One oscilloscope measurement, already converted to volts.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScopeReading {
    pub average_v: f64,
    pub peak_to_peak_v: f64,
}

/// Signal generator as seen by the sweep.
pub trait Generator {
    fn set_level(&mut self, level_db: i32) -> Result<(), InstrumentError>;
    fn set_frequency(&mut self, frequency_mhz: f64) -> Result<(), InstrumentError>;
    fn output_on(&mut self) -> Result<(), InstrumentError>;
    fn output_off(&mut self) -> Result<(), InstrumentError>;
    /// Releases the instrument. The RF output is off afterwards.
    fn disconnect(&mut self) -> Result<(), InstrumentError>;
}

/// Oscilloscope as seen by the sweep.
///
/// `Ok(None)` means the instrument answered without usable data (a transient
/// failure the search skips over); `Err` is a broken link.
pub trait Oscilloscope {
    fn read_all(&mut self) -> Result<Option<ScopeReading>, InstrumentError>;
    fn disconnect(&mut self) -> Result<(), InstrumentError>;
}

/// Parses an instrument voltage string such as `"512mV"` or `"1.02V"` into volts.
///
/// Millivolt values are rounded to 0.1 mV. Anything else yields `None`.
pub fn parse_voltage(raw: &str) -> Option<f64> {
    let text = raw.trim();
    if let Some(mv) = text.strip_suffix("mV") {
        let value: f64 = mv.trim().parse().ok()?;
        Some((value / 1000.0 * 10_000.0).round() / 10_000.0)
    } else if let Some(v) = text.strip_suffix('V') {
        v.trim().parse().ok()
    } else {
        None
    }
}
