use once_cell::sync::OnceCell;

use crate::sweep::SweepError;

/// Calibration slope of the generator/receiver pairing, volts per dB.
pub const DEFAULT_SLOPE_V_PER_DB: f64 = 0.0245;

/// Converts a measured voltage and the drive level that produced it into a
/// sensitivity figure relative to the center-frequency reference voltage.
///
/// The reference is written once per run and read-only afterwards.
#[derive(Debug)]
pub struct SensitivityModel {
    slope_v_per_db: f64,
    reference_v: OnceCell<f64>,
}

impl SensitivityModel {
    pub fn new(slope_v_per_db: f64) -> Self {
        Self {
            slope_v_per_db,
            reference_v: OnceCell::new(),
        }
    }

    pub fn set_reference(&self, voltage: f64) -> Result<(), SweepError> {
        self.reference_v
            .set(voltage)
            .map_err(|_| SweepError::ReferenceAlreadySet {
                existing: self.reference_v.get().copied().unwrap_or(voltage),
            })
    }

    pub fn sensitivity(&self, voltage: f64, level_db: i32) -> Result<f64, SweepError> {
        let reference = self
            .reference_v
            .get()
            .ok_or(SweepError::ReferenceNotInitialized)?;
        Ok((voltage - reference) / self.slope_v_per_db + level_db as f64)
    }
}

impl Default for SensitivityModel {
    fn default() -> Self {
        Self::new(DEFAULT_SLOPE_V_PER_DB)
    }
}
