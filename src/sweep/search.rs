//! Adaptive drive-level search at a single frequency.
//!
//! Levels are stepped upward from the window minimum. The response is expected
//! to rise towards the target voltage and then stop tracking once the receiver
//! leaves its linear region; the search stops there.
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::instruments::{Generator, Oscilloscope};
use crate::sweep::{CancelToken, FrequencyWindowPolicy, SweepError};
use crate::types::MeasurementSample;

/// Empirical constants of the stopping rule.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchThresholds {
    pub target_voltage: f64,
    /// How much further from target than the previous sample counts as overshoot.
    pub deviation_growth: f64,
    /// Readings below this are treated as off the linear region.
    pub low_voltage_floor: f64,
}

impl Default for SearchThresholds {
    fn default() -> Self {
        Self {
            target_voltage: 1.0,
            deviation_growth: 0.05,
            low_voltage_floor: 0.8,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Keep the last sample before the response overshoots.
    #[default]
    LastBeforeOvershoot,
    /// Scan until the floor or the top of the window and keep the sample
    /// closest to the target voltage.
    MinDeviation,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SearchOutcome {
    pub selected: MeasurementSample,
    /// Levels commanded, including dropouts.
    pub visited: usize,
    /// Levels whose reading was missing.
    pub skipped: usize,
}

/// Drive levels tried for a window: `lo`, `lo + step`, ... and finally `hi`,
/// clamping a partial last step.
pub fn level_plan(lo: i32, hi: i32, step: i32) -> Vec<i32> {
    let step = step.max(1);
    let mut levels = Vec::new();
    let mut level = lo;
    while level < hi {
        levels.push(level);
        level = level.saturating_add(step);
    }
    levels.push(hi);
    levels
}

#[derive(Clone, Debug)]
pub struct LevelSearchEngine {
    db_step: i32,
    thresholds: SearchThresholds,
    policy: SelectionPolicy,
    settle: Duration,
}

impl LevelSearchEngine {
    pub fn new(db_step: i32, thresholds: SearchThresholds, policy: SelectionPolicy) -> Self {
        Self {
            db_step,
            thresholds,
            policy,
            settle: Duration::ZERO,
        }
    }

    /// Delay between commanding a level and reading the scope.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn db_step(&self) -> i32 {
        self.db_step
    }

    fn deviation(&self, voltage: f64) -> f64 {
        (voltage - self.thresholds.target_voltage).abs()
    }

    fn overshoots(&self, voltage: f64, last: Option<&MeasurementSample>) -> bool {
        if voltage < self.thresholds.low_voltage_floor {
            return true;
        }
        match last {
            Some(last) => {
                self.deviation(voltage) >= self.deviation(last.voltage_v) + self.thresholds.deviation_growth
            }
            None => false,
        }
    }

    /// Finds the drive level at `frequency_mhz` whose response best tracks the
    /// target, never commanding a level outside the policy window.
    pub fn search<G, O>(
        &self,
        window: &FrequencyWindowPolicy,
        frequency_mhz: f64,
        generator: &mut G,
        scope: &mut O,
        cancel: &CancelToken,
    ) -> Result<SearchOutcome, SweepError>
    where
        G: Generator + ?Sized,
        O: Oscilloscope + ?Sized,
    {
        let (lo, hi) = window.bounds(frequency_mhz)?;
        let levels = level_plan(lo, hi, self.db_step);
        log::debug!("Searching {frequency_mhz} MHz over {lo}..={hi} dB ({} levels)", levels.len());

        let mut last: Option<MeasurementSample> = None;
        let mut collected: Vec<MeasurementSample> = Vec::new();
        let mut skipped = 0;

        for (visited, &level_db) in levels.iter().enumerate() {
            cancel.check()?;
            generator.set_level(level_db)?;
            if !self.settle.is_zero() {
                thread::sleep(self.settle);
            }
            let at_top = level_db == hi;
            let Some(reading) = scope.read_all()? else {
                log::warn!("No oscilloscope data at {frequency_mhz} MHz, {level_db} dB; level skipped");
                skipped += 1;
                if at_top {
                    let fallback = match self.policy {
                        SelectionPolicy::LastBeforeOvershoot => last,
                        SelectionPolicy::MinDeviation => self.closest(&collected),
                    };
                    return fallback
                        .map(|selected| SearchOutcome {
                            selected,
                            visited: visited + 1,
                            skipped,
                        })
                        .ok_or(SweepError::NoValidSample { frequency_mhz });
                }
                continue;
            };
            let current = MeasurementSample {
                level_db,
                voltage_v: reading.average_v,
                peak_to_peak_v: reading.peak_to_peak_v,
            };
            let outcome = |selected: MeasurementSample| SearchOutcome {
                selected,
                visited: visited + 1,
                skipped,
            };

            match self.policy {
                SelectionPolicy::LastBeforeOvershoot => {
                    if self.overshoots(current.voltage_v, last.as_ref()) {
                        let selected = last.unwrap_or(current);
                        log::debug!(
                            "Overshoot at {frequency_mhz} MHz, {level_db} dB ({} V); keeping {} dB",
                            current.voltage_v,
                            selected.level_db
                        );
                        return Ok(outcome(selected));
                    }
                    if at_top {
                        return Ok(outcome(current));
                    }
                    last = Some(current);
                }
                SelectionPolicy::MinDeviation => {
                    let below_floor = current.voltage_v < self.thresholds.low_voltage_floor;
                    if !below_floor {
                        collected.push(current);
                    }
                    if below_floor || at_top {
                        return Ok(outcome(self.closest(&collected).unwrap_or(current)));
                    }
                }
            }
        }
        // level_plan always ends at `hi`, which returns above.
        Err(SweepError::NoValidSample { frequency_mhz })
    }

    fn closest(&self, samples: &[MeasurementSample]) -> Option<MeasurementSample> {
        samples
            .iter()
            .copied()
            .min_by(|a, b| self.deviation(a.voltage_v).total_cmp(&self.deviation(b.voltage_v)))
    }
}
