//! Frequency-dependent drive-level bounds.
//!
//! Each table maps ordered, non-overlapping frequency bands to a level. Bands
//! are closed intervals; neighbours may share a boundary point, in which case
//! the earlier band wins. A frequency outside every band is an error.
use serde::{Deserialize, Serialize};

use crate::sweep::error::{SweepError, WindowTable};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LevelBand {
    pub lo_mhz: f64,
    pub hi_mhz: f64,
    pub level_db: i32,
}

impl LevelBand {
    pub fn new(lo_mhz: f64, hi_mhz: f64, level_db: i32) -> Self {
        Self {
            lo_mhz,
            hi_mhz,
            level_db,
        }
    }

    pub fn contains(&self, frequency_mhz: f64) -> bool {
        self.lo_mhz <= frequency_mhz && frequency_mhz <= self.hi_mhz
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LevelTable {
    table: WindowTable,
    bands: Vec<LevelBand>,
}

impl LevelTable {
    pub fn new(table: WindowTable, bands: Vec<LevelBand>) -> Result<Self, SweepError> {
        if bands.is_empty() {
            return Err(SweepError::Config(format!("{table} level table has no bands")));
        }
        for band in &bands {
            if !(band.lo_mhz <= band.hi_mhz) {
                return Err(SweepError::Config(format!(
                    "{table} band [{}, {}] MHz is inverted",
                    band.lo_mhz, band.hi_mhz
                )));
            }
        }
        for pair in bands.windows(2) {
            if pair[1].lo_mhz < pair[0].hi_mhz {
                return Err(SweepError::Config(format!(
                    "{table} bands [{}, {}] and [{}, {}] MHz overlap or are out of order",
                    pair[0].lo_mhz, pair[0].hi_mhz, pair[1].lo_mhz, pair[1].hi_mhz
                )));
            }
        }
        Ok(Self { table, bands })
    }

    pub fn lookup(&self, frequency_mhz: f64) -> Result<i32, SweepError> {
        match self.bands.iter().find(|b| b.contains(frequency_mhz)) {
            Some(band) => Ok(band.level_db),
            None => {
                log::error!(
                    "{frequency_mhz} MHz matches no band of the {} level table",
                    self.table
                );
                Err(SweepError::RangeLookup {
                    frequency_mhz,
                    table: self.table,
                })
            }
        }
    }
}

/// Levels and offsets used to lay out the notch around the center frequency.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowProfile {
    /// Half-width of the whole suppression region.
    pub outer_offset_mhz: f64,
    /// Half-width of the deepest part of the notch.
    pub inner_offset_mhz: f64,
    pub flank_min_low_db: i32,
    pub notch_min_db: i32,
    pub flank_min_high_db: i32,
    pub flank_max_db: i32,
    pub shoulder_max_db: i32,
    pub notch_max_db: i32,
}

impl Default for WindowProfile {
    fn default() -> Self {
        Self {
            outer_offset_mhz: 8.0,
            inner_offset_mhz: 6.0,
            flank_min_low_db: -10,
            notch_min_db: -70,
            flank_min_high_db: 0,
            flank_max_db: 0,
            shoulder_max_db: -10,
            notch_max_db: -40,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FrequencyWindowPolicy {
    min: LevelTable,
    max: LevelTable,
}

impl FrequencyWindowPolicy {
    pub fn from_tables(min: Vec<LevelBand>, max: Vec<LevelBand>) -> Result<Self, SweepError> {
        Ok(Self {
            min: LevelTable::new(WindowTable::Min, min)?,
            max: LevelTable::new(WindowTable::Max, max)?,
        })
    }

    /// Builds a narrow high-attenuation window around `center_mhz` flanked by
    /// permissive windows reaching out to the sweep edges.
    pub fn around_center(
        start_mhz: f64,
        stop_mhz: f64,
        center_mhz: f64,
        profile: &WindowProfile,
    ) -> Result<Self, SweepError> {
        let outer = profile.outer_offset_mhz;
        let inner = profile.inner_offset_mhz;
        if !(0.0 < inner && inner <= outer) {
            return Err(SweepError::Config(format!(
                "window offsets must satisfy 0 < inner ({inner}) <= outer ({outer})"
            )));
        }
        if !(start_mhz <= center_mhz - outer && center_mhz + outer <= stop_mhz) {
            return Err(SweepError::Config(format!(
                "notch [{}, {}] MHz does not fit inside [{start_mhz}, {stop_mhz}] MHz",
                center_mhz - outer,
                center_mhz + outer
            )));
        }
        let min = vec![
            LevelBand::new(start_mhz, center_mhz - outer, profile.flank_min_low_db),
            LevelBand::new(center_mhz - outer, center_mhz + outer, profile.notch_min_db),
            LevelBand::new(center_mhz + outer, stop_mhz, profile.flank_min_high_db),
        ];
        let max = vec![
            LevelBand::new(start_mhz, center_mhz - outer, profile.flank_max_db),
            LevelBand::new(center_mhz - outer, center_mhz - inner, profile.shoulder_max_db),
            LevelBand::new(center_mhz - inner, center_mhz + inner, profile.notch_max_db),
            LevelBand::new(center_mhz + inner, center_mhz + outer, profile.shoulder_max_db),
            LevelBand::new(center_mhz + outer, stop_mhz, profile.flank_max_db),
        ];
        Self::from_tables(min, max)
    }

    pub fn min_level(&self, frequency_mhz: f64) -> Result<i32, SweepError> {
        self.min.lookup(frequency_mhz)
    }

    pub fn max_level(&self, frequency_mhz: f64) -> Result<i32, SweepError> {
        self.max.lookup(frequency_mhz)
    }

    /// Both bounds for one frequency; an empty window is an error.
    pub fn bounds(&self, frequency_mhz: f64) -> Result<(i32, i32), SweepError> {
        let min_db = self.min_level(frequency_mhz)?;
        let max_db = self.max_level(frequency_mhz)?;
        if min_db > max_db {
            log::error!("Empty search window at {frequency_mhz} MHz: min {min_db} dB > max {max_db} dB");
            return Err(SweepError::InvalidSearchWindow {
                frequency_mhz,
                min_db,
                max_db,
            });
        }
        Ok((min_db, max_db))
    }

    /// Checks every frequency a run will visit before anything is commanded.
    pub fn validate_span(&self, frequencies: impl IntoIterator<Item = f64>) -> Result<(), SweepError> {
        for frequency_mhz in frequencies {
            self.bounds(frequency_mhz)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notch() -> FrequencyWindowPolicy {
        FrequencyWindowPolicy::around_center(1120.0, 1220.0, 1160.0, &WindowProfile::default()).unwrap()
    }

    #[test]
    fn notch_layout_matches_profile() {
        let policy = notch();
        assert_eq!(policy.bounds(1130.0).unwrap(), (-10, 0));
        assert_eq!(policy.bounds(1153.0).unwrap(), (-70, -10));
        assert_eq!(policy.bounds(1160.0).unwrap(), (-70, -40));
        assert_eq!(policy.bounds(1167.0).unwrap(), (-70, -10));
        assert_eq!(policy.bounds(1200.0).unwrap(), (0, 0));
    }

    #[test]
    fn shared_boundary_goes_to_earlier_band() {
        let policy = notch();
        assert_eq!(policy.min_level(1152.0).unwrap(), -10);
        assert_eq!(policy.max_level(1154.0).unwrap(), -10);
        assert_eq!(policy.max_level(1166.0).unwrap(), -40);
        assert_eq!(policy.min_level(1168.0).unwrap(), -70);
    }

    #[test]
    fn outside_every_band_is_an_error() {
        let policy = notch();
        assert!(matches!(
            policy.min_level(1100.0),
            Err(SweepError::RangeLookup { table: WindowTable::Min, .. })
        ));
        assert!(matches!(
            policy.max_level(1300.0),
            Err(SweepError::RangeLookup { table: WindowTable::Max, .. })
        ));
    }

    #[test]
    fn gaps_between_integer_bands_are_reported() {
        let policy = FrequencyWindowPolicy::from_tables(
            vec![LevelBand::new(1120.0, 1152.0, -20), LevelBand::new(1153.0, 1250.0, -70)],
            vec![LevelBand::new(1120.0, 1250.0, 0)],
        )
        .unwrap();
        assert!(policy.min_level(1152.5).is_err());
        assert_eq!(policy.min_level(1153.0).unwrap(), -70);
    }

    #[test]
    fn inverted_window_is_rejected() {
        let policy = FrequencyWindowPolicy::from_tables(
            vec![LevelBand::new(1120.0, 1250.0, 0)],
            vec![LevelBand::new(1120.0, 1250.0, -10)],
        )
        .unwrap();
        assert!(matches!(
            policy.bounds(1130.0),
            Err(SweepError::InvalidSearchWindow { min_db: 0, max_db: -10, .. })
        ));
        assert!(policy.validate_span([1125.0, 1130.0]).is_err());
    }

    #[test]
    fn overlapping_bands_are_rejected() {
        let result = FrequencyWindowPolicy::from_tables(
            vec![LevelBand::new(1120.0, 1160.0, 0), LevelBand::new(1150.0, 1250.0, 0)],
            vec![LevelBand::new(1120.0, 1250.0, 0)],
        );
        assert!(matches!(result, Err(SweepError::Config(_))));
    }

    #[test]
    fn min_never_exceeds_max_across_default_span() {
        let policy = notch();
        let grid = (0..100).map(|i| 1120.0 + i as f64);
        policy.validate_span(grid).unwrap();
    }

    #[test]
    fn offsets_must_be_ordered() {
        let profile = WindowProfile {
            inner_offset_mhz: 9.0,
            ..WindowProfile::default()
        };
        assert!(FrequencyWindowPolicy::around_center(1120.0, 1220.0, 1160.0, &profile).is_err());
    }
}
