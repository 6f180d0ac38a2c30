use std::sync::{Arc, Mutex, MutexGuard};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::instruments::{Generator, InstrumentError, Oscilloscope, ScopeReading};

/// Shape of the simulated receiver under test.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Follows the run's center frequency when the bench is opened.
    #[serde(skip)]
    pub center_mhz: f64,
    /// Drive level where the response peaks away from the notch.
    pub knee_db: f64,
    /// Extra drive the notch needs at its deepest point.
    pub notch_depth_db: f64,
    pub notch_width_mhz: f64,
    /// Level span that sets the width of the response curve.
    pub rise_db: f64,
    pub peak_v: f64,
    pub noise_v: f64,
    pub dropout_probability: f64,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            center_mhz: 1160.0,
            knee_db: -5.0,
            notch_depth_db: 50.0,
            notch_width_mhz: 4.0,
            rise_db: 25.0,
            peak_v: 1.05,
            noise_v: 0.005,
            dropout_probability: 0.02,
            seed: 7,
        }
    }
}

struct BenchState {
    config: SimulationConfig,
    rng: StdRng,
    level_db: i32,
    frequency_mhz: f64,
    output_on: bool,
}

impl BenchState {
    fn knee(&self) -> f64 {
        let offset = (self.frequency_mhz - self.config.center_mhz) / self.config.notch_width_mhz;
        self.config.knee_db - self.config.notch_depth_db * (-offset * offset).exp()
    }

    /// Climbs gently towards the peak at the knee, then collapses quickly
    /// once the receiver is driven past it.
    fn ideal_voltage(&self) -> f64 {
        if !self.output_on {
            return 0.0;
        }
        let x = (self.level_db as f64 - self.knee()) / self.config.rise_db;
        let curvature = if x <= 0.0 { 0.2 } else { 1.5 };
        (self.config.peak_v * (1.0 - curvature * x * x)).max(0.0)
    }
}

/// A generator/oscilloscope pair wired to one simulated receiver.
#[derive(Clone)]
pub struct SimulatedBench {
    state: Arc<Mutex<BenchState>>,
}

impl SimulatedBench {
    pub fn new(config: SimulationConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            state: Arc::new(Mutex::new(BenchState {
                frequency_mhz: config.center_mhz,
                config,
                rng,
                level_db: -70,
                output_on: false,
            })),
        }
    }

    pub fn generator(&self) -> SimulatedGenerator {
        SimulatedGenerator { bench: self.clone() }
    }

    pub fn oscilloscope(&self) -> SimulatedOscilloscope {
        SimulatedOscilloscope { bench: self.clone() }
    }

    fn lock(&self) -> Result<MutexGuard<'_, BenchState>, InstrumentError> {
        self.state
            .lock()
            .map_err(|_| InstrumentError::Protocol("simulated bench state poisoned".into()))
    }
}

pub struct SimulatedGenerator {
    bench: SimulatedBench,
}

impl Generator for SimulatedGenerator {
    fn set_level(&mut self, level_db: i32) -> Result<(), InstrumentError> {
        self.bench.lock()?.level_db = level_db;
        Ok(())
    }

    fn set_frequency(&mut self, frequency_mhz: f64) -> Result<(), InstrumentError> {
        self.bench.lock()?.frequency_mhz = frequency_mhz;
        Ok(())
    }

    fn output_on(&mut self) -> Result<(), InstrumentError> {
        self.bench.lock()?.output_on = true;
        log::info!("Simulated RF output on");
        Ok(())
    }

    fn output_off(&mut self) -> Result<(), InstrumentError> {
        self.bench.lock()?.output_on = false;
        log::info!("Simulated RF output off");
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), InstrumentError> {
        self.output_off()
    }
}

pub struct SimulatedOscilloscope {
    bench: SimulatedBench,
}

impl Oscilloscope for SimulatedOscilloscope {
    fn read_all(&mut self) -> Result<Option<ScopeReading>, InstrumentError> {
        let mut state = self.bench.lock()?;
        let dropout = state.config.dropout_probability.clamp(0.0, 1.0);
        if state.rng.gen_bool(dropout) {
            return Ok(None);
        }
        let ideal = state.ideal_voltage();
        let noise_v = state.config.noise_v;
        let noise = if noise_v > 0.0 {
            state.rng.gen_range(-noise_v..noise_v)
        } else {
            0.0
        };
        let average_v = (ideal + noise).max(0.0);
        Ok(Some(ScopeReading {
            average_v,
            peak_to_peak_v: average_v * 1.9 + noise.abs(),
        }))
    }

    fn disconnect(&mut self) -> Result<(), InstrumentError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet() -> SimulationConfig {
        SimulationConfig {
            noise_v: 0.0,
            dropout_probability: 0.0,
            ..SimulationConfig::default()
        }
    }

    fn read_at(bench: &SimulatedBench, frequency_mhz: f64, level_db: i32) -> f64 {
        let mut generator = bench.generator();
        let mut scope = bench.oscilloscope();
        generator.output_on().unwrap();
        generator.set_frequency(frequency_mhz).unwrap();
        generator.set_level(level_db).unwrap();
        scope.read_all().unwrap().unwrap().average_v
    }

    #[test]
    fn response_rises_then_degrades() {
        let bench = SimulatedBench::new(quiet());
        let low = read_at(&bench, 1130.0, -30);
        let knee = read_at(&bench, 1130.0, -5);
        let high = read_at(&bench, 1130.0, 15);
        assert!(low < knee);
        assert!(high < knee);
        assert!((knee - 1.05).abs() < 1e-3);
    }

    #[test]
    fn notch_needs_more_drive() {
        let bench = SimulatedBench::new(quiet());
        let flank = read_at(&bench, 1130.0, -50);
        let notch = read_at(&bench, 1160.0, -50);
        assert!(notch > flank);
    }

    #[test]
    fn output_off_reads_zero() {
        let bench = SimulatedBench::new(quiet());
        let mut scope = bench.oscilloscope();
        assert_eq!(scope.read_all().unwrap().unwrap().average_v, 0.0);
    }
}
