//! Deterministic stand-ins for the bench instruments, used by the sweep tests.
use std::collections::VecDeque;

use crate::instruments::{Generator, InstrumentError, Oscilloscope, ScopeReading};

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Level(i32),
    Frequency(f64),
    OutputOn,
    OutputOff,
    Disconnect,
}

/// Generator that only remembers what it was told to do.
#[derive(Default)]
pub struct RecordingGenerator {
    pub commands: Vec<Command>,
}

impl RecordingGenerator {
    pub fn levels(&self) -> Vec<i32> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                Command::Level(db) => Some(*db),
                _ => None,
            })
            .collect()
    }

    pub fn output_enabled(&self) -> bool {
        self.commands.iter().fold(false, |on, c| match c {
            Command::OutputOn => true,
            Command::OutputOff | Command::Disconnect => false,
            _ => on,
        })
    }
}

impl Generator for RecordingGenerator {
    fn set_level(&mut self, level_db: i32) -> Result<(), InstrumentError> {
        self.commands.push(Command::Level(level_db));
        Ok(())
    }

    fn set_frequency(&mut self, frequency_mhz: f64) -> Result<(), InstrumentError> {
        self.commands.push(Command::Frequency(frequency_mhz));
        Ok(())
    }

    fn output_on(&mut self) -> Result<(), InstrumentError> {
        self.commands.push(Command::OutputOn);
        Ok(())
    }

    fn output_off(&mut self) -> Result<(), InstrumentError> {
        self.commands.push(Command::OutputOff);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), InstrumentError> {
        self.commands.push(Command::Disconnect);
        Ok(())
    }
}

/// Oscilloscope that replays a fixed script of readings; `None` entries are
/// dropouts. Once the script runs out every read is a dropout.
pub struct ScriptedOscilloscope {
    script: VecDeque<Option<ScopeReading>>,
    pub reads: usize,
    pub disconnected: bool,
}

impl ScriptedOscilloscope {
    pub fn new(script: impl IntoIterator<Item = Option<ScopeReading>>) -> Self {
        Self {
            script: script.into_iter().collect(),
            reads: 0,
            disconnected: false,
        }
    }

    /// Script of plain voltages, peak-to-peak set to twice the average.
    pub fn from_voltages(voltages: &[f64]) -> Self {
        Self::new(voltages.iter().map(|&v| Some(reading(v))))
    }
}

pub fn reading(average_v: f64) -> ScopeReading {
    ScopeReading {
        average_v,
        peak_to_peak_v: average_v * 2.0,
    }
}

impl Oscilloscope for ScriptedOscilloscope {
    fn read_all(&mut self) -> Result<Option<ScopeReading>, InstrumentError> {
        self.reads += 1;
        Ok(self.script.pop_front().flatten())
    }

    fn disconnect(&mut self) -> Result<(), InstrumentError> {
        self.disconnected = true;
        Ok(())
    }
}
