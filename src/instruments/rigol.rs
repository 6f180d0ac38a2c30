use std::thread;
use std::time::Duration;

use crate::instruments::{Generator, InstrumentError, ScpiLink};

const PRESET_SETTLE: Duration = Duration::from_secs(2);

/// Rigol DSG-series RF signal generator.
pub struct RigolDsg {
    link: ScpiLink,
    connected: bool,
}

impl RigolDsg {
    /// Connects, optionally restores factory settings, then programs the
    /// initial level and frequency with the RF output off.
    pub fn connect(
        mut link: ScpiLink,
        factory_reset: bool,
        level_db: i32,
        frequency_mhz: f64,
    ) -> Result<Self, InstrumentError> {
        let idn = link.query("*IDN?")?;
        if idn.is_empty() {
            return Err(InstrumentError::Protocol(format!(
                "generator at {} did not answer *IDN?",
                link.label()
            )));
        }
        log::info!("Generator connected on {}: {}", link.label(), idn);
        let mut generator = Self {
            link,
            connected: true,
        };
        if factory_reset {
            generator.factory_reset()?;
        }
        generator.set_level(level_db)?;
        generator.set_frequency(frequency_mhz)?;
        log::info!("Generator initialised at {level_db} dB, {frequency_mhz} MHz");
        Ok(generator)
    }

    /// Wipes user state back to factory defaults and leaves the output off.
    pub fn factory_reset(&mut self) -> Result<(), InstrumentError> {
        self.link.write_line(":SYST:PRES:TYPE FACtory")?;
        thread::sleep(PRESET_SETTLE);
        log::info!("Generator reset to factory settings");
        self.output_off()
    }
}

/// Formats a frequency in MHz as the integer-kHz argument of `:FREQ`.
pub fn frequency_command(frequency_mhz: f64) -> String {
    format!(":FREQ {}KHz", (frequency_mhz * 1000.0).round() as i64)
}

impl Generator for RigolDsg {
    fn set_level(&mut self, level_db: i32) -> Result<(), InstrumentError> {
        self.link.write_line(&format!(":LEV {level_db}"))
    }

    fn set_frequency(&mut self, frequency_mhz: f64) -> Result<(), InstrumentError> {
        self.link.write_line(&frequency_command(frequency_mhz))
    }

    fn output_on(&mut self) -> Result<(), InstrumentError> {
        self.link.write_line(":OUTP ON")?;
        log::info!("Generator RF output on");
        Ok(())
    }

    fn output_off(&mut self) -> Result<(), InstrumentError> {
        self.link.write_line(":OUTP OFF")?;
        log::info!("Generator RF output off");
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), InstrumentError> {
        if self.connected {
            self.output_off()?;
            self.connected = false;
            log::info!("Generator link {} closed", self.link.label());
        }
        Ok(())
    }
}
