use std::thread;
use std::time::Duration;

use serde_json::Value;

use crate::instruments::{parse_voltage, InstrumentError, Oscilloscope, ScopeReading, ScpiLink};

const MEASURE_QUERY: &str = ":MEASUrement:CH1?";
const RESET_SETTLE: Duration = Duration::from_secs(2);

/// AKIP-4122 oscilloscope, measurement channel 1.
pub struct Akip4122 {
    link: ScpiLink,
    connected: bool,
}

impl Akip4122 {
    pub fn connect(mut link: ScpiLink, reset: bool) -> Result<Self, InstrumentError> {
        let idn = link.query("*IDN?")?;
        if idn.is_empty() {
            return Err(InstrumentError::Protocol(format!(
                "oscilloscope at {} did not answer *IDN?",
                link.label()
            )));
        }
        log::info!("Oscilloscope connected on {}: {}", link.label(), idn);
        let mut scope = Self {
            link,
            connected: true,
        };
        if reset {
            scope.reset()?;
        }
        Ok(scope)
    }

    /// Restores instrument defaults and clears the event registers and error queue.
    pub fn reset(&mut self) -> Result<(), InstrumentError> {
        self.link.write_line("*RST")?;
        self.link.write_line("*CLS")?;
        thread::sleep(RESET_SETTLE);
        log::info!("Oscilloscope reset to defaults");
        Ok(())
    }
}

impl Oscilloscope for Akip4122 {
    fn read_all(&mut self) -> Result<Option<ScopeReading>, InstrumentError> {
        self.link.write_line(MEASURE_QUERY)?;
        let raw = self.link.read_response()?;
        Ok(decode_measurement(&raw))
    }

    fn disconnect(&mut self) -> Result<(), InstrumentError> {
        if self.connected {
            self.connected = false;
            log::info!("Oscilloscope link {} closed", self.link.label());
        }
        Ok(())
    }
}

/// Decodes a `:MEASUrement:CH1?` reply: a binary preamble followed by a JSON
/// object whose `CH1` entry carries `AVERage` and `PKPK` strings.
pub fn decode_measurement(raw: &[u8]) -> Option<ScopeReading> {
    if raw.is_empty() {
        log::error!("Empty measurement reply from oscilloscope");
        return None;
    }
    // The preamble is not valid UTF-8, so map bytes through latin-1.
    let text: String = raw.iter().map(|&b| b as char).collect();
    let Some(start) = text.find('{') else {
        log::error!("Measurement reply has no JSON body: {:?}", text.trim());
        return None;
    };
    let body: Value = match serde_json::from_str(text[start..].trim()) {
        Ok(body) => body,
        Err(e) => {
            log::error!("Malformed measurement JSON: {e}");
            return None;
        }
    };
    let channel = &body["CH1"];
    let average = channel["AVERage"].as_str().and_then(parse_voltage);
    let peak_to_peak = channel["PKPK"].as_str().and_then(parse_voltage);
    match (average, peak_to_peak) {
        (Some(average_v), Some(peak_to_peak_v)) => Some(ScopeReading {
            average_v,
            peak_to_peak_v,
        }),
        _ => {
            log::error!(
                "Unusable voltage fields: AVERage={} PKPK={}",
                channel["AVERage"],
                channel["PKPK"]
            );
            None
        }
    }
}
