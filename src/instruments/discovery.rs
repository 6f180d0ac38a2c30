use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::instruments::{InstrumentError, ScpiLink};

/// Address range probed when an instrument address is not configured.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub subnet_prefix: String,
    pub first_host: u8,
    pub last_host: u8,
    pub port: u16,
    pub probe_timeout_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            subnet_prefix: "192.168.1".to_owned(),
            first_host: 100,
            last_host: 254,
            port: 5555,
            probe_timeout_ms: 200,
        }
    }
}

impl DiscoveryConfig {
    pub fn candidates(&self) -> impl Iterator<Item = String> + '_ {
        (self.first_host..=self.last_host).map(move |host| format!("{}.{host}", self.subnet_prefix))
    }
}

/// Probes every candidate host with `*IDN?` and returns the first one whose
/// identity string contains `idn_match`.
pub fn scan(config: &DiscoveryConfig, idn_match: &str) -> Result<String, InstrumentError> {
    let timeout = Duration::from_millis(config.probe_timeout_ms);
    for host in config.candidates() {
        let Ok(mut link) = ScpiLink::open_tcp(&host, config.port, timeout) else {
            continue;
        };
        match link.query("*IDN?") {
            Ok(idn) if idn.contains(idn_match) => {
                log::info!("Found '{idn_match}' at {host}: {idn}");
                return Ok(host);
            }
            Ok(idn) => log::debug!("{host} is not '{idn_match}': {idn}"),
            Err(e) => log::debug!("{host} did not answer *IDN?: {e}"),
        }
    }
    Err(InstrumentError::NotFound(idn_match.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn candidates_cover_inclusive_range() {
        let config = DiscoveryConfig {
            subnet_prefix: "10.0.0".into(),
            first_host: 1,
            last_host: 3,
            ..DiscoveryConfig::default()
        };
        let hosts: Vec<String> = config.candidates().collect();
        assert_eq!(hosts, vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
    }

    #[test]
    fn scan_finds_matching_identity_on_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            let mut out = stream;
            out.write_all(b"Rigol Technologies,DSG815\n").unwrap();
        });
        let config = DiscoveryConfig {
            subnet_prefix: "127.0.0".into(),
            first_host: 1,
            last_host: 1,
            port,
            probe_timeout_ms: 1000,
        };
        assert_eq!(scan(&config, "Rigol").unwrap(), "127.0.0.1");
        server.join().unwrap();
    }
}
