use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::instruments::InstrumentError;

const READ_CHUNK: usize = 1024;
const MAX_RESPONSE: usize = 64 * 1024;

/// Where an instrument is reachable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LinkConfig {
    Tcp { host: String, port: u16 },
    Serial { path: String, baud_rate: u32 },
}

impl std::fmt::Display for LinkConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkConfig::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
            LinkConfig::Serial { path, baud_rate } => write!(f, "serial://{path}@{baud_rate}"),
        }
    }
}

trait Transport: Read + Write + Send {}
impl<T: Read + Write + Send> Transport for T {}

/// Line-oriented SCPI request/response channel over TCP or a serial port.
pub struct ScpiLink {
    label: String,
    io: Box<dyn Transport>,
}

impl ScpiLink {
    pub fn open(config: &LinkConfig, timeout: Duration) -> Result<Self, InstrumentError> {
        match config {
            LinkConfig::Tcp { host, port } => Self::open_tcp(host, *port, timeout),
            LinkConfig::Serial { path, baud_rate } => Self::open_serial(path, *baud_rate, timeout),
        }
    }

    pub fn open_tcp(host: &str, port: u16, timeout: Duration) -> Result<Self, InstrumentError> {
        let addr = resolve(host, port)?;
        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        stream.set_nodelay(true)?;
        Ok(Self {
            label: format!("tcp://{addr}"),
            io: Box::new(stream),
        })
    }

    pub fn open_serial(path: &str, baud_rate: u32, timeout: Duration) -> Result<Self, InstrumentError> {
        let port = serialport::new(path, baud_rate).timeout(timeout).open()?;
        Ok(Self {
            label: format!("serial://{path}"),
            io: Box::new(port),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn write_line(&mut self, command: &str) -> Result<(), InstrumentError> {
        log::debug!("{} <- {}", self.label, command);
        self.io.write_all(command.as_bytes())?;
        self.io.write_all(b"\n")?;
        self.io.flush()?;
        Ok(())
    }

    /// Reads one response, stopping at a newline. A read timeout ends the
    /// response early; an empty vector means the instrument said nothing.
    pub fn read_response(&mut self) -> Result<Vec<u8>, InstrumentError> {
        let mut response = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.io.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    response.extend_from_slice(&chunk[..n]);
                    if response.ends_with(b"\n") || response.len() >= MAX_RESPONSE {
                        break;
                    }
                }
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        log::debug!("{} -> {} bytes", self.label, response.len());
        Ok(response)
    }

    pub fn query(&mut self, command: &str) -> Result<String, InstrumentError> {
        self.write_line(command)?;
        let raw = self.read_response()?;
        Ok(String::from_utf8_lossy(&raw).trim().to_owned())
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, InstrumentError> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| InstrumentError::Protocol(format!("cannot resolve {host}:{port}")))
}
