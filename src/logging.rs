// src/logging.rs
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use env_logger::{Builder, Env, Target};

/// Duplicates every log line into two writers.
struct Tee<A, B> {
    first: A,
    second: B,
}

impl<A: Write, B: Write> Write for Tee<A, B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.first.write_all(buf)?;
        self.second.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.first.flush()?;
        self.second.flush()
    }
}

pub fn log_file_path(log_dir: &Path, unix_secs: u64) -> PathBuf {
    log_dir.join(format!("log_{unix_secs}.log"))
}

/// Installs the global logger: `RUST_LOG` filter (default `info`), lines of
/// `LEVEL<TAB>timestamp<TAB>message` on stderr and in a per-session file.
pub fn init(log_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(log_dir).with_context(|| format!("creating {}", log_dir.display()))?;
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let path = log_file_path(log_dir, stamp);
    let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;

    Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| writeln!(buf, "{}\t{}\t{}", record.level(), buf.timestamp(), record.args()))
        .target(Target::Pipe(Box::new(Tee {
            first: io::stderr(),
            second: file,
        })))
        .try_init()
        .context("installing logger")?;
    log::info!("Logging to {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tee_writes_both_sides() {
        let mut tee = Tee {
            first: Vec::new(),
            second: Vec::new(),
        };
        write!(tee, "INFO\tnow\tcenter found").unwrap();
        tee.flush().unwrap();
        assert_eq!(tee.first, b"INFO\tnow\tcenter found");
        assert_eq!(tee.first, tee.second);
    }

    #[test]
    fn session_file_name() {
        assert_eq!(
            log_file_path(Path::new("logs"), 1_700_000_000),
            Path::new("logs/log_1700000000.log")
        );
    }
}
