use crate::storage::Settings;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use time::macros::format_description;
use time::OffsetDateTime;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
pub enum LogError {
  #[error("log file {} unavailable: {source}", path.display())]
  Unavailable {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
  #[error("log write failed: {0}")]
  Write(#[from] io::Error),
}

/// Creates the log directory and installs the stderr diagnostics subscriber.
/// `RUST_LOG` wins over the configured level.
/// Runs before the state store is built so its warnings are not lost.
pub fn init_logger(settings: &Settings) -> io::Result<()> {
  if let Some(parent) = settings.resolve(&settings.log_file).parent() {
    fs::create_dir_all(parent)?;
  }
  let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| settings.log_level.clone());
  // A second init (tests, embedding) keeps the first subscriber.
  let _ = tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::new(filter))
    .with_writer(io::stderr)
    .try_init();
  Ok(())
}

pub fn header_timestamp() -> String {
  OffsetDateTime::now_local()
    .unwrap_or_else(|_| OffsetDateTime::now_utc())
    .format(format_description!(
      "[year][month][day] [hour]:[minute]:[second]"
    ))
    .unwrap_or_else(|_| "unknown-time".to_string())
}

pub fn format_header(timestamp: &str, command: &str) -> String {
  format!("\n-------{}--------\nExecuting: {}\n", timestamp, command)
}

/// Append handle for one toggle run. Holds an exclusive `flock` on
/// `<log>.lock` until dropped, so one run's header and output stay contiguous.
/// The lock file is close-on-exec and never handed to the child, so a
/// backgrounded grandchild keeping the log open does not keep the lock.
#[derive(Debug)]
pub struct RunLog {
  file: File,
  path: PathBuf,
  _lock: File,
}

impl RunLog {
  pub fn open(path: &Path) -> Result<Self, LogError> {
    let unavailable = |source| LogError::Unavailable {
      path: path.to_path_buf(),
      source,
    };
    let lock = OpenOptions::new()
      .create(true)
      .write(true)
      .open(lock_path(path))
      .map_err(unavailable)?;
    lock_exclusive(&lock).map_err(unavailable)?;
    let file = OpenOptions::new()
      .create(true)
      .append(true)
      .open(path)
      .map_err(unavailable)?;
    Ok(Self {
      file,
      path: path.to_path_buf(),
      _lock: lock,
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn write_header(&mut self, command: &str) -> Result<(), LogError> {
    let header = format_header(&header_timestamp(), command);
    self.file.write_all(header.as_bytes())?;
    self.file.flush()?;
    Ok(())
  }

  /// A child-side handle onto the same append-mode file.
  pub fn stdio(&self) -> Result<Stdio, LogError> {
    Ok(Stdio::from(self.file.try_clone()?))
  }
}

/// `tunnel.log` -> `tunnel.log.lock`
fn lock_path(log: &Path) -> PathBuf {
  let mut name = log.as_os_str().to_owned();
  name.push(".lock");
  PathBuf::from(name)
}

fn lock_exclusive(file: &File) -> io::Result<()> {
  loop {
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
    if rc == 0 {
      return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.kind() != io::ErrorKind::Interrupted {
      return Err(err);
    }
  }
}

/// Last `lines` lines of the log, terminators kept. Loads the whole file.
pub fn tail_log(path: &Path, lines: usize) -> Result<String, LogError> {
  let bytes = fs::read(path).map_err(|source| LogError::Unavailable {
    path: path.to_path_buf(),
    source,
  })?;
  let content = String::from_utf8_lossy(&bytes);
  Ok(last_lines(&content, lines))
}

fn last_lines(content: &str, n: usize) -> String {
  let lines: Vec<&str> = content.split_inclusive('\n').collect();
  let start = lines.len().saturating_sub(n);
  lines[start..].concat()
}
