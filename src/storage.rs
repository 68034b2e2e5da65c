use crate::models::{AppStateFile, Indicator, TunnelState};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

const CONFIG_FILE: &str = "ntunnel.json";
const CONFIG_ENV: &str = "NTUNNEL_CONFIG";

#[derive(Debug, Error)]
pub enum StorageError {
  #[error("io error: {0}")]
  Io(#[from] io::Error),
  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),
  #[error("config {}: {source}", path.display())]
  Config {
    path: PathBuf,
    #[source]
    source: Box<StorageError>,
  },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
  pub script: PathBuf,
  pub log_file: PathBuf,
  pub state_file: PathBuf,
  pub work_dir: PathBuf,
  pub shell: PathBuf,
  pub capture_stderr: bool,
  pub timeout_secs: Option<u64>,
  pub tail_lines: usize,
  pub log_level: String,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      script: PathBuf::from("test.bash"),
      log_file: PathBuf::from("tunnel.log"),
      state_file: PathBuf::from(".ntunnel-state.json"),
      work_dir: PathBuf::from("."),
      shell: PathBuf::from("/bin/bash"),
      capture_stderr: false,
      timeout_secs: None,
      tail_lines: 100,
      log_level: "info".to_string(),
    }
  }
}

impl Settings {
  /// `explicit`, then `$NTUNNEL_CONFIG`, then `./ntunnel.json`, else defaults.
  pub fn load(explicit: Option<&Path>) -> Result<Self, StorageError> {
    Self::load_from(explicit, std::env::var_os(CONFIG_ENV), Path::new("."))
  }

  fn load_from(
    explicit: Option<&Path>,
    env_path: Option<OsString>,
    cwd: &Path,
  ) -> Result<Self, StorageError> {
    let path = match (explicit, env_path) {
      (Some(path), _) => Some(path.to_path_buf()),
      (None, Some(value)) => Some(PathBuf::from(value)),
      (None, None) => Some(cwd.join(CONFIG_FILE)).filter(|p| p.exists()),
    };
    match path {
      Some(path) => Self::from_file(&path).map_err(|err| StorageError::Config {
        path,
        source: Box::new(err),
      }),
      None => Ok(Self::default()),
    }
  }

  pub fn from_file(path: &Path) -> Result<Self, StorageError> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
  }

  pub fn resolve(&self, path: &Path) -> PathBuf {
    if path.is_absolute() {
      path.to_path_buf()
    } else {
      self.work_dir.join(path)
    }
  }
}

pub struct AppStateStore {
  settings: Settings,
  state: Mutex<AppStateFile>,
  log_path: PathBuf,
  state_path: PathBuf,
}

impl AppStateStore {
  pub fn new(settings: Settings) -> Self {
    let log_path = settings.resolve(&settings.log_file);
    let state_path = settings.resolve(&settings.state_file);
    let state = match load_state_file(&state_path) {
      Ok(state) => state,
      Err(err) => {
        tracing::warn!(path = %state_path.display(), "ignoring unreadable state file: {err}");
        AppStateFile::default()
      }
    };
    Self {
      settings,
      state: Mutex::new(state),
      log_path,
      state_path,
    }
  }

  pub fn settings(&self) -> &Settings {
    &self.settings
  }

  pub fn log_path(&self) -> &Path {
    &self.log_path
  }

  pub fn state_snapshot(&self) -> AppStateFile {
    self.lock().clone()
  }

  pub fn mark_in_progress(&self, action: TunnelState) -> Result<(), StorageError> {
    let mut state = self.lock();
    state.indicator = Indicator::InProgress;
    state.last_action = Some(action);
    state.updated_at = Some(now_rfc3339());
    save_state_file(&self.state_path, &state)
  }

  pub fn record_outcome(
    &self,
    action: TunnelState,
    indicator: Indicator,
    exit_code: Option<i32>,
  ) -> Result<(), StorageError> {
    let mut state = self.lock();
    state.indicator = indicator;
    state.last_action = Some(action);
    state.last_exit_code = exit_code;
    state.updated_at = Some(now_rfc3339());
    save_state_file(&self.state_path, &state)
  }

  fn lock(&self) -> MutexGuard<'_, AppStateFile> {
    // The state is plain data; a panicked writer cannot leave it half-built.
    self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}

fn now_rfc3339() -> String {
  OffsetDateTime::now_local()
    .unwrap_or_else(|_| OffsetDateTime::now_utc())
    .format(&Rfc3339)
    .unwrap_or_else(|_| "unknown-time".to_string())
}

fn load_state_file(path: &Path) -> Result<AppStateFile, StorageError> {
  if !path.exists() {
    return Ok(AppStateFile::default());
  }
  let mut file = fs::File::open(path)?;
  let mut contents = String::new();
  file.read_to_string(&mut contents)?;
  Ok(serde_json::from_str(&contents)?)
}

fn save_state_file(path: &Path, state: &AppStateFile) -> Result<(), StorageError> {
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent)?;
  }
  let payload = serde_json::to_string_pretty(state)?;
  let mut file = fs::File::create(path)?;
  file.write_all(payload.as_bytes())?;
  Ok(())
}
