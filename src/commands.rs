use crate::logging::{tail_log, LogError};
use crate::models::{AppStateFile, Indicator, TunnelState};
use crate::storage::{AppStateStore, StorageError};
use crate::toggle_call::{ToggleError, ToggleScript};
use std::io;

pub fn get_state(store: &AppStateStore) -> AppStateFile {
  store.state_snapshot()
}

pub fn switch_on(store: &AppStateStore) -> Result<Indicator, String> {
  switch(store, TunnelState::On)
}

pub fn switch_off(store: &AppStateStore) -> Result<Indicator, String> {
  switch(store, TunnelState::Off)
}

/// In-progress, then the settled indicator. An I/O failure still leaves the
/// indicator at `Error` before the message is returned.
fn switch(store: &AppStateStore, state: TunnelState) -> Result<Indicator, String> {
  store.mark_in_progress(state).map_err(map_error)?;
  let toggle = ToggleScript::from_settings(store.settings());
  match toggle.run(state) {
    Ok(report) => {
      let indicator = Indicator::settled(state, report.success());
      store
        .record_outcome(state, indicator, report.exit_code)
        .map_err(map_error)?;
      Ok(indicator)
    }
    Err(err) => {
      if let Err(store_err) = store.record_outcome(state, Indicator::Error, None) {
        tracing::warn!("failed to record error state: {store_err}");
      }
      Err(map_toggle_error(err))
    }
  }
}

pub fn show_log(store: &AppStateStore, lines: usize) -> Result<String, String> {
  tail_log(store.log_path(), lines).map_err(map_log_error)
}

/// Line counts from the command line; negatives clamp to zero.
pub fn clamp_lines(requested: i64) -> usize {
  usize::try_from(requested.max(0)).unwrap_or(usize::MAX)
}

fn map_error(err: StorageError) -> String {
  format!("state file: {err}")
}

fn map_log_error(err: LogError) -> String {
  match &err {
    LogError::Unavailable { path, source } if source.kind() == io::ErrorKind::NotFound => {
      format!(
        "log file {} does not exist yet; switch the tunnel on or off first",
        path.display()
      )
    }
    _ => err.to_string(),
  }
}

fn map_toggle_error(err: ToggleError) -> String {
  format!("tunnel {err}")
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::storage::Settings;
  use std::fs;
  use std::os::unix::fs::PermissionsExt;
  use std::path::{Path, PathBuf};

  fn store_with_script(dir: &Path, body: &str) -> AppStateStore {
    let path = dir.join("test.bash");
    fs::write(&path, format!("#!/bin/bash\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    AppStateStore::new(Settings {
      work_dir: dir.to_path_buf(),
      ..Settings::default()
    })
  }

  #[test]
  fn switch_on_and_off_settle_indicator() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with_script(dir.path(), "exit 0");

    assert_eq!(switch_on(&store).unwrap(), Indicator::IdleOn);
    assert_eq!(get_state(&store).last_action, Some(TunnelState::On));
    assert_eq!(switch_off(&store).unwrap(), Indicator::IdleOff);
    let state = get_state(&store);
    assert_eq!(state.indicator, Indicator::IdleOff);
    assert_eq!(state.last_exit_code, Some(0));
  }

  #[test]
  fn failed_script_sets_error_indicator() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with_script(dir.path(), "exit 4");

    assert_eq!(switch_on(&store).unwrap(), Indicator::Error);
    let state = get_state(&store);
    assert_eq!(state.indicator, Indicator::Error);
    assert_eq!(state.last_exit_code, Some(4));
  }

  #[test]
  fn unwritable_log_is_surfaced_and_marks_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = AppStateStore::new(Settings {
      work_dir: dir.path().to_path_buf(),
      log_file: PathBuf::from("missing-dir/tunnel.log"),
      ..Settings::default()
    });
    let err = switch_on(&store).unwrap_err();
    assert!(err.contains("missing-dir"));
    assert!(err.contains("unavailable"));
    assert_eq!(get_state(&store).indicator, Indicator::Error);
  }

  #[test]
  fn show_log_before_any_toggle_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with_script(dir.path(), "exit 0");
    let err = show_log(&store, 100).unwrap_err();
    assert!(err.contains("does not exist yet"));

    switch_on(&store).unwrap();
    let text = show_log(&store, 100).unwrap();
    assert!(text.contains("Executing: ./test.bash on\n"));
  }

  #[test]
  fn negative_line_counts_clamp_to_zero() {
    assert_eq!(clamp_lines(-5), 0);
    assert_eq!(clamp_lines(0), 0);
    assert_eq!(clamp_lines(100), 100);
  }
}
