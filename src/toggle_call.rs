use crate::logging::{LogError, RunLog};
use crate::models::TunnelState;
use crate::storage::Settings;
use std::io;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const KILL_GRACE: Duration = Duration::from_millis(300);

#[derive(Debug, Error)]
pub enum ToggleError {
  #[error(transparent)]
  Log(#[from] LogError),
  #[error("failed to start {}: {source}", shell.display())]
  Spawn {
    shell: PathBuf,
    #[source]
    source: io::Error,
  },
  #[error("failed waiting for toggle script: {0}")]
  Wait(#[source] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
  pub command: String,
  pub exit_code: Option<i32>,
  pub timed_out: bool,
}

impl RunReport {
  pub fn success(&self) -> bool {
    !self.timed_out && self.exit_code == Some(0)
  }
}

/// Runs the toggle script through a shell and appends its output to the log.
#[derive(Debug, Clone)]
pub struct ToggleScript {
  shell: PathBuf,
  work_dir: PathBuf,
  script: PathBuf,
  log_path: PathBuf,
  capture_stderr: bool,
  timeout: Option<Duration>,
}

impl ToggleScript {
  pub fn from_settings(settings: &Settings) -> Self {
    Self {
      shell: settings.shell.clone(),
      work_dir: settings.work_dir.clone(),
      script: settings.script.clone(),
      log_path: settings.resolve(&settings.log_file),
      capture_stderr: settings.capture_stderr,
      timeout: settings.timeout_secs.map(Duration::from_secs),
    }
  }

  #[cfg(test)]
  pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
    self.timeout = timeout;
    self
  }

  #[cfg(test)]
  pub fn log_path(&self) -> &std::path::Path {
    &self.log_path
  }

  /// Exact line handed to the shell, e.g. `./test.bash on`.
  pub fn command_line(&self, state: TunnelState) -> String {
    if self.script.is_absolute() {
      format!("{} {}", self.script.display(), state.token())
    } else {
      format!("./{} {}", self.script.display(), state.token())
    }
  }

  /// `true` iff the script exited with status 0. Callers that also need the
  /// exit code use [`ToggleScript::run`].
  pub fn set_tunnel(&self, state: TunnelState) -> Result<bool, ToggleError> {
    self.run(state).map(|report| report.success())
  }

  pub fn run(&self, state: TunnelState) -> Result<RunReport, ToggleError> {
    let run_id = Uuid::new_v4();
    let _span = tracing::info_span!("toggle", %run_id, %state).entered();

    let command = self.command_line(state);
    let mut log = RunLog::open(&self.log_path)?;
    log.write_header(&command)?;
    info!(log = %log.path().display(), "executing: {command}");

    let mut cmd = Command::new(&self.shell);
    cmd
      .arg("-c")
      .arg(&command)
      .current_dir(&self.work_dir)
      .stdout(log.stdio()?);
    if self.capture_stderr {
      cmd.stderr(log.stdio()?);
    }
    // Own group so the timeout can kill the whole tree. The script is then a
    // background job: tty reads (sudo prompts) stop it and Ctrl-C misses it.
    if self.timeout.is_some() {
      cmd.process_group(0);
    }
    let mut child = cmd.spawn().map_err(|source| ToggleError::Spawn {
      shell: self.shell.clone(),
      source,
    })?;
    // Release our copies of the log fd held by `cmd`.
    drop(cmd);

    let status = wait_with_timeout(&mut child, self.timeout).map_err(ToggleError::Wait)?;
    drop(log);

    let report = RunReport {
      command,
      exit_code: status.and_then(|s| s.code()),
      timed_out: status.is_none(),
    };
    if report.timed_out {
      warn!("toggle script timed out and was killed");
    } else if !report.success() {
      match report.exit_code {
        Some(code) => error!(command = %report.command, "ERROR: {code}"),
        None => error!(command = %report.command, "ERROR: terminated by signal"),
      }
    }
    info!("Tunnel switched {}", state.token().to_uppercase());
    Ok(report)
  }
}

/// `Ok(None)` means the timeout fired and the process group was killed.
fn wait_with_timeout(child: &mut Child, timeout: Option<Duration>) -> io::Result<Option<ExitStatus>> {
  let Some(timeout) = timeout else {
    return child.wait().map(Some);
  };
  let deadline = Instant::now() + timeout;
  loop {
    if let Some(status) = child.try_wait()? {
      return Ok(Some(status));
    }
    if Instant::now() >= deadline {
      break;
    }
    std::thread::sleep(POLL_INTERVAL);
  }

  let pgid = child.id() as i32;
  unsafe {
    libc::kill(-pgid, libc::SIGTERM);
  }
  let grace_end = Instant::now() + KILL_GRACE;
  while Instant::now() < grace_end {
    if child.try_wait()?.is_some() {
      break;
    }
    std::thread::sleep(POLL_INTERVAL);
  }
  unsafe {
    libc::kill(-pgid, libc::SIGKILL);
  }
  child.wait()?;
  Ok(None)
}
