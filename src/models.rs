use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelState {
  On,
  Off,
}

impl TunnelState {
  /// Argument handed to the toggle script.
  pub fn token(self) -> &'static str {
    match self {
      TunnelState::On => "on",
      TunnelState::Off => "off",
    }
  }
}

impl fmt::Display for TunnelState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.token())
  }
}

/// What a tray icon would show. Cached from the last toggle, never queried live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Indicator {
  #[default]
  IdleOff,
  IdleOn,
  InProgress,
  Error,
}

impl Indicator {
  pub fn settled(state: TunnelState, success: bool) -> Self {
    match (state, success) {
      (_, false) => Indicator::Error,
      (TunnelState::On, true) => Indicator::IdleOn,
      (TunnelState::Off, true) => Indicator::IdleOff,
    }
  }
}

impl fmt::Display for Indicator {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let label = match self {
      Indicator::IdleOff => "off",
      Indicator::IdleOn => "on",
      Indicator::InProgress => "in progress",
      Indicator::Error => "error",
    };
    f.write_str(label)
  }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppStateFile {
  pub indicator: Indicator,
  pub last_action: Option<TunnelState>,
  pub last_exit_code: Option<i32>,
  pub updated_at: Option<String>,
}
