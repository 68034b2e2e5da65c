use clap::{Parser, Subcommand};
use ntunnel::commands::*;
use ntunnel::logging::init_logger;
use ntunnel::models::Indicator;
use ntunnel::storage::{AppStateStore, Settings};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Switch a VPN/SSH tunnel through its toggle script and read the tunnel log.
#[derive(Parser)]
#[command(name = "ntunnel", version)]
struct Cli {
  /// Path to a JSON config file (default: $NTUNNEL_CONFIG, then ./ntunnel.json).
  #[arg(long, global = true)]
  config: Option<PathBuf>,
  #[command(subcommand)]
  command: Action,
}

#[derive(Subcommand)]
enum Action {
  /// Run the toggle script with `on`.
  On,
  /// Run the toggle script with `off`.
  Off,
  /// Print the last lines of the tunnel log.
  Log {
    /// Number of lines (defaults to `tail_lines` from the config).
    #[arg(short = 'n', long, allow_negative_numbers = true)]
    lines: Option<i64>,
  },
  /// Print the cached indicator state as JSON.
  Status,
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  let state_store = match bootstrap(cli.config.as_deref()) {
    Ok(store) => store,
    Err(message) => {
      eprintln!("ntunnel: {message}");
      return ExitCode::from(2);
    }
  };

  let result = match cli.command {
    Action::On => switch_on(&state_store).map(report_indicator),
    Action::Off => switch_off(&state_store).map(report_indicator),
    Action::Log { lines } => {
      let lines = lines
        .map(clamp_lines)
        .unwrap_or(state_store.settings().tail_lines);
      show_log(&state_store, lines).map(|text| {
        print!("{text}");
        true
      })
    }
    Action::Status => serde_json::to_string_pretty(&get_state(&state_store))
      .map(|json| {
        println!("{json}");
        true
      })
      .map_err(|e| e.to_string()),
  };

  match result {
    Ok(true) => ExitCode::SUCCESS,
    Ok(false) => ExitCode::FAILURE,
    Err(message) => {
      eprintln!("ntunnel: {message}");
      ExitCode::FAILURE
    }
  }
}

/// Settings, then the subscriber, then the store: loading the store may warn.
fn bootstrap(config: Option<&Path>) -> Result<AppStateStore, String> {
  let settings = Settings::load(config).map_err(|e| e.to_string())?;
  init_logger(&settings).map_err(|e| format!("logger init: {e}"))?;
  Ok(AppStateStore::new(settings))
}

fn report_indicator(indicator: Indicator) -> bool {
  println!("tunnel: {indicator}");
  indicator != Indicator::Error
}
