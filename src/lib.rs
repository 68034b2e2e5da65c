//! Tunnel toggle core: run the toggle script, keep its log, tail it.
//!
//! The `ntunnel` binary is one front end; a tray or other UI can drive the
//! same [`toggle_call::ToggleScript::set_tunnel`] and [`logging::tail_log`].

pub mod commands;
pub mod logging;
pub mod models;
pub mod storage;
pub mod toggle_call;
