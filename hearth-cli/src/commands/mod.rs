//! Subcommand implementations for the hearth CLI.

pub mod completion;
pub mod rooms;
pub mod say;
pub mod send;
mod session;
pub mod watch;
