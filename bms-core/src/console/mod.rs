//! Operator console shared between the emulator and scenario tests.
//!
//! The grammar lives in [`grammar`] and is implemented with a token/parse
//! pipeline that stays compatible with `no_std`.

pub mod catalog;
pub mod commands;
pub mod grammar;

pub use commands::{CommandError, CommandExecutor, CommandOutcome, StatusReport, TickReport};
