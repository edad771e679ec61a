//! Subcommand implementations

pub mod disasm;
pub mod run;
