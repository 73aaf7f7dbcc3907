//! CLI subcommand implementations.

pub mod history;
pub mod mapping;
pub mod preview;
pub mod process;
pub mod util;
