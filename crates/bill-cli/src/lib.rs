//! Jobsite billing CLI library.
//!
//! Reads LMN exports, runs the billing engine, and submits draft invoices
//! to QuickBooks Online.

mod cli;
pub mod commands;
mod config;
pub mod lmn;
pub mod mapping;

pub use cli::{Cli, Commands};
pub use config::Config;
