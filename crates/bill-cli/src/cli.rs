//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::commands::history::HistoryArgs;
use crate::commands::mapping::MappingAction;
use crate::commands::preview::PreviewArgs;
use crate::commands::process::ProcessArgs;

/// Jobsite billing from LMN exports.
///
/// Splits drive time across each crew's job sites, totals billable labor and
/// services, and creates QuickBooks Online draft invoices.
#[derive(Debug, Parser)]
#[command(name = "bill", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show the invoices an export pair would produce.
    Preview(PreviewArgs),

    /// Create draft invoices in QuickBooks Online.
    Process(ProcessArgs),

    /// Manage jobsite to customer mappings.
    Mapping {
        #[command(subcommand)]
        action: MappingAction,
    },

    /// List invoices created by earlier runs.
    History(HistoryArgs),
}
