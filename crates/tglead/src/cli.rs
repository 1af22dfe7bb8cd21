//! Command-line interface definition using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tglead_core::pipeline::{Period, ScrapeMode};

/// Scrape Telegram group history and qualify B2B leads
#[derive(Parser, Debug)]
#[command(name = "tglead")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the groups and channels contained in an export
    Groups {
        /// Telegram Desktop export(s) (result.json)
        #[arg(short, long, required = true, num_args = 1..)]
        export: Vec<PathBuf>,
    },

    /// Export one group's recent messages to a CSV file
    Scrape {
        /// Telegram Desktop export(s) (result.json)
        #[arg(short, long, required = true, num_args = 1..)]
        export: Vec<PathBuf>,

        /// Group to scrape: 1-based index from `groups`, or its exact title
        #[arg(short, long)]
        group: String,

        /// Lookback unit (days, weeks, months)
        #[arg(short, long, default_value = "days")]
        period: Period,

        /// Number of periods to look back
        #[arg(short, long, default_value_t = 1)]
        quantity: u32,

        /// fast: no profile lookups; detailed: fetch each sender's bio
        #[arg(short, long, default_value = "fast")]
        mode: ScrapeMode,
    },

    /// Aggregate, filter and classify a message export
    Process {
        /// Message export to process (default: latest messages-*.csv in DATA_FOLDER)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Stop after keyword filtering
        #[arg(long)]
        skip_classify: bool,
    },

    /// Rebuild the lead sheet from a validated-users JSON without reclassifying
    Leads {
        /// Classified users (default: latest validated-users-*.json in DATA_FOLDER)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Print the first rows of a CSV artifact
    Show {
        path: PathBuf,

        #[arg(short, long, default_value_t = 20)]
        rows: usize,
    },
}
