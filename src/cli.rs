use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Edit and preview Lightspeed looks
#[derive(Parser, Debug)]
#[command(name = "lightspeed-looks", version)]
pub struct Cli {
    /// Config file (default: per-user looks_config.json)
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// List looks
    List,

    /// Print a look's fixtures and stored channels
    Show {
        #[arg(value_name = "LOOK")]
        look: u64,
    },

    /// Change one channel and save
    Set {
        #[arg(value_name = "LOOK")]
        look: u64,
        #[arg(value_name = "FIXTURE")]
        fixture: u64,
        #[arg(value_name = "CHANNEL")]
        channel: usize,
        #[arg(value_name = "VALUE")]
        value: u16,
    },

    /// Write the database to a JSON file
    Export {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Load a JSON file into the database
    Import {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Keep existing fixtures and looks, only add new ids
        #[arg(short = 'm', long = "merge")]
        merge: bool,
    },

    /// Send a look over sACN, then black out
    Preview {
        #[arg(value_name = "LOOK")]
        look: u64,

        /// How long to hold the preview
        #[arg(value_name = "SECONDS", default_value_t = 10)]
        seconds: u64,
    },
}
