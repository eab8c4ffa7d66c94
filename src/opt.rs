use crate::config::DEFAULT_CONFIG_PATH;
use clap::{ArgAction, Parser};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(version, about)]
pub struct Options {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Logging verbosity (-v debug, -vv trace), overrides the configured loglevel
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    /// Check the configuration and exit
    #[arg(short, long)]
    pub test: bool,
}
