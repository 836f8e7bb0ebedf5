use clap::{Parser, Subcommand};

/// goodwe-udp - query and configure GoodWe inverters over UDP
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Options {
    /// Config file to read
    #[clap(short = 'c', long = "config", default_value = "config.yaml")]
    pub config_file: String,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Command {
    /// Print runtime data of every enabled inverter
    Runtime {
        /// Include sensors of unknown meaning
        #[clap(long)]
        unknown: bool,
    },
    /// Print device info
    Info,
    /// Print every setting
    Settings,
    /// Print one setting
    ReadSetting { id: String },
    /// Write one setting
    WriteSetting { id: String, value: String },
}

impl Options {
    pub fn new() -> Self {
        Self::parse()
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::new()
    }
}
