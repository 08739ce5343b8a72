//! Command-line interface for the knit runtime driver.

use std::path::{Path, PathBuf};

use clap::Parser;
use derive_more::{Display, Error, From};
use knit_runtime::{ErrorPolicy, RuntimeConfig};

#[derive(Parser, Debug)]
#[command(name = "knit")]
#[command(about = "Drive the knit runtime from the command line", long_about = None)]
pub struct Cli {
    /// Load runtime configuration from a JSON file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Keep going after an error instead of exiting immediately
    #[arg(long = "continue")]
    pub keep_going: bool,

    /// Fail allocations once this many bytes are live
    #[arg(long, value_name = "BYTES")]
    pub heap_limit: Option<usize>,

    /// Bind a string variable
    #[arg(long = "set", value_name = "NAME=VALUE", value_parser = parse_binding)]
    pub strings: Vec<(String, String)>,

    /// Bind a list variable from comma-separated items
    #[arg(long = "list", value_name = "NAME=A,B,...", value_parser = parse_binding)]
    pub lists: Vec<(String, String)>,

    /// Print a variable after all bindings are made
    #[arg(long = "dump", value_name = "NAME")]
    pub dumps: Vec<String>,

    /// Print heap statistics before shutting down
    #[arg(long)]
    pub stats: bool,
}

fn parse_binding(arg: &str) -> Result<(String, String), String> {
    match arg.split_once('=') {
        Some(("", _)) => Err(format!("missing variable name in '{arg}'")),
        Some((name, value)) => Ok((name.to_owned(), value.to_owned())),
        None => Err(format!("expected NAME=VALUE, got '{arg}'")),
    }
}

#[derive(Debug, Display, Error, From)]
pub enum ConfigError {
    #[display("couldn't read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[display("invalid configuration: {_0}")]
    #[from]
    Parse(serde_json::Error),
}

impl Cli {
    /// The runtime configuration: the config file if given, then flags on top.
    pub fn runtime_config(&self) -> Result<RuntimeConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => RuntimeConfig::default(),
        };
        if self.keep_going {
            config = config.with_policy(ErrorPolicy::Continue);
        }
        if let Some(limit) = self.heap_limit {
            config = config.with_heap_limit(limit);
        }
        Ok(config)
    }
}

fn load_config(path: &Path) -> Result<RuntimeConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_owned(),
        source,
    })?;
    Ok(serde_json::from_str(&text)?)
}
