//! CLI parse: clap types for the genstream binary, plus folding flags into configuration.

use crate::config::{ConfigLoader, GenstreamConfig};
use crate::logging::LoggingConfig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Streaming generation job service
#[derive(Parser, Debug)]
#[command(name = "genstream")]
#[command(about = "Run model generation as cancellable jobs streamed over server-sent events")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory (holds config/config.toml)
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path, layered above workspace configuration
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (default: off)
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long)]
    pub log_output: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP server
    Serve {
        /// Bind address, overriding server.bind
        #[arg(long)]
        bind: Option<String>,
    },
    /// Print the effective configuration as TOML
    Config,
}

impl Cli {
    /// Load layered configuration and apply command-line overrides.
    pub fn load_config(&self) -> Result<GenstreamConfig, config::ConfigError> {
        let mut config = ConfigLoader::load_with_file(&self.workspace, self.config.as_deref())?;
        if let Commands::Serve {
            bind: Some(bind), ..
        } = &self.command
        {
            config.server.bind = bind.clone();
        }
        config.logging = self.apply_logging_flags(config.logging);
        Ok(config)
    }

    /// Precedence: CLI flags override config file override defaults.
    pub fn apply_logging_flags(&self, mut logging: LoggingConfig) -> LoggingConfig {
        if self.verbose {
            logging.level = "debug".to_string();
        }
        if let Some(level) = &self.log_level {
            logging.level = level.clone();
        }
        if let Some(format) = &self.log_format {
            logging.format = format.clone();
        }
        if let Some(output) = &self.log_output {
            logging.output = output.clone();
        }
        logging
    }
}
