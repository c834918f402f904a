//! Layered configuration loading.

use super::merge::merge_policy;
use super::sources::{global_file, workspace_file};
use super::GenstreamConfig;
use config::{Environment, File};
use std::path::Path;

/// Prefix of environment overrides: `GENSTREAM__RETRY__MAX_ATTEMPTS=5`
pub const ENV_PREFIX: &str = "GENSTREAM";

/// Configuration loader
///
/// Precedence (lowest to highest):
/// 1. Built-in defaults
/// 2. Global file (`$XDG_CONFIG_HOME/genstream/config.toml`)
/// 3. Workspace files (`config/config.toml`, `config/{GENSTREAM_ENV}.toml`)
/// 4. Explicit file (`--config`)
/// 5. Environment (`GENSTREAM__SECTION__KEY`)
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for a workspace.
    pub fn load(workspace_root: &Path) -> Result<GenstreamConfig, config::ConfigError> {
        Self::load_layers(workspace_root, None, ENV_PREFIX)
    }

    /// Load configuration with an explicit file layered above the workspace files.
    pub fn load_with_file(
        workspace_root: &Path,
        config_file: Option<&Path>,
    ) -> Result<GenstreamConfig, config::ConfigError> {
        Self::load_layers(workspace_root, config_file, ENV_PREFIX)
    }

    /// Load configuration from a single file on top of the defaults.
    pub fn load_from_file(path: &Path) -> Result<GenstreamConfig, config::ConfigError> {
        merge_policy::builder_with_defaults()?
            .add_source(File::from(path))
            .build()?
            .try_deserialize()
    }

    /// Full layering with a custom environment prefix.
    pub fn load_layers(
        workspace_root: &Path,
        config_file: Option<&Path>,
        env_prefix: &str,
    ) -> Result<GenstreamConfig, config::ConfigError> {
        let mut builder = merge_policy::builder_with_defaults()?;
        builder = global_file::add_to_builder(builder)?;
        builder = workspace_file::add_to_builder(builder, workspace_root)?;
        if let Some(path) = config_file {
            builder = builder.add_source(File::from(path));
        }
        builder = builder.add_source(
            Environment::with_prefix(env_prefix)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}
