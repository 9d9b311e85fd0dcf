use crate::models::{AutomationSettings, ControlCenterConfig};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, Environment, File, FileFormat};
use std::fs;

pub const CONFIG_FILE_NAME: &str = "automdf.yaml";

/// Prefix of environment overrides, e.g. `AUTOMDF__FOCUS__TASKBAR_SLOT=2`
pub const ENV_PREFIX: &str = "AUTOMDF";
pub const ENV_SEPARATOR: &str = "__";

/// Loads and saves the control center configuration.
///
/// Values are layered: built-in defaults, then `automdf.yaml` in the config
/// directory, then `AUTOMDF__<SECTION>__<KEY>` environment variables.
/// Saving only ever writes the file layer.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    config_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a manager for `config_dir`, creating the directory if needed.
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            config_path: config_dir.join(CONFIG_FILE_NAME),
            config_dir,
        })
    }

    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    pub fn config_path(&self) -> &Utf8Path {
        &self.config_path
    }

    /// Effective configuration: defaults, file, then environment overrides.
    pub fn load_config(&self) -> Result<ControlCenterConfig> {
        if !self.config_path.exists() {
            tracing::warn!(
                "Config file not found at {}, using defaults",
                self.config_path
            );
        }

        let layered = Config::builder()
            .add_source(
                File::from(self.config_path.as_std_path())
                    .format(FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read config: {}", self.config_path))?;

        let mut config: ControlCenterConfig = layered
            .try_deserialize()
            .with_context(|| format!("Failed to parse config: {}", self.config_path))?;
        config.normalize();

        tracing::info!("Loaded config from {}", self.config_path);
        Ok(config)
    }

    /// Only what the file says, without environment overrides.
    pub fn load_file_config(&self) -> Result<ControlCenterConfig> {
        if !self.config_path.exists() {
            return Ok(ControlCenterConfig::default());
        }

        let contents = fs::read_to_string(&self.config_path)
            .with_context(|| format!("Failed to read config: {}", self.config_path))?;
        let mut config: ControlCenterConfig = serde_yaml_ng::from_str(&contents)
            .with_context(|| format!("Failed to parse config: {}", self.config_path))?;
        config.normalize();
        Ok(config)
    }

    pub fn save_config(&self, config: &ControlCenterConfig) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(config).context("Failed to serialize config to YAML")?;

        fs::write(&self.config_path, yaml_string)
            .with_context(|| format!("Failed to write config: {}", self.config_path))?;

        tracing::info!("Saved config to {}", self.config_path);
        Ok(())
    }

    /// Replace the `automation` section of the file, leaving the rest as written.
    pub fn save_automation_settings(&self, settings: &AutomationSettings) -> Result<()> {
        let mut config = self.load_file_config()?;
        config.automation = settings.clone();
        config.automation.normalize();
        self.save_config(&config)
    }
}
