use crate::aggregate::{AggMethod, Tolerance};
use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Settings file inside the configuration directory.
pub const CONFIG_FILE: &str = "config.toml";

/// Locates the iamframe settings file and reads or seeds it.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: PathBuf,
}

impl ConfigManager {
    /// Settings kept in `config_dir` instead of the platform default.
    pub fn with_dir(config_dir: PathBuf) -> Self {
        Self { config_dir }
    }

    /// `<platform config dir>/<app_name>`, e.g. `~/.config/iamframe` on Linux.
    pub fn new(app_name: &str) -> Result<Self> {
        let base = dirs::config_dir()
            .ok_or_else(|| eyre!("no platform configuration directory to hold {app_name} settings"))?;
        Ok(Self::with_dir(base.join(app_name)))
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    /// The commented template written by `--generate-config`.
    pub fn default_template(&self) -> &'static str {
        DEFAULT_CONFIG_TEMPLATE
    }

    /// Seed the settings file from the template. An existing file is kept unless `force` is set.
    pub fn write_default_config(&self, force: bool) -> Result<PathBuf> {
        let path = self.config_file();
        if path.exists() && !force {
            return Err(eyre!(
                "{} already exists, pass --force to replace it with the defaults",
                path.display()
            ));
        }
        std::fs::create_dir_all(&self.config_dir)
            .wrap_err_with(|| format!("cannot create {}", self.config_dir.display()))?;
        std::fs::write(&path, DEFAULT_CONFIG_TEMPLATE)
            .wrap_err_with(|| format!("cannot write default settings to {}", path.display()))?;
        Ok(path)
    }

    /// Settings from the file, or the built-in defaults when there is none.
    pub fn load_file(&self) -> Result<AppConfig> {
        let path = self.config_file();
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(AppConfig::default()),
            Err(e) => {
                return Err(e).wrap_err_with(|| {
                    format!("cannot read iamframe settings from {}", path.display())
                })
            }
        };
        toml::from_str(&content).wrap_err_with(|| {
            format!("{} is not a valid iamframe configuration", path.display())
        })
    }
}

/// Settings for the `iamframe` pipeline, one section per concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Settings format, `0.1.x`
    pub version: String,
    pub aggregation: AggregationConfig,
    pub tolerance: ToleranceConfig,
    pub io: IoConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Target region of region aggregation
    pub region: String,
    /// Extra column holding subannual time slices
    pub subannual_column: String,
    /// Label of the annual value within `subannual_column`
    pub subannual_value: String,
    pub method: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToleranceConfig {
    pub rtol: f64,
    pub atol: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct IoConfig {
    pub delimiter: Option<u8>,
    pub data_sheet: Option<String>,
    pub meta_sheet: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default tracing level when RUST_LOG is not set
    pub level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: "0.1".to_string(),
            aggregation: AggregationConfig::default(),
            tolerance: ToleranceConfig::default(),
            io: IoConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            region: "World".to_string(),
            subannual_column: "subannual".to_string(),
            subannual_value: "year".to_string(),
            method: "sum".to_string(),
        }
    }
}

impl Default for ToleranceConfig {
    fn default() -> Self {
        let tolerance = Tolerance::default();
        Self {
            rtol: tolerance.rtol,
            atol: tolerance.atol,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

impl AppConfig {
    /// Built-in defaults overlaid with the user's settings file, validated.
    pub fn load(app_name: &str) -> Result<Self> {
        let mut config = AppConfig::default();

        let user_config = ConfigManager::new(app_name)?.load_file()?;
        config.merge(user_config);

        config.validate()?;

        Ok(config)
    }

    /// Overlay the non-default values of `other`.
    pub fn merge(&mut self, other: AppConfig) {
        if other.version != AppConfig::default().version {
            self.version = other.version;
        }

        self.aggregation.merge(other.aggregation);
        self.tolerance.merge(other.tolerance);
        self.io.merge(other.io);
        self.logging.merge(other.logging);
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !self.version.starts_with("0.1") {
            return Err(eyre!(
                "iamframe settings version {} is not supported, expected 0.1.x",
                self.version
            ));
        }

        if self.aggregation.region.trim().is_empty() {
            return Err(eyre!("aggregation.region must not be empty"));
        }
        if self.aggregation.subannual_column.trim().is_empty() {
            return Err(eyre!("aggregation.subannual_column must not be empty"));
        }
        self.aggregation_method()?;

        for (name, value) in [
            ("rtol", self.tolerance.rtol),
            ("atol", self.tolerance.atol),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(eyre!(
                    "tolerance.{} must be a non-negative number, got {}",
                    name,
                    value
                ));
            }
        }

        match self.logging.level.to_lowercase().as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => {
                return Err(eyre!(
                    "logging.level `{}` is not one of error, warn, info, debug, trace",
                    self.logging.level
                ))
            }
        }

        Ok(())
    }

    pub fn aggregation_method(&self) -> Result<AggMethod> {
        self.aggregation
            .method
            .parse()
            .map_err(|e| eyre!("aggregation.method: {}", e))
    }

    pub fn tolerance(&self) -> Tolerance {
        Tolerance::new(self.tolerance.rtol, self.tolerance.atol)
    }
}

impl AggregationConfig {
    pub fn merge(&mut self, other: Self) {
        let default = AggregationConfig::default();
        if other.region != default.region {
            self.region = other.region;
        }
        if other.subannual_column != default.subannual_column {
            self.subannual_column = other.subannual_column;
        }
        if other.subannual_value != default.subannual_value {
            self.subannual_value = other.subannual_value;
        }
        if other.method != default.method {
            self.method = other.method;
        }
    }
}

impl ToleranceConfig {
    pub fn merge(&mut self, other: Self) {
        let default = ToleranceConfig::default();
        if other.rtol != default.rtol {
            self.rtol = other.rtol;
        }
        if other.atol != default.atol {
            self.atol = other.atol;
        }
    }
}

impl IoConfig {
    pub fn merge(&mut self, other: Self) {
        if other.delimiter.is_some() {
            self.delimiter = other.delimiter;
        }
        if other.data_sheet.is_some() {
            self.data_sheet = other.data_sheet;
        }
        if other.meta_sheet.is_some() {
            self.meta_sheet = other.meta_sheet;
        }
    }
}

impl LoggingConfig {
    pub fn merge(&mut self, other: Self) {
        if other.level != LoggingConfig::default().level {
            self.level = other.level;
        }
    }
}

const DEFAULT_CONFIG_TEMPLATE: &str = include_str!("../config/default.toml");
