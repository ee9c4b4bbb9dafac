use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::types::{Color, DeviceEndpoint, PlotStyle, TransportKind};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub instrument: InstrumentConfig,
    pub plot: PlotConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct InstrumentConfig {
    /// Instrument host name or address; empty runs the imitator instead
    pub host: String,
    pub transport: TransportKind,
    /// SCPI raw-socket service port
    pub port: u16,
    /// Reply timeout in seconds
    pub timeout_secs: f64,
    /// Command-line client for the legacy RPC protocol
    pub rpc_helper: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct PlotConfig {
    pub gnuplot: String,
    pub terminal: String,
    pub width: u32,
    pub height: u32,
    pub color: String,
    /// Query the time range before a plot and stretch the timeout to cover
    /// a full acquisition
    pub extend_timeout: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_level: String,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            transport: TransportKind::Socket,
            port: 5025,
            timeout_secs: 3.0,
            rpc_helper: "vxi11-cmd".to_string(),
        }
    }
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            gnuplot: "gnuplot".to_string(),
            terminal: "svg".to_string(),
            width: 640,
            height: 480,
            color: "#0000ff".to_string(),
            extend_timeout: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl InstrumentConfig {
    pub fn endpoint(&self) -> DeviceEndpoint {
        DeviceEndpoint::new(self.host.trim(), self.transport)
    }

    /// Reply timeout; an unusable setting falls back to the default.
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_secs)
            .ok()
            .filter(|t| !t.is_zero())
            .unwrap_or(DEFAULT_TIMEOUT)
    }
}

impl PlotConfig {
    /// Style used when a request does not name its own colour or size.
    pub fn default_style(&self) -> Result<PlotStyle, ConfigError> {
        let color = self
            .color
            .parse::<Color>()
            .map_err(|e| ConfigError::Message(format!("plot.color: {e}")))?;
        Ok(PlotStyle {
            color,
            width: self.width,
            height: self.height,
        })
    }
}

impl AppConfig {
    /// Validate all configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let timeout = self.instrument.timeout_secs;
        if !timeout.is_finite() || timeout <= 0.0 {
            return Err(ConfigError::Message(format!(
                "instrument.timeout_secs must be positive, got: {timeout}"
            )));
        }
        if self.instrument.port == 0 {
            return Err(ConfigError::Message(
                "instrument.port must be non-zero".to_string(),
            ));
        }
        if self.plot.width == 0 || self.plot.height == 0 {
            return Err(ConfigError::Message(format!(
                "plot size must be non-zero, got {}x{}",
                self.plot.width, self.plot.height
            )));
        }
        self.plot.default_style()?;
        Ok(())
    }
}

/// Load configuration from file with layered fallbacks
pub fn load_config(config_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder().add_source(Config::try_from(&AppConfig::default())?);

    if let Some(path) = config_path {
        if path.exists() {
            builder = builder.add_source(File::from(path));
        } else {
            return Err(ConfigError::Message(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
    } else {
        let possible_paths = ["scope-bridge.toml", "config.toml"];

        for path in &possible_paths {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
                break;
            }
        }
    }

    // Environment overrides, e.g. SCOPE_BRIDGE_INSTRUMENT__HOST
    builder = builder.add_source(
        Environment::with_prefix("SCOPE_BRIDGE")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let app_config = config.try_deserialize::<AppConfig>()?;
    app_config.validate()?;

    Ok(app_config)
}

/// Load configuration, falling back to defaults only when no file was named.
///
/// Runs before logging is set up, so the error that forced a fallback is
/// handed back for the caller to report.
pub fn load_config_or_default(
    config_path: Option<&Path>,
) -> Result<(AppConfig, Option<ConfigError>), ConfigError> {
    fallback_to_defaults(load_config(config_path), config_path.is_some())
}

fn fallback_to_defaults(
    loaded: Result<AppConfig, ConfigError>,
    explicit_path: bool,
) -> Result<(AppConfig, Option<ConfigError>), ConfigError> {
    match loaded {
        Ok(config) => Ok((config, None)),
        Err(e) if !explicit_path => Ok((AppConfig::default(), Some(e))),
        Err(e) => Err(e),
    }
}
