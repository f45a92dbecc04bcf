//! qrbatch runtime configuration handling

use crate::error::{Error, Result};
use crate::qr::{MAX_MODULE_SIZE, QrColor, RenderStyle, parse_ecc_level};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Top-level configuration structure persisted to disk or environment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QrBatchConfig {
    /// Symbol appearance
    pub render: RenderOptions,
    /// Worker pool sizing
    pub pipeline: PipelineOptions,
    /// Where and how results are written
    pub export: ExportOptions,
    /// Logging configuration
    pub logging: LoggingOptions,
}

impl QrBatchConfig {
    /// Load configuration from an explicit path or fall back to discovered defaults.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = explicit_path {
            Self::from_file(path)?
        } else if let Some(path) = Self::discover_file()? {
            tracing::info!("Using configuration file: {}", path.display());
            Self::from_file(&path)?
        } else {
            tracing::debug!("No qrbatch.toml / qrbatch.yaml found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Attempt to locate a configuration file in common locations.
    fn discover_file() -> Result<Option<PathBuf>> {
        let cwd =
            env::current_dir().map_err(|e| Error::Config(format!("Failed to read cwd: {e}")))?;
        for candidate in ["qrbatch.toml", "qrbatch.yaml", "qrbatch.yml"] {
            let path = cwd.join(candidate);
            if path.exists() {
                return Ok(Some(path));
            }
        }

        if let Some(xdg_config) = env::var_os("XDG_CONFIG_HOME") {
            let base = PathBuf::from(xdg_config).join("qrbatch");
            for candidate in ["config.toml", "config.yaml"] {
                let path = base.join(candidate);
                if path.exists() {
                    return Ok(Some(path));
                }
            }
        }

        Ok(None)
    }

    /// Read configuration from a concrete file path.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {e}", path.display())))?;

        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("")
            .to_ascii_lowercase()
            .as_str()
        {
            "toml" => toml::from_str(&contents).map_err(|e| {
                Error::Config(format!("Failed to parse TOML {}: {e}", path.display()))
            }),
            "yaml" | "yml" => serde_yaml::from_str(&contents).map_err(|e| {
                Error::Config(format!("Failed to parse YAML {}: {e}", path.display()))
            }),
            other => Err(Error::Config(format!(
                "Unsupported config format '{}', expected toml/yaml",
                other
            ))),
        }
    }

    /// Apply environment variable overrides after file/default loading.
    fn apply_env_overrides(&mut self) {
        self.render.apply_env_overrides();
        self.pipeline.apply_env_overrides();
        self.export.apply_env_overrides();
        self.logging.apply_env_overrides();
    }
}

/// Symbol appearance as written in config files
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    /// Dark module colour (`#RRGGBB` or `#RRGGBBAA`)
    pub dark_color: String,
    /// Light module colour
    pub light_color: String,
    /// Pixels per module
    pub module_size: u32,
    /// Draw the quiet zone
    pub quiet_zone: bool,
    /// Error-correction level (`L`, `M`, `Q`, `H`)
    pub ecc_level: String,
    /// Optional logo stamped in the centre of every code
    pub logo: Option<PathBuf>,
    /// Logo size as a percentage of the image width
    pub logo_size_percent: u32,
    /// Light frame around the logo, in pixels
    pub logo_border: u32,
    /// Decode every render back and fail items that do not round-trip
    pub verify: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        let style = RenderStyle::default();
        Self {
            dark_color: style.dark.to_string(),
            light_color: style.light.to_string(),
            module_size: style.module_size,
            quiet_zone: style.quiet_zone,
            ecc_level: "H".to_string(),
            logo: None,
            logo_size_percent: style.logo_size_percent,
            logo_border: style.logo_border,
            verify: false,
        }
    }
}

impl RenderOptions {
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(color) = env::var("QRBATCH_DARK_COLOR") {
            self.dark_color = color;
        }
        if let Ok(color) = env::var("QRBATCH_LIGHT_COLOR") {
            self.light_color = color;
        }
        if let Ok(level) = env::var("QRBATCH_ECC_LEVEL") {
            self.ecc_level = level;
        }
        if let Ok(logo) = env::var("QRBATCH_LOGO") {
            if logo.trim().is_empty() {
                self.logo = None;
            } else {
                self.logo = Some(PathBuf::from(logo));
            }
        }
        if let Ok(size) = env::var("QRBATCH_MODULE_SIZE") {
            if let Ok(parsed) = size.parse::<u32>() {
                self.module_size = parsed.max(1);
            }
        }
        if let Ok(verify) = env::var("QRBATCH_VERIFY") {
            if let Some(flag) = parse_flag(&verify) {
                self.verify = flag;
            }
        }
    }

    /// Validate and resolve into a [`RenderStyle`].
    pub fn to_style(&self) -> Result<RenderStyle> {
        if !(1..=100).contains(&self.logo_size_percent) {
            return Err(Error::Config(format!(
                "logo_size_percent must be between 1 and 100, got {}",
                self.logo_size_percent
            )));
        }

        if !(1..=MAX_MODULE_SIZE).contains(&self.module_size) {
            return Err(Error::Config(format!(
                "module_size must be between 1 and {MAX_MODULE_SIZE}, got {}",
                self.module_size
            )));
        }

        Ok(RenderStyle {
            dark: QrColor::parse(&self.dark_color)?,
            light: QrColor::parse(&self.light_color)?,
            module_size: self.module_size,
            quiet_zone: self.quiet_zone,
            ecc_level: parse_ecc_level(&self.ecc_level)?,
            logo_size_percent: self.logo_size_percent,
            logo_border: self.logo_border,
        })
    }
}

/// Worker pool sizing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    /// Worker threads; defaults to the number of available CPUs
    pub workers: Option<usize>,
    /// Result queue bound; defaults to twice the worker count
    pub queue_capacity: Option<usize>,
}

impl PipelineOptions {
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(workers) = env::var("QRBATCH_WORKERS") {
            if let Ok(parsed) = workers.parse::<usize>() {
                self.workers = Some(parsed.max(1));
            }
        }
        if let Ok(capacity) = env::var("QRBATCH_QUEUE_CAPACITY") {
            if let Ok(parsed) = capacity.parse::<usize>() {
                self.queue_capacity = Some(parsed.max(1));
            }
        }
    }
}

/// Output location for rendered codes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    /// Directory PNG files are written to
    pub directory: PathBuf,
    /// Maximum file stem length derived from the source string
    pub max_name_len: usize,
    /// Optional contact sheet combining every code into one image
    pub sheet: Option<PathBuf>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("qrcodes"),
            max_name_len: 100,
            sheet: None,
        }
    }
}

impl ExportOptions {
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(dir) = env::var("QRBATCH_OUTPUT_DIR") {
            self.directory = PathBuf::from(dir);
        }
        if let Ok(sheet) = env::var("QRBATCH_SHEET") {
            if sheet.trim().is_empty() {
                self.sheet = None;
            } else {
                self.sheet = Some(PathBuf::from(sheet));
            }
        }
    }
}

/// Structured logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingOptions {
    /// Default log level (overridable via `QRBATCH_LOG_LEVEL`)
    pub level: String,
    /// Optional log file path for teeing structured logs
    pub file: Option<PathBuf>,
    /// Force ANSI colors in stderr logging
    pub color: bool,
    /// Optional log rotation strategy applied to `file`
    pub rotation: Option<LogRotation>,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            file: None,
            color: true,
            rotation: None,
        }
    }
}

impl LoggingOptions {
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(level) = env::var("QRBATCH_LOG_LEVEL") {
            self.level = level;
        }
        if let Ok(file) = env::var("QRBATCH_LOG_FILE") {
            self.file = Some(PathBuf::from(file));
        }
        if let Ok(color) = env::var("QRBATCH_LOG_COLOR") {
            if let Some(flag) = parse_flag(&color) {
                self.color = flag;
            }
        }
        if let Ok(rotation) = env::var("QRBATCH_LOG_ROTATION") {
            if let Some(parsed) = LogRotation::from_str(&rotation) {
                self.rotation = Some(parsed);
            }
        }
    }
}

/// Supported log rotation policies for file sinks
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    /// Rotate log files once per hour
    Hourly,
    /// Rotate log files once per day
    Daily,
}

impl LogRotation {
    fn from_str(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "hourly" => Some(Self::Hourly),
            "daily" => Some(Self::Daily),
            _ => None,
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qrcode::EcLevel;
    use std::io::Write;

    #[test]
    fn test_default_style_matches_render_defaults() {
        let style = RenderOptions::default().to_style().unwrap();
        assert_eq!(style, RenderStyle::default());
        assert_eq!(style.ecc_level, EcLevel::H);
    }

    #[test]
    fn test_invalid_render_options() {
        let options = RenderOptions {
            dark_color: "#12".to_string(),
            ..RenderOptions::default()
        };
        assert!(matches!(options.to_style(), Err(Error::Config(_))));

        let options = RenderOptions {
            logo_size_percent: 0,
            ..RenderOptions::default()
        };
        assert!(options.to_style().is_err());
    }

    #[test]
    fn test_oversized_module_size_is_rejected() {
        let options = RenderOptions {
            module_size: 200_000,
            ..RenderOptions::default()
        };
        assert!(matches!(options.to_style(), Err(Error::Config(_))));

        let options = RenderOptions {
            module_size: 0,
            ..RenderOptions::default()
        };
        assert!(matches!(options.to_style(), Err(Error::Config(_))));

        let options = RenderOptions {
            module_size: MAX_MODULE_SIZE,
            ..RenderOptions::default()
        };
        assert_eq!(options.to_style().unwrap().module_size, MAX_MODULE_SIZE);
    }

    #[test]
    fn test_parse_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[render]\ndark_color = \"#000000\"\necc_level = \"m\"\n\n[pipeline]\nworkers = 3\n\n[export]\ndirectory = \"out\""
        )
        .unwrap();

        let config = QrBatchConfig::from_file(file.path()).unwrap();
        let style = config.render.to_style().unwrap();
        assert_eq!(style.dark, QrColor::BLACK);
        assert_eq!(style.ecc_level, EcLevel::M);
        assert_eq!(config.pipeline.workers, Some(3));
        assert_eq!(config.export.directory, PathBuf::from("out"));
        assert_eq!(config.export.max_name_len, 100);
    }

    #[test]
    fn test_parse_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "logging:\n  level: debug\n  rotation: daily\nrender:\n  verify: true").unwrap();

        let config = QrBatchConfig::from_file(file.path()).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.rotation, Some(LogRotation::Daily));
        assert!(config.render.verify);
    }

    #[test]
    fn test_unsupported_extension() {
        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        assert!(matches!(
            QrBatchConfig::from_file(file.path()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("ON"), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
