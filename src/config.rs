//! Configuration using Figment
//!
//! Settings are loaded from:
//! 1. a TOML file (base configuration, every key optional)
//! 2. environment variables prefixed with `TUNELINK_`, with `__` separating
//!    nested keys
//!
//! Missing keys fall back to defaults matching the reference controller
//! (`localhost:9001`, one-second handshake, 30 polls one second apart).
//!
//! # Example
//! ```no_run
//! use tunelink::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_from("tunelink.toml")?;
//! config.validate()?;
//! println!("Controller: {}:{}", config.link.host, config.link.port);
//! # Ok(())
//! # }
//! ```
//!
//! Environment override: `TUNELINK_TUNING__POLL_BUDGET=60`.
//!
//! The core types receive these structs as arguments and never read files or
//! the environment themselves.

use crate::error::{LinkError, LinkResult};
use crate::protocol::DEFAULT_MAX_FRAME_LEN;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "TUNELINK_";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Connection and handshake settings
    pub link: LinkConfig,
    /// Tuning loop settings
    pub tuning: TuningConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

/// Connection and handshake settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Controller host name or address
    pub host: String,
    /// Controller TCP port
    pub port: u16,
    /// Address this client announces in the handshake
    pub identity: String,
    /// Bound on TCP connection establishment
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Bound on the handshake reply
    #[serde(with = "humantime_serde")]
    pub handshake_timeout: Duration,
    /// Largest frame accepted from the controller, in bytes
    pub max_frame_len: usize,
    /// Number of exchanges kept in the diagnostic log
    pub diagnostics_capacity: usize,
    /// Operation names sent on the wire
    pub operations: OperationNames,
}

impl LinkConfig {
    /// `host:port` label used in logs and errors.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 9001,
            identity: "192.168.1.100".to_string(),
            connect_timeout: Duration::from_secs(1),
            handshake_timeout: Duration::from_secs(1),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            diagnostics_capacity: 16,
            operations: OperationNames::default(),
        }
    }
}

/// Wire names of the controller operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationNames {
    /// Link handshake
    pub start_link: String,
    /// Set the wavelength target
    pub set_wave: String,
    /// Poll the tuning state
    pub poll_wave: String,
    /// One-shot beam alignment
    pub beam_alignment: String,
}

impl Default for OperationNames {
    fn default() -> Self {
        Self {
            start_link: "start_link".to_string(),
            set_wave: "set_wave_m".to_string(),
            poll_wave: "poll_wave_m".to_string(),
            beam_alignment: "beam_alignment".to_string(),
        }
    }
}

/// What a poll reply outside the expected states does to a tuning run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollFailurePolicy {
    /// Log the poll as failed and keep polling
    #[default]
    Tolerate,
    /// End the run as rejected with the offending status
    Strict,
}

/// Tuning loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningConfig {
    /// Bound on each set/poll reply
    #[serde(with = "humantime_serde")]
    pub reply_timeout: Duration,
    /// Wait before each poll
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Maximum number of polls per tuning run
    pub poll_budget: u32,
    /// Acceptable distance between target and converged wavelength (nm)
    pub tolerance_nm: f64,
    /// Lower end of the tunable range (nm)
    pub min_nm: f64,
    /// Upper end of the tunable range (nm)
    pub max_nm: f64,
    /// Handling of unexpected poll statuses
    pub poll_failure_policy: PollFailurePolicy,
    /// Wavelength tuned to before beam alignment (nm)
    pub alignment_wavelength_nm: f64,
    /// Mode passed to the beam alignment routine
    pub alignment_mode: u32,
}

impl TuningConfig {
    /// `(min_nm, max_nm)` tuning range.
    pub fn wavelength_range(&self) -> (f64, f64) {
        (self.min_nm, self.max_nm)
    }
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            reply_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_secs(1),
            poll_budget: 30,
            tolerance_nm: 0.1,
            min_nm: 700.0,
            max_nm: 1000.0,
            poll_failure_policy: PollFailurePolicy::Tolerate,
            alignment_wavelength_nm: 780.0,
            alignment_mode: 4,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format (pretty, compact, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a file and `TUNELINK_` environment variables.
    ///
    /// A missing file is not an error; defaults and the environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path.as_ref(), ENV_PREFIX).extract()
    }

    /// Load, then validate.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> LinkResult<Self> {
        let config = Self::load_from(path)?;
        config.validate().map_err(LinkError::Configuration)?;
        Ok(config)
    }

    fn figment(path: &Path, env_prefix: &str) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(env_prefix).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        let link = &self.link;
        if link.host.trim().is_empty() {
            return Err("link.host must not be empty".to_string());
        }
        if link.port == 0 {
            return Err("link.port must be non-zero".to_string());
        }
        if link.identity.trim().is_empty() {
            return Err("link.identity must not be empty".to_string());
        }
        if link.connect_timeout.is_zero() || link.handshake_timeout.is_zero() {
            return Err("link timeouts must be non-zero".to_string());
        }
        if link.max_frame_len == 0 {
            return Err("link.max_frame_len must be non-zero".to_string());
        }

        let ops = &link.operations;
        for (key, name) in [
            ("start_link", &ops.start_link),
            ("set_wave", &ops.set_wave),
            ("poll_wave", &ops.poll_wave),
            ("beam_alignment", &ops.beam_alignment),
        ] {
            if name.trim().is_empty() {
                return Err(format!("link.operations.{} must not be empty", key));
            }
        }

        let tuning = &self.tuning;
        if tuning.reply_timeout.is_zero() {
            return Err("tuning.reply_timeout must be non-zero".to_string());
        }
        if tuning.poll_budget == 0 {
            return Err("tuning.poll_budget must be at least 1".to_string());
        }
        if !(tuning.tolerance_nm.is_finite() && tuning.tolerance_nm >= 0.0) {
            return Err(format!(
                "Invalid tuning.tolerance_nm {}. Must be finite and non-negative",
                tuning.tolerance_nm
            ));
        }
        if !(tuning.min_nm.is_finite() && tuning.max_nm.is_finite() && tuning.min_nm < tuning.max_nm)
        {
            return Err(format!(
                "Invalid tuning range {}-{} nm",
                tuning.min_nm, tuning.max_nm
            ));
        }
        if !(tuning.min_nm..=tuning.max_nm).contains(&tuning.alignment_wavelength_nm) {
            return Err(format!(
                "tuning.alignment_wavelength_nm {} outside tuning range {}-{} nm",
                tuning.alignment_wavelength_nm, tuning.min_nm, tuning.max_nm
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            ));
        }
        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.logging.format.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log format '{}'. Must be one of: {}",
                self.logging.format,
                valid_formats.join(", ")
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_match_reference_controller() {
        let config = Config::default();
        assert_eq!(config.link.endpoint(), "localhost:9001");
        assert_eq!(config.link.identity, "192.168.1.100");
        assert_eq!(config.link.handshake_timeout, Duration::from_secs(1));
        assert_eq!(config.link.operations.set_wave, "set_wave_m");
        assert_eq!(config.tuning.poll_budget, 30);
        assert_eq!(config.tuning.poll_interval, Duration::from_secs(1));
        assert_eq!(config.tuning.poll_failure_policy, PollFailurePolicy::Tolerate);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let file = write_config(
            r#"
            [link]
            host = "10.0.0.5"
            handshake_timeout = "500ms"

            [tuning]
            poll_budget = 5
            poll_failure_policy = "strict"
            "#,
        );

        let config = Config::figment(file.path(), "TUNELINK_TEST_UNUSED_")
            .extract::<Config>()
            .unwrap();

        assert_eq!(config.link.host, "10.0.0.5");
        assert_eq!(config.link.port, 9001);
        assert_eq!(config.link.handshake_timeout, Duration::from_millis(500));
        assert_eq!(config.tuning.poll_budget, 5);
        assert_eq!(config.tuning.poll_failure_policy, PollFailurePolicy::Strict);
        assert_eq!(config.tuning.reply_timeout, Duration::from_secs(2));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::figment(Path::new("/nonexistent/tunelink.toml"), "TUNELINK_TEST_NONE_")
            .extract::<Config>()
            .unwrap();
        assert_eq!(config.link.port, 9001);
    }

    #[test]
    fn shipped_config_matches_defaults() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/tunelink.toml");
        let config = Config::figment(&path, "TUNELINK_TEST_SHIPPED_")
            .extract::<Config>()
            .unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.link.endpoint(), Config::default().link.endpoint());
        assert_eq!(config.link.operations.poll_wave, "poll_wave_m");
        assert_eq!(config.tuning.poll_budget, Config::default().tuning.poll_budget);
        assert_eq!(config.tuning.poll_failure_policy, PollFailurePolicy::Tolerate);
    }

    #[test]
    fn environment_overrides_nested_keys() {
        let prefix = "TUNELINK_TEST_ENV_";
        std::env::set_var("TUNELINK_TEST_ENV_TUNING__POLL_BUDGET", "60");
        std::env::set_var("TUNELINK_TEST_ENV_LINK__PORT", "9100");

        let file = write_config("[tuning]\npoll_budget = 5\n");
        let config = Config::figment(file.path(), prefix).extract::<Config>().unwrap();

        std::env::remove_var("TUNELINK_TEST_ENV_TUNING__POLL_BUDGET");
        std::env::remove_var("TUNELINK_TEST_ENV_LINK__PORT");

        assert_eq!(config.tuning.poll_budget, 60);
        assert_eq!(config.link.port, 9100);
    }

    #[test]
    fn bad_duration_is_a_load_error() {
        let file = write_config("[link]\nconnect_timeout = \"soon\"\n");
        let err = Config::load_validated(file.path()).unwrap_err();
        assert!(matches!(err, LinkError::Config(_)));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let test_cases: Vec<(&str, Box<dyn Fn(&mut Config)>)> = vec![
            ("empty host", Box::new(|c: &mut Config| c.link.host.clear())),
            ("zero port", Box::new(|c: &mut Config| c.link.port = 0)),
            ("empty identity", Box::new(|c: &mut Config| c.link.identity = " ".into())),
            ("zero handshake", Box::new(|c: &mut Config| c.link.handshake_timeout = Duration::ZERO)),
            ("zero frame", Box::new(|c: &mut Config| c.link.max_frame_len = 0)),
            ("empty op", Box::new(|c: &mut Config| c.link.operations.poll_wave.clear())),
            ("zero budget", Box::new(|c: &mut Config| c.tuning.poll_budget = 0)),
            ("zero reply", Box::new(|c: &mut Config| c.tuning.reply_timeout = Duration::ZERO)),
            ("inverted range", Box::new(|c: &mut Config| c.tuning.min_nm = 1200.0)),
            ("negative tolerance", Box::new(|c: &mut Config| c.tuning.tolerance_nm = -0.1)),
            ("bad level", Box::new(|c: &mut Config| c.logging.level = "loud".into())),
            ("bad format", Box::new(|c: &mut Config| c.logging.format = "xml".into())),
        ];

        for (name, mutate) in test_cases {
            let mut config = Config::default();
            mutate(&mut config);
            assert!(config.validate().is_err(), "accepted {}", name);
        }
    }

    #[test]
    fn validation_error_surfaces_as_configuration() {
        let file = write_config("[tuning]\npoll_budget = 0\n");
        let err = Config::load_validated(file.path()).unwrap_err();
        assert!(matches!(err, LinkError::Configuration(_)));
    }
}
