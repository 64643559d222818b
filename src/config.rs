use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

use crate::coordinator::CoordinatorConfig;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    /// Durable store; when absent the coordinator keeps reports in memory only
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub motion: MotionConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address the coordinator binds to
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Reports per run accumulated before one bulk insert
    pub batch_threshold: usize,
    /// Most recent reports handed to a (re)connecting agent
    pub resync_window: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            batch_threshold: 20,
            resync_window: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Interval between ticks in milliseconds
    pub tick_interval_ms: u64,
    /// Ticks needed to cross one route segment
    pub steps_per_segment: u32,
    /// Altitude gained per tick while ascending (meters)
    pub climb_step_m: f64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            steps_per_segment: 10,
            climb_step_m: 5.0,
        }
    }
}

/// Fluctuation ranges and starting values for simulated telemetry
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub altitude_jitter_m: f64,
    pub speed_jitter_mps: f64,
    pub temperature_jitter_c: f64,
    pub current_jitter_a: f64,
    pub voltage_jitter_v: f64,
    pub battery_jitter_pct: f64,
    /// Battery consumed per tick before fluctuation
    pub battery_drain_pct: f64,
    pub initial_battery_pct: f64,
    pub initial_temperature_c: f64,
    pub initial_current_a: f64,
    pub initial_voltage_v: f64,
    /// Optional RNG seed for reproducible runs
    pub seed: Option<u64>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            altitude_jitter_m: 0.5,
            speed_jitter_mps: 0.2,
            temperature_jitter_c: 0.3,
            current_jitter_a: 0.5,
            voltage_jitter_v: 0.1,
            battery_jitter_pct: 0.05,
            battery_drain_pct: 0.2,
            initial_battery_pct: 100.0,
            initial_temperature_c: 25.0,
            initial_current_a: 12.0,
            initial_voltage_v: 22.2,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub enabled: bool,
    /// Base URL of the scoring service
    pub url: String,
    pub timeout_ms: u64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "http://127.0.0.1:5000".to_string(),
            timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Coordinator WebSocket base URL (e.g. ws://host:8080)
    pub coordinator_url: String,
    pub reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
    pub heartbeat_interval_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            coordinator_url: "ws://127.0.0.1:8080".to_string(),
            reconnect_delay_ms: 1000,
            max_reconnect_delay_ms: 30_000,
            heartbeat_interval_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: None,
            coordinator: CoordinatorConfig::default(),
            buffer: BufferConfig::default(),
            motion: MotionConfig::default(),
            telemetry: TelemetryConfig::default(),
            scoring: ScoringConfig::default(),
            agent: AgentConfig::default(),
            logging: LoggingConfig {
                level: default_log_level(),
                json: false,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("FIELDRUN_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (FIELDRUN_BUFFER__BATCH_THRESHOLD, etc.)
            .add_source(
                Environment::with_prefix("FIELDRUN")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.motion.steps_per_segment == 0 {
            errors.push("motion.steps_per_segment must be positive".to_string());
        }
        if self.motion.tick_interval_ms == 0 {
            errors.push("motion.tick_interval_ms must be positive".to_string());
        }
        if self.motion.climb_step_m <= 0.0 {
            errors.push("motion.climb_step_m must be positive".to_string());
        }

        if self.buffer.batch_threshold == 0 {
            errors.push("buffer.batch_threshold must be positive".to_string());
        }
        if self.buffer.resync_window == 0 {
            errors.push("buffer.resync_window must be positive".to_string());
        }

        if self.telemetry.battery_drain_pct < 0.0 {
            errors.push("telemetry.battery_drain_pct must not be negative".to_string());
        }
        if !(0.0..=100.0).contains(&self.telemetry.initial_battery_pct) {
            errors.push("telemetry.initial_battery_pct must be between 0 and 100".to_string());
        }

        if self.coordinator.heartbeat_timeout_ms == 0 {
            errors.push("coordinator.heartbeat_timeout_ms must be positive".to_string());
        }

        if self.agent.reconnect_delay_ms > self.agent.max_reconnect_delay_ms {
            errors.push(
                "agent.reconnect_delay_ms should not exceed agent.max_reconnect_delay_ms"
                    .to_string(),
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_reports_every_problem() {
        let mut cfg = AppConfig::default();
        cfg.motion.steps_per_segment = 0;
        cfg.buffer.batch_threshold = 0;

        let errors = cfg.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("steps_per_segment"));
        assert!(errors[1].contains("batch_threshold"));
    }

    #[test]
    fn test_load_from_missing_dir_uses_defaults() {
        let cfg = AppConfig::load_from("/nonexistent/fieldrun-config").unwrap();
        assert_eq!(cfg.buffer.batch_threshold, 20);
        assert_eq!(cfg.motion.steps_per_segment, 10);
        assert!(cfg.database.is_none());
    }
}
