//! Server configuration.
//!
//! Values come from an optional JSON file; anything missing falls back to
//! the defaults below. Command line flags are applied on top by `main`.

use serde::Deserialize;
use shared::{PLAYER_SPEED, WORLD_HEIGHT, WORLD_WIDTH};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to
    pub host: String,
    /// WebSocket port
    pub port: u16,
    /// Ticks per second
    pub tick_rate: u32,
    /// Maximum number of concurrent sessions
    pub max_clients: usize,
    /// Frames that may queue per connection before new ones are dropped
    pub outbound_buffer: usize,
    /// Upper bound on the simulation step, in seconds
    pub max_delta: f32,
    pub world: WorldConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            tick_rate: 30,
            max_clients: 64,
            outbound_buffer: 64,
            max_delta: 1.0 / 20.0,
            world: WorldConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    pub width: f32,
    pub height: f32,
    /// Vertical acceleration applied to airborne bodies. Zero for a top-down world.
    pub gravity: f32,
    pub max_speed: f32,
    pub obstacles: Vec<ObstacleConfig>,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            width: WORLD_WIDTH,
            height: WORLD_HEIGHT,
            gravity: 0.0,
            max_speed: PLAYER_SPEED,
            obstacles: Vec::new(),
        }
    }
}

/// A static box, positioned by its center.
#[derive(Debug, Clone, Deserialize)]
pub struct ObstacleConfig {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl ServerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&contents)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate == 0 {
            return Err(ConfigError::Invalid("tick_rate must be positive".into()));
        }
        if self.max_clients == 0 {
            return Err(ConfigError::Invalid("max_clients must be positive".into()));
        }
        if self.outbound_buffer == 0 {
            return Err(ConfigError::Invalid(
                "outbound_buffer must be positive".into(),
            ));
        }
        if self.max_delta.is_nan() || self.max_delta <= 0.0 {
            return Err(ConfigError::Invalid("max_delta must be positive".into()));
        }
        if self.world.width.is_nan()
            || self.world.height.is_nan()
            || self.world.width <= 0.0
            || self.world.height <= 0.0
        {
            return Err(ConfigError::Invalid("world size must be positive".into()));
        }
        Ok(())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.address(), "127.0.0.1:8080");
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = ServerConfig::from_json(r#"{ "port": 9001 }"#).unwrap();
        assert_eq!(config.port, 9001);
        assert_eq!(config.tick_rate, 30);
        assert_eq!(config.world.width, WORLD_WIDTH);
    }

    #[test]
    fn test_world_section() {
        let json = r#"{
            "tick_rate": 60,
            "world": {
                "gravity": -980.0,
                "obstacles": [{ "x": 400.0, "y": 10.0, "width": 800.0, "height": 20.0 }]
            }
        }"#;
        let config = ServerConfig::from_json(json).unwrap();
        assert_eq!(config.tick_rate, 60);
        assert_eq!(config.world.gravity, -980.0);
        assert_eq!(config.world.obstacles.len(), 1);
        assert_eq!(config.world.height, WORLD_HEIGHT);
    }

    #[test]
    fn test_malformed_json() {
        let result = ServerConfig::from_json("{ port: ");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_zero_tick_rate_rejected() {
        let result = ServerConfig::from_json(r#"{ "tick_rate": 0 }"#);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = ServerConfig::load("/nonexistent/world-server.json");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_tick_duration() {
        let mut config = ServerConfig::default();
        config.tick_rate = 50;
        assert_eq!(config.tick_duration().as_millis(), 20);
    }
}
