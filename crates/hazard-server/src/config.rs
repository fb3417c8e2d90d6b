//! Server configuration
//!
//! Defaults are overridden by an optional `hazard.toml` (or any format the
//! `config` crate reads) and then by `HAZARD_*` environment variables, with
//! `__` separating nested keys, e.g. `HAZARD_DB__KEYSPACE`.

use config::{Config, ConfigError, Environment, File};
use hazard_core::{CameraId, ProjectionConfig, ZoneTable};
use hazard_db::DbConfig;
use hazard_tracker::RunwayConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_host: String,
    pub intake_port: u16,
    pub admin_port: u16,
    pub bird_port: u16,
    pub pilot_port: u16,
    /// Health and metrics HTTP port
    pub ops_port: u16,
    /// Cameras shown by `MC_CA` and `MC_CB`
    pub camera_a: String,
    pub camera_b: String,
    pub access_ttl_secs: u64,
    /// Frames retained per camera
    pub frame_capacity: usize,
    pub playback_interval_ms: u64,
    pub calibration_queue: usize,
    pub persist_queue: usize,
    pub reconnect_interval_secs: u64,
    /// Alerted objects unseen this long may alert again
    pub alert_idle_ttl_secs: u64,
    pub runway: RunwayConfig,
    pub projection: ProjectionConfig,
    pub zones: ZoneTable,
    pub db: DbConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            intake_port: 9000,
            admin_port: 9001,
            bird_port: 9002,
            pilot_port: 9003,
            ops_port: 9100,
            camera_a: "A".to_string(),
            camera_b: "B".to_string(),
            access_ttl_secs: 300,
            frame_capacity: hazard_tracker::DEFAULT_FRAME_CAPACITY,
            playback_interval_ms: 100,
            calibration_queue: 16,
            persist_queue: 256,
            reconnect_interval_secs: 10,
            alert_idle_ttl_secs: 24 * 60 * 60,
            runway: RunwayConfig::default(),
            projection: ProjectionConfig::default(),
            zones: ZoneTable::default(),
            db: DbConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load `.env`, the optional config file and the environment
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Config::builder()
            .add_source(File::with_name("hazard").required(false))
            .add_source(
                Environment::with_prefix("HAZARD")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("db.hosts"),
            )
            .build()?
            .try_deserialize()
    }

    pub fn addr(&self, port: u16) -> String {
        format!("{}:{}", self.bind_host, port)
    }

    pub fn access_ttl(&self) -> Duration {
        Duration::from_secs(self.access_ttl_secs)
    }

    pub fn playback_interval(&self) -> Duration {
        Duration::from_millis(self.playback_interval_ms.max(1))
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs.max(1))
    }

    pub fn alert_idle_ttl(&self) -> Duration {
        Duration::from_secs(self.alert_idle_ttl_secs)
    }

    pub fn camera_a(&self) -> CameraId {
        CameraId::new(self.camera_a.clone())
    }

    pub fn camera_b(&self) -> CameraId {
        CameraId::new(self.camera_b.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.addr(config.admin_port), "0.0.0.0:9001");
        assert_eq!(config.access_ttl(), Duration::from_secs(300));
        assert_eq!(config.frame_capacity, 64);
        assert_eq!(config.alert_idle_ttl(), Duration::from_secs(86_400));
        assert_eq!(config.runway.clear_delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hazard.toml");
        std::fs::write(&path, "admin_port = 7001\n[db]\nkeyspace = \"test_ks\"\n").unwrap();

        let config: ServerConfig = Config::builder()
            .add_source(File::from(path))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.admin_port, 7001);
        assert_eq!(config.intake_port, 9000);
        assert_eq!(config.db.keyspace, "test_ks");
        assert_eq!(config.zones.zones.len(), 8);
    }
}
