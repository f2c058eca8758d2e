//! Server configuration, loaded from a TOML file.
//!
//! Every key is optional; defaults follow the protocol defaults
//! (16384-byte PDUs, 60 s idle timeout, 1000-entry query cache
//! with a 5 minute TTL).

use pacs_engine::{
    BackpressurePolicy, EngineConfig, MoveDestination, PipelineConfig, Stage,
};
use serde::Deserialize;
use snafu::{ResultExt, Snafu};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("could not read configuration file `{}`", path))]
    ReadFile {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("could not parse configuration file `{}`", path))]
    ParseFile {
        path: String,
        source: toml::de::Error,
    },

    #[snafu(display("unknown pipeline stage `{}`", name))]
    UnknownStage { name: String },
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackpressureMode {
    Block,
    Drop,
    ShedOldest,
}

impl From<BackpressureMode> for BackpressurePolicy {
    fn from(mode: BackpressureMode) -> Self {
        match mode {
            BackpressureMode::Block => BackpressurePolicy::Block,
            BackpressureMode::Drop => BackpressurePolicy::Drop,
            BackpressureMode::ShedOldest => BackpressurePolicy::ShedOldest,
        }
    }
}

/// Per-stage overrides.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct StageOptions {
    pub workers: Option<usize>,
    pub queue_capacity: Option<usize>,
    pub backpressure: Option<BackpressureMode>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct MoveDestinationEntry {
    pub ae_title: String,
    pub host: String,
    pub port: u16,
}

/// The server configuration file.
#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_ae_title")]
    pub ae_title: String,
    #[serde(default = "default_max_pdu_length")]
    pub max_pdu_length: u32,
    /// seconds of silence before an association is aborted
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    /// seconds a cached query result stays valid
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: u64,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_storage_dir")]
    pub storage_dir: String,
    /// supported transfer syntax UIDs, in preference order
    #[serde(default)]
    pub local_transfer_syntaxes: Vec<String>,
    #[serde(default)]
    pub promiscuous: bool,
    /// per-stage worker/queue/backpressure overrides,
    /// keyed by stage name
    #[serde(default)]
    pub stages: HashMap<String, StageOptions>,
    #[serde(default)]
    pub move_destinations: Vec<MoveDestinationEntry>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            ae_title: default_ae_title(),
            max_pdu_length: default_max_pdu_length(),
            idle_timeout: default_idle_timeout(),
            cache_capacity: default_cache_capacity(),
            cache_ttl: default_cache_ttl(),
            db_path: default_db_path(),
            storage_dir: default_storage_dir(),
            local_transfer_syntaxes: Vec::new(),
            promiscuous: false,
            stages: HashMap::new(),
            move_destinations: Vec::new(),
        }
    }
}

fn default_ae_title() -> String {
    "PACS-RS".to_string()
}

fn default_max_pdu_length() -> u32 {
    16_384
}

fn default_idle_timeout() -> u64 {
    60
}

fn default_cache_capacity() -> usize {
    1000
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_db_path() -> String {
    "pacs-index.db".to_string()
}

fn default_storage_dir() -> String {
    "storage".to_string()
}

fn stage_by_name(name: &str) -> Option<Stage> {
    match name {
        "network_receive" => Some(Stage::NetworkReceive),
        "pdu_decode" => Some(Stage::PduDecode),
        "dimse_process" => Some(Stage::DimseProcess),
        "execute" => Some(Stage::Execute),
        "response_encode" => Some(Stage::ResponseEncode),
        "network_send" => Some(Stage::NetworkSend),
        _ => None,
    }
}

impl ServerConfig {
    /// Load the configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).context(ReadFileSnafu {
            path: path.display().to_string(),
        })?;
        let config: ServerConfig = toml::from_str(&text).context(ParseFileSnafu {
            path: path.display().to_string(),
        })?;
        // surface stage name typos at startup, not at first overload
        for name in config.stages.keys() {
            if stage_by_name(name).is_none() {
                return Err(ConfigError::UnknownStage { name: name.clone() });
            }
        }
        Ok(config)
    }

    /// Translate to the engine's configuration.
    pub fn to_engine_config(&self) -> EngineConfig {
        let mut pipeline = PipelineConfig::default();
        for (name, options) in &self.stages {
            // validated at load time
            let Some(stage) = stage_by_name(name) else {
                continue;
            };
            if let Some(workers) = options.workers {
                pipeline.workers[stage.index()] = workers;
            }
            if let Some(capacity) = options.queue_capacity {
                pipeline.queue_capacity[stage.index()] = capacity;
            }
            if let Some(mode) = options.backpressure {
                pipeline.backpressure[stage.index()] = mode.into();
            }
        }

        let mut engine = EngineConfig {
            ae_title: self.ae_title.clone(),
            max_pdu_length: self.max_pdu_length.max(4096),
            idle_timeout: Duration::from_secs(self.idle_timeout),
            cache_capacity: self.cache_capacity,
            cache_ttl: Duration::from_secs(self.cache_ttl),
            pipeline,
            promiscuous: self.promiscuous,
            move_destinations: self
                .move_destinations
                .iter()
                .map(|d| MoveDestination {
                    ae_title: d.ae_title.clone(),
                    host: d.host.clone(),
                    port: d.port,
                })
                .collect(),
            ..EngineConfig::default()
        };
        if !self.local_transfer_syntaxes.is_empty() {
            engine.transfer_syntaxes = self.local_transfer_syntaxes.clone();
        }
        engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_apply_when_file_is_minimal() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "ae_title = \"MY-PACS\"").unwrap();

        let config = ServerConfig::load(file.path()).unwrap();
        assert_eq!(config.ae_title, "MY-PACS");
        assert_eq!(config.max_pdu_length, 16_384);
        assert_eq!(config.idle_timeout, 60);
        assert_eq!(config.cache_capacity, 1000);
        assert_eq!(config.cache_ttl, 300);
    }

    #[test]
    fn stage_overrides_are_applied() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[stages.execute]\nworkers = 8\nqueue_capacity = 512\n\n\
             [stages.network_send]\nbackpressure = \"shed_oldest\"\nqueue_capacity = 64"
        )
        .unwrap();

        let config = ServerConfig::load(file.path()).unwrap();
        let engine = config.to_engine_config();
        assert_eq!(engine.pipeline.workers[Stage::Execute.index()], 8);
        assert_eq!(engine.pipeline.queue_capacity[Stage::Execute.index()], 512);
        assert_eq!(
            engine.pipeline.queue_capacity[Stage::NetworkSend.index()],
            64
        );
        assert_eq!(
            engine.pipeline.backpressure[Stage::NetworkSend.index()],
            BackpressurePolicy::ShedOldest
        );
    }

    #[test]
    fn unknown_stage_name_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[stages.render]\nworkers = 2").unwrap();
        let err = ServerConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownStage { .. }), "{err}");
    }

    #[test]
    fn max_pdu_is_clamped_to_standard_minimum() {
        let config = ServerConfig {
            max_pdu_length: 512,
            ..ServerConfig::default()
        };
        assert_eq!(config.to_engine_config().max_pdu_length, 4096);
    }

    #[test]
    fn move_destinations_carry_over() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[[move_destinations]]\nae_title = \"DEST\"\nhost = \"10.0.0.9\"\nport = 104"
        )
        .unwrap();
        let engine = ServerConfig::load(file.path()).unwrap().to_engine_config();
        assert_eq!(engine.move_destinations.len(), 1);
        assert_eq!(engine.move_destinations[0].ae_title, "DEST");
    }
}
