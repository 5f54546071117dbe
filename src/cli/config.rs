use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::{path::Path, str::FromStr, time::Duration};

use crate::{
    api::ems::{EmsBuilder, EngineConfig},
    protocol::ems::{codec::ProtocolVariant, devices::DeviceModel, types::ID_ME},
};

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Serial port name
    #[serde(default)]
    pub port_name: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Our own bus id
    #[serde(default = "default_own_id")]
    pub own_id: u8,
    /// 0x00 for Buderus, 0x80 for Junkers style poll addressing
    #[serde(default)]
    pub id_mask: u8,
    #[serde(default)]
    pub protocol: ProtocolVariant,
    #[serde(default = "default_true")]
    pub poll_ack: bool,
    #[serde(default)]
    pub listen_only: bool,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Idle time on the line that ends a frame, in milliseconds
    #[serde(default = "default_frame_gap_ms")]
    pub frame_gap_ms: u64,
    /// Boiler address known ahead of discovery
    #[serde(default)]
    pub boiler_id: Option<u8>,
    /// Thermostat model known ahead of discovery, e.g. `"RC35"`
    #[serde(default)]
    pub thermostat_model: Option<String>,
    #[serde(default = "default_trace_capacity")]
    pub trace_capacity: usize,
    /// Telegram type to follow at info level
    #[serde(default)]
    pub watch_type: Option<u16>,
    #[serde(default = "default_status_interval_secs")]
    pub status_interval_secs: u64,
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_own_id() -> u8 {
    ID_ME
}

fn default_true() -> bool {
    true
}

fn default_queue_capacity() -> usize {
    50
}

fn default_frame_gap_ms() -> u64 {
    20
}

fn default_trace_capacity() -> usize {
    200
}

fn default_status_interval_secs() -> u64 {
    10
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: default_baud_rate(),
            own_id: default_own_id(),
            id_mask: 0x00,
            protocol: ProtocolVariant::default(),
            poll_ack: true,
            listen_only: false,
            queue_capacity: default_queue_capacity(),
            frame_gap_ms: default_frame_gap_ms(),
            boiler_id: None,
            thermostat_model: None,
            trace_capacity: default_trace_capacity(),
            watch_type: None,
            status_interval_secs: default_status_interval_secs(),
        }
    }
}

impl BusConfig {
    /// Parse configuration from a JSON string
    pub fn from_json(json_str: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json_str)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }

    /// Read configuration from a file, TOML for `.toml`, JSON otherwise
    pub fn from_file(file_path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(file_path)
            .map_err(|err| anyhow!("Failed to read {}: {err}", file_path.display()))?;
        let is_toml = file_path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        if is_toml {
            Self::from_toml(&content)
                .map_err(|err| anyhow!("Invalid config {}: {err}", file_path.display()))
        } else {
            Self::from_json(&content)
                .map_err(|err| anyhow!("Invalid config {}: {err}", file_path.display()))
        }
    }

    /// Convert to a JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn thermostat(&self) -> Result<Option<DeviceModel>> {
        self.thermostat_model
            .as_deref()
            .map(|name| {
                DeviceModel::from_str(name)
                    .map_err(|_| anyhow!("Unknown thermostat model {name}"))
            })
            .transpose()
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            own_id: self.own_id,
            id_mask: self.id_mask,
            protocol: self.protocol,
            poll_ack: self.poll_ack,
            listen_only: self.listen_only,
            queue_capacity: self.queue_capacity,
            trace_capacity: self.trace_capacity,
            watch_type: self.watch_type,
        }
    }

    /// Builder carrying everything in this configuration.
    pub fn builder(&self) -> Result<EmsBuilder> {
        let mut builder = EmsBuilder::new()
            .with_port(&self.port_name)
            .with_baud_rate(self.baud_rate)
            .with_frame_gap(Duration::from_millis(self.frame_gap_ms))
            .with_config(self.engine_config());
        if self.status_interval_secs > 0 {
            builder = builder.with_status_interval(Duration::from_secs(self.status_interval_secs));
        }
        if let Some(boiler_id) = self.boiler_id {
            builder = builder.with_boiler(boiler_id);
        }
        if let Some(model) = self.thermostat()? {
            builder = builder.with_thermostat(model);
        }
        Ok(builder)
    }
}
