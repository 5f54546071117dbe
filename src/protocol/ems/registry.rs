/// Active boiler and thermostat slots, filled in from Version telegrams.
use std::fmt;

use serde::Serialize;

use super::devices::{
    lookup_by_model, lookup_by_product_id, Brand, DeviceKind, DeviceModel, DeviceRecord,
    BOILER_TYPES, THERMOSTAT_TYPES,
};
use super::types::{ID_BOILER, ID_GATEWAY, ID_HEAT_PUMP, ID_SOLAR_MODULE};

/// A device recognised on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveDevice {
    pub kind: DeviceKind,
    pub record: DeviceRecord,
    /// Firmware version as `"%02d.%02d"`, empty until a Version telegram was seen.
    pub version: String,
}

impl ActiveDevice {
    pub fn type_id(&self) -> u8 {
        self.record.type_id
    }

    pub fn model(&self) -> DeviceModel {
        self.record.model
    }
}

impl fmt::Display for ActiveDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [Type ID: 0x{:02X}] Product ID:{}",
            self.record.name, self.record.type_id, self.record.product_id
        )?;
        if !self.version.is_empty() {
            write!(f, " Version:{}", self.version)?;
        }
        Ok(())
    }
}

/// Result of feeding a Version telegram to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionMatch {
    /// A slot was (re)assigned; the caller fetches the device's initial values.
    Assigned(ActiveDevice),
    /// Same device as already assigned.
    AlreadyAssigned(DeviceKind),
    /// Known product, but its slot holds a different device.
    Conflict(DeviceRecord),
    Unknown,
}

/// Copy of the registry state handed out to callers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistrySnapshot {
    pub boiler: Option<ActiveDevice>,
    pub thermostat: Option<ActiveDevice>,
}

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    boiler: Option<ActiveDevice>,
    thermostat: Option<ActiveDevice>,
}

/// `"%02d.%02d"` of the two version bytes.
pub fn format_version(major: u8, minor: u8) -> String {
    format!("{major:02}.{minor:02}")
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn boiler(&self) -> Option<&ActiveDevice> {
        self.boiler.as_ref()
    }

    pub fn thermostat(&self) -> Option<&ActiveDevice> {
        self.thermostat.as_ref()
    }

    /// Whether `src` is the active boiler or the active thermostat.
    pub fn is_active(&self, src: u8) -> bool {
        [self.boiler.as_ref(), self.thermostat.as_ref()]
            .into_iter()
            .flatten()
            .any(|device| device.type_id() == src)
    }

    /// Display name for a bus id, preferring active devices over generic names.
    pub fn name_of(&self, id: u8) -> Option<String> {
        if let Some(device) = [self.boiler.as_ref(), self.thermostat.as_ref()]
            .into_iter()
            .flatten()
            .find(|device| device.type_id() == id)
        {
            return Some(match device.kind {
                DeviceKind::Boiler => "Boiler".to_string(),
                DeviceKind::Thermostat => "Thermostat".to_string(),
            });
        }
        match id {
            ID_BOILER => Some("Boiler".to_string()),
            0x09 => Some("BC10".to_string()),
            0x10 | 0x17 | 0x18 => Some("Thermostat".to_string()),
            ID_SOLAR_MODULE => Some("SM".to_string()),
            ID_HEAT_PUMP => Some("HP".to_string()),
            ID_GATEWAY => Some("Gateway".to_string()),
            _ => None,
        }
    }

    /// Match a Version telegram's product id against the boiler table, then the thermostat
    /// table, and fill the matching slot if it is free or already holds the same address.
    pub fn on_version_telegram(
        &mut self,
        src: u8,
        product_id: u8,
        version: String,
    ) -> VersionMatch {
        if let Some(record) = lookup_by_product_id(BOILER_TYPES, product_id) {
            return Self::assign(&mut self.boiler, DeviceKind::Boiler, src, record, version);
        }
        if let Some(record) = lookup_by_product_id(THERMOSTAT_TYPES, product_id) {
            return Self::assign(
                &mut self.thermostat,
                DeviceKind::Thermostat,
                src,
                record,
                version,
            );
        }
        log::debug!("Unrecognized device 0x{src:02X} with product ID {product_id}");
        VersionMatch::Unknown
    }

    fn assign(
        slot: &mut Option<ActiveDevice>,
        kind: DeviceKind,
        src: u8,
        record: DeviceRecord,
        version: String,
    ) -> VersionMatch {
        match slot {
            Some(active)
                if active.record.product_id == record.product_id
                    && active.type_id() == record.type_id =>
            {
                if active.version.is_empty() {
                    active.version = version;
                }
                VersionMatch::AlreadyAssigned(kind)
            }
            Some(active) if active.type_id() != record.type_id => {
                log::info!(
                    "Ignoring {} (product ID {}) from 0x{src:02X}, active {kind} is {}",
                    record.name,
                    record.product_id,
                    active
                );
                VersionMatch::Conflict(record)
            }
            _ => {
                let device = ActiveDevice {
                    kind,
                    record,
                    version,
                };
                log::info!("{kind} found: {device}");
                *slot = Some(device.clone());
                VersionMatch::Assigned(device)
            }
        }
    }

    /// Preconfigure the boiler address before discovery. Product and version stay unknown
    /// until its Version telegram is read.
    pub fn preset_boiler(&mut self, type_id: u8) {
        self.boiler = Some(ActiveDevice {
            kind: DeviceKind::Boiler,
            record: DeviceRecord {
                model: DeviceModel::Uba,
                product_id: 0,
                type_id,
                name: "Boiler",
                brand: Brand::Unknown,
                read_supported: true,
                write_supported: true,
            },
            version: String::new(),
        });
    }

    /// Preconfigure the thermostat by model. Returns `false` for models not in the table.
    pub fn preset_thermostat(&mut self, model: DeviceModel) -> bool {
        match lookup_by_model(THERMOSTAT_TYPES, model) {
            Some(record) => {
                self.thermostat = Some(ActiveDevice {
                    kind: DeviceKind::Thermostat,
                    record,
                    version: String::new(),
                });
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.boiler = None;
        self.thermostat = None;
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            boiler: self.boiler.clone(),
            thermostat: self.thermostat.clone(),
        }
    }
}
