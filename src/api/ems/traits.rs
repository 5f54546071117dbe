/// Collaborator traits of the EMS engine.
///
/// The engine owns none of the I/O. It talks to the line through a [`Transport`], hands
/// decoded telegrams to [`TelegramHandler`]s and asks a [`FetchPlan`] what to read from a
/// freshly discovered device. [`EmsHook`]s observe everything without influencing it.
use anyhow::Result;

use crate::protocol::ems::{
    devices::{DeviceKind, DeviceModel},
    error::TxError,
    registry::ActiveDevice,
    telegram::Telegram,
    types::*,
};

/// Outgoing half of the byte-level transport.
pub trait Transport: Send {
    /// Write `bytes` and terminate them with a break.
    fn transmit(&mut self, bytes: &[u8]) -> Result<()>;
}

/// Consumer of one telegram type.
///
/// Receives `(src, dest, type, offset, data)` and returns whether tracked state changed.
pub trait TelegramHandler: Send + Sync {
    fn handle(&self, src: u8, dest: u8, type_id: u16, offset: u8, data: &[u8]) -> bool;
}

impl<F> TelegramHandler for F
where
    F: Fn(u8, u8, u16, u8, &[u8]) -> bool + Send + Sync,
{
    fn handle(&self, src: u8, dest: u8, type_id: u16, offset: u8, data: &[u8]) -> bool {
        self(src, dest, type_id, offset, data)
    }
}

/// Decides which types to read once a device is recognised.
pub trait FetchPlan: Send {
    fn initial_reads(&self, device: &ActiveDevice) -> Vec<u16>;
}

/// Observer of engine activity.
pub trait EmsHook: Send + Sync {
    fn on_telegram(&self, _telegram: &Telegram) {}
    fn on_transmit(&self, _bytes: &[u8]) {}
    fn on_device_found(&self, _device: &ActiveDevice) {}
    fn on_tx_error(&self, _error: &TxError) {}
}

/// Reads the monitor and parameter blocks of a boiler, and the status and settings blocks of
/// the thermostat models that support reading, followed by the thermostat clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFetchPlan;

impl FetchPlan for DefaultFetchPlan {
    fn initial_reads(&self, device: &ActiveDevice) -> Vec<u16> {
        match device.kind {
            DeviceKind::Boiler => vec![
                TYPE_UBA_MONITOR_FAST,
                TYPE_UBA_MONITOR_SLOW,
                TYPE_UBA_PARAMETER_WW,
                TYPE_UBA_PARAMETERS,
                TYPE_UBA_TOTAL_UPTIME,
            ],
            DeviceKind::Thermostat if !device.record.read_supported => Vec::new(),
            DeviceKind::Thermostat => {
                let mut types = match device.model() {
                    DeviceModel::Rc20 => vec![TYPE_RC20_STATUS, TYPE_RC20_SET],
                    DeviceModel::Rc30 => vec![TYPE_RC30_STATUS, TYPE_RC30_SET],
                    DeviceModel::Rc35 | DeviceModel::Es73 => {
                        vec![TYPE_RC35_STATUS, TYPE_RC35_SET]
                    }
                    DeviceModel::Easy | DeviceModel::BoschEasy => vec![TYPE_EASY_STATUS],
                    _ => Vec::new(),
                };
                types.push(TYPE_RC_TIME);
                types
            }
        }
    }
}

/// No-op handler and hook (useful for testing)
pub struct NoOpHandler;

impl TelegramHandler for NoOpHandler {
    fn handle(&self, _src: u8, _dest: u8, _type_id: u16, _offset: u8, _data: &[u8]) -> bool {
        false
    }
}

impl EmsHook for NoOpHandler {}

/// Logging handler and hook that writes everything to the `log` facade
pub struct LoggingHandler;

impl TelegramHandler for LoggingHandler {
    fn handle(&self, src: u8, dest: u8, type_id: u16, offset: u8, data: &[u8]) -> bool {
        log::info!(
            "Telegram: src=0x{src:02X}, dest=0x{dest:02X}, type=0x{type_id:02X}, offset={offset}, data={data:02X?}"
        );
        false
    }
}

impl EmsHook for LoggingHandler {
    fn on_transmit(&self, bytes: &[u8]) {
        log::debug!("Sending: {bytes:02X?}");
    }

    fn on_device_found(&self, device: &ActiveDevice) {
        log::info!("Device found: {device}");
    }

    fn on_tx_error(&self, error: &TxError) {
        log::warn!("Tx error: {error}");
    }
}
