/// Bus-wide constants: device ids, telegram type ids and single-byte control codes.
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// "No device". Never a valid destination.
pub const ID_NONE: u8 = 0x00;
/// Our own device id on the bus (service key / gateway slot).
pub const ID_ME: u8 = 0x0B;
pub const ID_BOILER: u8 = 0x08;
pub const ID_SOLAR_MODULE: u8 = 0x30;
pub const ID_HEAT_PUMP: u8 = 0x38;
pub const ID_GATEWAY: u8 = 0x48;

/// Bit 7 of the destination byte marks a read request. Poll bytes carry it as well.
pub const READ_FLAG: u8 = 0x80;
/// Lower seven bits of an address byte.
pub const ID_MASK: u8 = 0x7F;

/// Number of bytes asked for by a plain read request.
pub const MAX_TELEGRAM_LENGTH: u8 = 0x20;
/// A validate reads back exactly one byte.
pub const VALIDATE_LENGTH: u8 = 0x01;

/// How often a mismatching read or validate is re-sent before it is dropped.
pub const MAX_RETRIES: u8 = 2;

/// Marker byte values at position 2 that announce an extended (EMS+) header.
pub const EXTENDED_MARKER_MIN: u8 = 0xF0;
pub const EXTENDED_MARKER_FF: u8 = 0xFF;

pub const TYPE_NONE: u16 = 0x00;
pub const TYPE_VERSION: u16 = 0x02;
pub const TYPE_RC_TIME: u16 = 0x06;
pub const TYPE_UBA_DEVICES: u16 = 0x07;
pub const TYPE_EASY_STATUS: u16 = 0x0A;
pub const TYPE_UBA_TOTAL_UPTIME: u16 = 0x14;
pub const TYPE_UBA_MAINTENANCE_SETTINGS: u16 = 0x15;
pub const TYPE_UBA_PARAMETERS: u16 = 0x16;
pub const TYPE_UBA_MONITOR_FAST: u16 = 0x18;
pub const TYPE_UBA_MONITOR_SLOW: u16 = 0x19;
pub const TYPE_UBA_SET_POINTS: u16 = 0x1A;
pub const TYPE_UBA_FUNCTION_TEST: u16 = 0x1D;
pub const TYPE_UBA_PARAMETER_WW: u16 = 0x33;
pub const TYPE_UBA_MONITOR_WW: u16 = 0x34;
pub const TYPE_RC35_SET: u16 = 0x3D;
pub const TYPE_RC35_STATUS: u16 = 0x3E;
pub const TYPE_RC30_STATUS: u16 = 0x41;
pub const TYPE_RC20_STATUS: u16 = 0x91;
pub const TYPE_RC30_SET: u16 = 0xA7;
pub const TYPE_RC20_SET: u16 = 0xA8;
pub const TYPE_RC_OUTDOOR_TEMP: u16 = 0xA3;
pub const TYPE_RC10_SET: u16 = 0xB0;
pub const TYPE_RC10_STATUS: u16 = 0xB1;

/// Human readable name of the well-known telegram types, used in traces.
pub fn type_name(type_id: u16) -> Option<&'static str> {
    let name = match type_id {
        TYPE_VERSION => "Version",
        TYPE_RC_TIME => "RCTime",
        TYPE_UBA_DEVICES => "UBADevices",
        TYPE_EASY_STATUS => "EasyStatusMessage",
        TYPE_UBA_TOTAL_UPTIME => "UBATotalUptimeMessage",
        TYPE_UBA_MAINTENANCE_SETTINGS => "UBAMaintenanceSettingsMessage",
        TYPE_UBA_PARAMETERS => "UBAParametersMessage",
        TYPE_UBA_MONITOR_FAST => "UBAMonitorFast",
        TYPE_UBA_MONITOR_SLOW => "UBAMonitorSlow",
        TYPE_UBA_SET_POINTS => "UBASetPoints",
        TYPE_UBA_FUNCTION_TEST => "UBAFunctionTest",
        TYPE_UBA_PARAMETER_WW => "UBAParameterWW",
        TYPE_UBA_MONITOR_WW => "UBAMonitorWWMessage",
        TYPE_RC35_SET => "RC35Set_HC1",
        TYPE_RC35_STATUS => "RC35StatusMessage_HC1",
        TYPE_RC30_STATUS => "RC30StatusMessage",
        TYPE_RC20_STATUS => "RC20StatusMessage",
        TYPE_RC30_SET => "RC30Set",
        TYPE_RC20_SET => "RC20Set",
        TYPE_RC_OUTDOOR_TEMP => "RCOutdoorTempMessage",
        TYPE_RC10_SET => "RC10Set",
        TYPE_RC10_STATUS => "RC10StatusMessage",
        _ => return None,
    };
    Some(name)
}

/// Single-byte replies a device sends after one of our writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum ControlByte {
    WriteAck = 0x01,
    WriteNack = 0x04,
}

/// Poll byte the master uses to hand the bus to `own_id`.
///
/// Some bus generations address polls without the read flag. `id_mask` is XOR-ed onto the
/// byte so both variants can be matched.
pub fn poll_byte(own_id: u8, id_mask: u8) -> u8 {
    (own_id | READ_FLAG) ^ id_mask
}

/// The byte we answer a poll with when there is nothing queued.
pub fn poll_ack_byte(own_id: u8, id_mask: u8) -> u8 {
    own_id ^ id_mask
}
