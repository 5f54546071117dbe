use std::fmt;

use super::types::type_name;

/// A decoded, checksummed telegram.
///
/// Built once per received frame and handed to the tx state machine and the dispatcher.
/// Nothing in the engine keeps it past dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Telegram {
    /// Sender id (7 bit).
    pub src: u8,
    /// Receiver id (7 bit). `0x00` is a broadcast.
    pub dest: u8,
    /// Bit 7 of the destination byte: the sender asks `dest` for data.
    pub is_read: bool,
    /// One byte for EMS 1.0 frames, two bytes for EMS+ frames.
    pub type_id: u16,
    pub offset: u8,
    pub data: Vec<u8>,
    /// Header used the EMS+ marker (`>= 0xF0`) at position 2.
    pub extended: bool,
    pub checksum_valid: bool,
    /// Complete frame as received, checksum included.
    pub frame: Vec<u8>,
}

impl Telegram {
    pub fn is_broadcast(&self) -> bool {
        self.dest == 0x00
    }

    /// First payload byte, used when validating a write.
    pub fn first_data_byte(&self) -> Option<u8> {
        self.data.first().copied()
    }

    /// Trailing checksum byte of the original frame.
    pub fn crc(&self) -> u8 {
        self.frame.last().copied().unwrap_or_default()
    }

    /// One-line description in the style of the bus monitor:
    /// `Boiler -> me, type 0x18 (UBAMonitorFast) offset 0, telegram: 08 0B 18 00 .. (CRC=62)`.
    ///
    /// `name_of` resolves device ids to names; unresolved ids are printed in hex.
    pub fn describe(&self, own_id: u8, name_of: impl Fn(u8) -> Option<String>) -> String {
        let label = |id: u8| -> String {
            if id == own_id {
                "me".to_string()
            } else if id == 0x00 {
                "all".to_string()
            } else {
                name_of(id).unwrap_or_else(|| format!("0x{id:02X}"))
            }
        };

        let mut line = format!("{} -> {}", label(self.src), label(self.dest));
        if self.is_read {
            line.push_str(" (read)");
        }
        line.push_str(&format!(", type 0x{:02X}", self.type_id));
        if let Some(name) = type_name(self.type_id) {
            line.push_str(&format!(" ({name})"));
        }
        line.push_str(&format!(" offset {}, telegram: {}", self.offset, self));
        line
    }
}

impl fmt::Display for Telegram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some((crc, body)) = self.frame.split_last() else {
            return Ok(());
        };
        for byte in body {
            write!(f, "{byte:02X} ")?;
        }
        write!(f, "(CRC={crc:02X})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_reply() -> Telegram {
        Telegram {
            src: 0x08,
            dest: 0x0B,
            is_read: false,
            type_id: 0x18,
            offset: 0,
            data: vec![0x2D, 0x01, 0xC2, 0x64, 0x00],
            extended: false,
            checksum_valid: true,
            frame: vec![0x08, 0x0B, 0x18, 0x00, 0x2D, 0x01, 0xC2, 0x64, 0x00, 0x62],
        }
    }

    #[test]
    fn test_display_hex_dump() {
        assert_eq!(
            fast_reply().to_string(),
            "08 0B 18 00 2D 01 C2 64 00 (CRC=62)"
        );
    }

    #[test]
    fn test_describe_resolves_names() {
        let line = fast_reply().describe(0x0B, |id| (id == 0x08).then(|| "Boiler".to_string()));
        assert!(line.starts_with("Boiler -> me, type 0x18 (UBAMonitorFast) offset 0"));
        assert!(line.ends_with("(CRC=62)"));
    }

    #[test]
    fn test_describe_falls_back_to_hex_ids() {
        let mut telegram = fast_reply();
        telegram.src = 0x21;
        telegram.dest = 0x00;
        let line = telegram.describe(0x0B, |_| None);
        assert!(line.starts_with("0x21 -> all"));
    }
}
