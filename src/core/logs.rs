/// Telegram trace.
///
/// Every frame the engine sends and every telegram it accepts is recorded here, next to the
/// `log` output. Frontends read the trace to show a bus monitor.
use std::collections::VecDeque;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// One recorded bus event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub message: String,
    pub level: LogLevel,
    pub metadata: Option<LogMetadata>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogMetadata {
    /// Bytes on the wire
    Communication {
        direction: CommunicationDirection,
        data: Vec<u8>,
        device_id: Option<u8>,
    },
    /// A device was recognised from its Version telegram
    Discovery { device_id: u8, product_id: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommunicationDirection {
    Inbound,
    Outbound,
}

impl LogEntry {
    pub fn new(message: String, level: LogLevel) -> Self {
        Self {
            timestamp: Local::now(),
            message,
            level,
            metadata: None,
        }
    }

    pub fn with_metadata(message: String, level: LogLevel, metadata: LogMetadata) -> Self {
        Self {
            metadata: Some(metadata),
            ..Self::new(message, level)
        }
    }

    pub fn inbound(message: String, frame: &[u8], device_id: u8) -> Self {
        Self::with_metadata(
            message,
            LogLevel::Info,
            LogMetadata::Communication {
                direction: CommunicationDirection::Inbound,
                data: frame.to_vec(),
                device_id: Some(device_id),
            },
        )
    }

    pub fn outbound(message: String, frame: &[u8], device_id: Option<u8>) -> Self {
        Self::with_metadata(
            message,
            LogLevel::Info,
            LogMetadata::Communication {
                direction: CommunicationDirection::Outbound,
                data: frame.to_vec(),
                device_id,
            },
        )
    }

    pub fn warning(message: String) -> Self {
        Self::new(message, LogLevel::Warning)
    }

    pub fn error(message: String) -> Self {
        Self::new(message, LogLevel::Error)
    }
}

/// Ring of the most recent entries. A capacity of zero disables recording.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    entries: VecDeque<LogEntry>,
    max_entries: usize,
}

impl LogBuffer {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(max_entries.min(256)),
            max_entries,
        }
    }

    pub fn push(&mut self, entry: LogEntry) {
        if self.max_entries == 0 {
            return;
        }
        while self.entries.len() >= self.max_entries {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    /// The last `count` entries, oldest first.
    pub fn recent(&self, count: usize) -> Vec<LogEntry> {
        let skip = self.entries.len().saturating_sub(count);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(200)
    }
}
