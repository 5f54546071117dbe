/// Outgoing request queue.
///
/// Requests leave the queue only from the head. Retries and validates stay at (or go back to)
/// the head, so one logical exchange finishes before the next one starts.
use std::{collections::VecDeque, fmt};

use chrono::{DateTime, Local};
use serde::Serialize;
use strum::Display;

use super::{
    error::TxError,
    header::encode_header,
    types::{ID_NONE, MAX_TELEGRAM_LENGTH, TYPE_NONE, VALIDATE_LENGTH},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
pub enum TxAction {
    Read,
    Write,
    Validate,
    Raw,
}

/// What to check after a write has been acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Validation {
    pub compare_offset: u8,
    pub compare_value: u8,
    /// Type refreshed once the write is confirmed.
    pub post_read_type: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxRequest {
    pub action: TxAction,
    pub dest: u8,
    pub type_id: u16,
    pub offset: u8,
    /// Write payload, or the complete frame body of a raw request.
    pub payload: Vec<u8>,
    pub validation: Option<Validation>,
    pub force_refresh: bool,
    pub retry_count: u8,
    /// Offset of the original write, kept while the request is a validate.
    write_offset: u8,
    pub queued_at: DateTime<Local>,
}

impl TxRequest {
    pub fn read(type_id: u16, dest: u8, force_refresh: bool) -> Self {
        Self::new(TxAction::Read, dest, type_id, 0, Vec::new(), force_refresh)
    }

    /// A write that is confirmed by reading back the written byte once the device acknowledged
    /// it. `validate_type` enables the confirmation and is the type refreshed afterwards;
    /// `None` (or the "none" type) makes the write fire and forget.
    pub fn write(
        type_id: u16,
        dest: u8,
        offset: u8,
        payload: Vec<u8>,
        validate_type: Option<u16>,
    ) -> Self {
        let compare_value = payload.first().copied().unwrap_or_default();
        let mut request = Self::new(TxAction::Write, dest, type_id, offset, payload, false);
        request.validation = validate_type
            .filter(|&t| t != TYPE_NONE)
            .map(|validate_type| Validation {
                compare_offset: offset,
                compare_value,
                post_read_type: validate_type,
            });
        request
    }

    /// Bytes sent verbatim with a checksum appended.
    pub fn raw(bytes: Vec<u8>) -> Self {
        let dest = bytes.get(1).copied().unwrap_or(ID_NONE);
        let type_id = bytes.get(2).copied().unwrap_or_default() as u16;
        Self::new(TxAction::Raw, dest, type_id, 0, bytes, false)
    }

    fn new(
        action: TxAction,
        dest: u8,
        type_id: u16,
        offset: u8,
        payload: Vec<u8>,
        force_refresh: bool,
    ) -> Self {
        Self {
            action,
            dest,
            type_id,
            offset,
            payload,
            validation: None,
            force_refresh,
            retry_count: 0,
            write_offset: offset,
            queued_at: Local::now(),
        }
    }

    /// Refresh a different type than the one validated once the write is confirmed.
    pub fn with_post_read(mut self, post_read_type: u16) -> Self {
        if let Some(validation) = self.validation.as_mut() {
            validation.post_read_type = post_read_type;
        }
        self
    }

    /// Reject requests the bus could never answer.
    pub fn check(&self) -> Result<(), TxError> {
        match self.action {
            TxAction::Raw if self.payload.is_empty() => Err(TxError::InvalidRequest {
                reason: "raw telegram is empty",
            }),
            TxAction::Raw => Ok(()),
            _ if self.dest == ID_NONE => Err(TxError::InvalidRequest {
                reason: "destination is none",
            }),
            _ if self.type_id == TYPE_NONE => Err(TxError::InvalidRequest {
                reason: "type is none",
            }),
            TxAction::Write if self.payload.is_empty() => Err(TxError::InvalidRequest {
                reason: "write without payload",
            }),
            _ => Ok(()),
        }
    }

    /// Header and payload as they go on the wire, checksum excluded.
    pub fn encode(&self, own_id: u8) -> Vec<u8> {
        match self.action {
            TxAction::Raw => self.payload.clone(),
            TxAction::Read => encode_header(
                own_id,
                self.dest,
                true,
                self.type_id,
                self.offset,
                &[MAX_TELEGRAM_LENGTH],
            ),
            TxAction::Validate => encode_header(
                own_id,
                self.dest,
                true,
                self.type_id,
                self.offset,
                &[VALIDATE_LENGTH],
            ),
            TxAction::Write => encode_header(
                own_id,
                self.dest,
                false,
                self.type_id,
                self.offset,
                &self.payload,
            ),
        }
    }

    /// Turn an acknowledged write into the read that confirms it.
    ///
    /// Returns `false` when there is nothing to validate; the caller drops the request.
    pub fn convert_to_validate(&mut self) -> bool {
        let Some(validation) = self.validation else {
            return false;
        };
        if self.action != TxAction::Write {
            return false;
        }
        self.action = TxAction::Validate;
        self.write_offset = self.offset;
        self.offset = validation.compare_offset;
        true
    }

    /// Put a failed validate back into its original write form.
    pub fn restore_write(&mut self) {
        self.action = TxAction::Write;
        self.offset = self.write_offset;
    }
}

impl fmt::Display for TxRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} dest 0x{:02X} type 0x{:02X} offset {}",
            self.queued_at.format("%H:%M:%S%.3f"),
            self.action,
            self.dest,
            self.type_id,
            self.offset
        )?;
        if !self.payload.is_empty() {
            write!(f, " data")?;
            for byte in &self.payload {
                write!(f, " {byte:02X}")?;
            }
        }
        if self.retry_count > 0 {
            write!(f, " (retry {})", self.retry_count)?;
        }
        Ok(())
    }
}

/// FIFO of pending requests with a hard capacity.
#[derive(Debug)]
pub struct TxQueue {
    requests: VecDeque<TxRequest>,
    capacity: usize,
}

impl TxQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            requests: VecDeque::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    pub fn push_back(&mut self, request: TxRequest) -> Result<(), TxError> {
        request.check()?;
        if self.requests.len() >= self.capacity {
            return Err(TxError::QueueFull {
                capacity: self.capacity,
            });
        }
        self.requests.push_back(request);
        Ok(())
    }

    pub fn head(&self) -> Option<&TxRequest> {
        self.requests.front()
    }

    pub fn head_mut(&mut self) -> Option<&mut TxRequest> {
        self.requests.front_mut()
    }

    pub fn pop_head(&mut self) -> Option<TxRequest> {
        self.requests.pop_front()
    }

    pub fn clear(&mut self) {
        self.requests.clear();
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TxRequest> {
        self.requests.iter()
    }
}
