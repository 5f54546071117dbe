use derive_more::{Display, Error};

/// Why a received frame never became a telegram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Error)]
pub enum FrameError {
    /// Four bytes or fewer: line noise or a stray break, never counted as a CRC error.
    #[display("frame too short ({len} bytes)")]
    FrameTooShort { len: usize },
    #[display("checksum mismatch (expected {expected:#04x}, got {actual:#04x})")]
    ChecksumMismatch { expected: u8, actual: u8 },
    /// Intact checksum, but the EMS+ header does not fit before it.
    #[display("EMS+ header truncated ({len} bytes)")]
    HeaderTruncated { len: usize },
}

/// Failures of a queued exchange. All of them are resolved inside the engine by dropping or
/// retrying the request, they surface only in logs and in [`crate::api::ems::RxEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Error)]
pub enum TxError {
    #[display("write rejected by device")]
    WriteNacked,
    #[display("read gave up after {attempts} attempts")]
    ReadMismatch { attempts: u8 },
    #[display("write failed, validate gave up after {attempts} attempts")]
    ValidateMismatch { attempts: u8 },
    #[display("tx queue is full ({capacity} requests)")]
    QueueFull { capacity: usize },
    #[display("invalid request: {reason}")]
    InvalidRequest { reason: &'static str },
}
