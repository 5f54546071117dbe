use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use std::{io::Write, sync::Arc, thread, time::Duration};

use super::traits::Transport;

/// Long enough for at least eleven bit times at 9600 baud.
const BREAK_DURATION: Duration = Duration::from_millis(2);

/// Serial line transport: write, flush, then signal the end of the frame with a break.
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialTransport {
    pub fn new(port: Box<dyn serialport::SerialPort>) -> Self {
        Self { port }
    }
}

impl Transport for SerialTransport {
    fn transmit(&mut self, bytes: &[u8]) -> Result<()> {
        self.port
            .write_all(bytes)
            .map_err(|err| anyhow!("Failed to write {} bytes: {err}", bytes.len()))?;
        self.port.flush()?;
        self.port
            .set_break()
            .map_err(|err| anyhow!("Failed to assert break: {err}"))?;
        thread::sleep(BREAK_DURATION);
        self.port
            .clear_break()
            .map_err(|err| anyhow!("Failed to clear break: {err}"))?;
        Ok(())
    }
}

/// Transport that only remembers what it was asked to send. Clones share the record.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }

    /// Drain the record.
    pub fn take(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn len(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.lock().is_empty()
    }
}

impl Transport for RecordingTransport {
    fn transmit(&mut self, bytes: &[u8]) -> Result<()> {
        self.sent.lock().push(bytes.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_transport_shares_record() -> Result<()> {
        let recorder = RecordingTransport::new();
        let mut transport = recorder.clone();
        transport.transmit(&[0x0B])?;
        transport.transmit(&[0x0B, 0x88, 0x02, 0x00, 0x4E])?;
        assert_eq!(recorder.len(), 2);
        assert_eq!(recorder.take()[0], vec![0x0B]);
        assert!(recorder.is_empty());
        Ok(())
    }
}
