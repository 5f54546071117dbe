use std::sync::Arc;

use flume::{Sender, TrySendError};

use crate::{
    api::ems::traits::{EmsHook, TelegramHandler},
    core::logs::LogEntry,
    protocol::{
        ems::{
            dispatch::Scope,
            error::TxError,
            queue::TxRequest,
            registry::{ActiveDevice, RegistrySnapshot},
            telegram::Telegram,
        },
        status::bus::StatusReport,
    },
};

/// Messages sent to the engine thread, by the reader thread and by callers.
pub enum EngineCommand {
    /// One frame (or one control byte) read off the line.
    Frame(Vec<u8>),
    Enqueue {
        request: TxRequest,
        reply: oneshot::Sender<Result<(), TxError>>,
    },
    BusStatus(oneshot::Sender<StatusReport>),
    Registry(oneshot::Sender<RegistrySnapshot>),
    Queue(oneshot::Sender<Vec<TxRequest>>),
    /// The last `count` trace entries.
    Trace {
        count: usize,
        reply: oneshot::Sender<Vec<LogEntry>>,
    },
    TakeRefresh(oneshot::Sender<bool>),
    RegisterHandler {
        scope: Scope,
        type_id: u16,
        handler: Arc<dyn TelegramHandler>,
    },
    ScanDevices,
    DiscoverDevices,
    RescanDevices,
    ClearQueue,
    ResetCounters,
    /// Graceful shutdown request.
    Quit,
}

/// Messages sent from the engine thread back to the owner of the bus.
#[derive(Debug, Clone)]
pub enum BusEvent {
    Telegram(Telegram),
    DeviceFound(ActiveDevice),
    TxError(TxError),
    /// Periodic status, only when a status interval is configured.
    Status(StatusReport),
    Stopped,
}

/// Hook forwarding engine activity as [`BusEvent`]s.
///
/// Never blocks the engine: on a bounded channel that nobody drains, new events are dropped
/// once the channel is full.
pub struct ChannelHook {
    sender: Sender<BusEvent>,
}

impl ChannelHook {
    pub fn new(sender: Sender<BusEvent>) -> Self {
        Self { sender }
    }

    fn forward(&self, event: BusEvent) {
        forward_event(&self.sender, event);
    }
}

/// Send without blocking. Returns false when the event was dropped.
pub fn forward_event(sender: &Sender<BusEvent>, event: BusEvent) -> bool {
    match sender.try_send(event) {
        Ok(()) => true,
        Err(TrySendError::Full(event)) => {
            log::trace!("Event channel full, dropping {event:?}");
            false
        }
        // Nobody listening is fine
        Err(TrySendError::Disconnected(_)) => false,
    }
}

impl EmsHook for ChannelHook {
    fn on_telegram(&self, telegram: &Telegram) {
        self.forward(BusEvent::Telegram(telegram.clone()));
    }

    fn on_device_found(&self, device: &ActiveDevice) {
        self.forward(BusEvent::DeviceFound(device.clone()));
    }

    fn on_tx_error(&self, error: &TxError) {
        self.forward(BusEvent::TxError(*error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ems::header::decode_header;

    #[test]
    fn test_channel_hook_forwards_events() {
        let (tx, rx) = flume::unbounded();
        let hook = ChannelHook::new(tx);

        let telegram =
            decode_header(&[0x08, 0x0B, 0x02, 0x00, 0x48, 0x01, 0x03, 0x53]).unwrap();
        hook.on_telegram(&telegram);
        hook.on_tx_error(&TxError::WriteNacked);
        hook.on_transmit(&[0x0B]);

        let events: Vec<_> = rx.drain().collect();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], BusEvent::Telegram(t) if t.type_id == 0x02));
        assert!(matches!(events[1], BusEvent::TxError(TxError::WriteNacked)));
    }

    #[test]
    fn test_full_channel_drops_newest_events() {
        let (tx, rx) = flume::bounded(8);
        let hook = ChannelHook::new(tx);

        for _ in 0..100 {
            hook.on_tx_error(&TxError::WriteNacked);
        }
        assert_eq!(rx.len(), 8);

        rx.drain().for_each(drop);
        hook.on_tx_error(&TxError::QueueFull { capacity: 1 });
        assert!(matches!(
            rx.try_recv(),
            Ok(BusEvent::TxError(TxError::QueueFull { capacity: 1 }))
        ));
    }

    #[test]
    fn test_closed_channel_is_ignored() {
        let (tx, rx) = flume::unbounded();
        drop(rx);
        ChannelHook::new(tx).on_tx_error(&TxError::WriteNacked);
    }
}
