use anyhow::{anyhow, Result};
use std::{
    io::Read,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use super::{core::EmsEngine, traits::TelegramHandler};
use crate::{
    core::{
        bus::{BusEvent, EngineCommand},
        helpers::parse_hex_telegram,
        logs::LogEntry,
        runtime::{run_engine_loop, RuntimeConfig},
    },
    protocol::{
        ems::{
            codec::ProtocolVariant,
            dispatch::Scope,
            error::TxError,
            frame::{read_ems_frame, strip_break},
            queue::TxRequest,
            registry::RegistrySnapshot,
        },
        status::bus::StatusReport,
    },
};

/// Pause after a failed read before trying again.
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// Handle to a running bus: one engine thread plus one reader thread.
///
/// Every call is turned into an [`EngineCommand`]; queries block until the engine thread
/// answers. Dropping the handle stops both threads.
pub struct EmsBus {
    commands: flume::Sender<EngineCommand>,
    events: flume::Receiver<BusEvent>,
    running: Arc<AtomicBool>,
    engine_handle: Option<JoinHandle<Result<()>>>,
    reader_handle: Option<JoinHandle<()>>,
}

impl EmsBus {
    /// Start the threads. `reader` is the receiving side of the line, with its timeout set to
    /// the frame gap.
    pub fn spawn<R>(
        engine: EmsEngine,
        reader: R,
        protocol: ProtocolVariant,
        runtime: RuntimeConfig,
        event_tx: flume::Sender<BusEvent>,
        event_rx: flume::Receiver<BusEvent>,
    ) -> Result<Self>
    where
        R: Read + Send + 'static,
    {
        let (command_tx, command_rx) = flume::unbounded();
        let running = Arc::new(AtomicBool::new(true));

        let engine_handle = thread::Builder::new()
            .name("ems-engine".to_string())
            .spawn(move || run_engine_loop(engine, command_rx, event_tx, runtime))
            .map_err(|err| anyhow!("Failed to spawn engine thread: {err}"))?;

        let reader_handle = {
            let commands = command_tx.clone();
            let running = running.clone();
            thread::Builder::new()
                .name("ems-reader".to_string())
                .spawn(move || reader_loop(reader, protocol, commands, running))
                .map_err(|err| anyhow!("Failed to spawn reader thread: {err}"))?
        };

        Ok(Self {
            commands: command_tx,
            events: event_rx,
            running,
            engine_handle: Some(engine_handle),
            reader_handle: Some(reader_handle),
        })
    }

    fn send(&self, command: EngineCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| anyhow!("EMS engine is not running"))
    }

    fn query<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> EngineCommand) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(make(reply_tx))?;
        reply_rx
            .recv()
            .map_err(|err| anyhow!("EMS engine dropped the request: {err}"))
    }

    /// Events emitted by the engine thread. Bounded: while nobody drains it, newer events are
    /// dropped.
    pub fn events(&self) -> &flume::Receiver<BusEvent> {
        &self.events
    }

    pub fn enqueue(&self, request: TxRequest) -> Result<()> {
        self.query(|reply| EngineCommand::Enqueue { request, reply })?
            .map_err(|err: TxError| anyhow!("Request rejected: {err}"))
    }

    pub fn enqueue_read(&self, type_id: u16, dest: u8, force_refresh: bool) -> Result<()> {
        self.enqueue(TxRequest::read(type_id, dest, force_refresh))
    }

    pub fn enqueue_write(
        &self,
        type_id: u16,
        dest: u8,
        offset: u8,
        payload: Vec<u8>,
        validate_type: Option<u16>,
    ) -> Result<()> {
        self.enqueue(TxRequest::write(
            type_id,
            dest,
            offset,
            payload,
            validate_type,
        ))
    }

    pub fn enqueue_raw(&self, bytes: Vec<u8>) -> Result<()> {
        self.enqueue(TxRequest::raw(bytes))
    }

    pub fn enqueue_raw_hex(&self, text: &str) -> Result<()> {
        self.enqueue_raw(parse_hex_telegram(text)?)
    }

    pub fn bus_status(&self) -> Result<StatusReport> {
        self.query(EngineCommand::BusStatus)
    }

    pub fn device_registry_snapshot(&self) -> Result<RegistrySnapshot> {
        self.query(EngineCommand::Registry)
    }

    pub fn tx_queue_snapshot(&self) -> Result<Vec<TxRequest>> {
        self.query(EngineCommand::Queue)
    }

    /// The last `count` trace entries, oldest first.
    pub fn trace(&self, count: usize) -> Result<Vec<LogEntry>> {
        self.query(|reply| EngineCommand::Trace { count, reply })
    }

    pub fn take_refresh(&self) -> Result<bool> {
        self.query(EngineCommand::TakeRefresh)
    }

    pub fn register_handler(
        &self,
        scope: Scope,
        type_id: u16,
        handler: Arc<dyn TelegramHandler>,
    ) -> Result<()> {
        self.send(EngineCommand::RegisterHandler {
            scope,
            type_id,
            handler,
        })
    }

    pub fn scan_devices(&self) -> Result<()> {
        self.send(EngineCommand::ScanDevices)
    }

    pub fn discover_devices(&self) -> Result<()> {
        self.send(EngineCommand::DiscoverDevices)
    }

    pub fn rescan_devices(&self) -> Result<()> {
        self.send(EngineCommand::RescanDevices)
    }

    pub fn clear_queue(&self) -> Result<()> {
        self.send(EngineCommand::ClearQueue)
    }

    pub fn reset_counters(&self) -> Result<()> {
        self.send(EngineCommand::ResetCounters)
    }

    /// Stop both threads and wait for them.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        self.running.store(false, Ordering::Release);
        let _ = self.commands.send(EngineCommand::Quit);

        if let Some(handle) = self.reader_handle.take() {
            handle
                .join()
                .map_err(|_| anyhow!("Reader thread panicked"))?;
        }
        match self.engine_handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| anyhow!("Engine thread panicked"))?,
            None => Ok(()),
        }
    }
}

impl Drop for EmsBus {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            log::warn!("EMS bus did not stop cleanly: {err}");
        }
    }
}

fn reader_loop<R: Read>(
    mut reader: R,
    protocol: ProtocolVariant,
    commands: flume::Sender<EngineCommand>,
    running: Arc<AtomicBool>,
) {
    let codec = protocol.codec();
    while running.load(Ordering::Acquire) {
        match read_ems_frame(&mut reader) {
            Ok(Some(frame)) => {
                let frame = strip_break(frame, codec.as_ref());
                if commands.send(EngineCommand::Frame(frame)).is_err() {
                    break;
                }
            }
            Ok(None) => {}
            Err(err) => {
                log::warn!("Serial read failed: {err}");
                thread::sleep(READ_ERROR_BACKOFF);
            }
        }
    }
    log::debug!("Reader thread stopped");
}
