/// Engine thread loop.
///
/// The only code that touches an [`EmsEngine`] once a bus is running. Frames from the reader
/// thread and requests from callers arrive on the same channel, so they are handled strictly
/// in arrival order.
use anyhow::Result;
use flume::{Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use super::bus::{forward_event, BusEvent, EngineCommand};
use crate::{api::ems::EmsEngine, protocol::status::bus::BusHealth};

/// Configuration for the engine loop
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Upper bound on how long the loop sleeps without a command
    pub tick: Duration,
    /// Interval of [`BusEvent::Status`] events, `None` disables them
    pub status_interval: Option<Duration>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(500),
            status_interval: None,
        }
    }
}

/// Run until [`EngineCommand::Quit`] arrives or every sender is gone.
pub fn run_engine_loop(
    mut engine: EmsEngine,
    commands: Receiver<EngineCommand>,
    events: Sender<BusEvent>,
    config: RuntimeConfig,
) -> Result<()> {
    let mut last_status = Instant::now();
    let mut last_health: Option<BusHealth> = None;

    loop {
        match commands.recv_timeout(config.tick) {
            Ok(EngineCommand::Quit) => {
                log::info!("Received quit signal");
                break;
            }
            Ok(command) => handle_command(&mut engine, command),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                log::debug!("All command senders dropped, stopping engine");
                break;
            }
        }

        let report = engine.status_report();
        if last_health != Some(report.health) {
            if last_health.is_some() {
                log::info!("Bus is now {}", report.health);
            }
            last_health = Some(report.health);
        }

        if let Some(interval) = config.status_interval {
            if last_status.elapsed() >= interval {
                last_status = Instant::now();
                forward_event(&events, BusEvent::Status(report));
            }
        }
    }

    if !forward_event(&events, BusEvent::Stopped) {
        log::debug!("Stopped event not delivered");
    }
    Ok(())
}

fn handle_command(engine: &mut EmsEngine, command: EngineCommand) {
    // A dropped reply receiver only means the caller stopped waiting
    match command {
        EngineCommand::Frame(frame) => {
            let event = engine.on_frame_received(&frame);
            log::trace!("{event:?}");
        }
        EngineCommand::Enqueue { request, reply } => {
            let _ = reply.send(engine.enqueue(request));
        }
        EngineCommand::BusStatus(reply) => {
            let _ = reply.send(engine.status_report());
        }
        EngineCommand::Registry(reply) => {
            let _ = reply.send(engine.device_registry_snapshot());
        }
        EngineCommand::Queue(reply) => {
            let _ = reply.send(engine.tx_queue_snapshot());
        }
        EngineCommand::Trace { count, reply } => {
            let _ = reply.send(engine.trace().recent(count));
        }
        EngineCommand::TakeRefresh(reply) => {
            let _ = reply.send(engine.take_refresh());
        }
        EngineCommand::RegisterHandler {
            scope,
            type_id,
            handler,
        } => engine.register_handler(scope, type_id, handler),
        EngineCommand::ScanDevices => engine.scan_devices(),
        EngineCommand::DiscoverDevices => engine.discover_devices(),
        EngineCommand::RescanDevices => engine.rescan_devices(),
        EngineCommand::ClearQueue => engine.clear_queue(),
        EngineCommand::ResetCounters => engine.reset_counters(),
        EngineCommand::Quit => {}
    }
}
