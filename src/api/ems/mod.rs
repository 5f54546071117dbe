pub mod core;
pub mod runner;
pub mod traits;
pub mod transport;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};

use crate::{
    api::utils::open_serial_port,
    core::{bus::ChannelHook, runtime::RuntimeConfig},
    protocol::ems::{
        codec::ProtocolVariant,
        devices::DeviceModel,
        dispatch::Scope,
        types::ID_ME,
    },
};

// Re-export the engine and its collaborators
pub use self::core::{EmsEngine, ReplyOutcome, RxEvent};
pub use runner::EmsBus;
pub use traits::{
    DefaultFetchPlan, EmsHook, FetchPlan, LoggingHandler, NoOpHandler, TelegramHandler, Transport,
};
pub use transport::{RecordingTransport, SerialTransport};

/// Engine-facing part of the bus configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub own_id: u8,
    /// XORed into poll and poll-ack bytes. 0x00 for Buderus style addressing.
    pub id_mask: u8,
    pub protocol: ProtocolVariant,
    /// Answer polls with a poll-ack when there is nothing to send.
    pub poll_ack: bool,
    /// Never transmit, only follow the traffic.
    pub listen_only: bool,
    pub queue_capacity: usize,
    pub trace_capacity: usize,
    /// Telegram type logged at info level whatever the log level.
    pub watch_type: Option<u16>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            own_id: ID_ME,
            id_mask: 0x00,
            protocol: ProtocolVariant::Ems,
            poll_ack: true,
            listen_only: false,
            queue_capacity: 50,
            trace_capacity: 200,
            watch_type: None,
        }
    }
}

/// Bound of the [`EmsBus::events`] channel. Events beyond it are dropped until the receiver
/// catches up.
pub const EVENT_CAPACITY: usize = 1024;

type HandlerEntry = (Scope, u16, Arc<dyn TelegramHandler>);

/// Builder for an [`EmsEngine`] or a running [`EmsBus`].
///
/// # Example
///
/// ```no_run
/// use emsbus::api::ems::{EmsBuilder, LoggingHandler};
/// use std::sync::Arc;
///
/// let bus = EmsBuilder::new()
///     .with_port("/dev/ttyUSB0")
///     .with_boiler(0x08)
///     .add_hook(Arc::new(LoggingHandler))
///     .spawn()?;
/// bus.discover_devices()?;
/// # Ok::<(), anyhow::Error>(())
/// ```
pub struct EmsBuilder {
    port_name: Option<String>,
    baud_rate: u32,
    frame_gap: Duration,
    status_interval: Option<Duration>,
    config: EngineConfig,
    boiler_id: Option<u8>,
    thermostat_model: Option<DeviceModel>,
    fetch_plan: Option<Box<dyn FetchPlan>>,
    handlers: Vec<HandlerEntry>,
    hooks: Vec<Arc<dyn EmsHook>>,
}

impl Default for EmsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EmsBuilder {
    pub fn new() -> Self {
        Self {
            port_name: None,
            baud_rate: 9600,
            frame_gap: Duration::from_millis(20),
            status_interval: None,
            config: EngineConfig::default(),
            boiler_id: None,
            thermostat_model: None,
            fetch_plan: None,
            handlers: Vec::new(),
            hooks: Vec::new(),
        }
    }

    /// Set the serial port name.
    pub fn with_port(mut self, port_name: &str) -> Self {
        self.port_name = Some(port_name.to_string());
        self
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Idle time on the line that ends a frame.
    pub fn with_frame_gap(mut self, frame_gap: Duration) -> Self {
        self.frame_gap = frame_gap;
        self
    }

    /// Emit a status event at this interval while running.
    pub fn with_status_interval(mut self, interval: Duration) -> Self {
        self.status_interval = Some(interval);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_own_id(mut self, own_id: u8) -> Self {
        self.config.own_id = own_id;
        self
    }

    pub fn with_id_mask(mut self, id_mask: u8) -> Self {
        self.config.id_mask = id_mask;
        self
    }

    pub fn with_protocol(mut self, protocol: ProtocolVariant) -> Self {
        self.config.protocol = protocol;
        self
    }

    pub fn with_poll_ack(mut self, poll_ack: bool) -> Self {
        self.config.poll_ack = poll_ack;
        self
    }

    pub fn with_listen_only(mut self, listen_only: bool) -> Self {
        self.config.listen_only = listen_only;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn with_trace_capacity(mut self, capacity: usize) -> Self {
        self.config.trace_capacity = capacity;
        self
    }

    pub fn with_watch_type(mut self, type_id: Option<u16>) -> Self {
        self.config.watch_type = type_id;
        self
    }

    /// Preset the boiler address so it is known before discovery.
    pub fn with_boiler(mut self, type_id: u8) -> Self {
        self.boiler_id = Some(type_id);
        self
    }

    /// Preset the thermostat model.
    pub fn with_thermostat(mut self, model: DeviceModel) -> Self {
        self.thermostat_model = Some(model);
        self
    }

    pub fn with_fetch_plan(mut self, fetch_plan: Box<dyn FetchPlan>) -> Self {
        self.fetch_plan = Some(fetch_plan);
        self
    }

    /// Register a telegram handler (can be called multiple times).
    ///
    /// Handlers for the same type run in the order they are added.
    pub fn add_handler(
        mut self,
        scope: Scope,
        type_id: u16,
        handler: Arc<dyn TelegramHandler>,
    ) -> Self {
        self.handlers.push((scope, type_id, handler));
        self
    }

    /// Add an observer (can be called multiple times).
    pub fn add_hook(mut self, hook: Arc<dyn EmsHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Build an engine that sends through `transport`. Frames are delivered by the caller.
    pub fn build_engine(self, transport: Box<dyn Transport>) -> EmsEngine {
        let mut engine = EmsEngine::new(self.config, transport);
        if let Some(fetch_plan) = self.fetch_plan {
            engine.set_fetch_plan(fetch_plan);
        }
        for (scope, type_id, handler) in self.handlers {
            engine.register_handler(scope, type_id, handler);
        }
        for hook in self.hooks {
            engine.add_hook(hook);
        }
        if let Some(type_id) = self.boiler_id {
            engine.preset_boiler(type_id);
        }
        if let Some(model) = self.thermostat_model {
            engine.preset_thermostat(model);
        }
        engine
    }

    /// Open the serial port and start the engine and reader threads.
    pub fn spawn(self) -> Result<EmsBus> {
        let port_name = self
            .port_name
            .clone()
            .ok_or_else(|| anyhow!("Port name is required. Use with_port()"))?;

        let port = open_serial_port(&port_name, self.baud_rate, self.frame_gap)?;
        let reader = port
            .try_clone()
            .map_err(|err| anyhow!("Failed to clone port {port_name} for reading: {err}"))?;

        let (event_tx, event_rx) = flume::bounded(EVENT_CAPACITY);
        let runtime = RuntimeConfig {
            status_interval: self.status_interval,
            ..Default::default()
        };
        let protocol = self.config.protocol;

        let engine = self
            .add_hook(Arc::new(ChannelHook::new(event_tx.clone())))
            .build_engine(Box::new(SerialTransport::new(port)));

        log::info!("Opened {port_name}, speaking {}", engine.codec_name());
        EmsBus::spawn(engine, reader, protocol, runtime, event_tx, event_rx)
    }
}
