/// The EMS protocol engine.
///
/// One [`EmsEngine`] owns all protocol state: tx queue, bus status, device registry and
/// handler table. It is driven from a single thread: the transport feeds it frames through
/// [`EmsEngine::on_frame_received`] and callers queue work through the `enqueue_*` methods.
/// Nothing in here blocks or spawns.
use anyhow::Result;
use std::sync::Arc;

use super::{
    traits::{DefaultFetchPlan, EmsHook, FetchPlan, TelegramHandler, Transport},
    EngineConfig,
};
use crate::{
    core::{
        helpers::{format_hex, parse_hex_telegram},
        logs::{LogBuffer, LogEntry, LogLevel, LogMetadata},
    },
    protocol::{
        ems::{
            codec::FrameCodec,
            dispatch::{DispatchOutcome, Dispatcher, Scope},
            error::{FrameError, TxError},
            queue::{TxAction, TxQueue, TxRequest},
            registry::{format_version, DeviceRegistry, RegistrySnapshot, VersionMatch},
            telegram::Telegram,
            types::{
                poll_ack_byte, poll_byte, ControlByte, MAX_RETRIES, TYPE_NONE, TYPE_VERSION,
            },
            devices::{scan_targets, DeviceModel},
        },
        status::{
            bus::{BusStatus, StatusReport, TxStatus},
            clock::{Clock, MonotonicClock},
        },
    },
};

/// What the engine made of one delivered frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RxEvent {
    /// A poll for us. `sent` is the queued action put on the bus, `None` when we only
    /// acknowledged the poll (or stayed silent).
    Polled { sent: Option<TxAction> },
    WriteAcknowledged,
    WriteRejected,
    /// A single byte that needs no reaction.
    ControlIgnored(u8),
    Discarded(FrameError),
    /// Our own transmission, read back from the bus.
    Echo,
    Telegram {
        reply: Option<ReplyOutcome>,
        dispatch: DispatchOutcome,
    },
}

/// How a telegram arriving during an outstanding exchange affected the queue head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    ReadCompleted,
    ReadRetry { attempt: u8 },
    WriteConfirmed,
    WriteRetry { attempt: u8 },
    GaveUp(TxError),
    /// The reply went to somebody else; the head request was dropped.
    NotForUs,
    /// Nothing was queued even though we were waiting.
    NothingPending,
    /// A plain write was still at the head. Writes finish through the single-byte ack.
    UnexpectedWrite,
}

pub struct EmsEngine {
    config: EngineConfig,
    codec: Box<dyn FrameCodec>,
    transport: Box<dyn Transport>,
    clock: Box<dyn Clock>,
    fetch_plan: Box<dyn FetchPlan>,
    hooks: Vec<Arc<dyn EmsHook>>,
    queue: TxQueue,
    status: BusStatus,
    registry: DeviceRegistry,
    dispatcher: Dispatcher,
    trace: LogBuffer,
    refreshed: bool,
}

impl EmsEngine {
    pub fn new(config: EngineConfig, transport: Box<dyn Transport>) -> Self {
        Self {
            codec: config.protocol.codec(),
            transport,
            clock: Box::new(MonotonicClock),
            fetch_plan: Box::new(DefaultFetchPlan),
            hooks: Vec::new(),
            queue: TxQueue::new(config.queue_capacity),
            status: BusStatus::default(),
            registry: DeviceRegistry::new(),
            dispatcher: Dispatcher::new(),
            trace: LogBuffer::new(config.trace_capacity),
            refreshed: false,
            config,
        }
    }

    pub fn set_clock(&mut self, clock: Box<dyn Clock>) {
        self.clock = clock;
    }

    pub fn set_codec(&mut self, codec: Box<dyn FrameCodec>) {
        self.codec = codec;
    }

    pub fn set_fetch_plan(&mut self, fetch_plan: Box<dyn FetchPlan>) {
        self.fetch_plan = fetch_plan;
    }

    pub fn add_hook(&mut self, hook: Arc<dyn EmsHook>) {
        self.hooks.push(hook);
    }

    pub fn register_handler(
        &mut self,
        scope: Scope,
        type_id: u16,
        handler: Arc<dyn TelegramHandler>,
    ) {
        self.dispatcher.register_handler(scope, type_id, handler);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn codec_name(&self) -> &'static str {
        self.codec.name()
    }

    // ---- caller-facing operations ----

    pub fn enqueue_read(&mut self, type_id: u16, dest: u8, force_refresh: bool) -> Result<(), TxError> {
        self.enqueue(TxRequest::read(type_id, dest, force_refresh))
    }

    pub fn enqueue_write(
        &mut self,
        type_id: u16,
        dest: u8,
        offset: u8,
        payload: Vec<u8>,
        validate_type: Option<u16>,
    ) -> Result<(), TxError> {
        self.enqueue(TxRequest::write(type_id, dest, offset, payload, validate_type))
    }

    /// Queue bytes to be sent as they are, checksum appended.
    pub fn enqueue_raw(&mut self, bytes: Vec<u8>) -> Result<(), TxError> {
        self.enqueue(TxRequest::raw(bytes))
    }

    pub fn enqueue_raw_hex(&mut self, text: &str) -> Result<()> {
        let bytes = parse_hex_telegram(text)?;
        self.enqueue_raw(bytes)?;
        Ok(())
    }

    /// Append a request to the tail of the queue.
    pub fn enqueue(&mut self, request: TxRequest) -> Result<(), TxError> {
        if self.config.listen_only {
            return self.reject(TxError::InvalidRequest {
                reason: "listen-only mode",
            });
        }
        let description = request.to_string();
        match self.queue.push_back(request) {
            Ok(()) => {
                log::debug!("Queued {description}");
                Ok(())
            }
            Err(err) => self.reject(err),
        }
    }

    fn reject(&mut self, err: TxError) -> Result<(), TxError> {
        log::warn!("Request rejected: {err}");
        self.notify_tx_error(&err);
        Err(err)
    }

    pub fn bus_status(&self) -> BusStatus {
        self.status.clone()
    }

    pub fn status_report(&self) -> StatusReport {
        self.status.report(self.clock.now(), self.queue.len())
    }

    pub fn is_connected(&self) -> bool {
        self.status.connected(self.clock.now())
    }

    pub fn is_tx_capable(&self) -> bool {
        self.status.tx_capable(self.clock.now())
    }

    pub fn tx_status(&self) -> TxStatus {
        self.status.tx_status
    }

    pub fn device_registry_snapshot(&self) -> RegistrySnapshot {
        self.registry.snapshot()
    }

    /// Pending requests in send order.
    pub fn tx_queue_snapshot(&self) -> Vec<TxRequest> {
        self.queue.iter().cloned().collect()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn trace(&self) -> &LogBuffer {
        &self.trace
    }

    /// Returns whether anything asked for a refresh since the last call, and clears the flag.
    pub fn take_refresh(&mut self) -> bool {
        std::mem::take(&mut self.refreshed)
    }

    pub fn clear_queue(&mut self) {
        if !self.queue.is_empty() {
            log::info!("Clearing {} queued requests", self.queue.len());
        }
        self.queue.clear();
        self.status.tx_status = TxStatus::Idle;
    }

    pub fn reset_counters(&mut self) {
        self.status.reset_counters();
    }

    pub fn preset_boiler(&mut self, type_id: u8) {
        self.registry.preset_boiler(type_id);
    }

    pub fn preset_thermostat(&mut self, model: DeviceModel) -> bool {
        let known = self.registry.preset_thermostat(model);
        if !known {
            log::warn!("Thermostat model {model} is not supported");
        }
        known
    }

    /// Ask every known device address for its Version.
    pub fn scan_devices(&mut self) {
        let targets = scan_targets(self.config.own_id);
        log::info!("Scanning {} device addresses", targets.len());
        for id in targets {
            if self.enqueue_read(TYPE_VERSION, id, false).is_err() {
                break;
            }
        }
    }

    /// Read the Version of preset devices, or scan the bus when nothing is preset.
    pub fn discover_devices(&mut self) {
        let snapshot = self.registry.snapshot();
        match (snapshot.boiler, snapshot.thermostat) {
            (Some(boiler), Some(thermostat)) => {
                for id in [boiler.type_id(), thermostat.type_id()] {
                    if let Err(err) = self.enqueue_read(TYPE_VERSION, id, false) {
                        log::warn!("Discovery stopped at 0x{id:02X}: {err}");
                        break;
                    }
                }
            }
            _ => self.scan_devices(),
        }
    }

    /// Forget every device and pending request, then scan again.
    pub fn rescan_devices(&mut self) {
        self.clear_queue();
        self.registry.clear();
        self.scan_devices();
    }

    // ---- transport-facing ----

    /// Feed one complete frame, or one single control byte, as delivered by the transport.
    pub fn on_frame_received(&mut self, bytes: &[u8]) -> RxEvent {
        let frame = self.codec.normalize(bytes).into_owned();

        if let [value] = frame.as_slice() {
            return self.on_control_byte(*value);
        }

        match self.codec.decode(&frame) {
            Ok(telegram) => self.on_telegram(telegram),
            Err(err @ FrameError::FrameTooShort { .. }) => {
                log::trace!("Noise: {}", format_hex(&frame));
                RxEvent::Discarded(err)
            }
            Err(err @ FrameError::ChecksumMismatch { .. }) => {
                self.status.crc_errors += 1;
                log::debug!("Corrupt telegram ({err}): {}", format_hex(&frame));
                RxEvent::Discarded(err)
            }
            Err(err @ FrameError::HeaderTruncated { .. }) => {
                log::debug!("Discarded ({err}): {}", format_hex(&frame));
                RxEvent::Discarded(err)
            }
        }
    }

    fn on_control_byte(&mut self, value: u8) -> RxEvent {
        if value == poll_byte(self.config.own_id, self.config.id_mask) {
            self.status.last_poll = Some(self.clock.now());
            return self.on_poll();
        }

        if self.status.tx_status != TxStatus::Wait {
            return RxEvent::ControlIgnored(value);
        }

        match ControlByte::try_from(value) {
            Ok(ControlByte::WriteAck) => {
                self.status.tx_packets += 1;
                self.send_poll_ack();
                self.create_validate();
                RxEvent::WriteAcknowledged
            }
            Ok(ControlByte::WriteNack) => {
                self.send_poll_ack();
                if let Some(request) = self.queue.pop_head() {
                    log::warn!("Write rejected by 0x{:02X}: {request}", request.dest);
                }
                self.status.tx_status = TxStatus::Idle;
                self.notify_tx_error(&TxError::WriteNacked);
                RxEvent::WriteRejected
            }
            Err(_) => RxEvent::ControlIgnored(value),
        }
    }

    fn on_poll(&mut self) -> RxEvent {
        if self.config.listen_only {
            return RxEvent::Polled { sent: None };
        }
        if self.status.tx_status == TxStatus::Idle && !self.queue.is_empty() {
            return RxEvent::Polled {
                sent: self.send_head(),
            };
        }
        if self.config.poll_ack {
            self.send_poll_ack();
        }
        RxEvent::Polled { sent: None }
    }

    /// Put the head request on the bus. Raw requests leave the queue right away, everything
    /// else stays at the head until its reply arrives.
    fn send_head(&mut self) -> Option<TxAction> {
        let head = self.queue.head()?;
        let action = head.action;
        let dest = head.dest;
        let frame = self.codec.seal(head.encode(self.config.own_id));
        let label = format!(
            "Sending {} of type 0x{:02X} to 0x{dest:02X}",
            action.to_string().to_lowercase(),
            head.type_id
        );

        let sent = self.transmit(frame, Some(dest), label);
        if action == TxAction::Raw {
            self.queue.pop_head();
        } else if sent {
            self.status.tx_status = TxStatus::Wait;
        }
        Some(action)
    }

    /// Hand the bus back to the master.
    fn send_poll_ack(&mut self) {
        if self.config.listen_only {
            return;
        }
        let ack = poll_ack_byte(self.config.own_id, self.config.id_mask);
        self.transmit(vec![ack], None, "Poll ack".to_string());
    }

    fn transmit(&mut self, frame: Vec<u8>, dest: Option<u8>, label: String) -> bool {
        log::debug!("{label}: {}", format_hex(&frame));
        for hook in &self.hooks {
            hook.on_transmit(&frame);
        }
        let wire = self.codec.to_wire(frame.clone());
        match self.transport.transmit(&wire) {
            Ok(()) => {
                self.trace.push(LogEntry::outbound(label, &frame, dest));
                true
            }
            Err(err) => {
                log::warn!("Transmit failed: {err}");
                self.trace
                    .push(LogEntry::error(format!("{label} failed: {err}")));
                false
            }
        }
    }

    /// Turn the acknowledged write at the head into its validate, or drop it when it needs no
    /// confirmation. Releases the tx lock either way.
    fn create_validate(&mut self) {
        self.status.tx_status = TxStatus::Idle;
        let Some(head) = self.queue.head_mut() else {
            return;
        };
        if !head.convert_to_validate() {
            log::debug!("Write to 0x{:02X} acknowledged", head.dest);
            self.queue.pop_head();
        }
    }

    fn on_telegram(&mut self, telegram: Telegram) -> RxEvent {
        self.status.last_rx = Some(self.clock.now());

        if telegram.src == self.config.own_id {
            return RxEvent::Echo;
        }

        self.record_inbound(&telegram);

        if self.status.tx_status == TxStatus::Idle {
            let dispatch = self.process_telegram(&telegram);
            return RxEvent::Telegram {
                reply: None,
                dispatch,
            };
        }

        self.status.tx_status = TxStatus::Idle;

        if telegram.dest != self.config.own_id {
            if let Some(request) = self.queue.pop_head() {
                log::debug!("No reply to {request}, dropped");
            }
            let dispatch = self.process_telegram(&telegram);
            return RxEvent::Telegram {
                reply: Some(ReplyOutcome::NotForUs),
                dispatch,
            };
        }

        let Some(action) = self.queue.head().map(|request| request.action) else {
            let dispatch = self.process_telegram(&telegram);
            return RxEvent::Telegram {
                reply: Some(ReplyOutcome::NothingPending),
                dispatch,
            };
        };

        let mut dispatch = DispatchOutcome::default();
        let reply = match action {
            TxAction::Read => {
                let reply = self.on_read_reply(&telegram);
                dispatch = self.process_telegram(&telegram);
                reply
            }
            TxAction::Validate => self.on_validate_reply(&telegram),
            TxAction::Write | TxAction::Raw => {
                log::error!("Reply {} arrived while a write was pending", telegram);
                ReplyOutcome::UnexpectedWrite
            }
        };

        self.send_poll_ack();
        RxEvent::Telegram {
            reply: Some(reply),
            dispatch,
        }
    }

    fn on_read_reply(&mut self, telegram: &Telegram) -> ReplyOutcome {
        let Some(head) = self.queue.head_mut() else {
            return ReplyOutcome::NothingPending;
        };

        if telegram.src == head.dest && telegram.type_id == head.type_id {
            let force_refresh = head.force_refresh;
            self.queue.pop_head();
            self.status.rx_packets += 1;
            self.refreshed |= force_refresh;
            return ReplyOutcome::ReadCompleted;
        }

        head.retry_count += 1;
        let attempt = head.retry_count;
        self.status.retry_count += 1;
        if attempt > MAX_RETRIES {
            log::info!("Read failed. Giving up, removing from queue");
            self.queue.pop_head();
            let err = TxError::ReadMismatch { attempts: attempt };
            self.notify_tx_error(&err);
            ReplyOutcome::GaveUp(err)
        } else {
            log::info!("...Retrying read. Attempt {attempt}/{}...", MAX_RETRIES + 1);
            ReplyOutcome::ReadRetry { attempt }
        }
    }

    fn on_validate_reply(&mut self, telegram: &Telegram) -> ReplyOutcome {
        let Some(head) = self.queue.head_mut() else {
            return ReplyOutcome::NothingPending;
        };
        let Some(validation) = head.validation else {
            self.queue.pop_head();
            return ReplyOutcome::NothingPending;
        };

        let received = telegram.first_data_byte();
        if received == Some(validation.compare_value) {
            let dest = head.dest;
            self.queue.pop_head();
            log::info!("Write to 0x{dest:02X} was successful");
            // the confirmed write left the queue, so the tail has room
            let post_read_type = validation.post_read_type;
            if post_read_type != TYPE_NONE {
                if let Err(err) = self.enqueue_read(post_read_type, dest, true) {
                    log::warn!(
                        "Refresh of type 0x{post_read_type:02X} from 0x{dest:02X} lost: {err}"
                    );
                }
            }
            return ReplyOutcome::WriteConfirmed;
        }

        log::info!(
            "Last write failed. Compared set value 0x{:02X} with received value {}",
            validation.compare_value,
            received.map_or("none".to_string(), |value| format!("0x{value:02X}"))
        );
        head.retry_count += 1;
        let attempt = head.retry_count;
        self.status.retry_count += 1;
        if attempt > MAX_RETRIES {
            log::info!("Write failed. Giving up, removing from queue");
            self.queue.pop_head();
            let err = TxError::ValidateMismatch { attempts: attempt };
            self.notify_tx_error(&err);
            ReplyOutcome::GaveUp(err)
        } else {
            log::info!("...Retrying write. Attempt {attempt}/{}...", MAX_RETRIES + 1);
            head.restore_write();
            ReplyOutcome::WriteRetry { attempt }
        }
    }

    /// Discovery and handler dispatch for an accepted telegram.
    fn process_telegram(&mut self, telegram: &Telegram) -> DispatchOutcome {
        if telegram.type_id == TYPE_VERSION && telegram.offset == 0 {
            self.on_version(telegram);
        }
        let outcome = self.dispatcher.dispatch(telegram, &self.registry);
        self.refreshed |= outcome.changed;
        outcome
    }

    fn on_version(&mut self, telegram: &Telegram) {
        let &[product_id, major, minor, ..] = telegram.data.as_slice() else {
            log::debug!("Version telegram from 0x{:02X} too short", telegram.src);
            return;
        };
        let version = format_version(major, minor);
        let matched = self
            .registry
            .on_version_telegram(telegram.src, product_id, version);

        if let VersionMatch::Assigned(device) = matched {
            self.trace.push(LogEntry::with_metadata(
                format!("{} found: {device}", device.kind),
                LogLevel::Info,
                LogMetadata::Discovery {
                    device_id: device.type_id(),
                    product_id,
                },
            ));
            for hook in &self.hooks {
                hook.on_device_found(&device);
            }
            for type_id in self.fetch_plan.initial_reads(&device) {
                if self.enqueue_read(type_id, device.type_id(), false).is_err() {
                    break;
                }
            }
        }
    }

    fn record_inbound(&mut self, telegram: &Telegram) {
        let watched = self.config.watch_type == Some(telegram.type_id);
        let wants_text =
            watched || self.trace.capacity() > 0 || log::log_enabled!(log::Level::Debug);

        if wants_text {
            let line = telegram.describe(self.config.own_id, |id| self.registry.name_of(id));
            if watched {
                log::info!("{line}");
            } else {
                log::debug!("{line}");
            }
            self.trace
                .push(LogEntry::inbound(line, &telegram.frame, telegram.src));
        }

        for hook in &self.hooks {
            hook.on_telegram(telegram);
        }
    }

    fn notify_tx_error(&self, err: &TxError) {
        for hook in &self.hooks {
            hook.on_tx_error(err);
        }
    }
}
