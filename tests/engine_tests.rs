use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use emsbus::{
    api::ems::{
        EmsBuilder, EmsEngine, EmsHook, EngineConfig, RecordingTransport, ReplyOutcome, RxEvent,
        TelegramHandler, EVENT_CAPACITY,
    },
    core::bus::{BusEvent, ChannelHook},
    protocol::{
        ems::{
            devices::DeviceModel, ActiveDevice, FrameError, ProtocolVariant, Scope, Telegram,
            TxAction, TxError,
        },
        status::{BusHealth, ManualClock, TxStatus},
    },
};

const POLL: [u8; 1] = [0x8B];
const POLL_ACK: [u8; 1] = [0x0B];

const BOILER_VERSION: [u8; 8] = [0x08, 0x0B, 0x02, 0x00, 0x48, 0x01, 0x03, 0x53];
const RC20_VERSION: [u8; 8] = [0x17, 0x0B, 0x02, 0x00, 0x4D, 0x03, 0x00, 0xCF];

const READ_FAST: [u8; 6] = [0x0B, 0x88, 0x18, 0x00, 0x20, 0xD4];
const FAST_REPLY: [u8; 10] = [0x08, 0x0B, 0x18, 0x00, 0x2D, 0x01, 0xC2, 0x64, 0x00, 0x62];
const WRONG_TYPE_REPLY: [u8; 8] = [0x08, 0x0B, 0x19, 0x00, 0x01, 0x02, 0x03, 0xC1];
const WRONG_SOURCE_REPLY: [u8; 10] = [0x10, 0x0B, 0x18, 0x00, 0x2D, 0x01, 0xC2, 0x64, 0x00, 0xBF];

const WRITE_WW: [u8; 6] = [0x0B, 0x08, 0x33, 0x02, 0x3C, 0x04];
const VALIDATE_WW: [u8; 6] = [0x0B, 0x88, 0x33, 0x02, 0x01, 0x5D];
const VALIDATE_OK: [u8; 6] = [0x08, 0x0B, 0x33, 0x02, 0x3C, 0x2C];
const VALIDATE_BAD: [u8; 6] = [0x08, 0x0B, 0x33, 0x02, 0x37, 0x27];

fn engine_with(config: EngineConfig) -> (EmsEngine, RecordingTransport, ManualClock) {
    let recorder = RecordingTransport::new();
    let clock = ManualClock::new();
    let mut engine = EmsEngine::new(config, Box::new(recorder.clone()));
    engine.set_clock(Box::new(clock.clone()));
    (engine, recorder, clock)
}

fn engine() -> (EmsEngine, RecordingTransport, ManualClock) {
    engine_with(EngineConfig::default())
}

/// Handler counting its calls.
fn counting_handler() -> (Arc<AtomicUsize>, Arc<dyn TelegramHandler>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let handler: Arc<dyn TelegramHandler> = {
        let calls = calls.clone();
        Arc::new(move |_src: u8, _dest: u8, _type_id: u16, _offset: u8, _data: &[u8]| {
            calls.fetch_add(1, Ordering::SeqCst);
            false
        })
    };
    (calls, handler)
}

fn reply_of(event: RxEvent) -> Option<ReplyOutcome> {
    match event {
        RxEvent::Telegram { reply, .. } => reply,
        other => panic!("expected a telegram, got {other:?}"),
    }
}

#[derive(Default)]
struct CountingHook {
    telegrams: AtomicUsize,
    transmits: AtomicUsize,
    devices: AtomicUsize,
    tx_errors: AtomicUsize,
}

impl EmsHook for CountingHook {
    fn on_telegram(&self, _telegram: &Telegram) {
        self.telegrams.fetch_add(1, Ordering::SeqCst);
    }

    fn on_transmit(&self, _bytes: &[u8]) {
        self.transmits.fetch_add(1, Ordering::SeqCst);
    }

    fn on_device_found(&self, _device: &ActiveDevice) {
        self.devices.fetch_add(1, Ordering::SeqCst);
    }

    fn on_tx_error(&self, _error: &TxError) {
        self.tx_errors.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_read_request_completes_on_matching_reply() {
    let (mut engine, recorder, _) = engine();
    engine.enqueue_read(0x18, 0x08, false).unwrap();

    assert_eq!(
        engine.on_frame_received(&POLL),
        RxEvent::Polled {
            sent: Some(TxAction::Read)
        }
    );
    assert_eq!(recorder.take(), vec![READ_FAST.to_vec()]);
    assert_eq!(engine.tx_status(), TxStatus::Wait);

    // a second poll while waiting only hands the bus back
    assert_eq!(engine.on_frame_received(&POLL), RxEvent::Polled { sent: None });
    assert_eq!(recorder.take(), vec![POLL_ACK.to_vec()]);
    assert_eq!(engine.tx_status(), TxStatus::Wait);

    let reply = reply_of(engine.on_frame_received(&FAST_REPLY));
    assert_eq!(reply, Some(ReplyOutcome::ReadCompleted));
    assert_eq!(recorder.take(), vec![POLL_ACK.to_vec()]);
    assert_eq!(engine.tx_status(), TxStatus::Idle);
    assert_eq!(engine.queue_len(), 0);
    assert_eq!(engine.bus_status().rx_packets, 1);
}

#[test]
fn test_read_gives_up_after_three_attempts() {
    let hook = Arc::new(CountingHook::default());
    let (mut engine, recorder, _) = engine();
    engine.add_hook(hook.clone());
    engine.enqueue_read(0x18, 0x08, false).unwrap();

    let mut outcomes = Vec::new();
    for _ in 0..3 {
        engine.on_frame_received(&POLL);
        outcomes.push(reply_of(engine.on_frame_received(&WRONG_TYPE_REPLY)));
    }

    assert_eq!(
        outcomes,
        vec![
            Some(ReplyOutcome::ReadRetry { attempt: 1 }),
            Some(ReplyOutcome::ReadRetry { attempt: 2 }),
            Some(ReplyOutcome::GaveUp(TxError::ReadMismatch { attempts: 3 })),
        ]
    );
    let reads = recorder
        .sent()
        .into_iter()
        .filter(|frame| frame.as_slice() == READ_FAST)
        .count();
    assert_eq!(reads, 3);
    assert_eq!(engine.queue_len(), 0);
    assert_eq!(engine.bus_status().retry_count, 3);
    assert_eq!(engine.bus_status().rx_packets, 0);
    assert_eq!(hook.tx_errors.load(Ordering::SeqCst), 1);
    // every reply is followed by a poll ack
    assert_eq!(hook.transmits.load(Ordering::SeqCst), 6);
}

#[test]
fn test_validated_write_refreshes_type() {
    let (mut engine, recorder, _) = engine();
    engine
        .enqueue_write(0x33, 0x08, 0x02, vec![0x3C], Some(0x33))
        .unwrap();

    engine.on_frame_received(&POLL);
    assert_eq!(recorder.take(), vec![WRITE_WW.to_vec()]);

    assert_eq!(engine.on_frame_received(&[0x01]), RxEvent::WriteAcknowledged);
    assert_eq!(recorder.take(), vec![POLL_ACK.to_vec()]);
    assert_eq!(engine.bus_status().tx_packets, 1);
    assert_eq!(engine.tx_queue_snapshot()[0].action, TxAction::Validate);

    engine.on_frame_received(&POLL);
    assert_eq!(recorder.take(), vec![VALIDATE_WW.to_vec()]);

    let reply = reply_of(engine.on_frame_received(&VALIDATE_OK));
    assert_eq!(reply, Some(ReplyOutcome::WriteConfirmed));

    let queue = engine.tx_queue_snapshot();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].action, TxAction::Read);
    assert_eq!(queue[0].type_id, 0x33);
    assert_eq!(queue[0].dest, 0x08);
    assert!(queue[0].force_refresh);
}

#[test]
fn test_refresh_after_write_is_queued_when_queue_was_full() {
    let (mut engine, recorder, _) = engine_with(EngineConfig {
        queue_capacity: 2,
        ..Default::default()
    });
    engine
        .enqueue_write(0x33, 0x08, 0x02, vec![0x3C], Some(0x33))
        .unwrap();
    engine.enqueue_read(0x18, 0x08, false).unwrap();
    assert_eq!(
        engine.enqueue_read(0x19, 0x08, false),
        Err(TxError::QueueFull { capacity: 2 })
    );

    engine.on_frame_received(&POLL);
    engine.on_frame_received(&[0x01]);
    engine.on_frame_received(&POLL);
    assert_eq!(
        recorder.take(),
        vec![WRITE_WW.to_vec(), POLL_ACK.to_vec(), VALIDATE_WW.to_vec()]
    );

    let reply = reply_of(engine.on_frame_received(&VALIDATE_OK));
    assert_eq!(reply, Some(ReplyOutcome::WriteConfirmed));
    let queued: Vec<_> = engine
        .tx_queue_snapshot()
        .iter()
        .map(|r| (r.type_id, r.force_refresh))
        .collect();
    assert_eq!(queued, vec![(0x18, false), (0x33, true)]);
}

#[test]
fn test_validate_replies_skip_handlers() {
    let (calls, handler) = counting_handler();
    let (mut engine, _, _) = engine();
    engine.register_handler(Scope::Common, 0x33, handler);
    engine
        .enqueue_write(0x33, 0x08, 0x02, vec![0x3C], Some(0x33))
        .unwrap();

    engine.on_frame_received(&POLL);
    engine.on_frame_received(&[0x01]);
    engine.on_frame_received(&POLL);
    match engine.on_frame_received(&VALIDATE_OK) {
        RxEvent::Telegram { reply, dispatch } => {
            assert_eq!(reply, Some(ReplyOutcome::WriteConfirmed));
            assert_eq!(dispatch.invoked, 0);
        }
        other => panic!("expected a telegram, got {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    // the refresh read that follows is an ordinary read and reaches the handler
    engine.on_frame_received(&POLL);
    let reply = reply_of(engine.on_frame_received(&VALIDATE_OK));
    assert_eq!(reply, Some(ReplyOutcome::ReadCompleted));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_reply_while_write_pending_keeps_the_write() {
    let (mut engine, recorder, _) = engine();
    engine
        .enqueue_write(0x33, 0x08, 0x02, vec![0x3C], None)
        .unwrap();
    engine.on_frame_received(&POLL);
    assert_eq!(recorder.take(), vec![WRITE_WW.to_vec()]);
    assert_eq!(engine.tx_status(), TxStatus::Wait);

    match engine.on_frame_received(&FAST_REPLY) {
        RxEvent::Telegram { reply, dispatch } => {
            assert_eq!(reply, Some(ReplyOutcome::UnexpectedWrite));
            assert_eq!(dispatch.invoked, 0);
        }
        other => panic!("expected a telegram, got {other:?}"),
    }
    assert_eq!(recorder.take(), vec![POLL_ACK.to_vec()]);
    assert_eq!(engine.tx_status(), TxStatus::Idle);
    let queue = engine.tx_queue_snapshot();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].action, TxAction::Write);
    assert_eq!(queue[0].retry_count, 0);
}

#[test]
fn test_mismatched_read_reply_still_reaches_handlers() {
    let (type_calls, type_handler) = counting_handler();
    let (source_calls, source_handler) = counting_handler();
    let (mut engine, _, _) = engine();
    engine.register_handler(Scope::Common, 0x19, type_handler);
    engine.register_handler(Scope::Common, 0x18, source_handler);
    engine.enqueue_read(0x18, 0x08, false).unwrap();

    engine.on_frame_received(&POLL);
    match engine.on_frame_received(&WRONG_TYPE_REPLY) {
        RxEvent::Telegram { reply, dispatch } => {
            assert_eq!(reply, Some(ReplyOutcome::ReadRetry { attempt: 1 }));
            assert_eq!(dispatch.invoked, 1);
        }
        other => panic!("expected a telegram, got {other:?}"),
    }

    engine.on_frame_received(&POLL);
    let reply = reply_of(engine.on_frame_received(&WRONG_SOURCE_REPLY));
    assert_eq!(reply, Some(ReplyOutcome::ReadRetry { attempt: 2 }));

    assert_eq!(type_calls.load(Ordering::SeqCst), 1);
    assert_eq!(source_calls.load(Ordering::SeqCst), 1);
    let queue = engine.tx_queue_snapshot();
    assert_eq!(queue.len(), 1);
    assert_eq!((queue[0].type_id, queue[0].dest), (0x18, 0x08));
}

#[test]
fn test_validate_mismatch_resends_write_then_gives_up() {
    let (mut engine, recorder, _) = engine();
    engine
        .enqueue_write(0x33, 0x08, 0x02, vec![0x3C], Some(0x33))
        .unwrap();

    let mut outcomes = Vec::new();
    for _ in 0..3 {
        engine.on_frame_received(&POLL);
        assert_eq!(recorder.take(), vec![WRITE_WW.to_vec()]);
        engine.on_frame_received(&[0x01]);
        engine.on_frame_received(&POLL);
        recorder.take();
        outcomes.push(reply_of(engine.on_frame_received(&VALIDATE_BAD)));
        recorder.take();
    }

    assert_eq!(
        outcomes,
        vec![
            Some(ReplyOutcome::WriteRetry { attempt: 1 }),
            Some(ReplyOutcome::WriteRetry { attempt: 2 }),
            Some(ReplyOutcome::GaveUp(TxError::ValidateMismatch { attempts: 3 })),
        ]
    );
    assert_eq!(engine.queue_len(), 0);
    assert_eq!(engine.bus_status().tx_packets, 3);
}

#[test]
fn test_liveness_follows_the_clock() {
    let (mut engine, _, clock) = engine();
    assert_eq!(engine.status_report().health, BusHealth::Offline);

    engine.on_frame_received(&FAST_REPLY);
    assert!(engine.is_connected());
    assert!(!engine.is_tx_capable());
    assert_eq!(engine.status_report().health, BusHealth::TxErrors);

    engine.on_frame_received(&POLL);
    assert_eq!(engine.status_report().health, BusHealth::Connected);

    clock.advance(Duration::from_secs(4));
    assert!(engine.is_tx_capable());
    clock.advance(Duration::from_secs(2));
    assert!(!engine.is_tx_capable());
    assert!(engine.is_connected());

    clock.advance(Duration::from_secs(10));
    assert!(!engine.is_connected());
    let report = engine.status_report();
    assert_eq!(report.health, BusHealth::Offline);
    assert_eq!(report.last_rx_ms, Some(16_000));
}

#[test]
fn test_crc_errors_do_not_refresh_liveness() {
    let (mut engine, _, _) = engine();
    let mut corrupt = FAST_REPLY;
    corrupt[9] ^= 0xFF;
    assert!(matches!(
        engine.on_frame_received(&corrupt),
        RxEvent::Discarded(FrameError::ChecksumMismatch { .. })
    ));
    assert!(!engine.is_connected());
    assert_eq!(engine.status_report().crc_errors, 1);

    engine.reset_counters();
    assert_eq!(engine.status_report().crc_errors, 0);
}

#[test]
fn test_discovery_queues_fetch_plan() {
    let hook = Arc::new(CountingHook::default());
    let (mut engine, _, _) = engine();
    engine.add_hook(hook.clone());

    engine.on_frame_received(&BOILER_VERSION);
    let snapshot = engine.device_registry_snapshot();
    let boiler = snapshot.boiler.unwrap();
    assert_eq!(boiler.record.product_id, 72);
    assert_eq!(boiler.version, "01.03");

    let queued: Vec<_> = engine
        .tx_queue_snapshot()
        .iter()
        .map(|r| (r.type_id, r.dest))
        .collect();
    assert_eq!(
        queued,
        vec![(0x18, 0x08), (0x19, 0x08), (0x33, 0x08), (0x16, 0x08), (0x14, 0x08)]
    );

    engine.on_frame_received(&RC20_VERSION);
    let thermostat = engine.device_registry_snapshot().thermostat.unwrap();
    assert_eq!(thermostat.model(), DeviceModel::Rc20);
    assert_eq!(thermostat.type_id(), 0x17);
    assert_eq!(engine.queue_len(), 8);

    // seeing the same devices again changes nothing
    engine.on_frame_received(&BOILER_VERSION);
    engine.on_frame_received(&RC20_VERSION);
    assert_eq!(engine.queue_len(), 8);
    assert_eq!(hook.devices.load(Ordering::SeqCst), 2);
    assert_eq!(hook.telegrams.load(Ordering::SeqCst), 4);

    let discovered = engine
        .trace()
        .entries()
        .filter(|entry| entry.message.contains("found"))
        .count();
    assert_eq!(discovered, 2);
}

#[test]
fn test_scan_and_rescan() {
    let (mut engine, _, _) = engine();
    engine.scan_devices();
    let targets: Vec<_> = engine.tx_queue_snapshot().iter().map(|r| r.dest).collect();
    assert!(!targets.is_empty());
    assert!(!targets.contains(&0x0B));
    assert!(targets.windows(2).all(|pair| pair[0] < pair[1]));

    engine.on_frame_received(&BOILER_VERSION);
    engine.rescan_devices();
    assert!(engine.device_registry_snapshot().boiler.is_none());
    assert_eq!(engine.queue_len(), targets.len());
}

#[test]
fn test_discover_presets_only_reads_versions() {
    let recorder = RecordingTransport::new();
    let mut engine = EmsBuilder::new()
        .with_boiler(0x08)
        .with_thermostat(DeviceModel::Rc35)
        .build_engine(Box::new(recorder));
    engine.discover_devices();

    let queued: Vec<_> = engine
        .tx_queue_snapshot()
        .iter()
        .map(|r| (r.type_id, r.dest))
        .collect();
    assert_eq!(queued, vec![(0x02, 0x08), (0x02, 0x10)]);
}

#[test]
fn test_discovery_reports_rejected_version_reads() {
    let hook = Arc::new(CountingHook::default());
    let mut engine = EmsBuilder::new()
        .with_queue_capacity(1)
        .with_boiler(0x08)
        .with_thermostat(DeviceModel::Rc35)
        .add_hook(hook.clone())
        .build_engine(Box::new(RecordingTransport::new()));
    engine.discover_devices();

    let queued: Vec<_> = engine
        .tx_queue_snapshot()
        .iter()
        .map(|r| (r.type_id, r.dest))
        .collect();
    assert_eq!(queued, vec![(0x02, 0x08)]);
    assert_eq!(hook.tx_errors.load(Ordering::SeqCst), 1);
}

#[test]
fn test_model_specific_handlers_wait_for_discovery() {
    let calls = Arc::new(AtomicUsize::new(0));
    let handler: Arc<dyn TelegramHandler> = {
        let calls = calls.clone();
        Arc::new(move |src: u8, _dest: u8, type_id: u16, _offset: u8, data: &[u8]| {
            assert_eq!((src, type_id), (0x17, 0x91));
            assert_eq!(data, &[0x10, 0x2A, 0x00, 0xD2][..]);
            calls.fetch_add(1, Ordering::SeqCst);
            true
        })
    };
    let status = [0x17, 0x00, 0x91, 0x00, 0x10, 0x2A, 0x00, 0xD2, 0x02];

    let (mut engine, _, _) = engine();
    engine.register_handler(Scope::ModelSpecific, 0x91, handler);

    engine.on_frame_received(&status);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!engine.take_refresh());

    engine.on_frame_received(&RC20_VERSION);
    match engine.on_frame_received(&status) {
        RxEvent::Telegram { reply, dispatch } => {
            assert_eq!(reply, None);
            assert_eq!(dispatch.invoked, 1);
            assert!(dispatch.changed);
        }
        other => panic!("expected a telegram, got {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(engine.take_refresh());
}

#[test]
fn test_ems_plus_types_reach_handlers() {
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let handler: Arc<dyn TelegramHandler> = {
        let seen = seen.clone();
        Arc::new(move |_src: u8, _dest: u8, type_id: u16, _offset: u8, data: &[u8]| {
            seen.lock().push((type_id, data.to_vec()));
            false
        })
    };

    let (mut engine, _, _) = engine();
    engine.register_handler(Scope::Common, 0x01A5, handler);
    engine.on_frame_received(&[0x10, 0x00, 0xFF, 0x00, 0x01, 0xA5, 0x80, 0x00, 0x2D, 0x16]);
    // 0x00 after the type is the F7 flag byte
    engine.on_frame_received(&[
        0x10, 0x00, 0xF7, 0x00, 0xFF, 0x01, 0xA5, 0x00, 0x80, 0x00, 0x4E,
    ]);

    assert_eq!(
        *seen.lock(),
        vec![(0x01A5, vec![0x80, 0x00, 0x2D]), (0x01A5, vec![0x80, 0x00])]
    );
}

#[test]
fn test_irt_framing() {
    let (mut engine, recorder, _) = engine_with(EngineConfig {
        protocol: ProtocolVariant::Irt,
        ..Default::default()
    });
    assert_eq!(engine.codec_name(), "irt");

    let doubled = |frame: &[u8]| -> Vec<u8> { frame.iter().flat_map(|&b| [b, b]).collect() };

    engine.on_frame_received(&doubled(&[0x08, 0x0B, 0x02, 0x00, 0x48, 0x01, 0x03, 0x63]));
    assert!(engine.device_registry_snapshot().boiler.is_some());

    assert_eq!(
        engine.on_frame_received(&doubled(&POLL)),
        RxEvent::Polled {
            sent: Some(TxAction::Read)
        }
    );
    assert_eq!(
        recorder.take(),
        vec![doubled(&[0x0B, 0x88, 0x18, 0x00, 0x20, 0xB4])]
    );
}

#[test]
fn test_id_mask_changes_poll_bytes() {
    let (mut engine, recorder, _) = engine_with(EngineConfig {
        id_mask: 0x80,
        ..Default::default()
    });

    assert_eq!(engine.on_frame_received(&[0x0B]), RxEvent::Polled { sent: None });
    assert_eq!(recorder.take(), vec![vec![0x8B]]);
    assert_eq!(engine.on_frame_received(&[0x8B]), RxEvent::ControlIgnored(0x8B));
    assert!(recorder.is_empty());
}

#[test]
fn test_channel_hook_forwards_events() {
    let (tx, rx) = flume::unbounded();
    let (mut engine, _, _) = engine();
    engine.add_hook(Arc::new(ChannelHook::new(tx)));

    engine.on_frame_received(&BOILER_VERSION);
    engine.enqueue_read(0x18, 0x00, false).unwrap_err();

    let events: Vec<_> = rx.try_iter().collect();
    assert!(matches!(events[0], BusEvent::Telegram(ref t) if t.type_id == 0x02));
    assert!(matches!(events[1], BusEvent::DeviceFound(ref d) if d.record.product_id == 72));
    assert!(matches!(
        events[2],
        BusEvent::TxError(TxError::InvalidRequest { .. })
    ));
}

#[test]
fn test_event_backlog_stays_bounded() {
    let (tx, rx) = flume::bounded(EVENT_CAPACITY);
    let (mut engine, _, _) = engine();
    engine.add_hook(Arc::new(ChannelHook::new(tx)));

    for _ in 0..5000 {
        engine.on_frame_received(&FAST_REPLY);
    }
    assert_eq!(rx.len(), EVENT_CAPACITY);
    assert!(matches!(rx.try_recv(), Ok(BusEvent::Telegram(ref t)) if t.type_id == 0x18));
}
