//! Reference module acceptance tests.
//!
//! Drives the radio and engines modules through a dispatcher the way the
//! rover's control program does: connect, send, then drive.

use super::common::manual_time_base;
use rk_modules::engines::{
    service as engine_service, ArcCommand, Direction, MotorCommand, MoveCommand, REBOOT_CODE,
};
use rk_modules::radio::{encode_send, service as radio_service, ConnectRequest};
use rk_modules::{Engines, Radio, ENGINES_MODULE_ID, RADIO_MODULE_ID};
use rk_runtime::{Dispatchable, DispatcherBuilder, ServiceOutcome, SharedQueue, TaskEntry};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[test]
fn test_connect_then_send_sequence() {
    let radio = Arc::new(Radio::new());
    let mut dispatcher = DispatcherBuilder::new()
        .time_base(manual_time_base())
        .module(RADIO_MODULE_ID, radio.clone())
        .build()
        .unwrap();
    let queue = Arc::clone(dispatcher.queue());

    let mut connect = TaskEntry::new(RADIO_MODULE_ID, radio_service::CONNECT_TCP);
    ConnectRequest {
        ip: Ipv4Addr::new(192, 168, 0, 11),
        port: 2701,
    }
    .encode_into(&mut connect)
    .unwrap();
    queue.push_task(connect).unwrap();

    for text in [&b"\x17"[..], &b"Hello from the rover!"[..]] {
        let mut send = TaskEntry::new(RADIO_MODULE_ID, radio_service::SEND_TCP);
        encode_send(&mut send, 0, text).unwrap();
        queue.push_task(send).unwrap();
    }

    assert_eq!(dispatcher.poll().invoked, 3);

    let socket = radio.socket(0).unwrap();
    assert_eq!(socket.ip, Ipv4Addr::new(192, 168, 0, 11));
    assert_eq!(socket.port, 2701);
    assert_eq!(
        radio.sent_frames(),
        vec![
            (0, vec![0x17]),
            (0, b"Hello from the rover!".to_vec()),
        ]
    );
    assert_eq!(radio.service_slot().outcome(), ServiceOutcome::Ok);
}

#[test]
fn test_inbound_hook_queues_reply_while_draining() {
    const MESSAGES: usize = 5;

    let radio = Arc::new(Radio::new());
    let mut dispatcher = DispatcherBuilder::new()
        .time_base(manual_time_base())
        .module(RADIO_MODULE_ID, radio.clone())
        .build()
        .unwrap();
    let queue = Arc::clone(dispatcher.queue());

    let mut connect = TaskEntry::new(RADIO_MODULE_ID, radio_service::CONNECT_TCP);
    ConnectRequest {
        ip: Ipv4Addr::new(192, 168, 0, 11),
        port: 2701,
    }
    .encode_into(&mut connect)
    .unwrap();
    queue.push_task(connect).unwrap();
    assert_eq!(dispatcher.poll().invoked, 1);

    // Receive handler: answer every inbound message on the same socket
    let replies: Arc<SharedQueue> = Arc::clone(&queue);
    radio.set_hook(Box::new(move |socket, data| {
        let mut reply = TaskEntry::new(RADIO_MODULE_ID, radio_service::SEND_TCP);
        let mut text = b"ack:".to_vec();
        text.extend_from_slice(data);
        encode_send(&mut reply, socket, &text).unwrap();
        replies.push_task(reply).unwrap();
    }));

    let network = {
        let radio = Arc::clone(&radio);
        std::thread::spawn(move || {
            for i in 0..MESSAGES {
                radio.inject_inbound(0, format!("m{i}").as_bytes()).unwrap();
                std::thread::sleep(Duration::from_millis(2));
            }
        })
    };

    let deadline = Instant::now() + Duration::from_secs(5);
    while radio.frames_sent() < MESSAGES as u64 && Instant::now() < deadline {
        dispatcher.poll();
        std::thread::yield_now();
    }
    network.join().unwrap();
    dispatcher.poll();

    let expected: Vec<(u8, Vec<u8>)> = (0..MESSAGES)
        .map(|i| (0, format!("ack:m{i}").into_bytes()))
        .collect();
    assert_eq!(radio.sent_frames(), expected);
    assert_eq!(radio.socket(0).unwrap().port, 2701);
    assert!(queue.is_empty());
}

#[test]
fn test_engines_commands_and_speed_loop() {
    let time_base = manual_time_base();
    let engines = Arc::new(Engines::new(Arc::clone(&time_base)));
    let mut dispatcher = DispatcherBuilder::new()
        .time_base(Arc::clone(&time_base))
        .module(ENGINES_MODULE_ID, engines.clone())
        .build()
        .unwrap();
    let queue = Arc::clone(dispatcher.queue());

    let drive = MoveCommand {
        direction: Direction::Forward,
        distance: 20.0,
        blocking: false,
    };
    let mut entry = TaskEntry::new(ENGINES_MODULE_ID, engine_service::MOVE);
    drive.encode_into(&mut entry).unwrap();
    queue.push_task(entry).unwrap();

    let arc = ArcCommand {
        distance: 15.0,
        angle: 45.0,
        small_radius: 8.0,
    };
    let mut entry = TaskEntry::scheduled(ENGINES_MODULE_ID, engine_service::MOVE_ARC, 1_000);
    arc.encode_into(&mut entry).unwrap();
    queue.push_task(entry).unwrap();
    queue
        .push_back_sync(ENGINES_MODULE_ID, engine_service::SPEED_LOOP, 2_000)
        .unwrap();

    dispatcher.poll();
    assert_eq!(engines.snapshot().last_command, MotorCommand::Move(drive));

    time_base.advance_to(1_000);
    dispatcher.poll();
    assert_eq!(engines.snapshot().last_command, MotorCommand::Arc(arc));

    engines.add_encoder_ticks(360, 360);
    time_base.advance_to(2_000);
    dispatcher.poll();

    let snap = engines.snapshot();
    assert_eq!(snap.commands, 2);
    assert!(snap.wheel_speed[0] > 0.0);
    assert_eq!(snap.wheel_speed[0], snap.wheel_speed[1]);
}

#[test]
fn test_failure_outcome_stays_with_module() {
    let time_base = manual_time_base();
    let engines = Arc::new(Engines::new(Arc::clone(&time_base)));
    let mut dispatcher = DispatcherBuilder::new()
        .time_base(time_base)
        .module(ENGINES_MODULE_ID, engines.clone())
        .build()
        .unwrap();

    // Truncated MOVE payload: the module fails, dispatch carries on
    let queue = Arc::clone(dispatcher.queue());
    queue.push_back(ENGINES_MODULE_ID, engine_service::MOVE).unwrap();
    queue
        .with(|q| q.append_argument_bytes(&[0, 1]))
        .unwrap();
    queue
        .push_back(ENGINES_MODULE_ID, engine_service::REBOOT)
        .unwrap();
    queue
        .with(|q| q.append_argument_bytes(&[REBOOT_CODE]))
        .unwrap();

    let report = dispatcher.poll();
    assert_eq!(report.invoked, 2);
    assert_eq!(report.skipped, 0);
    assert_eq!(engines.snapshot().reboots, 1);
    assert_eq!(engines.service_slot().outcome(), ServiceOutcome::Ok);
}

#[test]
fn test_oversized_payload_for_engines_skipped() {
    let time_base = manual_time_base();
    let engines = Arc::new(Engines::new(Arc::clone(&time_base)));
    let mut dispatcher = DispatcherBuilder::new()
        .time_base(time_base)
        .module(ENGINES_MODULE_ID, engines.clone())
        .build()
        .unwrap();

    let mut entry = TaskEntry::new(ENGINES_MODULE_ID, engine_service::MOVE);
    entry.append_bytes(&[0; 20]).unwrap();
    dispatcher.queue().push_task(entry).unwrap();

    let report = dispatcher.poll();
    assert_eq!(report.skipped, 1);
    assert_eq!(engines.snapshot().commands, 0);
}
