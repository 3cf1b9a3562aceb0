// End-to-end tests over loopback sockets: ingest, export, reset
use byteorder::{BigEndian, ByteOrder};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use telemetry_receiver::transports::flexray::frame_datagram;
use telemetry_receiver::{ReceiverConfig, Runtime, SignalBus, SignalEvent, Transport};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Receiver on ephemeral loopback ports with CAN and LIN disabled
fn loopback_config(log_dir: &std::path::Path, peer: SocketAddr) -> ReceiverConfig {
    let mut config = ReceiverConfig::new()
        .with_log_dir(log_dir)
        .with_transport(Transport::Can, false)
        .with_transport(Transport::Lin, false);
    config.udp.bind = "127.0.0.1:0".parse().unwrap();
    config.flexray.bind = "127.0.0.1:0".parse().unwrap();
    config.control.bind = "127.0.0.1:0".parse().unwrap();
    config.export.peer = peer.to_string();
    config.export.pre_send_delay_ms = 0;
    config.export.retry_delay_ms = 10;
    config
}

fn bound_addr(runtime: &Runtime, transport: Transport) -> SocketAddr {
    runtime
        .coordinator()
        .listener(transport)
        .and_then(|info| info.endpoint.socket_addr())
        .unwrap()
}

/// Send one control command and wait until the receiver closes the connection
fn send_command(control: SocketAddr, command: &str) {
    let mut stream = TcpStream::connect(control).unwrap();
    stream.set_read_timeout(Some(EVENT_TIMEOUT)).unwrap();
    stream.write_all(command.as_bytes()).unwrap();
    stream.shutdown(Shutdown::Write).unwrap();
    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).unwrap();
    assert!(reply.is_empty());
}

/// Accept `count` snapshot transfers and split each into (file name, contents)
fn receive_snapshots(peer: TcpListener, count: usize) -> thread::JoinHandle<HashMap<String, Vec<u8>>> {
    thread::spawn(move || {
        let mut files = HashMap::new();
        for _ in 0..count {
            let (mut stream, _) = peer.accept().unwrap();
            let mut frame = Vec::new();
            stream.read_to_end(&mut frame).unwrap();

            let name_len = BigEndian::read_u32(&frame[..4]) as usize;
            let name = String::from_utf8(frame[4..4 + name_len].to_vec()).unwrap();
            files.insert(name, frame[4 + name_len..].to_vec());
        }
        files
    })
}

fn next_event(events: &Receiver<SignalEvent>) -> SignalEvent {
    events.recv_timeout(EVENT_TIMEOUT).unwrap()
}

#[test]
fn test_ingest_export_and_reset() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let peer = TcpListener::bind("127.0.0.1:0").unwrap();
    let config = loopback_config(dir.path(), peer.local_addr().unwrap());

    let bus = Arc::new(SignalBus::new());
    let events = bus.subscribe_channel();
    let runtime = Runtime::start(config, bus).unwrap();
    let control = runtime.control_addr().unwrap();

    let udp_addr = bound_addr(&runtime, Transport::Udp);
    let flexray_addr = bound_addr(&runtime, Transport::FlexRay);
    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();

    sender.send_to(b"25.05000", udp_addr).unwrap();
    let event = next_event(&events);
    assert_eq!(event.transport, Transport::Udp);
    assert_eq!(event.sample.speed_raw_ms, 25.0);
    assert!((event.sample.speed_kmh - 90.0).abs() < 1e-9);
    assert_eq!(event.sample.rpm, 5000);

    sender.send_to(&frame_datagram(7, b"10.01200"), flexray_addr).unwrap();
    let event = next_event(&events);
    assert_eq!(event.transport, Transport::FlexRay);
    assert_eq!(event.sample.rpm, 1200);

    // Malformed frames are dropped without touching the logs
    sender.send_to(b"ab.c1234", udp_addr).unwrap();
    sender.send_to(b"25.0500", udp_addr).unwrap();

    let udp_log = Arc::clone(runtime.logs().get(Transport::Udp).unwrap());
    let flexray_log = Arc::clone(runtime.logs().get(Transport::FlexRay).unwrap());
    assert_eq!(udp_log.entries().unwrap().len(), 1);
    assert_eq!(flexray_log.entries().unwrap().len(), 1);

    // SEND_JSON: one framed transfer per existing log
    let snapshots = receive_snapshots(peer, 2);
    send_command(control, "SEND_JSON\n");
    let files = snapshots.join().unwrap();

    let udp_snapshot = String::from_utf8(files["udp_protocol_receiver.json"].clone()).unwrap();
    assert!(udp_snapshot.contains("\"RPM\": 5000"));
    assert!(udp_snapshot.contains("\"Speed\": 25.0"));
    assert!(udp_snapshot.find("\"RPM\"").unwrap() < udp_snapshot.find("\"Speed\"").unwrap());
    assert!(files.contains_key("flexray_protocol_receiver.json"));

    // RECEIVED_JSON: logs truncated, listeners rebuilt on the same ports
    let udp_before = runtime.coordinator().listener(Transport::Udp).unwrap();
    send_command(control, "RECEIVED_JSON");

    assert_eq!(std::fs::read_to_string(udp_log.path()).unwrap(), "[]");
    assert_eq!(std::fs::read_to_string(flexray_log.path()).unwrap(), "[]");
    let udp_after = runtime.coordinator().listener(Transport::Udp).unwrap();
    assert_ne!(udp_after.id, udp_before.id);
    assert_eq!(udp_after.endpoint, udp_before.endpoint);

    sender.send_to(b"12.51500", udp_addr).unwrap();
    assert_eq!(next_event(&events).sample.rpm, 1500);
    assert_eq!(udp_log.entries().unwrap().len(), 1);

    assert!(runtime.wait_timeout(Duration::from_millis(50)).is_none());
    runtime.shutdown();
}

#[test]
fn test_invalid_command_changes_nothing() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let peer = TcpListener::bind("127.0.0.1:0").unwrap();
    let mut config = loopback_config(dir.path(), peer.local_addr().unwrap());
    config.flexray.enabled = false;

    let bus = Arc::new(SignalBus::new());
    let events = bus.subscribe_channel();
    let runtime = Runtime::start(config, bus).unwrap();

    let udp_addr = bound_addr(&runtime, Transport::Udp);
    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    sender.send_to(b" 5.0 800", udp_addr).unwrap();
    assert_eq!(next_event(&events).sample.rpm, 800);

    let udp_before = runtime.coordinator().listener(Transport::Udp).unwrap();
    send_command(runtime.control_addr().unwrap(), "RESET");

    assert_eq!(runtime.logs().get(Transport::Udp).unwrap().entries().unwrap().len(), 1);
    assert_eq!(runtime.coordinator().listener(Transport::Udp).unwrap(), udp_before);
    assert!(runtime.logs().get(Transport::FlexRay).is_none());

    runtime.shutdown();
}

#[test]
fn test_logs_cleared_on_start() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("udp_protocol_receiver.json"),
        r#"[{"RPM": 1000, "Speed": 3.0}]"#,
    )
    .unwrap();

    let peer = TcpListener::bind("127.0.0.1:0").unwrap();
    let config = loopback_config(dir.path(), peer.local_addr().unwrap());
    let runtime = Runtime::start(config, Arc::new(SignalBus::new())).unwrap();

    assert!(runtime.logs().get(Transport::Udp).unwrap().entries().unwrap().is_empty());
    runtime.shutdown();
}
