//! Integration tests for the TCP server

use std::io::Write;
use std::net::SocketAddr;
use std::net::TcpListener;
use std::net::TcpStream;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use gcspy::driver::linear::USED_STREAM;
use gcspy::protocol::read_frame;
use gcspy::protocol::Command;
use gcspy::protocol::CommandStream;
use gcspy::types::EventId;
use gcspy::types::SpaceId;
use gcspy::types::StreamKind;
use gcspy::Driver;
use gcspy::Interpreter;
use gcspy::LinearSpaceDriver;
use gcspy::Session;
use gcspy::SpyConfig;
use gcspy::SpyError;
use gcspy::SpyResult;
use gcspy::SpyServer;
use similar_asserts::assert_eq;
use test_log::test;

const MAX_FRAME_LEN: usize = 1 << 20;
const GC_START: EventId = EventId(0);
const GC_END: EventId = EventId(1);

fn heap_driver() -> LinearSpaceDriver {
    LinearSpaceDriver::new(SpaceId(0), "heap", 0x10000, 0x10000 + 8 * 256, 256)
        .expect("driver")
        .with_main_space(true)
}

fn config() -> SpyConfig {
    SpyConfig::default()
        .with_enabled(true)
        .with_port(0)
        .with_server_name("test-vm")
}

fn start(config: SpyConfig, driver: &LinearSpaceDriver) -> (SpyServer, SocketAddr) {
    let mut server = SpyServer::new(config, &["gc start", "gc end"]).expect("server");
    server.add_space(driver.descriptor().clone()).expect("space");
    let addr = server.start().expect("start");
    (server, addr)
}

fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("timeout");
    stream
}

fn next_frame(stream: &mut TcpStream) -> Vec<Command> {
    read_frame(stream, MAX_FRAME_LEN)
        .expect("read")
        .expect("frame")
}

fn send<F>(stream: &mut TcpStream, build: F)
where F: FnOnce(&mut CommandStream) -> SpyResult<()> {
    let mut commands = CommandStream::new();
    build(&mut commands).expect("encode");
    stream
        .write_all(&commands.finish().expect("finish"))
        .expect("send");
}

fn wait_until(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("timed out waiting for {what}");
}

fn attach(addr: SocketAddr, server: &SpyServer) -> TcpStream {
    let mut client = connect(addr);
    match next_frame(&mut client).as_slice() {
        [Command::Hello(info)] => assert_eq!(info.name, "test-vm"),
        other => panic!("expected hello, got {other:?}"),
    }
    wait_until("client attach", || server.is_connected(GC_START));
    client
}

#[test]
fn client_receives_hello_and_reports() {
    let mut driver = heap_driver();
    let (mut server, addr) = start(config(), &driver);
    assert!(!server.is_connected(GC_START));

    let mut client = connect(addr);
    let mut session = Session::new();
    session.apply_all(next_frame(&mut client)).expect("hello");
    let info = session.info().expect("info").clone();
    assert_eq!(info.events, vec!["gc start".to_string(), "gc end".to_string()]);
    assert_eq!(info.spaces, vec![driver.descriptor().clone()]);
    wait_until("client attach", || server.is_connected(GC_START));

    driver.scan(0x10000, 100, true).expect("scan");
    driver.scan(0x10000 + 300, 40, false).expect("scan");
    driver.transmit(&mut server, GC_START).expect("transmit");
    server.safepoint(GC_START).expect("safepoint");

    while session.safepoints().is_empty() {
        session.apply_all(next_frame(&mut client)).expect("apply");
    }
    let space = session.space(SpaceId(0)).expect("space");
    assert_eq!(space.tile_count, 8);
    assert_eq!(space.tile_names.len(), 8);
    assert_eq!(
        space.streams.get(&USED_STREAM).map(|v| v[..2].to_vec()),
        Some(vec![100, 40])
    );
    assert_eq!(session.safepoints()[0].event, GC_START);
    assert_eq!(session.safepoints()[0].count, 1);
}

#[test]
fn pause_holds_the_collector_until_step_or_play() {
    let driver = heap_driver();
    let (mut server, addr) = start(config(), &driver);
    let mut client = attach(addr, &server);

    send(&mut client, |c| c.pause());
    wait_until("pause", || server.is_paused());

    let passed = Arc::new(AtomicUsize::new(0));
    let collector = {
        let passed = Arc::clone(&passed);
        thread::spawn(move || {
            for _ in 0..2 {
                server.safepoint(GC_END).expect("safepoint");
                passed.fetch_add(1, Ordering::SeqCst);
            }
            server
        })
    };

    thread::sleep(Duration::from_millis(100));
    assert_eq!(passed.load(Ordering::SeqCst), 0);

    send(&mut client, |c| c.step());
    wait_until("one step", || passed.load(Ordering::SeqCst) == 1);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(passed.load(Ordering::SeqCst), 1);

    send(&mut client, |c| c.play());
    wait_until("play", || passed.load(Ordering::SeqCst) == 2);
    let server = collector.join().expect("collector");
    assert!(!server.is_paused());
}

#[test]
fn disabled_events_are_not_connected() {
    let driver = heap_driver();
    let (server, addr) = start(config(), &driver);
    let mut client = attach(addr, &server);

    send(&mut client, |c| c.enable_event(GC_END, false));
    wait_until("event disabled", || !server.is_connected(GC_END));
    assert!(server.is_connected(GC_START));
    // unknown events are never connected
    assert!(!server.is_connected(EventId(9)));

    send(&mut client, |c| c.enable_event(GC_END, true));
    wait_until("event enabled", || server.is_connected(GC_END));
}

#[test]
fn vanished_client_releases_the_collector_and_a_new_one_can_attach() {
    let mut driver = heap_driver();
    let (mut server, addr) = start(config(), &driver);
    let mut client = attach(addr, &server);

    send(&mut client, |c| c.pause());
    wait_until("pause", || server.is_paused());
    drop(client);
    wait_until("detach", || !server.has_client());

    // nobody is listening, so neither call blocks or fails
    server.safepoint(GC_START).expect("safepoint");
    driver.transmit(&mut server, GC_START).expect("transmit");

    let mut client = attach(addr, &server);
    driver.transmit(&mut server, GC_START).expect("transmit");
    let frame = next_frame(&mut client);
    assert!(matches!(frame[0], Command::SpaceBegin { space: SpaceId(0), .. }));
    // a new client always starts with the tile names
    assert!(matches!(frame[1], Command::TileNames { .. }));
}

#[test]
fn explicit_disconnect_detaches() {
    let driver = heap_driver();
    let (server, addr) = start(config(), &driver);
    let mut client = attach(addr, &server);
    send(&mut client, |c| c.disconnect());
    wait_until("detach", || !server.has_client());
    assert!(!server.is_connected(GC_START));
}

#[test]
fn second_client_is_turned_away() {
    let driver = heap_driver();
    let (server, addr) = start(config(), &driver);
    let _first = attach(addr, &server);

    let mut second = connect(addr);
    assert!(read_frame(&mut second, MAX_FRAME_LEN).expect("read").is_none());
    assert!(server.has_client());
}

#[test]
fn shutdown_says_goodbye() {
    let driver = heap_driver();
    let (mut server, addr) = start(config(), &driver);
    let mut client = attach(addr, &server);

    server.shutdown();
    assert_eq!(next_frame(&mut client), vec![Command::Shutdown]);
    assert!(read_frame(&mut client, MAX_FRAME_LEN).expect("read").is_none());
    assert!(!server.is_connected(GC_START));
}

#[test]
fn start_waits_for_the_first_client() {
    let port = {
        let probe = TcpListener::bind("127.0.0.1:0").expect("probe");
        probe.local_addr().expect("addr").port()
    };
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let client = thread::spawn(move || {
        for _ in 0..500 {
            if let Ok(mut stream) = TcpStream::connect(addr) {
                stream
                    .set_read_timeout(Some(Duration::from_secs(5)))
                    .expect("timeout");
                return next_frame(&mut stream);
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("server never listened");
    });

    let driver = heap_driver();
    let (server, bound) = start(config().with_port(port).with_wait_for_client(true), &driver);
    assert_eq!(bound, addr);
    assert!(server.has_client());

    let hello = client.join().expect("client");
    assert!(matches!(hello.as_slice(), [Command::Hello(_)]));
}

#[test]
fn add_space_after_start_is_rejected() {
    let driver = heap_driver();
    let (mut server, _) = start(config(), &driver);
    assert!(matches!(
        server.add_space(driver.descriptor().clone()),
        Err(SpyError::AlreadyStarted)
    ));
    assert!(matches!(server.start(), Err(SpyError::AlreadyStarted)));
}

#[test]
fn step_while_running_is_not_banked() {
    let driver = heap_driver();
    let (mut server, addr) = start(config(), &driver);
    let mut client = attach(addr, &server);

    send(&mut client, |c| {
        c.step()?;
        c.pause()
    });
    wait_until("pause", || server.is_paused());

    let passed = Arc::new(AtomicUsize::new(0));
    let collector = {
        let passed = Arc::clone(&passed);
        thread::spawn(move || {
            server.safepoint(GC_END).expect("safepoint");
            passed.fetch_add(1, Ordering::SeqCst);
            server
        })
    };

    thread::sleep(Duration::from_millis(100));
    assert_eq!(passed.load(Ordering::SeqCst), 0);

    send(&mut client, |c| c.play());
    collector.join().expect("collector");
    assert_eq!(passed.load(Ordering::SeqCst), 1);
}

#[test]
fn every_client_gets_tile_names() {
    let mut driver = heap_driver();
    let (mut server, addr) = start(config(), &driver);

    let mut first = attach(addr, &server);
    let mut session = Session::new();
    driver.transmit(&mut server, GC_START).expect("transmit");
    session.apply_all(next_frame(&mut first)).expect("apply");
    assert_eq!(session.space(SpaceId(0)).map(|s| s.tile_names.len()), Some(8));
    drop(first);
    wait_until("detach", || !server.has_client());

    let mut second = attach(addr, &server);
    let mut session = Session::new();
    for _ in 0..3 {
        driver.transmit(&mut server, GC_START).expect("transmit");
        session.apply_all(next_frame(&mut second)).expect("apply");
    }
    let space = session.space(SpaceId(0)).expect("space");
    assert_eq!(space.tile_names.len(), 8);
    assert_eq!(space.tile_names[0], "0x10000-0x10100");
}

#[test]
fn first_report_to_a_client_is_charged_as_compensation() {
    let mut driver =
        LinearSpaceDriver::new(SpaceId(0), "big heap", 0x10000, 0x10000 + 4096 * 16, 16)
            .expect("driver");
    let (mut server, addr) = start(config(), &driver);
    let mut client = attach(addr, &server);

    let reader = thread::spawn(move || {
        let mut session = Session::new();
        while session.safepoints().is_empty() {
            session.apply_all(next_frame(&mut client)).expect("apply");
        }
        session
    });

    driver.scan(0x10000, 4096 * 16, true).expect("scan");
    driver.transmit(&mut server, GC_START).expect("transmit");
    server.safepoint(GC_START).expect("safepoint");

    let session = reader.join().expect("reader");
    assert_eq!(session.space(SpaceId(0)).map(|s| s.tile_count), Some(4096));
    assert!(session.safepoints()[0].compensation_us > 0);
}

#[test]
fn misuse_discards_the_half_built_report() {
    let mut driver = heap_driver();
    let (mut server, addr) = start(config(), &driver);
    let mut client = attach(addr, &server);

    server.begin_space(GC_END, SpaceId(0), 8).expect("begin");
    assert!(matches!(
        server.write_stream(SpaceId(0), USED_STREAM, StreamKind::Byte, &[300]),
        Err(SpyError::ValueOutOfRange { value: 300, .. })
    ));
    // the broken report is gone, not just paused
    assert!(matches!(
        server.end_space(SpaceId(0)),
        Err(SpyError::NoOpenSpace(SpaceId(0)))
    ));
    assert!(server.has_client());

    driver.transmit(&mut server, GC_START).expect("transmit");
    server.safepoint(GC_START).expect("safepoint");

    let frame = next_frame(&mut client);
    assert_eq!(
        frame[0],
        Command::SpaceBegin {
            space: SpaceId(0),
            event: GC_START,
            tile_count: 8
        }
    );
    assert_eq!(frame.last(), Some(&Command::SpaceEnd { space: SpaceId(0) }));
    let mut session = Session::new();
    session.apply_all(frame).expect("complete report");
    assert!(matches!(
        next_frame(&mut client).as_slice(),
        [Command::Safepoint { event: GC_START, count: 1, .. }]
    ));
}
