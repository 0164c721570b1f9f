//! TCP server that streams reports to one attached visualization client.
//!
//! The collector thread owns the [`SpyServer`] and reports through it like
//! any other [`Interpreter`]. An acceptor thread hands new clients over, and a
//! reader thread per client applies the commands it sends back (pause, play,
//! step, event filtering).

use std::collections::HashSet;
use std::net::Shutdown;
use std::net::SocketAddr;
use std::net::TcpListener;
use std::net::TcpStream;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::thread;
use std::thread::JoinHandle;
use std::time::Instant;

use gcspy_types::ControlFlags;
use gcspy_types::EventId;
use gcspy_types::ServerInfo;
use gcspy_types::SpaceDescriptor;
use gcspy_types::SpaceId;
use gcspy_types::StreamId;
use gcspy_types::StreamKind;

use crate::config::SpyConfig;
use crate::error::SpyError;
use crate::error::SpyResult;
use crate::interpreter::Interpreter;
use crate::interpreter::StreamInterpreter;
use crate::protocol::read_frame;
use crate::protocol::Command;

#[derive(Debug, Default)]
struct ClientState {
    connected: bool,
    /// bumped per accepted client so a stale reader cannot detach a newer one
    generation: u64,
    paused: bool,
    steps: u32,
    disabled_events: HashSet<EventId>,
}

#[derive(Debug)]
struct Client {
    generation: u64,
    interp: StreamInterpreter<TcpStream>,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<ClientState>,
    resumed: Condvar,
    incoming: Mutex<Option<Client>>,
    shutting_down: AtomicBool,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn incoming(&self) -> MutexGuard<'_, Option<Client>> {
        self.incoming.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn detach(&self, generation: u64) {
        let mut state = self.state();
        if state.generation == generation {
            state.connected = false;
            state.paused = false;
            state.steps = 0;
        }
        self.resumed.notify_all();
    }

    fn apply(&self, command: &Command) -> bool {
        let mut state = self.state();
        match command {
            Command::Play => {
                state.paused = false;
                state.steps = 0;
                self.resumed.notify_all();
            }
            Command::Pause => state.paused = true,
            Command::Step if state.paused => {
                state.steps = state.steps.saturating_add(1);
                self.resumed.notify_all();
            }
            Command::Step => tracing::debug!("ignoring step while running"),
            Command::EnableEvent { event, enabled } => {
                if *enabled {
                    state.disabled_events.remove(event);
                } else {
                    state.disabled_events.insert(*event);
                }
            }
            Command::Disconnect => return false,
            other => tracing::warn!("ignoring unexpected client command {other:?}"),
        }
        true
    }
}

/// Serves reports to a single TCP client.
///
/// Transport failures never reach the caller: the client is dropped, the
/// failure is logged, and reporting continues as if nobody were attached.
pub struct SpyServer {
    config: SpyConfig,
    info: ServerInfo,
    shared: Arc<Shared>,
    writer: Option<Client>,
    local_addr: Option<SocketAddr>,
    acceptor: Option<JoinHandle<()>>,
    /// spans client adoption in `begin_space`
    timer_started: Option<Instant>,
}

impl SpyServer {
    pub fn new(config: SpyConfig, events: &[&str]) -> SpyResult<Self> {
        config.validate()?;
        let info = ServerInfo {
            name: config.server_name.clone(),
            version: utils::version::VERSION.clone(),
            general_info: config.general_info.clone(),
            events: events.iter().map(|e| e.to_string()).collect(),
            spaces: Vec::new(),
        };
        Ok(Self {
            config,
            info,
            shared: Arc::default(),
            writer: None,
            local_addr: None,
            acceptor: None,
            timer_started: None,
        })
    }

    /// Register a space; all spaces must be known before `start`.
    pub fn add_space(&mut self, space: SpaceDescriptor) -> SpyResult<()> {
        if self.local_addr.is_some() {
            return Err(SpyError::AlreadyStarted);
        }
        if self.info.spaces.iter().any(|s| s.id == space.id) {
            return Err(SpyError::DuplicateSpace(space.id));
        }
        tracing::debug!("registered {} ({})", space.id, space.name);
        self.info.spaces.push(space);
        Ok(())
    }

    /// Bind the listener and start accepting clients.
    ///
    /// With `wait_for_client` set this blocks until the first client attaches.
    pub fn start(&mut self) -> SpyResult<SocketAddr> {
        if self.local_addr.is_some() {
            return Err(SpyError::AlreadyStarted);
        }
        let listener = TcpListener::bind(self.config.socket_addr()?)?;
        let addr = listener.local_addr()?;
        self.local_addr = Some(addr);

        if self.config.wait_for_client {
            tracing::info!("gcspy server waiting for a client on {addr}");
            let (stream, peer) = listener.accept()?;
            attach(stream, peer, &self.info, &self.shared, self.config.max_frame_len)?;
        }

        let info = self.info.clone();
        let shared = Arc::clone(&self.shared);
        let max_frame_len = self.config.max_frame_len;
        let acceptor = thread::Builder::new()
            .name("gcspy-accept".to_string())
            .spawn(move || accept_loop(listener, info, shared, max_frame_len))?;
        self.acceptor = Some(acceptor);
        Ok(addr)
    }

    pub fn local_addr(&self) -> SpyResult<SocketAddr> {
        self.local_addr.ok_or(SpyError::NotStarted)
    }

    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    pub fn config(&self) -> &SpyConfig {
        &self.config
    }

    pub fn has_client(&self) -> bool {
        self.shared.state().connected
    }

    pub fn is_paused(&self) -> bool {
        let state = self.shared.state();
        state.connected && state.paused
    }

    /// Say goodbye to the client and stop accepting new ones.
    pub fn shutdown(&mut self) {
        let pending = self.shared.incoming().take();
        for mut client in self.writer.take().into_iter().chain(pending) {
            if let Err(err) = client.interp.send_shutdown() {
                tracing::debug!("client gone before shutdown: {err}");
            }
            let _ = client.interp.get_ref().shutdown(Shutdown::Both);
        }
        self.shared.shutting_down.store(true, Ordering::SeqCst);
        {
            let mut state = self.shared.state();
            state.connected = false;
            state.paused = false;
        }
        self.shared.resumed.notify_all();

        if let Some(acceptor) = self.acceptor.take() {
            // wake the blocking accept
            if let Some(addr) = self.local_addr {
                let _ = TcpStream::connect(wake_addr(addr));
            }
            if acceptor.join().is_err() {
                tracing::warn!("gcspy acceptor thread panicked");
            }
            tracing::info!("gcspy server {} stopped", self.info.name);
        }
    }

    fn check_event(&self, event: EventId) -> SpyResult<()> {
        if event.index() < self.info.events.len() {
            Ok(())
        } else {
            Err(SpyError::UnknownEvent(event))
        }
    }

    /// Pick up a newly accepted client, or forget one that went away.
    ///
    /// Only called between frames so a client never sees half a report.
    fn sync_client(&mut self) {
        let incoming = self.shared.incoming().take();
        let state = self.shared.state();
        let current = |client: &Client| state.connected && client.generation == state.generation;
        if let Some(client) = incoming.filter(|c| current(c)) {
            self.writer = Some(client);
        } else if self.writer.as_ref().is_some_and(|c| !current(c)) {
            tracing::info!("gcspy client detached");
            self.writer = None;
        }
    }

    fn drop_client(&mut self, err: &SpyError) {
        tracing::warn!("dropping gcspy client: {err}");
        if let Some(client) = self.writer.take() {
            let _ = client.interp.get_ref().shutdown(Shutdown::Both);
            self.shared.detach(client.generation);
        }
    }

    fn with_writer<F>(&mut self, f: F) -> SpyResult<()>
    where F: FnOnce(&mut StreamInterpreter<TcpStream>) -> SpyResult<()> {
        let Some(client) = self.writer.as_mut() else {
            return Ok(());
        };
        match f(&mut client.interp) {
            Err(err) if err.is_transport() => {
                self.drop_client(&err);
                Ok(())
            }
            Err(err) => {
                // the client must not see the rest of a broken report
                client.interp.discard_report();
                Err(err)
            }
            Ok(()) => Ok(()),
        }
    }
}

impl Drop for SpyServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Interpreter for SpyServer {
    fn is_connected(&self, event: EventId) -> bool {
        if event.index() >= self.info.events.len() {
            return false;
        }
        let state = self.shared.state();
        state.connected && !state.disabled_events.contains(&event)
    }

    fn begin_space(&mut self, event: EventId, space: SpaceId, tile_count: u32) -> SpyResult<()> {
        self.check_event(event)?;
        self.sync_client();
        self.with_writer(|w| w.begin_space(event, space, tile_count))
    }

    fn needs_tile_names(&self, space: SpaceId) -> bool {
        self.writer
            .as_ref()
            .is_some_and(|c| c.interp.needs_tile_names(space))
    }

    fn write_tile_names(&mut self, space: SpaceId, names: &[String]) -> SpyResult<()> {
        self.with_writer(|w| w.write_tile_names(space, names))
    }

    fn write_stream(
        &mut self,
        space: SpaceId,
        stream: StreamId,
        kind: StreamKind,
        values: &[i32],
    ) -> SpyResult<()> {
        self.with_writer(|w| w.write_stream(space, stream, kind, values))
    }

    fn write_control(&mut self, space: SpaceId, len: u32) -> SpyResult<()> {
        self.with_writer(|w| w.write_control(space, len))
    }

    fn put_control(&mut self, flags: ControlFlags) -> SpyResult<()> {
        self.with_writer(|w| w.put_control(flags))
    }

    fn write_summary(&mut self, space: SpaceId, stream: StreamId, values: &[i32]) -> SpyResult<()> {
        self.with_writer(|w| w.write_summary(space, stream, values))
    }

    fn write_space_info(&mut self, space: SpaceId, info: &str) -> SpyResult<()> {
        self.with_writer(|w| w.write_space_info(space, info))
    }

    fn end_space(&mut self, space: SpaceId) -> SpyResult<()> {
        self.with_writer(|w| w.end_space(space))
    }

    fn safepoint(&mut self, event: EventId) -> SpyResult<()> {
        self.check_event(event)?;
        self.sync_client();
        if !self.is_connected(event) {
            return Ok(());
        }
        self.with_writer(|w| w.safepoint(event))?;
        if self.config.verbose {
            tracing::info!("gcspy safepoint for {:?}", self.info.event_name(event));
        }

        let mut state = self.shared.state();
        loop {
            if !state.connected || !state.paused {
                break;
            }
            if state.steps > 0 {
                state.steps -= 1;
                break;
            }
            tracing::debug!("collector paused at {event}");
            state = self
                .shared
                .resumed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        Ok(())
    }

    fn start_compensation_timer(&mut self) {
        self.timer_started.get_or_insert_with(Instant::now);
    }

    fn stop_compensation_timer(&mut self) {
        let Some(started) = self.timer_started.take() else {
            return;
        };
        if let Some(client) = self.writer.as_mut() {
            client.interp.add_compensation(started.elapsed());
        }
    }
}

fn wake_addr(addr: SocketAddr) -> SocketAddr {
    if addr.ip().is_unspecified() {
        SocketAddr::from(([127, 0, 0, 1], addr.port()))
    } else {
        addr
    }
}

/// Greet a new client and hand it to the collector side.
///
/// The client is published before it counts as connected, so a collector
/// that sees `is_connected` always finds a writer to adopt.
fn attach(
    stream: TcpStream,
    peer: SocketAddr,
    info: &ServerInfo,
    shared: &Arc<Shared>,
    max_frame_len: usize,
) -> SpyResult<()> {
    stream.set_nodelay(true)?;
    let mut reader = stream.try_clone()?;
    let interp = StreamInterpreter::with_hello(stream, info)?.with_max_frame_len(max_frame_len);

    let generation = {
        let mut state = shared.state();
        state.generation += 1;
        *shared.incoming() = Some(Client {
            generation: state.generation,
            interp,
        });
        state.connected = true;
        state.paused = false;
        state.steps = 0;
        state.disabled_events.clear();
        state.generation
    };
    tracing::info!("gcspy client {peer} attached");

    let reader_shared = Arc::clone(shared);
    let spawned = thread::Builder::new()
        .name("gcspy-client".to_string())
        .spawn(move || {
            let shared = reader_shared;
            loop {
                match read_frame(&mut reader, max_frame_len) {
                    Ok(Some(commands)) => {
                        if !commands.iter().all(|c| shared.apply(c)) {
                            tracing::info!("gcspy client {peer} disconnected");
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        tracing::debug!("gcspy client {peer} read failed: {err}");
                        break;
                    }
                }
            }
            shared.detach(generation);
        });
    if let Err(err) = spawned {
        shared.detach(generation);
        shared.incoming().take();
        return Err(err.into());
    }
    Ok(())
}

fn accept_loop(listener: TcpListener, info: ServerInfo, shared: Arc<Shared>, max_frame_len: usize) {
    for stream in listener.incoming() {
        if shared.shutting_down.load(Ordering::SeqCst) {
            break;
        }
        let stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                tracing::warn!("gcspy accept failed: {err}");
                continue;
            }
        };
        let peer = match stream.peer_addr() {
            Ok(peer) => peer,
            Err(err) => {
                tracing::warn!("gcspy client without peer address: {err}");
                continue;
            }
        };
        if shared.state().connected {
            tracing::warn!("rejecting gcspy client {peer}: a client is already attached");
            let _ = stream.shutdown(Shutdown::Both);
            continue;
        }
        if let Err(err) = attach(stream, peer, &info, &shared, max_frame_len) {
            tracing::warn!("failed to attach gcspy client {peer}: {err}");
        }
    }
}
