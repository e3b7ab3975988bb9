use std::io::{self, ErrorKind};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::libc::c_int;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use tracing::{debug, error, info, trace, warn};

use crate::config::Config;
use crate::connection::accept_handshake;
use crate::error::{Error, Result};
use crate::server::handler::{Event, Handler};
use crate::server::idle::IdleBudget;
use crate::server::registry::{Registry, SocketEntry};
use crate::server::signal::{self, ShutdownHandle};

/// Lifecycle of the event loop. Only moves forward; `Shutdown` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LoopState {
    /// Bound and listening; no cycle has run yet.
    Setup,
    /// Polling.
    Running,
    /// Every socket closed, listener included. No further cycles run.
    Shutdown,
}

type PollFn = fn(&mut [PollFd<'_>], PollTimeout) -> nix::Result<c_int>;
type AcceptFn = fn(&TcpListener) -> io::Result<(TcpStream, SocketAddr)>;

/// Round a budget up to whole milliseconds so `poll` never wakes before it is spent.
fn poll_timeout(budget: Duration) -> PollTimeout {
    let millis = budget.as_micros().div_ceil(1000);
    PollTimeout::from(u16::try_from(millis).unwrap_or(u16::MAX))
}

/// Single-threaded WebSocket server.
///
/// Owns the listening socket, the [`Registry`] and the injected [`Handler`].
/// Each [`turn`](EventLoop::turn) blocks in `poll(2)` on the listener, every
/// pending handshake and every open connection, for at most the remaining idle
/// budget (or the nearest handshake deadline). It then accepts at most one new
/// client, runs the handshake of each readable pending socket, services each
/// ready connection once, and emits idle notifications when the budget runs
/// out. Every socket is non-blocking and is only touched after `poll` reported
/// it ready.
///
/// ```rust,no_run
/// use wsloop::{Config, EventLoop, Handler, Message, Registry, ConnectionId};
///
/// struct Echo;
///
/// impl Handler for Echo {
///     fn on_receive(&mut self, registry: &mut Registry, id: ConnectionId, message: Message) {
///         let _ = registry.send(id, message);
///     }
/// }
///
/// let server = EventLoop::bind(Config::new("127.0.0.1:8080"), Echo)?;
/// server.install_signal_handlers()?;
/// server.run()?;
/// # Ok::<(), wsloop::Error>(())
/// ```
pub struct EventLoop<H> {
    config: Config,
    address: SocketAddr,
    listener: Option<TcpListener>,
    registry: Registry,
    handler: H,
    state: LoopState,
    idle: IdleBudget,
    shutdown: ShutdownHandle,
    multiplex: PollFn,
    accept_socket: AcceptFn,
}

impl<H: Handler> EventLoop<H> {
    /// SETUP: validate the configuration, bind and listen.
    ///
    /// # Errors
    ///
    /// `Error::Config` for an invalid configuration, `Error::Io` if binding fails.
    pub fn bind(config: Config, handler: H) -> Result<Self> {
        config.validate()?;

        let listener = TcpListener::bind(config.address.as_str())?;
        listener.set_nonblocking(true)?;
        let address = listener.local_addr()?;
        info!(%address, "listening");

        let mut registry = Registry::new();
        registry.watch_listener(listener.as_raw_fd());

        Ok(Self {
            idle: IdleBudget::new(config.idle_interval),
            config,
            address,
            listener: Some(listener),
            registry,
            handler,
            state: LoopState::Setup,
            shutdown: ShutdownHandle::new(),
            multiplex: poll::<PollTimeout>,
            accept_socket: TcpListener::accept,
        })
    }

    /// Address the listener was bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LoopState {
        self.state
    }

    /// The injected handler.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Mutable access to the injected handler.
    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Read access to the live connections.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Act on the registry between cycles; resulting notifications are
    /// dispatched before this returns.
    pub fn with_registry<R>(&mut self, f: impl FnOnce(&mut Registry) -> R) -> R {
        let result = f(&mut self.registry);
        self.dispatch();
        result
    }

    /// Token that stops the loop at its next cycle.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Route SIGINT and SIGTERM to the shutdown token.
    ///
    /// # Errors
    ///
    /// `Error::Io` if a handler cannot be installed.
    pub fn install_signal_handlers(&self) -> Result<()> {
        signal::install_handlers()
    }

    /// Enter RUNNING and dispatch the start notification. No-op after the first call.
    pub fn start(&mut self) {
        if self.state != LoopState::Setup {
            return;
        }
        self.state = LoopState::Running;
        info!("event loop running");
        self.handler.on_start(&mut self.registry);
        self.dispatch();
    }

    /// Run cycles until SHUTDOWN.
    ///
    /// # Errors
    ///
    /// `Error::Multiplexer` if `poll` failed. Every socket is closed and the
    /// stop notification dispatched before the error is returned.
    pub fn run(mut self) -> Result<()> {
        self.start();
        while self.turn()? != LoopState::Shutdown {}
        Ok(())
    }

    /// Run one cycle of the loop and report the resulting state.
    ///
    /// # Errors
    ///
    /// `Error::Multiplexer` if `poll` failed; the loop is then in SHUTDOWN.
    pub fn turn(&mut self) -> Result<LoopState> {
        self.start();
        if self.state == LoopState::Shutdown {
            return Ok(LoopState::Shutdown);
        }
        if self.shutdown.is_requested() {
            self.stop();
            return Ok(self.state);
        }

        let started = Instant::now();
        let ready = match self.wait(self.budget(started)) {
            Ok(ready) => ready,
            Err(Errno::EINTR) => {
                if self.shutdown.is_requested() {
                    self.stop();
                    return Ok(self.state);
                }
                Vec::new()
            }
            Err(errno) => {
                error!(error = %errno, "poll failed, shutting down");
                let err = Error::from(errno);
                self.registry.report(err.clone());
                self.dispatch();
                self.stop();
                return Err(err);
            }
        };

        for fd in ready {
            match self.registry.lookup(fd) {
                Some(SocketEntry::Listener) => self.accept(),
                Some(SocketEntry::Handshake) => self.handshake(fd),
                Some(SocketEntry::Connection(id)) => self.registry.service(
                    id,
                    self.config.max_packet_size,
                    self.config.max_payload_size,
                ),
                None => trace!(fd, "ready descriptor no longer registered"),
            }
            self.dispatch();
        }

        let expired = self.registry.expire_handshakes(Instant::now());
        if expired > 0 {
            debug!(expired, "closed silent sockets");
        }

        if self.idle.consume(started.elapsed()) {
            trace!(connections = self.registry.len(), "idle interval elapsed");
            self.registry.idle_all();
            self.dispatch();
        }

        Ok(self.state)
    }

    /// SHUTDOWN: close the listener and every connection, dispatch their
    /// disconnects, then stop.
    pub fn shutdown(&mut self) {
        self.stop();
    }

    /// Time `poll` may block: the idle budget, cut short by the nearest
    /// handshake deadline.
    fn budget(&self, now: Instant) -> Duration {
        let idle = self.idle.remaining();
        self.registry
            .next_deadline()
            .map_or(idle, |deadline| idle.min(deadline.saturating_duration_since(now)))
    }

    /// Block until a watched socket is readable or `budget` has passed.
    fn wait(&self, budget: Duration) -> std::result::Result<Vec<RawFd>, Errno> {
        let capacity = 1 + self.registry.pending_handshakes() + self.registry.len();
        let mut raw = Vec::with_capacity(capacity);
        let mut fds = Vec::with_capacity(capacity);

        if let Some(listener) = &self.listener {
            raw.push(listener.as_raw_fd());
            fds.push(PollFd::new(listener.as_fd(), PollFlags::POLLIN));
        }
        for stream in self.registry.pending_streams() {
            raw.push(stream.as_raw_fd());
            fds.push(PollFd::new(stream.as_fd(), PollFlags::POLLIN));
        }
        for connection in self.registry.connections() {
            raw.push(connection.raw_fd());
            fds.push(PollFd::new(connection.borrow_fd(), PollFlags::POLLIN));
        }

        if (self.multiplex)(&mut fds, poll_timeout(budget))? == 0 {
            return Ok(Vec::new());
        }

        Ok(raw
            .into_iter()
            .zip(&fds)
            .filter(|(_, fd)| fd.revents().is_some_and(|events| !events.is_empty()))
            .map(|(raw, _)| raw)
            .collect())
    }

    /// Take one client off the listen queue and watch it for its upgrade request.
    fn accept(&mut self) {
        let Some(listener) = &self.listener else {
            return;
        };
        let (stream, peer) = match (self.accept_socket)(listener) {
            Ok(accepted) => accepted,
            Err(e) if e.kind() == ErrorKind::WouldBlock => return,
            Err(e) => {
                warn!(error = %e, "accept failed");
                self.registry.report(e.into());
                return;
            }
        };
        if let Err(e) = stream.set_nonblocking(true) {
            warn!(%peer, error = %e, "cannot make socket non-blocking");
            self.registry.report(e.into());
            return;
        }
        debug!(%peer, "accepted");

        let deadline = Instant::now() + self.config.handshake_timeout;
        self.registry.await_handshake(stream, peer, deadline);
    }

    /// Read the upgrade request of a pending socket reported readable.
    fn handshake(&mut self, fd: RawFd) {
        let Some(mut pending) = self.registry.take_handshake(fd) else {
            return;
        };
        match accept_handshake(&mut pending.stream, &self.config) {
            Ok(Some(request)) => {
                if let Err(e) = self.registry.insert(pending.stream, request) {
                    self.registry.report(e);
                }
            }
            Ok(None) => {
                self.registry
                    .await_handshake(pending.stream, pending.peer, pending.deadline);
            }
            Err(e) => warn!(peer = %pending.peer, error = %e, "handshake rejected"),
        }
    }

    fn stop(&mut self) {
        if self.state == LoopState::Shutdown {
            return;
        }
        self.state = LoopState::Shutdown;
        if let Some(listener) = self.listener.take() {
            self.registry.unwatch_listener(listener.as_raw_fd());
        }
        self.registry.remove_all();
        self.dispatch();
        self.handler.on_stop(&mut self.registry);
        self.dispatch();
        info!("event loop stopped");
    }

    /// Deliver queued notifications, including any queued by the handler itself.
    fn dispatch(&mut self) {
        while let Some(event) = self.registry.next_event() {
            let registry = &mut self.registry;
            match event {
                Event::Connect(id) => self.handler.on_connect(registry, id),
                Event::Disconnect(connection) => self.handler.on_disconnect(registry, &connection),
                Event::Send(id, message) => self.handler.on_send(registry, id, &message),
                Event::Receive(id, message) => self.handler.on_receive(registry, id, message),
                Event::Idle(id) => {
                    if registry.contains(id) {
                        self.handler.on_idle(registry, id);
                    }
                }
                Event::Error(id, err) => self.handler.on_error(registry, id, &err),
            }
        }
    }
}
