//! The TCP listener and per-connection handlers.

use crate::{
    protocol::{Command, Response},
    store::Store,
};
use handoff_sync::{CancelToken, ThreadPool, WaitRegistry};
use std::{
    io::{self, BufRead, BufReader, Write},
    net::{TcpListener, TcpStream},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering::SeqCst},
    },
    thread,
    time::Duration,
};

/// How often the accept loop polls a nonblocking listener.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Read timeout on client sockets. An idle connection wakes up this often
/// to notice a shutdown in progress.
const READ_POLL: Duration = Duration::from_millis(250);

/// Maximum concurrent connections; each holds a pool worker for its whole
/// lifetime.
const MAX_CONNECTIONS: usize = 64;

/// How long an idle connection worker lingers before its thread retires.
const WORKER_KEEP_ALIVE: Duration = Duration::from_secs(30);

/// How long the accept loop waits for a free worker before refusing a
/// connection.
const SUBMIT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long shutdown waits for the worker pool to wind down.
const POOL_DRAIN: Duration = Duration::from_secs(5);

/// The key-value server: a TCP listener serving each connection on its own
/// worker thread, over a [`Store`] and a [`WaitRegistry`] for blocking
/// reads.
///
/// Connection threads come from a bounded [`ThreadPool`]: a connection
/// holds its worker until the client disconnects, so the pool size caps the
/// number of concurrent clients, and a full pool pushes back on the accept
/// loop instead of spawning without limit.
///
/// All state is behind [`Arc`]s, so the server is cheap to clone; each
/// connection thread works on its own clone. [`run`](Self::run) owns the
/// accept loop and returns once a `SHUTDOWN` command has been served and
/// every in-flight connection has drained.
///
/// Shutdown choreography: `SHUTDOWN` flips the accepting flag and fires the
/// shared [`CancelToken`]. Blocked `BGET`s are cancelled and answer
/// `(nil)`; idle connections notice the token on their next read-timeout
/// tick and close; the accept loop stops taking new connections and waits
/// for the in-flight count to reach zero.
#[derive(Clone)]
pub struct Server {
    store: Arc<Store>,
    registry: Arc<WaitRegistry<String, String>>,
    pool: Arc<ThreadPool>,
    shutdown: CancelToken,
    accepting: Arc<AtomicBool>,
    in_flight: Arc<AtomicUsize>,
}

impl Server {
    /// Returns a new server with an empty store.
    pub fn new() -> Self {
        Self {
            store: Arc::new(Store::new()),
            registry: Arc::new(WaitRegistry::new()),
            pool: Arc::new(ThreadPool::new(MAX_CONNECTIONS, WORKER_KEEP_ALIVE)),
            shutdown: CancelToken::new(),
            accepting: Arc::new(AtomicBool::new(true)),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// The server's backing store.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Serves connections from `listener` until shut down.
    ///
    /// Blocks the calling thread. Returns once `SHUTDOWN` has been served
    /// and all in-flight connections have closed. Errors on individual
    /// connections are logged, not propagated; only listener-level failures
    /// surface here.
    pub fn run(&self, listener: TcpListener) -> io::Result<()> {
        listener.set_nonblocking(true)?;
        tracing::info!(addr = %listener.local_addr()?, "listening");

        while self.accepting.load(SeqCst) {
            match listener.accept() {
                Ok((stream, peer)) => {
                    self.in_flight.fetch_add(1, SeqCst);
                    // the guard travels with the job: a connection the pool
                    // never runs is still counted back out when its closure
                    // is dropped
                    let guard = InFlightGuard(self.in_flight.clone());
                    let server = self.clone();
                    let serve = move || {
                        let _guard = guard;
                        if let Err(error) = server.handle_connection(stream, peer) {
                            tracing::warn!(%peer, %error, "connection failed");
                        }
                    };
                    match self.pool.execute(serve, SUBMIT_TIMEOUT, &self.shutdown) {
                        Ok(true) => {}
                        Ok(false) => {
                            tracing::warn!(%peer, "all workers busy; refusing connection");
                        }
                        Err(error) => {
                            tracing::warn!(%peer, %error, "connection refused");
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL);
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!("no longer accepting; draining in-flight connections");
        while self.in_flight.load(SeqCst) > 0 {
            thread::sleep(ACCEPT_POLL);
        }
        self.pool.shutdown();
        let drained = self
            .pool
            .await_termination(POOL_DRAIN, &CancelToken::new())
            .unwrap_or(false);
        if !drained {
            tracing::warn!("worker pool did not wind down in time");
        }
        tracing::info!("shutdown complete");
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, stream), fields(%peer))]
    fn handle_connection(
        &self,
        stream: TcpStream,
        peer: std::net::SocketAddr,
    ) -> io::Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(READ_POLL))?;
        let mut writer = stream.try_clone()?;
        let mut reader = BufReader::new(stream);
        tracing::debug!("connected");

        let mut line = String::new();
        while let Some(request) = self.read_request(&mut reader, &mut line)? {
            if request.trim().is_empty() {
                continue;
            }
            tracing::trace!(request, "handling");
            let (response, last) = match Command::parse(&request) {
                Ok(command) => self.execute(command),
                Err(error) => (Response::from(error), false),
            };
            write!(writer, "{response}")?;
            writer.flush()?;
            if last {
                break;
            }
        }
        tracing::debug!("disconnected");
        Ok(())
    }

    /// Reads the next request line, polling so that a shutdown in progress
    /// closes idle connections.
    ///
    /// Returns `Ok(None)` on a clean close, either end-of-stream or the
    /// shutdown token firing between requests. A partial line read before a
    /// timeout tick stays in `line` and is completed on a later tick.
    fn read_request(
        &self,
        reader: &mut BufReader<TcpStream>,
        line: &mut String,
    ) -> io::Result<Option<String>> {
        line.clear();
        loop {
            match reader.read_line(line) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(line.trim_end_matches(['\r', '\n']).to_string())),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    if self.shutdown.is_cancelled() {
                        return Ok(None);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Executes one command; the second value of the pair is `true` if the
    /// connection should close after the response is written.
    fn execute(&self, command: Command) -> (Response, bool) {
        match command {
            Command::Set { key, value } => {
                self.store.set(key.clone(), value.clone());
                // wake any BGETs blocked on this key
                let woke = self.registry.deliver(&key, value);
                tracing::debug!(key, woke_waiters = woke, "set");
                (Response::Ok, false)
            }
            Command::Get { key } => {
                let response = match self.store.get(&key) {
                    Some(value) => Response::Value(value),
                    None => Response::Nil,
                };
                (response, false)
            }
            Command::BGet { key, timeout } => {
                let result = self.registry.wait_with(key.clone(), timeout, &self.shutdown, || {
                    self.store.get(&key)
                });
                let response = match result {
                    Ok(Some(value)) => Response::Value(value),
                    // timed out, or shutdown interrupted the wait
                    Ok(None) | Err(_) => Response::Nil,
                };
                (response, false)
            }
            Command::Keys => (Response::Keys(self.store.keys()), false),
            Command::Shutdown => {
                tracing::info!("shutdown requested");
                self.accepting.store(false, SeqCst);
                // releases every blocked BGET and idle read loop
                self.shutdown.cancel();
                (Response::Ok, true)
            }
        }
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for Server {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Server")
            .field("accepting", &self.accepting.load(SeqCst))
            .field("in_flight", &self.in_flight.load(SeqCst))
            .field("keys", &self.store.len())
            .finish()
    }
}

/// Decrements the in-flight counter when a connection thread exits, however
/// it exits.
struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, SeqCst);
    }
}
