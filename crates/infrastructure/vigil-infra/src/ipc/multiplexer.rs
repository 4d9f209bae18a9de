//! Merges lines from a bounded number of worker connections into one queue.
//!
//! The multiplexer listens on a single Unix socket. Each *endpoint* is one
//! pending accept which, once a worker connects, becomes that worker's
//! channel and reads lines until the quit signal. The number of endpoints
//! ever opened is bounded by the expected connection count.
//!
//! # Invariants
//!
//! - A connection increments `alive` before it decrements
//!   `expected_remaining`, so both counters never read zero while a channel
//!   is still being set up.
//! - A line is pushed to the queue before its channel decrements `alive`.
//! - Endpoint tasks never outlive the multiplexer: dispose aborts them and
//!   `Drop` disposes.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vigil_core::protocol::{is_stop_line, verify_codon_widths, ProtocolError};

pub type QuitSignal = Arc<dyn Fn(&str) -> bool + Send + Sync>;

#[derive(Debug, Error)]
pub enum MultiplexError {
    #[error("the line stream of this multiplexer was already taken")]
    StreamAlreadyTaken,
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("failed to bind {path}: {source}")]
    Bind { path: Utf8PathBuf, source: io::Error },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Failure that ended a single channel. Other channels are unaffected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelFault {
    #[error("worker on endpoint {endpoint} disconnected without a stop message")]
    MissingStop { endpoint: u64 },
    #[error("endpoint {endpoint} read failed: {message}")]
    Read { endpoint: u64, message: String },
    #[error("endpoint {endpoint} accept failed: {message}")]
    Accept { endpoint: u64, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpawnMode {
    /// Keep up to `max_pending` endpoints accepting at once.
    #[default]
    Eager,
    /// Open the next endpoint only after the previous one accepted.
    Lazy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Pending,
    Connected,
    Draining,
    Closed,
}

#[derive(Debug, Clone)]
pub struct MultiplexerConfig {
    pub socket_path: Utf8PathBuf,
    pub expected_connections: usize,
    pub mode: SpawnMode,
    pub max_pending: usize,
    pub poll_interval: Duration,
}

impl MultiplexerConfig {
    pub fn new(socket_path: impl Into<Utf8PathBuf>, expected_connections: usize) -> Self {
        Self {
            socket_path: socket_path.into(),
            expected_connections,
            mode: SpawnMode::default(),
            max_pending: vigil_config::MAX_PENDING_ENDPOINTS,
            poll_interval: vigil_config::poll_interval(),
        }
    }

    /// Config for the process-wide worker channel.
    pub fn for_channel(channel_name: &str, expected_connections: usize) -> Self {
        Self::new(super::socket_path(channel_name), expected_connections)
    }

    pub fn with_mode(mut self, mode: SpawnMode) -> Self {
        self.mode = mode;
        self
    }
}

struct Endpoint {
    state: ChannelState,
    task: Option<AbortHandle>,
}

struct Shared {
    listener: UnixListener,
    socket_path: Utf8PathBuf,
    quit: QuitSignal,
    cancel: CancellationToken,
    unopened: AtomicUsize,
    expected_remaining: AtomicUsize,
    alive: AtomicUsize,
    messages_read: AtomicU64,
    next_endpoint: AtomicU64,
    endpoints: Mutex<HashMap<u64, Endpoint>>,
    faults: Mutex<Vec<ChannelFault>>,
    disposed: AtomicBool,
    queue: mpsc::UnboundedSender<String>,
}

pub struct ChannelMultiplexer {
    shared: Arc<Shared>,
    stream: Mutex<Option<LineStream>>,
    poll_interval: Duration,
}

impl ChannelMultiplexer {
    /// Binds the socket and opens the initial endpoints. Must be called from
    /// within a tokio runtime.
    pub fn bind(
        config: MultiplexerConfig,
        quit: impl Fn(&str) -> bool + Send + Sync + 'static,
        cancel: Option<&CancellationToken>,
    ) -> Result<Self, MultiplexError> {
        let listener = bind_listener(&config.socket_path)?;
        let cancel = cancel.map(|c| c.child_token()).unwrap_or_default();
        let (tx, rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            listener,
            socket_path: config.socket_path.clone(),
            quit: Arc::new(quit),
            cancel,
            unopened: AtomicUsize::new(config.expected_connections),
            expected_remaining: AtomicUsize::new(config.expected_connections),
            alive: AtomicUsize::new(0),
            messages_read: AtomicU64::new(0),
            next_endpoint: AtomicU64::new(0),
            endpoints: Mutex::new(HashMap::new()),
            faults: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
            queue: tx,
        });

        let initial = match config.mode {
            SpawnMode::Eager => config.expected_connections.min(config.max_pending.max(1)),
            SpawnMode::Lazy => config.expected_connections.min(1),
        };
        for _ in 0..initial {
            Shared::open_endpoint(&shared);
        }
        info!(
            "listening on {} for {} worker(s) ({:?})",
            config.socket_path, config.expected_connections, config.mode
        );

        let stream = LineStream {
            rx,
            shared: shared.clone(),
            poll_interval: config.poll_interval,
        };
        Ok(Self {
            shared,
            stream: Mutex::new(Some(stream)),
            poll_interval: config.poll_interval,
        })
    }

    /// Multiplexer for protocol workers: verifies the codon table and quits
    /// each channel on its `STOPPED` line.
    pub fn for_workers(
        config: MultiplexerConfig,
        cancel: Option<&CancellationToken>,
    ) -> Result<Self, MultiplexError> {
        verify_codon_widths()?;
        Self::bind(config, is_stop_line, cancel)
    }

    /// Takes the single consumer of the merged queue.
    pub fn take_stream(&self) -> Result<LineStream, MultiplexError> {
        self.stream
            .lock()
            .expect("stream slot poisoned")
            .take()
            .ok_or(MultiplexError::StreamAlreadyTaken)
    }

    /// Cancels pending accepts and reads, aborts every endpoint task and
    /// removes the socket file. Safe to call repeatedly and concurrently.
    pub fn dispose(&self) {
        self.shared.dispose();
    }

    pub fn socket_path(&self) -> &Utf8Path {
        &self.shared.socket_path
    }

    pub fn alive(&self) -> usize {
        self.shared.alive.load(Ordering::SeqCst)
    }

    pub fn expected_remaining(&self) -> usize {
        self.shared.expected_remaining.load(Ordering::SeqCst)
    }

    pub fn messages_read(&self) -> u64 {
        self.shared.messages_read.load(Ordering::SeqCst)
    }

    pub fn live_endpoints(&self) -> usize {
        self.shared.endpoints.lock().expect("endpoints poisoned").len()
    }

    pub fn endpoint_states(&self) -> Vec<ChannelState> {
        self.shared
            .endpoints
            .lock()
            .expect("endpoints poisoned")
            .values()
            .map(|e| e.state)
            .collect()
    }

    pub fn faults(&self) -> Vec<ChannelFault> {
        self.shared.faults.lock().expect("faults poisoned").clone()
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

impl Drop for ChannelMultiplexer {
    fn drop(&mut self) {
        self.shared.dispose();
    }
}

fn bind_listener(path: &Utf8Path) -> Result<UnixListener, MultiplexError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| MultiplexError::Bind {
            path: path.to_owned(),
            source,
        })?;
    }
    // Stale socket from a previous run of this pid.
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    UnixListener::bind(path).map_err(|source| MultiplexError::Bind {
        path: path.to_owned(),
        source,
    })
}

fn is_teardown(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}

impl Shared {
    /// Reserves one of the remaining endpoint slots and starts accepting on
    /// it. Returns `false` once every slot was used or after cancellation.
    fn open_endpoint(shared: &Arc<Shared>) -> bool {
        if shared.cancel.is_cancelled() {
            return false;
        }
        if shared
            .unopened
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_err()
        {
            return false;
        }

        let id = shared.next_endpoint.fetch_add(1, Ordering::SeqCst);
        {
            let mut endpoints = shared.endpoints.lock().expect("endpoints poisoned");
            if shared.disposed.load(Ordering::SeqCst) {
                return false;
            }
            endpoints.insert(
                id,
                Endpoint {
                    state: ChannelState::Pending,
                    task: None,
                },
            );
        }

        let task = tokio::spawn(Self::run_endpoint(shared.clone(), id));
        if let Some(endpoint) = shared
            .endpoints
            .lock()
            .expect("endpoints poisoned")
            .get_mut(&id)
        {
            endpoint.task = Some(task.abort_handle());
        }
        debug!("endpoint {} pending", id);
        true
    }

    async fn run_endpoint(shared: Arc<Shared>, id: u64) {
        let accepted = tokio::select! {
            _ = shared.cancel.cancelled() => None,
            res = shared.listener.accept() => Some(res),
        };

        let stream = match accepted {
            None => {
                shared.retire(id);
                return;
            }
            Some(Err(e)) => {
                Self::accept_failed(&shared, id, e.to_string());
                return;
            }
            Some(Ok((stream, _addr))) => stream,
        };

        shared.alive.fetch_add(1, Ordering::SeqCst);
        shared.decrement_expected();
        shared.set_state(id, ChannelState::Connected);
        debug!("endpoint {} connected", id);

        Self::open_endpoint(&shared);

        if let Err(fault) = shared.read_lines(id, stream).await {
            shared.record_fault(fault);
        }

        shared.alive.fetch_sub(1, Ordering::SeqCst);
        shared.retire(id);
    }

    /// Gives up the connection slot of endpoint `id` and hands the remaining
    /// slots to a fresh endpoint.
    fn accept_failed(shared: &Arc<Shared>, id: u64, message: String) {
        shared.decrement_expected();
        shared.record_fault(ChannelFault::Accept {
            endpoint: id,
            message,
        });
        shared.retire(id);
        Self::open_endpoint(shared);
    }

    async fn read_lines(&self, id: u64, stream: UnixStream) -> Result<(), ChannelFault> {
        let mut lines = BufReader::new(stream).lines();
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                next = lines.next_line() => next,
            };

            match next {
                Ok(Some(line)) => {
                    self.messages_read.fetch_add(1, Ordering::SeqCst);
                    let quit = (self.quit)(&line);
                    // The consumer may already be gone; the line is then moot.
                    let _ = self.queue.send(line);
                    if quit {
                        self.set_state(id, ChannelState::Draining);
                        return Ok(());
                    }
                }
                Ok(None) => {
                    if self.cancel.is_cancelled() {
                        return Ok(());
                    }
                    return Err(ChannelFault::MissingStop { endpoint: id });
                }
                Err(e) if is_teardown(&e) => {
                    debug!("endpoint {} torn down: {}", id, e);
                    if self.cancel.is_cancelled() {
                        return Ok(());
                    }
                    return Err(ChannelFault::MissingStop { endpoint: id });
                }
                Err(e) => {
                    return Err(ChannelFault::Read {
                        endpoint: id,
                        message: e.to_string(),
                    })
                }
            }
        }
    }

    fn decrement_expected(&self) {
        let _ = self
            .expected_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    fn set_state(&self, id: u64, state: ChannelState) {
        if let Some(endpoint) = self
            .endpoints
            .lock()
            .expect("endpoints poisoned")
            .get_mut(&id)
        {
            endpoint.state = state;
        }
    }

    fn retire(&self, id: u64) {
        let removed = self.endpoints.lock().expect("endpoints poisoned").remove(&id);
        if let Some(endpoint) = removed {
            debug!(
                "endpoint {} {:?} -> {:?}",
                id,
                endpoint.state,
                ChannelState::Closed
            );
        }
    }

    fn record_fault(&self, fault: ChannelFault) {
        error!("{}", fault);
        self.faults.lock().expect("faults poisoned").push(fault);
    }

    fn is_finished(&self) -> bool {
        self.cancel.is_cancelled()
            || (self.alive.load(Ordering::SeqCst) == 0
                && self.expected_remaining.load(Ordering::SeqCst) == 0)
    }

    fn dispose(&self) {
        let drained: Vec<Endpoint> = {
            let mut endpoints = self.endpoints.lock().expect("endpoints poisoned");
            if self.disposed.swap(true, Ordering::SeqCst) {
                return;
            }
            self.cancel.cancel();
            endpoints.drain().map(|(_, e)| e).collect()
        };

        for endpoint in &drained {
            if let Some(task) = &endpoint.task {
                task.abort();
            }
        }
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("failed to remove socket {}: {}", self.socket_path, e);
            }
        }
        debug!("multiplexer disposed ({} endpoint(s) aborted)", drained.len());
    }
}

/// The single consumer of a multiplexer's merged queue.
pub struct LineStream {
    rx: mpsc::UnboundedReceiver<String>,
    shared: Arc<Shared>,
    poll_interval: Duration,
}

impl LineStream {
    /// Next line from any channel, or `None` once every expected worker has
    /// connected and finished (or the multiplexer was cancelled) and the
    /// queue is empty.
    pub async fn next_line(&mut self) -> Option<String> {
        loop {
            if let Ok(line) = self.rx.try_recv() {
                return Some(line);
            }
            if self.shared.is_finished() {
                // A channel may have pushed its last line just before
                // decrementing `alive`.
                return self.rx.try_recv().ok();
            }
            if let Ok(Some(line)) = tokio::time::timeout(self.poll_interval, self.rx.recv()).await
            {
                return Some(line);
            }
        }
    }
}
