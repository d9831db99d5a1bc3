//! SQLite Cloud connection
//!
//! One [`Connection`] owns one transport. Commands from any number of
//! callers are funnelled through an [`OperationQueue`] so exactly one
//! request/response exchange is on the wire at a time, and results are
//! delivered in submission order.
//!
//! # States
//!
//! `Disconnected -> Connecting -> Authenticating -> Ready <-> Busy`, ending
//! in `Closed` (explicit close) or `Failed` (socket, protocol or timeout
//! error). Neither terminal state can be left; build a new connection.

mod config;
mod handshake;
mod transport;

pub use config::{
    ConnectionConfig, ConnectionConfigBuilder, Credentials, TlsOptions, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_PORT, DEFAULT_TIMEOUT,
};
pub use handshake::{initialization_commands, mask_credentials};
pub use transport::{BoxedStream, SocketStream, SocketTransport, Transport};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::protocol::{encode_command, Command, DecodeOptions, DriverError, Frame, Result, Value};
use crate::queue::OperationQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Ready,
    /// A command is on the wire
    Busy,
    Closed,
    Failed,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Failed)
    }
}

struct Shared {
    config: ConnectionConfig,
    verbose: AtomicBool,
    state: Mutex<ConnectionState>,
    transport: tokio::sync::Mutex<Box<dyn Transport>>,
    queue: OperationQueue,
    shutdown: watch::Sender<bool>,
}

/// Cloneable handle to a single SQLite Cloud connection
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    /// Create a disconnected connection using the TLS/TCP socket transport.
    pub fn new(config: ConnectionConfig) -> Self {
        let options = DecodeOptions {
            integer_mode: config.integer_mode,
        };
        Self::with_transport(config, Box::new(SocketTransport::new(options)))
    }

    /// Create a disconnected connection over any transport.
    pub fn with_transport(config: ConnectionConfig, transport: Box<dyn Transport>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                verbose: AtomicBool::new(config.verbose),
                config,
                state: Mutex::new(ConnectionState::Disconnected),
                transport: tokio::sync::Mutex::new(transport),
                queue: OperationQueue::new(),
                shutdown,
            }),
        }
    }

    /// Create a connection and run the handshake.
    pub async fn open(config: ConnectionConfig) -> Result<Self> {
        let connection = Self::new(config);
        connection.connect().await?;
        Ok(connection)
    }

    /// Open the socket and send the initialization batch.
    pub async fn connect(&self) -> Result<()> {
        self.shared.transition(
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
        )?;

        let result = self.shared.handshake().await;
        match result {
            Ok(()) => {
                self.shared
                    .transition(ConnectionState::Authenticating, ConnectionState::Ready)?;
                info!("Connected to {}", self.shared.config.address());
                Ok(())
            }
            Err(e) => {
                self.shared.fail(&e).await;
                Err(e)
            }
        }
    }

    /// Send a command and wait for its result.
    ///
    /// Server errors come back as `DriverError::ServerError` and leave the
    /// connection usable; any other error fails the connection.
    pub async fn send(&self, command: impl Into<Command>) -> Result<Frame> {
        let command = command.into();
        let state = self.state();
        if !matches!(state, ConnectionState::Ready | ConnectionState::Busy) {
            return Err(DriverError::StateError(format!(
                "cannot send a command while {:?}",
                state
            )));
        }

        let request = encode_command(&command);
        let label = command.sql;
        let (tx, rx) = oneshot::channel();
        let shared = Arc::clone(&self.shared);

        self.shared.queue.enqueue(Box::new(move |done| {
            tokio::spawn(async move {
                let result = shared.execute(&request, &label).await;
                let _ = tx.send(result);
                done.complete();
            });
        }));

        rx.await.unwrap_or_else(|_| {
            Err(DriverError::StateError(
                "connection closed before the command completed".to_string(),
            ))
        })
    }

    /// Send SQL with bound parameters.
    pub async fn sql(&self, sql: &str, params: Vec<Value>) -> Result<Frame> {
        self.send(Command::with_params(sql, params)).await
    }

    /// Close the connection; queued and in-flight commands fail.
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.shared.state.lock();
            if *state == ConnectionState::Closed {
                return Ok(());
            }
            debug!("Connection state {:?} -> Closed", *state);
            *state = ConnectionState::Closed;
        }
        self.shared.shutdown.send_replace(true);
        self.shared.queue.clear();

        let mut transport = self.shared.transport.lock().await;
        if let Err(e) = transport.close().await {
            debug!("Error while closing transport: {}", e);
        }
        Ok(())
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state(), ConnectionState::Ready | ConnectionState::Busy)
    }

    pub fn verbose(&self) -> bool {
        self.shared.verbose.load(Ordering::Relaxed)
    }

    pub fn set_verbose(&self, verbose: bool) {
        self.shared.verbose.store(verbose, Ordering::Relaxed);
    }
}

impl Shared {
    fn transition(&self, from: ConnectionState, to: ConnectionState) -> Result<()> {
        let mut state = self.state.lock();
        if *state != from {
            return Err(DriverError::StateError(format!(
                "expected {:?} but connection is {:?}",
                from, *state
            )));
        }
        debug!("Connection state {:?} -> {:?}", from, to);
        *state = to;
        Ok(())
    }

    async fn handshake(&self) -> Result<()> {
        let mut transport = self.transport.lock().await;
        transport.connect(&self.config).await?;
        self.transition(ConnectionState::Connecting, ConnectionState::Authenticating)?;

        let init = initialization_commands(&self.config);
        self.log_outgoing(&init);
        let request = encode_command(&Command::new(init));

        let exchange = transport.send_raw(&request);
        let frame = match self.config.timeout {
            Some(limit) => tokio::time::timeout(limit, exchange)
                .await
                .map_err(|_| DriverError::Timeout(limit))??,
            None => exchange.await?,
        };

        match frame {
            Frame::Error(mut err) => {
                err.message = mask_credentials(&err.message);
                Err(DriverError::ServerError(err))
            }
            _ => Ok(()),
        }
    }

    /// Run one exchange; called by the queue with nothing else in flight.
    async fn execute(&self, request: &[u8], label: &str) -> Result<Frame> {
        {
            let mut state = self.state.lock();
            match *state {
                ConnectionState::Ready => *state = ConnectionState::Busy,
                other => {
                    return Err(DriverError::StateError(format!(
                        "cannot send a command while {:?}",
                        other
                    )))
                }
            }
        }

        let mut shutdown = self.shutdown.subscribe();
        let outcome = {
            let mut transport = self.transport.lock().await;
            self.log_outgoing(label);

            let exchange = async {
                match self.config.timeout {
                    Some(limit) => {
                        match tokio::time::timeout(limit, transport.send_raw(request)).await {
                            Ok(result) => result,
                            Err(_) => Err(DriverError::Timeout(limit)),
                        }
                    }
                    None => transport.send_raw(request).await,
                }
            };

            tokio::select! {
                result = exchange => Some(result),
                _ = wait_shutdown(&mut shutdown) => None,
            }
        };

        let Some(outcome) = outcome else {
            return Err(DriverError::StateError(
                "connection closed while the command was in flight".to_string(),
            ));
        };

        match outcome {
            Ok(Frame::Error(err)) => {
                self.release_busy();
                Err(DriverError::ServerError(err))
            }
            Ok(frame) => {
                self.release_busy();
                Ok(frame)
            }
            Err(e) => {
                self.fail(&e).await;
                Err(e)
            }
        }
    }

    fn release_busy(&self) {
        let mut state = self.state.lock();
        if *state == ConnectionState::Busy {
            *state = ConnectionState::Ready;
        }
    }

    /// Move to `Failed`, dropping queued work and the socket.
    async fn fail(&self, err: &DriverError) {
        {
            let mut state = self.state.lock();
            if state.is_terminal() {
                return;
            }
            warn!("Connection failed while {:?}: {}", *state, err);
            *state = ConnectionState::Failed;
        }
        self.queue.clear();

        let mut transport = self.transport.lock().await;
        if let Err(e) = transport.close().await {
            debug!("Error while closing transport: {}", e);
        }
    }

    fn log_outgoing(&self, command: &str) {
        let masked = mask_credentials(command);
        if self.verbose.load(Ordering::Relaxed) {
            info!("Sending: {}", masked);
        } else {
            debug!("Sending: {}", masked);
        }
    }
}

async fn wait_shutdown(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|closed| *closed).await.is_err() {
        std::future::pending::<()>().await;
    }
}
