//! Tokio-backed socket driver
//!
//! Implements the core's synchronous driver contract on top of tokio TCP.
//! A listener task accepts connections, a reader task per connection
//! buffers inbound bytes so the core's non-blocking `read` holds, and
//! writes are handed to a per-connection writer task so `write` never
//! blocks. Events are queued behind a mutex and surfaced through
//! `poll_event`; [`TcpDriver::event_ready`] lets the embedder await the
//! next batch instead of polling.
//!
//! The driver is a cheaply cloneable handle: box one clone into the link
//! and keep another for the event loop.

use crate::config::TcpDriverConfig;
use crate::error::TcpDriverError;
use bytes::BytesMut;
use cohort_core::{ClientId, ConnId, DriverError, DriverEvent, SocketDriver};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

// ----------------------------------------------------------------------------
// Shared State
// ----------------------------------------------------------------------------

struct ConnEntry {
    tag: Option<ClientId>,
    inbound: BytesMut,
    open: bool,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

struct ListenerEntry {
    port: u16,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct DriverState {
    next_conn: u64,
    conns: HashMap<ConnId, ConnEntry>,
    listener: Option<ListenerEntry>,
    events: VecDeque<DriverEvent>,
}

struct Shared {
    state: Mutex<DriverState>,
    notify: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, DriverState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn push_event(&self, event: DriverEvent) {
        self.lock().events.push_back(event);
        self.notify.notify_one();
    }

    /// Mark a connection closed (if it still exists and was open) and
    /// deliver `Closed` for it
    fn connection_lost(&self, conn: ConnId) {
        let tag = {
            let mut state = self.lock();
            match state.conns.get_mut(&conn) {
                Some(entry) if entry.open => {
                    entry.open = false;
                    entry.tag
                }
                _ => return,
            }
        };
        self.push_event(DriverEvent::Closed { conn, tag });
    }
}

/// Spawn reader and writer tasks for a fresh stream and register it
fn register_stream(
    shared: &Arc<Shared>,
    runtime: &Handle,
    stream: TcpStream,
    tag: Option<ClientId>,
    read_buffer_size: usize,
) -> ConnId {
    let _ = stream.set_nodelay(true);
    let (mut read_half, mut write_half) = stream.into_split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();

    // Hold the lock across spawn + insert so the tasks cannot observe a
    // half-registered connection.
    let mut state = shared.lock();
    let conn = ConnId::new(state.next_conn);
    state.next_conn += 1;

    let reader = {
        let shared = Arc::clone(shared);
        runtime.spawn(async move {
            let mut buf = vec![0u8; read_buffer_size.max(1)];
            loop {
                match read_half.read(&mut buf).await {
                    Ok(0) => {
                        shared.connection_lost(conn);
                        break;
                    }
                    Ok(n) => {
                        let tag = {
                            let mut state = shared.lock();
                            match state.conns.get_mut(&conn) {
                                Some(entry) => {
                                    entry.inbound.extend_from_slice(&buf[..n]);
                                    entry.tag
                                }
                                None => break,
                            }
                        };
                        shared.push_event(DriverEvent::IoReady { conn, tag });
                    }
                    Err(e) => {
                        debug!("read on {conn} failed: {e}");
                        shared.connection_lost(conn);
                        break;
                    }
                }
            }
        })
    };

    let writer = {
        let shared = Arc::clone(shared);
        runtime.spawn(async move {
            while let Some(chunk) = outbound_rx.recv().await {
                if let Err(e) = write_half.write_all(&chunk).await {
                    debug!("write on {conn} failed: {e}");
                    shared.connection_lost(conn);
                    break;
                }
            }
        })
    };

    state.conns.insert(
        conn,
        ConnEntry {
            tag,
            inbound: BytesMut::new(),
            open: true,
            outbound: outbound_tx,
            reader,
            writer,
        },
    );

    conn
}

// ----------------------------------------------------------------------------
// TCP Driver
// ----------------------------------------------------------------------------

/// Socket driver over tokio TCP
#[derive(Clone)]
pub struct TcpDriver {
    shared: Arc<Shared>,
    runtime: Handle,
    config: TcpDriverConfig,
}

impl TcpDriver {
    /// Create a driver; must be called inside a tokio runtime
    pub fn new(config: TcpDriverConfig) -> Result<Self, TcpDriverError> {
        let runtime = Handle::try_current().map_err(|_| TcpDriverError::NoRuntime)?;
        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(DriverState::default()),
                notify: Notify::new(),
            }),
            runtime,
            config,
        })
    }

    /// Await the next event arrival; pair with draining `poll_event`
    pub async fn event_ready(&self) {
        self.shared.notify.notified().await;
    }

    /// The port the listener actually bound, once listening
    ///
    /// Differs from the requested port when 0 was asked for.
    pub fn local_port(&self) -> Option<u16> {
        self.shared.lock().listener.as_ref().map(|l| l.port)
    }

    /// Tear everything down: listener, connections, tasks
    pub fn shutdown(&self) {
        let mut state = self.shared.lock();
        if let Some(listener) = state.listener.take() {
            listener.task.abort();
        }
        for (_, entry) in state.conns.drain() {
            entry.reader.abort();
            entry.writer.abort();
        }
        state.events.clear();
    }
}

impl SocketDriver for TcpDriver {
    fn listen(&mut self, port: u16) -> Result<(), DriverError> {
        let std_listener = std::net::TcpListener::bind((self.config.bind_addr.as_str(), port))
            .and_then(|listener| {
                listener.set_nonblocking(true)?;
                Ok(listener)
            })
            .map_err(|source| TcpDriverError::Bind {
                addr: self.config.bind_addr.clone(),
                port,
                source,
            })?;
        let local_port = std_listener
            .local_addr()
            .map(|addr| addr.port())
            .unwrap_or(port);

        let task = {
            let shared = Arc::clone(&self.shared);
            let runtime = self.runtime.clone();
            let read_buffer_size = self.config.read_buffer_size;
            self.runtime.spawn(async move {
                let listener = match TcpListener::from_std(std_listener) {
                    Ok(listener) => listener,
                    Err(e) => {
                        warn!("cannot adopt listening socket: {e}");
                        return;
                    }
                };
                loop {
                    match listener.accept().await {
                        Ok((stream, peer)) => {
                            debug!("accepted connection from {peer}");
                            let conn = register_stream(
                                &shared,
                                &runtime,
                                stream,
                                None,
                                read_buffer_size,
                            );
                            shared.push_event(DriverEvent::Accepted { conn });
                        }
                        Err(e) => {
                            warn!("accept failed: {e}");
                        }
                    }
                }
            })
        };

        let mut state = self.shared.lock();
        if let Some(old) = state.listener.take() {
            old.task.abort();
        }
        state.listener = Some(ListenerEntry {
            port: local_port,
            task,
        });
        Ok(())
    }

    fn shutdown_listener(&mut self) {
        if let Some(listener) = self.shared.lock().listener.take() {
            listener.task.abort();
        }
    }

    fn connect(&mut self, host: &str, port: u16, tag: ClientId) {
        let shared = Arc::clone(&self.shared);
        let runtime = self.runtime.clone();
        let read_buffer_size = self.config.read_buffer_size;
        let host = host.to_string();

        self.runtime.spawn(async move {
            match TcpStream::connect((host.as_str(), port)).await {
                Ok(stream) => {
                    debug!("connected to {host}:{port}");
                    let conn = register_stream(
                        &shared,
                        &runtime,
                        stream,
                        Some(tag),
                        read_buffer_size,
                    );
                    shared.push_event(DriverEvent::Connected { conn, tag });
                }
                Err(e) => {
                    debug!("connect to {host}:{port} failed: {e}");
                    shared.push_event(DriverEvent::ConnectFailed { tag });
                }
            }
        });
    }

    fn set_tag(&mut self, conn: ConnId, tag: ClientId) {
        if let Some(entry) = self.shared.lock().conns.get_mut(&conn) {
            entry.tag = Some(tag);
        }
    }

    fn canonicalize(&self, host: &str) -> Option<String> {
        canonical_hostname(host)
    }

    fn my_canonical_name(&self) -> String {
        self.config.canonical_name.clone()
    }

    fn read(&mut self, conn: ConnId, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.shared.lock();
        match state.conns.get_mut(&conn) {
            Some(entry) if !entry.inbound.is_empty() => {
                let n = entry.inbound.len().min(buf.len());
                let chunk = entry.inbound.split_to(n);
                buf[..n].copy_from_slice(&chunk);
                Ok(n)
            }
            Some(entry) if !entry.open => Ok(0),
            Some(_) => Err(io::Error::new(io::ErrorKind::WouldBlock, "drained")),
            None => Ok(0),
        }
    }

    fn write(&mut self, conn: ConnId, data: &[u8]) -> bool {
        let state = self.shared.lock();
        match state.conns.get(&conn) {
            Some(entry) if entry.open => entry.outbound.send(data.to_vec()).is_ok(),
            _ => false,
        }
    }

    fn close(&mut self, conn: ConnId) {
        if let Some(entry) = self.shared.lock().conns.remove(&conn) {
            entry.reader.abort();
            entry.writer.abort();
        }
    }

    fn poll_event(&mut self) -> Option<DriverEvent> {
        self.shared.lock().events.pop_front()
    }
}

// ----------------------------------------------------------------------------
// Hostname Normalization
// ----------------------------------------------------------------------------

/// Normalize a hostname: IP literals pass through, names are lowercased
/// and lose any trailing dot
fn canonical_hostname(host: &str) -> Option<String> {
    if host.is_empty() {
        return None;
    }
    if host.parse::<std::net::IpAddr>().is_ok() {
        return Some(host.to_string());
    }
    let normalized = host.trim_end_matches('.').to_ascii_lowercase();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_hostname() {
        assert_eq!(canonical_hostname("Alpha.LAN."), Some("alpha.lan".into()));
        assert_eq!(canonical_hostname("10.0.0.1"), Some("10.0.0.1".into()));
        assert_eq!(canonical_hostname(""), None);
        assert_eq!(canonical_hostname("."), None);
    }

    #[tokio::test]
    async fn test_driver_builds_inside_a_runtime() {
        assert!(TcpDriver::new(TcpDriverConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn test_bind_conflict_surfaces_as_a_bind_error() {
        let mut a = TcpDriver::new(TcpDriverConfig::default()).unwrap();
        let mut b = TcpDriver::new(TcpDriverConfig::default()).unwrap();

        a.listen(0).unwrap();
        let port = a.local_port().unwrap();

        assert!(matches!(
            b.listen(port),
            Err(DriverError::Bind { port: p, .. }) if p == port
        ));
        a.shutdown();
    }
}
