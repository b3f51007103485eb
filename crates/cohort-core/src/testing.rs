//! Mock implementations and test utilities
//!
//! A scripted single-node [`MockDriver`], an in-memory [`MemoryConfig`],
//! a [`RecordingListener`], and a [`TestStateProvider`]. All are cheaply
//! cloneable handles over shared interiors so a test can keep a handle
//! after handing the other clone to the link.

use crate::config::ConfigStore;
use crate::driver::{DriverEvent, LinkListener, SocketDriver};
use crate::errors::DriverError;
use crate::state::StateProvider;
use crate::types::{ClientId, ConnId, StateId};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::rc::Rc;

// ----------------------------------------------------------------------------
// Mock Driver
// ----------------------------------------------------------------------------

/// One recorded driver action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Listen(u16),
    ShutdownListener,
    Connect {
        host: String,
        port: u16,
        tag: ClientId,
    },
    SetTag {
        conn: ConnId,
        tag: ClientId,
    },
    Write {
        conn: ConnId,
        bytes: Vec<u8>,
    },
    Close(ConnId),
}

#[derive(Default)]
struct MockInner {
    name: String,
    aliases: HashMap<String, String>,
    events: VecDeque<DriverEvent>,
    actions: Vec<Action>,
    inbound: HashMap<ConnId, VecDeque<u8>>,
    eof: HashSet<ConnId>,
    fail_listen: bool,
}

/// Scripted driver for single-link tests
///
/// The test feeds bytes and queues events; the link's outbound actions are
/// recorded for inspection.
#[derive(Clone)]
pub struct MockDriver {
    inner: Rc<RefCell<MockInner>>,
}

impl MockDriver {
    pub fn new(canonical_name: impl Into<String>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(MockInner {
                name: canonical_name.into(),
                ..MockInner::default()
            })),
        }
    }

    /// Make `listen` fail until cleared
    pub fn set_fail_listen(&self, fail: bool) {
        self.inner.borrow_mut().fail_listen = fail;
    }

    /// Teach `canonicalize` an alias
    pub fn add_alias(&self, from: impl Into<String>, to: impl Into<String>) {
        self.inner
            .borrow_mut()
            .aliases
            .insert(from.into(), to.into());
    }

    /// Queue an event for the link to poll
    pub fn push_event(&self, event: DriverEvent) {
        self.inner.borrow_mut().events.push_back(event);
    }

    /// Stage inbound bytes on a connection; pair with an `IoReady` event
    pub fn feed_bytes(&self, conn: ConnId, bytes: &[u8]) {
        self.inner
            .borrow_mut()
            .inbound
            .entry(conn)
            .or_default()
            .extend(bytes);
    }

    /// Stage bytes and queue the matching `IoReady`
    pub fn deliver(&self, conn: ConnId, tag: Option<ClientId>, bytes: &[u8]) {
        self.feed_bytes(conn, bytes);
        self.push_event(DriverEvent::IoReady { conn, tag });
    }

    /// Mark a connection as remotely closed; reads drain then return 0
    pub fn mark_eof(&self, conn: ConnId) {
        self.inner.borrow_mut().eof.insert(conn);
    }

    /// Drain the recorded actions
    pub fn take_actions(&self) -> Vec<Action> {
        std::mem::take(&mut self.inner.borrow_mut().actions)
    }

    /// Frames written to the given connection since the last drain,
    /// leaving other recorded actions in place
    pub fn take_writes(&self, conn: ConnId) -> Vec<Vec<u8>> {
        let mut inner = self.inner.borrow_mut();
        let mut writes = Vec::new();
        inner.actions.retain(|a| match a {
            Action::Write { conn: c, bytes } if *c == conn => {
                writes.push(bytes.clone());
                false
            }
            _ => true,
        });
        writes
    }
}

impl SocketDriver for MockDriver {
    fn listen(&mut self, port: u16) -> Result<(), DriverError> {
        let mut inner = self.inner.borrow_mut();
        inner.actions.push(Action::Listen(port));
        if inner.fail_listen {
            Err(DriverError::Bind {
                port,
                reason: "scripted bind failure".into(),
            })
        } else {
            Ok(())
        }
    }

    fn shutdown_listener(&mut self) {
        self.inner.borrow_mut().actions.push(Action::ShutdownListener);
    }

    fn connect(&mut self, host: &str, port: u16, tag: ClientId) {
        self.inner.borrow_mut().actions.push(Action::Connect {
            host: host.to_string(),
            port,
            tag,
        });
    }

    fn set_tag(&mut self, conn: ConnId, tag: ClientId) {
        self.inner
            .borrow_mut()
            .actions
            .push(Action::SetTag { conn, tag });
    }

    fn canonicalize(&self, host: &str) -> Option<String> {
        self.inner.borrow().aliases.get(host).cloned()
    }

    fn my_canonical_name(&self) -> String {
        self.inner.borrow().name.clone()
    }

    fn read(&mut self, conn: ConnId, buf: &mut [u8]) -> io::Result<usize> {
        let mut inner = self.inner.borrow_mut();
        let inner = &mut *inner;
        match inner.inbound.get_mut(&conn) {
            Some(q) if !q.is_empty() => {
                let n = q.len().min(buf.len());
                for slot in buf.iter_mut().take(n) {
                    *slot = q.pop_front().unwrap_or_default();
                }
                Ok(n)
            }
            _ if inner.eof.contains(&conn) => Ok(0),
            _ => Err(io::Error::new(io::ErrorKind::WouldBlock, "drained")),
        }
    }

    fn write(&mut self, conn: ConnId, data: &[u8]) -> bool {
        self.inner.borrow_mut().actions.push(Action::Write {
            conn,
            bytes: data.to_vec(),
        });
        true
    }

    fn close(&mut self, conn: ConnId) {
        self.inner.borrow_mut().actions.push(Action::Close(conn));
    }

    fn poll_event(&mut self) -> Option<DriverEvent> {
        self.inner.borrow_mut().events.pop_front()
    }
}

// ----------------------------------------------------------------------------
// Memory Config
// ----------------------------------------------------------------------------

#[derive(Default)]
struct MemoryConfigInner {
    ints: HashMap<String, i64>,
    strings: HashMap<String, String>,
}

/// In-memory configuration store
#[derive(Clone, Default)]
pub struct MemoryConfig {
    inner: Rc<RefCell<MemoryConfigInner>>,
}

impl MemoryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_int(&self, key: impl Into<String>, value: i64) {
        self.inner.borrow_mut().ints.insert(key.into(), value);
    }

    pub fn set_string(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner
            .borrow_mut()
            .strings
            .insert(key.into(), value.into());
    }
}

impl ConfigStore for MemoryConfig {
    fn get_int(&self, key: &str) -> Option<i64> {
        self.inner.borrow().ints.get(key).copied()
    }

    fn get_string(&self, key: &str) -> Option<String> {
        self.inner.borrow().strings.get(key).cloned()
    }
}

// ----------------------------------------------------------------------------
// Recording Listener
// ----------------------------------------------------------------------------

/// One observed listener callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerEvent {
    ActiveChanged(bool),
    StateTransferComplete,
}

/// Listener that records every callback for later assertions
#[derive(Clone, Default)]
pub struct RecordingListener {
    events: Rc<RefCell<Vec<ListenerEvent>>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_events(&self) -> Vec<ListenerEvent> {
        std::mem::take(&mut self.events.borrow_mut())
    }

    /// The most recent `active_changed` value, if any was observed
    pub fn last_active(&self) -> Option<bool> {
        self.events
            .borrow()
            .iter()
            .rev()
            .find_map(|e| match e {
                ListenerEvent::ActiveChanged(v) => Some(*v),
                _ => None,
            })
    }
}

impl LinkListener for RecordingListener {
    fn active_changed(&mut self, self_active: bool) {
        self.events
            .borrow_mut()
            .push(ListenerEvent::ActiveChanged(self_active));
    }

    fn state_transfer_complete(&mut self) {
        self.events
            .borrow_mut()
            .push(ListenerEvent::StateTransferComplete);
    }
}

// ----------------------------------------------------------------------------
// Test State Provider
// ----------------------------------------------------------------------------

/// Provider with a scripted value that records every `set_state` call
#[derive(Clone, Default)]
pub struct TestStateProvider {
    value: Rc<RefCell<Option<Vec<u8>>>>,
    received: Rc<RefCell<Vec<(StateId, bool, Vec<u8>)>>>,
}

impl TestStateProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(value: Vec<u8>) -> Self {
        let p = Self::default();
        *p.value.borrow_mut() = Some(value);
        p
    }

    pub fn set_value(&self, value: Option<Vec<u8>>) {
        *self.value.borrow_mut() = value;
    }

    pub fn take_received(&self) -> Vec<(StateId, bool, Vec<u8>)> {
        std::mem::take(&mut self.received.borrow_mut())
    }
}

impl StateProvider for TestStateProvider {
    fn get_state(&mut self, _id: StateId) -> Option<Vec<u8>> {
        self.value.borrow().clone()
    }

    fn set_state(&mut self, id: StateId, will_become_active: bool, data: &[u8]) {
        self.received
            .borrow_mut()
            .push((id, will_become_active, data.to_vec()));
    }
}

// ----------------------------------------------------------------------------
// Virtual Clock
// ----------------------------------------------------------------------------

/// Manually advanced clock for reconnect and broadcast scheduling tests
#[derive(Clone, Default)]
pub struct TestClock {
    now: Rc<RefCell<u64>>,
}

impl TestClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, secs: u64) {
        *self.now.borrow_mut() += secs;
    }
}

impl crate::types::TimeSource for TestClock {
    fn now(&self) -> u64 {
        *self.now.borrow()
    }
}
