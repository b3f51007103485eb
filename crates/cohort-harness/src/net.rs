//! In-memory simulated network
//!
//! A [`SimNet`] is a registry of simulated endpoints. Each [`SimDriver`]
//! implements the core's socket driver contract; connects resolve against
//! registered listeners, bytes written on one side surface as io events on
//! the other, and endpoints can be killed to simulate a process death.
//! Everything is synchronous and single-threaded, so multi-node scenarios
//! are fully deterministic.

use cohort_core::testing::TestClock;
use cohort_core::{ClientId, ConnId, DriverError, DriverEvent, SocketDriver};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::rc::Rc;
use tracing::trace;

// ----------------------------------------------------------------------------
// Network Interior
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct DriverId(u64);

struct ConnState {
    owner: DriverId,
    peer: Option<ConnId>,
    tag: Option<ClientId>,
    inbound: VecDeque<u8>,
    open: bool,
}

struct EndpointState {
    name: String,
    alive: bool,
    events: VecDeque<DriverEvent>,
}

#[derive(Default)]
struct SimNetInner {
    next_driver: u64,
    next_conn: u64,
    endpoints: HashMap<DriverId, EndpointState>,
    listeners: HashMap<(String, u16), DriverId>,
    conns: HashMap<ConnId, ConnState>,
    aliases: HashMap<String, String>,
    /// Log of attempted connects, for reconnection assertions
    attempts: Vec<(String, u16)>,
}

impl SimNetInner {
    fn push_event(&mut self, driver: DriverId, event: DriverEvent) {
        if let Some(ep) = self.endpoints.get_mut(&driver) {
            if ep.alive {
                ep.events.push_back(event);
            }
        }
    }

    fn resolve(&self, host: &str) -> String {
        self.aliases.get(host).cloned().unwrap_or_else(|| host.to_string())
    }

    fn alloc_conn(&mut self, owner: DriverId) -> ConnId {
        let id = ConnId::new(self.next_conn);
        self.next_conn += 1;
        self.conns.insert(
            id,
            ConnState {
                owner,
                peer: None,
                tag: None,
                inbound: VecDeque::new(),
                open: true,
            },
        );
        id
    }

    /// Close one side and deliver `Closed` to the other
    fn sever(&mut self, conn: ConnId) {
        let peer = match self.conns.get_mut(&conn) {
            Some(c) if c.open => {
                c.open = false;
                c.peer
            }
            _ => return,
        };

        if let Some(peer_id) = peer {
            if let Some(p) = self.conns.get_mut(&peer_id) {
                if p.open {
                    p.open = false;
                    let owner = p.owner;
                    let tag = p.tag;
                    self.push_event(owner, DriverEvent::Closed { conn: peer_id, tag });
                }
            }
        }
    }
}

// ----------------------------------------------------------------------------
// SimNet
// ----------------------------------------------------------------------------

/// Handle to a simulated network shared by its drivers
#[derive(Clone, Default)]
pub struct SimNet {
    inner: Rc<RefCell<SimNetInner>>,
    clock: TestClock,
}

impl SimNet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The virtual clock every node of this network shares
    pub fn clock(&self) -> TestClock {
        self.clock.clone()
    }

    /// Register a new endpoint with the given canonical hostname
    pub fn driver(&self, name: impl Into<String>) -> SimDriver {
        let mut inner = self.inner.borrow_mut();
        let id = DriverId(inner.next_driver);
        inner.next_driver += 1;
        inner.endpoints.insert(
            id,
            EndpointState {
                name: name.into(),
                alive: true,
                events: VecDeque::new(),
            },
        );
        SimDriver {
            id,
            net: Rc::clone(&self.inner),
        }
    }

    /// Teach hostname canonicalization an alias
    pub fn add_alias(&self, from: impl Into<String>, to: impl Into<String>) {
        self.inner
            .borrow_mut()
            .aliases
            .insert(from.into(), to.into());
    }

    /// Kill an endpoint: its listeners disappear, its connections drop,
    /// and no further events reach it
    pub fn kill(&self, name: &str) {
        let mut inner = self.inner.borrow_mut();

        let victim = inner
            .endpoints
            .iter_mut()
            .find(|(_, ep)| ep.alive && ep.name == name)
            .map(|(id, ep)| {
                ep.alive = false;
                ep.events.clear();
                *id
            });

        let Some(victim) = victim else { return };
        inner.listeners.retain(|_, owner| *owner != victim);

        let owned: Vec<ConnId> = inner
            .conns
            .iter()
            .filter(|(_, c)| c.owner == victim && c.open)
            .map(|(id, _)| *id)
            .collect();
        for conn in owned {
            inner.sever(conn);
        }
    }

    /// How many connect attempts were made to the given address
    pub fn attempts_to(&self, host: &str, port: u16) -> usize {
        self.inner
            .borrow()
            .attempts
            .iter()
            .filter(|(h, p)| h == host && *p == port)
            .count()
    }
}

// ----------------------------------------------------------------------------
// SimDriver
// ----------------------------------------------------------------------------

/// Socket driver backed by a [`SimNet`]
pub struct SimDriver {
    id: DriverId,
    net: Rc<RefCell<SimNetInner>>,
}

impl SocketDriver for SimDriver {
    fn listen(&mut self, port: u16) -> Result<(), DriverError> {
        let mut inner = self.net.borrow_mut();
        let name = match inner.endpoints.get(&self.id) {
            Some(ep) => ep.name.clone(),
            None => return Err(DriverError::Shutdown),
        };
        let key = (name, port);
        if inner.listeners.contains_key(&key) {
            return Err(DriverError::Bind {
                port,
                reason: "address already in use".into(),
            });
        }
        inner.listeners.insert(key, self.id);
        Ok(())
    }

    fn shutdown_listener(&mut self) {
        self.net
            .borrow_mut()
            .listeners
            .retain(|_, owner| *owner != self.id);
    }

    fn connect(&mut self, host: &str, port: u16, tag: ClientId) {
        let mut inner = self.net.borrow_mut();
        let canonical = inner.resolve(host);
        inner.attempts.push((canonical.clone(), port));

        let target = inner
            .listeners
            .get(&(canonical.clone(), port))
            .copied()
            .filter(|t| inner.endpoints.get(t).is_some_and(|ep| ep.alive));

        match target {
            Some(target) => {
                trace!("sim connect {canonical}:{port}");
                let local = inner.alloc_conn(self.id);
                let remote = inner.alloc_conn(target);
                if let Some(c) = inner.conns.get_mut(&local) {
                    c.peer = Some(remote);
                    c.tag = Some(tag);
                }
                if let Some(c) = inner.conns.get_mut(&remote) {
                    c.peer = Some(local);
                }
                inner.push_event(self.id, DriverEvent::Connected { conn: local, tag });
                inner.push_event(target, DriverEvent::Accepted { conn: remote });
            }
            None => {
                trace!("sim connect {canonical}:{port} refused");
                inner.push_event(self.id, DriverEvent::ConnectFailed { tag });
            }
        }
    }

    fn set_tag(&mut self, conn: ConnId, tag: ClientId) {
        if let Some(c) = self.net.borrow_mut().conns.get_mut(&conn) {
            c.tag = Some(tag);
        }
    }

    fn canonicalize(&self, host: &str) -> Option<String> {
        Some(self.net.borrow().resolve(host))
    }

    fn my_canonical_name(&self) -> String {
        self.net
            .borrow()
            .endpoints
            .get(&self.id)
            .map(|ep| ep.name.clone())
            .unwrap_or_default()
    }

    fn read(&mut self, conn: ConnId, buf: &mut [u8]) -> io::Result<usize> {
        let mut inner = self.net.borrow_mut();
        match inner.conns.get_mut(&conn) {
            Some(c) if !c.inbound.is_empty() => {
                let n = c.inbound.len().min(buf.len());
                for slot in buf.iter_mut().take(n) {
                    *slot = c.inbound.pop_front().unwrap_or_default();
                }
                Ok(n)
            }
            Some(c) if !c.open => Ok(0),
            Some(_) => Err(io::Error::new(io::ErrorKind::WouldBlock, "drained")),
            None => Ok(0),
        }
    }

    fn write(&mut self, conn: ConnId, data: &[u8]) -> bool {
        let mut inner = self.net.borrow_mut();

        let peer = match inner.conns.get(&conn) {
            Some(c) if c.open => c.peer,
            _ => return false,
        };
        let Some(peer_id) = peer else { return false };

        let (owner, tag) = match inner.conns.get_mut(&peer_id) {
            Some(p) if p.open => {
                p.inbound.extend(data.iter().copied());
                (p.owner, p.tag)
            }
            _ => return false,
        };

        inner.push_event(owner, DriverEvent::IoReady { conn: peer_id, tag });
        true
    }

    fn close(&mut self, conn: ConnId) {
        self.net.borrow_mut().sever(conn);
    }

    fn poll_event(&mut self) -> Option<DriverEvent> {
        let mut inner = self.net.borrow_mut();
        inner
            .endpoints
            .get_mut(&self.id)
            .and_then(|ep| ep.events.pop_front())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
