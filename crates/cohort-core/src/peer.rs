//! Peer table
//!
//! One record per known peer, held in an arena keyed by stable [`ClientId`]
//! handles. Driver callbacks carry handles, never references, so an evicted
//! record resolves to nothing instead of dangling.

use crate::packet::PacketBuffer;
use crate::types::{ClientId, ConnId, NodeId, Tick};
use std::collections::BTreeMap;

// ----------------------------------------------------------------------------
// Client Record
// ----------------------------------------------------------------------------

/// State held for one known peer
#[derive(Debug, Default)]
pub struct Client {
    /// Canonical hostname; unknown until the HELLO/WELCOME handshake
    pub hostname: Option<String>,
    /// Peer's listen port; 0 until learned
    pub port: u16,
    /// Live connection, if any
    pub socket: Option<ConnId>,
    /// Reassembly buffer for inbound bytes
    pub packet: PacketBuffer,
    /// Remaining reconnection attempts
    pub reconnect_count: u32,
    /// When the next attempt is due; `None` when not scheduled
    pub reconnect_at: Option<Tick>,
}

impl Client {
    /// Record for an outgoing connection whose target identity is known
    pub fn outgoing(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: Some(hostname.into()),
            port,
            ..Self::default()
        }
    }

    /// Record for an accepted connection; identity arrives with HELLO
    pub fn accepted(conn: ConnId) -> Self {
        Self {
            socket: Some(conn),
            ..Self::default()
        }
    }

    /// Canonical identity, once learned
    pub fn identity(&self) -> Option<NodeId> {
        self.hostname
            .as_ref()
            .map(|h| NodeId::new(h.clone(), self.port))
    }

    /// Whether this record matches the given identity
    pub fn is(&self, host: &str, port: u16) -> bool {
        self.port == port && self.hostname.as_deref() == Some(host)
    }

    /// Forget any pending reconnection
    pub fn clear_reconnect(&mut self) {
        self.reconnect_count = 0;
        self.reconnect_at = None;
    }
}

// ----------------------------------------------------------------------------
// Client Table
// ----------------------------------------------------------------------------

/// Arena of peer records with monotonically assigned handles
///
/// Iteration order is handle order, which is insertion order; broadcast
/// fan-out is therefore deterministic.
#[derive(Debug, Default)]
pub struct ClientTable {
    clients: BTreeMap<ClientId, Client>,
    next: u64,
}

impl ClientTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record, returning its handle
    pub fn insert(&mut self, client: Client) -> ClientId {
        let id = ClientId::new(self.next);
        self.next += 1;
        self.clients.insert(id, client);
        id
    }

    /// Remove a record, returning it if it existed
    pub fn remove(&mut self, id: ClientId) -> Option<Client> {
        self.clients.remove(&id)
    }

    pub fn get(&self, id: ClientId) -> Option<&Client> {
        self.clients.get(&id)
    }

    pub fn get_mut(&mut self, id: ClientId) -> Option<&mut Client> {
        self.clients.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ClientId, &Client)> {
        self.clients.iter().map(|(id, c)| (*id, c))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ClientId, &mut Client)> {
        self.clients.iter_mut().map(|(id, c)| (*id, c))
    }

    /// All handles, snapshotted for mutation during iteration
    pub fn ids(&self) -> Vec<ClientId> {
        self.clients.keys().copied().collect()
    }

    /// Find the peer with the given canonical identity
    pub fn find_by_identity(&self, host: &str, port: u16) -> Option<ClientId> {
        self.iter()
            .find(|(_, c)| c.is(host, port))
            .map(|(id, _)| id)
    }

    /// Find the peer owning the given connection
    pub fn find_by_conn(&self, conn: ConnId) -> Option<ClientId> {
        self.iter()
            .find(|(_, c)| c.socket == Some(conn))
            .map(|(id, _)| id)
    }

    /// Number of peers with a live socket
    pub fn connected_count(&self) -> usize {
        self.iter().filter(|(_, c)| c.socket.is_some()).count()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_never_reused() {
        let mut table = ClientTable::new();
        let a = table.insert(Client::outgoing("a", 1));
        table.remove(a);
        let b = table.insert(Client::outgoing("b", 2));
        assert_ne!(a, b);
        assert!(table.get(a).is_none());
    }

    #[test]
    fn test_find_by_identity_requires_known_hostname() {
        let mut table = ClientTable::new();
        table.insert(Client::accepted(ConnId::new(1)));
        let known = table.insert(Client::outgoing("alpha.lan", 27273));

        assert_eq!(table.find_by_identity("alpha.lan", 27273), Some(known));
        assert_eq!(table.find_by_identity("alpha.lan", 1), None);
        // The accepted record has no identity yet and never matches.
        assert_eq!(table.find_by_identity("", 0), None);
    }

    #[test]
    fn test_connected_count_ignores_socketless_peers() {
        let mut table = ClientTable::new();
        table.insert(Client::outgoing("a", 1));
        let b = table.insert(Client::outgoing("b", 2));
        table.get_mut(b).unwrap().socket = Some(ConnId::new(5));

        assert_eq!(table.len(), 2);
        assert_eq!(table.connected_count(), 1);
        assert_eq!(table.find_by_conn(ConnId::new(5)), Some(b));
    }
}
