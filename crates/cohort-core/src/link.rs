//! The coordination link
//!
//! A fully symmetric gossip network over framed connections that keeps a
//! small set of cooperating nodes in agreement about which single node is
//! active, and pushes opaque application state from the active node to the
//! rest. Single-threaded cooperative: every public operation, driver event,
//! heartbeat tick, and configuration notification runs on one logical
//! thread.

use crate::config::{ConfigStore, LinkSettings, DEFAULT_PORT};
use crate::driver::{DriverEvent, LinkListener, SocketDriver};
use crate::errors::{LinkError, ProtocolError, Result};
use crate::packet::PacketBuffer;
use crate::peer::{Client, ClientTable};
use crate::protocol::{
    take_frame, Claim, ClientList, ClientListEntry, ClientListFlags, Command, FrameHeader, Hello,
    NewMaster, StateEntry, StateInfo, Welcome,
};
use crate::state::{StateProvider, StateRegistry};
use crate::types::{ClientId, ConnId, NodeId, StateId, SystemTimeSource, TimeSource};
use tracing::{debug, info, warn};
use url::Url;

/// Heartbeats between periodic state broadcasts from the active node
const STATE_BROADCAST_PERIOD: u64 = 60;

// ----------------------------------------------------------------------------
// Socket Link
// ----------------------------------------------------------------------------

/// Peer-to-peer coordination link
///
/// Owns the peer table, the active-role view, and the state registry;
/// drives a [`SocketDriver`] for all transport work. The embedder pumps
/// [`process_events`](SocketLink::process_events) as the driver queues
/// events and calls [`heartbeat`](SocketLink::heartbeat) at roughly 1 Hz.
pub struct SocketLink {
    driver: Box<dyn SocketDriver>,
    config: Box<dyn ConfigStore>,
    time: Box<dyn TimeSource>,
    listener: Option<Box<dyn LinkListener>>,

    clients: ClientTable,
    states: StateRegistry,
    settings: LinkSettings,

    /// Local canonical hostname, learned from the driver at init
    myname: String,
    server_enabled: bool,

    /// True when this node believes itself to be the sole active node
    self_active: bool,
    /// The remote peer believed to be active, if any; never set together
    /// with `self_active`
    active_client: Option<ClientId>,

    heartbeat_count: u64,
}

impl SocketLink {
    /// Create a link over the given driver and configuration store
    pub fn new(driver: Box<dyn SocketDriver>, config: Box<dyn ConfigStore>) -> Self {
        Self::with_time_source(driver, config, Box::new(SystemTimeSource::new()))
    }

    /// Create a link with an explicit time source
    pub fn with_time_source(
        driver: Box<dyn SocketDriver>,
        config: Box<dyn ConfigStore>,
        time: Box<dyn TimeSource>,
    ) -> Self {
        Self {
            driver,
            config,
            time,
            listener: None,
            clients: ClientTable::new(),
            states: StateRegistry::new(),
            settings: LinkSettings::default(),
            myname: String::new(),
            server_enabled: false,
            self_active: false,
            active_client: None,
            heartbeat_count: 0,
        }
    }

    /// Attach the embedder's listener for active-role and state-transfer
    /// callbacks
    pub fn set_listener(&mut self, listener: Box<dyn LinkListener>) {
        self.listener = Some(listener);
    }

    // ------------------------------------------------------------------
    // Embedder-Facing Operations
    // ------------------------------------------------------------------

    /// Initialize the link: learn the local canonical name and read the
    /// configuration. The node starts out considering itself active.
    pub fn init(&mut self) {
        self.myname = self.driver.my_canonical_name();
        self.active_client = None;
        self.self_active = true;
        self.read_configuration();
        info!(
            "link initialized as {}:{}",
            self.myname, self.settings.port
        );
    }

    /// Periodic tick (~1 Hz): drives reconnection attempts and, on every
    /// 60th tick while active, the state broadcast
    pub fn heartbeat(&mut self) {
        self.heartbeat_count += 1;
        let now = self.time.now();
        let interval = self.settings.reconnect_interval;

        let due: Vec<(ClientId, String, u16)> = self
            .clients
            .iter()
            .filter_map(|(id, c)| match (&c.hostname, c.reconnect_at) {
                (Some(host), Some(at)) if c.reconnect_count > 0 && now >= at => {
                    Some((id, host.clone(), c.port))
                }
                _ => None,
            })
            .collect();

        for (id, host, port) in due {
            if let Some(client) = self.clients.get_mut(id) {
                client.reconnect_count -= 1;
                // Arm the next attempt now so a failed connect needs no
                // rescheduling; success clears the whole schedule.
                client.reconnect_at = Some(now + interval);
            }
            debug!("reconnecting to {host}:{port}");
            self.driver.connect(&host, port, id);
        }

        if self.heartbeat_count % STATE_BROADCAST_PERIOD == 0 && self.self_active {
            self.send_state();
        }
    }

    /// Drain and dispatch every queued driver event; returns how many were
    /// handled
    pub fn process_events(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.driver.poll_event() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    /// Dispatch a single driver event
    pub fn handle_event(&mut self, event: DriverEvent) {
        match event {
            DriverEvent::Accepted { conn } => self.socket_accepted(conn),
            DriverEvent::Connected { conn, tag } => self.socket_connected(conn, tag),
            DriverEvent::ConnectFailed { tag } => self.socket_connect_failed(tag),
            DriverEvent::IoReady { conn, tag } => self.socket_io(conn, tag),
            DriverEvent::Closed { conn, tag } => self.socket_closed(conn, tag),
        }
    }

    /// Enable or disable distributed operation, returning the prior state
    ///
    /// Enabling binds the listening socket; if the bind fails the link
    /// stays disabled. Disabling tears the listener down, disconnects
    /// every peer, and leaves the local node active.
    pub fn set_enabled(&mut self, enabled: bool) -> bool {
        let prior = self.server_enabled;

        if !self.server_enabled && enabled {
            match self.driver.listen(self.settings.port) {
                Ok(()) => {
                    info!("listening on port {}", self.settings.port);
                    self.server_enabled = true;
                }
                Err(e) => {
                    warn!("cannot enable link: {e}");
                }
            }
        } else if self.server_enabled && !enabled {
            self.driver.shutdown_listener();
            self.disconnect_all();
            self.set_me_active();
            self.server_enabled = false;
        }

        prior
    }

    /// Whether the listening socket is up
    pub fn is_enabled(&self) -> bool {
        self.server_enabled
    }

    /// Set the shared credentials
    pub fn set_user(&mut self, username: impl Into<String>, password: impl Into<String>) {
        self.settings.username = Some(username.into());
        self.settings.password = Some(password.into());
    }

    /// Join the network through the node a URL names
    ///
    /// Any `scheme://host:port/...` form is accepted; only host and port
    /// are used, and a missing port falls back to the default.
    pub fn join(&mut self, url: &str) -> Result<()> {
        let parsed = Url::parse(url).map_err(|_| LinkError::invalid_url(url))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| LinkError::invalid_url(url))?
            .to_string();
        let port = parsed.port().unwrap_or(DEFAULT_PORT);
        self.add_client(&host, port);
        Ok(())
    }

    /// Attempt to become the active node
    ///
    /// Returns true when the node became active locally; false when the
    /// request was deferred to the current active node.
    pub fn claim(&mut self) -> bool {
        if let Some(active) = self.active_client {
            // Someone else is active; politely ask to take over.
            debug!("requesting the active role from {active}");
            self.send_claim(active);
            false
        } else if !self.self_active && !self.clients.is_empty() {
            // No one is known to be active; take the role and say so.
            self.set_me_active();
            self.send_new_master();
            true
        } else {
            self.set_me_active();
            true
        }
    }

    /// Close every connection and zero every reconnect schedule; the local
    /// node ends up active. Returns whether any peer record existed.
    pub fn disconnect_all(&mut self) -> bool {
        let mut any = false;
        self.active_client = None;

        for id in self.clients.ids() {
            if let Some(client) = self.clients.get_mut(id) {
                if let Some(conn) = client.socket.take() {
                    self.driver.close(conn);
                }
                client.clear_reconnect();
                any = true;
            }
        }

        self.set_me_active();
        any
    }

    /// Arm every peer for an immediate reconnection attempt on the next
    /// heartbeat. Returns whether any peer record existed.
    pub fn reconnect_all(&mut self) -> bool {
        let now = self.time.now();
        let attempts = self.settings.reconnect_attempts;
        let mut any = false;

        for (_, client) in self.clients.iter_mut() {
            client.reconnect_count = attempts;
            client.reconnect_at = Some(now);
            any = true;
        }

        any
    }

    /// Identity of the node currently believed active, if known
    pub fn get_active(&self) -> Option<(String, u16)> {
        if self.self_active {
            Some((self.myname.clone(), self.settings.port))
        } else {
            self.active_client
                .and_then(|id| self.clients.get(id))
                .and_then(|c| c.identity())
                .map(|n| (n.host, n.port))
        }
    }

    /// Whether this node believes itself active
    pub fn is_self_active(&self) -> bool {
        self.self_active
    }

    /// Register a state provider, replacing any previous one for the id
    pub fn register_state(&mut self, id: StateId, provider: Box<dyn StateProvider>) -> bool {
        self.states.register(id, provider);
        true
    }

    /// Number of peers with a live connection
    pub fn number_of_peers(&self) -> usize {
        self.clients.connected_count()
    }

    /// The local node's canonical identity
    pub fn local_identity(&self) -> NodeId {
        NodeId::new(self.myname.clone(), self.settings.port)
    }

    /// Re-read configuration after the embedder's store changed
    pub fn config_changed(&mut self) {
        debug!("configuration changed, re-reading");
        self.read_configuration();
    }

    // ------------------------------------------------------------------
    // Peer Table Maintenance
    // ------------------------------------------------------------------

    /// Whether the identity names the local node
    fn client_is_me(&self, host: &str, port: u16) -> bool {
        !self.myname.is_empty() && port == self.settings.port && host == self.myname
    }

    /// Whether the identity names the local node or a known peer
    fn exists_client(&self, host: &str, port: u16) -> bool {
        self.client_is_me(host, port) || self.clients.find_by_identity(host, port).is_some()
    }

    /// Add a peer by address and start connecting to it
    ///
    /// Identities are checked both as given and in canonical form; a known
    /// identity is silently skipped.
    pub fn add_client(&mut self, host: &str, port: u16) {
        if self.exists_client(host, port) {
            return;
        }

        let mut host = host.to_string();
        if let Some(canonical) = self.driver.canonicalize(&host) {
            if self.exists_client(&canonical, port) {
                return;
            }
            host = canonical;
        }

        debug!("connecting to {host}:{port}");
        let id = self.clients.insert(Client::outgoing(host.clone(), port));
        self.driver.connect(&host, port, id);
    }

    /// Remove a peer, closing its connection if one is live
    pub fn remove_client(&mut self, id: ClientId) -> bool {
        if self.active_client == Some(id) {
            self.active_client = None;
        }

        match self.clients.remove(id) {
            Some(client) => {
                if let Some(conn) = client.socket {
                    self.driver.close(conn);
                }
                true
            }
            None => false,
        }
    }

    /// Assign a canonical identity to a peer, resolving duplicates
    ///
    /// Returns false when the identity belongs to the local node or to
    /// another peer with a live socket; the caller then sends DUPLICATE
    /// and drops the record. A dead record holding the identity is evicted
    /// silently.
    fn set_canonical(&mut self, client: ClientId, host: &str, port: u16) -> bool {
        debug!("set canonical {host}:{port} for {client}");
        let mut ok = true;

        if self.exists_client(host, port) {
            match self.clients.find_by_identity(host, port) {
                None => {
                    // The identity is our own.
                    ok = false;
                }
                Some(_) if self.client_is_me(host, port) => {
                    ok = false;
                }
                Some(old) if old != client => {
                    let connected = self
                        .clients
                        .get(old)
                        .is_some_and(|c| c.socket.is_some());
                    if connected {
                        ok = false;
                    } else {
                        debug!("evicting stale record {old} for {host}:{port}");
                        self.remove_client(old);
                    }
                }
                Some(_) => {
                    // Already this record's identity.
                }
            }
        }

        if ok {
            if let Some(c) = self.clients.get_mut(client) {
                c.hostname = Some(host.to_string());
                c.port = port;
            }
        }

        ok
    }

    // ------------------------------------------------------------------
    // Active-Role State Machine
    // ------------------------------------------------------------------

    fn notify_active_changed(&mut self) {
        let self_active = self.self_active;
        if let Some(listener) = self.listener.as_mut() {
            listener.active_changed(self_active);
        }
    }

    /// Mark a remote peer as the active node
    fn set_active_remote(&mut self, id: ClientId) {
        self.active_client = Some(id);
        self.self_active = false;
        self.notify_active_changed();
    }

    /// Mark the local node as active
    fn set_me_active(&mut self) {
        self.active_client = None;
        self.self_active = true;
        self.notify_active_changed();
    }

    /// Forget who is active
    fn set_active_unknown(&mut self) {
        self.active_client = None;
        self.self_active = false;
        self.notify_active_changed();
    }

    /// Resolve an identity to self, a known peer, or unknown, and
    /// transition accordingly
    fn set_active_by_identity(&mut self, host: &str, port: u16) {
        if let Some(id) = self.clients.find_by_identity(host, port) {
            self.set_active_remote(id);
        } else if self.client_is_me(host, port) {
            self.set_me_active();
        } else {
            debug!("active node {host}:{port} is not known here");
            self.set_active_unknown();
        }
    }

    // ------------------------------------------------------------------
    // Driver Event Handlers
    // ------------------------------------------------------------------

    fn socket_accepted(&mut self, conn: ConnId) {
        debug!("accepted inbound connection {conn}");
        let id = self.clients.insert(Client::accepted(conn));
        self.driver.set_tag(conn, id);
    }

    fn socket_connected(&mut self, conn: ConnId, tag: ClientId) {
        let stale = match self.clients.get_mut(tag) {
            Some(client) => {
                debug!(
                    "connected to {}:{}",
                    client.hostname.as_deref().unwrap_or(""),
                    client.port
                );
                client.clear_reconnect();
                client.socket.replace(conn)
            }
            None => {
                // The record was evicted while the connect was in flight.
                self.driver.close(conn);
                return;
            }
        };

        if let Some(stale) = stale {
            self.driver.close(stale);
        }
        self.send_hello(tag);
    }

    fn socket_connect_failed(&mut self, tag: ClientId) {
        let now = self.time.now();
        let (attempts, interval) = (
            self.settings.reconnect_attempts,
            self.settings.reconnect_interval,
        );

        if let Some(client) = self.clients.get_mut(tag) {
            debug!(
                "connect to {}:{} failed",
                client.hostname.as_deref().unwrap_or(""),
                client.port
            );
            if let Some(conn) = client.socket.take() {
                self.driver.close(conn);
            }
            if client.reconnect_at.is_none() && client.reconnect_count == 0 {
                // First-ever attempt for this peer; arm the full schedule.
                client.reconnect_count = attempts;
                client.reconnect_at = Some(now + interval);
            }
            // A failed scheduled retry needs nothing: the next attempt was
            // armed when this one was issued, and an exhausted peer stays
            // dormant.
        }

        if self.active_client == Some(tag) {
            self.set_active_unknown();
        }
    }

    fn socket_io(&mut self, conn: ConnId, tag: Option<ClientId>) {
        let Some(id) = tag.or_else(|| self.clients.find_by_conn(conn)) else {
            return;
        };

        let mut healthy = true;
        let mut closed = false;

        {
            let Some(client) = self.clients.get_mut(id) else {
                return;
            };
            if client.socket != Some(conn) {
                return;
            }

            let mut chunk = [0u8; 4096];
            loop {
                match self.driver.read(conn, &mut chunk) {
                    Ok(0) => {
                        closed = true;
                        break;
                    }
                    Ok(n) => client.packet.pack_raw(&chunk[..n]),
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(e) => {
                        debug!("read error on {conn}: {e}");
                        healthy = false;
                        break;
                    }
                }
            }
        }

        self.process_client_packet(id);

        if !healthy || closed {
            if self.clients.get(id).is_some() {
                debug!("connection to {id} lost");
                self.handle_connection_lost(id);
            }
        }
    }

    fn socket_closed(&mut self, conn: ConnId, tag: Option<ClientId>) {
        let Some(id) = tag.or_else(|| self.clients.find_by_conn(conn)) else {
            return;
        };
        if self.clients.get(id).is_some_and(|c| c.socket == Some(conn)) {
            debug!("peer {id} closed its connection");
            self.handle_connection_lost(id);
        }
    }

    /// Tear down a lost connection: drop the socket, arm the reconnect
    /// schedule, and demote the active view when the active peer was lost
    fn handle_connection_lost(&mut self, id: ClientId) {
        let now = self.time.now();
        let (attempts, interval) = (
            self.settings.reconnect_attempts,
            self.settings.reconnect_interval,
        );

        if let Some(client) = self.clients.get_mut(id) {
            if let Some(conn) = client.socket.take() {
                self.driver.close(conn);
            }
            if client.hostname.is_some() {
                client.reconnect_count = attempts;
                client.reconnect_at = Some(now + interval);
            }
        }

        if self.active_client == Some(id) {
            self.set_active_unknown();
        }
    }

    // ------------------------------------------------------------------
    // Frame Processing
    // ------------------------------------------------------------------

    /// Pull whole frames out of the peer's reassembly buffer and dispatch
    /// them
    fn process_client_packet(&mut self, id: ClientId) {
        loop {
            let frame = {
                let Some(client) = self.clients.get_mut(id) else {
                    return;
                };
                match take_frame(&mut client.packet) {
                    Ok(Some(frame)) => frame,
                    Ok(None) => return,
                    Err(e) => {
                        warn!("malformed stream from {id}: {e}");
                        client.packet.clear();
                        return;
                    }
                }
            };

            if let Err(e) = self.process_frame(id, frame) {
                warn!("dropping malformed frame from {id}: {e}");
                if let Some(client) = self.clients.get_mut(id) {
                    client.packet.clear();
                }
            }

            // The handler may have removed the peer (duplicate, bad
            // credentials); stop if so.
            if self.clients.get(id).is_none() {
                return;
            }
        }
    }

    /// Decode and dispatch one whole frame
    fn process_frame(&mut self, id: ClientId, frame: Vec<u8>) -> std::result::Result<(), ProtocolError> {
        let mut pkt = PacketBuffer::from_bytes(frame);
        let header = FrameHeader::decode(&mut pkt)?;

        match header.command() {
            Some(Command::Hello) => self.handle_hello(id, &mut pkt),
            Some(Command::Welcome) => self.handle_welcome(id, &mut pkt),
            Some(Command::ClientList) => self.handle_client_list(id, &mut pkt),
            Some(Command::Claim) => self.handle_claim(id, &mut pkt),
            Some(Command::NewMaster) => self.handle_new_master(id, &mut pkt),
            Some(Command::StateInfo) => self.handle_state(id, &mut pkt),
            Some(Command::Duplicate) => {
                self.handle_duplicate(id);
                Ok(())
            }
            None => {
                debug!("discarding unknown command {} from {id}", header.command);
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Message Handlers
    // ------------------------------------------------------------------

    fn handle_hello(&mut self, id: ClientId, pkt: &mut PacketBuffer) -> std::result::Result<(), ProtocolError> {
        let hello = Hello::decode(pkt)?;
        debug!(
            "hello from {}:{} as {:?}",
            hello.host, hello.port, hello.username
        );

        let credentials_ok = LinkSettings::credential_matches(
            self.settings.username.as_deref(),
            &hello.username,
        ) && LinkSettings::credential_matches(
            self.settings.password.as_deref(),
            &hello.password,
        );

        if !credentials_ok {
            info!("access denied for {}:{}", hello.host, hello.port);
            self.remove_client(id);
            return Ok(());
        }

        if self.set_canonical(id, &hello.host, hello.port) {
            self.send_welcome(id);
            self.send_client_list(id);
        } else {
            debug!("duplicate peer {}:{}", hello.host, hello.port);
            self.send_duplicate(id);
            self.remove_client(id);
        }

        Ok(())
    }

    fn handle_welcome(
        &mut self,
        id: ClientId,
        pkt: &mut PacketBuffer,
    ) -> std::result::Result<(), ProtocolError> {
        let welcome = Welcome::decode(pkt)?;
        debug!("welcome from {}:{}", welcome.host, welcome.port);

        if self.set_canonical(id, &welcome.host, welcome.port) {
            // The welcoming side's CLIENT_LIST announces the true active
            // node; until it arrives we no longer know who is active. Our
            // own list goes back without an active claim so the two sides
            // cannot race to announce themselves.
            self.set_active_unknown();
            self.send_client_list(id);
        } else {
            self.send_duplicate(id);
            self.remove_client(id);
        }

        Ok(())
    }

    fn handle_client_list(
        &mut self,
        id: ClientId,
        pkt: &mut PacketBuffer,
    ) -> std::result::Result<(), ProtocolError> {
        let count = pkt.unpack_u16()?;
        let flags_pos = pkt.bytes_read();
        let flags = ClientListFlags::new(pkt.unpack_u16()?);

        if flags.sender_is_active() {
            debug!("sender {id} is active");
            self.set_active_remote(id);
        } else if flags.has_active_ref() {
            let host = pkt.unpack_string()?;
            let port = pkt.unpack_u16()?;
            debug!("sender {id} names {host}:{port} active");
            self.set_active_by_identity(&host, port);
        }

        if flags.is_forwardable() {
            // Clear the bit in the byte buffer so recipients see it
            // cleared; the frame is forwarded exactly once.
            pkt.poke_u16(flags_pos, flags.without_forwardable().as_u16())?;
            let raw = pkt.as_slice().to_vec();
            self.send_packet_except(&raw, Some(id));
        }

        for _ in 0..count {
            let entry = ClientList::decode_entry(pkt)?;
            if !entry.host.is_empty()
                && entry.port != 0
                && !self.exists_client(&entry.host, entry.port)
            {
                self.add_client(&entry.host, entry.port);
            }
        }

        Ok(())
    }

    fn handle_claim(&mut self, id: ClientId, pkt: &mut PacketBuffer) -> std::result::Result<(), ProtocolError> {
        let _claim = Claim::decode(pkt)?;
        debug!("{id} claims the active role");

        let was_active = self.self_active;
        self.set_active_remote(id);

        // Hand the new active node the latest state before announcing it.
        if was_active {
            self.send_state();
        }
        self.send_new_master();

        Ok(())
    }

    fn handle_new_master(
        &mut self,
        id: ClientId,
        pkt: &mut PacketBuffer,
    ) -> std::result::Result<(), ProtocolError> {
        let msg = NewMaster::decode(pkt)?;
        debug!("{id} announces {}:{} as active", msg.host, msg.port);
        self.set_active_by_identity(&msg.host, msg.port);
        Ok(())
    }

    fn handle_state(&mut self, id: ClientId, pkt: &mut PacketBuffer) -> std::result::Result<(), ProtocolError> {
        let active_host = pkt.unpack_string()?;
        let active_port = pkt.unpack_u16()?;
        let will_become_active =
            !active_host.is_empty() && self.client_is_me(&active_host, active_port);

        let count = pkt.unpack_u16()?;
        for _ in 0..count {
            let data_len = pkt.unpack_u16()?;
            let state_id = StateId::new(pkt.unpack_u16()?);

            if data_len == 0 {
                continue;
            }
            match pkt.unpack_raw(data_len as usize) {
                Ok(data) => {
                    if let Some(provider) = self.states.get_mut(state_id) {
                        provider.set_state(state_id, will_become_active, &data);
                    } else {
                        debug!("no provider registered for {state_id}");
                    }
                }
                Err(_) => {
                    warn!("truncated state entry for {state_id} from {id}");
                    break;
                }
            }
        }

        if let Some(listener) = self.listener.as_mut() {
            listener.state_transfer_complete();
        }

        Ok(())
    }

    fn handle_duplicate(&mut self, id: ClientId) {
        debug!("{id} reports us as duplicate; dropping this socket");
        self.remove_client(id);
    }

    // ------------------------------------------------------------------
    // Outbound Messages
    // ------------------------------------------------------------------

    fn send_packet(&mut self, id: ClientId, bytes: &[u8]) {
        if let Some(conn) = self.clients.get(id).and_then(|c| c.socket) {
            if !self.driver.write(conn, bytes) {
                debug!("write to {id} failed; peer will be reaped on read error");
            }
        }
    }

    fn send_packet_except(&mut self, bytes: &[u8], except: Option<ClientId>) {
        let targets: Vec<(ClientId, ConnId)> = self
            .clients
            .iter()
            .filter(|(id, _)| Some(*id) != except)
            .filter_map(|(id, c)| c.socket.map(|conn| (id, conn)))
            .collect();

        for (id, conn) in targets {
            if !self.driver.write(conn, bytes) {
                debug!("broadcast write to {id} failed");
            }
        }
    }

    fn send_packet_broadcast(&mut self, bytes: &[u8]) {
        self.send_packet_except(bytes, None);
    }

    fn send_hello(&mut self, id: ClientId) {
        let msg = Hello {
            username: self.settings.username.clone().unwrap_or_default(),
            password: self.settings.password.clone().unwrap_or_default(),
            host: self.myname.clone(),
            port: self.settings.port,
        };
        match msg.encode() {
            Ok(bytes) => self.send_packet(id, &bytes),
            Err(e) => warn!("failed to encode hello: {e}"),
        }
    }

    fn send_welcome(&mut self, id: ClientId) {
        let msg = Welcome {
            host: self.myname.clone(),
            port: self.settings.port,
        };
        match msg.encode() {
            Ok(bytes) => self.send_packet(id, &bytes),
            Err(e) => warn!("failed to encode welcome: {e}"),
        }
    }

    fn send_duplicate(&mut self, id: ClientId) {
        let mut pkt = crate::protocol::begin_frame(Command::Duplicate);
        match crate::protocol::finish_frame(&mut pkt) {
            Ok(()) => {
                let bytes = pkt.as_slice().to_vec();
                self.send_packet(id, &bytes);
            }
            Err(e) => warn!("failed to encode duplicate: {e}"),
        }
    }

    fn send_claim(&mut self, id: ClientId) {
        match Claim::default().encode() {
            Ok(bytes) => self.send_packet(id, &bytes),
            Err(e) => warn!("failed to encode claim: {e}"),
        }
    }

    /// Broadcast who the active node now is: the active remote if one is
    /// set, otherwise the local node
    fn send_new_master(&mut self) {
        let (host, port) = match self
            .active_client
            .and_then(|id| self.clients.get(id))
            .and_then(|c| c.identity())
        {
            Some(identity) => (identity.host, identity.port),
            None => (self.myname.clone(), self.settings.port),
        };

        debug!("announcing {host}:{port} as the new active node");
        match (NewMaster { host, port }).encode() {
            Ok(bytes) => self.send_packet_broadcast(&bytes),
            Err(e) => warn!("failed to encode new-master: {e}"),
        }
    }

    /// Build the membership gossip for one peer: every other connected
    /// peer, plus the sender's view of the active role
    fn send_client_list(&mut self, target: ClientId) {
        if self.clients.is_empty() {
            return;
        }

        let mut flags = ClientListFlags::default().with_forwardable();
        let mut active = None;

        if self.self_active {
            flags = flags.with_sender_active();
        } else if let Some(identity) = self
            .active_client
            .and_then(|id| self.clients.get(id))
            .and_then(|c| c.identity())
        {
            flags = flags.with_active_ref();
            active = Some((identity.host, identity.port));
        }

        let entries: Vec<ClientListEntry> = self
            .clients
            .iter()
            .filter(|(id, c)| *id != target && c.socket.is_some())
            .filter_map(|(_, c)| {
                c.identity().map(|n| ClientListEntry {
                    host: n.host,
                    port: n.port,
                })
            })
            .collect();

        let msg = ClientList {
            flags,
            active,
            entries,
        };
        match msg.encode() {
            Ok(bytes) => self.send_packet(target, &bytes),
            Err(e) => warn!("failed to encode client list: {e}"),
        }
    }

    /// Broadcast the current application state to every connected peer
    fn send_state(&mut self) {
        let (active_host, active_port) = self.get_active().unwrap_or_default();

        let mut entries = Vec::with_capacity(self.states.len());
        for (id, provider) in self.states.iter_mut() {
            let data = provider.get_state(id).unwrap_or_default();
            entries.push(StateEntry { id, data });
        }

        let msg = StateInfo {
            active_host,
            active_port,
            entries,
        };
        match msg.encode() {
            Ok(bytes) => self.send_packet_broadcast(&bytes),
            Err(e) => warn!("failed to encode state info: {e}"),
        }
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    fn read_configuration(&mut self) {
        let old_port = self.settings.port;
        self.settings = LinkSettings::read(self.config.as_ref());

        // A port change while enabled needs the listener rebound.
        if old_port != self.settings.port && self.server_enabled {
            self.set_enabled(false);
            self.set_enabled(true);
        }
    }
}
