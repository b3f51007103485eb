//! Cohort Core
//!
//! A peer-to-peer coordination link that keeps a small set of cooperating
//! processes in agreement about which single node is currently *active*,
//! and propagates opaque application state from the active node to all
//! others. Exactly one node holds the active role at any time; when it
//! fails or yields, another node takes over with the last observed state.
//!
//! ## Architecture Overview
//!
//! The crate is a headless, single-threaded state machine with traits at
//! every seam:
//!
//! - [`link::SocketLink`] owns the peer table, the active-role view, and
//!   the state registry, and implements the wire protocol: handshake,
//!   membership gossip, duplicate resolution, election by request, state
//!   broadcast, and reconnection with backoff.
//! - [`driver::SocketDriver`] abstracts the transport. `cohort-tcp`
//!   implements it over tokio TCP; `cohort-harness` implements it over a
//!   deterministic in-memory network for tests.
//! - [`driver::LinkListener`] is the embedder's side: active-role changes
//!   and state-transfer completions.
//! - [`state::StateProvider`] serializes one identified piece of
//!   application state; the link neither interprets the bytes nor imposes
//!   a schema.
//! - [`config::ConfigStore`] supplies the `distribution/tcp` settings.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use cohort_core::{SocketLink, StateId};
//! use cohort_core::testing::{MemoryConfig, MockDriver};
//!
//! let driver = MockDriver::new("alpha.lan");
//! let mut link = SocketLink::new(Box::new(driver), Box::new(MemoryConfig::new()));
//! link.init();
//! link.set_enabled(true);
//! link.join("tcp://beta.lan:27273/").unwrap();
//!
//! // Pump driver events and tick at ~1 Hz:
//! link.process_events();
//! link.heartbeat();
//! ```

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod config;
pub mod driver;
pub mod errors;
pub mod link;
pub mod packet;
pub mod peer;
pub mod protocol;
pub mod state;
pub mod testing;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::{ConfigStore, LinkSettings, DEFAULT_ATTEMPTS, DEFAULT_INTERVAL, DEFAULT_PORT};
pub use driver::{DriverEvent, LinkListener, SocketDriver};
pub use errors::{DriverError, LinkError, PacketError, ProtocolError, Result};
pub use link::SocketLink;
pub use packet::PacketBuffer;
pub use state::StateProvider;
pub use types::{ClientId, ConnId, NodeId, StateId, SystemTimeSource, Tick, TimeSource};
