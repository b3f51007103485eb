//! Cohort Harness
//!
//! Shared test plumbing for multi-node link scenarios: a deterministic
//! in-memory network, a node bundle wiring a link to it, and a settle pump
//! that delivers events until the network is quiet.

pub mod net;

pub use net::{SimDriver, SimNet};

use cohort_core::testing::{MemoryConfig, RecordingListener};
use cohort_core::SocketLink;

// ----------------------------------------------------------------------------
// Node Bundle
// ----------------------------------------------------------------------------

/// One simulated node: a link wired to a [`SimNet`] endpoint, with a
/// recording listener and its own configuration store
pub struct SimNode {
    pub name: String,
    pub link: SocketLink,
    pub listener: RecordingListener,
    pub config: MemoryConfig,
}

impl SimNet {
    /// Create and initialize a node with the given canonical hostname
    pub fn node(&self, name: &str) -> SimNode {
        let driver = self.driver(name);
        let config = MemoryConfig::new();
        let listener = RecordingListener::new();

        let mut link = SocketLink::with_time_source(
            Box::new(driver),
            Box::new(config.clone()),
            Box::new(self.clock()),
        );
        link.set_listener(Box::new(listener.clone()));
        link.init();

        SimNode {
            name: name.to_string(),
            link,
            listener,
            config,
        }
    }
}

// ----------------------------------------------------------------------------
// Settle Pump
// ----------------------------------------------------------------------------

/// Deliver events round-robin until no node has any left
///
/// Returns the total number of events handled. Scenarios call this after
/// every stimulus so each assertion sees a quiet network.
pub fn settle(nodes: &mut [&mut SimNode]) -> usize {
    let mut total = 0;
    loop {
        let mut progress = 0;
        for node in nodes.iter_mut() {
            progress += node.link.process_events();
        }
        if progress == 0 {
            return total;
        }
        total += progress;
    }
}

/// Tick every node's heartbeat once, then settle
pub fn tick(nodes: &mut [&mut SimNode]) -> usize {
    for node in nodes.iter_mut() {
        node.link.heartbeat();
    }
    settle(nodes)
}
