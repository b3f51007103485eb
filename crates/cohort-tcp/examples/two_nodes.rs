//! Two in-process nodes handshake over loopback and hand the active role
//! over.
//!
//! Run with: `cargo run --example two_nodes -p cohort-tcp`

use cohort_core::config::{full_key, CFG_KEY_PORT};
use cohort_core::testing::MemoryConfig;
use cohort_core::{LinkListener, SocketLink};
use cohort_tcp::{TcpDriver, TcpDriverConfig};
use std::time::Duration;
use tracing::info;

/// Listener that narrates what each node observes
struct Announcer(&'static str);

impl LinkListener for Announcer {
    fn active_changed(&mut self, self_active: bool) {
        info!("[{}] active role: self_active={self_active}", self.0);
    }

    fn state_transfer_complete(&mut self) {
        info!("[{}] state transfer complete", self.0);
    }
}

fn node(name: &'static str) -> Result<(SocketLink, TcpDriver), Box<dyn std::error::Error>> {
    let driver = TcpDriver::new(TcpDriverConfig::with_canonical_name(name))?;
    let config = MemoryConfig::new();
    config.set_int(full_key(CFG_KEY_PORT), 0);

    let mut link = SocketLink::new(Box::new(driver.clone()), Box::new(config));
    link.set_listener(Box::new(Announcer(name)));
    link.init();
    Ok((link, driver))
}

async fn pump(nodes: &mut [&mut SocketLink], mut done: impl FnMut(&[&mut SocketLink]) -> bool) {
    for _ in 0..100 {
        for link in nodes.iter_mut() {
            link.process_events();
        }
        if done(nodes) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let (mut alpha, driver_alpha) = node("alpha.local")?;
    let (mut beta, _driver_beta) = node("beta.local")?;

    alpha.set_enabled(true);
    let port = driver_alpha.local_port().ok_or("listener did not bind")?;
    info!("[alpha.local] listening on 127.0.0.1:{port}");

    beta.join(&format!("tcp://127.0.0.1:{port}/"))?;
    pump(&mut [&mut alpha, &mut beta], |nodes| {
        nodes.iter().all(|n| n.number_of_peers() == 1)
    })
    .await;
    info!("handshake done; active = {:?}", beta.get_active());

    // The joining node takes over.
    beta.claim();
    pump(&mut [&mut alpha, &mut beta], |nodes| {
        nodes[1].is_self_active()
    })
    .await;
    info!(
        "after claim: alpha sees {:?}, beta sees {:?}",
        alpha.get_active(),
        beta.get_active()
    );

    Ok(())
}
