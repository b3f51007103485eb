//! Loopback tests over real sockets
//!
//! Ports are never hardcoded: the listener binds port 0 and the tests read
//! the actual port back from the driver.

use cohort_core::config::{full_key, CFG_KEY_PORT};
use cohort_core::testing::MemoryConfig;
use cohort_core::{ClientId, DriverEvent, SocketDriver, SocketLink};
use cohort_tcp::{TcpDriver, TcpDriverConfig};
use std::time::Duration;

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met within the deadline");
}

fn wired_link(name: &str) -> (SocketLink, TcpDriver) {
    let driver = TcpDriver::new(TcpDriverConfig::with_canonical_name(name))
        .expect("inside a runtime");
    let config = MemoryConfig::new();
    // Bind an ephemeral port; identities use the configured port value.
    config.set_int(full_key(CFG_KEY_PORT), 0);

    let mut link = SocketLink::new(Box::new(driver.clone()), Box::new(config));
    link.init();
    (link, driver)
}

// ----------------------------------------------------------------------------
// Driver Level
// ----------------------------------------------------------------------------

#[tokio::test]
async fn bytes_cross_a_loopback_connection() {
    let mut a = TcpDriver::new(TcpDriverConfig::default()).expect("inside a runtime");
    let mut b = TcpDriver::new(TcpDriverConfig::default()).expect("inside a runtime");

    a.listen(0).expect("ephemeral bind");
    let port = a.local_port().expect("listener is up");

    b.connect("127.0.0.1", port, ClientId::new(1));

    let mut conn_b = None;
    let mut conn_a = None;
    {
        let (a, b) = (&mut a, &mut b);
        wait_until(|| {
            while let Some(ev) = b.poll_event() {
                if let DriverEvent::Connected { conn, .. } = ev {
                    conn_b = Some(conn);
                }
            }
            while let Some(ev) = a.poll_event() {
                if let DriverEvent::Accepted { conn } = ev {
                    conn_a = Some(conn);
                }
            }
            conn_a.is_some() && conn_b.is_some()
        })
        .await;
    }
    let (conn_a, conn_b) = (conn_a.expect("accepted"), conn_b.expect("connected"));

    assert!(b.write(conn_b, &[1, 2, 3, 4]));

    let mut buf = [0u8; 16];
    let mut got = Vec::new();
    {
        let a = &mut a;
        let got = &mut got;
        wait_until(|| {
            while let Some(ev) = a.poll_event() {
                if let DriverEvent::IoReady { conn, .. } = ev {
                    if let Ok(n) = a.read(conn, &mut buf) {
                        got.extend_from_slice(&buf[..n]);
                    }
                }
            }
            got.len() >= 4
        })
        .await;
    }
    assert_eq!(got, vec![1, 2, 3, 4]);

    // Closing one side surfaces as Closed on the other.
    b.close(conn_b);
    let a = &mut a;
    wait_until(|| {
        matches!(a.poll_event(), Some(DriverEvent::Closed { conn, .. }) if conn == conn_a)
    })
    .await;

    a.shutdown();
    b.shutdown();
}

#[tokio::test]
async fn refused_connect_reports_failure() {
    let mut driver = TcpDriver::new(TcpDriverConfig::default()).expect("inside a runtime");

    // Nothing listens on the discard port of loopback.
    driver.connect("127.0.0.1", 1, ClientId::new(9));

    let d = &mut driver;
    wait_until(|| {
        matches!(
            d.poll_event(),
            Some(DriverEvent::ConnectFailed { tag }) if tag == ClientId::new(9)
        )
    })
    .await;
}

// ----------------------------------------------------------------------------
// Link Level
// ----------------------------------------------------------------------------

#[tokio::test]
async fn two_links_handshake_and_elect_over_loopback() {
    let (mut a, driver_a) = wired_link("a.local");
    let (mut b, _driver_b) = wired_link("b.local");

    a.set_enabled(true);
    let port = driver_a.local_port().expect("listener is up");

    b.join(&format!("tcp://127.0.0.1:{port}/")).unwrap();

    // The joining side learns who is active from the handshake gossip.
    {
        let (a, b) = (&mut a, &mut b);
        wait_until(|| {
            a.process_events();
            b.process_events();
            b.get_active() == Some(("a.local".into(), 0))
        })
        .await;
    }
    assert_eq!(a.number_of_peers(), 1);
    assert_eq!(b.number_of_peers(), 1);

    // Election crosses real sockets too.
    assert!(!b.claim());
    {
        let (a, b) = (&mut a, &mut b);
        wait_until(|| {
            a.process_events();
            b.process_events();
            b.is_self_active()
        })
        .await;
    }
    assert_eq!(a.get_active(), Some(("b.local".into(), 0)));
}
