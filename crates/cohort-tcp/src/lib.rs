//! Cohort TCP
//!
//! Tokio-backed implementation of the cohort socket driver contract.
//! Box a [`TcpDriver`] clone into a `SocketLink`, keep another clone for
//! the event loop, and pump:
//!
//! ```rust,no_run
//! use cohort_core::SocketLink;
//! use cohort_core::testing::MemoryConfig;
//! use cohort_tcp::{TcpDriver, TcpDriverConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let driver = TcpDriver::new(TcpDriverConfig::with_canonical_name("alpha.lan"))?;
//! let mut link = SocketLink::new(Box::new(driver.clone()), Box::new(MemoryConfig::new()));
//! link.init();
//! link.set_enabled(true);
//!
//! let mut heartbeat = tokio::time::interval(std::time::Duration::from_secs(1));
//! loop {
//!     tokio::select! {
//!         _ = driver.event_ready() => { link.process_events(); }
//!         _ = heartbeat.tick() => { link.heartbeat(); }
//!     }
//! }
//! # }
//! ```

pub mod config;
pub mod driver;
pub mod error;

pub use config::TcpDriverConfig;
pub use driver::TcpDriver;
pub use error::TcpDriverError;
