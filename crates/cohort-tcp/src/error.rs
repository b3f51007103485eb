//! Error types for the TCP driver

use thiserror::Error;

/// Errors specific to the tokio TCP driver
#[derive(Debug, Error)]
pub enum TcpDriverError {
    #[error("no tokio runtime available; create the driver inside one")]
    NoRuntime,

    #[error("failed to bind {addr}:{port}: {source}")]
    Bind {
        addr: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },
}

impl From<TcpDriverError> for cohort_core::DriverError {
    fn from(err: TcpDriverError) -> Self {
        match err {
            TcpDriverError::Bind { port, source, .. } => cohort_core::DriverError::Bind {
                port,
                reason: source.to_string(),
            },
            TcpDriverError::NoRuntime => cohort_core::DriverError::Shutdown,
        }
    }
}
