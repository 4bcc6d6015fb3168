//! HTTP listener binding.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::ops::RangeInclusive;

use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Errors that can occur while binding the listener.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// The configured port could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// No port in the scan range was free.
    #[error("no free port between {start} and {end}")]
    NoFreePort { start: u16, end: u16 },
}

/// Bind on `port` if given, otherwise on the first free port in `range`.
pub async fn bind_listener(
    bind: IpAddr,
    port: Option<u16>,
    range: RangeInclusive<u16>,
) -> Result<TcpListener, NetworkError> {
    if let Some(port) = port {
        let addr = SocketAddr::new(bind, port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| NetworkError::Bind { addr, source })?;
        info!(%addr, "Bound configured port");
        return Ok(listener);
    }

    let (start, end) = (*range.start(), *range.end());
    for candidate in range {
        let addr = SocketAddr::new(bind, candidate);
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                info!(%addr, "Bound first free port");
                return Ok(listener);
            }
            Err(e) => debug!(%addr, error = %e, "Port unavailable"),
        }
    }

    Err(NetworkError::NoFreePort { start, end })
}
