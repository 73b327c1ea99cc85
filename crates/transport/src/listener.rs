//! Gateway TCP listener with a connection limit

use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::info;

#[derive(Error, Debug)]
pub enum ListenerError {
    #[error("Bind failed: {0}")]
    BindFailed(String),

    #[error("Accept failed: {0}")]
    AcceptFailed(String),
}

/// Listener configuration
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Bind address
    pub bind: SocketAddr,

    /// Maximum concurrent connections
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 9090)),
            max_connections: 10000,
        }
    }
}

/// An accepted connection; its slot is released when the permit drops
pub struct Accepted {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub permit: OwnedSemaphorePermit,
}

/// TCP listener that stops accepting while the connection limit is reached
pub struct GatewayListener {
    listener: TcpListener,
    slots: Arc<Semaphore>,
}

impl GatewayListener {
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let listener = TcpListener::bind(config.bind)
            .await
            .map_err(|e| ListenerError::BindFailed(e.to_string()))?;

        info!("Gateway listening on {}", config.bind);

        Ok(Self {
            listener,
            slots: Arc::new(Semaphore::new(config.max_connections.max(1))),
        })
    }

    /// Get the bound address
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Wait for a free slot, then accept the next connection
    pub async fn accept(&self) -> Result<Accepted, ListenerError> {
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| ListenerError::AcceptFailed(e.to_string()))?;

        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(|e| ListenerError::AcceptFailed(e.to_string()))?;

        Ok(Accepted {
            stream,
            peer,
            permit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_accept_releases_slot_on_drop() {
        let config = ListenerConfig {
            bind: "127.0.0.1:0".parse().unwrap(),
            max_connections: 1,
        };
        let listener = GatewayListener::bind(&config).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let _c1 = TcpStream::connect(addr).await.unwrap();
        let first = listener.accept().await.unwrap();
        assert_eq!(listener.slots.available_permits(), 0);

        drop(first);
        assert_eq!(listener.slots.available_permits(), 1);

        let _c2 = TcpStream::connect(addr).await.unwrap();
        assert!(listener.accept().await.is_ok());
    }
}
