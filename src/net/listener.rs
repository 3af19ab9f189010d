//! Client-facing TCP listener.
//!
//! The socket is bound with an explicit `listen(2)` backlog. A semaphore caps
//! connections served at once: a slot is taken before `accept`, so once the
//! cap is hit new clients wait in the kernel queue instead of being accepted
//! and starved.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::ListenerConfig;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("cannot listen on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),
}

/// Listening socket plus the connection cap.
pub struct Listener {
    socket: TcpListener,
    slots: Arc<Semaphore>,
}

impl Listener {
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let bind_err = |source: io::Error| ListenerError::Bind {
            address: config.bind_address.clone(),
            source,
        };

        let addr = config.socket_addr().map_err(bind_err)?;
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }
        .map_err(bind_err)?;
        socket.set_reuseaddr(true).map_err(bind_err)?;
        socket.bind(addr).map_err(bind_err)?;
        let socket = socket.listen(config.backlog).map_err(bind_err)?;

        tracing::info!(
            address = %socket.local_addr().map_err(bind_err)?,
            backlog = config.backlog,
            max_connections = config.max_connections,
            "Listening"
        );

        Ok(Self {
            socket,
            slots: Arc::new(Semaphore::new(config.max_connections)),
        })
    }

    /// Wait for a free slot, then for the next client.
    ///
    /// The returned permit must live as long as the connection is served.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|e| ListenerError::Accept(io::Error::other(e)))?;

        let (stream, peer) = self.socket.accept().await.map_err(ListenerError::Accept)?;
        tracing::debug!(
            peer = %peer,
            free_slots = self.slots.available_permits(),
            "Accepted"
        );

        Ok((stream, peer, ConnectionPermit(permit)))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn available_permits(&self) -> usize {
        self.slots.available_permits()
    }
}

/// One occupied connection slot, released on drop.
#[derive(Debug)]
pub struct ConnectionPermit(#[allow(dead_code)] OwnedSemaphorePermit);
