//! The interface for acquiring fresh connections.

use crate::connection::Connection;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O Error")]
    Io(#[from] std::io::Error),

    #[error("Connection source exhausted")]
    Exhausted,

    #[error(transparent)]
    Other(anyhow::Error),
}

/// Describes how the proxy obtains a live connection.
///
/// A source is shared across proxy instances and is only ever asked to
/// produce; it never takes a connection back. Returning a connection is the
/// connection's own business, via [Connection::close].
#[async_trait]
pub trait ConnectionSource: Send + Sync {
    type Connection: Connection;

    /// Produces a fresh live connection.
    ///
    /// May block on pool waits or backend handshakes. There is no retry on
    /// failure; the error surfaces to whoever triggered the acquisition.
    async fn acquire(&self) -> Result<Self::Connection, Error>;
}

pub type SharedSource<Conn> = Arc<dyn ConnectionSource<Connection = Conn>>;
