//! Implementation of [ConnectionSource] backed by an async closure.

use crate::connection::Connection;
use crate::source::{ConnectionSource, Error};

use async_trait::async_trait;
use std::future::Future;

/// Adapts an async closure into a [ConnectionSource].
///
/// Useful for bridging an existing pool without writing a dedicated
/// adapter type: the closure typically captures a pool handle and asks it
/// for a connection.
pub struct FnSource<F> {
    acquire: F,
}

impl<F> FnSource<F> {
    pub fn new(acquire: F) -> Self {
        Self { acquire }
    }
}

#[async_trait]
impl<Conn, F, Fut> ConnectionSource for FnSource<F>
where
    Conn: Connection,
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Conn, Error>> + Send,
{
    type Connection = Conn;

    async fn acquire(&self) -> Result<Self::Connection, Error> {
        (self.acquire)().await
    }
}
