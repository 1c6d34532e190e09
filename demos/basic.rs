//! A basic demonstration of auto-close and transparent reopen.
//!
//! Run with `cargo run --example basic` and watch the lifecycle events.

use lapse::connection::Connection;
use lapse::policy::Policy;
use lapse::proxy::Proxy;
use lapse::sources::mem::MemorySource;

use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let source = Arc::new(MemorySource::new());
    let proxy = Proxy::new(
        "demo",
        source,
        Policy {
            idle_timeout: Duration::from_millis(200),
            ..Default::default()
        },
    )
    .await
    .expect("Failed to create proxy");

    proxy
        .create_statement()
        .await
        .expect("Failed to create statement");

    // Sit idle past the timeout; the proxy closes the wrapped connection
    // behind our back.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(proxy.is_closed());

    // The next statement request acquires a replacement transparently.
    proxy
        .create_statement()
        .await
        .expect("Failed to create statement");

    println!("{:?}", proxy.stats());
}
