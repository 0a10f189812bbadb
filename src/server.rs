//! TCP Server
//!
//! Accepts connections until the shutdown future resolves, then stops
//! accepting and gives in-flight connections a grace period before aborting
//! them.

use crate::connection::{handle_connection, ConnectionStats};
use crate::service::BatchService;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Default time connections get to finish after shutdown is requested.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Serves batch requests on `listener` until `shutdown` completes.
pub async fn serve(
    listener: TcpListener,
    service: BatchService,
    stats: Arc<ConnectionStats>,
    shutdown: impl Future<Output = ()>,
    grace: Duration,
) {
    let mut connections = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    connections.spawn(handle_connection(
                        stream,
                        addr,
                        service.clone(),
                        Arc::clone(&stats),
                    ));
                }
                Err(e) => error!("Failed to accept connection: {}", e),
            },
            // Reap finished connection tasks
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = &mut shutdown => break,
        }
    }

    drop(listener);

    let open = connections.len();
    if open == 0 {
        return;
    }

    info!(connections = open, grace_ms = grace.as_millis() as u64, "Waiting for connections to finish");

    let drained = tokio::time::timeout(grace, async {
        while connections.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        warn!(connections = connections.len(), "Grace period elapsed, aborting connections");
        connections.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::KvClient;
    use crate::registry::StorageRegistry;
    use crate::storage::MemoryDriver;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_shutdown_aborts_idle_connections_after_grace() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut registry = StorageRegistry::new();
        registry.register("memory", Arc::new(MemoryDriver::new()));
        let service = BatchService::new(Arc::new(registry));
        let stats = Arc::new(ConnectionStats::new());

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(serve(
            listener,
            service,
            Arc::clone(&stats),
            async {
                let _ = stop_rx.await;
            },
            Duration::from_millis(100),
        ));

        let mut client = KvClient::connect(addr.to_string()).await.unwrap();
        client.set("memory", vec![crate::item::Item::new("a", "aa")]).await.unwrap();

        stop_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), server)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(stats.connections_accepted.load(std::sync::atomic::Ordering::Relaxed), 1);
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }
}
