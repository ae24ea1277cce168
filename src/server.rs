//! TCP Server
//!
//! Accepts clients and hands each one to [`RespHandler`] on its own task.
//! The accept loop ends on a listener error or when the shutdown future
//! completes; either way the handler is closed (every connection drained,
//! then the database) before returning.

use crate::connection::{RespHandler, CLOSE_TIMEOUT};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Serves clients from `listener` until `shutdown` resolves.
///
/// # Example
///
/// ```ignore
/// let listener = TcpListener::bind("127.0.0.1:6379").await?;
/// let handler = Arc::new(RespHandler::new(database));
/// listen_and_serve(listener, handler, shutdown_signal()).await;
/// ```
pub async fn listen_and_serve<F>(listener: TcpListener, handler: Arc<RespHandler>, shutdown: F)
where
    F: Future<Output = ()>,
{
    let mut tasks = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping server...");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(client = %addr, error = %e, "Failed to set TCP_NODELAY");
                    }
                    let handler = Arc::clone(&handler);
                    tasks.spawn(async move { handler.handle(stream, Some(addr)).await });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    break;
                }
            },
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        error!("Connection task panicked");
                    }
                }
            }
        }
    }

    drop(listener);
    handler.close().await;

    let drained = tokio::time::timeout(CLOSE_TIMEOUT, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(remaining = tasks.len(), "Aborting connection tasks");
        tasks.abort_all();
    }

    info!("Server shutdown complete");
}

/// Resolves on SIGHUP, SIGQUIT, SIGTERM or SIGINT (Ctrl+C elsewhere).
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let kinds = [
            SignalKind::hangup(),
            SignalKind::quit(),
            SignalKind::terminate(),
            SignalKind::interrupt(),
        ];
        let mut streams = Vec::with_capacity(kinds.len());
        for kind in kinds {
            match signal(kind) {
                Ok(stream) => streams.push(stream),
                Err(e) => warn!(error = %e, "Failed to install signal handler"),
            }
        }

        if !streams.is_empty() {
            let waits = streams.iter_mut().map(|s| Box::pin(s.recv()));
            futures::future::select_all(waits).await;
            return;
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::StandaloneDatabase;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    async fn start() -> (String, Arc<RespHandler>, oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handler = Arc::new(RespHandler::new(Arc::new(StandaloneDatabase::new(16))));
        let (tx, rx) = oneshot::channel::<()>();
        let server = tokio::spawn(listen_and_serve(listener, Arc::clone(&handler), async move {
            let _ = rx.await;
        }));
        (addr, handler, tx, server)
    }

    #[tokio::test]
    async fn test_serves_clients() {
        let (addr, _handler, _tx, _server) = start().await;

        let mut a = TcpStream::connect(&addr).await.unwrap();
        let mut b = TcpStream::connect(&addr).await.unwrap();

        a.write_all(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n").await.unwrap();
        let mut buf = [0u8; 5];
        a.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"+OK\r\n");

        b.write_all(b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n").await.unwrap();
        let mut buf = [0u8; 7];
        b.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"$1\r\nv\r\n");
    }

    #[tokio::test]
    async fn test_shutdown_closes_clients() {
        let (addr, handler, tx, server) = start().await;

        let mut client = TcpStream::connect(&addr).await.unwrap();
        client.write_all(b"PING\r\n").await.unwrap();
        let mut buf = [0u8; 7];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"+PONG\r\n");

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();

        assert!(handler.is_closing());
        assert_eq!(handler.active_count(), 0);
        let mut rest = Vec::new();
        assert_eq!(client.read_to_end(&mut rest).await.unwrap(), 0);
        assert!(TcpStream::connect(&addr).await.is_err());
    }
}
