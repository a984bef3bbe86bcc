//! Binds the listening socket, enforces the concurrency bound via a
//! semaphore, and dispatches each accepted connection to its own task.

use crate::cache::ProxyCache;
use crate::handler;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Backlog and concurrent-handler bound.
pub const MAX_CLIENTS: usize = 10;

/// Runs the accept loop until `SIGINT`/`SIGTERM`, then waits for every
/// in-flight handler to release its permit before returning.
pub async fn run(listener: TcpListener, cache: ProxyCache) -> std::io::Result<()> {
    let permits = Arc::new(Semaphore::new(MAX_CLIENTS));

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
                break;
            }
            _ = sigint.recv() => {
                info!("received SIGINT, shutting down");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        debug!("accepted connection from {addr}");
                        // Acquired here, in the loop body, not inside the
                        // spawned task: this blocks the accept loop itself
                        // on the concurrency bound, so an 11th connection
                        // isn't even accepted until a slot frees, rather
                        // than being accepted and then queuing on the
                        // permit from inside its own unbounded task.
                        let permit = permits.clone().acquire_owned().await.expect("semaphore never closed");
                        let cache = cache.clone();
                        tokio::spawn(async move {
                            // Permit is released (dropped) when this task
                            // returns, covering every exit path of the
                            // handler.
                            let _permit = permit;
                            handler::handle_connection(stream, cache).await;
                        });
                    }
                    Err(e) => {
                        warn!("failed to accept connection: {e}");
                    }
                }
            }
        }
    }

    info!("waiting for in-flight connections to drain");
    // Acquiring every permit succeeds only once all outstanding handlers
    // have released theirs.
    let _ = permits.acquire_many(MAX_CLIENTS as u32).await;
    info!("all connections closed, shutting down");
    Ok(())
}
