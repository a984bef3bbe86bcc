use fetchcache::acceptor;
use fetchcache::cache::{self, ProxyCache};
use fetchcache::cli::{self, StartupError};
use std::net::SocketAddr;
use std::process::ExitCode;
use tokio::net::TcpSocket;
use tracing::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let port = match cli::parse_port(&args) {
        Ok(port) => port,
        Err(StartupError::WrongArgumentCount) => {
            println!("{}", StartupError::WrongArgumentCount);
            return ExitCode::FAILURE;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("fetchcache=info")),
        )
        .init();

    info!("starting proxy on port {port}");
    info!("concurrency limit: {} workers", acceptor::MAX_CLIENTS);
    info!(
        "cache bounds: {} KiB/entry, {} MiB total",
        cache::MAX_ENTRY_BYTES / 1024,
        cache::MAX_TOTAL_BYTES / (1024 * 1024)
    );

    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let listener = match bind_with_reuseaddr(addr) {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to bind port {port}: {e}");
            return ExitCode::FAILURE;
        }
    };

    let cache = ProxyCache::new();
    match acceptor::run(listener, cache).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("acceptor loop failed: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Binds and listens with `SO_REUSEADDR` set, as the source does on its raw
/// socket before `bind()`.
fn bind_with_reuseaddr(addr: SocketAddr) -> std::io::Result<tokio::net::TcpListener> {
    let socket = TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(fetchcache::acceptor::MAX_CLIENTS as u32)
}
