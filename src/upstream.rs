//! Establishes the outbound connection to the origin, replays the client's
//! request, and streams the response back to the client while capturing it
//! for the cache.

use crate::parser::ParsedRequest;
use bytes::{Bytes, BytesMut};
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Chunk size for reads from the upstream socket.
const BUF_BYTES: usize = 4 * 1024;
/// Applied to both the upstream connect/read and the client write.
const IO_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub enum UpstreamError {
    ResolutionFailed,
    ConnectFailed,
    UpstreamReadError,
    ClientWriteError,
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamError::ResolutionFailed => write!(f, "failed to resolve upstream host"),
            UpstreamError::ConnectFailed => write!(f, "failed to connect to upstream"),
            UpstreamError::UpstreamReadError => write!(f, "error reading from upstream"),
            UpstreamError::ClientWriteError => write!(f, "error writing to client"),
        }
    }
}

impl std::error::Error for UpstreamError {}

/// Reconstructs the outbound request line and headers: `Connection: close`
/// is forced unconditionally and `Host` is injected if absent. This is a
/// real case, not a hypothetical one: a request whose target is
/// absolute-form (`GET http://host/path HTTP/1.1`) carries its host in the
/// request line and may omit the `Host` header entirely.
fn build_outbound_request(parsed: &ParsedRequest, host: &str) -> Vec<u8> {
    let mut req = parsed.clone();
    req.header_set("Connection", "close");
    if req.header_get("Host").is_none() {
        req.header_set("Host", host);
    }

    let mut out = format!("{} {} {}\r\n", req.method, req.path, req.version).into_bytes();
    out.extend_from_slice(req.unparse_headers().as_bytes());
    out.extend_from_slice(b"\r\n");
    out
}

/// Connects to `host:port`, sends the reconstructed request, and streams
/// the response to `client` while accumulating it into the returned buffer.
///
/// On `ClientWriteError` the fetch is aborted and the partial capture is
/// discarded (the caller must not attempt to cache it).
pub async fn fetch<W>(
    parsed: &ParsedRequest,
    host: &str,
    port: u16,
    client: &mut W,
) -> Result<Bytes, UpstreamError>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut upstream = timeout(IO_TIMEOUT, TcpStream::connect((host, port)))
        .await
        .map_err(|_| UpstreamError::ConnectFailed)?
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound || e.to_string().contains("resolve") {
                UpstreamError::ResolutionFailed
            } else {
                UpstreamError::ConnectFailed
            }
        })?;

    let request = build_outbound_request(parsed, host);
    upstream
        .write_all(&request)
        .await
        .map_err(|_| UpstreamError::ConnectFailed)?;

    let mut capture = BytesMut::new();
    let mut chunk = [0u8; BUF_BYTES];

    loop {
        let n = match timeout(IO_TIMEOUT, upstream.read(&mut chunk)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => n,
            Ok(Err(_)) | Err(_) => return Err(UpstreamError::UpstreamReadError),
        };

        client
            .write_all(&chunk[..n])
            .await
            .map_err(|_| UpstreamError::ClientWriteError)?;
        capture.extend_from_slice(&chunk[..n]);
    }

    Ok(capture.freeze())
}
