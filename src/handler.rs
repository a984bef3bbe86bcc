//! Per-connection request handler: reads a request, serves it from cache or
//! forwards it upstream, and always closes the connection on the way out.
//! The state machine is expressed here as a sequence of early returns rather
//! than an explicit state enum, since every state is visited at most once
//! per connection and Rust's `?`/early-return idiom already encodes "close
//! on any terminal state".

use crate::cache::{AddOutcome, ProxyCache};
use crate::error_response::{self, StatusCode};
use crate::parser::{self, ParsedRequest};
use crate::upstream::{self, UpstreamError};
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Fixed read buffer: a request that doesn't present `\r\n\r\n` within this
/// many bytes is treated as malformed.
const READ_BUF_BYTES: usize = 4 * 1024;

/// Drives one client connection end to end. Never panics on client- or
/// upstream-triggered conditions; all such outcomes are logged and the
/// connection is closed.
pub async fn handle_connection(mut client: TcpStream, cache: ProxyCache) {
    let raw_request = match read_request(&mut client).await {
        Some(buf) => buf,
        None => return,
    };

    let parsed = match parser::parse(&raw_request) {
        Ok(p) => p,
        Err(e) => {
            debug!("parse failed, closing without response: {e}");
            return;
        }
    };

    if parsed.method != "GET" {
        debug!("unsupported method {:?}, closing without response", parsed.method);
        return;
    }

    let host = match parsed.host() {
        Some(h) => h.to_string(),
        None => {
            debug!("request missing Host header, responding 500");
            send_error(&mut client, StatusCode::InternalServerError).await;
            return;
        }
    };

    if !parsed.is_version_supported() {
        debug!("unsupported HTTP version {:?}, responding 500", parsed.version);
        send_error(&mut client, StatusCode::InternalServerError).await;
        return;
    }

    let fingerprint = Bytes::from(raw_request);
    let port = parsed.host_port().unwrap_or(80);

    if let Some(cached) = cache.find(&fingerprint).await {
        debug!("cache hit for {host}{}", parsed.path);
        let _ = client.write_all(&cached.body).await;
        return;
    }

    debug!("cache miss for {host}{}", parsed.path);
    match upstream::fetch(&parsed, &host, port, &mut client).await {
        Ok(captured) => match cache.add(fingerprint, captured).await {
            AddOutcome::Inserted => debug!("cached response for {host}{}", parsed.path),
            AddOutcome::Rejected(reason) => {
                debug!("response for {host}{} not cached: {reason:?}", parsed.path)
            }
        },
        Err(UpstreamError::ClientWriteError) => {
            debug!("client disappeared mid-fetch for {host}{}, discarding capture", parsed.path);
        }
        Err(e) => {
            warn!("upstream fetch failed for {host}{}: {e}", parsed.path);
            send_error(&mut client, StatusCode::InternalServerError).await;
        }
    }
}

/// Reads from `client` until `\r\n\r\n` is seen or the fixed buffer fills.
/// Returns `None` on EOF-with-no-terminator, read error, or overflow — all
/// of which close the connection without a response. The returned buffer is
/// truncated right after the first header terminator: any bytes arriving in
/// the same read past that point (a pipelined next request, stray trailing
/// bytes) are not part of this request and must not leak into the parse
/// input or the cache fingerprint, which is defined as the raw bytes up to
/// and including the terminator.
async fn read_request(client: &mut TcpStream) -> Option<Vec<u8>> {
    let mut buffer = BytesMut::with_capacity(READ_BUF_BYTES);

    loop {
        if buffer.len() >= READ_BUF_BYTES {
            debug!("request exceeded {READ_BUF_BYTES} bytes without a header terminator");
            return None;
        }

        match client.read_buf(&mut buffer).await {
            Ok(0) => {
                debug!("client disconnected before sending a complete request");
                return None;
            }
            Ok(_) => {
                if let Some(terminator_end) = header_terminator_end(&buffer) {
                    buffer.truncate(terminator_end);
                    return Some(buffer.to_vec());
                }
            }
            Err(e) => {
                debug!("read error from client: {e}");
                return None;
            }
        }
    }
}

/// Returns the index just past the first `\r\n\r\n` in `buffer`, if any.
fn header_terminator_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|start| start + 4)
}

async fn send_error(client: &mut TcpStream, status: StatusCode) {
    let response = error_response::render(status);
    let _ = client.write_all(&response).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let (server, (client, _)) = tokio::join!(connect, async { listener.accept().await.unwrap() });
        (server.unwrap(), client)
    }

    #[tokio::test]
    async fn bad_version_yields_500() {
        let (mut client, server) = loopback_pair().await;
        let cache = ProxyCache::new();

        let server_task = tokio::spawn(handle_connection(server, cache));
        client
            .write_all(b"GET / HTTP/2.0\r\nHost: a\r\n\r\n")
            .await
            .unwrap();
        client.shutdown().await.unwrap();

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        server_task.await.unwrap();

        let text = String::from_utf8(response).unwrap();
        assert!(text.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
    }

    #[tokio::test]
    async fn non_get_method_gets_no_response() {
        let (mut client, server) = loopback_pair().await;
        let cache = ProxyCache::new();

        let server_task = tokio::spawn(handle_connection(server, cache.clone()));
        client
            .write_all(b"POST /x HTTP/1.1\r\nHost: a\r\n\r\n")
            .await
            .unwrap();
        client.shutdown().await.unwrap();

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        server_task.await.unwrap();

        assert!(response.is_empty());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn malformed_request_gets_no_response() {
        let (mut client, server) = loopback_pair().await;
        let cache = ProxyCache::new();

        let server_task = tokio::spawn(handle_connection(server, cache));
        client.write_all(b"\r\n\r\n").await.unwrap();
        client.shutdown().await.unwrap();

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        server_task.await.unwrap();

        assert!(response.is_empty());
    }

    #[tokio::test]
    async fn cold_then_warm_get_replays_identical_bytes() {
        let upstream_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let upstream_addr = upstream_listener.local_addr().unwrap();

        let upstream_task = tokio::spawn(async move {
            let (mut sock, _) = upstream_listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = sock.read(&mut buf).await.unwrap();
            sock.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello")
                .await
                .unwrap();
        });

        let cache = ProxyCache::new();
        let request = format!(
            "GET /foo HTTP/1.1\r\nHost: {}:{}\r\n\r\n",
            upstream_addr.ip(),
            upstream_addr.port()
        );

        // Cold request: goes to upstream.
        let (mut client1, server1) = loopback_pair().await;
        let server_task = tokio::spawn(handle_connection(server1, cache.clone()));
        client1.write_all(request.as_bytes()).await.unwrap();
        client1.shutdown().await.unwrap();
        let mut first_response = Vec::new();
        client1.read_to_end(&mut first_response).await.unwrap();
        server_task.await.unwrap();
        upstream_task.await.unwrap();

        assert_eq!(
            &first_response[..],
            b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello"
        );
        assert_eq!(cache.len().await, 1);

        // Warm request: served from cache, no upstream connection.
        let (mut client2, server2) = loopback_pair().await;
        let server_task2 = tokio::spawn(handle_connection(server2, cache.clone()));
        client2.write_all(request.as_bytes()).await.unwrap();
        client2.shutdown().await.unwrap();
        let mut second_response = Vec::new();
        client2.read_to_end(&mut second_response).await.unwrap();
        server_task2.await.unwrap();

        assert_eq!(first_response, second_response);
    }

    #[tokio::test]
    async fn trailing_bytes_past_the_terminator_are_not_folded_into_the_fingerprint() {
        let upstream_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let upstream_addr = upstream_listener.local_addr().unwrap();

        let upstream_task = tokio::spawn(async move {
            let (mut sock, _) = upstream_listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = sock.read(&mut buf).await.unwrap();
            sock.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
                .await
                .unwrap();
        });

        let cache = ProxyCache::new();
        let first_request = format!(
            "GET /foo HTTP/1.1\r\nHost: {}:{}\r\n\r\n",
            upstream_addr.ip(),
            upstream_addr.port()
        );
        // Both requests land in the same write, so they are likely to be
        // seen in a single `read_buf` call on the server side.
        let pipelined = format!("{first_request}GET /bar HTTP/1.1\r\nHost: trailing\r\n\r\n");

        let (mut client, server) = loopback_pair().await;
        let server_task = tokio::spawn(handle_connection(server, cache.clone()));
        client.write_all(pipelined.as_bytes()).await.unwrap();
        client.shutdown().await.unwrap();
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        server_task.await.unwrap();
        upstream_task.await.unwrap();

        assert_eq!(&response[..], b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok");
        // The cache key must be exactly the first request's bytes, not the
        // whole buffer including the trailing second request.
        assert!(cache.find(&Bytes::from(first_request)).await.is_some());
    }
}
