//! Proxy dialer (§4.7): turns a [`Proxy`](crate::proxy::Proxy) descriptor
//! into a context-aware `TcpStream` factory.

use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::proxy::{Proxy, ProxyProtocol};

/// A known Telegram DC address used for the startup reachability probe.
pub const PROBE_ADDR: &str = "149.154.167.50:443";
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum DialError {
    #[error("dial timed out")]
    Timeout,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("socks5 error: {0}")]
    Socks5(String),
    #[error("http proxy returned non-success status: {0}")]
    HttpConnectRejected(String),
}

/// Dials a destination through a proxy (or directly, with no proxy).
///
/// `deadline` mirrors "all dialers honor caller-supplied deadlines": if
/// `Some`, the dial is bounded by it; the caller may additionally apply a
/// read/write deadline to the returned stream.
pub async fn dial(
    proxy: Option<&Proxy>,
    target_host: &str,
    target_port: u16,
    deadline: Option<Duration>,
) -> Result<TcpStream, DialError> {
    let fut = dial_inner(proxy, target_host, target_port);
    match deadline {
        Some(d) => timeout(d, fut).await.map_err(|_| DialError::Timeout)?,
        None => fut.await,
    }
}

async fn dial_inner(
    proxy: Option<&Proxy>,
    target_host: &str,
    target_port: u16,
) -> Result<TcpStream, DialError> {
    match proxy {
        None => Ok(TcpStream::connect((target_host, target_port)).await?),
        Some(proxy) => match proxy.protocol {
            ProxyProtocol::Socks5 => dial_socks5(proxy, target_host, target_port).await,
            ProxyProtocol::Http | ProxyProtocol::Https => {
                dial_http_connect(proxy, target_host, target_port).await
            }
        },
    }
}

async fn dial_socks5(
    proxy: &Proxy,
    target_host: &str,
    target_port: u16,
) -> Result<TcpStream, DialError> {
    use tokio_socks::tcp::Socks5Stream;

    let proxy_addr = (proxy.host.as_str(), proxy.port);
    let stream = match (&proxy.username, &proxy.password) {
        (Some(user), Some(pass)) => {
            Socks5Stream::connect_with_password(
                proxy_addr,
                (target_host, target_port),
                user,
                pass,
            )
            .await
        }
        _ => Socks5Stream::connect(proxy_addr, (target_host, target_port)).await,
    }
    .map_err(|e| DialError::Socks5(e.to_string()))?;

    Ok(stream.into_inner())
}

/// Opens a TCP connection to the proxy and issues `CONNECT host:port HTTP/1.1`.
async fn dial_http_connect(
    proxy: &Proxy,
    target_host: &str,
    target_port: u16,
) -> Result<TcpStream, DialError> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};

    let mut stream = TcpStream::connect((proxy.host.as_str(), proxy.port)).await?;

    let mut request = format!(
        "CONNECT {target_host}:{target_port} HTTP/1.1\r\nHost: {target_host}:{target_port}\r\n"
    );
    if let (Some(user), Some(pass)) = (&proxy.username, &proxy.password) {
        use base64::Engine;
        let credentials = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"));
        request.push_str(&format!("Proxy-Authorization: Basic {credentials}\r\n"));
    }
    request.push_str("\r\n");

    stream.write_all(request.as_bytes()).await?;

    // Read just the status line; a CONNECT response has no body before the
    // tunnel is established, only a header block terminated by CRLFCRLF.
    let mut reader = BufReader::new(&mut stream);
    let mut status_line = String::new();
    read_line(&mut reader, &mut status_line).await?;

    let ok = status_line.contains("200 Connection established") || status_line.contains("200 OK");
    if !ok {
        return Err(DialError::HttpConnectRejected(status_line.trim().to_string()));
    }

    // Drain the remaining header lines up to the blank line.
    loop {
        let mut line = String::new();
        let n = read_line(&mut reader, &mut line).await?;
        if n == 0 || line == "\r\n" || line == "\n" {
            break;
        }
    }

    drop(reader);
    Ok(stream)
}

async fn read_line<R: tokio::io::AsyncBufRead + Unpin>(
    reader: &mut R,
    out: &mut String,
) -> Result<usize, std::io::Error> {
    use tokio::io::AsyncBufReadExt;
    reader.read_line(out).await
}

/// Startup reachability probe: non-fatal, warning-only on failure.
pub async fn probe_reachability(proxy: Option<&Proxy>) {
    let (host, port) = {
        let mut parts = PROBE_ADDR.split(':');
        let host = parts.next().unwrap_or_default();
        let port: u16 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(443);
        (host.to_string(), port)
    };

    match dial(proxy, &host, port, Some(PROBE_TIMEOUT)).await {
        Ok(_) => tracing::info!(target = PROBE_ADDR, "proxy reachability probe succeeded"),
        Err(err) => {
            tracing::warn!(target = PROBE_ADDR, %err, "proxy reachability probe failed (non-fatal)")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn direct_dial_without_proxy_connects_to_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let stream = dial(None, "127.0.0.1", addr.port(), Some(Duration::from_secs(2))).await;
        assert!(stream.is_ok());
    }

    #[tokio::test]
    async fn dial_times_out_against_unroutable_address() {
        // TEST-NET-1 (RFC 5737), guaranteed non-routable for this test's purposes.
        let result = dial(None, "192.0.2.1", 81, Some(Duration::from_millis(50))).await;
        assert!(matches!(result, Err(DialError::Timeout) | Err(DialError::Io(_))));
    }
}
