//! HTTP CONNECT client
//!
//! Sends `CONNECT host:port HTTP/1.1` with optional Basic proxy
//! authorization and accepts only a `200` status line.

use base64::prelude::*;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// Upper bound on the proxy's response head
pub const MAX_RESPONSE_HEAD: usize = 8 * 1024;

/// Open a CONNECT tunnel to `host:port` over an established proxy stream
///
/// The response head is consumed byte by byte so nothing after the blank
/// line is swallowed.
pub async fn connect<S>(stream: &mut S, host: &str, port: u16, credentials: Option<(&str, &str)>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let authority = authority(host, port);
    let mut req = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n");
    if let Some((user, pass)) = credentials {
        let token = BASE64_STANDARD.encode(format!("{user}:{pass}"));
        req.push_str(&format!("Proxy-Authorization: Basic {token}\r\n"));
    }
    req.push_str("\r\n");
    stream.write_all(req.as_bytes()).await?;

    let head = read_head(stream).await?;
    let status_line = head.lines().next().unwrap_or_default();
    match status_line.split_whitespace().nth(1) {
        Some("200") => Ok(()),
        _ => Err(Error::HttpConnectRejected(status_line.to_string())),
    }
}

fn authority(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

async fn read_head<S: AsyncRead + Unpin>(stream: &mut S) -> Result<String> {
    let mut head = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_RESPONSE_HEAD {
            return Err(Error::HttpConnectRejected("response head too large".into()));
        }
        stream.read_exact(&mut byte).await?;
        head.push(byte[0]);
    }
    Ok(String::from_utf8_lossy(&head).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    async fn read_request(server: &mut tokio::io::DuplexStream) -> String {
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        while !buf.ends_with(b"\r\n\r\n") {
            server.read_exact(&mut byte).await.unwrap();
            buf.push(byte[0]);
        }
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn test_connect_ok_keeps_trailing_data() {
        let (mut client, mut server) = duplex(1024);
        let server = tokio::spawn(async move {
            let req = read_request(&mut server).await;
            server
                .write_all(b"HTTP/1.1 200 Connection Established\r\nVia: test\r\n\r\nhello")
                .await
                .unwrap();
            req
        });

        connect(&mut client, "example.com", 443, None).await.unwrap();

        let mut rest = [0u8; 5];
        client.read_exact(&mut rest).await.unwrap();
        assert_eq!(&rest, b"hello");

        let req = server.await.unwrap();
        assert!(req.starts_with("CONNECT example.com:443 HTTP/1.1\r\n"));
        assert!(req.contains("Host: example.com:443\r\n"));
        assert!(!req.contains("Proxy-Authorization"));
    }

    #[tokio::test]
    async fn test_connect_sends_basic_auth() {
        let (mut client, mut server) = duplex(1024);
        let server = tokio::spawn(async move {
            let req = read_request(&mut server).await;
            server.write_all(b"HTTP/1.0 200 OK\r\n\r\n").await.unwrap();
            req
        });

        connect(&mut client, "::1", 8443, Some(("user", "pass"))).await.unwrap();

        let req = server.await.unwrap();
        assert!(req.starts_with("CONNECT [::1]:8443 HTTP/1.1\r\n"));
        // base64("user:pass")
        assert!(req.contains("Proxy-Authorization: Basic dXNlcjpwYXNz\r\n"));
    }

    #[tokio::test]
    async fn test_connect_rejected() {
        let (mut client, mut server) = duplex(1024);
        tokio::spawn(async move {
            read_request(&mut server).await;
            server
                .write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n")
                .await
                .unwrap();
        });

        let err = connect(&mut client, "example.com", 443, None).await.unwrap_err();
        match err {
            Error::HttpConnectRejected(line) => assert!(line.contains("407")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_connect_closed_before_head() {
        let (mut client, mut server) = duplex(1024);
        tokio::spawn(async move {
            read_request(&mut server).await;
            server.write_all(b"HTTP/1.1 200").await.unwrap();
        });

        let err = connect(&mut client, "example.com", 443, None).await.unwrap_err();
        assert!(matches!(err, Error::UnexpectedEndOfStream));
    }
}
