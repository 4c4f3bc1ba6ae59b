//! Loopback tests for tunnel setup through mock upstream proxies
//!
//! Each mock speaks just enough of its protocol to accept one client and then
//! echoes whatever arrives, so a successful tunnel is observable end to end.

use std::net::SocketAddr;
use std::time::Duration;

use hop_rules::{ProxyKind, UpstreamProxy};
use hop_socks::{connect_via, probe, Error, TargetAddr, UdpSession};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};

async fn echo(mut stream: TcpStream) {
    let mut buf = [0u8; 1024];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => {
                if stream.write_all(&buf[..n]).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// SOCKS5 server: no-auth, answers CONNECT with `rep`, echoes on success
async fn start_socks5_mock(rep: u8) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        let mut greeting = [0u8; 2];
        stream.read_exact(&mut greeting).await.unwrap();
        let mut methods = vec![0u8; greeting[1] as usize];
        stream.read_exact(&mut methods).await.unwrap();
        stream.write_all(&[0x05, 0x00]).await.unwrap();

        let mut head = [0u8; 4];
        stream.read_exact(&mut head).await.unwrap();
        let _target = TargetAddr::read_from(&mut stream, head[3]).await.unwrap();

        stream
            .write_all(&[0x05, rep, 0x00, 0x01, 127, 0, 0, 1, 0x04, 0x38])
            .await
            .unwrap();
        if rep == 0 {
            echo(stream).await;
        }
    });
    addr
}

/// HTTP proxy answering CONNECT with `status`, echoing on 200
async fn start_http_mock(status: &'static str) -> (SocketAddr, tokio::task::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            stream.read_exact(&mut byte).await.unwrap();
            head.push(byte[0]);
        }
        stream
            .write_all(format!("HTTP/1.1 {status}\r\n\r\n").as_bytes())
            .await
            .unwrap();
        let request = String::from_utf8(head).unwrap();
        if status.starts_with("200") {
            echo(stream).await;
        }
        request
    });
    (addr, handle)
}

/// SOCKS4 server granting every request and echoing
async fn start_socks4_mock() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut fixed = [0u8; 8];
        stream.read_exact(&mut fixed).await.unwrap();
        let mut byte = [0u8; 1];
        loop {
            stream.read_exact(&mut byte).await.unwrap();
            if byte[0] == 0 {
                break;
            }
        }
        stream.write_all(&[0, 90, 0, 0, 0, 0, 0, 0]).await.unwrap();
        echo(stream).await;
    });
    addr
}

fn proxy(kind: ProxyKind, addr: SocketAddr) -> UpstreamProxy {
    UpstreamProxy::new("test", kind, addr.ip().to_string(), addr.port())
}

async fn assert_echo(stream: &mut TcpStream) {
    stream.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping");
}

#[tokio::test]
async fn test_socks5_tunnel_carries_data() {
    let addr = start_socks5_mock(0x00).await;
    let mut stream = connect_via(&proxy(ProxyKind::Socks5, addr), "example.com", 443, Duration::from_secs(2))
        .await
        .unwrap();
    assert_echo(&mut stream).await;
}

#[tokio::test]
async fn test_socks5_nonzero_reply_fails() {
    let addr = start_socks5_mock(0x05).await;
    let err = connect_via(&proxy(ProxyKind::Socks5, addr), "example.com", 443, Duration::from_secs(2))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UpstreamConnectFailed(0x05)));
}

#[tokio::test]
async fn test_http_tunnel_with_credentials() {
    let (addr, handle) = start_http_mock("200 Connection Established").await;
    let upstream = proxy(ProxyKind::Http, addr).with_credentials("alice", "wonder");
    let mut stream = connect_via(&upstream, "example.com", 443, Duration::from_secs(2))
        .await
        .unwrap();
    assert_echo(&mut stream).await;
    drop(stream);

    let request = handle.await.unwrap();
    assert!(request.starts_with("CONNECT example.com:443 HTTP/1.1\r\n"));
    assert!(request.contains("Proxy-Authorization: Basic YWxpY2U6d29uZGVy\r\n"));
}

#[tokio::test]
async fn test_http_tunnel_rejected() {
    let (addr, _handle) = start_http_mock("403 Forbidden").await;
    let err = connect_via(&proxy(ProxyKind::Http, addr), "example.com", 443, Duration::from_secs(2))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::HttpConnectRejected(_)));
}

#[tokio::test]
async fn test_socks4_tunnel_carries_data() {
    let addr = start_socks4_mock().await;
    let mut stream = connect_via(&proxy(ProxyKind::Socks4, addr), "127.0.0.1", 80, Duration::from_secs(2))
        .await
        .unwrap();
    assert_echo(&mut stream).await;
}

#[tokio::test]
async fn test_silent_upstream_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    // Accept but never answer the greeting
    tokio::spawn(async move {
        let (_stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
    });

    let err = connect_via(&proxy(ProxyKind::Socks5, addr), "example.com", 443, Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout));
}

#[tokio::test]
async fn test_probe_reports_latency() {
    let addr = start_socks5_mock(0x00).await;
    let latency = probe(&proxy(ProxyKind::Socks5, addr), "example.com", 80, Duration::from_secs(2))
        .await
        .unwrap();
    assert!(latency < Duration::from_secs(2));
}

#[tokio::test]
async fn test_udp_session_relays_through_unspecified_relay_address() {
    // Relay: unwraps a datagram, echoes the payload back framed from the target
    let relay = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let relay_port = relay.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        let (n, from) = relay.recv_from(&mut buf).await.unwrap();
        let (target, payload) = hop_socks::udp::unpack(&buf[..n]).unwrap();
        let reply = hop_socks::udp::pack(payload, &target.host(), target.port()).unwrap();
        relay.send_to(&reply, from).await.unwrap();
    });

    // Control: answer UDP ASSOCIATE with 0.0.0.0:<relay_port>
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let control_addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut greeting = [0u8; 4];
        stream.read_exact(&mut greeting).await.unwrap();
        stream.write_all(&[0x05, 0x00]).await.unwrap();
        let mut request = [0u8; 10];
        stream.read_exact(&mut request).await.unwrap();
        assert_eq!(request[1], 0x03);
        let port = relay_port.to_be_bytes();
        stream
            .write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, port[0], port[1]])
            .await
            .unwrap();
        // Hold the control connection until the client closes it
        let mut rest = Vec::new();
        let _ = stream.read_to_end(&mut rest).await;
    });

    let control = TcpStream::connect(control_addr).await.unwrap();
    let session = UdpSession::open(control, None).await.unwrap();
    assert_eq!(session.relay_addr(), SocketAddr::from(([127, 0, 0, 1], relay_port)));

    session.send_to(b"query", "8.8.8.8", 53).await.unwrap();
    let (from, payload) = tokio::time::timeout(Duration::from_secs(2), session.recv_from())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(from, TargetAddr::new("8.8.8.8", 53));
    assert_eq!(payload, b"query");
    session.close().await;
}

#[tokio::test]
async fn test_udp_session_unresolvable_relay_is_io_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let control_addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut greeting = [0u8; 4];
        stream.read_exact(&mut greeting).await.unwrap();
        stream.write_all(&[0x05, 0x00]).await.unwrap();
        let mut request = [0u8; 10];
        stream.read_exact(&mut request).await.unwrap();

        // Relay named by domain, under a TLD that never resolves
        let name = b"relay.invalid";
        let mut reply = vec![0x05, 0x00, 0x00, 0x03, name.len() as u8];
        reply.extend_from_slice(name);
        reply.extend_from_slice(&5353u16.to_be_bytes());
        stream.write_all(&reply).await.unwrap();
        let mut rest = Vec::new();
        let _ = stream.read_to_end(&mut rest).await;
    });

    let control = TcpStream::connect(control_addr).await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(10), UdpSession::open(control, None))
        .await
        .unwrap();
    assert!(matches!(result, Err(Error::Io(_))), "expected I/O error, got {:?}", result.err());
}
