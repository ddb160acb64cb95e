//! Test utilities shared across integration tests.

use std::net::SocketAddr;
use std::sync::Arc;

use sockd::{Authenticator, ProxyServer, ServerStatus};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Create a test TCP listener on an available port
pub async fn create_test_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Spawn a one-shot echo server; returns its address.
pub async fn spawn_echo_server() -> SocketAddr {
    let (listener, addr) = create_test_listener().await;
    tokio::spawn(async move {
        let (mut conn, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 4096];
        loop {
            match conn.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if conn.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
    addr
}

/// Start a proxy server on a loopback port; returns it with its address.
pub async fn spawn_proxy(auth: Arc<dyn Authenticator>) -> (Arc<ProxyServer>, SocketAddr) {
    spawn_proxy_with(ProxyServer::new(auth)).await
}

/// Start an already-configured proxy server on a loopback port.
pub async fn spawn_proxy_with(server: ProxyServer) -> (Arc<ProxyServer>, SocketAddr) {
    let server = Arc::new(server);
    let runner = Arc::clone(&server);
    tokio::spawn(async move { runner.start(Some("127.0.0.1".parse().unwrap()), 0).await });
    server.await_status(ServerStatus::Started).await.unwrap();
    let addr = server.local_addr().unwrap();
    (server, addr)
}

/// Run the SOCKS5 no-auth greeting against a freshly connected stream.
pub async fn socks5_greeting(proxy: SocketAddr) -> TcpStream {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream.write_all(&[5, 1, 0]).await.unwrap();
    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, [5, 0]);
    stream
}

/// Read a SOCKS5 reply; returns the code and the bound address.
pub async fn read_socks5_reply(stream: &mut TcpStream) -> (u8, SocketAddr) {
    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await.unwrap();
    assert_eq!(head[0], 5);
    let addr = match head[3] {
        1 => {
            let mut rest = [0u8; 6];
            stream.read_exact(&mut rest).await.unwrap();
            let ip = std::net::Ipv4Addr::new(rest[0], rest[1], rest[2], rest[3]);
            SocketAddr::new(ip.into(), u16::from_be_bytes([rest[4], rest[5]]))
        }
        4 => {
            let mut rest = [0u8; 18];
            stream.read_exact(&mut rest).await.unwrap();
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&rest[..16]);
            let ip = std::net::Ipv6Addr::from(octets);
            SocketAddr::new(ip.into(), u16::from_be_bytes([rest[16], rest[17]]))
        }
        other => panic!("unexpected atyp {}", other),
    };
    (head[1], addr)
}

/// Issue a SOCKS5 CONNECT to an IPv4 target on an already-greeted stream.
pub async fn socks5_connect(stream: &mut TcpStream, target: SocketAddr) -> (u8, SocketAddr) {
    let mut req = vec![5u8, 1, 0];
    match target {
        SocketAddr::V4(v4) => {
            req.push(1);
            req.extend_from_slice(&v4.ip().octets());
        }
        SocketAddr::V6(v6) => {
            req.push(4);
            req.extend_from_slice(&v6.ip().octets());
        }
    }
    req.extend_from_slice(&target.port().to_be_bytes());
    stream.write_all(&req).await.unwrap();
    read_socks5_reply(stream).await
}

/// Issue a SOCKS4 request; returns the raw 8-byte reply.
pub async fn socks4_request(
    proxy: SocketAddr,
    command: u8,
    target: SocketAddr,
    user: &str,
) -> (TcpStream, [u8; 8]) {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    let mut req = vec![4u8, command];
    req.extend_from_slice(&target.port().to_be_bytes());
    match target {
        SocketAddr::V4(v4) => req.extend_from_slice(&v4.ip().octets()),
        SocketAddr::V6(_) => panic!("SOCKS4 targets must be IPv4"),
    }
    req.extend_from_slice(user.as_bytes());
    req.push(0);
    stream.write_all(&req).await.unwrap();

    let mut reply = [0u8; 8];
    stream.read_exact(&mut reply).await.unwrap();
    (stream, reply)
}
