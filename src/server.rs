//! TCP listener for WebSocket clients.
//!
//! Accepts connections and hands each one to its own task running a
//! [`Session`](crate::protocols::websocket::handler::Session). The accept loop never
//! waits on per-connection I/O.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::Config;
use crate::error::{GatewayError, Result};
use crate::protocols::websocket::{handle_connection, Relay};

/// Server instance
pub struct Server {
    config: Config,
    listener: TcpListener,
    relay: Arc<dyn Relay>,
    connection_limit: Option<Arc<Semaphore>>,
}

impl Server {
    /// Resolve and bind the configured WebSocket address.
    pub async fn bind(config: Config, relay: Arc<dyn Relay>) -> Result<Self> {
        let addr = config.listen_addr();
        let bind_failure = |source| GatewayError::BindFailure {
            addr: addr.clone(),
            source,
        };

        let resolved = tokio::net::lookup_host(&addr)
            .await
            .map_err(bind_failure)?
            .next()
            .ok_or_else(|| {
                bind_failure(io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    "address resolved to nothing",
                ))
            })?;

        let listener = create_listener(resolved, config.backlog)
            .and_then(TcpListener::from_std)
            .map_err(bind_failure)?;

        let connection_limit = config
            .max_connections
            .map(|max| Arc::new(Semaphore::new(max)));

        Ok(Server {
            config,
            listener,
            relay,
            connection_limit,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until a non-transient accept error occurs.
    pub async fn run(self) -> Result<()> {
        info!(
            address = %self.local_addr()?,
            max_connections = ?self.config.max_connections,
            "Server listening"
        );

        loop {
            // The semaphore is never closed, so acquiring only waits.
            let permit = match &self.connection_limit {
                Some(limit) => Arc::clone(limit).acquire_owned().await.ok(),
                None => None,
            };

            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "New connection");

                    let endpoints = Arc::clone(&self.config.endpoints);
                    let relay = Arc::clone(&self.relay);
                    let read_timeout = self.config.read_timeout;

                    tokio::spawn(
                        async move {
                            handle_connection(stream, endpoints, relay, read_timeout).await;
                            drop(permit);
                        }
                        .instrument(info_span!("session", peer = %peer)),
                    );
                }
                Err(e) if is_transient(&e) => {
                    warn!(error = %e, "Failed to accept connection");
                }
                Err(e) => {
                    error!(error = %e, "Accept failed");
                    return Err(e.into());
                }
            }
        }
    }
}

fn create_listener(addr: SocketAddr, backlog: i32) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}

/// Accept errors that concern a single pending connection, not the listener.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Endpoints;
    use crate::protocols::websocket::UppercaseEcho;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    const REQUEST: &[u8] = b"GET /mpd HTTP/1.1\r\n\
        Upgrade: WebSocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Key1: 4 @1  46546xW%0l 1 5\r\n\
        Sec-WebSocket-Key2: 12998 5 Y3 1  .P00\r\n\
        \r\n\
        ^n:ds[4U";

    const RESPONSE: &[u8] = b"HTTP/1.1 101 Web Socket Protocol Handshake\r\n\
        Upgrade: WebSocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Origin: http://localhost:9000\r\n\
        Sec-WebSocket-Location: ws://127.0.0.1:0/mpd\r\n\
        Sec-WebSocket-Protocol: proxy\r\n\
        \r\n\
        8jKS'y:G*Co,Wxa-";

    fn test_config(max_connections: Option<usize>) -> Config {
        Config {
            endpoints: Arc::new(Endpoints {
                ws_host: "127.0.0.1".to_string(),
                ws_port: 0,
                ws_path: "/mpd".to_string(),
                http_host: "localhost".to_string(),
                http_port: 9000,
            }),
            backlog: 16,
            workers: None,
            max_connections,
            read_timeout: None,
            log_level: "info".to_string(),
        }
    }

    async fn start(max_connections: Option<usize>) -> SocketAddr {
        let server = Server::bind(test_config(max_connections), Arc::new(UppercaseEcho))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());
        addr
    }

    async fn read_n(stream: &mut TcpStream, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        stream.read_exact(&mut buf).await.unwrap();
        buf
    }

    async fn connect(addr: SocketAddr) -> TcpStream {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(REQUEST).await.unwrap();
        assert_eq!(read_n(&mut stream, RESPONSE.len()).await, RESPONSE);
        stream
    }

    #[tokio::test]
    async fn test_end_to_end_echo() {
        let addr = start(None).await;
        let mut client = connect(addr).await;

        client.write_all(b"\x00hello\xff").await.unwrap();
        assert_eq!(read_n(&mut client, 7).await, b"\x00HELLO\xff");

        client.write_all(b"\x00a\xff\x00b\xff").await.unwrap();
        assert_eq!(read_n(&mut client, 6).await, b"\x00A\xff\x00B\xff");
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let addr = start(None).await;
        let mut first = connect(addr).await;
        let mut second = connect(addr).await;

        first.write_all(b"\x00alp").await.unwrap();
        second.write_all(b"\x00bravo\xff").await.unwrap();
        assert_eq!(read_n(&mut second, 7).await, b"\x00BRAVO\xff");

        first.write_all(b"ha\xff").await.unwrap();
        assert_eq!(read_n(&mut first, 7).await, b"\x00ALPHA\xff");

        second.write_all(b"\x00charlie\xff").await.unwrap();
        first.write_all(b"\x00delta\xff").await.unwrap();
        assert_eq!(read_n(&mut first, 7).await, b"\x00DELTA\xff");
        assert_eq!(read_n(&mut second, 9).await, b"\x00CHARLIE\xff");
    }

    #[tokio::test]
    async fn test_bad_handshake_does_not_stop_listener() {
        let addr = start(None).await;

        let mut bad = TcpStream::connect(addr).await.unwrap();
        bad.write_all(b"GET / HTTP/1.1\r\nbroken\r\n\r\n12345678")
            .await
            .unwrap();
        let mut rest = Vec::new();
        bad.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());

        let mut good = connect(addr).await;
        good.write_all(b"\x00ok\xff").await.unwrap();
        assert_eq!(read_n(&mut good, 4).await, b"\x00OK\xff");
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let addr = start(Some(1)).await;
        let first = connect(addr).await;

        let mut waiting = TcpStream::connect(addr).await.unwrap();
        waiting.write_all(REQUEST).await.unwrap();
        let mut buf = [0u8; 1];
        let blocked =
            tokio::time::timeout(Duration::from_millis(100), waiting.read(&mut buf)).await;
        assert!(blocked.is_err());

        drop(first);
        assert_eq!(read_n(&mut waiting, RESPONSE.len()).await, RESPONSE);
    }

    #[tokio::test]
    async fn test_bind_failure() {
        let server = Server::bind(test_config(None), Arc::new(UppercaseEcho))
            .await
            .unwrap();
        let port = server.local_addr().unwrap().port();

        let mut config = test_config(None);
        config.endpoints = Arc::new(Endpoints {
            ws_port: port,
            ..(*config.endpoints).clone()
        });

        match Server::bind(config, Arc::new(UppercaseEcho)).await {
            Err(GatewayError::BindFailure { addr, .. }) => {
                assert_eq!(addr, format!("127.0.0.1:{port}"));
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("second bind succeeded"),
        }
    }

    #[test]
    fn test_is_transient() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::ConnectionAborted)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::PermissionDenied)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::WouldBlock)));
    }
}
