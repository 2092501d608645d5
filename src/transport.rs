use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use log::{debug, trace};
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::{sleep_until, timeout, Instant};

use crate::error::{Result, SourceQueryError};
use crate::packet::MAX_PACKET_SIZE;

/// Settings for [UdpTransport].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Applied to every connect, send and receive on its own.
    pub timeout: Duration,
    /// Maximum requests per minute, `None` for no limit.
    pub rate_limit: Option<u32>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            timeout: Duration::from_secs(5),
            rate_limit: None,
        }
    }
}

impl ClientConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_rate_limit(mut self, per_minute: u32) -> Self {
        self.rate_limit = Some(per_minute);
        self
    }

    /// Minimum time between two requests, with a second of slack on top of
    /// the configured rate. `None` when unlimited.
    pub fn request_spacing(&self) -> Option<Duration> {
        self.rate_limit
            .filter(|&rate| rate > 0)
            .map(|rate| Duration::from_secs(60) / rate + Duration::from_secs(1))
    }
}

/// Datagram channel the query engine talks through.
///
/// One request is outstanding at a time; replies are matched to requests
/// only by that fact, so a transport must not be shared between concurrent
/// queries.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Wait until a request may go out right away.
    async fn ready(&mut self) {}

    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive the next datagram.
    async fn recv(&mut self) -> Result<Vec<u8>>;

    /// Drop the current connection and open a fresh one to the same host.
    async fn reconnect(&mut self) -> Result<()>;

    fn peer_addr(&self) -> Option<SocketAddr>;
}

/// [Transport] over a connected tokio [UdpSocket].
#[derive(Debug)]
pub struct UdpTransport {
    host: String,
    sock: UdpSocket,
    config: ClientConfig,
    next_request: Option<Instant>,
}

impl UdpTransport {
    pub async fn connect(host: &str, config: ClientConfig) -> Result<Self> {
        let sock = Self::open(host, config.timeout).await?;
        Ok(UdpTransport {
            host: host.to_owned(),
            sock,
            config,
            next_request: None,
        })
    }

    async fn open(host: &str, timeout_dur: Duration) -> Result<UdpSocket> {
        let peer = timeout(timeout_dur, lookup_host(host))
            .await?
            .map_err(SourceQueryError::UnreachableHost)?
            .next()
            .ok_or_else(|| {
                SourceQueryError::UnreachableHost(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no address for {host}"),
                ))
            })?;

        // any port will do, but the family has to match the peer
        let local: SocketAddr = if peer.is_ipv6() {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        };
        let sock: UdpSocket = UdpSocket::bind(local)
            .await
            .map_err(SourceQueryError::FailedPortBind)?;

        timeout(timeout_dur, sock.connect(peer))
            .await?
            .map_err(SourceQueryError::UnreachableHost)?;

        Ok(sock)
    }

    async fn enforce_rate_limit(&self) {
        if let Some(next) = self.next_request {
            let wait = next.saturating_duration_since(Instant::now());
            if !wait.is_zero() {
                trace!("rate limited, waiting {wait:?}");
                sleep_until(next).await;
            }
        }
    }

    fn schedule_next_request(&mut self) {
        if let Some(spacing) = self.config.request_spacing() {
            self.next_request = Some(Instant::now() + spacing);
        }
    }
}

impl Transport for UdpTransport {
    async fn ready(&mut self) {
        self.enforce_rate_limit().await;
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.enforce_rate_limit().await;

        let sent = timeout(self.config.timeout, self.sock.send(data)).await;
        self.schedule_next_request();
        sent?.map_err(SourceQueryError::SendError)?;

        trace!("sent {} bytes to {}", data.len(), self.host);
        Ok(())
    }

    async fn recv(&mut self) -> Result<Vec<u8>> {
        let mut resp_buf = [0u8; MAX_PACKET_SIZE];
        let received = timeout(self.config.timeout, self.sock.recv(&mut resp_buf)).await;
        self.schedule_next_request();
        let len = received?.map_err(SourceQueryError::ReceiveError)?;

        trace!("received {len} bytes from {}", self.host);
        Ok(resp_buf[..len].to_vec())
    }

    async fn reconnect(&mut self) -> Result<()> {
        debug!("reconnecting to {}", self.host);
        self.sock = Self::open(&self.host, self.config.timeout).await?;
        Ok(())
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.sock.peer_addr().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.request_spacing(), None);
    }

    #[test]
    fn rate_limit_spacing() {
        let config = ClientConfig::default()
            .with_timeout(Duration::from_millis(250))
            .with_rate_limit(30);
        assert_eq!(config.timeout, Duration::from_millis(250));
        assert_eq!(config.request_spacing(), Some(Duration::from_secs(3)));

        let config = ClientConfig::default().with_rate_limit(0);
        assert_eq!(config.request_spacing(), None);
    }

    #[tokio::test]
    async fn sends_and_receives_over_loopback() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        let mut transport = UdpTransport::connect(&addr.to_string(), ClientConfig::default())
            .await
            .unwrap();
        assert_eq!(transport.peer_addr(), Some(addr));

        transport.send(b"ping").await.unwrap();
        let mut buf = [0u8; 16];
        let (n, from) = server.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");

        server.send_to(b"pong", from).await.unwrap();
        assert_eq!(transport.recv().await.unwrap(), b"pong");
    }

    #[tokio::test]
    async fn receive_times_out() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let config = ClientConfig::default().with_timeout(Duration::from_millis(50));

        let mut transport = UdpTransport::connect(&addr, config).await.unwrap();
        assert!(matches!(
            transport.recv().await,
            Err(SourceQueryError::Timeout(_))
        ));
    }

    fn limited() -> ClientConfig {
        // 1ms per request plus the one second of slack
        ClientConfig::default().with_rate_limit(60_000)
    }

    #[tokio::test]
    async fn rate_limit_delays_second_send() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let config = limited();
        let spacing = config.request_spacing().unwrap();

        let mut transport = UdpTransport::connect(&addr, config).await.unwrap();
        let start = Instant::now();
        transport.send(b"one").await.unwrap();
        assert!(start.elapsed() < spacing);
        transport.send(b"two").await.unwrap();
        assert!(start.elapsed() >= spacing);
    }

    #[tokio::test]
    async fn receive_pushes_next_request_back() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let config = limited();
        let spacing = config.request_spacing().unwrap();
        let pause = Duration::from_millis(500);

        let mut transport = UdpTransport::connect(&addr, config).await.unwrap();
        let start = Instant::now();
        transport.send(b"one").await.unwrap();

        let mut buf = [0u8; 16];
        let (_, from) = server.recv_from(&mut buf).await.unwrap();
        server.send_to(b"reply", from).await.unwrap();

        tokio::time::sleep(pause).await;
        transport.recv().await.unwrap();
        transport.send(b"two").await.unwrap();
        assert!(start.elapsed() >= pause + spacing);
    }

    #[tokio::test]
    async fn ready_waits_out_rate_limit() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let config = limited();
        let spacing = config.request_spacing().unwrap();

        let mut transport = UdpTransport::connect(&addr, config).await.unwrap();
        transport.send(b"one").await.unwrap();
        transport.ready().await;

        // nothing left to wait for once ready
        let start = Instant::now();
        transport.send(b"two").await.unwrap();
        assert!(start.elapsed() < spacing / 2);
    }

    #[tokio::test]
    async fn connects_over_ipv6() {
        // skip on hosts without an IPv6 loopback
        let Ok(server) = UdpSocket::bind("[::1]:0").await else {
            return;
        };
        let addr = server.local_addr().unwrap();

        let mut transport = UdpTransport::connect(&addr.to_string(), ClientConfig::default())
            .await
            .unwrap();
        assert_eq!(transport.peer_addr(), Some(addr));

        transport.send(b"v6").await.unwrap();
        let mut buf = [0u8; 16];
        let (n, _) = server.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"v6");
    }

    #[tokio::test]
    async fn unresolvable_host_is_unreachable() {
        assert!(matches!(
            UdpTransport::connect("not a host", ClientConfig::default()).await,
            Err(SourceQueryError::UnreachableHost(_))
        ));
    }

    #[tokio::test]
    async fn reconnect_uses_new_local_port() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();

        let mut transport = UdpTransport::connect(&addr.to_string(), ClientConfig::default())
            .await
            .unwrap();
        let before = transport.sock.local_addr().unwrap();
        transport.reconnect().await.unwrap();
        let after = transport.sock.local_addr().unwrap();

        assert_ne!(before.port(), after.port());
        assert_eq!(transport.peer_addr(), Some(addr));
    }
}
