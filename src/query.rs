use std::time::Duration;

use log::debug;
use tokio::time::Instant;

use crate::error::{Result, SourceQueryError};
use crate::info::ServerInfo;
use crate::multipacket;
use crate::packet::{PacketHeader, PacketType, RequestPacket, ResponsePacket};
use crate::players::PlayerList;
use crate::rules::{parse_rules, Rules};
use crate::transport::{ClientConfig, Transport, UdpTransport};

/// Where a request stands in the challenge handshake.
///
/// A request is sent once as is, and at most once more with the challenge the
/// server handed out. A second challenge ends the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handshake {
    Fresh,
    Retried,
}

/// A reply that got past the handshake.
#[derive(Debug)]
enum Reply {
    Single(Vec<u8>),
    Split(Vec<u8>),
}

impl Reply {
    /// The reply as a single packet. Only A2S_RULES is reassembled.
    fn into_single(self) -> Result<Vec<u8>> {
        match self {
            Reply::Single(data) => Ok(data),
            Reply::Split(_) => Err(SourceQueryError::UnexpectedPacketHeader(
                PacketHeader::Split.value(),
            )),
        }
    }
}

/// Source query client over some [Transport].
///
/// Queries take `&mut self`, so only one can be in flight per client.
#[derive(Debug)]
pub struct Client<T: Transport = UdpTransport> {
    transport: T,
}

impl Client<UdpTransport> {
    /// Connect a UDP client to `host` (e.g. `"127.0.0.1:27015"`).
    pub async fn connect(host: &str, config: ClientConfig) -> Result<Self> {
        Ok(Client::new(UdpTransport::connect(host, config).await?))
    }
}

impl<T: Transport> Client<T> {
    pub fn new(transport: T) -> Self {
        Client { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn send_recv(&mut self, packet: &RequestPacket) -> Result<ResponsePacket> {
        self.transport.send(&packet.pack()).await?;
        let data = self.transport.recv().await?;
        ResponsePacket::unpack(data)
    }

    /// Send `packet`, answering a challenge once if the server asks for one.
    async fn request(&mut self, mut packet: RequestPacket) -> Result<Reply> {
        let mut state = Handshake::Fresh;
        loop {
            match (self.send_recv(&packet).await?, state) {
                (ResponsePacket::Challenge(challenge), Handshake::Fresh) => {
                    debug!(
                        "{:?} challenged with {:02x?}",
                        packet.packet_type(),
                        challenge.as_bytes()
                    );
                    packet = packet.with_challenge(challenge);
                    state = Handshake::Retried;
                }
                (ResponsePacket::Challenge(_), Handshake::Retried) => {
                    return Err(SourceQueryError::RepeatedChallenge)
                }
                (ResponsePacket::Single(data), _) => return Ok(Reply::Single(data)),
                (ResponsePacket::Split(data), _) => return Ok(Reply::Split(data)),
            }
        }
    }

    /// Query the server with A2S_INFO.
    pub async fn info(&mut self) -> Result<ServerInfo> {
        let data = self.request(RequestPacket::info()).await?.into_single()?;
        let mut info = ServerInfo::parse(&data)?;
        info.address = self.transport.peer_addr();
        Ok(info)
    }

    /// Query the server with A2S_PLAYER.
    pub async fn players(&mut self) -> Result<PlayerList> {
        let data = self.request(RequestPacket::players()).await?.into_single()?;
        PlayerList::parse(&data)
    }

    /// Query the server with A2S_RULES.
    ///
    /// An A2S_INFO query goes out first, split packet headers can't be read
    /// without knowing the engine. The transport is reconnected between the
    /// two, some servers won't answer A2S_RULES otherwise.
    pub async fn rules(&mut self) -> Result<Rules> {
        let engine = self.info().await?.engine();
        self.transport.reconnect().await?;

        let data = match self.request(RequestPacket::rules()).await? {
            Reply::Single(data) => data,
            Reply::Split(first) => {
                debug!("A2S_RULES reply is split");
                multipacket::collect(&mut self.transport, &first, engine)
                    .await?
                    .into_data()?
            }
        };

        parse_rules(&data)
    }

    /// Measure the round trip of an A2A_PING. Many modern servers ignore it.
    ///
    /// Any rate limit wait happens before the clock starts.
    pub async fn ping(&mut self) -> Result<Duration> {
        self.transport.ready().await;
        let start = Instant::now();
        self.transport.send(&RequestPacket::ping().pack()).await?;
        let data = self.transport.recv().await?;

        match data.get(4) {
            Some(&t) if t == PacketType::PingReply.to_byte() => Ok(start.elapsed()),
            Some(&t) => Err(SourceQueryError::BadPingReply(t)),
            None => Err(SourceQueryError::UnexpectedEof {
                offset: data.len(),
                needed: 5 - data.len(),
            }),
        }
    }
}

/// Query `host` with the Source Query Protocol A2S_INFO query.
///
/// If `timeout_dur` is `Some(Duration)`, each `timeout()` will use `timeout_dur`.
/// The default is 5 seconds if `timeout_dur` is `None`.
///
/// Note that this timeout duration can occur 3 times (5 if challenged):
/// - On socket connect
/// - On packet send
/// - On packet receive
/// - Twice more on another send and receive, if challenged
///
/// Example usage:
/// ```no_run
/// # async fn run() -> sourcequery::error::Result<()> {
/// let host: &str = "nyc-1.us.uncletopia.com:27015"; // Uncletopia New York City 4
/// let info = sourcequery::query(host, None).await?;
/// println!("{} on {}", info.name, info.map);
/// # Ok(())
/// # }
/// ```
pub async fn query(host: &str, timeout_dur: Option<Duration>) -> Result<ServerInfo> {
    let mut config = ClientConfig::default();
    if let Some(timeout_dur) = timeout_dur {
        config.timeout = timeout_dur;
    }

    Client::connect(host, config).await?.info().await
}
