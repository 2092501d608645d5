use crate::error::{Result, SourceQueryError};
use crate::parse::{PacketBuilder, PacketReader};

/// Body of an A2S_INFO request.
pub const INFO_PAYLOAD: &str = "Source Engine Query";

/// According to the Valve wiki, Source query responses use 1400 bytes + IP/UDP headers.
pub const MAX_PACKET_SIZE: usize = 1400;

/// The 4-byte marker every packet starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketHeader {
    /// The whole response fits in this datagram.
    Single,
    /// One fragment of a response spread across several datagrams.
    Split,
}

impl TryFrom<i32> for PacketHeader {
    type Error = SourceQueryError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            -1 => Ok(PacketHeader::Single),
            -2 => Ok(PacketHeader::Split),
            n => Err(SourceQueryError::UnknownPacketHeader(n)),
        }
    }
}

impl PacketHeader {
    pub fn value(self) -> i32 {
        match self {
            PacketHeader::Single => -1,
            PacketHeader::Split => -2,
        }
    }

    pub fn to_le_bytes(self) -> [u8; 4] {
        self.value().to_le_bytes()
    }
}

/// The type byte following a single packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// A2S_INFO -- https://developer.valvesoftware.com/wiki/Server_queries#A2S_INFO
    InfoRequest,
    /// A2S_PLAYER
    PlayerRequest,
    /// A2S_RULES
    RulesRequest,
    /// A2A_PING, deprecated and ignored by most modern servers.
    PingRequest,
    /// S2C_CHALLENGE
    ///
    /// The server may reply with a challenge ('A' or 0x41). In that case the
    /// client should repeat the request with the challenge number appended.
    Challenge,
    /// S2A_INFO_GOLDSRC, the obsolete GoldSource info reply.
    InfoGoldSource,
    /// S2A_INFO_SRC
    InfoSource,
    /// S2A_PLAYER
    Players,
    /// S2A_RULES
    Rules,
    /// A2A_ACK
    PingReply,
}

impl TryFrom<u8> for PacketType {
    type Error = SourceQueryError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x54 => Ok(PacketType::InfoRequest),
            0x55 => Ok(PacketType::PlayerRequest),
            0x56 => Ok(PacketType::RulesRequest),
            0x69 => Ok(PacketType::PingRequest),
            0x41 => Ok(PacketType::Challenge),
            0x6D => Ok(PacketType::InfoGoldSource),
            0x49 => Ok(PacketType::InfoSource),
            0x44 => Ok(PacketType::Players),
            0x45 => Ok(PacketType::Rules),
            0x6A => Ok(PacketType::PingReply),
            n => Err(SourceQueryError::UnknownPacketType(n)),
        }
    }
}

impl PacketType {
    pub fn to_byte(self) -> u8 {
        match self {
            PacketType::InfoRequest => 0x54,
            PacketType::PlayerRequest => 0x55,
            PacketType::RulesRequest => 0x56,
            PacketType::PingRequest => 0x69,
            PacketType::Challenge => 0x41,
            PacketType::InfoGoldSource => 0x6D,
            PacketType::InfoSource => 0x49,
            PacketType::Players => 0x44,
            PacketType::Rules => 0x45,
            PacketType::PingReply => 0x6A,
        }
    }

    /// Consume a type byte from `r`, failing unless it is `expected`.
    pub fn expect(r: &mut PacketReader, expected: PacketType) -> Result<()> {
        let found = r.read_u8()?;
        if found != expected.to_byte() {
            return Err(SourceQueryError::UnexpectedPacketType { expected, found });
        }
        Ok(())
    }
}

/// Consume a packet header from `r`, failing unless it marks a single packet.
pub fn expect_single(r: &mut PacketReader) -> Result<()> {
    let header = r.read_i32()?;
    if header != PacketHeader::Single.value() {
        return Err(SourceQueryError::UnexpectedPacketHeader(header));
    }
    Ok(())
}

/// Anti-spoofing token handed out by the server. Echoed back byte for byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Challenge([u8; 4]);

impl Challenge {
    /// Sent in place of a real challenge on the first attempt.
    pub const PLACEHOLDER: Challenge = Challenge([0xFF; 4]);

    pub fn new(bytes: [u8; 4]) -> Self {
        Challenge(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPacket {
    packet_type: PacketType,
    challenge: Option<Challenge>,
}

impl RequestPacket {
    fn new(packet_type: PacketType) -> Self {
        RequestPacket {
            packet_type,
            challenge: None,
        }
    }

    pub fn info() -> Self {
        Self::new(PacketType::InfoRequest)
    }

    pub fn players() -> Self {
        Self::new(PacketType::PlayerRequest)
    }

    pub fn rules() -> Self {
        Self::new(PacketType::RulesRequest)
    }

    pub fn ping() -> Self {
        Self::new(PacketType::PingRequest)
    }

    pub fn with_challenge(mut self, challenge: Challenge) -> Self {
        self.challenge = Some(challenge);
        self
    }

    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    /// Serializes a request packet into an array of bytes.
    pub fn pack(&self) -> Vec<u8> {
        let mut b = PacketBuilder::new();
        b.write_bytes(&PacketHeader::Single.to_le_bytes())
            .write_u8(self.packet_type.to_byte());

        match self.packet_type {
            // the info body is always present, the challenge only once we have one
            PacketType::InfoRequest => {
                b.write_cstring(INFO_PAYLOAD);
                if let Some(c) = &self.challenge {
                    b.write_bytes(c.as_bytes());
                }
            }
            PacketType::PlayerRequest | PacketType::RulesRequest => {
                let c = self.challenge.unwrap_or(Challenge::PLACEHOLDER);
                b.write_bytes(c.as_bytes());
            }
            _ => {}
        }

        b.into_bytes()
    }
}

/// A received datagram, classified by its framing.
#[derive(Debug, PartialEq, Eq)]
pub enum ResponsePacket {
    /// The server wants the request repeated with this challenge.
    Challenge(Challenge),
    /// A complete single packet, header included.
    Single(Vec<u8>),
    /// One fragment of a split response, header included.
    Split(Vec<u8>),
}

impl ResponsePacket {
    const CHALLENGE_TYPE_OFFSET: usize = 4;

    /// Classifies an incoming datagram by its header and, for single packets,
    /// its type byte.
    pub fn unpack(incoming: Vec<u8>) -> Result<Self> {
        let mut r = PacketReader::new(&incoming);
        let header = PacketHeader::try_from(r.read_i32()?)?;

        match header {
            PacketHeader::Single => {
                if incoming.get(Self::CHALLENGE_TYPE_OFFSET)
                    != Some(&PacketType::Challenge.to_byte())
                {
                    return Ok(ResponsePacket::Single(incoming));
                }
                r.read_u8()?;
                let offset = r.position();
                let bytes: [u8; 4] = r
                    .rest()
                    .get(..4)
                    .and_then(|b| b.try_into().ok())
                    .ok_or(SourceQueryError::UnexpectedEof { offset, needed: 4 })?;
                Ok(ResponsePacket::Challenge(Challenge::new(bytes)))
            }
            PacketHeader::Split => Ok(ResponsePacket::Split(incoming)),
        }
    }
}
