use std::io;

use thiserror::Error;

use crate::packet::PacketType;

pub type Result<T> = std::result::Result<T, SourceQueryError>;

#[derive(Debug, Error)]
pub enum SourceQueryError {
    #[error("failed to bind local port: {0}")]
    FailedPortBind(#[source] io::Error),
    #[error("host unreachable: {0}")]
    UnreachableHost(#[source] io::Error),
    #[error("failed to send packet: {0}")]
    SendError(#[source] io::Error),
    #[error("failed to receive packet: {0}")]
    ReceiveError(#[source] io::Error),
    #[error("operation timed out")]
    Timeout(#[from] tokio::time::error::Elapsed),

    #[error("unknown packet header {0}")]
    UnknownPacketHeader(i32),
    #[error("unknown packet type {0:#04x}")]
    UnknownPacketType(u8),
    #[error("expected {expected:?} packet, found type byte {found:#04x}")]
    UnexpectedPacketType { expected: PacketType, found: u8 },
    #[error("unknown A2S_INFO version {0:#04x}")]
    UnknownInfoVersion(u8),
    #[error("expected single packet header, found {0}")]
    UnexpectedPacketHeader(i32),
    #[error("server answered the challenge with another challenge")]
    RepeatedChallenge,
    #[error("bad ping reply {0:#04x}")]
    BadPingReply(u8),

    #[error("packet is not part of a split response")]
    NotSplitPacket,
    #[error("fragment number {number} out of range for {total} fragments")]
    BadFragmentNumber { number: u8, total: usize },
    #[error("duplicate fragment {0}")]
    DuplicateFragment(u8),
    #[error("split response incomplete: {received} of {total} fragments")]
    IncompleteResponse { received: usize, total: usize },
    #[error("fragment belongs to sequence {found:#010x}, expected {expected:#010x}")]
    SequenceMismatch { expected: u32, found: u32 },

    #[error("declared decompressed size {0} exceeds limit")]
    DecompressedTooLarge(u32),
    #[error("decompressed {actual} bytes, expected {expected}")]
    DecompressedSizeMismatch { expected: u32, actual: usize },
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
    #[error("failed to decompress payload: {0}")]
    Decompression(#[source] io::Error),

    #[error("unexpected end of packet at offset {offset} (needed {needed} bytes)")]
    UnexpectedEof { offset: usize, needed: usize },
    #[error("unterminated string at offset {0}")]
    UnterminatedString(usize),
}
