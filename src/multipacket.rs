//! Reassembly of responses split across several datagrams.
//!
//! A split packet starts with the `-2` header followed by a sub-header whose
//! layout depends on the engine:
//!
//! ```text
//! GoldSource: id(u32) | number << 4 | total
//! Source:     id(u32, high bit = compressed) | total(u8) | number(u8) [| size(u16)]
//! ```
//!
//! Once every fragment is in, the payloads are joined in order. A compressed
//! Source response then starts with its decompressed size and CRC32, followed
//! by a bzip2 stream.

use std::io::Read;

use bzip2::read::BzDecoder;
use log::{debug, trace};

use crate::error::{Result, SourceQueryError};
use crate::info::Engine;
use crate::packet::PacketHeader;
use crate::parse::PacketReader;
use crate::transport::Transport;

/// Upper bound on the declared size of a compressed response.
pub const MAX_DECOMPRESSED_SIZE: u32 = 1024 * 1024;

const COMPRESSED_FLAG: u32 = 0x8000_0000;

/// One piece of a split response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub id: u32,
    /// Position of this fragment, starting at 0
    pub number: u8,
    pub total: u8,
    /// Declared fragment size, not sent by every server
    pub size: Option<u16>,
    pub compressed: bool,
    pub payload: Vec<u8>,
}

impl Fragment {
    /// Decode a split packet datagram, header included.
    pub fn decode(data: &[u8], engine: Engine) -> Result<Fragment> {
        let mut r = PacketReader::new(data);
        if r.read_i32()? != PacketHeader::Split.value() {
            return Err(SourceQueryError::NotSplitPacket);
        }

        let id = r.read_u32()?;
        let fragment = match engine {
            Engine::GoldSource => {
                let packed = r.read_u8()?;
                Fragment {
                    id,
                    number: packed >> 4,
                    total: packed & 0x0F,
                    size: None,
                    compressed: false,
                    payload: Vec::new(),
                }
            }
            Engine::Source => {
                let total = r.read_u8()?;
                let number = r.read_u8()?;
                let size = if r.can_read(2) {
                    Some(r.read_u16()?)
                } else {
                    None
                };
                Fragment {
                    id,
                    number,
                    total,
                    size,
                    compressed: id & COMPRESSED_FLAG != 0,
                    payload: Vec::new(),
                }
            }
        };

        Ok(Fragment {
            payload: r.rest().to_vec(),
            ..fragment
        })
    }
}

/// A fully reassembled response, still compressed if `compressed` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reassembled {
    pub payload: Vec<u8>,
    pub compressed: bool,
}

impl Reassembled {
    /// The response bytes, decompressed and verified if needed.
    pub fn into_data(self) -> Result<Vec<u8>> {
        if self.compressed {
            decompress(&self.payload)
        } else {
            Ok(self.payload)
        }
    }
}

/// Collects the fragments of one split response.
///
/// The number of slots is fixed by the first fragment seen. Every slot is
/// filled exactly once; completion means every slot is filled, regardless of
/// arrival order.
#[derive(Debug)]
pub struct Reassembler {
    id: u32,
    slots: Vec<Option<Fragment>>,
    received: usize,
    size: usize,
}

impl Reassembler {
    pub fn new(first: Fragment) -> Result<Self> {
        let mut reassembler = Reassembler {
            id: first.id,
            slots: vec![None; first.total as usize],
            received: 0,
            size: 0,
        };
        reassembler.insert(first)?;
        Ok(reassembler)
    }

    /// Store a fragment. Out of range and duplicate fragments abort the
    /// whole response.
    pub fn insert(&mut self, fragment: Fragment) -> Result<()> {
        if fragment.id != self.id {
            return Err(SourceQueryError::SequenceMismatch {
                expected: self.id,
                found: fragment.id,
            });
        }

        let total = self.slots.len();
        let slot = self
            .slots
            .get_mut(fragment.number as usize)
            .ok_or(SourceQueryError::BadFragmentNumber {
                number: fragment.number,
                total,
            })?;
        if slot.is_some() {
            return Err(SourceQueryError::DuplicateFragment(fragment.number));
        }

        trace!(
            "fragment {}/{total} of {:#010x}, {} bytes",
            fragment.number,
            self.id,
            fragment.payload.len()
        );
        self.size += fragment.payload.len();
        self.received += 1;
        *slot = Some(fragment);
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.received == self.slots.len()
    }

    /// Join the payloads in fragment order. Fails until every fragment is in.
    pub fn finish(self) -> Result<Reassembled> {
        let compressed = match self.slots.first() {
            Some(Some(first)) if self.is_complete() => first.compressed,
            _ => {
                return Err(SourceQueryError::IncompleteResponse {
                    received: self.received,
                    total: self.slots.len(),
                })
            }
        };
        let mut payload = Vec::with_capacity(self.size);
        for fragment in self.slots.into_iter().flatten() {
            payload.extend_from_slice(&fragment.payload);
        }

        Ok(Reassembled {
            payload,
            compressed,
        })
    }
}

/// Read the remaining fragments of a split response from `transport`,
/// starting with the already received `first` datagram.
pub async fn collect<T: Transport>(
    transport: &mut T,
    first: &[u8],
    engine: Engine,
) -> Result<Reassembled> {
    let mut reassembler = Reassembler::new(Fragment::decode(first, engine)?)?;
    debug!(
        "reassembling {engine} split response of {} fragments",
        reassembler.slots.len()
    );

    while !reassembler.is_complete() {
        let data = transport.recv().await?;
        reassembler.insert(Fragment::decode(&data, engine)?)?;
    }

    reassembler.finish()
}

/// Decompress a reassembled bzip2 payload and verify its size and CRC32.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut r = PacketReader::new(data);
    let size = r.read_u32()?;
    if size > MAX_DECOMPRESSED_SIZE {
        return Err(SourceQueryError::DecompressedTooLarge(size));
    }
    let checksum = r.read_u32()?;

    // one byte past the declared size is enough to detect an oversized stream
    let mut decompressed = Vec::with_capacity(size as usize);
    BzDecoder::new(r.rest())
        .take(u64::from(size) + 1)
        .read_to_end(&mut decompressed)
        .map_err(SourceQueryError::Decompression)?;

    if decompressed.len() != size as usize {
        return Err(SourceQueryError::DecompressedSizeMismatch {
            expected: size,
            actual: decompressed.len(),
        });
    }

    let actual = crc32fast::hash(&decompressed);
    if actual != checksum {
        return Err(SourceQueryError::ChecksumMismatch {
            expected: checksum,
            actual,
        });
    }

    Ok(decompressed)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Write;

    use bzip2::write::BzEncoder;
    use bzip2::Compression;

    use super::*;
    use crate::parse::PacketBuilder;

    pub(crate) fn source_fragment(id: u32, total: u8, number: u8, payload: &[u8]) -> Vec<u8> {
        let mut b = PacketBuilder::new();
        b.write_i32(-2)
            .write_bytes(&id.to_le_bytes())
            .write_u8(total)
            .write_u8(number)
            .write_bytes(&1248u16.to_le_bytes())
            .write_bytes(payload);
        b.into_bytes()
    }

    pub(crate) fn goldsource_fragment(id: u32, total: u8, number: u8, payload: &[u8]) -> Vec<u8> {
        let mut b = PacketBuilder::new();
        b.write_i32(-2)
            .write_bytes(&id.to_le_bytes())
            .write_u8(number << 4 | total)
            .write_bytes(payload);
        b.into_bytes()
    }

    /// Size and CRC prefix followed by the bzip2 stream of `data`.
    pub(crate) fn compress(data: &[u8]) -> Vec<u8> {
        let mut compressed = Vec::new();
        {
            let mut encoder = BzEncoder::new(&mut compressed, Compression::default());
            encoder.write_all(data).unwrap();
        }

        let mut out = Vec::new();
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&crc32fast::hash(data).to_le_bytes());
        out.extend_from_slice(&compressed);
        out
    }

    fn reassemble(datagrams: &[Vec<u8>], engine: Engine) -> Result<Reassembled> {
        let mut iter = datagrams.iter();
        let first = iter.next().unwrap();
        let mut reassembler = Reassembler::new(Fragment::decode(first, engine)?)?;
        for data in iter {
            reassembler.insert(Fragment::decode(data, engine)?)?;
        }
        reassembler.finish()
    }

    #[test]
    fn decodes_source_sub_header() {
        let data = source_fragment(0x8000_0007, 3, 1, b"abc");
        let fragment = Fragment::decode(&data, Engine::Source).unwrap();
        assert_eq!(fragment.id, 0x8000_0007);
        assert_eq!(fragment.total, 3);
        assert_eq!(fragment.number, 1);
        assert_eq!(fragment.size, Some(1248));
        assert!(fragment.compressed);
        assert_eq!(fragment.payload, b"abc");
    }

    #[test]
    fn source_size_is_optional() {
        let mut b = PacketBuilder::new();
        b.write_i32(-2).write_bytes(&7u32.to_le_bytes()).write_u8(1).write_u8(0);
        let fragment = Fragment::decode(&b.into_bytes(), Engine::Source).unwrap();
        assert_eq!(fragment.size, None);
        assert!(!fragment.compressed);
        assert!(fragment.payload.is_empty());
    }

    #[test]
    fn decodes_goldsource_sub_header() {
        let data = goldsource_fragment(9, 4, 2, b"xyz");
        let fragment = Fragment::decode(&data, Engine::GoldSource).unwrap();
        assert_eq!(fragment.total, 4);
        assert_eq!(fragment.number, 2);
        assert_eq!(fragment.size, None);
        assert!(!fragment.compressed);
        assert_eq!(fragment.payload, b"xyz");
    }

    #[test]
    fn rejects_single_packet() {
        let data = [0xFF, 0xFF, 0xFF, 0xFF, 0x45, 0x00, 0x00, 0x00, 0x00];
        assert!(matches!(
            Fragment::decode(&data, Engine::Source),
            Err(SourceQueryError::NotSplitPacket)
        ));
    }

    #[test]
    fn reassembles_reverse_order() {
        let parts: [&[u8]; 4] = [b"zero-", b"one-", b"two-", b"three"];
        let datagrams: Vec<Vec<u8>> = (0..4u8)
            .rev()
            .map(|n| source_fragment(42, 4, n, parts[n as usize]))
            .collect();

        let reassembled = reassemble(&datagrams, Engine::Source).unwrap();
        assert_eq!(reassembled.payload, b"zero-one-two-three");
        assert!(!reassembled.compressed);
    }

    #[test]
    fn reassembles_goldsource() {
        let datagrams = vec![
            goldsource_fragment(5, 2, 1, b"world"),
            goldsource_fragment(5, 2, 0, b"hello "),
        ];
        let reassembled = reassemble(&datagrams, Engine::GoldSource).unwrap();
        assert_eq!(reassembled.payload, b"hello world");
    }

    #[test]
    fn rejects_duplicate_fragment() {
        let datagrams = vec![
            source_fragment(42, 3, 1, b"a"),
            source_fragment(42, 3, 0, b"b"),
            source_fragment(42, 3, 1, b"c"),
        ];
        assert!(matches!(
            reassemble(&datagrams, Engine::Source),
            Err(SourceQueryError::DuplicateFragment(1))
        ));
    }

    #[test]
    fn rejects_out_of_range_fragment() {
        let datagrams = vec![
            source_fragment(42, 2, 0, b"a"),
            source_fragment(42, 2, 2, b"b"),
        ];
        assert!(matches!(
            reassemble(&datagrams, Engine::Source),
            Err(SourceQueryError::BadFragmentNumber { number: 2, total: 2 })
        ));
    }

    #[test]
    fn rejects_fragment_of_other_sequence() {
        let datagrams = vec![
            source_fragment(42, 2, 0, b"a"),
            source_fragment(43, 2, 1, b"b"),
        ];
        assert!(matches!(
            reassemble(&datagrams, Engine::Source),
            Err(SourceQueryError::SequenceMismatch {
                expected: 42,
                found: 43
            })
        ));
    }

    #[test]
    fn incomplete_sequence_has_no_payload() {
        let first = Fragment::decode(&source_fragment(1, 2, 0, b"a"), Engine::Source).unwrap();
        let reassembler = Reassembler::new(first).unwrap();
        assert!(!reassembler.is_complete());
        assert!(matches!(
            reassembler.finish(),
            Err(SourceQueryError::IncompleteResponse {
                received: 1,
                total: 2
            })
        ));
    }

    #[test]
    fn compression_flag_comes_from_first_fragment() {
        let body = b"\xFF\xFF\xFF\xFF\x45\x01\x00key\0value\0".repeat(20);
        let compressed = compress(&body);
        let (head, tail) = compressed.split_at(compressed.len() / 2);
        let datagrams = vec![
            source_fragment(0x8000_0001, 2, 1, tail),
            source_fragment(0x8000_0001, 2, 0, head),
        ];

        let reassembled = reassemble(&datagrams, Engine::Source).unwrap();
        assert!(reassembled.compressed);
        assert_eq!(reassembled.into_data().unwrap(), body);
    }

    #[test]
    fn checksum_mismatch_is_fatal() {
        let mut data = compress(b"some rules data");
        data[4] ^= 0xFF;
        assert!(matches!(
            decompress(&data),
            Err(SourceQueryError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn size_mismatch_is_fatal() {
        let mut data = compress(b"some rules data");
        data[0] += 1;
        assert!(matches!(
            decompress(&data),
            Err(SourceQueryError::DecompressedSizeMismatch {
                actual: 15,
                ..
            })
        ));

        let mut data = compress(b"some rules data");
        data[0] -= 1;
        assert!(matches!(
            decompress(&data),
            Err(SourceQueryError::DecompressedSizeMismatch { .. })
        ));
    }

    #[test]
    fn oversized_declaration_fails_before_decompressing() {
        let mut data = Vec::new();
        data.extend_from_slice(&(MAX_DECOMPRESSED_SIZE + 1).to_le_bytes());
        assert!(matches!(
            decompress(&data),
            Err(SourceQueryError::DecompressedTooLarge(n)) if n == MAX_DECOMPRESSED_SIZE + 1
        ));
    }

    #[test]
    fn garbage_stream_is_an_error() {
        let mut data = Vec::new();
        data.extend_from_slice(&4u32.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(b"not bzip2");
        assert!(matches!(
            decompress(&data),
            Err(SourceQueryError::Decompression(_))
        ));
    }
}
