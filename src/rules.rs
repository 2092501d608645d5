use std::collections::HashMap;

use log::warn;

use crate::error::Result;
use crate::packet::{expect_single, PacketType};
use crate::parse::PacketReader;

/// Server cvars as returned by A2S_RULES.
pub type Rules = HashMap<String, String>;

/// Parse a complete A2S_RULES reply (reassembled and decompressed if needed),
/// header included.
///
/// Some servers cut the last pair off mid-string. Pairs are read until the
/// declared count is reached or a string runs off the end of the packet,
/// whichever comes first.
pub fn parse_rules(data: &[u8]) -> Result<Rules> {
    let mut r = PacketReader::new(data);
    expect_single(&mut r)?;
    PacketType::expect(&mut r, PacketType::Rules)?;

    let count = r.read_u16()?;
    let mut rules = Rules::with_capacity(count as usize);
    let read = read_pairs(&mut r, count, &mut rules);
    if read < count {
        warn!("rules reply truncated: {read} of {count} pairs");
    }

    Ok(rules)
}

/// Read up to `count` pairs into `rules`, returning how many were on the
/// wire. A repeated key overwrites the earlier value but still counts.
fn read_pairs(r: &mut PacketReader<'_>, count: u16, rules: &mut Rules) -> u16 {
    let mut read = 0;
    while read < count {
        let Some(key) = r.try_read_string() else {
            break;
        };
        let Some(value) = r.try_read_string() else {
            break;
        };
        rules.insert(key, value);
        read += 1;
    }
    read
}
