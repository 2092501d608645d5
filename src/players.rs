use crate::error::Result;
use crate::packet::{expect_single, PacketType};
use crate::parse::PacketReader;

/// One entry of an A2S_PLAYER reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    /// Slot in the reply. Not a stable player id, most servers send 0 for everyone.
    pub index: u8,
    pub name: String,
    pub score: i32,
    /// Seconds connected
    pub duration: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerList {
    /// Player count as declared by the server
    pub count: u8,
    /// Players in wire order
    pub players: Vec<Player>,
}

impl PlayerList {
    /// Parse a complete A2S_PLAYER reply, header included.
    pub fn parse(data: &[u8]) -> Result<PlayerList> {
        let mut r = PacketReader::new(data);
        expect_single(&mut r)?;
        PacketType::expect(&mut r, PacketType::Players)?;

        let count = r.read_u8()?;
        let mut players = Vec::with_capacity(count as usize);
        for _ in 0..count {
            players.push(Player {
                index: r.read_u8()?,
                name: r.read_string()?,
                score: r.read_i32()?,
                duration: r.read_f32()?,
            });
        }

        Ok(PlayerList { count, players })
    }
}
