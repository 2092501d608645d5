use std::fmt;
use std::net::SocketAddr;

use log::trace;

use crate::error::{Result, SourceQueryError};
use crate::packet::{expect_single, PacketType};
use crate::parse::PacketReader;

/// App id of The Ship, whose info reply carries three extra bytes.
pub const APP_THE_SHIP: u32 = 2400;

/// App ids below this belong to GoldSource titles.
pub const GOLDSOURCE_APP_ID_LIMIT: u32 = 80;

const EDF_PORT: u8 = 0x80;
const EDF_STEAM_ID: u8 = 0x10;
const EDF_SOURCE_TV: u8 = 0x40;
const EDF_KEYWORDS: u8 = 0x20;
const EDF_GAME_ID: u8 = 0x01;

/// Which A2S_INFO reply layout the server answered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoVersion {
    /// S2A_INFO_GOLDSRC (`0x6D`)
    GoldSource,
    /// S2A_INFO_SRC (`0x49`)
    Source,
}

/// Engine generation, as guessed by [ServerInfo::engine].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    GoldSource,
    Source,
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Engine::GoldSource => f.write_str("GoldSource"),
            Engine::Source => f.write_str("Source"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerType {
    Dedicated,
    NonDedicated,
    /// SourceTV relay (proxy)
    SourceTv,
    Unknown,
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerType::Dedicated => f.write_str("Dedicated"),
            ServerType::NonDedicated => f.write_str("NonDedicated"),
            ServerType::SourceTv => f.write_str("SourceTV"),
            ServerType::Unknown => f.write_str("Unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerOs {
    Linux,
    Windows,
    Mac,
    Unknown,
}

impl From<u8> for ServerOs {
    fn from(c: u8) -> Self {
        match c {
            b'l' => ServerOs::Linux,
            b'w' => ServerOs::Windows,
            b'm' => ServerOs::Mac,
            _ => ServerOs::Unknown,
        }
    }
}

impl fmt::Display for ServerOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerOs::Linux => f.write_str("Linux"),
            ServerOs::Windows => f.write_str("Windows"),
            ServerOs::Mac => f.write_str("Mac"),
            ServerOs::Unknown => f.write_str("Unknown"),
        }
    }
}

/// Mod information sent by GoldSource servers running a mod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModInfo {
    pub url: String,
    pub download_url: String,
    pub version: u32,
    /// Mod size in bytes
    pub size: u32,
    /// 0 for single and multiplayer, 1 for multiplayer only
    pub mod_type: u8,
    /// 0 if the mod uses the Half-Life DLL, 1 if it ships its own
    pub dll: u8,
}

/// Extra fields only sent by The Ship servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TheShip {
    pub mode: u8,
    pub witnesses: u8,
    /// Seconds before a player is arrested while witnessed
    pub duration: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTv {
    pub port: u16,
    pub name: String,
}

/// Fields only present in the Source reply. Everything behind an extra data
/// flag is `None` unless the flag was set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extended {
    /// Steam app id. Widened to 32 bits when the server sends its game id.
    pub app_id: u32,
    pub game_version: String,
    pub port: Option<u16>,
    pub steam_id: Option<u64>,
    pub game_mode_description: Option<String>,
    /// Full 64-bit game id. Bits 0-23 are the app id, 24-31 the type and
    /// 32-63 the mod id.
    pub game_id: Option<u64>,
}

/// Server information as obtained by an A2S_INFO query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub version: InfoVersion,
    /// Address the reply came from. Filled in by the client, never by the
    /// decoders.
    pub address: Option<SocketAddr>,
    /// A2S_INFO protocol version
    pub protocol: u8,
    /// Server hostname
    pub name: String,
    /// Current map
    pub map: String,
    /// Location of server files
    pub folder: String,
    /// Name of game
    pub game: String,
    pub players: u8,
    pub max_players: u8,
    pub bots: u8,
    pub server_type: ServerType,
    pub server_os: ServerOs,
    pub password_protected: bool,
    pub vac_enabled: bool,
    pub mod_info: Option<ModInfo>,
    pub the_ship: Option<TheShip>,
    pub source_tv: Option<SourceTv>,
    pub extended: Option<Extended>,
}

impl ServerInfo {
    /// Parse a complete single-packet A2S_INFO reply, header included.
    pub fn parse(data: &[u8]) -> Result<ServerInfo> {
        let mut r = PacketReader::new(data);
        expect_single(&mut r)?;

        let version = r.read_u8()?;
        trace!("decoding A2S_INFO reply {version:#04x}, {} bytes", data.len());
        match PacketType::try_from(version) {
            Ok(PacketType::InfoGoldSource) => Self::parse_goldsource(&mut r),
            Ok(PacketType::InfoSource) => Self::parse_source(&mut r),
            _ => Err(SourceQueryError::UnknownInfoVersion(version)),
        }
    }

    /// Decode the body of an S2A_INFO_GOLDSRC reply.
    pub fn parse_goldsource(r: &mut PacketReader) -> Result<ServerInfo> {
        // the server repeats its own address, the socket already knows it
        r.read_string()?;
        let name = r.read_string()?;
        let map = r.read_string()?;
        let folder = r.read_string()?;
        let game = r.read_string()?;
        let players = r.read_u8()?;
        let max_players = r.read_u8()?;
        let protocol = r.read_u8()?;

        // GoldSource swaps the meaning of 'l' and 'd' relative to Source
        let server_type = match r.read_u8()? {
            b'l' => ServerType::NonDedicated,
            b'd' => ServerType::Dedicated,
            b'p' => ServerType::SourceTv,
            _ => ServerType::Unknown,
        };
        let server_os = ServerOs::from(r.read_u8()?);
        let password_protected = r.read_u8()? != 0;

        let mod_info = if r.read_u8()? == 1 {
            let url = r.read_string()?;
            let download_url = r.read_string()?;
            r.read_u8()?;
            Some(ModInfo {
                url,
                download_url,
                version: r.read_u32()?,
                size: r.read_u32()?,
                mod_type: r.read_u8()?,
                dll: r.read_u8()?,
            })
        } else {
            None
        };

        let vac_enabled = r.read_u8()? != 0;
        let bots = r.read_u8()?;

        Ok(ServerInfo {
            version: InfoVersion::GoldSource,
            address: None,
            protocol,
            name,
            map,
            folder,
            game,
            players,
            max_players,
            bots,
            server_type,
            server_os,
            password_protected,
            vac_enabled,
            mod_info,
            the_ship: None,
            source_tv: None,
            extended: None,
        })
    }

    /// Decode the body of an S2A_INFO_SRC reply.
    pub fn parse_source(r: &mut PacketReader) -> Result<ServerInfo> {
        let protocol = r.read_u8()?;
        let name = r.read_string()?;
        let map = r.read_string()?;
        let folder = r.read_string()?;
        let game = r.read_string()?;
        let app_id = u32::from(r.read_u16()?);
        let players = r.read_u8()?;
        let max_players = r.read_u8()?;
        let bots = r.read_u8()?;

        let server_type = match r.read_u8()? {
            b'l' => ServerType::Dedicated,
            b'd' => ServerType::NonDedicated,
            b'p' => ServerType::SourceTv,
            _ => ServerType::Unknown,
        };
        let server_os = ServerOs::from(r.read_u8()?);
        let password_protected = r.read_u8()? != 0;
        let vac_enabled = r.read_u8()? != 0;

        let the_ship = if app_id == APP_THE_SHIP {
            Some(TheShip {
                mode: r.read_u8()?,
                witnesses: r.read_u8()?,
                duration: r.read_u8()?,
            })
        } else {
            None
        };

        let mut extended = Extended {
            app_id,
            game_version: r.read_string()?,
            port: None,
            steam_id: None,
            game_mode_description: None,
            game_id: None,
        };
        let mut source_tv = None;

        if r.has_remaining() {
            let edf = r.read_u8()?;
            if edf & EDF_PORT != 0 {
                extended.port = Some(r.read_u16()?);
            }
            if edf & EDF_STEAM_ID != 0 {
                extended.steam_id = Some(r.read_u64()?);
            }
            if edf & EDF_SOURCE_TV != 0 {
                source_tv = Some(SourceTv {
                    port: r.read_u16()?,
                    name: r.read_string()?,
                });
            }
            if edf & EDF_KEYWORDS != 0 {
                extended.game_mode_description = Some(r.read_string()?);
            }
            if edf & EDF_GAME_ID != 0 && r.can_read(8) {
                let game_id = r.read_u64()?;
                extended.game_id = Some(game_id);
                // the 16-bit app id may have been truncated
                extended.app_id = (game_id & 0xFFFF_FFFF) as u32;
            }
        }

        Ok(ServerInfo {
            version: InfoVersion::Source,
            address: None,
            protocol,
            name,
            map,
            folder,
            game,
            players,
            max_players,
            bots,
            server_type,
            server_os,
            password_protected,
            vac_enabled,
            mod_info: None,
            the_ship,
            source_tv,
            extended: Some(extended),
        })
    }

    /// Guess the engine generation of the server.
    ///
    /// This is a heuristic, the protocol does not declare it. Split packet
    /// headers differ between the two, so reassembly depends on this.
    pub fn engine(&self) -> Engine {
        match (&self.version, &self.extended) {
            (InfoVersion::GoldSource, _) | (_, None) => Engine::GoldSource,
            (_, Some(ext)) if ext.app_id < GOLDSOURCE_APP_ID_LIMIT => Engine::GoldSource,
            _ => Engine::Source,
        }
    }
}
