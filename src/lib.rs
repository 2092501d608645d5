//! Pure Rust async implementation of the [Source Query Protocol](https://developer.valvesoftware.com/wiki/Server_queries):
//! A2S_INFO, A2S_PLAYER and A2S_RULES, including split and bzip2-compressed replies.
pub mod error;
pub mod info;
pub mod multipacket;
pub mod packet;
pub mod parse;
pub mod players;
pub mod query;
pub mod rules;
pub mod transport;

pub use error::{Result, SourceQueryError};
pub use info::{Engine, ServerInfo};
pub use players::{Player, PlayerList};
pub use query::{query, Client};
pub use rules::Rules;
pub use transport::{ClientConfig, Transport, UdpTransport};
