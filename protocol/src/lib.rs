//! Shared data model and the legacy probe protocol codec
//!
//! Everything here is synchronous and allocation-light so it can be used
//! from the query session, the scraper and tests alike. The wire format is
//! fixed: little-endian framing over UDP, one request per datagram, one
//! response per datagram.

pub mod codec;

pub use codec::{
    decode_info, decode_players, decode_rules, verify_ping, DecodeError, Info, Opcode, Request,
    HEADER_LEN, MAGIC,
};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Largest max-players value a real server is believed to report
pub const MAX_PLAYERS_CEILING: u16 = 1000;

/// Language label used when a server reports an empty one
pub const UNKNOWN_LANGUAGE: &str = "-";

/// Rule name to rule value, rebuilt from scratch on every probe
pub type RuleSet = HashMap<String, String>;

/// Liveness and info snapshot of a server at one point in time
///
/// The short serialized keys keep listing payloads small, a listing can
/// carry hundreds of these.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerCore {
    #[serde(rename = "ip")]
    pub address: String,
    #[serde(rename = "hn")]
    pub hostname: String,
    #[serde(rename = "pc")]
    pub players: u16,
    #[serde(rename = "pm")]
    pub max_players: u16,
    #[serde(rename = "gm")]
    pub gamemode: String,
    #[serde(rename = "la")]
    pub language: String,
    #[serde(rename = "pa")]
    pub password: bool,
    #[serde(rename = "vn")]
    pub version: String,
}

/// Reasons a decoded server is rejected even though its bytes parsed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Implausible {
    #[error("player count {players} exceeds max players {max_players}")]
    Overfull { players: u16, max_players: u16 },
    #[error("max players {0} exceeds ceiling of 1000")]
    Capacity(u16),
}

impl ServerCore {
    /// Rejects occupancy or capacity figures no real server would report
    pub fn check_plausible(&self) -> Result<(), Implausible> {
        if self.players > self.max_players {
            return Err(Implausible::Overfull {
                players: self.players,
                max_players: self.max_players,
            });
        }
        if self.max_players > MAX_PLAYERS_CEILING {
            return Err(Implausible::Capacity(self.max_players));
        }
        Ok(())
    }
}

/// The record kept by the registry
///
/// Only `ip`, `core` and `rules` come out of a probe, the remaining fields
/// belong to whoever stores the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub ip: String,
    pub core: ServerCore,
    #[serde(rename = "ru", default)]
    pub rules: RuleSet,
    pub description: String,
    pub banner: String,
    pub active: bool,
}

impl Server {
    /// Builds a fresh record from probe results, registry fields left blank
    pub fn from_probe(ip: String, mut core: ServerCore, rules: RuleSet) -> Self {
        if let Some(version) = rules.get("version") {
            core.version = version.clone();
        }
        Self {
            ip,
            core,
            rules,
            description: String::new(),
            banner: String::new(),
            active: true,
        }
    }

    pub fn address(&self) -> &str {
        &self.core.address
    }
}
