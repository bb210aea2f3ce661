//! Legacy probe protocol framing
//!
//! Every request is an 11 byte header (magic, target IPv4, target port low
//! byte then high byte, opcode) optionally followed by a payload. Servers
//! echo the same header back before their own payload. All multi-byte
//! integers are little-endian.

use crate::{RuleSet, ServerCore, UNKNOWN_LANGUAGE};
use chardetng::EncodingDetector;
use encoding_rs::Encoding;
use std::net::SocketAddrV4;
use thiserror::Error;

pub const MAGIC: &[u8; 4] = b"SAMP";
pub const HEADER_LEN: usize = 11;

/// Query kinds understood by the legacy protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Ping = b'p',
    Info = b'i',
    Rules = b'r',
    Players = b'c',
}

impl Opcode {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'p' => Some(Opcode::Ping),
            b'i' => Some(Opcode::Info),
            b'r' => Some(Opcode::Rules),
            b'c' => Some(Opcode::Players),
            _ => None,
        }
    }
}

/// Errors raised while taking a response datagram apart
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("response truncated: needed {needed} more bytes, {remaining} left")]
    Truncated { needed: usize, remaining: usize },
    #[error("response does not start with the protocol magic")]
    BadMagic,
    #[error("response opcode {found:#04x} does not match request opcode {expected:#04x}")]
    UnexpectedOpcode { expected: u8, found: u8 },
    #[error("ping response did not echo the request token")]
    TokenMismatch,
}

/// A single query datagram addressed to one server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    target: SocketAddrV4,
    opcode: Opcode,
    token: Option<[u8; 4]>,
}

impl Request {
    /// Creates a request; pings get a fresh random echo token
    pub fn new(target: SocketAddrV4, opcode: Opcode) -> Self {
        let token = match opcode {
            Opcode::Ping => Some(rand::random::<[u8; 4]>()),
            _ => None,
        };
        Self {
            target,
            opcode,
            token,
        }
    }

    /// Creates a ping with a caller-chosen token
    pub fn ping_with_token(target: SocketAddrV4, token: [u8; 4]) -> Self {
        Self {
            target,
            opcode: Opcode::Ping,
            token: Some(token),
        }
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn token(&self) -> Option<[u8; 4]> {
        self.token
    }

    pub fn header(&self) -> [u8; HEADER_LEN] {
        let ip = self.target.ip().octets();
        let port = self.target.port();

        let mut header = [0u8; HEADER_LEN];
        header[..4].copy_from_slice(MAGIC);
        header[4..8].copy_from_slice(&ip);
        header[8] = (port & 0xFF) as u8;
        header[9] = (port >> 8) as u8;
        header[10] = self.opcode.as_byte();
        header
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(HEADER_LEN + 4);
        data.extend_from_slice(&self.header());
        if let Some(token) = self.token {
            data.extend_from_slice(&token);
        }
        data
    }
}

/// Bounds-checked little-endian reader over a response buffer
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::Truncated {
                needed: len,
                remaining: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn long_field(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    fn short_field(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.u8()? as usize;
        self.take(len)
    }
}

/// Checks the echoed header and positions a reader at the payload
fn payload(buf: &[u8], opcode: Opcode) -> Result<Reader<'_>, DecodeError> {
    let mut reader = Reader::new(buf);
    let header = reader.take(HEADER_LEN)?;
    if &header[..4] != MAGIC {
        return Err(DecodeError::BadMagic);
    }
    if header[10] != opcode.as_byte() {
        return Err(DecodeError::UnexpectedOpcode {
            expected: opcode.as_byte(),
            found: header[10],
        });
    }
    Ok(reader)
}

/// Turns legacy single-byte text into a `String`
///
/// UTF-8 input passes through untouched; anything else is mapped one byte
/// per character (Latin-1).
pub fn decode_text(raw: &[u8]) -> String {
    match std::str::from_utf8(raw) {
        Ok(text) => text.to_owned(),
        Err(_) => raw.iter().map(|&b| b as char).collect(),
    }
}

/// Guesses the legacy code page behind a sample of raw text
pub fn detect_encoding(sample: &[u8]) -> &'static Encoding {
    let mut detector = EncodingDetector::new();
    detector.feed(sample, true);
    detector.guess(None, true)
}

/// Decodes `raw` with a detected encoding, falling back to [`decode_text`]
/// when the bytes do not fit it
pub fn decode_text_as(raw: &[u8], encoding: &'static Encoding) -> String {
    if let Ok(text) = std::str::from_utf8(raw) {
        return text.to_owned();
    }
    let (text, malformed) = encoding.decode_without_bom_handling(raw);
    if malformed {
        decode_text(raw)
    } else {
        text.into_owned()
    }
}

/// Decoded payload of an info response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Info {
    pub password: bool,
    pub players: u16,
    pub max_players: u16,
    pub hostname: String,
    pub gamemode: String,
    pub language: String,
}

impl Info {
    /// Attaches the dialed address; the payload never carries one
    pub fn into_core(self, address: impl Into<String>) -> ServerCore {
        ServerCore {
            address: address.into(),
            hostname: self.hostname,
            players: self.players,
            max_players: self.max_players,
            gamemode: self.gamemode,
            language: self.language,
            password: self.password,
            version: String::new(),
        }
    }

    /// Builds the response a server would send for this info
    pub fn encode_response(&self, header: &[u8; HEADER_LEN]) -> Vec<u8> {
        let mut data = header.to_vec();
        data.push(u8::from(self.password));
        data.extend_from_slice(&self.players.to_le_bytes());
        data.extend_from_slice(&self.max_players.to_le_bytes());
        for field in [&self.hostname, &self.gamemode, &self.language] {
            data.extend_from_slice(&(field.len() as u32).to_le_bytes());
            data.extend_from_slice(field.as_bytes());
        }
        data
    }
}

pub fn verify_ping(buf: &[u8], token: [u8; 4]) -> Result<(), DecodeError> {
    let mut reader = payload(buf, Opcode::Ping)?;
    if reader.take(4)? != token {
        return Err(DecodeError::TokenMismatch);
    }
    Ok(())
}

pub fn decode_info(buf: &[u8]) -> Result<Info, DecodeError> {
    let mut reader = payload(buf, Opcode::Info)?;

    let password = reader.u8()? != 0;
    let players = reader.u16()?;
    let max_players = reader.u16()?;
    let hostname = reader.long_field()?;
    let gamemode = reader.long_field()?;
    let language = reader.long_field()?;

    // One guess for all three fields; short fields alone say too little
    let sample = [hostname, gamemode, language].concat();
    let encoding = detect_encoding(&sample);

    let hostname = decode_text_as(hostname, encoding);
    let gamemode = decode_text_as(gamemode, encoding);
    let language = if language.is_empty() {
        UNKNOWN_LANGUAGE.to_string()
    } else {
        decode_text_as(language, encoding)
    };

    Ok(Info {
        password,
        players,
        max_players,
        hostname,
        gamemode,
        language,
    })
}

pub fn decode_rules(buf: &[u8]) -> Result<RuleSet, DecodeError> {
    let mut reader = payload(buf, Opcode::Rules)?;
    let count = reader.u16()?;

    let mut rules = RuleSet::with_capacity(count as usize);
    for _ in 0..count {
        let key = decode_text(reader.short_field()?);
        let value = decode_text(reader.short_field()?);
        rules.insert(key, value);
    }
    Ok(rules)
}

/// Player names only; the trailing score of each entry is skipped
pub fn decode_players(buf: &[u8]) -> Result<Vec<String>, DecodeError> {
    let mut reader = payload(buf, Opcode::Players)?;
    let count = reader.u16()?;

    let mut players = Vec::with_capacity(count as usize);
    for _ in 0..count {
        players.push(decode_text(reader.short_field()?));
        reader.take(4)?;
    }
    Ok(players)
}

fn push_short_field(data: &mut Vec<u8>, field: &str) {
    let bytes = &field.as_bytes()[..field.len().min(u8::MAX as usize)];
    data.push(bytes.len() as u8);
    data.extend_from_slice(bytes);
}

pub fn encode_rules_response(header: &[u8; HEADER_LEN], rules: &RuleSet) -> Vec<u8> {
    let mut data = header.to_vec();
    data.extend_from_slice(&(rules.len() as u16).to_le_bytes());
    for (key, value) in rules {
        push_short_field(&mut data, key);
        push_short_field(&mut data, value);
    }
    data
}

pub fn encode_players_response(header: &[u8; HEADER_LEN], players: &[(String, i32)]) -> Vec<u8> {
    let mut data = header.to_vec();
    data.extend_from_slice(&(players.len() as u16).to_le_bytes());
    for (name, score) in players {
        push_short_field(&mut data, name);
        data.extend_from_slice(&score.to_le_bytes());
    }
    data
}
