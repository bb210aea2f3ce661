//! # Game Server Query Library
//!
//! Client side of the legacy probe protocol. A [`Session`] owns one UDP
//! socket connected to one server and performs request/response exchanges
//! over it; [`get_server_info`] wraps a full probe (ping, info, rules) under
//! a single deadline and returns a populated [`protocol::Server`].
//!
//! ## Failure modes
//!
//! - **Timeout**: no answer before the deadline, the expected failure for a
//!   server that is offline.
//! - **Malformed**: a response that does not decode; nothing from it is kept.
//! - **Resolve**: the address never yields an IPv4 socket address.
//! - **Io**: the socket itself failed, e.g. an ICMP port unreachable.
//!
//! Plausibility of the decoded numbers is left to the caller.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = query::get_server_info("127.0.0.1:7777", Duration::from_secs(5)).await?;
//!     println!("{} ({}/{})", server.core.hostname, server.core.players, server.core.max_players);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod network;

pub use error::QueryError;
pub use network::{get_server_info, Session};
