//! Query session: one UDP socket talking to one game server

use crate::error::QueryError;
use log::{debug, warn};
use protocol::{
    decode_info, decode_players, decode_rules, verify_ping, Info, Opcode, Request, RuleSet,
    Server, HEADER_LEN,
};
use std::net::{SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::{timeout_at, Instant};

/// Largest response datagram accepted from a server
const RECV_BUFFER: usize = 2048;

/// A socket connected to a single server
///
/// Every exchange sends one request and waits for the matching response.
/// The socket is reused across exchanges so a server sees one source port
/// for a whole probe.
#[derive(Debug)]
pub struct Session {
    socket: UdpSocket,
    address: String,
    target: SocketAddrV4,
}

impl Session {
    /// Resolves `host:port` and connects an ephemeral socket to it
    pub async fn connect(address: &str) -> Result<Self, QueryError> {
        let target = resolve(address).await?;

        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(SocketAddr::V4(target)).await?;
        debug!("Session for {} dialing {}", address, target);

        Ok(Session {
            socket,
            address: address.to_string(),
            target,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn target(&self) -> SocketAddrV4 {
        self.target
    }

    /// Sends a request and waits for a response carrying the same opcode
    ///
    /// Datagrams for other opcodes (late answers to an earlier exchange)
    /// are dropped and the wait continues until `deadline`.
    async fn exchange(&self, request: &Request, deadline: Instant) -> Result<Vec<u8>, QueryError> {
        let data = request.encode();
        let opcode = request.opcode().as_byte();

        let result = timeout_at(deadline, async {
            self.socket.send(&data).await?;

            let mut buffer = [0u8; RECV_BUFFER];
            loop {
                let len = self.socket.recv(&mut buffer).await?;
                if len >= HEADER_LEN && buffer[HEADER_LEN - 1] != opcode {
                    debug!(
                        "Dropping stale {:#04x} response from {}",
                        buffer[HEADER_LEN - 1],
                        self.address
                    );
                    continue;
                }
                return Ok::<Vec<u8>, std::io::Error>(buffer[..len].to_vec());
            }
        })
        .await;

        match result {
            Ok(response) => Ok(response?),
            Err(_) => Err(QueryError::Timeout),
        }
    }

    /// Liveness check; returns the round trip time
    pub async fn ping(&self, deadline: Instant) -> Result<Duration, QueryError> {
        let request = Request::new(self.target, Opcode::Ping);
        let sent = Instant::now();
        let response = self.exchange(&request, deadline).await?;
        let rtt = sent.elapsed();

        if let Some(token) = request.token() {
            verify_ping(&response, token)?;
        }
        Ok(rtt)
    }

    pub async fn info(&self, deadline: Instant) -> Result<Info, QueryError> {
        let request = Request::new(self.target, Opcode::Info);
        let response = self.exchange(&request, deadline).await?;
        Ok(decode_info(&response)?)
    }

    pub async fn rules(&self, deadline: Instant) -> Result<RuleSet, QueryError> {
        let request = Request::new(self.target, Opcode::Rules);
        let response = self.exchange(&request, deadline).await?;
        Ok(decode_rules(&response)?)
    }

    pub async fn players(&self, deadline: Instant) -> Result<Vec<String>, QueryError> {
        let request = Request::new(self.target, Opcode::Players);
        let response = self.exchange(&request, deadline).await?;
        Ok(decode_players(&response)?)
    }

    /// Runs ping, info and rules in order, stopping at the first failure
    pub async fn probe(&self, deadline: Instant) -> Result<Server, QueryError> {
        let rtt = self.ping(deadline).await?;
        debug!("{} answered ping in {:?}", self.address, rtt);

        let core = self.info(deadline).await?.into_core(self.address.as_str());
        let rules = self.rules(deadline).await?;

        Ok(Server::from_probe(self.target.ip().to_string(), core, rules))
    }
}

async fn resolve(address: &str) -> Result<SocketAddrV4, QueryError> {
    let resolved = lookup_host(address)
        .await
        .map_err(|e| QueryError::Resolve {
            address: address.to_string(),
            reason: e.to_string(),
        })?;

    resolved
        .filter_map(|addr| match addr {
            SocketAddr::V4(v4) => Some(v4),
            SocketAddr::V6(_) => None,
        })
        .next()
        .ok_or_else(|| QueryError::Resolve {
            address: address.to_string(),
            reason: "no IPv4 address".to_string(),
        })
}

/// Probes `address` once, bounded as a whole by `timeout`
///
/// The returned server carries the dialed address, never one reported by
/// the server itself, and its version is copied from the `version` rule.
pub async fn get_server_info(address: &str, timeout: Duration) -> Result<Server, QueryError> {
    let deadline = Instant::now() + timeout;

    let session = match timeout_at(deadline, Session::connect(address)).await {
        Ok(session) => session?,
        Err(_) => return Err(QueryError::Timeout),
    };

    session.probe(deadline).await.map_err(|e| {
        if !e.is_timeout() {
            warn!("Query of {} failed: {}", address, e);
        }
        e
    })
}
