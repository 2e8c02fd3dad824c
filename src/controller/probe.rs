//! Protocol probes against the provisioned probe servers
//!
//! TCP and UDP send one line and expect one line back; HTTP issues a GET
//! through the Ingress host. [`probe_with_retry`] bounds the attempts.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, warn};

use super::protocol::{Exchange, ProtocolDescriptor, Transport};
use crate::config::Timings;
use crate::error::{Error, Result};

/// Largest reply we expect from a probe server
const MAX_REPLY: usize = 1024;

/// Where a probe is sent
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeTarget {
    pub host: String,
    pub port: u16,
}

impl ProbeTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for ProbeTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Result of a single probe attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success,
    /// Could not reach the server or send the request
    ConnectError(String),
    /// Reached the server but the answer was wrong or missing
    ProtocolError(String),
}

impl ProbeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProbeOutcome::Success)
    }

    /// Human-readable reason, empty on success
    pub fn detail(&self) -> String {
        match self {
            ProbeOutcome::Success => String::new(),
            ProbeOutcome::ConnectError(e) => format!("connection failed: {e}"),
            ProbeOutcome::ProtocolError(e) => format!("unexpected response: {e}"),
        }
    }
}

#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, descriptor: &ProtocolDescriptor, target: &ProbeTarget) -> ProbeOutcome;
}

/// [`Prober`] that talks to the probe servers over the network
pub struct NetworkProber {
    http: Client,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl NetworkProber {
    pub fn new(timings: &Timings) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(timings.connect_timeout)
            .timeout(timings.http_timeout)
            .user_agent(concat!("coastie-operator/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(Error::HttpError)?;

        Ok(Self {
            http,
            connect_timeout: timings.connect_timeout,
            read_timeout: timings.read_timeout,
        })
    }

    async fn probe_tcp(&self, target: &ProbeTarget, request: &[u8], reply: &[u8]) -> ProbeOutcome {
        let addr = (target.host.as_str(), target.port);
        let mut stream = match timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return ProbeOutcome::ConnectError(e.to_string()),
            Err(_) => return ProbeOutcome::ConnectError("connect timed out".to_string()),
        };

        if let Err(e) = stream.write_all(request).await {
            return ProbeOutcome::ConnectError(format!("write failed: {e}"));
        }

        let mut reader = BufReader::new(stream.take(MAX_REPLY as u64));
        let mut line = Vec::with_capacity(reply.len());
        match timeout(self.read_timeout, reader.read_until(b'\n', &mut line)).await {
            Ok(Ok(0)) => ProbeOutcome::ProtocolError("connection closed before reply".to_string()),
            Ok(Ok(_)) => compare_reply(&line, reply),
            Ok(Err(e)) => ProbeOutcome::ProtocolError(format!("read failed: {e}")),
            Err(_) => ProbeOutcome::ProtocolError("read timed out".to_string()),
        }
    }

    async fn probe_udp(&self, target: &ProbeTarget, request: &[u8], reply: &[u8]) -> ProbeOutcome {
        let addr = match resolve(target).await {
            Ok(addr) => addr,
            Err(e) => return ProbeOutcome::ConnectError(e),
        };

        let bind = if addr.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        };
        let socket = match UdpSocket::bind(bind).await {
            Ok(socket) => socket,
            Err(e) => return ProbeOutcome::ConnectError(format!("bind failed: {e}")),
        };
        if let Err(e) = socket.connect(addr).await {
            return ProbeOutcome::ConnectError(e.to_string());
        }
        if let Err(e) = socket.send(request).await {
            return ProbeOutcome::ConnectError(format!("send failed: {e}"));
        }

        let mut buf = [0u8; MAX_REPLY];
        match timeout(self.read_timeout, socket.recv(&mut buf)).await {
            Ok(Ok(n)) => {
                let datagram = &buf[..n];
                let line = match datagram.iter().position(|b| *b == b'\n') {
                    Some(end) => &datagram[..=end],
                    None => datagram,
                };
                compare_reply(line, reply)
            }
            Ok(Err(e)) => ProbeOutcome::ProtocolError(format!("read failed: {e}")),
            Err(_) => ProbeOutcome::ProtocolError("read timed out".to_string()),
        }
    }

    async fn probe_http(&self, target: &ProbeTarget, path: &str, expected: u16) -> ProbeOutcome {
        let url = if target.port == 80 {
            format!("http://{}{}", target.host, path)
        } else {
            format!("http://{}:{}{}", target.host, target.port, path)
        };
        debug!("GET {}", url);

        match self.http.get(&url).send().await {
            Ok(resp) if resp.status().as_u16() == expected => ProbeOutcome::Success,
            Ok(resp) => ProbeOutcome::ProtocolError(format!("{url} returned HTTP {}", resp.status())),
            Err(e) => ProbeOutcome::ConnectError(e.to_string()),
        }
    }
}

#[async_trait]
impl Prober for NetworkProber {
    async fn probe(&self, descriptor: &ProtocolDescriptor, target: &ProbeTarget) -> ProbeOutcome {
        match (descriptor.exchange, descriptor.transport) {
            (Exchange::Line { request, reply }, Transport::Tcp) => {
                self.probe_tcp(target, request, reply).await
            }
            (Exchange::Line { request, reply }, Transport::Udp) => {
                self.probe_udp(target, request, reply).await
            }
            (Exchange::HttpGet { path, status }, _) => self.probe_http(target, path, status).await,
        }
    }
}

async fn resolve(target: &ProbeTarget) -> std::result::Result<SocketAddr, String> {
    let mut addrs = lookup_host((target.host.as_str(), target.port))
        .await
        .map_err(|e| format!("cannot resolve {target}: {e}"))?;
    addrs
        .next()
        .ok_or_else(|| format!("no address for {target}"))
}

fn compare_reply(got: &[u8], expected: &[u8]) -> ProbeOutcome {
    if got == expected {
        ProbeOutcome::Success
    } else {
        ProbeOutcome::ProtocolError(format!(
            "expected {:?}, got {:?}",
            String::from_utf8_lossy(expected),
            String::from_utf8_lossy(got)
        ))
    }
}

/// Probe until success or `timings.probe_attempts` attempts have been made
///
/// Returns the last outcome and how many attempts it took.
pub async fn probe_with_retry(
    prober: &dyn Prober,
    descriptor: &ProtocolDescriptor,
    target: &ProbeTarget,
    timings: &Timings,
) -> (ProbeOutcome, u32) {
    let attempts = timings.probe_attempts.max(1);
    let mut outcome = ProbeOutcome::ConnectError("not attempted".to_string());

    for attempt in 1..=attempts {
        outcome = prober.probe(descriptor, target).await;
        if outcome.is_success() {
            debug!("{} probe to {} succeeded on attempt {}", descriptor.protocol, target, attempt);
            return (outcome, attempt);
        }
        warn!(
            "{} probe to {} failed (attempt {}/{}): {}",
            descriptor.protocol,
            target,
            attempt,
            attempts,
            outcome.detail()
        );
        if attempt < attempts {
            tokio::time::sleep(timings.probe_backoff).await;
        }
    }

    (outcome, attempts)
}
