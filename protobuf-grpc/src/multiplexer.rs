//! The seam between a [`TransportChannel`](crate::TransportChannel) and the
//! library that actually moves bytes.
//!
//! A multiplexer drives many concurrent transfers over shared HTTP/2
//! connections and reports which ones finished. Transfers are identified by
//! the channel's [`HandleId`]s; the multiplexer owns whatever native transfer
//! objects back them and may reuse them across calls on the same id.

use std::fmt;
use std::time::Duration;

/// Stable index of a transport handle in a channel's pool.
pub type HandleId = usize;

/// Everything needed to start one POST transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub url: String,
    pub body: Vec<u8>,
    /// Fully merged `Name: value` header lines, in send order.
    pub headers: Vec<String>,
    pub call_timeout: Duration,
    pub connect_timeout: Duration,
}

/// A failed transfer or multiplexer operation, carrying the native error code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} (code {errno})")]
pub struct TransportFailure {
    pub errno: i32,
    pub message: String,
}

/// Connection facts gathered after a transfer, used in diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferDetails {
    /// HTTP status; zero when no response line was received.
    pub http_code: u32,
    pub local_ip: Option<String>,
    pub local_port: u16,
    pub remote_ip: Option<String>,
    pub remote_port: u16,
}

impl fmt::Display for TransferDetails {
    /// `http_code = N; local address: ip:port; remote address: ip:port; `,
    /// omitting each part whose facts are all unknown.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.http_code != 0 {
            write!(f, "http_code = {}; ", self.http_code)?;
        }
        write_address(f, "local", self.local_ip.as_deref(), self.local_port)?;
        write_address(f, "remote", self.remote_ip.as_deref(), self.remote_port)
    }
}

fn write_address(
    f: &mut fmt::Formatter<'_>,
    side: &str,
    ip: Option<&str>,
    port: u16,
) -> fmt::Result {
    let ip = ip.filter(|ip| !ip.is_empty());
    if ip.is_none() && port == 0 {
        return Ok(());
    }
    write!(f, "{side} address: {}:", ip.unwrap_or("unknown"))?;
    if port == 0 {
        write!(f, "unknown; ")
    } else {
        write!(f, "{port}; ")
    }
}

/// What a detached transfer left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    /// Response body collected so far.
    pub body: Vec<u8>,
    /// Final transfer result; `Ok` also when the transfer never reported one.
    pub result: Result<(), TransportFailure>,
    pub details: TransferDetails,
}

/// A driver for concurrent transfers keyed by [`HandleId`].
pub trait Multiplexer {
    /// Configure the transfer for `id` from `request` and attach it.
    fn add(&mut self, id: HandleId, request: TransferRequest) -> Result<(), TransportFailure>;

    /// Run one non-blocking drive step. Returns the number of transfers still running.
    fn perform(&mut self) -> Result<usize, TransportFailure>;

    /// Drain the ids of transfers that finished since the last call.
    fn completions(&mut self) -> Vec<HandleId>;

    /// Block until there is socket activity or `timeout` elapses.
    fn wait(&mut self, timeout: Duration) -> Result<(), TransportFailure>;

    /// Request body bytes uploaded so far for `id`.
    fn bytes_sent(&self, id: HandleId) -> u64;

    /// Detach the transfer for `id`, returning its body, result and connection
    /// details, and reset it for reuse.
    fn remove(&mut self, id: HandleId) -> TransferOutcome;
}
