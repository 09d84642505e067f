//! Multiplexed unary transport bound to one endpoint.
//!
//! A [`TransportChannel`] owns a [`Multiplexer`] and a pool of transport
//! handles. [`send_async`](TransportChannel::send_async) claims an idle handle
//! and attaches a POST transfer; [`get_result`](TransportChannel::get_result)
//! drives the multiplexer until that transfer finishes, caching completions
//! of other handles so a later collect on them returns without further I/O.
//!
//! The channel is single-threaded: share it through `Rc`, not across threads.

use std::cell::RefCell;
use std::time::Duration;

use bytes::Bytes;
use protocol_protobuf::frame::{self, FLAG_UNCOMPRESSED};
use tracing::{debug, warn};

use crate::config::ChannelConfig;
use crate::error::CallError;
use crate::multiplexer::{HandleId, Multiplexer, TransferOutcome, TransferRequest};
use crate::pool::HandlePool;

#[cfg(feature = "curl")]
use crate::libcurl::CurlMultiplexer;

/// Headers sent with every call unless the caller supplies the same name.
const DEFAULT_HEADERS: [(&str, &str); 2] = [
    ("Content-Type", "application/grpc+proto"),
    ("TE", "trailers"),
];

const INVALID_CHANNEL: &str = "Connection invalid; maybe, could not get proxy config?";

/// Token returned by [`TransportChannel::send_async`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingCall {
    /// The call occupies this handle until collected.
    Handle(HandleId),
    /// The channel is invalid; nothing was sent.
    InvalidChannel,
}

struct ChannelState<M> {
    mux: M,
    pool: HandlePool,
    /// Text of the most recent multiplexer-level failure, cleared by the next
    /// successful drive step.
    last_mux_error: Option<String>,
}

/// A pool of reusable transport handles multiplexed over one connection
/// multiplexer bound to one endpoint.
pub struct TransportChannel<M: Multiplexer> {
    endpoint: String,
    config: ChannelConfig,
    /// `None` for an invalid channel.
    state: Option<RefCell<ChannelState<M>>>,
}

#[cfg(feature = "curl")]
impl TransportChannel<CurlMultiplexer> {
    /// Channel to `endpoint` (e.g. `http://host:port`) with default timeouts.
    /// An empty endpoint yields an invalid channel.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_config(endpoint, ChannelConfig::default())
    }

    pub fn with_config(endpoint: impl Into<String>, config: ChannelConfig) -> Self {
        let endpoint = endpoint.into();
        if endpoint.is_empty() {
            return Self::invalid_with(config);
        }
        Self::with_multiplexer(endpoint, config, CurlMultiplexer::new())
    }
}

impl<M: Multiplexer> TransportChannel<M> {
    /// Channel to `endpoint` driven by `mux`. An empty endpoint yields an
    /// invalid channel and `mux` is dropped unused.
    pub fn with_multiplexer(endpoint: impl Into<String>, config: ChannelConfig, mux: M) -> Self {
        let endpoint = endpoint.into();
        if endpoint.is_empty() {
            return Self::invalid_with(config);
        }
        Self {
            endpoint,
            config,
            state: Some(RefCell::new(ChannelState {
                mux,
                pool: HandlePool::default(),
                last_mux_error: None,
            })),
        }
    }

    /// A placeholder channel on which every call fails with
    /// `bad_channel_usage` without attempting I/O.
    pub fn invalid() -> Self {
        Self::invalid_with(ChannelConfig::default())
    }

    fn invalid_with(config: ChannelConfig) -> Self {
        Self {
            endpoint: String::new(),
            config,
            state: None,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_valid(&self) -> bool {
        self.state.is_some()
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Number of transport handles created so far.
    pub fn pool_size(&self) -> usize {
        self.state.as_ref().map_or(0, |s| s.borrow().pool.len())
    }

    /// Number of calls sent but not yet collected.
    pub fn in_flight(&self) -> usize {
        self.state.as_ref().map_or(0, |s| s.borrow().pool.in_flight())
    }

    /// Start a POST of `payload` (already framed) to `endpoint + method`.
    ///
    /// Zero timeouts fall back to the channel defaults. With
    /// `try_immediately`, one drive step is run right away so small requests
    /// can go out before the caller blocks on [`get_result`](Self::get_result).
    pub fn send_async(
        &self,
        method: &str,
        payload: Vec<u8>,
        headers: &[(String, String)],
        call_timeout: Duration,
        connect_timeout: Duration,
        try_immediately: bool,
    ) -> PendingCall {
        let Some(state) = &self.state else {
            return PendingCall::InvalidChannel;
        };
        let mut state = state.borrow_mut();
        let state = &mut *state;

        let id = state.pool.acquire();
        let request = TransferRequest {
            url: format!("{}{}", self.endpoint, method),
            body: payload,
            headers: merge_headers(headers),
            call_timeout: self.config.call_timeout_or_default(call_timeout),
            connect_timeout: self.config.connect_timeout_or_default(connect_timeout),
        };
        debug!(endpoint = %self.endpoint, method, handle = id, "sending unary call");

        if let Err(failure) = state.mux.add(id, request) {
            warn!(
                endpoint = %self.endpoint,
                method,
                handle = id,
                errno = failure.errno,
                error = %failure.message,
                "failed to enqueue transfer"
            );
            if let Some(handle) = state.pool.get_mut(id) {
                handle.enqueue_failure = Some(failure);
            }
            return PendingCall::Handle(id);
        }

        if try_immediately {
            let active = state.perform();
            if active.is_some_and(|n| n > 0) && state.mux.bytes_sent(id) == 0 {
                // The wait may wake for another transfer; one more step is all we try.
                state.wait(self.config.select_timeout);
                state.perform();
            }
        }
        PendingCall::Handle(id)
    }

    /// Block until the call behind `pending` finishes and return the full
    /// framed response, prefix included.
    pub fn get_result(&self, pending: PendingCall) -> Result<Bytes, CallError> {
        let Some(state) = &self.state else {
            return Err(CallError::BadChannelUsage(INVALID_CHANNEL.to_string()));
        };
        let PendingCall::Handle(id) = pending else {
            return Err(CallError::BadChannelUsage(
                "Got unknown handle id=-1".to_string(),
            ));
        };
        let mut state = state.borrow_mut();
        let state = &mut *state;

        let Some(handle) = state.pool.get_mut(id) else {
            return Err(CallError::BadChannelUsage(format!(
                "Got unknown handle id={id}"
            )));
        };
        if !handle.in_progress {
            return Err(CallError::BadChannelUsage(format!(
                "Passed handle id={id} hasn't been started"
            )));
        }
        if let Some(failure) = handle.enqueue_failure.take() {
            state.pool.release(id);
            return Err(CallError::Transport {
                errno: failure.errno,
                message: transport_error_message(
                    Some(&failure.message),
                    state.last_mux_error.as_deref(),
                ),
            });
        }

        state.dispatch_until_ready(id, self.config.select_timeout);
        let outcome = state.mux.remove(id);
        state.pool.release(id);
        debug!(handle = id, bytes = outcome.body.len(), "unary call collected");

        validate_response(outcome, state.last_mux_error.as_deref())
    }
}

impl<M: Multiplexer> ChannelState<M> {
    /// One drive step. `None` when the multiplexer itself failed.
    fn perform(&mut self) -> Option<usize> {
        match self.mux.perform() {
            Ok(active) => {
                self.last_mux_error = None;
                Some(active)
            }
            Err(failure) => {
                warn!(
                    errno = failure.errno,
                    error = %failure.message,
                    "multiplexer perform failed"
                );
                self.last_mux_error = Some(failure.message);
                None
            }
        }
    }

    fn wait(&mut self, timeout: Duration) {
        if let Err(failure) = self.mux.wait(timeout) {
            warn!(errno = failure.errno, error = %failure.message, "multiplexer wait failed");
            self.last_mux_error = Some(failure.message);
        }
    }

    /// Drive until `target` has finished, the multiplexer has nothing left to
    /// run, or the multiplexer fails. Completions of other handles are
    /// cached on those handles.
    fn dispatch_until_ready(&mut self, target: HandleId, select_timeout: Duration) {
        loop {
            if self.pool.get(target).is_some_and(|h| h.response_ready) {
                return;
            }

            let active = self.perform();
            let mut target_done = false;
            for id in self.mux.completions() {
                if id == target {
                    target_done = true;
                } else if let Some(handle) = self.pool.get_mut(id) {
                    debug!(handle = id, waiting_for = target, "caching completion");
                    handle.response_ready = true;
                }
            }
            if target_done {
                return;
            }

            match active {
                Some(n) if n > 0 => {
                    std::thread::yield_now();
                    self.wait(select_timeout);
                }
                _ => return,
            }
        }
    }
}

/// Default headers with caller overrides applied, then the remaining caller
/// headers in order, as `Name: value` lines. Names compare
/// case-insensitively; a repeated caller name keeps its first position and
/// its last value.
pub(crate) fn merge_headers(custom: &[(String, String)]) -> Vec<String> {
    let mut merged: Vec<(&str, &str)> = DEFAULT_HEADERS.to_vec();
    for (name, value) in custom {
        match merged.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
            Some(slot) => *slot = (name.as_str(), value.as_str()),
            None => merged.push((name.as_str(), value.as_str())),
        }
    }
    merged
        .into_iter()
        .map(|(name, value)| format!("{name}: {value}"))
        .collect()
}

/// `curl error: ...; curl multi error: ...`, with absent parts left out.
fn error_message(transfer: Option<&str>, multi: Option<&str>) -> String {
    let mut message = String::new();
    if let Some(text) = transfer.filter(|t| !t.is_empty()) {
        message.push_str("curl error: ");
        message.push_str(text);
    }
    if let Some(text) = multi.filter(|t| !t.is_empty()) {
        if !message.is_empty() {
            message.push_str("; ");
        }
        message.push_str("curl multi error: ");
        message.push_str(text);
    }
    message
}

fn transport_error_message(transfer: Option<&str>, multi: Option<&str>) -> String {
    let message = error_message(transfer, multi);
    if message.is_empty() {
        "unknown curl error".to_string()
    } else {
        message
    }
}

/// Classify a detached transfer. A well-formed response is returned whole,
/// frame prefix included.
fn validate_response(
    outcome: TransferOutcome,
    mux_error: Option<&str>,
) -> Result<Bytes, CallError> {
    let TransferOutcome {
        body,
        result,
        details,
    } = outcome;

    if let Err(failure) = result {
        return Err(CallError::Transport {
            errno: failure.errno,
            message: transport_error_message(Some(&failure.message), mux_error),
        });
    }

    // An empty body usually means a wrong method path.
    if body.is_empty() {
        let diagnostics = format!("{details}{}", error_message(None, mux_error));
        let diagnostics = if diagnostics.is_empty() {
            "no details"
        } else {
            diagnostics.as_str()
        };
        return Err(CallError::InvalidResponse(format!(
            "Invalid response: empty string, {diagnostics}"
        )));
    }

    if body[0] != FLAG_UNCOMPRESSED {
        // Most likely an HTML error page from a proxy.
        if body[0] == b'<' {
            let text: String = String::from_utf8_lossy(&body)
                .chars()
                .filter(|c| *c != '\n' && *c != '\r')
                .collect();
            return Err(CallError::InvalidResponse(format!(
                "Invalid response: {text}"
            )));
        }
        return Err(CallError::InvalidResponse(
            "encode bit is present, not supported".to_string(),
        ));
    }

    match frame::read_header(&body) {
        Some(header) if header.frame_len() == body.len() => Ok(Bytes::from(body)),
        _ => Err(CallError::InvalidResponse("bad reply_length".to_string())),
    }
}
