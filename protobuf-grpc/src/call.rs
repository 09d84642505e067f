//! One request/response exchange over a shared channel.

use std::rc::Rc;
use std::time::Duration;

use bytes::Bytes;
use protocol_protobuf::{Decoder, Encoder, Message};
use tracing::warn;

use crate::channel::{PendingCall, TransportChannel};
use crate::error::CallError;
use crate::multiplexer::Multiplexer;

/// Where a [`UnaryCall`] is in its send/get lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    NotSent,
    InProgress,
    Finished,
}

#[derive(Debug, Clone, Copy)]
enum Progress {
    NotSent,
    InProgress(PendingCall),
    Finished,
}

/// A unary call: a method path plus a pre-framed request, sent on a shared
/// [`TransportChannel`].
///
/// ```no_run
/// # use std::rc::Rc;
/// # use std::time::Duration;
/// # use protobuf_grpc::{TransportChannel, UnaryCall};
/// # use protocol_protobuf::{Decoder, Encoder, Message};
/// # #[derive(Default)] struct Pong;
/// # impl Message for Pong {
/// #     fn encode(&self, _: &mut Encoder) {}
/// #     fn decode(&mut self, _: &mut Decoder) {}
/// # }
/// let channel = Rc::new(TransportChannel::new("http://127.0.0.1:50051"));
/// let mut a = UnaryCall::new(channel.clone(), "/eg.Echo/echo", vec![0, 0, 0, 0, 0])
///     .with_header("x-request-id", "a")
///     .with_call_timeout(Duration::from_millis(300));
/// let mut b = UnaryCall::new(channel, "/eg.Echo/echo", vec![0, 0, 0, 0, 0]);
///
/// // Both requests are in flight before either is collected.
/// a.send(true);
/// b.send(true);
///
/// let mut pong = Pong::default();
/// if let Err(err) = b.get(&mut pong) {
///     eprintln!("{}: {err}", err.tag());
/// }
/// ```
pub struct UnaryCall<M: Multiplexer> {
    channel: Rc<TransportChannel<M>>,
    method: String,
    request: Vec<u8>,
    headers: Vec<(String, String)>,
    call_timeout: Duration,
    connection_timeout: Duration,
    log_on_fail: bool,
    progress: Progress,
}

impl<M: Multiplexer> UnaryCall<M> {
    /// Call `method` with an already framed request body.
    pub fn new(
        channel: Rc<TransportChannel<M>>,
        method: impl Into<String>,
        framed_request: Vec<u8>,
    ) -> Self {
        Self {
            channel,
            method: method.into(),
            request: framed_request,
            headers: Vec::new(),
            call_timeout: Duration::ZERO,
            connection_timeout: Duration::ZERO,
            log_on_fail: true,
            progress: Progress::NotSent,
        }
    }

    /// Call `method` with `arg` encoded as a gRPC frame.
    pub fn from_message<A: Message + ?Sized>(
        channel: Rc<TransportChannel<M>>,
        method: impl Into<String>,
        arg: &A,
    ) -> Self {
        Self::new(channel, method, Encoder::encode_framed(arg))
    }

    /// Add one header. Setting a name again replaces its value.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some(slot) => slot.1 = value,
            None => self.headers.push((name, value)),
        }
        self
    }

    pub fn with_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (name, value) in headers {
            self = self.with_header(name, value);
        }
        self
    }

    /// Override the channel's whole-call timeout. Zero keeps the default.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Override the channel's connect timeout. Zero keeps the default.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Do not log failures returned by [`get`](Self::get).
    pub fn without_logging_on_fail(mut self) -> Self {
        self.log_on_fail = false;
        self
    }

    pub fn state(&self) -> CallState {
        match self.progress {
            Progress::NotSent => CallState::NotSent,
            Progress::InProgress(_) => CallState::InProgress,
            Progress::Finished => CallState::Finished,
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Hand the request to the channel without waiting for the response.
    ///
    /// Sending twice is logged and otherwise ignored. The request body and
    /// headers are released once sent.
    pub fn send(&mut self, try_immediately: bool) -> &mut Self {
        if let Progress::NotSent = self.progress {
            let request = std::mem::take(&mut self.request);
            let headers = std::mem::take(&mut self.headers);
            let pending = self.channel.send_async(
                &self.method,
                request,
                &headers,
                self.call_timeout,
                self.connection_timeout,
                try_immediately,
            );
            self.progress = Progress::InProgress(pending);
        } else {
            warn!(
                endpoint = %self.channel.endpoint(),
                method = %self.method,
                "can't send unary call: already sent"
            );
        }
        self
    }

    /// Block for the response and decode it into `out`.
    ///
    /// Fails without touching the transport if called before [`send`](Self::send)
    /// or a second time.
    pub fn get<R: Message + ?Sized>(&mut self, out: &mut R) -> Result<(), CallError> {
        let result = match self.progress {
            Progress::NotSent => Err(CallError::BadChannelUsage(
                "using get() without send()".to_string(),
            )),
            Progress::Finished => Err(CallError::BadChannelUsage(
                "using get() after get()".to_string(),
            )),
            Progress::InProgress(pending) => {
                self.progress = Progress::Finished;
                self.channel
                    .get_result(pending)
                    .and_then(|response| decode_response(response, out))
            }
        };

        if let Err(err) = &result
            && self.log_on_fail
        {
            warn!(
                endpoint = %self.channel.endpoint(),
                method = %self.method,
                tag = %err.tag(),
                error = %err,
                "unary call failed"
            );
        }
        result
    }

    /// [`send`](Self::send) without an immediate drive step, then [`get`](Self::get).
    pub fn call<R: Message + ?Sized>(&mut self, out: &mut R) -> Result<(), CallError> {
        self.send(false);
        self.get(out)
    }
}

fn decode_response<R: Message + ?Sized>(response: Bytes, out: &mut R) -> Result<(), CallError> {
    let mut decoder = Decoder::from_framed(response);
    out.decode(&mut decoder);
    if decoder.was_decoding_error() {
        return Err(CallError::Decode("protobuf decoding error".to_string()));
    }
    Ok(())
}
