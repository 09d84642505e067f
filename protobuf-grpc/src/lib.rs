//! Multiplexed unary gRPC transport for hand-written protobuf messages.
//!
//! Requests are encoded with [`protocol_protobuf`] into the 5-byte gRPC
//! frame, POSTed over HTTP/2 and collected as framed responses. Several calls
//! on one channel share a single connection multiplexer and proceed
//! concurrently; completions are cached per handle so calls can be collected
//! in any order.
//!
//! # Architecture
//!
//! ```text
//!   Message --encode--> UnaryCall --send--> TransportChannel --> Multiplexer
//!                                              | handle pool     (libcurl multi)
//!   Message <--decode-- UnaryCall <--get--- validated frame <--------+
//! ```
//!
//! Only unary calls are supported. Trailers and `grpc-status` are not read:
//! a call succeeds when the transfer succeeds and the frame length checks out.
//! Failures are returned as [`CallError`] values classified by
//! [`CallError::tag`].
//!
//! # Features
//!
//! - `curl` (default) - [`CurlMultiplexer`] and the `TransportChannel::new`
//!   constructors. Without it, supply your own [`Multiplexer`].
//!
//! # Threading
//!
//! Channels and calls are single-threaded (`Rc` + `RefCell`); they are
//! neither `Send` nor `Sync`.

mod call;
mod channel;
mod config;
mod error;
#[cfg(feature = "curl")]
mod libcurl;
pub mod multiplexer;
mod pool;
mod service;

pub use call::{CallState, UnaryCall};
pub use channel::{PendingCall, TransportChannel};
pub use config::ChannelConfig;
pub use error::CallError;
#[cfg(feature = "curl")]
pub use libcurl::CurlMultiplexer;
pub use multiplexer::{
    HandleId, Multiplexer, TransferDetails, TransferOutcome, TransferRequest, TransportFailure,
};
pub use service::Service;
