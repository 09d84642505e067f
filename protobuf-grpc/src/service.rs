use std::rc::Rc;

use protocol_protobuf::Message;

use crate::call::UnaryCall;
use crate::channel::TransportChannel;
use crate::multiplexer::Multiplexer;

/// A client for one protobuf service: one method per RPC, each building a
/// [`UnaryCall`] on a shared channel.
///
/// ```no_run
/// # use std::rc::Rc;
/// # use protobuf_grpc::{CurlMultiplexer, Service, TransportChannel, UnaryCall};
/// # use protocol_protobuf::{Decoder, Encoder, Message};
/// # struct Ping;
/// # impl Message for Ping {
/// #     fn encode(&self, _: &mut Encoder) {}
/// #     fn decode(&mut self, _: &mut Decoder) {}
/// # }
/// struct EchoService {
///     channel: Rc<TransportChannel<CurlMultiplexer>>,
/// }
///
/// impl Service for EchoService {
///     type Mux = CurlMultiplexer;
///
///     fn channel(&self) -> &Rc<TransportChannel<CurlMultiplexer>> {
///         &self.channel
///     }
/// }
///
/// impl EchoService {
///     fn echo(&self, arg: &Ping) -> UnaryCall<CurlMultiplexer> {
///         self.build_call("/eg.echo.EchoService/echo", arg)
///     }
/// }
/// ```
pub trait Service {
    type Mux: Multiplexer;

    fn channel(&self) -> &Rc<TransportChannel<Self::Mux>>;

    /// Encode `arg` as a framed request for `method` on this service's channel.
    fn build_call<A: Message + ?Sized>(&self, method: &str, arg: &A) -> UnaryCall<Self::Mux> {
        UnaryCall::from_message(Rc::clone(self.channel()), method, arg)
    }
}
