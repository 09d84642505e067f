//! Echo client: sends `PingMessage { message }` to
//! `/eg.echo.EchoService/echo` and prints the `PongMessage` reply.
//!
//! ```text
//! cargo run -p protobuf-grpc --example echo_client -- http://127.0.0.1:50051 hello
//! ```

use std::rc::Rc;

use protobuf_grpc::{CurlMultiplexer, Service, TransportChannel, UnaryCall};
use protocol_protobuf::{Decoder, Encoder, Message, tag_field_number};

#[derive(Debug, Default)]
struct PingMessage {
    message: String,
}

impl Message for PingMessage {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_string(1, &self.message, false);
    }

    fn decode(&mut self, decoder: &mut Decoder) {
        while let Some(tag) = decoder.read_tag() {
            match tag_field_number(tag) {
                1 => {
                    if let Ok(v) = decoder.read_string(tag) {
                        self.message = v;
                    }
                }
                _ => decoder.skip_field(tag),
            }
        }
    }
}

#[derive(Debug, Default)]
struct PongMessage {
    message: String,
}

impl Message for PongMessage {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_string(1, &self.message, false);
    }

    fn decode(&mut self, decoder: &mut Decoder) {
        while let Some(tag) = decoder.read_tag() {
            match tag_field_number(tag) {
                1 => {
                    if let Ok(v) = decoder.read_string(tag) {
                        self.message = v;
                    }
                }
                _ => decoder.skip_field(tag),
            }
        }
    }
}

struct EchoService {
    channel: Rc<TransportChannel<CurlMultiplexer>>,
}

impl Service for EchoService {
    type Mux = CurlMultiplexer;

    fn channel(&self) -> &Rc<TransportChannel<CurlMultiplexer>> {
        &self.channel
    }
}

impl EchoService {
    fn echo(&self, arg: &PingMessage) -> UnaryCall<CurlMultiplexer> {
        self.build_call("/eg.echo.EchoService/echo", arg)
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let mut args = std::env::args().skip(1);
    let endpoint = args
        .next()
        .unwrap_or_else(|| "http://127.0.0.1:50051".to_string());
    let message = args.next().unwrap_or_else(|| "hello".to_string());

    let client = EchoService {
        channel: Rc::new(TransportChannel::new(endpoint)),
    };

    let input = PingMessage { message };
    let mut response = PongMessage::default();
    if let Err(err) = client.echo(&input).call(&mut response) {
        eprintln!("{}: {err}", err.tag());
        std::process::exit(1);
    }
    println!("{}", response.message);
}
