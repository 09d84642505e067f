//! Integration tests: channel and unary call driven by a scripted multiplexer.
//!
//! The scripted multiplexer completes transfers according to a per-step
//! schedule and records every interaction, so tests can assert exactly how
//! often the channel drove it.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use protobuf_grpc::{
    CallError, CallState, ChannelConfig, HandleId, Multiplexer, PendingCall, Service,
    TransferDetails, TransferOutcome, TransferRequest, TransportChannel, TransportFailure,
    UnaryCall,
};
use protocol_protobuf::{Decoder, Encoder, Message, tag_field_number};

// -- Scripted multiplexer --

#[derive(Default)]
struct Script {
    /// Ids finishing on each successive `perform`. Once exhausted, every
    /// active transfer finishes on the next step.
    steps: VecDeque<Vec<HandleId>>,
    responses: HashMap<HandleId, TransferOutcome>,
    uploaded: HashMap<HandleId, u64>,
    fail_add: bool,
    fail_perform: bool,

    added: Vec<(HandleId, TransferRequest)>,
    removed: Vec<HandleId>,
    active: HashSet<HandleId>,
    finished: Vec<HandleId>,
    performs: usize,
    waits: usize,
}

struct ScriptedMux(Rc<RefCell<Script>>);

impl Multiplexer for ScriptedMux {
    fn add(&mut self, id: HandleId, request: TransferRequest) -> Result<(), TransportFailure> {
        let mut s = self.0.borrow_mut();
        if s.fail_add {
            return Err(TransportFailure {
                errno: 2,
                message: "Failed initialization".into(),
            });
        }
        s.added.push((id, request));
        s.active.insert(id);
        Ok(())
    }

    fn perform(&mut self) -> Result<usize, TransportFailure> {
        let mut s = self.0.borrow_mut();
        s.performs += 1;
        if s.fail_perform {
            return Err(TransportFailure {
                errno: 3,
                message: "API function called from within callback".into(),
            });
        }
        let done = match s.steps.pop_front() {
            Some(done) => done,
            None => s.active.iter().copied().collect(),
        };
        for id in done {
            if s.active.remove(&id) {
                s.finished.push(id);
            }
        }
        Ok(s.active.len())
    }

    fn completions(&mut self) -> Vec<HandleId> {
        std::mem::take(&mut self.0.borrow_mut().finished)
    }

    fn wait(&mut self, _timeout: Duration) -> Result<(), TransportFailure> {
        self.0.borrow_mut().waits += 1;
        Ok(())
    }

    fn bytes_sent(&self, id: HandleId) -> u64 {
        self.0.borrow().uploaded.get(&id).copied().unwrap_or(0)
    }

    fn remove(&mut self, id: HandleId) -> TransferOutcome {
        let mut s = self.0.borrow_mut();
        s.removed.push(id);
        s.active.remove(&id);
        s.responses.remove(&id).unwrap_or(TransferOutcome {
            body: Vec::new(),
            result: Ok(()),
            details: TransferDetails::default(),
        })
    }
}

// -- Helpers --

const ENDPOINT: &str = "http://10.0.0.1:7000";
const METHOD: &str = "/eg.echo.EchoService/echo";

fn channel() -> (Rc<TransportChannel<ScriptedMux>>, Rc<RefCell<Script>>) {
    let script = Rc::new(RefCell::new(Script::default()));
    let channel = TransportChannel::with_multiplexer(
        ENDPOINT,
        ChannelConfig::default(),
        ScriptedMux(script.clone()),
    );
    (Rc::new(channel), script)
}

fn respond(script: &Rc<RefCell<Script>>, id: HandleId, body: Vec<u8>) {
    script.borrow_mut().responses.insert(
        id,
        TransferOutcome {
            body,
            result: Ok(()),
            details: TransferDetails::default(),
        },
    );
}

fn send(channel: &TransportChannel<ScriptedMux>, try_immediately: bool) -> PendingCall {
    channel.send_async(
        METHOD,
        vec![0, 0, 0, 0, 0],
        &[],
        Duration::ZERO,
        Duration::ZERO,
        try_immediately,
    )
}

#[derive(Debug, Default, PartialEq)]
struct Echo {
    text: String,
}

impl Message for Echo {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_string(1, &self.text, false);
    }

    fn decode(&mut self, decoder: &mut Decoder) {
        while let Some(tag) = decoder.read_tag() {
            match tag_field_number(tag) {
                1 => {
                    if let Ok(text) = decoder.read_string(tag) {
                        self.text = text;
                    }
                }
                _ => decoder.skip_field(tag),
            }
        }
    }
}

fn echo_frame(text: &str) -> Vec<u8> {
    Encoder::encode_framed(&Echo { text: text.into() })
}

// -- Channel --

#[test]
fn invalid_channel_never_touches_transport() {
    let script = Rc::new(RefCell::new(Script::default()));
    let channel = TransportChannel::with_multiplexer(
        "",
        ChannelConfig::default(),
        ScriptedMux(script.clone()),
    );
    assert!(!channel.is_valid());

    let pending = send(&channel, true);
    assert_eq!(pending, PendingCall::InvalidChannel);
    let err = channel.get_result(pending).unwrap_err();
    assert_eq!(err.tag(), "bad_channel_usage");
    assert_eq!(
        err.to_string(),
        "Connection invalid; maybe, could not get proxy config?"
    );

    let explicit = TransportChannel::<ScriptedMux>::invalid();
    assert_eq!(
        explicit.get_result(PendingCall::Handle(0)).unwrap_err().tag(),
        "bad_channel_usage"
    );

    let s = script.borrow();
    assert!(s.added.is_empty());
    assert_eq!(s.performs, 0);
}

#[test]
fn unused_handle_id() {
    let (channel, script) = channel();
    let err = channel.get_result(PendingCall::Handle(5)).unwrap_err();
    assert_eq!(
        err,
        CallError::BadChannelUsage("Got unknown handle id=5".into())
    );
    assert_eq!(script.borrow().performs, 0);
}

#[test]
fn collected_handle_is_not_started() {
    let (channel, script) = channel();
    let pending = send(&channel, false);
    respond(&script, 0, echo_frame("a"));
    assert!(channel.get_result(pending).is_ok());

    let err = channel.get_result(pending).unwrap_err();
    assert_eq!(
        err,
        CallError::BadChannelUsage("Passed handle id=0 hasn't been started".into())
    );
}

#[test]
fn request_shape() {
    let (channel, script) = channel();
    let headers = vec![
        ("Content-Type".to_string(), "application/grpc".to_string()),
        ("x-trace".to_string(), "abc".to_string()),
    ];
    channel.send_async(
        METHOD,
        vec![0, 0, 0, 0, 1, 0x08],
        &headers,
        Duration::from_millis(100),
        Duration::ZERO,
        false,
    );

    let s = script.borrow();
    let (id, request) = &s.added[0];
    assert_eq!(*id, 0);
    assert_eq!(request.url, "http://10.0.0.1:7000/eg.echo.EchoService/echo");
    assert_eq!(request.body, [0, 0, 0, 0, 1, 0x08]);
    assert_eq!(
        request.headers,
        [
            "Content-Type: application/grpc",
            "TE: trailers",
            "x-trace: abc"
        ]
    );
    assert_eq!(request.call_timeout, Duration::from_millis(100));
    assert_eq!(request.connect_timeout, Duration::from_millis(500));
    assert_eq!(s.performs, 0);
}

#[test]
fn out_of_order_completion_is_cached() {
    let (channel, script) = channel();
    let first = send(&channel, false);
    let second = send(&channel, false);
    assert_eq!(first, PendingCall::Handle(0));
    assert_eq!(second, PendingCall::Handle(1));
    assert_eq!(channel.in_flight(), 2);

    {
        let mut s = script.borrow_mut();
        // The second call finishes first.
        s.steps = VecDeque::from([vec![1], vec![0]]);
    }
    respond(&script, 0, echo_frame("first"));
    respond(&script, 1, echo_frame("second"));

    let body = channel.get_result(first).unwrap();
    assert_eq!(&body[..], &echo_frame("first")[..]);
    let performs = script.borrow().performs;
    assert_eq!(performs, 2);

    let body = channel.get_result(second).unwrap();
    assert_eq!(&body[..], &echo_frame("second")[..]);
    assert_eq!(script.borrow().performs, performs);
    assert_eq!(script.borrow().removed, [0, 1]);
    assert_eq!(channel.in_flight(), 0);
}

#[test]
fn handles_are_reused_when_idle() {
    let (channel, script) = channel();
    for _ in 0..3 {
        let pending = send(&channel, false);
        assert_eq!(pending, PendingCall::Handle(0));
        respond(&script, 0, echo_frame("x"));
        channel.get_result(pending).unwrap();
    }
    assert_eq!(channel.pool_size(), 1);

    let a = send(&channel, false);
    let b = send(&channel, false);
    assert_eq!((a, b), (PendingCall::Handle(0), PendingCall::Handle(1)));
    assert_eq!(channel.pool_size(), 2);
}

#[test]
fn try_immediately_retries_once_when_nothing_sent() {
    let (channel, script) = channel();
    script.borrow_mut().steps = VecDeque::from([vec![], vec![]]);
    send(&channel, true);
    {
        let s = script.borrow();
        assert_eq!(s.performs, 2);
        assert_eq!(s.waits, 1);
    }

    let (channel, script) = self::channel();
    {
        let mut s = script.borrow_mut();
        s.steps = VecDeque::from([vec![]]);
        s.uploaded.insert(0, 5);
    }
    send(&channel, true);
    let s = script.borrow();
    assert_eq!(s.performs, 1);
    assert_eq!(s.waits, 0);
}

#[test]
fn transport_failure_classification() {
    let (channel, script) = channel();
    let pending = send(&channel, false);
    script.borrow_mut().responses.insert(
        0,
        TransferOutcome {
            body: Vec::new(),
            result: Err(TransportFailure {
                errno: 28,
                message: "Operation timed out after 2500 milliseconds".into(),
            }),
            details: TransferDetails::default(),
        },
    );
    let err = channel.get_result(pending).unwrap_err();
    assert_eq!(err.tag(), "curl_errno_28");
    assert_eq!(
        err.to_string(),
        "curl error: Operation timed out after 2500 milliseconds"
    );
    assert_eq!(channel.in_flight(), 0);
}

#[test]
fn enqueue_failure_surfaces_on_collect() {
    let (channel, script) = channel();
    script.borrow_mut().fail_add = true;
    let pending = send(&channel, true);
    assert_eq!(pending, PendingCall::Handle(0));

    let err = channel.get_result(pending).unwrap_err();
    assert_eq!(
        err,
        CallError::Transport {
            errno: 2,
            message: "curl error: Failed initialization".into()
        }
    );
    let s = script.borrow();
    assert_eq!(s.performs, 0);
    assert!(s.removed.is_empty());
    assert_eq!(channel.in_flight(), 0);
}

#[test]
fn multiplexer_failure_ends_wait() {
    let (channel, script) = channel();
    let pending = send(&channel, false);
    script.borrow_mut().fail_perform = true;

    let err = channel.get_result(pending).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Invalid response: empty string, curl multi error: API function called from within callback"
    );
    assert_eq!(script.borrow().performs, 1);
}

#[test]
fn html_response() {
    let (channel, script) = channel();
    let pending = send(&channel, false);
    respond(&script, 0, b"<html>\r\n<body>Bad Gateway</body>\n</html>\n".to_vec());

    let err = channel.get_result(pending).unwrap_err();
    assert_eq!(err.tag(), "invalid_response");
    assert_eq!(
        err.to_string(),
        "Invalid response: <html><body>Bad Gateway</body></html>"
    );
}

// -- Unary call --

#[test]
fn get_before_send() {
    let (channel, script) = channel();
    let mut call = UnaryCall::new(channel, METHOD, echo_frame("hi"));
    let mut out = Echo::default();

    let err = call.get(&mut out).unwrap_err();
    assert_eq!(
        err,
        CallError::BadChannelUsage("using get() without send()".into())
    );
    assert_eq!(call.state(), CallState::NotSent);
    let s = script.borrow();
    assert!(s.added.is_empty());
    assert_eq!(s.performs, 0);
}

#[test]
fn call_lifecycle() {
    let (channel, script) = channel();
    respond(&script, 0, echo_frame("pong"));

    let mut call = UnaryCall::from_message(channel, METHOD, &Echo { text: "ping".into() })
        .with_header("x-id", "1")
        .with_headers([("X-Id", "2"), ("x-extra", "e")])
        .with_connection_timeout(Duration::from_millis(50));

    call.send(false);
    assert_eq!(call.state(), CallState::InProgress);
    // A second send is ignored.
    call.send(false);
    assert_eq!(script.borrow().added.len(), 1);

    let mut out = Echo::default();
    call.get(&mut out).unwrap();
    assert_eq!(out.text, "pong");
    assert_eq!(call.state(), CallState::Finished);

    let err = call.get(&mut out).unwrap_err();
    assert_eq!(err, CallError::BadChannelUsage("using get() after get()".into()));

    let s = script.borrow();
    let (_, request) = &s.added[0];
    assert_eq!(request.body, echo_frame("ping"));
    assert_eq!(
        request.headers,
        [
            "Content-Type: application/grpc+proto",
            "TE: trailers",
            "x-id: 2",
            "x-extra: e"
        ]
    );
    assert_eq!(request.call_timeout, Duration::from_millis(2500));
    assert_eq!(request.connect_timeout, Duration::from_millis(50));
}

#[test]
fn call_sends_without_immediate_drive() {
    let (channel, script) = channel();
    script.borrow_mut().steps = VecDeque::from([vec![], vec![0]]);
    respond(&script, 0, echo_frame("ok"));

    let mut call = UnaryCall::new(channel, METHOD, echo_frame("q")).without_logging_on_fail();
    let mut out = Echo::default();
    call.call(&mut out).unwrap();
    assert_eq!(out.text, "ok");

    // Both drive steps happened inside get(), with one wait between them.
    let s = script.borrow();
    assert_eq!(s.performs, 2);
    assert_eq!(s.waits, 1);
}

#[test]
fn decode_failure_is_reported() {
    let (channel, script) = channel();
    // Frame holding a string field whose length runs past the payload.
    respond(&script, 0, vec![0, 0, 0, 0, 3, 0x0A, 0x05, b'a']);

    let mut call = UnaryCall::new(channel, METHOD, echo_frame("q"));
    let mut out = Echo::default();
    let err = call.call(&mut out).unwrap_err();
    assert_eq!(err, CallError::Decode("protobuf decoding error".into()));
    assert_eq!(err.tag(), "decode_error");
}

#[test]
fn invalid_channel_call() {
    let channel = Rc::new(TransportChannel::<ScriptedMux>::invalid());
    let mut call = UnaryCall::new(channel, METHOD, echo_frame("q"));
    let mut out = Echo::default();
    let err = call.call(&mut out).unwrap_err();
    assert_eq!(err.tag(), "bad_channel_usage");
    assert_eq!(call.state(), CallState::Finished);
}

// -- Service --

struct EchoService {
    channel: Rc<TransportChannel<ScriptedMux>>,
}

impl Service for EchoService {
    type Mux = ScriptedMux;

    fn channel(&self) -> &Rc<TransportChannel<ScriptedMux>> {
        &self.channel
    }
}

impl EchoService {
    fn echo(&self, arg: &Echo) -> UnaryCall<ScriptedMux> {
        self.build_call(METHOD, arg)
    }
}

#[test]
fn service_builds_calls_on_shared_channel() {
    let (channel, script) = channel();
    let service = EchoService { channel };
    respond(&script, 0, echo_frame("one"));
    respond(&script, 1, echo_frame("two"));

    let mut a = service.echo(&Echo { text: "1".into() });
    let mut b = service.echo(&Echo { text: "2".into() });
    a.send(false);
    b.send(false);

    let mut out_b = Echo::default();
    b.get(&mut out_b).unwrap();
    let mut out_a = Echo::default();
    a.get(&mut out_a).unwrap();
    assert_eq!(out_a.text, "one");
    assert_eq!(out_b.text, "two");
    assert_eq!(script.borrow().added.len(), 2);
}
