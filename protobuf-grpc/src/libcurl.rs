//! libcurl-backed [`Multiplexer`].
//!
//! One `Multi` handle with HTTP/2 multiplexing enabled drives every transfer.
//! Each handle id owns an `Easy2` that is reused across calls: it sits idle
//! in its slot between calls and is attached to the multi handle while a call
//! is in flight.

use std::time::Duration;

use curl::easy::{Easy2, Handler, HttpVersion, List, ReadError, WriteError};
use curl::multi::{Easy2Handle, Multi};
use tracing::{trace, warn};

use crate::multiplexer::{
    HandleId, Multiplexer, TransferDetails, TransferOutcome, TransferRequest, TransportFailure,
};

/// Per-transfer callbacks: streams the request body out and collects the
/// response body.
#[derive(Debug, Default)]
struct Exchange {
    request: Vec<u8>,
    uploaded: usize,
    response: Vec<u8>,
}

impl Handler for Exchange {
    fn read(&mut self, data: &mut [u8]) -> Result<usize, ReadError> {
        let pending = &self.request[self.uploaded..];
        let n = pending.len().min(data.len());
        data[..n].copy_from_slice(&pending[..n]);
        self.uploaded += n;
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        self.response.extend_from_slice(data);
        Ok(data.len())
    }
}

enum Slot {
    Idle(Easy2<Exchange>),
    Active {
        handle: Easy2Handle<Exchange>,
        result: Option<Result<(), curl::Error>>,
    },
    /// Transiently empty while moving between states, or after a failed detach.
    Vacant,
}

/// Multiplexer over a libcurl multi handle.
pub struct CurlMultiplexer {
    multi: Multi,
    slots: Vec<Slot>,
    finished: Vec<HandleId>,
}

impl CurlMultiplexer {
    pub fn new() -> Self {
        let mut multi = Multi::new();
        if let Err(e) = multi.pipelining(false, true) {
            warn!(error = %e, "failed to enable HTTP/2 multiplexing");
        }
        Self {
            multi,
            slots: Vec::new(),
            finished: Vec::new(),
        }
    }

    fn take_easy(&mut self, id: HandleId) -> Easy2<Exchange> {
        if self.slots.len() <= id {
            self.slots.resize_with(id + 1, || Slot::Vacant);
        }
        match std::mem::replace(&mut self.slots[id], Slot::Vacant) {
            Slot::Idle(easy) => easy,
            Slot::Active { handle, .. } => {
                // A previous call on this id was never collected.
                match self.multi.remove2(handle) {
                    Ok(easy) => easy,
                    Err(e) => {
                        warn!(handle = id, error = %e, "failed to detach stale transfer");
                        Easy2::new(Exchange::default())
                    }
                }
            }
            Slot::Vacant => Easy2::new(Exchange::default()),
        }
    }
}

impl Default for CurlMultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

fn configure(easy: &mut Easy2<Exchange>, request: TransferRequest) -> Result<(), curl::Error> {
    easy.reset();
    let body_len = request.body.len() as u64;
    *easy.get_mut() = Exchange {
        request: request.body,
        uploaded: 0,
        response: Vec::new(),
    };

    easy.http_version(HttpVersion::V2PriorKnowledge)?;
    easy.url(&request.url)?;
    easy.post(true)?;
    easy.post_field_size(body_len)?;
    easy.timeout(request.call_timeout)?;
    easy.connect_timeout(request.connect_timeout)?;
    easy.signal(false)?;

    let mut headers = List::new();
    for line in &request.headers {
        headers.append(line)?;
    }
    easy.http_headers(headers)
}

fn failure(e: &curl::Error) -> TransportFailure {
    let message = match e.extra_description() {
        Some(extra) => extra.to_string(),
        None => e.description().to_string(),
    };
    TransportFailure {
        errno: e.code() as i32,
        message,
    }
}

fn multi_failure(e: &curl::MultiError) -> TransportFailure {
    TransportFailure {
        errno: e.code() as i32,
        message: e.description().to_string(),
    }
}

fn empty_outcome(result: Result<(), TransportFailure>) -> TransferOutcome {
    TransferOutcome {
        body: Vec::new(),
        result,
        details: TransferDetails::default(),
    }
}

fn details(easy: &mut Easy2<Exchange>) -> TransferDetails {
    TransferDetails {
        http_code: easy.response_code().unwrap_or(0),
        local_ip: easy.local_ip().ok().flatten().map(str::to_string),
        local_port: easy.local_port().unwrap_or(0),
        remote_ip: easy.primary_ip().ok().flatten().map(str::to_string),
        remote_port: easy.primary_port().unwrap_or(0),
    }
}

impl Multiplexer for CurlMultiplexer {
    fn add(&mut self, id: HandleId, request: TransferRequest) -> Result<(), TransportFailure> {
        let mut easy = self.take_easy(id);
        if let Err(e) = configure(&mut easy, request) {
            self.slots[id] = Slot::Idle(easy);
            return Err(failure(&e));
        }

        let mut handle = self.multi.add2(easy).map_err(|e| multi_failure(&e))?;
        if let Err(e) = handle.set_token(id) {
            if let Ok(easy) = self.multi.remove2(handle) {
                self.slots[id] = Slot::Idle(easy);
            }
            return Err(failure(&e));
        }
        self.slots[id] = Slot::Active {
            handle,
            result: None,
        };
        Ok(())
    }

    fn perform(&mut self) -> Result<usize, TransportFailure> {
        let active = self.multi.perform().map_err(|e| multi_failure(&e))?;

        let mut done = Vec::new();
        self.multi.messages(|message| {
            if let (Ok(token), Some(result)) = (message.token(), message.result()) {
                done.push((token, result));
            }
        });
        for (id, result) in done {
            trace!(handle = id, ok = result.is_ok(), "transfer finished");
            if let Some(Slot::Active { result: slot, .. }) = self.slots.get_mut(id) {
                *slot = Some(result);
            }
            self.finished.push(id);
        }
        Ok(active as usize)
    }

    fn completions(&mut self) -> Vec<HandleId> {
        std::mem::take(&mut self.finished)
    }

    fn wait(&mut self, timeout: Duration) -> Result<(), TransportFailure> {
        self.multi
            .wait(&mut [], timeout)
            .map(drop)
            .map_err(|e| multi_failure(&e))
    }

    fn bytes_sent(&self, id: HandleId) -> u64 {
        match self.slots.get(id) {
            Some(Slot::Active { handle, .. }) => handle.get_ref().uploaded as u64,
            _ => 0,
        }
    }

    fn remove(&mut self, id: HandleId) -> TransferOutcome {
        let slot = match self.slots.get_mut(id) {
            Some(slot) => std::mem::replace(slot, Slot::Vacant),
            None => Slot::Vacant,
        };
        let (handle, result) = match slot {
            Slot::Active { handle, result } => (handle, result),
            Slot::Idle(easy) => {
                self.slots[id] = Slot::Idle(easy);
                return empty_outcome(Ok(()));
            }
            Slot::Vacant => return empty_outcome(Ok(())),
        };

        let mut easy = match self.multi.remove2(handle) {
            Ok(easy) => easy,
            Err(e) => {
                warn!(handle = id, error = %e, "failed to detach transfer");
                return empty_outcome(Err(multi_failure(&e)));
            }
        };

        let outcome = TransferOutcome {
            body: std::mem::take(&mut easy.get_mut().response),
            result: match result {
                Some(Err(e)) => Err(failure(&e)),
                _ => Ok(()),
            },
            details: details(&mut easy),
        };
        easy.reset();
        *easy.get_mut() = Exchange::default();
        self.slots[id] = Slot::Idle(easy);
        outcome
    }
}

impl Drop for CurlMultiplexer {
    fn drop(&mut self) {
        for slot in self.slots.drain(..) {
            if let Slot::Active { handle, .. } = slot
                && let Err(e) = self.multi.remove2(handle)
            {
                warn!(error = %e, "failed to detach transfer on teardown");
            }
        }
    }
}
