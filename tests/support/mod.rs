#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use callx::{
    ConnectionAllocation, ConnectionProvider, Error, ExchangeStream, Request, Response,
    ResponseBody, Target, TransportErrorKind,
};
use http::StatusCode;

/// One scripted transport outcome, consumed per network attempt.
#[derive(Clone)]
pub enum ScriptStep {
    Respond {
        status: u16,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    },
    /// `read_response` fails with a transport error.
    Fail {
        kind: TransportErrorKind,
        request_sent: bool,
    },
    /// `open_stream` fails before any request is written.
    FailConnect { kind: TransportErrorKind },
    /// `read_response` blocks until the allocation is interrupted.
    Block,
}

pub fn respond(status: u16, headers: &[(&str, &str)], body: &str) -> ScriptStep {
    ScriptStep::Respond {
        status,
        headers: headers
            .iter()
            .map(|(name, value)| ((*name).to_owned(), (*value).to_owned()))
            .collect(),
        body: body.as_bytes().to_vec(),
    }
}

struct TransportState {
    steps: VecDeque<ScriptStep>,
    repeat: Option<ScriptStep>,
    requests: Vec<Request>,
}

struct TransportShared {
    state: Mutex<TransportState>,
    reserved: AtomicUsize,
    released: AtomicUsize,
    interrupted: AtomicBool,
    has_next_route: AtomicBool,
}

/// Per-allocation interruption signal, so canceling one call never
/// wakes another call's blocked exchange.
#[derive(Default)]
struct InterruptFlag {
    interrupted: AtomicBool,
    gate: Mutex<()>,
    unblock: Condvar,
}

/// In-memory stand-in for the excluded connection layer: serves canned
/// responses and failures in order, records every request written, and
/// supports interruption for cancellation tests.
pub struct ScriptedConnections {
    shared: Arc<TransportShared>,
}

impl ScriptedConnections {
    pub fn new(steps: Vec<ScriptStep>) -> Arc<Self> {
        Arc::new(Self {
            shared: Arc::new(TransportShared {
                state: Mutex::new(TransportState {
                    steps: steps.into(),
                    repeat: None,
                    requests: Vec::new(),
                }),
                reserved: AtomicUsize::new(0),
                released: AtomicUsize::new(0),
                interrupted: AtomicBool::new(false),
                has_next_route: AtomicBool::new(false),
            }),
        })
    }

    /// Serves `step` for every attempt, forever.
    pub fn repeating(step: ScriptStep) -> Arc<Self> {
        let connections = Self::new(Vec::new());
        connections.shared.state.lock().expect("lock transport state").repeat = Some(step);
        connections
    }

    /// Allows the recovery path to assume another route exists.
    pub fn with_next_route(self: Arc<Self>) -> Arc<Self> {
        self.shared.has_next_route.store(true, Ordering::SeqCst);
        self
    }

    /// Every request written to the transport, in order.
    pub fn requests(&self) -> Vec<Request> {
        self.shared
            .state
            .lock()
            .expect("lock transport state")
            .requests
            .clone()
    }

    pub fn request_count(&self) -> usize {
        self.shared
            .state
            .lock()
            .expect("lock transport state")
            .requests
            .len()
    }

    pub fn reserved_count(&self) -> usize {
        self.shared.reserved.load(Ordering::SeqCst)
    }

    pub fn released_count(&self) -> usize {
        self.shared.released.load(Ordering::SeqCst)
    }

    pub fn was_interrupted(&self) -> bool {
        self.shared.interrupted.load(Ordering::SeqCst)
    }
}

impl ConnectionProvider for ScriptedConnections {
    fn reserve(&self, target: &Target) -> callx::Result<Arc<dyn ConnectionAllocation>> {
        self.shared.reserved.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ScriptedAllocation {
            shared: Arc::clone(&self.shared),
            target: target.clone(),
            interrupt: Arc::new(InterruptFlag::default()),
        }))
    }
}

struct ScriptedAllocation {
    shared: Arc<TransportShared>,
    target: Target,
    interrupt: Arc<InterruptFlag>,
}

impl TransportShared {
    fn next_step(&self) -> ScriptStep {
        let mut state = self.state.lock().expect("lock transport state");
        if let Some(step) = state.steps.pop_front() {
            return step;
        }
        state
            .repeat
            .clone()
            .unwrap_or(ScriptStep::Respond {
                status: 200,
                headers: Vec::new(),
                body: Vec::new(),
            })
    }

    fn peek_connect_failure(&self) -> Option<TransportErrorKind> {
        let mut state = self.state.lock().expect("lock transport state");
        match state.steps.front() {
            Some(ScriptStep::FailConnect { kind }) => {
                let kind = *kind;
                state.steps.pop_front();
                Some(kind)
            }
            _ => match state.repeat {
                Some(ScriptStep::FailConnect { kind }) => Some(kind),
                _ => None,
            },
        }
    }
}

impl ConnectionAllocation for ScriptedAllocation {
    fn supports_target(&self, target: &Target) -> bool {
        self.target.same_host_port(target)
    }

    fn open_stream(
        &self,
        _connect_timeout: Duration,
        _read_timeout: Duration,
        _write_timeout: Duration,
    ) -> callx::Result<Arc<dyn ExchangeStream>> {
        if let Some(kind) = self.shared.peek_connect_failure() {
            return Err(Error::Transport {
                kind,
                method: http::Method::GET,
                uri: self.target.to_string(),
                request_sent: false,
                source: std::io::Error::other("scripted connect failure").into(),
            });
        }
        Ok(Arc::new(ScriptedStream {
            shared: Arc::clone(&self.shared),
            interrupt: Arc::clone(&self.interrupt),
        }))
    }

    fn has_next_route(&self) -> bool {
        self.shared.has_next_route.load(Ordering::SeqCst)
    }

    fn release(&self) {
        self.shared.released.fetch_add(1, Ordering::SeqCst);
    }

    fn interrupt(&self) {
        self.shared.interrupted.store(true, Ordering::SeqCst);
        self.interrupt.interrupted.store(true, Ordering::SeqCst);
        let _gate = self.interrupt.gate.lock().expect("lock block gate");
        self.interrupt.unblock.notify_all();
    }
}

struct ScriptedStream {
    shared: Arc<TransportShared>,
    interrupt: Arc<InterruptFlag>,
}

impl ExchangeStream for ScriptedStream {
    fn write_request(&self, request: &Request) -> callx::Result<()> {
        self.shared
            .state
            .lock()
            .expect("lock transport state")
            .requests
            .push(request.clone());
        Ok(())
    }

    fn read_response(&self, request: &Request) -> callx::Result<Response> {
        match self.shared.next_step() {
            ScriptStep::Respond {
                status,
                headers,
                body,
            } => {
                let mut builder = Response::builder()
                    .request(request.clone())
                    .status(StatusCode::from_u16(status).expect("scripted status"))
                    .body(ResponseBody::from_bytes(body));
                for (name, value) in headers {
                    builder = builder.header(name.as_str(), value.as_str());
                }
                builder.build()
            }
            ScriptStep::Fail { kind, request_sent } => Err(Error::transport(
                kind,
                request,
                request_sent,
                std::io::Error::other("scripted transport failure"),
            )),
            ScriptStep::FailConnect { kind } => Err(Error::transport(
                kind,
                request,
                false,
                std::io::Error::other("scripted connect failure"),
            )),
            ScriptStep::Block => {
                // Parks until cancel() interrupts this allocation; the
                // timeout keeps a broken test from hanging forever.
                let mut gate = self.interrupt.gate.lock().expect("lock block gate");
                let deadline = std::time::Instant::now() + Duration::from_secs(5);
                while !self.interrupt.interrupted.load(Ordering::SeqCst) {
                    let remaining = deadline.saturating_duration_since(std::time::Instant::now());
                    if remaining.is_zero() {
                        break;
                    }
                    let (guard, _timeout) = self
                        .interrupt
                        .unblock
                        .wait_timeout(gate, remaining)
                        .expect("condvar wait");
                    gate = guard;
                }
                drop(gate);
                Err(Error::transport(
                    TransportErrorKind::Read,
                    request,
                    true,
                    std::io::Error::new(std::io::ErrorKind::Interrupted, "connection torn down"),
                ))
            }
        }
    }
}
