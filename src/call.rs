use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tracing::debug;

use crate::bridge::BridgeStage;
use crate::cache::CacheStage;
use crate::call_server::CallServerStage;
use crate::client::Client;
use crate::connection::{ConnectStage, ConnectionAllocation};
use crate::dispatcher::Dispatcher;
use crate::error::Error;
use crate::interceptor::{Chain, Interceptor};
use crate::request::Request;
use crate::response::Response;
use crate::retry::RetryAndFollowUpStage;
use crate::util::{lock_unpoisoned, redact_uri_for_logs};

/// Receives the single outcome of an enqueued call. Exactly one of the
/// two methods is invoked, at most once; the `Box<Self>` receivers make
/// a second delivery unrepresentable.
pub trait Callback: Send + 'static {
    fn on_response(self: Box<Self>, call: &Call, response: Response);

    fn on_failure(self: Box<Self>, call: &Call, error: Error);
}

impl<F> Callback for F
where
    F: FnOnce(&Call, crate::Result<Response>) + Send + 'static,
{
    fn on_response(self: Box<Self>, call: &Call, response: Response) {
        (*self)(call, Ok(response));
    }

    fn on_failure(self: Box<Self>, call: &Call, error: Error) {
        (*self)(call, Err(error));
    }
}

/// One-shot handle for executing a single request.
///
/// A call may be started (via [`Call::execute`] or [`Call::enqueue`])
/// at most once; a second start fails with
/// [`Error::AlreadyStarted`]. [`Call::cancel`] may be invoked from any
/// thread at any point in the lifecycle.
pub struct Call {
    client: Client,
    request: Request,
    for_streaming: bool,
    state: Arc<CallState>,
}

struct CallState {
    started: AtomicBool,
    canceled: AtomicBool,
    allocation: Mutex<Option<Arc<dyn ConnectionAllocation>>>,
}

impl CallState {
    fn new() -> Self {
        Self {
            started: AtomicBool::new(false),
            canceled: AtomicBool::new(false),
            allocation: Mutex::new(None),
        }
    }
}

impl Call {
    pub(crate) fn new(client: Client, request: Request, for_streaming: bool) -> Self {
        Self {
            client,
            request,
            for_streaming,
            state: Arc::new(CallState::new()),
        }
    }

    /// The caller's original request, unadulterated by redirects or
    /// bridged headers.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Runs the call on the current thread, blocking until a response
    /// arrives or the pipeline fails.
    pub fn execute(&self) -> crate::Result<Response> {
        self.mark_started()?;
        self.client.listener().call_start(self);
        self.client.dispatcher().executed();
        let _finished = SyncFinishGuard {
            dispatcher: self.client.dispatcher(),
        };
        let result = self.run_pipeline();
        self.conclude(result)
    }

    /// Hands the call to the dispatcher for execution on a worker
    /// thread. The callback receives exactly one outcome.
    pub fn enqueue(&self, callback: impl Callback) -> crate::Result<()> {
        self.mark_started()?;
        self.client.listener().call_start(self);
        let task = AsyncTask::new(self.for_worker(), Box::new(callback));
        self.client.dispatcher().enqueue(task);
        Ok(())
    }

    /// Requests cancellation. Idempotent and safe from any thread: sets
    /// the shared flag and interrupts whatever connection allocation is
    /// currently live, so a blocked attempt fails promptly. A no-op on
    /// a call that already finished.
    pub fn cancel(&self) {
        if self.state.canceled.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(uri = %redact_uri_for_logs(self.request.uri()), "canceling call");
        let allocation = lock_unpoisoned(&self.state.allocation).clone();
        if let Some(allocation) = allocation {
            allocation.interrupt();
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.state.canceled.load(Ordering::SeqCst)
    }

    pub fn is_executed(&self) -> bool {
        self.state.started.load(Ordering::SeqCst)
    }

    fn mark_started(&self) -> crate::Result<()> {
        if self.state.started.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyStarted);
        }
        Ok(())
    }

    pub(crate) fn handle(&self) -> CallHandle {
        CallHandle {
            state: Arc::clone(&self.state),
        }
    }

    /// A second handle to the same in-flight call, for the worker
    /// thread. Not the user-visible [`Clone`], which resets state.
    fn for_worker(&self) -> Call {
        Call {
            client: self.client.clone(),
            request: self.request.clone(),
            for_streaming: self.for_streaming,
            state: Arc::clone(&self.state),
        }
    }

    /// Assembles the stage list and drives the chain. Both `execute`
    /// and `enqueue` funnel into this.
    pub(crate) fn run_pipeline(&self) -> crate::Result<Response> {
        let client = &self.client;
        let mut stages: Vec<Arc<dyn Interceptor>> = Vec::with_capacity(
            client.interceptors().len() + client.network_interceptors().len() + 5,
        );
        stages.extend(client.interceptors().iter().cloned());
        stages.push(Arc::new(RetryAndFollowUpStage::new(
            client.clone(),
            self.handle(),
        )));
        stages.push(Arc::new(BridgeStage::new(
            client.cookie_jar(),
            client.user_agent().to_owned(),
        )));
        stages.push(Arc::new(CacheStage::new(client.cache())));
        stages.push(Arc::new(ConnectStage));
        if !self.for_streaming {
            stages.extend(client.network_interceptors().iter().cloned());
        }
        stages.push(Arc::new(CallServerStage));

        let chain = Chain::new(
            stages.into(),
            self.request.clone(),
            self.handle(),
            client.listener(),
            client.connect_timeout(),
            client.read_timeout(),
            client.write_timeout(),
        );
        chain.proceed(self.request.clone())
    }

    /// Applies the completion policy shared by both start paths:
    /// cancellation wins over any other outcome, and the listener sees
    /// exactly one terminal event.
    fn conclude(&self, result: crate::Result<Response>) -> crate::Result<Response> {
        match result {
            Ok(mut response) => {
                if self.is_canceled() {
                    if let Some(body) = response.body_mut() {
                        body.discard();
                    }
                    let error = Error::Canceled;
                    self.client.listener().call_failed(self, &error);
                    Err(error)
                } else {
                    self.client.listener().call_end(self);
                    Ok(response)
                }
            }
            Err(error) => {
                let error = if self.is_canceled() && !matches!(error, Error::Canceled) {
                    Error::Canceled
                } else {
                    error
                };
                self.client.listener().call_failed(self, &error);
                Err(error)
            }
        }
    }
}

impl Clone for Call {
    /// Returns a fresh, unstarted call for the same original request.
    /// Start, cancellation, and follow-up state are not copied.
    fn clone(&self) -> Self {
        Call::new(self.client.clone(), self.request.clone(), self.for_streaming)
    }
}

impl std::fmt::Debug for Call {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Call")
            .field("method", self.request.method())
            .field("uri", &redact_uri_for_logs(self.request.uri()))
            .field("executed", &self.is_executed())
            .field("canceled", &self.is_canceled())
            .finish()
    }
}

/// Lightweight view of a call handed to pipeline stages: cancellation
/// checks plus registration of the live connection allocation.
#[derive(Clone)]
pub struct CallHandle {
    state: Arc<CallState>,
}

impl CallHandle {
    pub fn is_canceled(&self) -> bool {
        self.state.canceled.load(Ordering::SeqCst)
    }

    pub(crate) fn register_allocation(&self, allocation: Arc<dyn ConnectionAllocation>) {
        *lock_unpoisoned(&self.state.allocation) = Some(Arc::clone(&allocation));
        // A cancel that landed before registration still interrupts the
        // new allocation.
        if self.is_canceled() {
            allocation.interrupt();
        }
    }

    pub(crate) fn clear_allocation(&self) {
        *lock_unpoisoned(&self.state.allocation) = None;
    }
}

/// Unit of asynchronous work handed to the dispatcher: one call plus
/// the callback that receives its single outcome.
pub(crate) struct AsyncTask {
    call: Call,
    callback: Box<dyn Callback>,
    host: String,
}

impl AsyncTask {
    fn new(call: Call, callback: Box<dyn Callback>) -> Self {
        let host = call.request.target().host().to_owned();
        Self {
            call,
            callback,
            host,
        }
    }

    pub(crate) fn host(&self) -> &str {
        &self.host
    }

    /// Runs the pipeline and delivers the outcome. Consumes the task,
    /// so the callback cannot fire twice.
    pub(crate) fn run(self) {
        let AsyncTask { call, callback, .. } = self;
        let result = call.run_pipeline();
        match call.conclude(result) {
            Ok(response) => callback.on_response(&call, response),
            Err(error) => callback.on_failure(&call, error),
        }
    }

    /// Fails the task without running it, e.g. when no worker could be
    /// spawned.
    pub(crate) fn fail(self, error: Error) {
        let AsyncTask { call, callback, .. } = self;
        call.client.listener().call_failed(&call, &error);
        callback.on_failure(&call, error);
    }
}

struct SyncFinishGuard<'a> {
    dispatcher: &'a Dispatcher,
}

impl Drop for SyncFinishGuard<'_> {
    fn drop(&mut self) {
        self.dispatcher.finished_sync();
    }
}
