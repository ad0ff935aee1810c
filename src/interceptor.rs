use std::cell::Cell;
use std::sync::Arc;
use std::time::Duration;

use crate::call::CallHandle;
use crate::connection::{ConnectionAllocation, ExchangeStream};
use crate::error::Error;
use crate::events::EventListener;
use crate::request::Request;
use crate::response::Response;

/// A pipeline stage: given a chain cursor positioned at the next stage,
/// produce a response, either by answering directly or by delegating
/// via [`Chain::proceed`].
///
/// Implementations are shared across calls and threads; any state they
/// keep must be synchronized.
pub trait Interceptor: Send + Sync {
    /// Identifies the stage in contract-violation errors and stage
    /// events.
    fn name(&self) -> &str {
        "interceptor"
    }

    fn intercept(&self, chain: &Chain) -> crate::Result<Response>;
}

/// An immutable, index-addressed cursor over the call's stage list.
///
/// `proceed` never mutates the cursor it is called on; it builds a new
/// cursor at `index + 1` and dispatches the stage there. Each stage
/// therefore observes a stable view of the rest of the pipeline
/// regardless of what sibling stages do. The only interior state is a
/// counter enforcing the proceed-exactly-once contract.
pub struct Chain {
    stages: Arc<[Arc<dyn Interceptor>]>,
    index: usize,
    request: Request,
    allocation: Option<Arc<dyn ConnectionAllocation>>,
    stream: Option<Arc<dyn ExchangeStream>>,
    call: CallHandle,
    listener: Arc<dyn EventListener>,
    connect_timeout: Duration,
    read_timeout: Duration,
    write_timeout: Duration,
    proceeds: Cell<usize>,
}

impl Chain {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        stages: Arc<[Arc<dyn Interceptor>]>,
        request: Request,
        call: CallHandle,
        listener: Arc<dyn EventListener>,
        connect_timeout: Duration,
        read_timeout: Duration,
        write_timeout: Duration,
    ) -> Self {
        Self {
            stages,
            index: 0,
            request,
            allocation: None,
            stream: None,
            call,
            listener,
            connect_timeout,
            read_timeout,
            write_timeout,
            proceeds: Cell::new(0),
        }
    }

    /// The request this cursor is advancing.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Handle to the owning call, for cancellation checks.
    pub fn call(&self) -> &CallHandle {
        &self.call
    }

    /// The connection reserved for the current attempt, once the retry
    /// stage has established one.
    pub fn allocation(&self) -> Option<&Arc<dyn ConnectionAllocation>> {
        self.allocation.as_ref()
    }

    /// The open exchange stream, once the connect stage has produced
    /// one. Stages between connect and call-server may inspect it;
    /// everything else treats it as opaque.
    pub fn stream(&self) -> Option<&Arc<dyn ExchangeStream>> {
        self.stream.as_ref()
    }

    pub(crate) fn listener(&self) -> &Arc<dyn EventListener> {
        &self.listener
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    /// A new cursor with a different connect timeout; the receiver is
    /// unchanged, consistent with cursor immutability.
    pub fn with_connect_timeout(&self, connect_timeout: Duration) -> Chain {
        Chain {
            connect_timeout,
            ..self.duplicate()
        }
    }

    pub fn with_read_timeout(&self, read_timeout: Duration) -> Chain {
        Chain {
            read_timeout,
            ..self.duplicate()
        }
    }

    pub fn with_write_timeout(&self, write_timeout: Duration) -> Chain {
        Chain {
            write_timeout,
            ..self.duplicate()
        }
    }

    fn duplicate(&self) -> Chain {
        Chain {
            stages: Arc::clone(&self.stages),
            index: self.index,
            request: self.request.clone(),
            allocation: self.allocation.clone(),
            stream: self.stream.clone(),
            call: self.call.clone(),
            listener: Arc::clone(&self.listener),
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
            proceeds: Cell::new(0),
        }
    }

    /// Delegates `request` to the next stage and returns its response.
    ///
    /// Once a stream exists for this call, the caller must invoke this
    /// exactly once and must not change the request's host or port;
    /// violations fail the whole call with a contract error.
    pub fn proceed(&self, request: Request) -> crate::Result<Response> {
        self.proceed_with(request, self.allocation.clone(), self.stream.clone())
    }

    pub(crate) fn proceed_with(
        &self,
        request: Request,
        allocation: Option<Arc<dyn ConnectionAllocation>>,
        stream: Option<Arc<dyn ExchangeStream>>,
    ) -> crate::Result<Response> {
        if self.index >= self.stages.len() {
            return Err(Error::contract(
                "chain",
                "proceeded past the terminal stage",
            ));
        }

        self.proceeds.set(self.proceeds.get() + 1);

        // With a live stream the attempt is committed to one physical
        // connection; the incoming request must still fit it, and this
        // cursor may be advanced only once.
        if self.stream.is_some() {
            let same_target = self
                .allocation
                .as_ref()
                .is_some_and(|allocation| allocation.supports_target(&request.target()));
            if !same_target {
                return Err(Error::contract(
                    self.caller_name(),
                    "must retain the same host and port",
                ));
            }
            if self.proceeds.get() > 1 {
                return Err(Error::contract(
                    self.caller_name(),
                    "must call proceed() exactly once",
                ));
            }
        }

        let next = Chain {
            stages: Arc::clone(&self.stages),
            index: self.index + 1,
            request,
            allocation,
            stream,
            call: self.call.clone(),
            listener: Arc::clone(&self.listener),
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
            proceeds: Cell::new(0),
        };
        let stage = &self.stages[self.index];
        self.listener.stage_start(stage.name(), &next.request);
        let response = stage.intercept(&next)?;

        if next.stream.is_some()
            && self.index + 1 < self.stages.len()
            && next.proceeds.get() != 1
        {
            return Err(Error::contract(
                stage.name(),
                "must call proceed() exactly once",
            ));
        }

        if response.body().is_none() {
            return Err(Error::contract(
                stage.name(),
                "returned a response with no body",
            ));
        }

        Ok(response)
    }

    fn caller_name(&self) -> &str {
        if self.index == 0 {
            "chain"
        } else {
            self.stages[self.index - 1].name()
        }
    }
}
