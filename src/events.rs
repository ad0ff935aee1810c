use crate::call::Call;
use crate::error::Error;
use crate::request::Request;

/// Observer for call diagnostics. Purely additive; implementations must
/// never assume they can alter control flow.
///
/// Stage and follow-up notifications fire on the thread driving the
/// chain; call-level notifications fire on the starting thread for
/// synchronous calls and on a dispatcher worker for enqueued ones.
pub trait EventListener: Send + Sync {
    fn call_start(&self, _call: &Call) {}

    fn call_end(&self, _call: &Call) {}

    fn call_failed(&self, _call: &Call, _error: &Error) {}

    /// A pipeline stage is about to see `request`.
    fn stage_start(&self, _stage: &str, _request: &Request) {}

    /// The retry stage decided to re-enter the pipeline with a new
    /// request; `follow_up_count` counts follow-ups so far, this one
    /// included.
    fn follow_up(&self, _request: &Request, _follow_up_count: usize) {}

    /// A transport failure was absorbed and the attempt will be retried.
    fn recoverable_failure(&self, _request: &Request, _error: &Error) {}
}

/// The default listener: ignores everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoEvents;

impl EventListener for NoEvents {}
