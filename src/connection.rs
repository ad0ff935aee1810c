use std::sync::Arc;
use std::time::Duration;

use crate::error::Error;
use crate::interceptor::{Chain, Interceptor};
use crate::request::{Request, Target};
use crate::response::Response;

/// Reserves connection capacity for call attempts.
///
/// This is the seam to the excluded connection layer: route selection,
/// pooling, TCP/TLS establishment, and wire framing all live behind it.
/// `reserve` is bookkeeping only; blocking connect work happens in
/// [`ConnectionAllocation::open_stream`].
pub trait ConnectionProvider: Send + Sync {
    fn reserve(&self, target: &Target) -> crate::Result<Arc<dyn ConnectionAllocation>>;
}

/// A reserved connection for one call attempt.
///
/// The call core records the live allocation so [`crate::Call::cancel`]
/// can interrupt in-flight I/O, and releases it when an attempt is
/// abandoned. `interrupt` and `release` must be safe to invoke
/// concurrently with a thread blocked inside `open_stream` or stream
/// I/O.
pub trait ConnectionAllocation: Send + Sync {
    /// Whether the underlying connection can serve `target`. The chain
    /// consults this to reject interceptors that change the host or port
    /// after a stream exists.
    fn supports_target(&self, target: &Target) -> bool;

    /// Establishes (or reuses) a connection and opens a request/response
    /// stream on it. Blocks up to `connect_timeout`.
    fn open_stream(
        &self,
        connect_timeout: Duration,
        read_timeout: Duration,
        write_timeout: Duration,
    ) -> crate::Result<Arc<dyn ExchangeStream>>;

    /// Whether another route (alternate IP, proxy hop) is available for
    /// a fresh attempt after a connect failure.
    fn has_next_route(&self) -> bool {
        false
    }

    /// Returns the reservation to the pool. Idempotent.
    fn release(&self);

    /// Tears down in-flight I/O so a blocked attempt fails promptly.
    /// Idempotent; invoked from `cancel()` on an arbitrary thread.
    fn interrupt(&self);
}

/// An open request/response stream on an established connection,
/// consumed only by the terminal call-server stage.
pub trait ExchangeStream: Send + Sync {
    fn write_request(&self, request: &Request) -> crate::Result<()>;

    fn read_response(&self, request: &Request) -> crate::Result<Response>;
}

/// Opens the exchange stream on the allocation reserved by the
/// retry/follow-up stage, then hands it to the inner stages. All
/// blocking connect work for a call attempt happens here.
pub(crate) struct ConnectStage;

impl Interceptor for ConnectStage {
    fn name(&self) -> &str {
        "connect"
    }

    fn intercept(&self, chain: &Chain) -> crate::Result<Response> {
        let request = chain.request().clone();
        let Some(allocation) = chain.allocation().cloned() else {
            return Err(Error::contract(
                self.name(),
                "requires an allocation reserved by the retry stage",
            ));
        };
        if chain.call().is_canceled() {
            return Err(Error::Canceled);
        }
        let stream = allocation.open_stream(
            chain.connect_timeout(),
            chain.read_timeout(),
            chain.write_timeout(),
        )?;
        chain.proceed_with(request, Some(allocation), Some(stream))
    }
}
