use std::sync::Arc;

use tracing::debug;

use crate::interceptor::{Chain, Interceptor};
use crate::request::Request;
use crate::response::Response;

/// Seam to the excluded response-cache layer.
///
/// A hit returned from `lookup` must carry a body; the chain enforces
/// that every stage's response does. Freshness, validation, and storage
/// policy are entirely the provider's concern.
pub trait CacheProvider: Send + Sync {
    /// A stored response serving `request`, if the provider has one it
    /// considers usable.
    fn lookup(&self, request: &Request) -> Option<Response>;

    /// Observes a network response on its way up the chain. Metadata
    /// only; the body stream is not replayable and stays untouched.
    fn on_network_response(&self, _request: &Request, _response: &Response) {}
}

/// Consults the configured [`CacheProvider`] before letting a request
/// reach the connection layer.
pub(crate) struct CacheStage {
    cache: Option<Arc<dyn CacheProvider>>,
}

impl CacheStage {
    pub(crate) fn new(cache: Option<Arc<dyn CacheProvider>>) -> Self {
        Self { cache }
    }
}

impl Interceptor for CacheStage {
    fn name(&self) -> &str {
        "cache"
    }

    fn intercept(&self, chain: &Chain) -> crate::Result<Response> {
        let request = chain.request().clone();

        if let Some(cache) = &self.cache
            && let Some(cached) = cache.lookup(&request)
        {
            debug!(uri = %crate::util::redact_uri_for_logs(request.uri()), "serving response from cache");
            return Ok(cached);
        }

        let response = chain.proceed(request)?;

        if let Some(cache) = &self.cache {
            cache.on_network_response(response.request(), &response);
        }

        Ok(response)
    }
}
