use http::header::{AUTHORIZATION, LOCATION};
use http::{Method, StatusCode};
use tracing::debug;

use crate::call::CallHandle;
use crate::client::Client;
use crate::error::{Error, TransportErrorKind};
use crate::interceptor::{Chain, Interceptor};
use crate::request::Request;
use crate::response::Response;
use crate::util::{redact_uri_for_logs, resolve_location, strip_body_headers};

/// Decides which transport failures may be absorbed by a silent
/// re-attempt. The exact boundary belongs to the connection layer's
/// error taxonomy, so it is policy rather than a hard-coded list.
pub trait RecoveryPolicy: Send + Sync {
    fn is_recoverable(&self, error: &Error, request: &Request) -> bool;
}

/// Default recovery policy: failures to reach the server (DNS,
/// connect) are recoverable; failures after the request may have been
/// transmitted are not, nor are TLS failures, which tend to repeat on
/// every route.
#[derive(Clone, Copy, Debug, Default)]
pub struct StandardRecovery;

impl RecoveryPolicy for StandardRecovery {
    fn is_recoverable(&self, error: &Error, _request: &Request) -> bool {
        let Error::Transport {
            kind, request_sent, ..
        } = error
        else {
            return false;
        };
        match kind {
            TransportErrorKind::Dns | TransportErrorKind::Connect => true,
            TransportErrorKind::Read | TransportErrorKind::Write => !request_sent,
            TransportErrorKind::Tls | TransportErrorKind::Other => false,
        }
    }
}

/// Reacts to an authentication challenge (401) by producing a request
/// with credentials attached, or `None` to give up and surface the
/// challenge to the caller.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, response: &Response) -> crate::Result<Option<Request>>;
}

/// The default authenticator: never answers a challenge.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoAuthentication;

impl Authenticator for NoAuthentication {
    fn authenticate(&self, _response: &Response) -> crate::Result<Option<Request>> {
        Ok(None)
    }
}

/// Drives the attempt loop for one call: reserves a connection, sends
/// the request through the inner stages, and decides after each result
/// whether to retry, follow up with a rewritten request, or surface the
/// result upward. Owns registering the live allocation with the call so
/// `cancel()` can tear down in-flight I/O.
pub(crate) struct RetryAndFollowUpStage {
    client: Client,
    call: CallHandle,
}

impl RetryAndFollowUpStage {
    pub(crate) fn new(client: Client, call: CallHandle) -> Self {
        Self { client, call }
    }

    fn can_recover(
        &self,
        error: &Error,
        request: &Request,
        allocation: &dyn crate::connection::ConnectionAllocation,
    ) -> bool {
        if !self.client.retry_on_connection_failure() {
            return false;
        }
        if !self.client.recovery_policy().is_recoverable(error, request) {
            return false;
        }
        allocation.has_next_route()
    }

    /// What, if anything, to send next after `response`. `None` means
    /// the response goes to the caller as-is.
    fn follow_up_request(
        &self,
        response: &Response,
        request: &Request,
    ) -> crate::Result<Option<Request>> {
        match response.status().as_u16() {
            401 => self.client.authenticator().authenticate(response),
            // Proxy authentication belongs to the excluded proxy layer.
            407 => Ok(None),
            307 | 308 => {
                // Methods with bodies must not be replayed to a new
                // target without the server's consent.
                if request.method() != Method::GET && request.method() != Method::HEAD {
                    return Ok(None);
                }
                self.redirect(response, request)
            }
            300..=303 => self.redirect(response, request),
            408 => {
                if !self.client.retry_on_connection_failure() {
                    return Ok(None);
                }
                // A second 408 in a row means the server really wants
                // us to go away.
                if response
                    .prior()
                    .is_some_and(|prior| prior.status() == StatusCode::REQUEST_TIMEOUT)
                {
                    return Ok(None);
                }
                Ok(Some(request.clone()))
            }
            _ => Ok(None),
        }
    }

    fn redirect(&self, response: &Response, request: &Request) -> crate::Result<Option<Request>> {
        if !self.client.follow_redirects() {
            return Ok(None);
        }
        let Some(location) = response.header(LOCATION) else {
            debug!(
                status = response.status().as_u16(),
                "redirect response without a location header; surfacing it"
            );
            return Ok(None);
        };
        let Some(next_uri) = resolve_location(request.uri(), location) else {
            debug!(location, "unresolvable redirect location; surfacing the response");
            return Ok(None);
        };

        let next_target = match crate::request::Target::from_uri(&next_uri) {
            Some(target) => target,
            None => return Ok(None),
        };
        let current_target = request.target();
        if next_target.is_tls() != current_target.is_tls()
            && !self.client.follow_tls_redirects()
        {
            return Ok(None);
        }

        let mut builder = request.clone().into_builder().parsed_uri(next_uri);

        // All 3xx responses except 307/308 downgrade to GET (which
        // loses the body); 307/308 only reach here for GET/HEAD.
        let converts_to_get = matches!(response.status().as_u16(), 300..=303)
            && request.method() != Method::GET
            && request.method() != Method::HEAD;
        if converts_to_get {
            let mut headers = request.headers().clone();
            strip_body_headers(&mut headers);
            builder = builder.method(Method::GET).headers(headers).no_body();
        }

        // Credentials must not leak across origins.
        if !next_target.same_origin(&current_target) {
            builder = builder.remove_header(AUTHORIZATION.as_str());
        }

        Ok(Some(builder.build()?))
    }
}

impl Interceptor for RetryAndFollowUpStage {
    fn name(&self) -> &str {
        "retry and follow-up"
    }

    fn intercept(&self, chain: &Chain) -> crate::Result<Response> {
        let mut request = chain.request().clone();
        let mut prior: Option<Response> = None;
        let mut follow_up_count = 0_usize;

        loop {
            if self.call.is_canceled() {
                return Err(Error::Canceled);
            }

            let allocation = self.client.connections().reserve(&request.target())?;
            self.call.register_allocation(allocation.clone());

            let result = chain.proceed_with(request.clone(), Some(allocation.clone()), None);
            let mut response = match result {
                Ok(response) => response,
                Err(error) => {
                    if self.call.is_canceled() {
                        allocation.release();
                        self.call.clear_allocation();
                        return Err(Error::Canceled);
                    }
                    if self.can_recover(&error, &request, allocation.as_ref()) {
                        debug!(
                            uri = %redact_uri_for_logs(request.uri()),
                            error = %error,
                            "recovering from transport failure with a fresh attempt"
                        );
                        chain.listener().recoverable_failure(&request, &error);
                        allocation.release();
                        self.call.clear_allocation();
                        continue;
                    }
                    allocation.release();
                    self.call.clear_allocation();
                    return Err(error);
                }
            };

            if let Some(prior_response) = prior.take() {
                response = response.with_prior(prior_response);
            }

            let Some(next_request) = self.follow_up_request(&response, &request)? else {
                return Ok(response);
            };

            follow_up_count += 1;
            if follow_up_count > self.client.max_follow_ups() {
                if let Some(body) = response.body_mut() {
                    body.discard();
                }
                allocation.release();
                self.call.clear_allocation();
                return Err(Error::TooManyFollowUps {
                    count: follow_up_count,
                    method: request.method().clone(),
                    uri: redact_uri_for_logs(request.uri()),
                });
            }

            debug!(
                from = %redact_uri_for_logs(request.uri()),
                to = %redact_uri_for_logs(next_request.uri()),
                follow_up_count,
                "following up"
            );
            chain.listener().follow_up(&next_request, follow_up_count);

            // The abandoned response's stream is closed before the next
            // attempt reserves a fresh connection.
            if let Some(body) = response.body_mut() {
                body.discard();
            }
            allocation.release();
            self.call.clear_allocation();

            prior = Some(response.detached());
            request = next_request;
        }
    }
}
