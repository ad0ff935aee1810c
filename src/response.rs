use std::io::Read;

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, StatusCode};
use http::header::HeaderName;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::Error;
use crate::request::Request;
use crate::util::truncate_body;

/// Immutable result of a call, bound to the request that produced it.
///
/// The body is a single-use, forward-only stream; everything else may be
/// inspected freely. A response that followed a redirect or retry chain
/// records the body-stripped response that triggered it in
/// [`Response::prior`].
#[derive(Debug)]
pub struct Response {
    request: Request,
    status: StatusCode,
    headers: HeaderMap,
    body: Option<ResponseBody>,
    prior: Option<Box<Response>>,
}

impl Response {
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder::new()
    }

    /// The request this response answered, after any rewriting by
    /// pipeline stages, not necessarily the caller's original.
    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers
            .get(name.as_ref())
            .and_then(|value| value.to_str().ok())
    }

    pub fn body(&self) -> Option<&ResponseBody> {
        self.body.as_ref()
    }

    pub fn body_mut(&mut self) -> Option<&mut ResponseBody> {
        self.body.as_mut()
    }

    /// The redirect or retry response that led to this one, body
    /// stripped.
    pub fn prior(&self) -> Option<&Response> {
        self.prior.as_deref()
    }

    pub fn into_builder(self) -> ResponseBuilder {
        ResponseBuilder {
            request: Some(self.request),
            status: self.status,
            headers: self.headers,
            body: self.body,
            prior: self.prior,
        }
    }

    /// Metadata-only copy with the body dropped, used to record prior
    /// responses on a follow-up.
    pub(crate) fn detached(&self) -> Response {
        Response {
            request: self.request.clone(),
            status: self.status,
            headers: self.headers.clone(),
            body: None,
            prior: self.prior.as_ref().map(|prior| Box::new(prior.detached())),
        }
    }

    pub(crate) fn with_prior(mut self, prior: Response) -> Response {
        self.prior = Some(Box::new(prior));
        self
    }
}

pub struct ResponseBuilder {
    request: Option<Request>,
    status: StatusCode,
    headers: HeaderMap,
    body: Option<ResponseBody>,
    prior: Option<Box<Response>>,
}

impl ResponseBuilder {
    fn new() -> Self {
        Self {
            request: None,
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: None,
            prior: None,
        }
    }

    pub fn request(mut self, request: Request) -> Self {
        self.request = Some(request);
        self
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn header(
        mut self,
        name: impl TryInto<HeaderName>,
        value: impl TryInto<HeaderValue>,
    ) -> Self {
        if let (Ok(name), Ok(value)) = (name.try_into(), value.try_into()) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn remove_header(mut self, name: impl AsRef<str>) -> Self {
        if let Ok(name) = name.as_ref().parse::<HeaderName>() {
            self.headers.remove(name);
        }
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn body(mut self, body: ResponseBody) -> Self {
        self.body = Some(body);
        self
    }

    /// Removes and returns the body carried over by
    /// [`Response::into_builder`], for stages that re-wrap it.
    pub fn take_body(&mut self) -> Option<ResponseBody> {
        self.body.take()
    }

    pub fn build(self) -> crate::Result<Response> {
        let Some(request) = self.request else {
            return Err(Error::ResponseBuild {
                message: "response requires the request that produced it".to_owned(),
            });
        };
        Ok(Response {
            request,
            status: self.status,
            headers: self.headers,
            body: self.body,
            prior: self.prior,
        })
    }
}

/// A single-use, forward-only response body.
///
/// Consuming it a second time fails with
/// [`Error::BodyAlreadyConsumed`]. Dropping it unread releases the
/// underlying stream (and whatever connection resources back it) and
/// notes the discard in the log.
pub struct ResponseBody {
    reader: Option<Box<dyn Read + Send>>,
    declared_length: Option<u64>,
    consumed: bool,
}

impl ResponseBody {
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        let declared_length = Some(bytes.len() as u64);
        Self {
            reader: Some(Box::new(std::io::Cursor::new(bytes))),
            declared_length,
            consumed: false,
        }
    }

    pub fn from_reader(reader: Box<dyn Read + Send>, declared_length: Option<u64>) -> Self {
        Self {
            reader: Some(reader),
            declared_length,
            consumed: false,
        }
    }

    pub fn empty() -> Self {
        Self::from_bytes(Bytes::new())
    }

    /// Content length as declared by the transport, if known.
    pub fn declared_length(&self) -> Option<u64> {
        self.declared_length
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed
    }

    /// Reads the body to completion. Single use.
    pub fn bytes(&mut self) -> crate::Result<Bytes> {
        let Some(mut reader) = self.reader.take() else {
            return Err(Error::BodyAlreadyConsumed);
        };
        self.consumed = true;
        let mut collected = match self.declared_length {
            Some(length) => Vec::with_capacity(length.min(1 << 20) as usize),
            None => Vec::new(),
        };
        reader
            .read_to_end(&mut collected)
            .map_err(|source| Error::ReadBody {
                source: source.into(),
            })?;
        Ok(Bytes::from(collected))
    }

    pub fn text(&mut self) -> crate::Result<String> {
        let bytes = self.bytes()?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn json<T>(&mut self) -> crate::Result<T>
    where
        T: DeserializeOwned,
    {
        let bytes = self.bytes()?;
        serde_json::from_slice(&bytes).map_err(|source| Error::Deserialize {
            source,
            body: truncate_body(&bytes),
        })
    }

    /// Takes the raw stream out of the body. Single use, like
    /// [`ResponseBody::bytes`].
    pub fn into_reader(mut self) -> crate::Result<Box<dyn Read + Send>> {
        let Some(reader) = self.reader.take() else {
            return Err(Error::BodyAlreadyConsumed);
        };
        self.consumed = true;
        Ok(reader)
    }

    /// Drops the remaining stream without reading it. Used when a stage
    /// abandons a response, e.g. before following a redirect.
    pub(crate) fn discard(&mut self) {
        if self.reader.take().is_some() {
            self.consumed = true;
        }
    }
}

impl Drop for ResponseBody {
    fn drop(&mut self) {
        if !self.consumed && self.reader.is_some() {
            debug!("response body dropped without being consumed");
        }
    }
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ResponseBody")
            .field("declared_length", &self.declared_length)
            .field("consumed", &self.consumed)
            .finish_non_exhaustive()
    }
}
