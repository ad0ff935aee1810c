use bytes::Bytes;
use http::header::HeaderName;
use http::{HeaderMap, HeaderValue, Method, Uri};

use crate::error::Error;

/// Immutable description of an outbound call.
///
/// A request is never mutated once built; stages that need a modified
/// request (redirect targets, bridged headers) derive a new value via
/// [`Request::into_builder`].
#[derive(Clone, Debug)]
pub struct Request {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Option<Bytes>,
}

impl Request {
    pub fn builder() -> RequestBuilder {
        RequestBuilder::new()
    }

    pub fn get(uri: impl Into<String>) -> RequestBuilder {
        Self::builder().method(Method::GET).uri(uri)
    }

    pub fn post(uri: impl Into<String>) -> RequestBuilder {
        Self::builder().method(Method::POST).uri(uri)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of `name`, lossily decoded.
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers
            .get(name.as_ref())
            .and_then(|value| value.to_str().ok())
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// The host/port/scheme this request resolves to. Builder validation
    /// guarantees the URI carries one.
    pub fn target(&self) -> Target {
        Target::from_uri(&self.uri).expect("request uri validated at build")
    }

    pub fn into_builder(self) -> RequestBuilder {
        RequestBuilder {
            method: self.method,
            uri: Some(Ok(self.uri)),
            headers: self.headers,
            body: self.body,
        }
    }
}

pub struct RequestBuilder {
    method: Method,
    uri: Option<Result<Uri, String>>,
    headers: HeaderMap,
    body: Option<Bytes>,
}

impl RequestBuilder {
    fn new() -> Self {
        Self {
            method: Method::GET,
            uri: None,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        let text = uri.into();
        self.uri = Some(text.parse::<Uri>().map_err(|_| text));
        self
    }

    pub(crate) fn parsed_uri(mut self, uri: Uri) -> Self {
        self.uri = Some(Ok(uri));
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

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn no_body(mut self) -> Self {
        self.body = None;
        self
    }

    pub fn build(self) -> crate::Result<Request> {
        let uri = match self.uri {
            Some(Ok(uri)) => uri,
            Some(Err(text)) => return Err(Error::InvalidUri { uri: text }),
            None => {
                return Err(Error::RequestBuild {
                    message: "request uri is required".to_owned(),
                });
            }
        };
        if Target::from_uri(&uri).is_none() {
            return Err(Error::InvalidUri {
                uri: uri.to_string(),
            });
        }
        Ok(Request {
            method: self.method,
            uri,
            headers: self.headers,
            body: self.body,
        })
    }
}

/// The physical destination of a request: scheme family, host, and
/// effective port. Connection allocations are keyed by this value, and
/// the chain rejects interceptors that change it once a stream exists.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Target {
    tls: bool,
    host: String,
    port: u16,
}

impl Target {
    pub(crate) fn from_uri(uri: &Uri) -> Option<Self> {
        let scheme = uri.scheme_str()?;
        let tls = match scheme {
            "https" => true,
            "http" => false,
            _ => return None,
        };
        let host = uri.host()?.to_ascii_lowercase();
        let port = uri.port_u16().unwrap_or(if tls { 443 } else { 80 });
        Some(Self { tls, host, port })
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Same host and port; scheme may differ. This is the identity the
    /// chain's same-target invariant checks against an existing stream.
    pub fn same_host_port(&self, other: &Target) -> bool {
        self.host == other.host && self.port == other.port
    }

    pub fn same_origin(&self, other: &Target) -> bool {
        self.tls == other.tls && self.same_host_port(other)
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}:{}", self.host, self.port)
    }
}
