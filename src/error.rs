use http::Method;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Coarse classification of a transport failure, reported by the
/// connection layer through [`Error::transport`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Tls,
    Read,
    Write,
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Read => "read",
            Self::Write => "write",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    AlreadyStarted,
    Canceled,
    ContractViolation,
    TooManyFollowUps,
    Transport,
    Protocol,
    BodyAlreadyConsumed,
    ReadBody,
    Deserialize,
    InvalidUri,
    RequestBuild,
    ResponseBuild,
    WorkerSpawn,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AlreadyStarted => "already_started",
            Self::Canceled => "canceled",
            Self::ContractViolation => "contract_violation",
            Self::TooManyFollowUps => "too_many_follow_ups",
            Self::Transport => "transport",
            Self::Protocol => "protocol",
            Self::BodyAlreadyConsumed => "body_already_consumed",
            Self::ReadBody => "read_body",
            Self::Deserialize => "deserialize",
            Self::InvalidUri => "invalid_uri",
            Self::RequestBuild => "request_build",
            Self::ResponseBuild => "response_build",
            Self::WorkerSpawn => "worker_spawn",
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("call already started")]
    AlreadyStarted,
    #[error("call canceled")]
    Canceled,
    #[error("interceptor {stage} {message}")]
    ContractViolation { stage: String, message: String },
    #[error("too many follow-up requests ({count}) for {method} {uri}")]
    TooManyFollowUps {
        count: usize,
        method: Method,
        uri: String,
    },
    #[error("transport error ({kind}) for {method} {uri}: {source}")]
    Transport {
        kind: TransportErrorKind,
        method: Method,
        uri: String,
        /// Whether the request may already have reached the server when
        /// the failure occurred. Recovery policies consult this to avoid
        /// replaying a request the server may have acted on.
        request_sent: bool,
        #[source]
        source: BoxError,
    },
    #[error("protocol error for {method} {uri}: {message}")]
    Protocol {
        method: Method,
        uri: String,
        message: String,
    },
    #[error("response body already consumed")]
    BodyAlreadyConsumed,
    #[error("failed to read response body: {source}")]
    ReadBody {
        #[source]
        source: BoxError,
    },
    #[error("failed to decode response json: {source}; body={body}")]
    Deserialize {
        #[source]
        source: serde_json::Error,
        body: String,
    },
    #[error("invalid request uri: {uri}")]
    InvalidUri { uri: String },
    #[error("failed to build http request: {message}")]
    RequestBuild { message: String },
    #[error("failed to build http response: {message}")]
    ResponseBuild { message: String },
    #[error("failed to spawn dispatcher worker: {message}")]
    WorkerSpawn { message: String },
}

impl Error {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::AlreadyStarted => ErrorCode::AlreadyStarted,
            Self::Canceled => ErrorCode::Canceled,
            Self::ContractViolation { .. } => ErrorCode::ContractViolation,
            Self::TooManyFollowUps { .. } => ErrorCode::TooManyFollowUps,
            Self::Transport { .. } => ErrorCode::Transport,
            Self::Protocol { .. } => ErrorCode::Protocol,
            Self::BodyAlreadyConsumed => ErrorCode::BodyAlreadyConsumed,
            Self::ReadBody { .. } => ErrorCode::ReadBody,
            Self::Deserialize { .. } => ErrorCode::Deserialize,
            Self::InvalidUri { .. } => ErrorCode::InvalidUri,
            Self::RequestBuild { .. } => ErrorCode::RequestBuild,
            Self::ResponseBuild { .. } => ErrorCode::ResponseBuild,
            Self::WorkerSpawn { .. } => ErrorCode::WorkerSpawn,
        }
    }

    /// Builds a [`Error::Transport`] for a failure observed while
    /// advancing `request` through the connection layer.
    pub fn transport(
        kind: TransportErrorKind,
        request: &crate::Request,
        request_sent: bool,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Transport {
            kind,
            method: request.method().clone(),
            uri: crate::util::redact_uri_for_logs(request.uri()),
            request_sent,
            source: source.into(),
        }
    }

    pub(crate) fn contract(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ContractViolation {
            stage: stage.into(),
            message: message.into(),
        }
    }
}
