use std::sync::Arc;
use std::time::Duration;

use crate::bridge::CookieJar;
use crate::cache::CacheProvider;
use crate::call::Call;
use crate::connection::ConnectionProvider;
use crate::dispatcher::Dispatcher;
use crate::events::{EventListener, NoEvents};
use crate::interceptor::Interceptor;
use crate::request::Request;
use crate::retry::{Authenticator, NoAuthentication, RecoveryPolicy, StandardRecovery};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_FOLLOW_UPS: usize = 20;
const DEFAULT_USER_AGENT: &str = "callx";

/// Shared configuration for calls: the interceptor lists, the seams to
/// the excluded layers, and the policies the pipeline consults.
///
/// Cheap to clone; clones share the dispatcher and connection provider.
/// Holds no per-call state; everything mutable lives on each
/// [`Call`].
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    interceptors: Vec<Arc<dyn Interceptor>>,
    network_interceptors: Vec<Arc<dyn Interceptor>>,
    dispatcher: Dispatcher,
    connections: Arc<dyn ConnectionProvider>,
    cookie_jar: Option<Arc<dyn CookieJar>>,
    cache: Option<Arc<dyn CacheProvider>>,
    authenticator: Arc<dyn Authenticator>,
    recovery_policy: Arc<dyn RecoveryPolicy>,
    listener: Arc<dyn EventListener>,
    follow_redirects: bool,
    follow_tls_redirects: bool,
    retry_on_connection_failure: bool,
    max_follow_ups: usize,
    connect_timeout: Duration,
    read_timeout: Duration,
    write_timeout: Duration,
    user_agent: String,
}

impl Client {
    /// Starts a builder over the given connection layer.
    pub fn builder(connections: Arc<dyn ConnectionProvider>) -> ClientBuilder {
        ClientBuilder::new(connections)
    }

    /// A fresh, unstarted call for `request`.
    pub fn call(&self, request: Request) -> Call {
        Call::new(self.clone(), request, false)
    }

    /// A call for a protocol-upgrade request. Its pipeline skips the
    /// network interceptors, which assume a plain request/response
    /// exchange.
    pub fn streaming_call(&self, request: Request) -> Call {
        Call::new(self.clone(), request, true)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub(crate) fn interceptors(&self) -> &[Arc<dyn Interceptor>] {
        &self.inner.interceptors
    }

    pub(crate) fn network_interceptors(&self) -> &[Arc<dyn Interceptor>] {
        &self.inner.network_interceptors
    }

    pub(crate) fn connections(&self) -> &Arc<dyn ConnectionProvider> {
        &self.inner.connections
    }

    pub(crate) fn cookie_jar(&self) -> Option<Arc<dyn CookieJar>> {
        self.inner.cookie_jar.clone()
    }

    pub(crate) fn cache(&self) -> Option<Arc<dyn CacheProvider>> {
        self.inner.cache.clone()
    }

    pub(crate) fn authenticator(&self) -> &Arc<dyn Authenticator> {
        &self.inner.authenticator
    }

    pub(crate) fn recovery_policy(&self) -> &Arc<dyn RecoveryPolicy> {
        &self.inner.recovery_policy
    }

    pub(crate) fn listener(&self) -> Arc<dyn EventListener> {
        Arc::clone(&self.inner.listener)
    }

    pub(crate) fn follow_redirects(&self) -> bool {
        self.inner.follow_redirects
    }

    pub(crate) fn follow_tls_redirects(&self) -> bool {
        self.inner.follow_tls_redirects
    }

    pub(crate) fn retry_on_connection_failure(&self) -> bool {
        self.inner.retry_on_connection_failure
    }

    pub(crate) fn max_follow_ups(&self) -> usize {
        self.inner.max_follow_ups
    }

    pub(crate) fn connect_timeout(&self) -> Duration {
        self.inner.connect_timeout
    }

    pub(crate) fn read_timeout(&self) -> Duration {
        self.inner.read_timeout
    }

    pub(crate) fn write_timeout(&self) -> Duration {
        self.inner.write_timeout
    }

    pub(crate) fn user_agent(&self) -> &str {
        &self.inner.user_agent
    }
}

pub struct ClientBuilder {
    interceptors: Vec<Arc<dyn Interceptor>>,
    network_interceptors: Vec<Arc<dyn Interceptor>>,
    dispatcher: Dispatcher,
    connections: Arc<dyn ConnectionProvider>,
    cookie_jar: Option<Arc<dyn CookieJar>>,
    cache: Option<Arc<dyn CacheProvider>>,
    authenticator: Arc<dyn Authenticator>,
    recovery_policy: Arc<dyn RecoveryPolicy>,
    listener: Arc<dyn EventListener>,
    follow_redirects: bool,
    follow_tls_redirects: bool,
    retry_on_connection_failure: bool,
    max_follow_ups: usize,
    connect_timeout: Duration,
    read_timeout: Duration,
    write_timeout: Duration,
    user_agent: String,
}

impl ClientBuilder {
    fn new(connections: Arc<dyn ConnectionProvider>) -> Self {
        Self {
            interceptors: Vec::new(),
            network_interceptors: Vec::new(),
            dispatcher: Dispatcher::new(),
            connections,
            cookie_jar: None,
            cache: None,
            authenticator: Arc::new(NoAuthentication),
            recovery_policy: Arc::new(StandardRecovery),
            listener: Arc::new(NoEvents),
            follow_redirects: true,
            follow_tls_redirects: true,
            retry_on_connection_failure: true,
            max_follow_ups: DEFAULT_MAX_FOLLOW_UPS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }

    /// Appends an application interceptor; runs before the built-in
    /// stages, sees the caller's request and the final response.
    pub fn interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Appends a network interceptor; runs once per network attempt,
    /// between connect and the terminal stage, under the chain's
    /// proceed-exactly-once and same-target contracts.
    pub fn network_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.network_interceptors.push(interceptor);
        self
    }

    pub fn dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn cookie_jar(mut self, cookie_jar: Arc<dyn CookieJar>) -> Self {
        self.cookie_jar = Some(cookie_jar);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn CacheProvider>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = authenticator;
        self
    }

    pub fn recovery_policy(mut self, recovery_policy: Arc<dyn RecoveryPolicy>) -> Self {
        self.recovery_policy = recovery_policy;
        self
    }

    pub fn event_listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }

    /// Whether redirects may cross between `http` and `https`.
    pub fn follow_tls_redirects(mut self, follow: bool) -> Self {
        self.follow_tls_redirects = follow;
        self
    }

    pub fn retry_on_connection_failure(mut self, retry: bool) -> Self {
        self.retry_on_connection_failure = retry;
        self
    }

    /// Ceiling on redirects and auth retries per call. Bounds an
    /// otherwise unbounded redirect loop.
    pub fn max_follow_ups(mut self, max_follow_ups: usize) -> Self {
        self.max_follow_ups = max_follow_ups.max(1);
        self
    }

    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn build(self) -> Client {
        Client {
            inner: Arc::new(ClientInner {
                interceptors: self.interceptors,
                network_interceptors: self.network_interceptors,
                dispatcher: self.dispatcher,
                connections: self.connections,
                cookie_jar: self.cookie_jar,
                cache: self.cache,
                authenticator: self.authenticator,
                recovery_policy: self.recovery_policy,
                listener: self.listener,
                follow_redirects: self.follow_redirects,
                follow_tls_redirects: self.follow_tls_redirects,
                retry_on_connection_failure: self.retry_on_connection_failure,
                max_follow_ups: self.max_follow_ups,
                connect_timeout: self.connect_timeout,
                read_timeout: self.read_timeout,
                write_timeout: self.write_timeout,
                user_agent: self.user_agent,
            }),
        }
    }
}
