use std::sync::Arc;

use flate2::read::GzDecoder;
use http::header::{
    ACCEPT_ENCODING, CONNECTION, CONTENT_ENCODING, CONTENT_LENGTH, COOKIE, HOST, RANGE,
    SET_COOKIE, USER_AGENT,
};
use http::{HeaderValue, Uri};

use crate::interceptor::{Chain, Interceptor};
use crate::response::{Response, ResponseBody};

/// Seam to the excluded cookie-storage layer.
pub trait CookieJar: Send + Sync {
    /// Cookies to attach to a request for `uri`, as name/value pairs.
    fn load(&self, uri: &Uri) -> Vec<(String, String)>;

    /// `Set-Cookie` values received for `uri`.
    fn save(&self, uri: &Uri, set_cookie_values: &[String]);
}

/// Bridges the caller's request to a network request and the network
/// response back: fills in the headers the protocol needs, attaches and
/// collects cookies, and transparently gunzips responses when it asked
/// for gzip on the caller's behalf.
pub(crate) struct BridgeStage {
    cookie_jar: Option<Arc<dyn CookieJar>>,
    user_agent: String,
}

impl BridgeStage {
    pub(crate) fn new(cookie_jar: Option<Arc<dyn CookieJar>>, user_agent: String) -> Self {
        Self {
            cookie_jar,
            user_agent,
        }
    }
}

impl Interceptor for BridgeStage {
    fn name(&self) -> &str {
        "bridge"
    }

    fn intercept(&self, chain: &Chain) -> crate::Result<Response> {
        let user_request = chain.request().clone();
        let target = user_request.target();
        let mut builder = user_request.clone().into_builder();

        if let Some(body) = user_request.body()
            && user_request.headers().get(CONTENT_LENGTH).is_none()
        {
            builder = builder.header(CONTENT_LENGTH, body.len().to_string());
        }

        if user_request.headers().get(HOST).is_none() {
            let host = match (target.is_tls(), target.port()) {
                (true, 443) | (false, 80) => target.host().to_owned(),
                _ => format!("{}:{}", target.host(), target.port()),
            };
            builder = builder.header(HOST, host);
        }

        if user_request.headers().get(CONNECTION).is_none() {
            builder = builder.header(CONNECTION, HeaderValue::from_static("Keep-Alive"));
        }

        // When the caller did not pick an encoding (and is not doing a
        // ranged read), ask for gzip and decode it transparently below.
        let transparent_gzip = user_request.headers().get(ACCEPT_ENCODING).is_none()
            && user_request.headers().get(RANGE).is_none();
        if transparent_gzip {
            builder = builder.header(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        }

        if let Some(jar) = &self.cookie_jar {
            let cookies = jar.load(user_request.uri());
            if !cookies.is_empty() {
                let header = cookies
                    .iter()
                    .map(|(name, value)| format!("{name}={value}"))
                    .collect::<Vec<_>>()
                    .join("; ");
                builder = builder.header(COOKIE, header);
            }
        }

        if user_request.headers().get(USER_AGENT).is_none() {
            builder = builder.header(USER_AGENT, self.user_agent.clone());
        }

        let network_request = builder.build()?;
        let mut response = chain.proceed(network_request)?;

        if let Some(jar) = &self.cookie_jar {
            let set_cookies: Vec<String> = response
                .headers()
                .get_all(SET_COOKIE)
                .iter()
                .filter_map(|value| value.to_str().ok().map(ToOwned::to_owned))
                .collect();
            if !set_cookies.is_empty() {
                jar.save(response.request().uri(), &set_cookies);
            }
        }

        let gzipped = response
            .header(CONTENT_ENCODING)
            .is_some_and(|encoding| encoding.eq_ignore_ascii_case("gzip"));
        if transparent_gzip && gzipped && response.body().is_some() {
            let mut builder = response.into_builder();
            let body = builder.take_body();
            if let Some(body) = body {
                let reader = body.into_reader()?;
                builder = builder
                    .remove_header(CONTENT_ENCODING.as_str())
                    .remove_header(CONTENT_LENGTH.as_str())
                    .body(ResponseBody::from_reader(
                        Box::new(GzDecoder::new(reader)),
                        None,
                    ));
            }
            response = builder.build()?;
        }

        Ok(response)
    }
}
