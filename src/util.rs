use std::sync::Mutex;

use http::header::{CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING};
use http::{HeaderMap, Uri};

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Renders a URI for log lines and error messages without its query,
/// fragment, or userinfo.
pub(crate) fn redact_uri_for_logs(uri: &Uri) -> String {
    let scheme = uri.scheme_str().unwrap_or("http");
    let authority = uri
        .authority()
        .map(|authority| {
            let text = authority.as_str();
            match text.rsplit_once('@') {
                Some((_, host_port)) => host_port,
                None => text,
            }
        })
        .unwrap_or("");
    format!("{scheme}://{authority}{}", uri.path())
}

/// Resolves a `Location` header value against the URI of the request
/// that produced it. Returns `None` for values that do not parse or
/// that resolve to a non-http(s) scheme.
pub(crate) fn resolve_location(base: &Uri, location: &str) -> Option<Uri> {
    let base = url::Url::parse(&base.to_string()).ok()?;
    let resolved = base.join(location).ok()?;
    if resolved.scheme() != "http" && resolved.scheme() != "https" {
        return None;
    }
    resolved.as_str().parse::<Uri>().ok()
}

/// Removes the headers that describe a request body. Used when a
/// follow-up downgrades a method to GET and the body is dropped.
pub(crate) fn strip_body_headers(headers: &mut HeaderMap) {
    headers.remove(TRANSFER_ENCODING);
    headers.remove(CONTENT_LENGTH);
    headers.remove(CONTENT_TYPE);
}

pub(crate) const MAX_ERROR_BODY_LEN: usize = 2048;

pub(crate) fn truncate_body(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.len() <= MAX_ERROR_BODY_LEN {
        return text.into_owned();
    }
    let mut cut = MAX_ERROR_BODY_LEN;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &text[..cut])
}
