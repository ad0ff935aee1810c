//! `callx` is the call-execution core of an HTTP client: it turns an
//! immutable [`Request`] into a [`Response`] by threading it through an
//! ordered pipeline of interceptors, with synchronous and asynchronous
//! execution, cancellation, and automatic retry/redirect handling.
//!
//! Actual byte-level I/O (connection establishment, pooling, wire
//! framing) stays behind the [`ConnectionProvider`] seam; this crate
//! supplies the lifecycle around it.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use callx::prelude::*;
//!
//! # fn connections() -> Arc<dyn callx::ConnectionProvider> { unimplemented!() }
//! fn main() -> callx::Result<()> {
//!     let client = Client::builder(connections())
//!         .follow_redirects(true)
//!         .user_agent("my-client/1.0")
//!         .build();
//!
//!     let request = Request::get("https://api.example.com/v1/items").build()?;
//!
//!     // Synchronous: runs on this thread.
//!     let response = client.call(request.clone()).execute()?;
//!     println!("status={}", response.status());
//!
//!     // Asynchronous: runs on a dispatcher worker.
//!     let call = client.call(request);
//!     call.enqueue(|_call: &Call, outcome: callx::Result<Response>| {
//!         match outcome {
//!             Ok(response) => println!("status={}", response.status()),
//!             Err(error) => eprintln!("call failed: {error}"),
//!         }
//!     })?;
//!     Ok(())
//! }
//! ```
//!
//! # Pipeline Order
//!
//! Application interceptors, then the retry/follow-up stage, the header
//! bridge, the cache stage, the connect stage, network interceptors
//! (skipped for streaming-protocol calls), and finally the terminal
//! call-server stage that performs the exchange.

pub use http;

mod bridge;
mod cache;
mod call;
mod call_server;
mod client;
mod connection;
mod dispatcher;
mod error;
mod events;
mod interceptor;
mod request;
mod response;
mod retry;
mod util;

#[cfg(test)]
mod tests;

pub use crate::bridge::CookieJar;
pub use crate::cache::CacheProvider;
pub use crate::call::{Call, CallHandle, Callback};
pub use crate::client::{Client, ClientBuilder};
pub use crate::connection::{ConnectionAllocation, ConnectionProvider, ExchangeStream};
pub use crate::dispatcher::Dispatcher;
pub use crate::error::{Error, ErrorCode, TransportErrorKind};
pub use crate::events::{EventListener, NoEvents};
pub use crate::interceptor::{Chain, Interceptor};
pub use crate::request::{Request, RequestBuilder, Target};
pub use crate::response::{Response, ResponseBuilder, ResponseBody};
pub use crate::retry::{
    Authenticator, NoAuthentication, RecoveryPolicy, StandardRecovery,
};

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub mod prelude {
    pub use crate::{
        Call, Callback, Chain, Client, Dispatcher, Error, ErrorCode, EventListener, Interceptor,
        Request, Response, ResponseBody, Target, TransportErrorKind,
    };
}
