mod support;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use callx::{Chain, Client, Error, ErrorCode, Interceptor, Request, Response, ResponseBody};
use http::StatusCode;

use support::{respond, ScriptedConnections};

fn request() -> Request {
    Request::get("https://api.example.com/v1")
        .build()
        .expect("request should build")
}

struct ProceedTwice;

impl Interceptor for ProceedTwice {
    fn name(&self) -> &str {
        "proceed twice"
    }

    fn intercept(&self, chain: &Chain) -> callx::Result<Response> {
        let _first = chain.proceed(chain.request().clone())?;
        chain.proceed(chain.request().clone())
    }
}

#[test]
fn network_stage_proceeding_twice_fails_the_call() {
    let connections = ScriptedConnections::new(vec![respond(200, &[], ""), respond(200, &[], "")]);
    let client = Client::builder(connections.clone())
        .network_interceptor(Arc::new(ProceedTwice))
        .build();

    let error = client
        .call(request())
        .execute()
        .expect_err("contract violation should fail the call");

    assert_eq!(error.code(), ErrorCode::ContractViolation);
    match error {
        Error::ContractViolation { stage, message } => {
            assert_eq!(stage, "proceed twice");
            assert!(message.contains("exactly once"), "message: {message}");
        }
        other => panic!("unexpected error variant: {other}"),
    }
    // Only the first proceed reached the exchange.
    assert_eq!(connections.request_count(), 1);
}

struct ShortCircuit;

impl Interceptor for ShortCircuit {
    fn name(&self) -> &str {
        "short circuit"
    }

    fn intercept(&self, chain: &Chain) -> callx::Result<Response> {
        Response::builder()
            .request(chain.request().clone())
            .status(StatusCode::OK)
            .body(ResponseBody::empty())
            .build()
    }
}

#[test]
fn network_stage_skipping_proceed_fails_the_call() {
    let connections = ScriptedConnections::new(vec![respond(200, &[], "")]);
    let client = Client::builder(connections.clone())
        .network_interceptor(Arc::new(ShortCircuit))
        .build();

    let error = client
        .call(request())
        .execute()
        .expect_err("contract violation should fail the call");

    assert_eq!(error.code(), ErrorCode::ContractViolation);
    assert_eq!(connections.request_count(), 0);
}

struct HostRewrite;

impl Interceptor for HostRewrite {
    fn name(&self) -> &str {
        "host rewrite"
    }

    fn intercept(&self, chain: &Chain) -> callx::Result<Response> {
        let hijacked = chain
            .request()
            .clone()
            .into_builder()
            .uri("https://other.test/v1")
            .build()?;
        chain.proceed(hijacked)
    }
}

#[test]
fn network_stage_changing_the_target_fails_the_call() {
    let connections = ScriptedConnections::new(vec![respond(200, &[], "")]);
    let client = Client::builder(connections.clone())
        .network_interceptor(Arc::new(HostRewrite))
        .build();

    let error = client
        .call(request())
        .execute()
        .expect_err("contract violation should fail the call");

    assert_eq!(error.code(), ErrorCode::ContractViolation);
    match error {
        Error::ContractViolation { message, .. } => {
            assert!(message.contains("host and port"), "message: {message}");
        }
        other => panic!("unexpected error variant: {other}"),
    }
    assert_eq!(connections.request_count(), 0);
}

struct BodylessAnswer;

impl Interceptor for BodylessAnswer {
    fn name(&self) -> &str {
        "bodyless answer"
    }

    fn intercept(&self, chain: &Chain) -> callx::Result<Response> {
        Response::builder()
            .request(chain.request().clone())
            .status(StatusCode::OK)
            .build()
    }
}

#[test]
fn application_stage_returning_a_bodyless_response_fails_the_call() {
    let connections = ScriptedConnections::new(vec![respond(200, &[], "")]);
    let client = Client::builder(connections.clone())
        .interceptor(Arc::new(BodylessAnswer))
        .build();

    let error = client
        .call(request())
        .execute()
        .expect_err("contract violation should fail the call");

    assert_eq!(error.code(), ErrorCode::ContractViolation);
    match error {
        Error::ContractViolation { stage, message } => {
            assert_eq!(stage, "bodyless answer");
            assert!(message.contains("no body"), "message: {message}");
        }
        other => panic!("unexpected error variant: {other}"),
    }
    assert_eq!(connections.request_count(), 0);
}

struct TimeoutProbe {
    observed: Arc<Mutex<Vec<Duration>>>,
}

impl Interceptor for TimeoutProbe {
    fn name(&self) -> &str {
        "timeout probe"
    }

    fn intercept(&self, chain: &Chain) -> callx::Result<Response> {
        let widened = chain.with_read_timeout(Duration::from_secs(30));
        let mut observed = self.observed.lock().expect("lock probe");
        observed.push(chain.read_timeout());
        observed.push(widened.read_timeout());
        observed.push(chain.read_timeout());
        drop(observed);
        chain.proceed(chain.request().clone())
    }
}

#[test]
fn per_stage_timeout_overrides_leave_the_original_cursor_unchanged() {
    let observed = Arc::new(Mutex::new(Vec::new()));
    let connections = ScriptedConnections::new(vec![respond(200, &[], "")]);
    let client = Client::builder(connections)
        .read_timeout(Duration::from_secs(7))
        .interceptor(Arc::new(TimeoutProbe {
            observed: Arc::clone(&observed),
        }))
        .build();

    client.call(request()).execute().expect("call should succeed");

    assert_eq!(
        observed.lock().expect("lock probe").as_slice(),
        [
            Duration::from_secs(7),
            Duration::from_secs(30),
            Duration::from_secs(7),
        ]
    );
}
