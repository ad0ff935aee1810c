use http::header::CONTENT_LENGTH;

use crate::error::Error;
use crate::interceptor::{Chain, Interceptor};
use crate::response::Response;
use crate::util::redact_uri_for_logs;

/// The terminal stage: writes the request to the exchange stream opened
/// by the connect stage and reads the response back. Never delegates
/// further; it is the base case of the pipeline.
pub(crate) struct CallServerStage;

impl Interceptor for CallServerStage {
    fn name(&self) -> &str {
        "call server"
    }

    fn intercept(&self, chain: &Chain) -> crate::Result<Response> {
        let request = chain.request();
        let Some(stream) = chain.stream().cloned() else {
            return Err(Error::contract(
                self.name(),
                "requires an exchange stream opened by the connect stage",
            ));
        };

        stream.write_request(request)?;

        if chain.call().is_canceled() {
            return Err(Error::Canceled);
        }

        let response = stream.read_response(request)?;

        if response.body().is_none() {
            return Err(Error::contract(
                self.name(),
                "transport produced a response with no body",
            ));
        }

        let status = response.status().as_u16();
        if status == 204 || status == 205 {
            let declared = response
                .header(CONTENT_LENGTH)
                .and_then(|value| value.parse::<u64>().ok())
                .unwrap_or(0);
            if declared > 0 {
                return Err(Error::Protocol {
                    method: request.method().clone(),
                    uri: redact_uri_for_logs(request.uri()),
                    message: format!(
                        "HTTP {status} had a non-zero content-length: {declared}"
                    ),
                });
            }
        }

        Ok(response)
    }
}
