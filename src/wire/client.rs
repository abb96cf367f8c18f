use std::error::Error as _;
use std::io::Read;
use std::time::Duration;

use super::{Endpoint, Properties, Transport, WireError, join_methods};
use crate::version::Version;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Blocking HTTP transport backed by a `ureq` agent.
pub struct HttpTransport {
    endpoint: Endpoint,
    agent: ureq::Agent,
    request_timeout: Duration,
}

impl HttpTransport {
    pub fn new(endpoint: Endpoint, request_timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(request_timeout)
            .redirects(0)
            .user_agent("hydpy-bridge")
            .build();
        Self {
            endpoint,
            agent,
            request_timeout,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint.base_url(), path)
    }

    fn execute_request(&self, method: &str, id: Option<&str>, methods: &[&str]) -> ureq::Request {
        let mut request = self
            .agent
            .request(method, &self.url("execute"))
            .timeout(self.request_timeout);
        if let Some(id) = id {
            request = request.query("id", id);
        }
        request.query("methods", &join_methods(methods))
    }

    fn fetch(
        &self,
        url: &str,
        result: Result<ureq::Response, ureq::Error>,
    ) -> Result<Properties, WireError> {
        let response = accept(url, result)?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut bytes)
            .map_err(|source| {
                if is_timeout(&source) {
                    WireError::Timeout {
                        url: url.to_string(),
                    }
                } else {
                    WireError::Body {
                        url: url.to_string(),
                        source,
                    }
                }
            })?;
        Properties::from_latin1(&bytes).map_err(|source| WireError::Malformed {
            url: url.to_string(),
            source,
        })
    }
}

impl Transport for HttpTransport {
    fn get(&self, id: Option<&str>, methods: &[&str]) -> Result<Properties, WireError> {
        let url = self.url("execute");
        tracing::trace!(endpoint = %self.endpoint, ?id, methods = %join_methods(methods), "GET");
        let result = self.execute_request("GET", id, methods).call();
        self.fetch(&url, result)
    }

    fn post(
        &self,
        id: Option<&str>,
        methods: &[&str],
        body: &Properties,
    ) -> Result<Properties, WireError> {
        let url = self.url("execute");
        tracing::trace!(
            endpoint = %self.endpoint,
            ?id,
            methods = %join_methods(methods),
            items = body.len(),
            "POST"
        );
        let result = self
            .execute_request("POST", id, methods)
            .set("Content-Type", "text/plain; charset=ISO-8859-1")
            .send_string(&body.to_body());
        self.fetch(&url, result)
    }

    fn status(&self, timeout: Duration) -> Result<bool, WireError> {
        let url = self.url("status");
        let result = self.agent.get(&url).timeout(timeout).call();
        let props = self.fetch(&url, result)?;
        Ok(props
            .get("status")
            .is_some_and(|status| status.trim().eq_ignore_ascii_case("ready")))
    }

    fn version(&self, timeout: Duration) -> Result<Version, WireError> {
        let url = self.url("version");
        let result = self.agent.get(&url).timeout(timeout).call();
        let props = self.fetch(&url, result)?;
        let raw = props.get("version").ok_or_else(|| WireError::Version {
            url: url.clone(),
            reason: "response has no `version` entry".to_string(),
        })?;
        raw.parse::<Version>().map_err(|err| WireError::Version {
            url,
            reason: err.to_string(),
        })
    }

    fn close(&self) -> Result<(), WireError> {
        let url = self.url("close_server");
        let result = self.agent.get(&url).timeout(CLOSE_TIMEOUT).call();
        accept(&url, result).map(|_| ())
    }
}

/// Only a plain `200 OK` counts as an answer; `ureq` itself lets every
/// other 1xx-3xx status through.
fn accept(
    url: &str,
    result: Result<ureq::Response, ureq::Error>,
) -> Result<ureq::Response, WireError> {
    let response = result.map_err(|err| map_ureq_error(url, err))?;
    if response.status() != 200 {
        return Err(WireError::Status {
            url: url.to_string(),
            status: response.status(),
        });
    }
    Ok(response)
}

fn map_ureq_error(url: &str, err: ureq::Error) -> WireError {
    match err {
        ureq::Error::Status(status, _) => WireError::Status {
            url: url.to_string(),
            status,
        },
        ureq::Error::Transport(transport) => {
            let timed_out = transport
                .source()
                .and_then(|source| source.downcast_ref::<std::io::Error>())
                .is_some_and(is_timeout);
            if timed_out {
                WireError::Timeout {
                    url: url.to_string(),
                }
            } else {
                WireError::Transport {
                    url: url.to_string(),
                    source: Box::new(transport),
                }
            }
        }
    }
}

fn is_timeout(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
    )
}
