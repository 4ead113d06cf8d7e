//! HTTP transport seam and the JSON API client built on it.
//!
//! [`HttpTransport`] is the only place that touches the network; providers
//! talk to [`ApiClient`], which adds retry, status classification and JSON
//! parsing on top. Tests swap in scripted transports.

use super::query::Query;
use super::retry::{RetryPolicy, Sleeper};
use crate::error::DataError;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// A raw HTTP response, reduced to what the fetch layer inspects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// Parsed `Retry-After` header (delta-seconds form only).
    pub retry_after: Option<Duration>,
    pub body: String,
}

impl HttpResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            retry_after: None,
            body: body.into(),
        }
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            retry_after: None,
            body: body.into(),
        }
    }
}

/// Issues one GET request. Transport-level failures map to `DataError`
/// variants whose [`DataError::is_transient`] decides retry eligibility.
pub trait HttpTransport {
    fn get(&self, url: &Url) -> Result<HttpResponse, DataError>;
}

/// Blocking reqwest transport.
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration, user_agent: Option<&str>) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent.unwrap_or(BROWSER_USER_AGENT))
            .build()
            .map_err(|e| DataError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestTransport {
    fn get(&self, url: &Url) -> Result<HttpResponse, DataError> {
        let resp = self.client.get(url.clone()).send().map_err(classify_reqwest)?;
        let status = resp.status().as_u16();
        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = resp.text().map_err(classify_reqwest)?;
        Ok(HttpResponse {
            status,
            retry_after,
            body,
        })
    }
}

/// Timeouts, connects, and anything that broke an established connection
/// (peer closed a pooled socket, reset mid-body) are retryable; builder,
/// redirect and decode failures are not.
fn classify_reqwest(e: reqwest::Error) -> DataError {
    // Strip the URL so API keys never end up in error messages.
    let e = e.without_url();
    if e.is_timeout() {
        DataError::Timeout(e.to_string())
    } else if e.is_connect() || e.is_request() || e.is_body() || broken_connection(&e) {
        DataError::NetworkUnreachable(e.to_string())
    } else {
        DataError::Request(e.to_string())
    }
}

fn broken_connection(e: &reqwest::Error) -> bool {
    use std::error::Error as _;
    use std::io::ErrorKind;

    let mut source = e.source();
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            return matches!(
                io.kind(),
                ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
                    | ErrorKind::UnexpectedEof
            );
        }
        source = err.source();
    }
    false
}

/// Maps a response status to success or a classified error.
pub fn check_status(resp: HttpResponse) -> Result<String, DataError> {
    match resp.status {
        200..=299 => Ok(resp.body),
        429 => Err(DataError::RateLimited {
            retry_after: resp.retry_after,
        }),
        401 | 403 => Err(DataError::AuthenticationRequired(truncate(&resp.body))),
        status => Err(DataError::HttpStatus {
            status,
            body: truncate(&resp.body),
        }),
    }
}

fn truncate(body: &str) -> String {
    const MAX: usize = 300;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

/// JSON GET client: transport + retry policy + sleeper.
pub struct ApiClient<'a> {
    transport: &'a dyn HttpTransport,
    retry: RetryPolicy,
    sleeper: &'a dyn Sleeper,
}

impl<'a> ApiClient<'a> {
    pub fn new(transport: &'a dyn HttpTransport, retry: RetryPolicy, sleeper: &'a dyn Sleeper) -> Self {
        Self {
            transport,
            retry,
            sleeper,
        }
    }

    pub fn sleeper(&self) -> &'a dyn Sleeper {
        self.sleeper
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// GET `endpoint?query` and parse the body as JSON, retrying transient
    /// failures. A body that is not JSON is a format error and is not retried.
    pub fn get_json(&self, endpoint: &Url, query: &Query) -> Result<Value, DataError> {
        let url = query.to_url(endpoint);
        debug!(url = %query.redacted_url(endpoint), "GET");

        let body = self.retry.run(self.sleeper, |_| {
            self.transport.get(&url).and_then(check_status)
        })?;

        serde_json::from_str(&body).map_err(|e| {
            DataError::ResponseFormatChanged(format!(
                "response from {} is not valid JSON: {e}",
                endpoint
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    struct Scripted(RefCell<VecDeque<Result<HttpResponse, DataError>>>);

    impl HttpTransport for Scripted {
        fn get(&self, _url: &Url) -> Result<HttpResponse, DataError> {
            self.0
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(DataError::Request("script exhausted".into())))
        }
    }

    struct NoSleep;
    impl Sleeper for NoSleep {
        fn sleep(&self, _duration: Duration) {}
    }

    fn endpoint() -> Url {
        Url::parse("https://api.test/v1/data").unwrap()
    }

    #[test]
    fn status_classification() {
        assert_eq!(check_status(HttpResponse::ok("{}")).unwrap(), "{}");
        assert!(matches!(
            check_status(HttpResponse::status(429, "")),
            Err(DataError::RateLimited { retry_after: None })
        ));
        assert!(matches!(
            check_status(HttpResponse::status(403, "nope")),
            Err(DataError::AuthenticationRequired(_))
        ));
        let err = check_status(HttpResponse::status(502, "bad gateway")).unwrap_err();
        assert!(err.is_transient());
        let err = check_status(HttpResponse::status(400, "bad")).unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn get_json_retries_server_errors() {
        let transport = Scripted(RefCell::new(VecDeque::from(vec![
            Ok(HttpResponse::status(503, "busy")),
            Err(DataError::Timeout("slow".into())),
            Ok(HttpResponse::ok(r#"{"a": 1}"#)),
        ])));
        let client = ApiClient::new(&transport, RetryPolicy::new(5, Duration::ZERO), &NoSleep);
        let value = client.get_json(&endpoint(), &Query::new()).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn get_json_rejects_non_json_without_retry() {
        let transport = Scripted(RefCell::new(VecDeque::from(vec![
            Ok(HttpResponse::ok("<html>maintenance</html>")),
            Ok(HttpResponse::ok("{}")),
        ])));
        let client = ApiClient::new(&transport, RetryPolicy::new(5, Duration::ZERO), &NoSleep);
        let err = client.get_json(&endpoint(), &Query::new()).unwrap_err();
        assert!(matches!(err, DataError::ResponseFormatChanged(_)));
        assert_eq!(transport.0.borrow().len(), 1);
    }

    /// Serves `{"ok":1}` on every connection after the first `drop_first`,
    /// which are closed as soon as the request has been read.
    fn flaky_server(drop_first: usize) -> Url {
        use std::io::{BufRead, BufReader, Write};
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            for (i, stream) in listener.incoming().enumerate() {
                let mut stream = stream.unwrap();
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut line = String::new();
                while reader.read_line(&mut line).unwrap_or(0) > 0 && line != "\r\n" {
                    line.clear();
                }
                if i < drop_first {
                    continue;
                }
                let body = r#"{"ok":1}"#;
                let _ = write!(
                    stream,
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
            }
        });
        Url::parse(&format!("http://{addr}/data")).unwrap()
    }

    #[test]
    fn dropped_connection_is_retried() {
        let endpoint = flaky_server(1);
        let transport = ReqwestTransport::new(Duration::from_secs(5), None).unwrap();
        let client = ApiClient::new(&transport, RetryPolicy::new(3, Duration::ZERO), &NoSleep);
        let value = client.get_json(&endpoint, &Query::new()).unwrap();
        assert_eq!(value["ok"], 1);
    }

    #[test]
    fn dropped_connection_is_transient() {
        let endpoint = flaky_server(usize::MAX);
        let transport = ReqwestTransport::new(Duration::from_secs(5), None).unwrap();
        let err = transport.get(&endpoint).unwrap_err();
        assert!(err.is_transient(), "{err:?}");
    }

    #[test]
    fn long_error_bodies_are_truncated() {
        let body = "x".repeat(1000);
        match check_status(HttpResponse::status(400, body)) {
            Err(DataError::HttpStatus { body, .. }) => assert!(body.len() < 400),
            other => panic!("unexpected {other:?}"),
        }
    }
}
