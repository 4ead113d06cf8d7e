//! Scripted transports and a recording sleeper for integration tests.

#![allow(dead_code)]

use econfetch_core::fetch::{HttpResponse, HttpTransport, Sleeper};
use econfetch_core::DataError;
use std::cell::RefCell;
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

/// Transport that answers every request through a closure and logs URLs.
pub struct FnTransport<F> {
    respond: F,
    requests: RefCell<Vec<Url>>,
}

impl<F> FnTransport<F>
where
    F: Fn(&Url) -> Result<HttpResponse, DataError>,
{
    pub fn new(respond: F) -> Self {
        Self {
            respond,
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<Url> {
        self.requests.borrow().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.borrow().len()
    }
}

impl<F> HttpTransport for FnTransport<F>
where
    F: Fn(&Url) -> Result<HttpResponse, DataError>,
{
    fn get(&self, url: &Url) -> Result<HttpResponse, DataError> {
        self.requests.borrow_mut().push(url.clone());
        (self.respond)(url)
    }
}

/// Records every requested wait instead of blocking.
#[derive(Default)]
pub struct RecordingSleeper {
    waits: RefCell<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn waits(&self) -> Vec<Duration> {
        self.waits.borrow().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.waits.borrow_mut().push(duration);
    }
}

/// Query parameters of a URL as a map (last value wins).
pub fn params(url: &Url) -> HashMap<String, String> {
    url.query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// Numeric query parameter, defaulting to zero.
pub fn param_usize(url: &Url, name: &str) -> usize {
    params(url)
        .get(name)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

pub fn json_ok(value: serde_json::Value) -> Result<HttpResponse, DataError> {
    Ok(HttpResponse::ok(value.to_string()))
}
