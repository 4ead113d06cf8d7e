//! Ordered, multi-valued query parameters with secret redaction.

use crate::error::ConfigError;
use std::collections::BTreeSet;
use url::Url;

/// Ordered mapping from parameter name to one or more values.
///
/// Insertion order of names is kept so rebuilt URLs look like the ones the
/// user pasted. Names marked secret are masked by [`Query::redacted_url`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    params: Vec<(String, Vec<String>)>,
    secrets: BTreeSet<String>,
}

const REDACTED: &str = "***";

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split an absolute URL into its endpoint (no query, no fragment) and
    /// its query parameters. Repeated names are grouped in first-seen order.
    pub fn from_url(raw: &str) -> Result<(Url, Query), ConfigError> {
        let mut url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
            value: raw.to_string(),
            reason: e.to_string(),
        })?;
        if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl {
                value: raw.to_string(),
                reason: "expected an absolute http(s) URL".into(),
            });
        }

        let mut query = Query::new();
        for (name, value) in url.query_pairs() {
            query.push(name.into_owned(), value.into_owned());
        }
        url.set_query(None);
        url.set_fragment(None);
        Ok((url, query))
    }

    /// Append a value, keeping any existing values for `name`.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = name.into();
        let value = value.into();
        match self.params.iter_mut().find(|(n, _)| *n == name) {
            Some((_, values)) => values.push(value),
            None => self.params.push((name, vec![value])),
        }
        self
    }

    /// Replace all values of `name` with a single value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = name.into();
        let value = value.into();
        match self.params.iter_mut().find(|(n, _)| *n == name) {
            Some((_, values)) => *values = vec![value],
            None => self.params.push((name, vec![value])),
        }
        self
    }

    /// Set a parameter whose value must never appear in logs.
    pub fn set_secret(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = name.into();
        self.secrets.insert(name.clone());
        self.set(name, value)
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }

    pub fn remove(&mut self, name: &str) {
        self.params.retain(|(n, _)| n != name);
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Build the full request URL from an endpoint.
    pub fn to_url(&self, endpoint: &Url) -> Url {
        self.build(endpoint, false)
    }

    /// Same as [`Query::to_url`] with secret values masked, for logging.
    pub fn redacted_url(&self, endpoint: &Url) -> Url {
        self.build(endpoint, true)
    }

    fn build(&self, endpoint: &Url, redact: bool) -> Url {
        let mut url = endpoint.clone();
        url.set_query(None);
        if self.params.is_empty() {
            return url;
        }
        {
            let mut pairs = url.query_pairs_mut();
            for (name, values) in &self.params {
                let secret = redact && self.secrets.contains(name);
                for value in values {
                    pairs.append_pair(name, if secret { REDACTED } else { value });
                }
            }
        }
        url
    }
}
