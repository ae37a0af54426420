//! HTTP transport used to reach the collector.
//!
//! The dispatcher only needs one operation: post a form to a URL and learn
//! the response status. Keeping it behind [`Transport`] lets tests swap in a
//! scripted transport without a network.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

const USER_AGENT_VALUE: &str = concat!("testrelay/", env!("CARGO_PKG_VERSION"));

/// Errors raised before a response status is available.
///
/// A non-2xx status is not an error here; the dispatcher decides what counts
/// as success.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The request could not be sent or its response not read.
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Connection-level failure reported by a non-HTTP transport.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The HTTP client could not be built.
    #[error("Failed to create HTTP client: {0}")]
    ClientBuild(String),
}

/// Posts form-encoded payloads to the collector.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends `fields` as an `application/x-www-form-urlencoded` POST body.
    ///
    /// Returns the HTTP status code of the response.
    async fn post_form(&self, url: &str, fields: &[(&'static str, String)])
    -> TransportResult<u16>;
}

/// [`Transport`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> TransportResult<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(default_headers)
            .build()
            .map_err(|e| TransportError::ClientBuild(e.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_form(
        &self,
        url: &str,
        fields: &[(&'static str, String)],
    ) -> TransportResult<u16> {
        let response = self.client.post(url).form(fields).send().await?;
        let status = response.status();
        tracing::debug!("POST {} -> {}", url, status);
        Ok(status.as_u16())
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Scripted in-memory transport for dispatcher and pipeline tests.

    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    /// What the mock does for one attempt.
    #[derive(Debug, Clone)]
    pub enum Reply {
        Status(u16),
        Error(String),
        /// Waits before answering with the status.
        Delayed(Duration, u16),
    }

    /// One recorded request.
    #[derive(Debug, Clone)]
    pub struct Call {
        pub url: String,
        pub fields: Vec<(&'static str, String)>,
    }

    impl Call {
        pub fn field(&self, name: &str) -> Option<&str> {
            self.fields
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.as_str())
        }
    }

    /// Replies are scripted per key, where the key is the value of
    /// `key_field` in the request (or the URL when the field is absent).
    /// Unscripted requests answer 200.
    pub struct MockTransport {
        key_field: &'static str,
        script: Mutex<HashMap<String, VecDeque<Reply>>>,
        calls: Mutex<Vec<Call>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::keyed_by("testcase_no")
        }

        pub fn keyed_by(key_field: &'static str) -> Self {
            Self {
                key_field,
                script: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        /// Queues replies for successive attempts of `key`.
        pub fn script(self, key: &str, replies: impl IntoIterator<Item = Reply>) -> Self {
            self.script
                .lock()
                .unwrap()
                .entry(key.to_string())
                .or_default()
                .extend(replies);
            self
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        pub fn calls_to(&self, url: &str) -> Vec<Call> {
            self.calls().into_iter().filter(|c| c.url == url).collect()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn post_form(
            &self,
            url: &str,
            fields: &[(&'static str, String)],
        ) -> TransportResult<u16> {
            let call = Call {
                url: url.to_string(),
                fields: fields.to_vec(),
            };
            let key = call
                .field(self.key_field)
                .map(String::from)
                .unwrap_or_else(|| url.to_string());
            self.calls.lock().unwrap().push(call);

            let reply = self
                .script
                .lock()
                .unwrap()
                .get_mut(&key)
                .and_then(VecDeque::pop_front)
                .unwrap_or(Reply::Status(200));

            match reply {
                Reply::Status(code) => Ok(code),
                Reply::Error(msg) => Err(TransportError::Connection(msg)),
                Reply::Delayed(delay, code) => {
                    tokio::time::sleep(delay).await;
                    Ok(code)
                }
            }
        }
    }
}
