//! Remote HTTP data source.

use crate::cancel::CancelToken;
use crate::error::{DataError, Result};
use crate::source::DataSource;
use crate::types::{Record, RecordKey};
use std::marker::PhantomData;
use std::time::Duration;
use tracing::debug;

/// Remote endpoint configuration.
#[derive(Clone, Debug)]
pub struct RemoteConfig {
    /// Base URL, e.g. `https://api.example.com`.
    pub base_url: String,

    /// TCP connect timeout.
    pub connect_timeout: Duration,

    /// Whole-request timeout (connect + read + write).
    pub request_timeout: Duration,
}

impl RemoteConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Data source backed by a JSON-over-HTTP collection endpoint.
///
/// Maps `GET {base}/{resource}` to the full collection and
/// `GET {base}/{resource}/{key}` to a single record. Any status outside
/// 2xx is an `Http` error; timeouts, connection failures and bodies that
/// fail to decode are `Network` errors. The upstream API owns no search
/// or count operation, so both are served from a full fetch.
pub struct RemoteSource<T> {
    client: reqwest::blocking::Client,
    base_url: String,
    resource: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Record> RemoteSource<T> {
    /// Build a source for one resource path, e.g. `users`.
    pub fn new(config: RemoteConfig, resource: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| DataError::Network(format!("client setup failed: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            resource: resource.into(),
            _marker: PhantomData,
        })
    }

    fn collection_url(&self) -> String {
        format!("{}/{}", self.base_url, self.resource)
    }

    fn record_url(&self, key: &RecordKey) -> String {
        format!("{}/{}/{}", self.base_url, self.resource, key)
    }

    /// Send a request and map the transport/status outcome, returning the
    /// response for body decoding.
    fn send(
        &self,
        request: reqwest::blocking::RequestBuilder,
        cancel: &CancelToken,
    ) -> Result<reqwest::blocking::Response> {
        if cancel.is_cancelled() {
            return Err(DataError::Network("operation cancelled".to_string()));
        }

        let response = request.send().map_err(classify_transport)?;
        let status = response.status();
        debug!(status = status.as_u16(), url = %response.url(), "remote response");

        if !status.is_success() {
            return Err(DataError::Http {
                status: status.as_u16(),
                message: status
                    .canonical_reason()
                    .unwrap_or("unexpected status")
                    .to_string(),
            });
        }
        Ok(response)
    }
}

fn classify_transport(e: reqwest::Error) -> DataError {
    if e.is_timeout() {
        DataError::Network(format!("request timed out: {}", e))
    } else if e.is_connect() {
        DataError::Network(format!("connection failed: {}", e))
    } else {
        DataError::Network(e.to_string())
    }
}

fn decode_failure(e: reqwest::Error) -> DataError {
    DataError::Network(format!("malformed response body: {}", e))
}

impl<T: Record> DataSource<T> for RemoteSource<T> {
    fn fetch_all(&self, cancel: &CancelToken) -> Result<Vec<T>> {
        let url = self.collection_url();
        debug!(%url, "GET collection");
        let response = self.send(self.client.get(&url), cancel)?;
        response.json::<Vec<T>>().map_err(decode_failure)
    }

    fn fetch_by_key(&self, key: &RecordKey, cancel: &CancelToken) -> Result<T> {
        let url = self.record_url(key);
        debug!(%url, "GET record");
        let response = self.send(self.client.get(&url), cancel)?;
        response.json::<T>().map_err(decode_failure)
    }

    fn search(&self, needle: &str, cancel: &CancelToken) -> Result<Vec<T>> {
        let needle = needle.to_lowercase();
        let all = self.fetch_all(cancel)?;
        Ok(all
            .into_iter()
            .filter(|record| record.index_text().to_lowercase().contains(&needle))
            .collect())
    }

    fn write(&self, record: &T, cancel: &CancelToken) -> Result<()> {
        let url = self.record_url(&record.key());
        debug!(%url, "PUT record");
        self.send(self.client.put(&url).json(record), cancel)?;
        Ok(())
    }

    fn delete(&self, record: &T, cancel: &CancelToken) -> Result<()> {
        let url = self.record_url(&record.key());
        debug!(%url, "DELETE record");
        self.send(self.client.delete(&url), cancel)?;
        Ok(())
    }

    fn clear(&self, cancel: &CancelToken) -> Result<()> {
        let url = self.collection_url();
        debug!(%url, "DELETE collection");
        self.send(self.client.delete(&url), cancel)?;
        Ok(())
    }

    fn count_all(&self, cancel: &CancelToken) -> Result<u64> {
        Ok(self.fetch_all(cancel)?.len() as u64)
    }
}
