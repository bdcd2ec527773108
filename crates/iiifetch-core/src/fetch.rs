//! HTTP fetch abstraction
//!
//! The core never talks to the network directly: manifests and images
//! are fetched through the `Fetch` trait, so the engine can be driven
//! by a scripted fetcher in tests.

use crate::error::HarvestError;
use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;

/// A fetched HTTP response, fully buffered.
///
/// `content_length` is the declared length, kept separately from the
/// body so the executor can detect truncated responses.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP-fetch capability injected into the harvester
#[async_trait]
pub trait Fetch: Send + Sync {
    /// Perform a GET request and buffer the response body.
    ///
    /// Non-2xx statuses are returned as a normal `FetchResponse`, not
    /// an error; `Err` means the request itself failed (connect,
    /// timeout, interrupted body).
    async fn get(&self, url: &str) -> Result<FetchResponse, HarvestError>;
}

/// Real fetcher backed by reqwest
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str) -> Result<Self, HarvestError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn get(&self, url: &str) -> Result<FetchResponse, HarvestError> {
        let response = self.client.get(url).send().await?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let content_length = response.content_length();

        // Trust the declared length for preallocation only up to a
        // sane bound
        let mut body =
            Vec::with_capacity(content_length.unwrap_or(0).min(64 * 1024 * 1024) as usize);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk?);
        }

        Ok(FetchResponse {
            status,
            content_type,
            content_length,
            body,
        })
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted fetcher for tests: maps URLs to canned responses and
    /// counts the requests it receives.
    #[derive(Default)]
    pub struct ScriptedFetcher {
        responses: Mutex<HashMap<String, FetchResponse>>,
        fallback: Mutex<Option<FetchResponse>>,
        pub requests: AtomicUsize,
    }

    impl ScriptedFetcher {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn respond(self, url: &str, response: FetchResponse) -> Self {
            self.responses
                .lock()
                .unwrap()
                .insert(url.to_string(), response);
            self
        }

        /// Response returned for any URL without a scripted entry
        pub fn fallback(self, response: FetchResponse) -> Self {
            *self.fallback.lock().unwrap() = Some(response);
            self
        }

        pub fn request_count(&self) -> usize {
            self.requests.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Fetch for ScriptedFetcher {
        async fn get(&self, url: &str) -> Result<FetchResponse, HarvestError> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            if let Some(response) = self.responses.lock().unwrap().get(url) {
                return Ok(response.clone());
            }
            if let Some(response) = self.fallback.lock().unwrap().clone() {
                return Ok(response);
            }
            Ok(FetchResponse {
                status: 404,
                content_type: None,
                content_length: None,
                body: Vec::new(),
            })
        }
    }

    /// A 200 response carrying `body` with a matching Content-Length
    pub fn ok_response(body: Vec<u8>, content_type: &str) -> FetchResponse {
        FetchResponse {
            status: 200,
            content_type: Some(content_type.to_string()),
            content_length: Some(body.len() as u64),
            body,
        }
    }

    pub fn status_response(status: u16) -> FetchResponse {
        FetchResponse {
            status,
            content_type: None,
            content_length: None,
            body: Vec::new(),
        }
    }

    #[tokio::test]
    async fn scripted_fetcher_counts_requests() {
        let fetcher =
            ScriptedFetcher::new().respond("https://a.example/x", ok_response(vec![1], "image/jpeg"));

        let hit = fetcher.get("https://a.example/x").await.unwrap();
        assert_eq!(hit.status, 200);
        let miss = fetcher.get("https://a.example/y").await.unwrap();
        assert_eq!(miss.status, 404);
        assert_eq!(fetcher.request_count(), 2);
    }
}
