//! Test doubles for the collaborator traits.
//!
//! Each double records how often it was called so tests can assert that a
//! collaborator was, or was not, consulted.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::error::{FetchError, LlmError, RetrievalError};
use crate::llm::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};
use crate::retrieval::ContextSearch;
use crate::website::{FetchedPage, WebFetcher};

/// Scripted `LlmProvider` that records every request.
pub struct MockLlm {
    reply: Option<String>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockLlm {
    /// Answers every request with `reply`.
    pub fn replying(reply: impl Into<String>) -> Self {
        Self {
            reply: Some(reply.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Fails every request.
    pub fn failing() -> Self {
        Self {
            reply: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// All requests seen so far, oldest first.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl LlmProvider for MockLlm {
    fn model_name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);
        match &self.reply {
            Some(reply) => Ok(CompletionResponse {
                content: reply.clone(),
                input_tokens: 0,
                output_tokens: 0,
                finish_reason: FinishReason::Stop,
            }),
            None => Err(LlmError::RequestFailed {
                provider: "mock".to_string(),
                reason: "scripted failure".to_string(),
            }),
        }
    }
}

/// `WebFetcher` that serves one fixed page, or times out.
pub struct StaticFetcher {
    page: Option<FetchedPage>,
    calls: AtomicUsize,
}

impl StaticFetcher {
    pub fn serving(page: FetchedPage) -> Self {
        Self {
            page: Some(page),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn timing_out() -> Self {
        Self {
            page: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WebFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.page {
            Some(page) => Ok(FetchedPage {
                url: url.to_string(),
                ..page.clone()
            }),
            None => Err(FetchError::Timeout {
                url: url.to_string(),
            }),
        }
    }
}

/// `ContextSearch` with fixed hits, or a fixed failure.
pub struct StaticSearch {
    hits: Option<Vec<String>>,
    calls: AtomicUsize,
}

impl StaticSearch {
    pub fn returning(hits: Vec<String>) -> Self {
        Self {
            hits: Some(hits),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn empty() -> Self {
        Self::returning(Vec::new())
    }

    pub fn failing() -> Self {
        Self {
            hits: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContextSearch for StaticSearch {
    async fn search(&self, _query: &str, k: usize) -> Result<Vec<String>, RetrievalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.hits {
            Some(hits) => Ok(hits.iter().take(k).cloned().collect()),
            None => Err(RetrievalError::SearchFailed {
                reason: "search backend unavailable".to_string(),
            }),
        }
    }
}
