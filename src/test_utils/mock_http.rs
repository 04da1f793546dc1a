use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::HttpClient;
use crate::HttpRequest;
use crate::HttpResponse;
use crate::NetworkError;
use crate::Result;

/// Answers requests from a queue in order and records what was asked.
///
/// Once the queue is drained every request times out.
#[derive(Debug, Default)]
pub struct ScriptedHttpClient {
    responses: Mutex<VecDeque<Result<HttpResponse>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedHttpClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(
        &self,
        status: u16,
        body: impl Into<String>,
    ) -> &Self {
        self.responses.lock().push_back(Ok(HttpResponse::new(status, body)));
        self
    }

    pub fn fail(
        &self,
        url: &str,
    ) -> &Self {
        self.responses.lock().push_back(Err(NetworkError::Timeout {
            url: url.to_string(),
            duration: std::time::Duration::from_millis(1),
        }
        .into()));
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.requests.lock().iter().map(|r| r.url.clone()).collect()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().len()
    }
}

#[async_trait]
impl HttpClient for ScriptedHttpClient {
    async fn get(
        &self,
        request: HttpRequest,
    ) -> Result<HttpResponse> {
        let url = request.url.clone();
        let timeout = request.timeout;
        self.requests.lock().push(request);
        let next = self.responses.lock().pop_front();
        match next {
            Some(result) => result,
            None => Err(NetworkError::Timeout { url, duration: timeout }.into()),
        }
    }
}
