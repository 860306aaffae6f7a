use crate::util::http::{HttpClient, HttpRequest, HttpResponse, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Scripted = Result<HttpResponse, TransportError>;

/// An [HttpClient] answering from per-URL scripts and recording every request it receives.
///
/// Responses for a URL are handed out in order; the last one is repeated once the script is
/// exhausted. Requests to URLs without a script fail with a [TransportError]. Clones share
/// scripts and the request log.
#[derive(Clone, Default)]
pub struct ScriptedHttpClient {
    scripts: Arc<Mutex<HashMap<String, VecDeque<Scripted>>>>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
    latency: Option<Duration>,
}

impl ScriptedHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every response by the given duration (use with a paused tokio clock).
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn script(&self, url: &str, responses: impl IntoIterator<Item = Scripted>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(url.to_string(), responses.into_iter().collect());
    }

    pub fn respond(&self, url: &str, response: HttpResponse) {
        self.script(url, [Ok(response)]);
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|request| request.url.as_str() == url)
            .count()
    }

    fn next(&self, url: &str) -> Scripted {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(url) {
            Some(script) if script.len() > 1 => script.pop_front().unwrap(),
            Some(script) if !script.is_empty() => script[0].clone(),
            _ => Err(TransportError::new(format!("no route to {url}"))),
        }
    }
}

#[async_trait]
impl HttpClient for ScriptedHttpClient {
    async fn get(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let url = request.url.to_string();
        self.requests.lock().unwrap().push(request);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.next(&url)
    }
}

/// A response with the given status and an empty body.
pub fn status(status: u16) -> HttpResponse {
    HttpResponse {
        status,
        content_type: None,
        body: Bytes::new(),
    }
}

/// A `200 OK` response carrying a JSON body.
pub fn json(body: &serde_json::Value) -> HttpResponse {
    HttpResponse {
        status: 200,
        content_type: Some("application/json".to_string()),
        body: Bytes::from(body.to_string()),
    }
}

/// A `200 OK` response carrying image bytes of the given MIME type.
pub fn image(mime_type: &str, data: &'static [u8]) -> HttpResponse {
    HttpResponse {
        status: 200,
        content_type: Some(mime_type.to_string()),
        body: Bytes::from_static(data),
    }
}

/// A connection-level failure.
pub fn unreachable() -> Scripted {
    Err(TransportError::new("connection refused"))
}
