//! HTTP client for agentctld.
//!
//! Communicates with the daemon via its local REST + SSE API.

use agentctl_core::{Event, Run};
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("daemon not running at {addr}\n  → start with: agentctld\n  → or pass --addr if using a different address")]
    ConnectionFailed { addr: String },

    #[error("HTTP error: {status} - {message}")]
    HttpError { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("unauthorized: check AGENTCTL_AUTH_TOKEN env var or --token flag")]
    Unauthorized,

    #[error("daemon overloaded, try again later")]
    Overloaded,

    #[error(
        "daemon not ready after {timeout_ms}ms at {addr}\n  → ensure agentctld is running\n  → check AGENTCTL_AUTH_TOKEN if auth is enabled"
    )]
    DaemonNotReady { addr: String, timeout_ms: u64 },
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            let addr = e.url().map(|u| u.to_string()).unwrap_or_else(|| "unknown".to_string());
            ClientError::ConnectionFailed { addr }
        } else {
            ClientError::HttpError { status: e.status().map(|s| s.as_u16()).unwrap_or(0), message: e.to_string() }
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRunRequest {
    pub agent_id: String,
    pub source: String,
    pub task_name: String,
    pub prompt: String,
    pub plan_mode: bool,
}

#[derive(Debug, Deserialize)]
pub struct StartRunResponse {
    pub id: String,
    pub workdir: String,
}

#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

const DEFAULT_READY_TIMEOUT_MS: u64 = 5000;
const INITIAL_BACKOFF_MS: u64 = 200;

/// HTTP client for agentctld.
pub struct Client {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl Client {
    pub fn new(base_url: &str, token: Option<&str>) -> Self {
        Self { base_url: base_url.trim_end_matches('/').to_string(), token: token.map(String::from), http: reqwest::Client::new() }
    }

    pub fn addr(&self) -> &str {
        &self.base_url
    }

    pub async fn check_health(&self) -> Result<bool, ClientError> {
        let url = format!("{}/health", self.base_url);
        let response = self.http.get(&url).headers(self.headers()).send().await?;
        Ok(response.status().is_success())
    }

    pub async fn wait_for_ready(&self) -> Result<(), ClientError> {
        self.wait_for_ready_with_timeout(DEFAULT_READY_TIMEOUT_MS).await
    }

    pub async fn wait_for_ready_with_timeout(&self, timeout_ms: u64) -> Result<(), ClientError> {
        let start = std::time::Instant::now();
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            match self.check_health().await {
                Ok(true) => return Ok(()),
                Ok(false) | Err(_) => {
                    let elapsed = start.elapsed().as_millis() as u64;
                    if elapsed >= timeout_ms {
                        return Err(ClientError::DaemonNotReady { addr: self.base_url.clone(), timeout_ms });
                    }
                    eprintln!("waiting for daemon at {} (retrying in {}ms)", self.base_url, backoff_ms);
                    let remaining = timeout_ms.saturating_sub(elapsed);
                    tokio::time::sleep(std::time::Duration::from_millis(backoff_ms.min(remaining))).await;
                    backoff_ms = backoff_ms.saturating_mul(2);
                }
            }
        }
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = &self.token {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        headers
    }

    async fn handle_error(&self, response: reqwest::Response) -> ClientError {
        let status = response.status().as_u16();
        if status == 401 {
            return ClientError::Unauthorized;
        }
        if status == 404 {
            return ClientError::RunNotFound("resource not found".to_string());
        }
        if status == 503 {
            return ClientError::Overloaded;
        }
        let message = response.json::<ErrorResponse>().await.map(|e| e.error).unwrap_or_else(|_| "unknown error".to_string());
        ClientError::HttpError { status, message }
    }

    /// POST /runs
    pub async fn start_run(&self, req: StartRunRequest) -> Result<StartRunResponse, ClientError> {
        let url = format!("{}/runs", self.base_url);
        let response = self.http.post(&url).headers(self.headers()).json(&req).send().await?;
        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }
        response.json().await.map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }

    /// GET /runs
    pub async fn list_runs(&self) -> Result<Vec<Run>, ClientError> {
        let url = format!("{}/runs", self.base_url);
        let response = self.http.get(&url).headers(self.headers()).send().await?;
        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }
        response.json().await.map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }

    /// GET /runs/{id}
    pub async fn get_run(&self, run_id: &str) -> Result<Run, ClientError> {
        let url = format!("{}/runs/{}", self.base_url, run_id);
        let response = self.http.get(&url).headers(self.headers()).send().await?;
        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }
        response.json().await.map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }

    /// POST /runs/{id}/cancel
    pub async fn cancel_run(&self, run_id: &str) -> Result<(), ClientError> {
        let url = format!("{}/runs/{}/cancel", self.base_url, run_id);
        let response = self.http.post(&url).headers(self.headers()).send().await?;
        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }
        Ok(())
    }

    /// POST /runs/{id}/plan/approve
    pub async fn approve_plan(&self, run_id: &str) -> Result<(), ClientError> {
        let url = format!("{}/runs/{}/plan/approve", self.base_url, run_id);
        let response = self.http.post(&url).headers(self.headers()).send().await?;
        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }
        Ok(())
    }

    /// GET /runs/{id}/events, invoking `on_event` for every event parsed off
    /// the SSE stream until the connection closes.
    pub async fn tail_events(&self, run_id: &str, mut on_event: impl FnMut(Event)) -> Result<(), ClientError> {
        let url = format!("{}/runs/{}/events", self.base_url, run_id);
        let response = self.http.get(&url).headers(self.headers()).send().await?;
        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ClientError::IoError(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(end) = buffer.find("\n\n") {
                let event_str = buffer[..end].to_string();
                buffer = buffer[end + 2..].to_string();
                if let Some(event) = parse_sse_event(&event_str) {
                    on_event(event);
                }
            }
        }

        Ok(())
    }
}

fn parse_sse_event(event_str: &str) -> Option<Event> {
    let data = event_str.lines().find_map(|line| line.strip_prefix("data:")).map(str::trim)?;
    serde_json::from_str(data).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentctl_core::RunId;

    #[test]
    fn parse_sse_event_extracts_data_payload() {
        let run_id = RunId::new();
        let event = Event::run_started(run_id);
        let json = serde_json::to_string(&event).unwrap();
        let sse = format!("event: run_started\ndata: {json}");
        let parsed = parse_sse_event(&sse).unwrap();
        assert_eq!(parsed.event_type, event.event_type);
    }

    #[test]
    fn parse_sse_event_ignores_keepalive_comments() {
        assert!(parse_sse_event(":keepalive").is_none());
    }

    #[test]
    fn parse_sse_event_rejects_invalid_json() {
        assert!(parse_sse_event("data: not valid json").is_none());
    }

    #[test]
    fn client_trims_trailing_slash() {
        let client = Client::new("http://localhost:4170/", None);
        assert_eq!(client.base_url, "http://localhost:4170");
    }

    #[test]
    fn client_stores_auth_token() {
        let client = Client::new("http://localhost:4170", Some("my-secret-token"));
        assert_eq!(client.token, Some("my-secret-token".to_string()));
    }

    #[test]
    fn client_headers_include_auth_when_token_set() {
        let client = Client::new("http://localhost:4170", Some("test-token"));
        let headers = client.headers();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer test-token");
    }

    #[test]
    fn client_headers_omit_auth_when_no_token() {
        let client = Client::new("http://localhost:4170", None);
        assert!(client.headers().get(AUTHORIZATION).is_none());
    }

    #[tokio::test]
    async fn check_health_fails_when_daemon_not_running() {
        let client = Client::new("http://127.0.0.1:19999", None);
        assert!(client.check_health().await.is_err());
    }

    #[tokio::test]
    async fn wait_for_ready_times_out_when_daemon_not_running() {
        let client = Client::new("http://127.0.0.1:19999", None);
        let result = client.wait_for_ready_with_timeout(100).await;
        match result {
            Err(ClientError::DaemonNotReady { addr, timeout_ms }) => {
                assert_eq!(addr, "http://127.0.0.1:19999");
                assert_eq!(timeout_ms, 100);
            }
            _ => panic!("expected DaemonNotReady error"),
        }
    }

    #[test]
    fn connection_failed_error_suggests_start_command() {
        let err = ClientError::ConnectionFailed { addr: "http://127.0.0.1:4170".to_string() };
        let msg = err.to_string();
        assert!(msg.contains("agentctld"));
    }

    #[test]
    fn unauthorized_error_suggests_token_options() {
        let err = ClientError::Unauthorized;
        let msg = err.to_string();
        assert!(msg.contains("AGENTCTL_AUTH_TOKEN"));
        assert!(msg.contains("--token"));
    }
}
