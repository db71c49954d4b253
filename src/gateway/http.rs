//! Analysis backend HTTP client
//!
//! Direct reqwest client for the backend's session and progress REST API.

use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};
use ulid::Ulid;

use super::wire;
use super::{GatewayError, SessionGateway, SessionSummary, StepContinuation};
use crate::config::ClientConfig;
use crate::session::{SessionContext, SessionSnapshot, StatusReport};
use crate::store::validate_session_id;

/// Header carrying a client-generated id so backend logs can be correlated
const REQUEST_ID_HEADER: &str = "X-Client-Request-Id";

#[derive(Clone)]
pub struct HttpGateway {
    http: Client,
    base_url: String,
}

impl HttpGateway {
    pub fn new(base_url: &str) -> Self {
        Self::with_timeouts(base_url, Duration::from_secs(30), Duration::from_secs(5))
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::with_timeouts(
            &config.base_url,
            Duration::from_secs(config.request_timeout_secs),
            Duration::from_secs(config.connect_timeout_secs),
        )
    }

    fn with_timeouts(base_url: &str, timeout: Duration, connect_timeout: Duration) -> Self {
        let http = match Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "HTTP client setup failed, falling back to defaults without timeouts");
                Client::new()
            }
        };
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Session ids end up in URL paths; refuse anything that could change the route.
    fn checked(session_id: &str) -> Result<&str, GatewayError> {
        validate_session_id(session_id)
            .map(|_| session_id)
            .map_err(|_| GatewayError::Rejected(format!("invalid session id {:?}", session_id)))
    }

    /// Send a request and return the decoded JSON body of a successful reply.
    async fn call(&self, request: RequestBuilder, op: &'static str) -> Result<Value, GatewayError> {
        let request_id = Ulid::new().to_string();
        let resp = request
            .header(REQUEST_ID_HEADER, &request_id)
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;
        debug!(op, status = %status, request_id = %request_id, "Backend reply");
        wire::decode_envelope(status, &text)
    }

    async fn post_ack(&self, session_id: &str, op: &'static str) -> Result<(), GatewayError> {
        let path = format!("/api/sessions/{}/{}", Self::checked(session_id)?, op);
        self.call(self.http.post(self.url(&path)).json(&json!({})), op)
            .await?;
        info!(session_id = %session_id, op, "Backend acknowledged");
        Ok(())
    }
}

impl SessionGateway for HttpGateway {
    fn submit<'a>(&'a self, context: &'a SessionContext) -> BoxFuture<'a, Result<String, GatewayError>> {
        async move {
            let body = self
                .call(
                    self.http
                        .post(self.url("/api/execute_complete_analysis"))
                        .json(context),
                    "submit",
                )
                .await?;
            let session_id = wire::decode_session_id(&body)?;
            if validate_session_id(&session_id).is_err() {
                return Err(GatewayError::Decode(format!("unusable session id {:?}", session_id)));
            }
            info!(session_id = %session_id, "Analysis submitted");
            Ok(session_id)
        }
        .boxed()
    }

    fn poll_progress<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<StatusReport, GatewayError>> {
        async move {
            let session_id = Self::checked(session_id)?;
            let body = self
                .call(self.http.get(self.url(&format!("/api/progress/{}", session_id))), "poll")
                .await?;
            wire::decode_report(body)
        }
        .boxed()
    }

    fn get_status<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<StatusReport, GatewayError>> {
        async move {
            let session_id = Self::checked(session_id)?;
            let body = self
                .call(
                    self.http
                        .get(self.url(&format!("/api/sessions/{}/status", session_id))),
                    "status",
                )
                .await?;
            wire::decode_report(body)
        }
        .boxed()
    }

    fn pause<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<(), GatewayError>> {
        self.post_ack(session_id, "pause").boxed()
    }

    fn resume<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<(), GatewayError>> {
        self.post_ack(session_id, "resume").boxed()
    }

    fn save<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<(), GatewayError>> {
        self.post_ack(session_id, "save").boxed()
    }

    fn continue_session<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<(), GatewayError>> {
        self.post_ack(session_id, "continue").boxed()
    }

    fn continue_from_step<'a>(
        &'a self,
        session_id: &'a str,
        step: u8,
    ) -> BoxFuture<'a, Result<StepContinuation, GatewayError>> {
        async move {
            let session_id = Self::checked(session_id)?;
            let body = self
                .call(
                    self.http
                        .post(self.url(&format!("/api/sessions/continue/{}/{}", session_id, step)))
                        .json(&json!({})),
                    "continue_from_step",
                )
                .await?;
            info!(session_id = %session_id, step, "Continuing from step");
            Ok(wire::decode_continuation(step, &body))
        }
        .boxed()
    }

    fn list<'a>(&'a self) -> BoxFuture<'a, Result<Vec<SessionSummary>, GatewayError>> {
        async move {
            let body = self
                .call(self.http.get(self.url("/api/sessions/list")), "list")
                .await?;
            Ok(wire::decode_summaries(&body))
        }
        .boxed()
    }

    fn delete<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<(), GatewayError>> {
        async move {
            let session_id = Self::checked(session_id)?;
            self.call(
                self.http
                    .delete(self.url(&format!("/api/sessions/delete/{}", session_id))),
                "delete",
            )
            .await?;
            info!(session_id = %session_id, "Deleted remote session");
            Ok(())
        }
        .boxed()
    }

    fn load<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<SessionSnapshot, GatewayError>> {
        async move {
            let session_id = Self::checked(session_id)?;
            let body = self
                .call(
                    self.http
                        .get(self.url(&format!("/api/sessions/load/{}", session_id))),
                    "load",
                )
                .await?;
            wire::decode_loaded(session_id, &body)
        }
        .boxed()
    }

    fn fetch_results<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<Value, GatewayError>> {
        async move {
            let session_id = Self::checked(session_id)?;
            let body = self
                .call(
                    self.http
                        .get(self.url(&format!("/api/sessions/{}/results", session_id))),
                    "results",
                )
                .await?;
            wire::decode_results(body)
        }
        .boxed()
    }

    fn cleanup<'a>(&'a self) -> BoxFuture<'a, Result<(), GatewayError>> {
        async move {
            self.call(
                self.http
                    .post(self.url("/api/progress/cleanup"))
                    .json(&json!({ "force": true })),
                "cleanup",
            )
            .await?;
            info!("Remote sessions cleaned up");
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Serve exactly one request with a 200 JSON `body`; resolves to the request line.
    async fn answer_once(body: &'static str) -> (HttpGateway, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 1024];
            let head_end = loop {
                let n = socket.read(&mut chunk).await.unwrap();
                assert!(n > 0, "connection closed before headers ended");
                request.extend_from_slice(&chunk[..n]);
                if let Some(pos) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };
            let head = String::from_utf8_lossy(&request[..head_end]).to_string();
            let body_len = head
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            while request.len() < head_end + body_len {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..n]);
            }

            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            head.lines().next().unwrap_or_default().to_string()
        });
        (HttpGateway::new(&base_url), handle)
    }

    #[test]
    fn test_base_url_is_normalized() {
        let gateway = HttpGateway::new("http://127.0.0.1:5000/");
        assert_eq!(gateway.base_url(), "http://127.0.0.1:5000");
        assert_eq!(gateway.url("/api/progress/s1"), "http://127.0.0.1:5000/api/progress/s1");
    }

    #[tokio::test]
    async fn test_delete_uses_delete_route() {
        let (gateway, server) = answer_once(r#"{"success": true}"#).await;
        gateway.delete("s1").await.unwrap();
        assert_eq!(server.await.unwrap(), "DELETE /api/sessions/delete/s1 HTTP/1.1");
    }

    #[tokio::test]
    async fn test_cleanup_request_line() {
        let (gateway, server) = answer_once(r#"{"success": true}"#).await;
        gateway.cleanup().await.unwrap();
        assert_eq!(server.await.unwrap(), "POST /api/progress/cleanup HTTP/1.1");
    }

    #[tokio::test]
    async fn test_poll_request_line_and_decode() {
        let (gateway, server) = answer_once(
            r#"{"success": true, "progress": {"percentage": 40, "current_step": "step2", "completed": false}}"#,
        )
        .await;
        let report = gateway.poll_progress("s1").await.unwrap();
        assert_eq!(server.await.unwrap(), "GET /api/progress/s1 HTTP/1.1");
        assert_eq!(report.progress_percent, 40);
        assert_eq!(report.current_step_label, "step2");
    }

    #[tokio::test]
    async fn test_continue_from_step_request_line() {
        let (gateway, server) = answer_once(
            r#"{"success": true, "step": 2, "context": {"segmento": "fitness"}}"#,
        )
        .await;
        let continuation = gateway.continue_from_step("s1", 2).await.unwrap();
        assert_eq!(server.await.unwrap(), "POST /api/sessions/continue/s1/2 HTTP/1.1");
        assert_eq!(continuation.step, 2);
        assert!(continuation.context.contains_key("segmento"));
    }

    #[tokio::test]
    async fn test_rejected_delete_is_an_error() {
        let (gateway, server) =
            answer_once(r#"{"success": false, "error": "Sessão não encontrada"}"#).await;
        let err = gateway.delete("s1").await.unwrap_err();
        server.await.unwrap();
        assert!(matches!(err, GatewayError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_invalid_session_id_never_reaches_the_network() {
        // Port 9 (discard) is not serving HTTP on loopback, so any request would be a Transport error.
        let gateway = HttpGateway::with_timeouts(
            "http://127.0.0.1:9",
            Duration::from_millis(500),
            Duration::from_millis(200),
        );
        for id in ["a/../x", "", "s1?x=1"] {
            assert!(matches!(gateway.delete(id).await, Err(GatewayError::Rejected(_))));
            assert!(matches!(gateway.poll_progress(id).await, Err(GatewayError::Rejected(_))));
            assert!(matches!(gateway.pause(id).await, Err(GatewayError::Rejected(_))));
        }
    }

    #[tokio::test]
    async fn test_list_reports_unreachable_server() {
        let gateway = HttpGateway::with_timeouts(
            "http://127.0.0.1:9",
            Duration::from_millis(500),
            Duration::from_millis(200),
        );
        assert!(matches!(gateway.list().await, Err(GatewayError::Transport(_))));
    }
}
