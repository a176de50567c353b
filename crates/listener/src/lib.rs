//! Webhook listener.
//!
//! Binds an HTTP server and turns inbound webhooks into dispatches:
//!
//! | Route          | Source       | Event tag                       |
//! |----------------|--------------|---------------------------------|
//! | `POST /notify` | GitLab       | `X-Gitlab-Event` request header |
//! | `POST /alert`  | Alertmanager | always `Alertmanager`           |
//! | `GET /health`  | liveness     |                                 |
//!
//! The payload is decoded, routed and rendered before the response is sent,
//! so a bad payload gets `400 Bad Request`. Accepted payloads get
//! `202 Accepted` and are delivered to the chat network on a background task;
//! the caller never waits on the chat connection.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** HTTP details live here. The [`relay`] crate sees only
//! an event tag and a body.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use relay::{Dispatcher, EventKind};
use thiserror::Error;
use tokio::net::TcpListener;

/// Header carrying the GitLab event type (e.g. `Push Hook`).
pub const GITLAB_EVENT_HEADER: &str = "x-gitlab-event";

pub const NOTIFY_PATH: &str = "/notify";
pub const ALERT_PATH: &str = "/alert";
pub const HEALTH_PATH: &str = "/health";

/// Errors from running the HTTP server.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("cannot bind webhook listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("webhook listener failed: {0}")]
    Serve(#[source] std::io::Error),
}

/// Builds the webhook router around a shared dispatcher.
pub fn router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .route(NOTIFY_PATH, post(handle_gitlab))
        .route(ALERT_PATH, post(handle_alertmanager))
        .route(HEALTH_PATH, get(handle_health))
        .with_state(dispatcher)
}

/// Binds `addr` and serves until `shutdown` resolves.
pub async fn serve<F>(
    addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    shutdown: F,
) -> Result<(), ListenerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ListenerError::Bind { addr, source })?;
    serve_on(listener, dispatcher, shutdown).await
}

/// Serves on an already bound socket until `shutdown` resolves.
pub async fn serve_on<F>(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    shutdown: F,
) -> Result<(), ListenerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    match listener.local_addr() {
        Ok(addr) => tracing::info!(%addr, "Webhook listener ready"),
        Err(err) => tracing::debug!(error = %err, "Listener address unavailable"),
    }

    axum::serve(listener, router(dispatcher))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(ListenerError::Serve)?;

    tracing::info!("Webhook listener stopped");
    Ok(())
}

async fn handle_gitlab(
    State(dispatcher): State<Arc<Dispatcher>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let Some(tag) = headers
        .get(GITLAB_EVENT_HEADER)
        .and_then(|value| value.to_str().ok())
    else {
        tracing::warn!(body_bytes = body.len(), "GitLab webhook without a usable event header");
        return StatusCode::BAD_REQUEST;
    };
    accept(&dispatcher, tag, &body)
}

async fn handle_alertmanager(
    State(dispatcher): State<Arc<Dispatcher>>,
    body: Bytes,
) -> StatusCode {
    accept(&dispatcher, EventKind::ALERTMANAGER, &body)
}

async fn handle_health() -> &'static str {
    "ok"
}

/// Prepares the dispatch inline and delivers it on a background task.
fn accept(dispatcher: &Arc<Dispatcher>, tag: &str, body: &[u8]) -> StatusCode {
    // The dispatcher has already logged the decode failure.
    let Ok(prepared) = dispatcher.prepare(tag, body) else {
        return StatusCode::BAD_REQUEST;
    };

    let dispatcher = Arc::clone(dispatcher);
    tokio::spawn(async move {
        dispatcher.deliver(prepared).await;
    });
    StatusCode::ACCEPTED
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use relay::{ChannelName, ChatTransport, RelayConfig, RenderedLine, TransportError};
    use serde_json::json;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    use super::*;

    struct ChannelTransport(mpsc::UnboundedSender<(String, String)>);

    #[async_trait]
    impl ChatTransport for ChannelTransport {
        async fn send(
            &self,
            channel: &ChannelName,
            line: &RenderedLine,
        ) -> Result<(), TransportError> {
            let _ = self.0.send((channel.to_string(), line.to_string()));
            Ok(())
        }
    }

    const CONFIG: &str = r##"
default: "#general"
explicit:
  acme/web: ["#web-ci"]
  ops: ["#ops"]
"##;

    fn app() -> (Router, mpsc::UnboundedReceiver<(String, String)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let config = Arc::new(RelayConfig::from_yaml_str(CONFIG).unwrap());
        let dispatcher = Arc::new(Dispatcher::new(config, Arc::new(ChannelTransport(tx))));
        (router(dispatcher), rx)
    }

    fn issue_body() -> String {
        json!({
            "object_kind": "issue",
            "user": { "name": "Alice" },
            "project": {
                "name": "web",
                "namespace": "acme",
                "web_url": "https://gitlab.example.com/acme/web"
            },
            "object_attributes": {
                "iid": 12,
                "title": "Broken login",
                "action": "open",
                "url": "https://gitlab.example.com/acme/web/-/issues/12"
            }
        })
        .to_string()
    }

    async fn next_sent(rx: &mut mpsc::UnboundedReceiver<(String, String)>) -> (String, String) {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("delivery timed out")
            .expect("transport dropped")
    }

    #[tokio::test]
    async fn gitlab_issue_is_accepted_and_delivered() {
        let (app, mut rx) = app();
        let request = Request::builder()
            .method("POST")
            .uri(NOTIFY_PATH)
            .header("X-Gitlab-Event", "Issue Hook")
            .header("content-type", "application/json")
            .body(Body::from(issue_body()))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let (channel, line) = next_sent(&mut rx).await;
        assert_eq!(channel, "#web-ci");
        assert!(line.contains("Broken login"), "{line}");
    }

    #[tokio::test]
    async fn missing_event_header_is_a_bad_request() {
        let (app, mut rx) = app();
        let request = Request::builder()
            .method("POST")
            .uri(NOTIFY_PATH)
            .body(Body::from(issue_body()))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_event_type_is_rejected_without_sending() {
        let (app, mut rx) = app();
        let request = Request::builder()
            .method("POST")
            .uri(NOTIFY_PATH)
            .header("X-Gitlab-Event", "Pipeline Hook")
            .body(Body::from("{}"))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn malformed_json_is_a_bad_request() {
        let (app, _rx) = app();
        let request = Request::builder()
            .method("POST")
            .uri(NOTIFY_PATH)
            .header("X-Gitlab-Event", "Push Hook")
            .body(Body::from("{not json"))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn alertmanager_batch_routes_by_receiver() {
        let (app, mut rx) = app();
        let body = json!({
            "receiver": "ops",
            "status": "firing",
            "alerts": [{
                "status": "firing",
                "labels": { "alertname": "DiskFull", "instance": "db1" },
                "annotations": { "description": "95% used" }
            }]
        });
        let request = Request::builder()
            .method("POST")
            .uri(ALERT_PATH)
            .body(Body::from(body.to_string()))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let (channel, line) = next_sent(&mut rx).await;
        assert_eq!(channel, "#ops");
        assert!(line.contains("DiskFull"), "{line}");
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (app, _rx) = app();
        let request = Request::builder()
            .uri(HEALTH_PATH)
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn serve_stops_when_shutdown_resolves() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let config = Arc::new(RelayConfig::from_yaml_str(CONFIG).unwrap());
        let dispatcher = Arc::new(Dispatcher::new(config, Arc::new(ChannelTransport(tx))));
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();

        serve(addr, dispatcher, async {}).await.unwrap();
    }

    #[tokio::test]
    async fn bind_failure_names_the_address() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let config = Arc::new(RelayConfig::from_yaml_str(CONFIG).unwrap());
        let dispatcher = Arc::new(Dispatcher::new(config, Arc::new(ChannelTransport(tx))));

        let err = serve(addr, dispatcher, async {}).await.unwrap_err();
        assert!(matches!(err, ListenerError::Bind { .. }));
        assert!(err.to_string().contains(&addr.to_string()));
    }
}
