use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::catch_panic::CatchPanicLayer;

pub mod config;
pub mod devops_client;
pub mod domain;
pub mod errors;
pub mod http;
pub mod logging;
pub mod mcp;

use devops_client::WorkTrackingClient;
use mcp::{
    server::{Dispatcher, SessionPolicy},
    session::SessionStore,
};

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub sessions: SessionStore,
}

impl AppState {
    pub fn new(
        client: Arc<dyn WorkTrackingClient>,
        sessions: SessionStore,
        policy: SessionPolicy,
    ) -> Self {
        Self {
            dispatcher: Dispatcher::new(client, policy),
            sessions,
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(http::handlers::discovery))
        .route("/health", get(http::handlers::health))
        .route(
            http::handlers::SSE_PATH,
            get(http::handlers::sse_connect).post(http::handlers::mcp_message),
        )
        .route(http::handlers::MESSAGE_PATH, post(http::handlers::mcp_message))
        .layer(http::cors_layer())
        .layer(CatchPanicLayer::custom(errors::panic_response))
        .layer(middleware::from_fn(logging::request_logging_middleware))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
        response::Response,
    };
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tokio::sync::Notify;
    use tower::ServiceExt;

    use crate::devops_client::{
        NewWorkItem, Project, QueryResult, Repository, WiqlQuery, WorkItem,
    };
    use crate::errors::AppError;

    use super::*;

    struct MockClient {
        work_item_gate: Option<Arc<Notify>>,
    }

    impl MockClient {
        fn ready() -> Self {
            Self {
                work_item_gate: None,
            }
        }
    }

    #[async_trait::async_trait]
    impl WorkTrackingClient for MockClient {
        async fn get_work_item(&self, id: i64) -> Result<WorkItem, AppError> {
            if let Some(gate) = &self.work_item_gate {
                gate.notified().await;
            }
            if id == 13 {
                panic!("work item 13 is cursed");
            }
            Ok(WorkItem {
                id,
                title: "X".to_string(),
                state: "Active".to_string(),
                work_item_type: "Task".to_string(),
                assigned_to: Some("Sam Doe".to_string()),
                team_project: Some("Web".to_string()),
                area_path: None,
                iteration_path: None,
                created_date: None,
                changed_date: None,
                description: None,
                tags: None,
                web_url: None,
            })
        }

        async fn list_projects(&self) -> Result<Vec<Project>, AppError> {
            Ok(vec![Project {
                id: "p-1".to_string(),
                name: "Web".to_string(),
                description: Some("Public site".to_string()),
                state: Some("wellFormed".to_string()),
                visibility: Some("private".to_string()),
                last_update_time: None,
            }])
        }

        async fn get_project(&self, _project: &str) -> Result<Project, AppError> {
            Err(AppError::NotInitialized)
        }

        async fn create_work_item(&self, _item: &NewWorkItem) -> Result<WorkItem, AppError> {
            Err(AppError::NotInitialized)
        }

        async fn query_work_items(&self, _query: &WiqlQuery) -> Result<QueryResult, AppError> {
            Err(AppError::NotInitialized)
        }

        async fn list_repositories(&self, _project: &str) -> Result<Vec<Repository>, AppError> {
            Err(AppError::NotInitialized)
        }

        async fn get_repository(
            &self,
            _project: &str,
            _repository: &str,
        ) -> Result<Repository, AppError> {
            Err(AppError::NotInitialized)
        }
    }

    fn app_with(client: MockClient) -> Router {
        build_app(AppState::new(
            Arc::new(client),
            SessionStore::default(),
            SessionPolicy::Stateless,
        ))
    }

    fn app() -> Router {
        app_with(MockClient::ready())
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .method("POST")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request build")
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .method("GET")
            .body(Body::empty())
            .expect("request build")
    }

    async fn body_json(response: Response) -> Value {
        let body = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        serde_json::from_slice(&body).expect("valid json response")
    }

    /// Reads SSE frames until `marker` has been seen.
    async fn read_sse_until(body: &mut Body, marker: &str) -> String {
        let mut text = String::new();
        while !text.contains(marker) {
            let frame = tokio::time::timeout(Duration::from_secs(2), body.frame())
                .await
                .expect("sse frame within timeout")
                .expect("stream still open")
                .expect("frame ok");
            if let Ok(data) = frame.into_data() {
                text.push_str(&String::from_utf8_lossy(&data));
            }
        }
        text
    }

    #[tokio::test]
    async fn health_reports_service() {
        let response = app().oneshot(get("/health")).await.expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], env!("CARGO_PKG_NAME"));
        assert_eq!(body["activeSessions"], 0);
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn root_lists_tools_and_endpoints() {
        let response = app().oneshot(get("/")).await.expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["endpoints"]["sse"], "/sse");
        assert_eq!(body["endpoints"]["message"], "/message");
        let tools = body["tools"].as_array().expect("tool names");
        assert!(tools.contains(&json!("get_work_item")));
        assert!(tools.contains(&json!("search_repository_code")));
    }

    #[tokio::test]
    async fn sse_emits_endpoint_then_hello() {
        let app = app();
        let response = app
            .clone()
            .oneshot(get("/sse"))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        assert!(content_type.starts_with("text/event-stream"));
        assert_eq!(
            response
                .headers()
                .get(header::CACHE_CONTROL)
                .and_then(|value| value.to_str().ok()),
            Some("no-cache")
        );

        let mut body = response.into_body();
        let text = read_sse_until(&mut body, "event: message").await;

        let endpoint_at = text.find("event: endpoint").expect("endpoint event");
        let message_at = text.find("event: message").expect("message event");
        assert!(endpoint_at < message_at);
        assert_eq!(text.matches("event: endpoint").count(), 1);
        assert!(!text.contains("heartbeat"));
        assert!(text.contains(r#""method":"hello""#));

        let session_id = text
            .lines()
            .find_map(|line| line.strip_prefix("data: /message?sessionId="))
            .expect("session id in endpoint event")
            .to_string();

        let response = app
            .oneshot(post_json(
                &format!("/message?sessionId={session_id}"),
                r#"{"jsonrpc":"2.0","id":"h","method":"hello"}"#,
            ))
            .await
            .expect("request execution");
        let body = body_json(response).await;
        assert_eq!(body["id"], "h");
        assert_eq!(body["result"]["sessionId"], session_id);
    }

    #[tokio::test]
    async fn sse_sends_heartbeat_comments() {
        let app = build_app(AppState::new(
            Arc::new(MockClient::ready()),
            SessionStore::new(Duration::from_millis(20)),
            SessionPolicy::Stateless,
        ));
        let response = app.oneshot(get("/sse")).await.expect("request execution");

        let mut body = response.into_body();
        let text = read_sse_until(&mut body, ": heartbeat").await;
        assert!(text.find("event: message") < text.find(": heartbeat"));
    }

    #[tokio::test]
    async fn tools_call_over_message_endpoint() {
        let response = app()
            .oneshot(post_json(
                "/message",
                r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"get_work_item","arguments":{"workItemId":594}}}"#,
            ))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["jsonrpc"], "2.0");
        assert_eq!(body["id"], 1);
        let text = body["result"]["content"][0]["text"]
            .as_str()
            .expect("text content");
        assert!(text.contains('X'));
        assert!(text.contains("Active"));
        assert!(text.contains("594"));
    }

    #[tokio::test]
    async fn post_sse_is_an_alias_for_message() {
        let response = app()
            .oneshot(post_json(
                "/sse",
                r#"{"jsonrpc":"2.0","id":7,"method":"tools/list"}"#,
            ))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["id"], 7);
        let names = body["result"]["tools"]
            .as_array()
            .expect("tools array")
            .iter()
            .filter_map(|tool| tool["name"].as_str())
            .collect::<Vec<_>>();
        assert_eq!(names.len(), 8);
        assert!(names.contains(&"create_work_item"));
    }

    #[tokio::test]
    async fn missing_method_is_bad_request() {
        let response = app()
            .oneshot(post_json("/message", r#"{"jsonrpc":"2.0","id":3}"#))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["id"], 3);
        assert_eq!(body["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn unparseable_body_is_bad_request_with_null_id() {
        let response = app()
            .oneshot(post_json("/message", "{\"jsonrpc\":"))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["id"], Value::Null);
        assert_eq!(body["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn positional_array_body_is_bad_request() {
        let response = app()
            .oneshot(post_json("/message", r#"["2.0", 5, "tools/list"]"#))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["id"], Value::Null);
        assert_eq!(body["error"]["code"], -32600);
        assert!(body.get("result").is_none());
    }

    #[tokio::test]
    async fn advertised_schema_uses_camel_case_arguments() {
        let response = app()
            .oneshot(post_json(
                "/message",
                r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
            ))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let tools = body["result"]["tools"].as_array().expect("tools array");
        let get_work_item = tools
            .iter()
            .find(|tool| tool["name"] == "get_work_item")
            .expect("get_work_item advertised");
        assert_eq!(get_work_item["inputSchema"]["required"], json!(["workItemId"]));
        assert!(get_work_item["inputSchema"]["properties"]["workItemId"].is_object());
    }

    #[tokio::test]
    async fn unknown_method_is_rpc_error_with_http_ok() {
        let response = app()
            .oneshot(post_json(
                "/message",
                r#"{"jsonrpc":"2.0","id":1,"method":"resources/list"}"#,
            ))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], -32601);
        assert_eq!(body["error"]["message"], "Method not found");
    }

    #[tokio::test]
    async fn backend_failure_is_rpc_error_with_http_ok() {
        let response = app()
            .oneshot(post_json(
                "/message?sessionId=unknown",
                r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"list_repositories","arguments":{"project":"Web"}}}"#,
            ))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], -32603);
        let data = body["error"]["data"].as_str().expect("error data");
        assert!(data.starts_with("Failed to list repositories in project Web: "));
        assert!(data.contains("not initialized"));
    }

    #[tokio::test]
    async fn handler_panic_is_internal_server_error() {
        let response = app()
            .oneshot(post_json(
                "/message",
                r#"{"jsonrpc":"2.0","id":13,"method":"tools/call","params":{"name":"get_work_item","arguments":{"workItemId":13}}}"#,
            ))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["jsonrpc"], "2.0");
        assert_eq!(body["error"]["code"], -32603);
    }

    #[tokio::test]
    async fn options_is_short_circuited_with_cors() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/message")
                    .method("OPTIONS")
                    .header(header::ORIGIN, "https://client.example")
                    .body(Body::empty())
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .and_then(|value| value.to_str().ok()),
            Some("*")
        );
    }

    #[tokio::test]
    async fn preflight_allows_any_origin() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/message")
                    .method("OPTIONS")
                    .header(header::ORIGIN, "https://client.example")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                    .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
                    .body(Body::empty())
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response
            .headers()
            .contains_key(header::ACCESS_CONTROL_ALLOW_METHODS));
    }

    #[tokio::test]
    async fn slow_tool_call_does_not_block_others() {
        let gate = Arc::new(Notify::new());
        let app = app_with(MockClient {
            work_item_gate: Some(gate.clone()),
        });

        let slow = tokio::spawn(app.clone().oneshot(post_json(
            "/message",
            r#"{"jsonrpc":"2.0","id":"slow","method":"tools/call","params":{"name":"get_work_item","arguments":{"workItemId":1}}}"#,
        )));

        let fast = tokio::time::timeout(
            Duration::from_secs(2),
            app.oneshot(post_json(
                "/message",
                r#"{"jsonrpc":"2.0","id":"fast","method":"tools/call","params":{"name":"list_projects","arguments":{}}}"#,
            )),
        )
        .await
        .expect("fast call is not blocked by the slow one")
        .expect("request execution");
        let fast_body = body_json(fast).await;
        assert_eq!(fast_body["id"], "fast");
        assert!(fast_body["result"]["content"][0]["text"]
            .as_str()
            .is_some_and(|text| text.contains("Web")));
        assert!(!slow.is_finished());

        gate.notify_one();
        let slow = tokio::time::timeout(Duration::from_secs(2), slow)
            .await
            .expect("slow call completes once released")
            .expect("task join")
            .expect("request execution");
        assert_eq!(body_json(slow).await["id"], "slow");
    }
}
